//! Configuration for the adlab service

use std::path::{Path, PathBuf};

use adlab_logging::LogConfig;
use adlab_storage::RecordLogConfig;
use serde::{Deserialize, Serialize};

use crate::error::{ServiceError, ServiceResult};

/// Configuration for a [`Service`](crate::Service)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Directory holding every dataset store
    pub data_dir: PathBuf,
    /// Sync record appends to disk before acknowledging them
    pub sync_writes: bool,
    /// Queued packets per dataset handler
    pub handler_channel_capacity: usize,
    /// Queued rule candidates per dataset before the handler stalls
    pub rule_update_capacity: usize,
    /// Queued candidate updates shared by all datasets
    pub update_channel_capacity: usize,
    /// Published rules buffered per subscriber
    pub rule_broadcast_capacity: usize,
    /// Logging configuration
    pub log: LogConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./store"),
            sync_writes: true,
            handler_channel_capacity: 64,
            rule_update_capacity: 10,
            update_channel_capacity: 100,
            rule_broadcast_capacity: 64,
            log: LogConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Create a configuration with a custom data directory
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Load a configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> ServiceResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ServiceError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    /// Parse a configuration from TOML; missing keys take their defaults
    pub fn from_toml(text: &str) -> ServiceResult<Self> {
        toml::from_str(text).map_err(|e| ServiceError::Config(e.to_string()))
    }

    /// Set whether appends are synced
    pub fn with_sync_writes(mut self, sync_writes: bool) -> Self {
        self.sync_writes = sync_writes;
        self
    }

    /// Set the per-dataset packet queue capacity
    pub fn with_handler_channel_capacity(mut self, capacity: usize) -> Self {
        self.handler_channel_capacity = capacity;
        self
    }

    /// Set the per-dataset candidate queue capacity
    pub fn with_rule_update_capacity(mut self, capacity: usize) -> Self {
        self.rule_update_capacity = capacity;
        self
    }

    /// Set the shared update queue capacity
    pub fn with_update_channel_capacity(mut self, capacity: usize) -> Self {
        self.update_channel_capacity = capacity;
        self
    }

    /// Set the rule broadcast capacity
    pub fn with_rule_broadcast_capacity(mut self, capacity: usize) -> Self {
        self.rule_broadcast_capacity = capacity;
        self
    }

    /// Set the logging configuration
    pub fn with_log(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }

    /// Record log options derived from this configuration
    pub fn record_log_config(&self) -> RecordLogConfig {
        RecordLogConfig {
            base_dir: self.data_dir.clone(),
            sync_on_write: self.sync_writes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_capacities() {
        let config = ServiceConfig::default();
        assert_eq!(config.handler_channel_capacity, 64);
        assert_eq!(config.rule_update_capacity, 10);
        assert_eq!(config.update_channel_capacity, 100);
        assert!(config.sync_writes);
    }

    #[test]
    fn test_builders() {
        let config = ServiceConfig::with_data_dir("/tmp/adlab")
            .with_sync_writes(false)
            .with_rule_update_capacity(2)
            .with_log(LogConfig::testing());

        assert_eq!(config.data_dir, PathBuf::from("/tmp/adlab"));
        assert_eq!(config.rule_update_capacity, 2);
        assert_eq!(config.log.level, "warn");

        let storage = config.record_log_config();
        assert_eq!(storage.base_dir, PathBuf::from("/tmp/adlab"));
        assert!(!storage.sync_on_write);
    }

    #[test]
    fn test_from_toml() {
        let config = ServiceConfig::from_toml(
            r#"
            data_dir = "/var/lib/adlab"
            update_channel_capacity = 500

            [log]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/var/lib/adlab"));
        assert_eq!(config.update_channel_capacity, 500);
        assert_eq!(config.rule_update_capacity, 10);
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    fn test_invalid_toml() {
        let err = ServiceConfig::from_toml("data_dir = [").unwrap_err();
        assert!(matches!(err, ServiceError::Config(_)));
    }
}
