//! Process-wide cache of open record logs
//!
//! A [`StoreRegistry`] is created once at service start and handed to every
//! component that needs a [`RecordLog`]. It guarantees a single open handle
//! per store name for as long as the registry lives.

use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::error::StorageError;
use crate::record_log::{RecordLog, RecordLogConfig};

/// Registry of open record logs keyed by store name
#[derive(Debug)]
pub struct StoreRegistry {
    config: RecordLogConfig,
    logs: DashMap<String, Arc<RecordLog>>,
    /// Serialises opens so two callers never open the same name twice
    open_lock: Mutex<()>,
}

impl StoreRegistry {
    pub fn new(config: RecordLogConfig) -> Self {
        Self {
            config,
            logs: DashMap::new(),
            open_lock: Mutex::new(()),
        }
    }

    /// Configuration used for every log opened through this registry
    pub fn config(&self) -> &RecordLogConfig {
        &self.config
    }

    /// Directory holding every store
    pub fn base_dir(&self) -> &Path {
        &self.config.base_dir
    }

    /// An already-open log, if any
    pub fn get(&self, name: &str) -> Option<Arc<RecordLog>> {
        self.logs.get(name).map(|log| log.clone())
    }

    /// Get the open log for `name`, opening (and creating) it on first use
    #[instrument(skip(self))]
    pub async fn get_or_open(&self, name: &str) -> Result<Arc<RecordLog>, StorageError> {
        if let Some(log) = self.get(name) {
            return Ok(log);
        }

        let _guard = self.open_lock.lock().await;
        // Another caller may have opened it while we waited
        if let Some(log) = self.get(name) {
            return Ok(log);
        }

        let log = Arc::new(RecordLog::open(name, self.config.clone()).await?);
        self.logs.insert(name.to_string(), log.clone());
        debug!(store = name, last_index = log.last_index(), "Registered record log");
        Ok(log)
    }

    /// Number of open logs
    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }

    /// Names of every open log
    pub fn names(&self) -> Vec<String> {
        self.logs.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Sync and close every open log
    pub async fn close_all(&self) -> Result<(), StorageError> {
        let logs: Vec<Arc<RecordLog>> = self.logs.iter().map(|e| e.value().clone()).collect();
        for log in &logs {
            log.close().await?;
        }
        self.logs.clear();
        info!(count = logs.len(), "Closed all record logs");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_registry() -> (StoreRegistry, TempDir) {
        let temp = TempDir::new().unwrap();
        let registry = StoreRegistry::new(RecordLogConfig::with_base_dir(temp.path()));
        (registry, temp)
    }

    #[tokio::test]
    async fn test_single_handle_per_name() {
        let (registry, _temp) = create_test_registry();

        let first = registry.get_or_open("tls-incoming").await.unwrap();
        let second = registry.get_or_open("tls-incoming").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);

        first.add(b"hello").await.unwrap();
        assert_eq!(second.last_index(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_opens_share_handle() {
        let (registry, _temp) = create_test_registry();
        let registry = Arc::new(registry);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.get_or_open("shared").await.unwrap()
            }));
        }

        let mut logs = Vec::new();
        for handle in handles {
            logs.push(handle.await.unwrap());
        }
        assert!(logs.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_close_all() {
        let (registry, _temp) = create_test_registry();
        registry.get_or_open("a").await.unwrap();
        registry.get_or_open("b").await.unwrap();

        let mut names = registry.names();
        names.sort();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);

        registry.close_all().await.unwrap();
        assert!(registry.is_empty());
        assert!(registry.get("a").is_none());
    }
}
