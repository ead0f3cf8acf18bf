//! Logging configuration, loadable as the `[log]` table of a service config

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How events are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line
    #[default]
    Json,
    /// Human-readable multi-line output
    Pretty,
}

/// When the log file rolls over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rotation {
    #[default]
    Daily,
    Hourly,
    /// One file, truncated at startup
    Never,
}

/// JSON lines written under `dir`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileOutput {
    pub dir: PathBuf,
    pub prefix: String,
    pub rotation: Rotation,
    /// Rotated files kept; all of them if unset
    pub keep: Option<usize>,
}

impl Default for FileOutput {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./logs"),
            prefix: "adlab".to_string(),
            rotation: Rotation::Daily,
            keep: Some(7),
        }
    }
}

impl FileOutput {
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }
}

/// Where adlab's tracing events go and how much of them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Level for every target without an override; `RUST_LOG` replaces the whole filter
    pub level: String,
    /// Per-target levels, e.g. `adlab_storage = "trace"`
    pub targets: BTreeMap<String, String>,
    /// Write events to stderr
    pub stderr: bool,
    pub format: LogFormat,
    /// ANSI colours in pretty output
    pub color: bool,
    pub file: Option<FileOutput>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            targets: BTreeMap::new(),
            stderr: true,
            format: LogFormat::Json,
            color: false,
            file: None,
        }
    }
}

impl LogConfig {
    /// Pretty debug output for working on adlab itself
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            format: LogFormat::Pretty,
            color: true,
            ..Default::default()
        }
    }

    /// Quiet pretty output for the operator tool; warnings and errors only
    pub fn operator() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Pretty,
            color: true,
            ..Default::default()
        }
    }

    /// JSON lines to rotating files under `log_dir`, nothing on stderr
    pub fn service(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            stderr: false,
            file: Some(FileOutput::in_dir(log_dir)),
            ..Default::default()
        }
    }

    pub fn testing() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Pretty,
            ..Default::default()
        }
    }

    /// Override the level of one target
    pub fn with_target(mut self, target: impl Into<String>, level: impl Into<String>) -> Self {
        self.targets.insert(target.into(), level.into());
        self
    }

    /// `EnvFilter` directive string for this configuration
    pub fn filter(&self) -> String {
        let mut directives = vec![self.level.clone()];
        directives.extend(
            self.targets
                .iter()
                .map(|(target, level)| format!("{target}={level}")),
        );
        directives.join(",")
    }
}
