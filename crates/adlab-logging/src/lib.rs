//! Logging setup for adlab
//!
//! Every adlab crate logs through `tracing`; this crate installs the global
//! subscriber deciding where those events end up. Console output goes to
//! stderr so the operator tool's stdout stays clean, and file output is
//! always JSON lines.
//!
//! ```ignore
//! use adlab_logging::{AdlabSubscriberBuilder, LogConfig};
//!
//! let _guard = AdlabSubscriberBuilder::new()
//!     .with_config(LogConfig::service("/var/log/adlab"))
//!     .with_target("adlab_service", "debug")
//!     .init();
//! ```

pub mod config;

pub use config::{FileOutput, LogConfig, LogFormat, Rotation};

use std::fs::{self, File};

use thiserror::Error;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{self, RollingFileAppender};
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

type Subscriber = Layered<EnvFilter, Registry>;
type BoxedLayer = Box<dyn Layer<Subscriber> + Send + Sync>;

/// Errors from subscriber initialization
#[derive(Debug, Error)]
pub enum LogError {
    /// The log directory or file could not be created
    #[error("Log file error: {0}")]
    File(String),

    /// A global subscriber is already installed
    #[error("Subscriber already initialized: {0}")]
    AlreadyInitialized(String),
}

/// Builds and installs the adlab subscriber
#[derive(Debug, Default)]
pub struct AdlabSubscriberBuilder {
    config: LogConfig,
}

impl AdlabSubscriberBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.level = level.into();
        self
    }

    pub fn with_target(mut self, target: impl Into<String>, level: impl Into<String>) -> Self {
        self.config = self.config.with_target(target, level);
        self
    }

    pub fn with_file(mut self, file: FileOutput) -> Self {
        self.config.file = Some(file);
        self
    }

    /// Install the subscriber, reporting failures on stderr
    ///
    /// Keep the returned guard alive until exit or buffered file output is lost.
    pub fn init(self) -> Option<WorkerGuard> {
        self.try_init().unwrap_or_else(|e| {
            eprintln!("Warning: failed to initialize logging: {e}");
            None
        })
    }

    /// Install the subscriber
    pub fn try_init(self) -> Result<Option<WorkerGuard>, LogError> {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.config.filter()));

        let mut layers: Vec<BoxedLayer> = Vec::new();
        if self.config.stderr {
            layers.push(stderr_layer(&self.config));
        }

        let guard = match &self.config.file {
            Some(file) => {
                let (writer, guard) = file_writer(file)?;
                layers.push(json_layer(writer));
                Some(guard)
            }
            None => None,
        };

        Registry::default()
            .with(filter)
            .with(layers)
            .try_init()
            .map_err(|e| LogError::AlreadyInitialized(e.to_string()))?;

        Ok(guard)
    }
}

fn stderr_layer(config: &LogConfig) -> BoxedLayer {
    match config.format {
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .with_ansi(config.color)
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Json => json_layer(std::io::stderr),
    }
}

fn json_layer<W>(writer: W) -> BoxedLayer
where
    W: for<'w> tracing_subscriber::fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(writer)
        .boxed()
}

/// Non-blocking writer for `file`; `Rotation::Never` truncates a single file
fn file_writer(file: &FileOutput) -> Result<(NonBlocking, WorkerGuard), LogError> {
    fs::create_dir_all(&file.dir).map_err(|e| LogError::File(e.to_string()))?;

    let rotation = match file.rotation {
        Rotation::Daily => rolling::Rotation::DAILY,
        Rotation::Hourly => rolling::Rotation::HOURLY,
        Rotation::Never => {
            let path = file.dir.join(format!("{}.log", file.prefix));
            let single = File::create(&path).map_err(|e| LogError::File(e.to_string()))?;
            return Ok(tracing_appender::non_blocking(single));
        }
    };

    let mut builder = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(file.prefix.clone())
        .filename_suffix("log");
    if let Some(keep) = file.keep {
        builder = builder.max_log_files(keep);
    }
    let appender = builder
        .build(&file.dir)
        .map_err(|e| LogError::File(e.to_string()))?;

    Ok(tracing_appender::non_blocking(appender))
}

/// Install [`LogConfig::testing`]; later calls are no-ops
pub fn init_testing() {
    let _ = AdlabSubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_builder_overrides() {
        let builder = AdlabSubscriberBuilder::new()
            .with_config(LogConfig::operator())
            .with_level("trace")
            .with_target("adlab_storage", "info")
            .with_file(FileOutput::in_dir("/tmp/adlab-logs"));

        assert_eq!(builder.config.filter(), "trace,adlab_storage=info");
        assert_eq!(builder.config.format, LogFormat::Pretty);
        assert!(builder.config.file.is_some());
    }

    #[test]
    fn test_single_file_without_rotation() {
        let temp = TempDir::new().unwrap();
        let file = FileOutput {
            dir: temp.path().join("logs"),
            prefix: "run".to_string(),
            rotation: Rotation::Never,
            keep: None,
        };

        let (_writer, _guard) = file_writer(&file).unwrap();
        assert!(temp.path().join("logs").join("run.log").exists());
    }

    #[test]
    fn test_init_testing_is_repeatable() {
        init_testing();
        init_testing();
        tracing::warn!("second init did not panic");
    }
}
