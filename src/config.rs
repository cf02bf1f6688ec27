//! Typed configuration for a sports-day runtime, loaded from JSON.
//!
//! Every field has a default, so an empty object (`{}`) is a valid config
//! that runs fully in memory.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{
    core::store::EntityStore,
    persist::{DocumentSink, sqlite::SqliteDocumentSink},
    runtime::handle::{RuntimeConfig, RuntimeError, SportsDayHandle, spawn_sportsday},
    stopwatch::{Stopwatch, StopwatchConfig},
};

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// Underlying I/O failure.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse JSON content.
    #[error("failed to parse config JSON: {source}")]
    Json {
        /// Parser error with line and column.
        #[from]
        source: serde_json::Error,
    },

    /// Parsed, but a value is out of range.
    #[error("invalid config: {reason}")]
    Invalid {
        /// Which value, and what it must be.
        reason: String,
    },
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SportsDayConfig {
    /// Store task and write-back tuning.
    pub runtime: RuntimeConfig,

    /// Stopwatch display sampling.
    pub stopwatch: StopwatchConfig,

    /// SQLite database location; in-memory only when absent.
    pub database_path: Option<PathBuf>,
}

impl SportsDayConfig {
    /// Load configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Json`] if it is not valid JSON, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Json`] or [`ConfigError::Invalid`].
    pub fn parse(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects zero queue bounds, batch sizes and sampling intervals.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bounds = [
            ("runtime.command_queue_bound", self.runtime.command_queue_bound),
            ("runtime.event_queue_bound", self.runtime.event_queue_bound),
            ("runtime.write_back_queue_bound", self.runtime.write_back_queue_bound),
            ("runtime.write_back_batch_max", self.runtime.write_back_batch_max),
        ];
        if let Some((name, _)) = bounds.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid {
                reason: format!("{name} must be greater than zero"),
            });
        }
        if self.stopwatch.sample_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                reason: "stopwatch.sample_interval_ms must be greater than zero".to_owned(),
            });
        }
        Ok(())
    }

    /// Opens the database (if configured), loads the store from it and
    /// starts the store task. Must be called inside a tokio runtime.
    ///
    /// Stored documents that break a store invariant fail the launch with
    /// [`crate::persist::PersistError::Inconsistent`].
    pub fn launch(&self) -> Result<SportsDayHandle, RuntimeError> {
        let (store, sink) = match &self.database_path {
            Some(path) => {
                let sink = SqliteDocumentSink::open(path)?;
                let store = sink.load_store()?;
                tracing::info!(path = %path.display(), "database opened");
                (store, Some(Box::new(sink) as Box<dyn DocumentSink>))
            }
            None => (EntityStore::new(), None),
        };
        Ok(spawn_sportsday(store, sink, self.runtime.clone()))
    }

    /// A stopwatch using the configured sampling interval.
    pub fn stopwatch(&self) -> Stopwatch {
        Stopwatch::new(self.stopwatch.clone())
    }
}
