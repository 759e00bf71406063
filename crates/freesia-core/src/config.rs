//! Bus configuration.
//!
//! Every field has a default, so an empty document is a valid configuration:
//!
//! ```toml
//! [workers]
//! threads = 4
//! thread_name = "freesia-worker"
//! stack_size = 2097152
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration for an [`EventBus`](crate::EventBus).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub workers: WorkerConfig,
}

/// Worker pool used for asynchronous handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Maximum number of async handlers running at once.
    pub threads: usize,
    pub thread_name: String,
    /// Stack size in bytes; the runtime default when unset.
    pub stack_size: Option<usize>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            threads: num_cpus::get().max(1),
            thread_name: "freesia-worker".to_string(),
            stack_size: None,
        }
    }
}

impl BusConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers.threads == 0 {
            return Err(ConfigError::Invalid(
                "workers.threads must be at least 1".to_string(),
            ));
        }
        if self.workers.thread_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "workers.thread_name must not be empty".to_string(),
            ));
        }
        if self.workers.stack_size == Some(0) {
            return Err(ConfigError::Invalid(
                "workers.stack_size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.workers.threads = threads;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = BusConfig::from_toml_str("").unwrap();
        assert_eq!(config, BusConfig::default());
        assert!(config.workers.threads >= 1);
        assert_eq!(config.workers.thread_name, "freesia-worker");
        assert_eq!(config.workers.stack_size, None);
    }

    #[test]
    fn test_partial_worker_section() {
        let config = BusConfig::from_toml_str("[workers]\nthreads = 3\n").unwrap();
        assert_eq!(config.workers.threads, 3);
        assert_eq!(config.workers.thread_name, "freesia-worker");
    }

    #[test]
    fn test_zero_threads_is_invalid() {
        let err = BusConfig::from_toml_str("[workers]\nthreads = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_malformed_document() {
        let err = BusConfig::from_toml_str("[workers\nthreads = 3").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[workers]\nthreads = 2\nthread_name = \"bus\"\nstack_size = 65536").unwrap();

        let config = BusConfig::from_file(file.path()).unwrap();
        assert_eq!(config.workers.threads, 2);
        assert_eq!(config.workers.thread_name, "bus");
        assert_eq!(config.workers.stack_size, Some(65536));
    }

    #[test]
    fn test_missing_file() {
        let err = BusConfig::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
