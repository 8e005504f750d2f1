//! Graph database configuration
//!
//! Every field has a default, so an empty YAML document is a valid config.

use crate::persistence::{BackoffPolicy, CheckpointOptions, JournalOptions};
use crate::query::{ExecutorOptions, DEFAULT_MAX_JOIN_DEPTH};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Graph database configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Store path under which journal streams live
    pub journal_root: String,
    /// Primary transaction stream
    pub journal_stream: String,
    /// Optional secondary stream receiving the same records
    pub trace_stream: Option<String>,
    pub checkpoint_path: String,
    /// Checkpoint automatically after this many Action records
    pub checkpoint_interval: Option<u64>,
    /// Delete journal segments covered by a new checkpoint
    pub truncate_journal_on_checkpoint: bool,
    pub lease_duration_ms: u64,
    /// How long to keep retrying a contended lease
    pub lease_wait_ms: u64,
    pub backoff_min_ms: u64,
    pub backoff_max_ms: u64,
    pub max_join_depth: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            journal_root: "journal".to_string(),
            journal_stream: "transaction".to_string(),
            trace_stream: None,
            checkpoint_path: "checkpoint/graph.ckpt".to_string(),
            checkpoint_interval: None,
            truncate_journal_on_checkpoint: true,
            lease_duration_ms: 30_000,
            lease_wait_ms: 5_000,
            backoff_min_ms: 10,
            backoff_max_ms: 100,
            max_join_depth: DEFAULT_MAX_JOIN_DEPTH,
        }
    }
}

impl GraphConfig {
    pub fn from_yaml_str(text: &str) -> ConfigResult<Self> {
        let config: GraphConfig = if text.trim().is_empty() {
            GraphConfig::default()
        } else {
            serde_yaml::from_str(text)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.journal_stream.trim().is_empty() {
            return Err(ConfigError::Invalid("journal_stream must not be empty".to_string()));
        }
        if self.trace_stream.as_deref().is_some_and(|t| t.eq_ignore_ascii_case(&self.journal_stream)) {
            return Err(ConfigError::Invalid("trace_stream must differ from journal_stream".to_string()));
        }
        if self.checkpoint_path.trim().is_empty() {
            return Err(ConfigError::Invalid("checkpoint_path must not be empty".to_string()));
        }
        if self.backoff_min_ms > self.backoff_max_ms {
            return Err(ConfigError::Invalid("backoff_min_ms exceeds backoff_max_ms".to_string()));
        }
        if self.checkpoint_interval == Some(0) {
            return Err(ConfigError::Invalid("checkpoint_interval must be positive".to_string()));
        }
        Ok(())
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            wait: Duration::from_millis(self.lease_wait_ms),
            min_delay: Duration::from_millis(self.backoff_min_ms),
            max_delay: Duration::from_millis(self.backoff_max_ms),
        }
    }

    pub fn journal_options(&self) -> JournalOptions {
        JournalOptions {
            root: self.journal_root.clone(),
            stream: self.journal_stream.clone(),
            trace_stream: self.trace_stream.clone(),
            backoff: self.backoff(),
        }
    }

    pub fn checkpoint_options(&self) -> CheckpointOptions {
        CheckpointOptions {
            path: self.checkpoint_path.clone(),
            lease_duration: Duration::from_millis(self.lease_duration_ms),
            backoff: self.backoff(),
        }
    }

    pub fn executor_options(&self) -> ExecutorOptions {
        ExecutorOptions {
            max_join_depth: self.max_join_depth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GraphConfig::default();
        assert_eq!(config.journal_stream, "transaction");
        assert_eq!(config.max_join_depth, 8);
        assert!(config.truncate_journal_on_checkpoint);
        assert!(config.validate().is_ok());
        assert_eq!(GraphConfig::from_yaml_str("").unwrap(), config);
    }

    #[test]
    fn test_partial_yaml() {
        let config = GraphConfig::from_yaml_str("trace_stream: audit\ncheckpoint_interval: 100\n").unwrap();
        assert_eq!(config.trace_stream.as_deref(), Some("audit"));
        assert_eq!(config.checkpoint_interval, Some(100));
        assert_eq!(config.journal_root, "journal");
    }

    #[test]
    fn test_invalid_configs() {
        assert!(GraphConfig::from_yaml_str("backoff_min_ms: 500\nbackoff_max_ms: 10\n").is_err());
        assert!(GraphConfig::from_yaml_str("trace_stream: transaction\n").is_err());
        assert!(GraphConfig::from_yaml_str("checkpoint_interval: 0\n").is_err());
        assert!(matches!(
            GraphConfig::from_yaml_str("max_join_depth: [1]\n"),
            Err(ConfigError::Yaml(_))
        ));
    }
}
