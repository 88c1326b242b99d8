use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{DataError, Result};
use crate::pipeline::DEFAULT_BATCH_SIZE;
use crate::retry::{RetryPolicy, DEFAULT_DELAY, DEFAULT_MAX_ATTEMPTS};

/// Pipeline settings, usually read from `~/.dbpipe/config.toml`.
///
/// ```toml
/// database_url = "sqlite://users.db"
/// batch_size = 50
///
/// [retry]
/// max_attempts = 3
/// delay_ms = 2000
/// backoff = 1.0
/// max_delay_ms = 10000
/// ```
///
/// Every field is optional; missing ones take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub database_url: Option<String>,
    pub batch_size: usize,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub delay_ms: u64,
    /// Delay multiplier applied after each failed attempt
    pub backoff: f64,
    pub max_delay_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            batch_size: DEFAULT_BATCH_SIZE,
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay_ms: DEFAULT_DELAY.as_millis() as u64,
            backoff: 1.0,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.delay_ms))
            .with_backoff(self.backoff, Duration::from_millis(self.max_delay_ms))
    }
}

impl PipelineConfig {
    /// `~/.dbpipe/config.toml`, if a home directory can be found
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".dbpipe").join("config.toml"))
    }

    /// Load and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            DataError::config(format!("failed to read config file {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            DataError::Config { reason } => {
                DataError::config(format!("{}: {reason}", path.display()))
            }
            other => other,
        })
    }

    /// Load `path` when given, otherwise the default path if that file
    /// exists, otherwise the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(default) if default.exists() => Self::load(default),
            _ => Ok(Self::default()),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| DataError::config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.batch_size == 0 {
            problems.push("batch_size must be at least 1".to_string());
        }
        if self.retry.max_attempts == 0 {
            problems.push("retry.max_attempts must be at least 1".to_string());
        }
        if !self.retry.backoff.is_finite() || self.retry.backoff < 1.0 {
            problems.push(format!(
                "retry.backoff must be a number >= 1.0, got {}",
                self.retry.backoff
            ));
        }
        if self.retry.max_delay_ms < self.retry.delay_ms {
            problems.push("retry.max_delay_ms must not be smaller than retry.delay_ms".to_string());
        }
        if let Some(url) = &self.database_url {
            if url.trim().is_empty() {
                problems.push("database_url must not be empty".to_string());
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(DataError::config(problems.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::io::Write;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(
            config.retry.policy(),
            RetryPolicy::default().with_backoff(1.0, Duration::from_secs(10))
        );
    }

    #[test]
    fn test_partial_sections() {
        let config = PipelineConfig::from_toml_str(
            r#"
            database_url = "sqlite://users.db"

            [retry]
            delay_ms = 2000
            "#,
        )
        .unwrap();

        assert_eq!(config.database_url.as_deref(), Some("sqlite://users.db"));
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.policy().delay(), Duration::from_secs(2));
    }

    #[test]
    fn test_validation_collects_problems() {
        let err = PipelineConfig::from_toml_str(
            "batch_size = 0\n[retry]\nmax_attempts = 0\nbackoff = 0.5\n",
        )
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Config);
        let message = err.to_string();
        assert!(message.contains("batch_size"));
        assert!(message.contains("max_attempts"));
        assert!(message.contains("backoff"));
    }

    #[test]
    fn test_malformed_toml() {
        let err = PipelineConfig::from_toml_str("batch_size = \"lots\"").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "batch_size = 7").unwrap();

        let config = PipelineConfig::load_or_default(Some(file.path())).unwrap();
        assert_eq!(config.batch_size, 7);

        let missing = PipelineConfig::load("/nonexistent/dbpipe.toml").unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::Config);
    }
}
