//! Run configuration, loaded from TOML or JSON.
//!
//! ```toml
//! batch_size = 200
//! max_attempts = 3
//! clear_first = true
//! source_max_attempts = 3
//! staged_path = "data/staged/deliveries.csv"
//!
//! [backoff]
//! kind = "exponential"
//! base_seconds = 1.0
//! ```
//!
//! Every key is optional; unknown keys are rejected.

use crate::load::LoaderConfig;
use crate::retry::{Backoff, RetryPolicy};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid value for `{field}`: {message}")]
    Invalid { field: &'static str, message: String },

    #[error("unsupported config format: {0}")]
    UnsupportedFormat(String),

    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub batch_size: usize,
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub clear_first: bool,
    pub source_max_attempts: u32,
    /// Where to write the staged artifact; no file is written when unset.
    pub staged_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 200,
            max_attempts: 3,
            backoff: Backoff::default(),
            clear_first: true,
            source_max_attempts: 3,
            staged_path: None,
        }
    }
}

impl PipelineConfig {
    /// # Errors
    /// Fails on malformed TOML, unknown keys or invalid values.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Fails on malformed JSON, unknown keys or invalid values.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.toml` or `.json` file.
    ///
    /// # Errors
    /// Fails if the file cannot be read, has another extension, or does not
    /// parse and validate.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Self::from_toml_str(&text),
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::from_json_str(&text),
            _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        }
    }

    /// # Errors
    /// Fails when a count is zero or the backoff base is negative or not
    /// finite.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(invalid("batch_size", "must be at least 1"));
        }
        if self.max_attempts == 0 {
            return Err(invalid("max_attempts", "must be at least 1"));
        }
        if self.source_max_attempts == 0 {
            return Err(invalid("source_max_attempts", "must be at least 1"));
        }
        let base = self.backoff.base_seconds();
        if !base.is_finite() || base < 0.0 {
            return Err(invalid(
                "backoff.base_seconds",
                format!("must be a non-negative number, got {base}"),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.backoff)
    }

    /// Extraction retries keep the `2^(attempt-1)` second schedule.
    #[must_use]
    pub const fn source_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::source_default(self.source_max_attempts)
    }

    #[must_use]
    pub const fn loader_config(&self) -> LoaderConfig {
        LoaderConfig {
            retry: self.retry_policy(),
            clear_first: self.clear_first,
        }
    }
}

fn invalid(field: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        message: message.into(),
    }
}
