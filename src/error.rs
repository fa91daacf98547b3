//! Error types for pipeline construction and runs.
//!
//! Row-level problems never surface here: the cleaner absorbs them as drop
//! reasons, failed batches land in the load report and failed assertions in
//! the validation report. An [`EtlError`] means the run could not proceed.

use crate::config::ConfigError;
use crate::schema::SchemaError;
use crate::staging::StagingError;
use crate::store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    /// A schema, policy or derivation declaration is inconsistent
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Invalid pipeline configuration
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Staged artifact could not be written or read back
    #[error("staging error: {0}")]
    Staging(#[from] StagingError),

    /// The pre-load delete-all failed; nothing was inserted
    #[error("clearing table `{table}` failed: {source}")]
    ClearFailed {
        table: String,
        #[source]
        source: StoreError,
    },

    #[error("batch size must be at least 1")]
    InvalidBatchSize,

    /// File or other I/O failure with context
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, EtlError>;
