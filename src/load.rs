//! The loader: optional clear, then per-batch inserts with bounded retry.
//!
//! Each batch moves through [`BatchState`]s:
//!
//! ```text
//! Pending -> attempt -> Succeeded
//!                    -> Retrying -> attempt ...
//!                    -> Failed
//! ```
//!
//! A batch is never split. Acknowledging fewer rows than were sent counts as
//! a failed attempt. A batch that exhausts its attempts is recorded and the
//! loader moves on; only a failed clear aborts the load.

use crate::batch::Batch;
use crate::error::EtlError;
use crate::retry::RetryPolicy;
use crate::store::{Row, StoreError, StoreErrorKind, TableStore};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoaderConfig {
    pub retry: RetryPolicy,
    pub clear_first: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            clear_first: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Pending,
    Retrying { attempt: u32 },
    Succeeded,
    Failed,
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("PENDING"),
            Self::Retrying { attempt } => write!(f, "RETRYING({attempt})"),
            Self::Succeeded => f.write_str("SUCCEEDED"),
            Self::Failed => f.write_str("FAILED"),
        }
    }
}

/// Result of loading one batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoadOutcome {
    Succeeded {
        batch: usize,
        inserted: usize,
        attempts: u32,
    },
    Failed {
        batch: usize,
        attempts: u32,
        error: String,
        /// The rows that were not persisted.
        #[serde(skip)]
        rows: Vec<Row>,
    },
}

impl LoadOutcome {
    #[must_use]
    pub const fn batch(&self) -> usize {
        match self {
            Self::Succeeded { batch, .. } | Self::Failed { batch, .. } => *batch,
        }
    }

    #[must_use]
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Succeeded { attempts, .. } | Self::Failed { attempts, .. } => *attempts,
        }
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadReport {
    pub rows_attempted: usize,
    pub rows_succeeded: usize,
    pub rows_failed: usize,
    pub failed_batches: Vec<usize>,
    pub outcomes: Vec<LoadOutcome>,
}

impl LoadReport {
    #[must_use]
    pub fn batches_attempted(&self) -> usize {
        self.outcomes.len()
    }

    #[must_use]
    pub fn batches_succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.rows_failed == 0
    }
}

pub struct Loader<'s> {
    store: &'s dyn TableStore,
    config: LoaderConfig,
}

impl<'s> Loader<'s> {
    pub fn new(store: &'s dyn TableStore, config: LoaderConfig) -> Self {
        Self { store, config }
    }

    #[must_use]
    pub const fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Load `batches` into `target` in order.
    ///
    /// # Errors
    /// Returns [`EtlError::ClearFailed`] when `clear_first` is set and the
    /// delete-all fails. No batch is inserted in that case.
    pub fn load<'r, I>(&self, batches: I, target: &str) -> Result<LoadReport, EtlError>
    where
        I: IntoIterator<Item = Batch<'r, Row>>,
    {
        if self.config.clear_first {
            if let Err(source) = self.store.delete_all(target) {
                tracing::error!(table = target, error = %source, "clear failed, aborting load");
                return Err(EtlError::ClearFailed {
                    table: target.to_string(),
                    source,
                });
            }
            tracing::info!(table = target, "cleared target table");
        }

        let mut report = LoadReport::default();
        for batch in batches {
            let outcome = self.load_batch(&batch, target);
            report.rows_attempted += batch.len();
            match &outcome {
                LoadOutcome::Succeeded { inserted, .. } => report.rows_succeeded += inserted,
                LoadOutcome::Failed { batch: index, rows, .. } => {
                    report.rows_failed += rows.len();
                    report.failed_batches.push(*index);
                }
            }
            report.outcomes.push(outcome);
        }

        tracing::info!(
            table = target,
            batches = report.batches_attempted(),
            rows_attempted = report.rows_attempted,
            rows_succeeded = report.rows_succeeded,
            rows_failed = report.rows_failed,
            "load finished"
        );
        Ok(report)
    }

    fn load_batch(&self, batch: &Batch<'_, Row>, target: &str) -> LoadOutcome {
        let index = batch.index;
        let expected = batch.len();
        tracing::debug!(batch = index, rows = expected, state = %BatchState::Pending, "batch queued");

        let attempted = self.config.retry.attempt("insert_batch", |attempt| {
            if attempt > 1 {
                let state = BatchState::Retrying { attempt };
                tracing::debug!(batch = index, state = %state, "retrying batch");
            }
            let accepted = self.store.insert_batch(target, batch.records)?;
            if accepted == expected {
                Ok(accepted)
            } else {
                Err(StoreError::new(
                    StoreErrorKind::PartialAccept,
                    format!("store acknowledged {accepted} of {expected} rows"),
                ))
            }
        });

        match attempted.result {
            Ok(inserted) => {
                tracing::debug!(
                    batch = index,
                    attempts = attempted.attempts,
                    state = %BatchState::Succeeded,
                    "batch inserted"
                );
                LoadOutcome::Succeeded {
                    batch: index,
                    inserted,
                    attempts: attempted.attempts,
                }
            }
            Err(err) => {
                tracing::error!(
                    batch = index,
                    attempts = attempted.attempts,
                    state = %BatchState::Failed,
                    error = %err,
                    "batch failed"
                );
                LoadOutcome::Failed {
                    batch: index,
                    attempts: attempted.attempts,
                    error: err.to_string(),
                    rows: batch.records.to_vec(),
                }
            }
        }
    }
}
