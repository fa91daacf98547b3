//! The run report: what each stage did, serializable to JSON.

use crate::analysis::Analysis;
use crate::classify::FittedBands;
use crate::clean::RowDrop;
use crate::load::LoadReport;
use crate::source::UnitOutcome;
use crate::validate::ValidationReport;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{create_dir_all, File};
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub pipeline: String,
    pub target_table: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub units: Vec<UnitOutcome>,
    pub rows_extracted: usize,
    pub rows_cleaned: usize,
    pub rows_dropped: usize,
    pub drops_by_reason: BTreeMap<String, usize>,
    pub drops: Vec<RowDrop>,
    /// Columns rescaled by unit normalization.
    pub normalized: Vec<String>,
    pub rows_enriched: usize,
    pub bands: Vec<FittedBands>,
    pub load: LoadReport,
    pub validation: ValidationReport,
    /// Figures computed from the read-back, for domains with an analyzer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<Analysis>,
}

impl RunReport {
    pub fn failed_units(&self) -> impl Iterator<Item = &UnitOutcome> {
        self.units.iter().filter(|u| u.error.is_some())
    }

    /// All rows persisted and every assertion held.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.load.is_complete() && self.validation.passed()
    }

    /// Elapsed wall time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Save the report as pretty JSON, creating parent directories.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created or written.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            create_dir_all(parent).with_context(|| format!("mkdir -p {}", parent.display()))?;
        }
        let json = self.to_json().context("serialize run report")?;
        let mut file = File::create(path).with_context(|| format!("create {}", path.display()))?;
        file.write_all(json.as_bytes())
            .with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    /// Emit a one-line summary per stage.
    pub fn log_summary(&self) {
        let failed_units: Vec<&str> = self.failed_units().map(|u| u.unit.as_str()).collect();
        tracing::info!(
            pipeline = %self.pipeline,
            rows = self.rows_extracted,
            units = self.units.len(),
            failed_units = ?failed_units,
            "extract"
        );
        tracing::info!(
            kept = self.rows_cleaned,
            dropped = self.rows_dropped,
            reasons = ?self.drops_by_reason,
            normalized = ?self.normalized,
            "clean"
        );
        for band in &self.bands {
            tracing::info!(column = %band.column, mode = band.mode, bounds = ?band.bounds, "classify");
        }
        tracing::info!(
            table = %self.target_table,
            batches_attempted = self.load.batches_attempted(),
            batches_succeeded = self.load.batches_succeeded(),
            failed_batches = ?self.load.failed_batches,
            rows_succeeded = self.load.rows_succeeded,
            rows_failed = self.load.rows_failed,
            "load"
        );
        if self.validation.passed() {
            tracing::info!(assertions = self.validation.assertions.len(), "validate: all passed");
        } else {
            for a in self.validation.failures() {
                tracing::warn!(check = ?a.check, column = ?a.column, detail = %a.detail, "validate");
            }
        }
        if let Some(analysis) = &self.analysis {
            analysis.log_summary();
        }
        tracing::info!(elapsed_ms = self.elapsed_ms(), succeeded = self.succeeded(), "run finished");
    }
}
