//! Stage wiring: extract, clean, derive, classify, stage, load, validate.
//!
//! A [`PipelineDefinition`] holds the per-domain pieces and is checked once
//! at construction. An [`EtlPipeline`] binds a definition to a
//! [`PipelineConfig`] and a [`TableStore`] and runs it:
//!
//! ```text
//! sources -> extract -> Cleaner -> FeatureDeriver -> Classifier* -> staged
//!         -> batches -> Loader -> store -> read-back -> Validator -> RunReport
//!                                              \-> Analyzer?
//! ```
//!
//! A run always ends with a [`RunReport`] unless the pre-load clear fails or
//! the staged artifact cannot be written.

use crate::analysis::{Analysis, Analyzer};
use crate::batch::batches;
use crate::classify::{Classifier, FittedBands};
use crate::clean::{Cleaner, DropLog};
use crate::config::PipelineConfig;
use crate::derive::FeatureDeriver;
use crate::error::Result;
use crate::load::{LoadReport, Loader};
use crate::record::{EnrichedRecord, RawRecord};
use crate::report::RunReport;
use crate::schema::{ColumnId, Schema, SchemaError};
use crate::source::{extract, RecordSource, UnitOutcome};
use crate::staging::{read_staged, write_staged};
use crate::store::{Row, TableStore};
use crate::validate::{ValidationReport, Validator};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;

/// Everything a domain declares: schema, stages and target table.
#[derive(Debug, Clone)]
pub struct PipelineDefinition {
    name: String,
    target_table: String,
    schema: Arc<Schema>,
    cleaner: Cleaner,
    deriver: FeatureDeriver,
    classifiers: Vec<Classifier>,
    validator: Validator,
    analyzer: Option<Analyzer>,
}

impl PipelineDefinition {
    /// # Errors
    /// Fails when a derived column is assigned by no stage or by more than
    /// one, or a classifier reads a column no earlier stage produced.
    pub fn new(
        name: impl Into<String>,
        target_table: impl Into<String>,
        cleaner: Cleaner,
        deriver: FeatureDeriver,
        classifiers: Vec<Classifier>,
        validator: Validator,
    ) -> std::result::Result<Self, SchemaError> {
        let schema = Arc::clone(cleaner.schema());
        let mut available: HashSet<ColumnId> = schema.source_columns().map(|(id, _)| id).collect();
        available.extend(deriver.assigned().iter().copied());

        for classifier in &classifiers {
            let input = schema.def(classifier.input());
            if !available.contains(&classifier.input()) {
                return Err(SchemaError::invalid(&input.name, "classified before it is computed"));
            }
            let output = schema.def(classifier.output());
            if !available.insert(classifier.output()) {
                return Err(SchemaError::invalid(&output.name, "assigned more than once"));
            }
        }

        if let Some((_, def)) = schema.derived_columns().find(|(id, _)| !available.contains(id)) {
            return Err(SchemaError::invalid(&def.name, "derived column is never assigned"));
        }

        Ok(Self {
            name: name.into(),
            target_table: target_table.into(),
            schema,
            cleaner,
            deriver,
            classifiers,
            validator,
            analyzer: None,
        })
    }

    /// Summarize the read-back rows with `analyzer` at the end of each run.
    #[must_use]
    pub fn with_analysis(mut self, analyzer: Analyzer) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn target_table(&self) -> &str {
        &self.target_table
    }

    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    #[must_use]
    pub const fn validator(&self) -> &Validator {
        &self.validator
    }
}

/// Output of the transform stages.
#[derive(Debug, Clone)]
pub struct Transformed {
    pub records: Vec<EnrichedRecord>,
    pub drops: DropLog,
    pub normalized: Vec<String>,
    pub bands: Vec<FittedBands>,
}

pub struct EtlPipeline<S: TableStore> {
    definition: PipelineDefinition,
    config: PipelineConfig,
    store: S,
}

impl<S: TableStore> EtlPipeline<S> {
    /// # Errors
    /// Returns [`crate::EtlError::Config`] if `config` does not validate.
    pub fn new(definition: PipelineDefinition, config: PipelineConfig, store: S) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            definition,
            config,
            store,
        })
    }

    #[must_use]
    pub const fn definition(&self) -> &PipelineDefinition {
        &self.definition
    }

    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Clean, derive and classify. Deterministic for a given input.
    #[must_use]
    pub fn transform(&self, raw: &[RawRecord]) -> Transformed {
        let cleaned = self.definition.cleaner.clean(raw);
        let mut records = self.definition.deriver.derive(cleaned.records);
        let bands = self
            .definition
            .classifiers
            .iter()
            .map(|c| c.classify(&mut records))
            .collect();
        tracing::info!(
            pipeline = %self.definition.name,
            raw = raw.len(),
            enriched = records.len(),
            dropped = cleaned.drops.len(),
            "transform finished"
        );
        Transformed {
            records,
            drops: cleaned.drops,
            normalized: cleaned.normalized,
            bands,
        }
    }

    /// Batch `records` and load them into the target table.
    ///
    /// # Errors
    /// Returns [`crate::EtlError::ClearFailed`] if the pre-load clear fails.
    pub fn load(&self, records: &[EnrichedRecord]) -> Result<LoadReport> {
        let schema = &self.definition.schema;
        let rows: Vec<Row> = records.iter().map(|r| schema.to_row(r)).collect();
        Loader::new(&self.store, self.config.loader_config())
            .load(batches(&rows, self.config.batch_size)?, &self.definition.target_table)
    }

    /// Read the target table back and compare it with `staged`.
    #[must_use]
    pub fn validate(&self, staged: &[EnrichedRecord]) -> ValidationReport {
        self.read_back(staged).0
    }

    /// One read of the target table feeds both validation and analysis.
    fn read_back(&self, staged: &[EnrichedRecord]) -> (ValidationReport, Option<Analysis>) {
        match self.store.read_all(&self.definition.target_table) {
            Ok(persisted) => (
                self.definition.validator.validate(staged, &persisted),
                self.definition.analyzer.map(|analyze| analyze(&persisted)),
            ),
            Err(err) => {
                tracing::error!(table = %self.definition.target_table, error = %err, "read-back failed");
                (ValidationReport::read_back_failed(staged.len(), &err), None)
            }
        }
    }

    /// Extract from `sources`, then run every later stage.
    ///
    /// The target table must already exist in the store. With `clear_first`
    /// set, clearing a table the store does not know about fails the run; for
    /// [`crate::MemoryTableStore`] call `create_table` first.
    ///
    /// # Errors
    /// See [`EtlPipeline::run_records`].
    pub fn run(&self, sources: &[Box<dyn RecordSource>]) -> Result<RunReport> {
        let started_at = Utc::now();
        let extraction = extract(sources, &self.config.source_retry_policy());
        self.run_from(started_at, &extraction.records, extraction.units)
    }

    /// Run every stage after extraction on records already in hand.
    ///
    /// # Errors
    /// Fails if the staged artifact cannot be written or read back, or the
    /// pre-load clear fails. A target table missing from the store is a clear
    /// failure ([`crate::EtlError::ClearFailed`]) when `clear_first` is set.
    pub fn run_records(&self, raw: &[RawRecord]) -> Result<RunReport> {
        self.run_from(Utc::now(), raw, Vec::new())
    }

    fn run_from(
        &self,
        started_at: DateTime<Utc>,
        raw: &[RawRecord],
        units: Vec<UnitOutcome>,
    ) -> Result<RunReport> {
        tracing::info!(pipeline = %self.definition.name, rows = raw.len(), "run started");
        let transformed = self.transform(raw);
        let rows_cleaned = transformed.records.len();

        let staged = match &self.config.staged_path {
            Some(path) => {
                write_staged(path, &self.definition.schema, &transformed.records)?;
                read_staged(path, &self.definition.schema)?
            }
            None => transformed.records,
        };

        let load = self.load(&staged)?;
        let (validation, analysis) = self.read_back(&staged);

        let report = RunReport {
            pipeline: self.definition.name.clone(),
            target_table: self.definition.target_table.clone(),
            started_at,
            finished_at: Utc::now(),
            units,
            rows_extracted: raw.len(),
            rows_cleaned,
            rows_dropped: transformed.drops.len(),
            drops_by_reason: transformed.drops.counts_by_reason(),
            drops: transformed.drops.drops().to_vec(),
            normalized: transformed.normalized,
            rows_enriched: staged.len(),
            bands: transformed.bands,
            load,
            validation,
            analysis,
        };
        report.log_summary();
        Ok(report)
    }
}
