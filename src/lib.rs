//! # ironload
//!
//! A **batch transform-and-load engine**. Raw records from a source are
//! cleaned into typed rows, enriched with derived features and category
//! labels, staged, loaded into a remote table in retried batches and finally
//! checked against a read-back of the table.
//!
//! ## Key Features
//!
//! - **Typed schema** - columns are declared once and resolved to indices before a run
//! - **Per-column cleaning policies** - drop, median fill, forward fill, constant or keep null
//! - **Declared derivations** - side-table left joins and pure formulas in dependency order
//! - **Classification** - static cut points or per-run percentile bands
//! - **Idempotent loads** - optional clear-first, batches with bounded retry and backoff
//! - **Validation** - row-count parity, not-null and domain assertions
//! - **Post-load analysis** - per-domain summary figures from the read-back
//! - **Staged artifact** - CSV (optionally gzip) with a strict column-set check
//! - **Domain presets** - logistics deliveries, telco churn and urban air quality
//!
//! ## Quick Start
//!
//! ```ignore
//! use ironload::domains::air_quality::{self, RiskBanding};
//! use ironload::{EtlPipeline, MemoryTableStore, PipelineConfig, RecordSource};
//! # use anyhow::Result;
//!
//! # fn main() -> Result<()> {
//! let store = MemoryTableStore::new();
//! store.create_table(air_quality::TARGET_TABLE);
//! let pipeline = EtlPipeline::new(
//!     air_quality::definition(RiskBanding::Fixed)?,
//!     PipelineConfig::default(),
//!     store.clone(),
//! )?;
//!
//! let sources: Vec<Box<dyn RecordSource>> =
//!     vec![Box::new(air_quality::hourly_source("data/air_quality/delhi.json"))];
//! let report = pipeline.run(&sources)?;
//! assert!(report.validation.passed());
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! A [`RawRecord`] is what a source delivered, field by field. The
//! [`Cleaner`] turns raw records into [`CleanRecord`]s laid out by a
//! [`Schema`]; the [`FeatureDeriver`] and [`Classifier`]s turn those into
//! [`EnrichedRecord`]s. Rows the cleaner rejects are never repaired: each one
//! is listed in a [`DropLog`] with its reason.
//!
//! ### Loading
//!
//! [`batches`] splits the enriched rows into contiguous chunks. The
//! [`Loader`] clears the target table (when `clear_first` is set) and inserts
//! each batch under a [`RetryPolicy`]. A batch that exhausts its attempts is
//! reported and skipped; only a failed clear aborts the run.
//!
//! After the load the table is read back once. The [`Validator`] checks it
//! against the staged rows and, when the definition carries an [`Analyzer`],
//! the same rows feed an [`Analysis`] attached to the [`RunReport`].
//!
//! ### Stores and sources
//!
//! [`TableStore`] and [`RecordSource`] are the two outside boundaries.
//! [`MemoryTableStore`] is an in-process store with fault injection for
//! tests. File sources cover JSON arrays, CSV exports and hourly series.
//!
//! ## Logging
//!
//! The crate emits [`tracing`] events and installs no subscriber.

pub mod analysis;
pub mod batch;
pub mod classify;
pub mod clean;
pub mod config;
pub mod derive;
pub mod domains;
pub mod error;
pub mod load;
pub mod pipeline;
pub mod record;
pub mod report;
pub mod retry;
pub mod schema;
pub mod source;
pub mod staging;
pub mod store;
pub mod validate;
pub mod value;

pub use analysis::{AirQualityAnalysis, Analysis, Analyzer, ChurnAnalysis};
pub use batch::{batches, Batch, Batches};
pub use classify::{percentile, Banding, Classifier, CutPoints, FittedBands, PercentileBands};
pub use clean::{CleanOutput, Cleaner, ColumnPolicy, DropLog, DropReason, OnInvalid, OnMissing, RowDrop};
pub use config::{ConfigError, PipelineConfig};
pub use derive::{ExactLookup, FeatureDeriver, Formula, IntoFormula, Lookup, ProximityLookup, SideJoin};
pub use error::{EtlError, Result};
pub use load::{BatchState, LoadOutcome, LoadReport, Loader, LoaderConfig};
pub use pipeline::{EtlPipeline, PipelineDefinition, Transformed};
pub use record::{CleanRecord, EnrichedRecord, RawRecord, Record};
pub use report::RunReport;
pub use retry::{Attempted, Backoff, RetryPolicy, Transient};
pub use schema::{ColumnDef, ColumnId, ColumnKind, ColumnOrigin, Schema, SchemaError};
pub use source::{
    extract, CsvSource, Extraction, GlobSource, HourlySeriesSource, JsonArraySource, RecordSource,
    SourceError, StaticSource, UnitOutcome,
};
pub use staging::{read_staged, write_staged, StagingError};
pub use store::{MemoryTableStore, Row, StoreError, StoreErrorKind, TableStore};
pub use validate::{Assertion, Check, ValidationReport, Validator};
pub use value::{Parsed, RawValue, Value};
