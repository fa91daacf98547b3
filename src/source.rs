//! Raw record sources and the extraction step.
//!
//! A [`RecordSource`] is one unit of extraction: a file, an API payload or an
//! in-memory list. [`extract`] fetches every unit under a [`RetryPolicy`]; a
//! unit whose attempts run out contributes no rows and is reported as failed.

use crate::record::RawRecord;
use crate::retry::{RetryPolicy, Transient};
use crate::value::RawValue;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{unit}: {message}")]
pub struct SourceError {
    pub unit: String,
    pub message: String,
    pub transient: bool,
}

impl SourceError {
    pub fn transient(unit: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            message: message.into(),
            transient: true,
        }
    }

    pub fn permanent(unit: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            message: message.into(),
            transient: false,
        }
    }

    fn from_io(unit: &str, err: &anyhow::Error) -> Self {
        let not_found = err
            .downcast_ref::<std::io::Error>()
            .is_some_and(|e| e.kind() == std::io::ErrorKind::NotFound);
        let message = format!("{err:#}");
        if not_found {
            Self::permanent(unit, message)
        } else {
            Self::transient(unit, message)
        }
    }
}

impl Transient for SourceError {
    fn is_transient(&self) -> bool {
        self.transient
    }
}

/// One unit of raw input.
pub trait RecordSource {
    fn name(&self) -> &str;

    /// Fetch every record of this unit.
    ///
    /// # Errors
    /// Returns a [`SourceError`]; transient ones are retried by [`extract`].
    fn fetch(&self) -> Result<Vec<RawRecord>, SourceError>;
}

fn unit_name(path: &Path) -> String {
    path.display().to_string()
}

fn open(path: &Path) -> Result<BufReader<File>, SourceError> {
    File::open(path)
        .with_context(|| format!("open {}", path.display()))
        .map(BufReader::new)
        .map_err(|e| SourceError::from_io(&unit_name(path), &e))
}

/// A JSON file holding an array of objects, one record per object.
#[derive(Debug, Clone)]
pub struct JsonArraySource {
    path: PathBuf,
    name: String,
}

impl JsonArraySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: unit_name(&path),
            path,
        }
    }
}

/// Records from a JSON array of objects.
///
/// # Errors
/// Fails if `value` is not an array or holds a non-object element.
pub fn records_from_json_array(value: &serde_json::Value) -> Result<Vec<RawRecord>, String> {
    let items = value
        .as_array()
        .ok_or_else(|| "expected a JSON array of objects".to_string())?;
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            RawRecord::from_json_object(item).ok_or_else(|| format!("element {i} is not an object"))
        })
        .collect()
}

impl RecordSource for JsonArraySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self) -> Result<Vec<RawRecord>, SourceError> {
        let reader = open(&self.path)?;
        let value: serde_json::Value = serde_json::from_reader(reader)
            .map_err(|e| SourceError::permanent(&self.name, format!("parse JSON: {e}")))?;
        records_from_json_array(&value).map_err(|m| SourceError::permanent(&self.name, m))
    }
}

/// A headered CSV file. Every cell arrives as text; header names are trimmed.
#[derive(Debug, Clone)]
pub struct CsvSource {
    path: PathBuf,
    name: String,
}

impl CsvSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: unit_name(&path),
            path,
        }
    }
}

impl RecordSource for CsvSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self) -> Result<Vec<RawRecord>, SourceError> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(open(&self.path)?);
        let header: Vec<String> = rdr
            .headers()
            .map_err(|e| SourceError::permanent(&self.name, format!("read header: {e}")))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        let mut out = Vec::new();
        for (i, row) in rdr.records().enumerate() {
            let row = row.map_err(|e| {
                SourceError::permanent(&self.name, format!("parse CSV record #{}: {e}", i + 1))
            })?;
            out.push(RawRecord::new(
                header.iter().cloned().zip(row.iter().map(RawValue::from)),
            ));
        }
        Ok(out)
    }
}

#[derive(Debug, Deserialize)]
struct HourlyPayload {
    latitude: Option<f64>,
    longitude: Option<f64>,
    #[serde(default)]
    hourly: HashMap<String, Option<Vec<serde_json::Value>>>,
}

/// Flatten an hourly-series payload into one record per timestamp.
///
/// The payload looks like `{"latitude", "longitude", "hourly": {"time": [..],
/// "<metric>": [..]}}`. Each record carries `latitude`, `longitude`, `time`
/// and every metric in `metrics`. Metric arrays shorter than `time` are padded
/// with nulls, longer ones are trimmed, absent ones are all null.
///
/// # Errors
/// Fails if the payload does not have the expected shape.
pub fn flatten_hourly(payload: &serde_json::Value, metrics: &[String]) -> Result<Vec<RawRecord>, String> {
    let payload = HourlyPayload::deserialize(payload).map_err(|e| format!("hourly payload: {e}"))?;
    let times = payload.hourly.get("time").cloned().flatten().unwrap_or_default();
    let series: Vec<(&str, Vec<serde_json::Value>)> = metrics
        .iter()
        .map(|m| {
            let mut values = payload.hourly.get(m).cloned().flatten().unwrap_or_default();
            values.resize(times.len(), serde_json::Value::Null);
            (m.as_str(), values)
        })
        .collect();

    let records = times
        .iter()
        .enumerate()
        .map(|(i, time)| {
            let mut fields: Vec<(String, RawValue)> = Vec::with_capacity(metrics.len() + 3);
            fields.push(("latitude".into(), payload.latitude.into()));
            fields.push(("longitude".into(), payload.longitude.into()));
            fields.push(("time".into(), RawValue::from(time)));
            for (name, values) in &series {
                fields.push(((*name).to_string(), RawValue::from(&values[i])));
            }
            RawRecord::new(fields)
        })
        .collect();
    Ok(records)
}

/// A JSON file in the hourly-series layout, see [`flatten_hourly`].
#[derive(Debug, Clone)]
pub struct HourlySeriesSource {
    path: PathBuf,
    name: String,
    metrics: Vec<String>,
}

impl HourlySeriesSource {
    pub fn new<I, S>(path: impl Into<PathBuf>, metrics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let path = path.into();
        Self {
            name: unit_name(&path),
            path,
            metrics: metrics.into_iter().map(Into::into).collect(),
        }
    }
}

impl RecordSource for HourlySeriesSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self) -> Result<Vec<RawRecord>, SourceError> {
        let reader = open(&self.path)?;
        let value: serde_json::Value = serde_json::from_reader(reader)
            .map_err(|e| SourceError::permanent(&self.name, format!("parse JSON: {e}")))?;
        let records =
            flatten_hourly(&value, &self.metrics).map_err(|m| SourceError::permanent(&self.name, m))?;
        if records.is_empty() {
            tracing::warn!(unit = %self.name, "empty hourly series");
        }
        Ok(records)
    }
}

type SourceFactory = Box<dyn Fn(PathBuf) -> Box<dyn RecordSource>>;

/// Every file matching a glob pattern, in sorted path order, each read by the
/// source `make` builds for it.
pub struct GlobSource {
    pattern: String,
    make: SourceFactory,
}

impl fmt::Debug for GlobSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobSource")
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

impl GlobSource {
    pub fn new<F>(pattern: impl Into<String>, make: F) -> Self
    where
        F: Fn(PathBuf) -> Box<dyn RecordSource> + 'static,
    {
        Self {
            pattern: pattern.into(),
            make: Box::new(make),
        }
    }

    /// Matching files, sorted.
    ///
    /// # Errors
    /// Fails on an invalid pattern or an unreadable directory entry.
    pub fn paths(&self) -> anyhow::Result<Vec<PathBuf>> {
        let entries = glob::glob(&self.pattern)
            .with_context(|| format!("invalid glob pattern: {}", self.pattern))?;
        let mut paths = Vec::new();
        for entry in entries {
            let path = entry
                .with_context(|| format!("error reading glob entry for pattern: {}", self.pattern))?;
            if path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// One source per matching file, so each can be extracted and retried on
    /// its own.
    ///
    /// # Errors
    /// See [`GlobSource::paths`].
    pub fn units(&self) -> anyhow::Result<Vec<Box<dyn RecordSource>>> {
        Ok(self.paths()?.into_iter().map(|p| (self.make)(p)).collect())
    }
}

impl RecordSource for GlobSource {
    fn name(&self) -> &str {
        &self.pattern
    }

    fn fetch(&self) -> Result<Vec<RawRecord>, SourceError> {
        let units = self
            .units()
            .map_err(|e| SourceError::permanent(&self.pattern, format!("{e:#}")))?;
        let mut out = Vec::new();
        for unit in units {
            out.extend(unit.fetch()?);
        }
        Ok(out)
    }
}

/// Records held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    name: String,
    records: Vec<RawRecord>,
}

impl StaticSource {
    pub fn new(name: impl Into<String>, records: Vec<RawRecord>) -> Self {
        Self {
            name: name.into(),
            records,
        }
    }
}

impl RecordSource for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self) -> Result<Vec<RawRecord>, SourceError> {
        Ok(self.records.clone())
    }
}

/// What happened to one unit during extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitOutcome {
    pub unit: String,
    pub rows: usize,
    pub attempts: u32,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub records: Vec<RawRecord>,
    pub units: Vec<UnitOutcome>,
}

impl Extraction {
    pub fn failed_units(&self) -> impl Iterator<Item = &UnitOutcome> {
        self.units.iter().filter(|u| u.error.is_some())
    }
}

/// Fetch every source in order, retrying each under `policy`.
pub fn extract(sources: &[Box<dyn RecordSource>], policy: &RetryPolicy) -> Extraction {
    let mut out = Extraction::default();
    for source in sources {
        let source = source.as_ref();
        let attempted = policy.attempt(source.name(), |_| source.fetch());
        let outcome = match attempted.result {
            Ok(records) => {
                tracing::info!(unit = source.name(), rows = records.len(), "extracted");
                let rows = records.len();
                out.records.extend(records);
                UnitOutcome {
                    unit: source.name().to_string(),
                    rows,
                    attempts: attempted.attempts,
                    error: None,
                }
            }
            Err(err) => {
                tracing::error!(unit = source.name(), attempts = attempted.attempts, error = %err, "no data for unit");
                UnitOutcome {
                    unit: source.name().to_string(),
                    rows: 0,
                    attempts: attempted.attempts,
                    error: Some(err.to_string()),
                }
            }
        };
        out.units.push(outcome);
    }
    out
}
