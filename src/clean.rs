//! The cleaner: raw records in, typed clean records out.
//!
//! Every source column carries a [`ColumnPolicy`] saying how to parse it and
//! what to do when a value is missing or unparseable. A run applies its steps
//! in a fixed order:
//!
//! 1. parse each cell (missing or invalid cells drop the row or become null)
//! 2. drop rows where every column of a `require_any` group is missing
//! 3. drop later rows with an already-seen natural key
//! 4. fill nulls (median, forward fill or constant)
//! 5. normalize units of columns whose maximum exceeds a threshold
//! 6. drop rows failing a precondition
//!
//! Dropped rows are never repaired. Each one lands in the [`DropLog`] with the
//! step that removed it.

use crate::record::{CleanRecord, RawRecord, Record};
use crate::schema::{ColumnId, ColumnKind, Schema, SchemaError};
use crate::value::{parse_cell, Parsed, RawValue, Value};
use anyhow::Context;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// What to do with an absent, null or blank cell.
#[derive(Debug, Clone, PartialEq)]
pub enum OnMissing {
    DropRow,
    /// Median of the column's non-null values in this run.
    FillMedian,
    /// Value of the previous surviving row.
    FillForward,
    FillConstant(Value),
    /// Leave the cell null. Only for nullable columns.
    KeepNull,
}

/// What to do with a cell that is present but cannot be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnInvalid {
    DropRow,
    /// Treat as missing, so `OnMissing` decides.
    CoerceToNull,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnPolicy {
    pub parse_as: ColumnKind,
    pub on_missing: OnMissing,
    pub on_invalid: OnInvalid,
    /// Lowercase category text after trimming.
    pub lowercase: bool,
}

impl ColumnPolicy {
    /// Parse as `kind`; drop the row when the cell is missing or invalid.
    #[must_use]
    pub const fn required(kind: ColumnKind) -> Self {
        Self {
            parse_as: kind,
            on_missing: OnMissing::DropRow,
            on_invalid: OnInvalid::DropRow,
            lowercase: false,
        }
    }

    #[must_use]
    pub fn on_missing(mut self, on_missing: OnMissing) -> Self {
        self.on_missing = on_missing;
        self
    }

    #[must_use]
    pub const fn on_invalid(mut self, on_invalid: OnInvalid) -> Self {
        self.on_invalid = on_invalid;
        self
    }

    #[must_use]
    pub const fn lowercase(mut self) -> Self {
        self.lowercase = true;
        self
    }
}

/// Why a row was removed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DropReason {
    Missing { column: String },
    Invalid { column: String, message: String },
    AllMissing { columns: Vec<String> },
    Duplicate { first_row: usize },
    NothingToCarry { column: String },
    Precondition { name: String },
}

impl DropReason {
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Missing { .. } => "missing",
            Self::Invalid { .. } => "invalid",
            Self::AllMissing { .. } => "all_missing",
            Self::Duplicate { .. } => "duplicate",
            Self::NothingToCarry { .. } => "nothing_to_carry",
            Self::Precondition { .. } => "precondition",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing { column } => write!(f, "missing value in {column}"),
            Self::Invalid { column, message } => write!(f, "invalid value in {column}: {message}"),
            Self::AllMissing { columns } => write!(f, "all of [{}] missing", columns.join(", ")),
            Self::Duplicate { first_row } => write!(f, "duplicate of row {first_row}"),
            Self::NothingToCarry { column } => write!(f, "no earlier value to carry into {column}"),
            Self::Precondition { name } => write!(f, "failed precondition {name}"),
        }
    }
}

/// A dropped row with its source position and natural key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowDrop {
    pub row_index: usize,
    pub key: String,
    #[serde(flatten)]
    pub reason: DropReason,
}

/// Collects dropped rows for reporting.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DropLog {
    drops: Vec<RowDrop>,
}

impl DropLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, row_index: usize, key: String, reason: DropReason) {
        tracing::debug!(row_index, key = %key, reason = %reason, "row dropped");
        self.drops.push(RowDrop {
            row_index,
            key,
            reason,
        });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.drops.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.drops.is_empty()
    }

    #[must_use]
    pub fn drops(&self) -> &[RowDrop] {
        &self.drops
    }

    #[must_use]
    pub fn counts_by_reason(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for d in &self.drops {
            *counts.entry(d.reason.code().to_string()).or_insert(0) += 1;
        }
        counts
    }

    /// Export drops as pretty JSON.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.drops)
    }

    /// Write drops to `path` as JSON.
    ///
    /// # Errors
    /// Returns an error if serialization or the write fails.
    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();
        let json = self.to_json()?;
        std::fs::write(path, json).with_context(|| format!("write {}", path.display()))
    }
}

impl fmt::Display for DropLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DropLog({} rows)", self.len())
    }
}

type Predicate = Arc<dyn Fn(&[&Value]) -> bool + Send + Sync>;

#[derive(Clone)]
struct Precondition {
    name: String,
    columns: Vec<ColumnId>,
    check: Predicate,
}

impl fmt::Debug for Precondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Precondition")
            .field("name", &self.name)
            .field("columns", &self.columns)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy)]
struct UnitNormalization {
    column: ColumnId,
    threshold: f64,
    divisor: f64,
}

#[derive(Debug, Clone)]
struct SourceColumn {
    id: ColumnId,
    field: String,
    policy: ColumnPolicy,
}

/// Output of [`Cleaner::clean`].
#[derive(Debug, Clone)]
pub struct CleanOutput {
    pub records: Vec<CleanRecord>,
    pub drops: DropLog,
    /// Columns whose units were rescaled in this run.
    pub normalized: Vec<String>,
}

/// Row survivor with its index in the raw input.
struct Pending {
    row_index: usize,
    raw_key: String,
    record: Record,
}

#[derive(Debug, Clone)]
pub struct Cleaner {
    schema: Arc<Schema>,
    columns: Vec<SourceColumn>,
    require_any: Vec<Vec<ColumnId>>,
    normalizations: Vec<UnitNormalization>,
    preconditions: Vec<Precondition>,
}

impl Cleaner {
    #[must_use]
    pub fn builder(schema: Arc<Schema>) -> CleanerBuilder {
        CleanerBuilder {
            schema,
            policies: Vec::new(),
            require_any: Vec::new(),
            normalizations: Vec::new(),
            preconditions: Vec::new(),
        }
    }

    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Clean `raw` into typed records. Pure: the same input always yields the
    /// same output.
    #[must_use]
    pub fn clean(&self, raw: &[RawRecord]) -> CleanOutput {
        let mut drops = DropLog::new();
        let mut rows = Vec::with_capacity(raw.len());

        for (row_index, rec) in raw.iter().enumerate() {
            let raw_key = self.raw_key(rec);
            match self.parse_row(rec) {
                Ok(record) => rows.push(Pending {
                    row_index,
                    raw_key,
                    record,
                }),
                Err(reason) => drops.record(row_index, raw_key, reason),
            }
        }

        rows = self.apply_require_any(rows, &mut drops);
        rows = self.dedup(rows, &mut drops);
        for col in &self.columns {
            rows = fill_column(&self.schema, col, rows, &mut drops);
        }
        let normalized = self.normalize_units(&mut rows);
        rows = self.apply_preconditions(rows, &mut drops);

        if !drops.is_empty() {
            tracing::warn!(
                dropped = drops.len(),
                kept = rows.len(),
                reasons = ?drops.counts_by_reason(),
                "rows dropped during cleaning"
            );
        }

        CleanOutput {
            records: rows.into_iter().map(|p| CleanRecord(p.record)).collect(),
            drops,
            normalized,
        }
    }

    /// Display form of the natural key for the drop log. Never compared.
    fn raw_key(&self, rec: &RawRecord) -> String {
        self.schema
            .natural_key()
            .iter()
            .map(|&id| {
                self.schema
                    .def(id)
                    .source_field()
                    .and_then(|f| rec.get(f))
                    .map_or_else(String::new, render_raw)
            })
            .collect::<Vec<_>>()
            .join("|")
    }

    fn parse_row(&self, rec: &RawRecord) -> Result<Record, DropReason> {
        let mut record = Record::empty(&self.schema);
        for col in &self.columns {
            let name = &self.schema.def(col.id).name;
            let value = match parse_cell(rec.get(&col.field), col.policy.parse_as) {
                Parsed::Present(v) => v,
                Parsed::Missing => Value::Null,
                Parsed::Invalid(message) => match col.policy.on_invalid {
                    OnInvalid::DropRow => {
                        return Err(DropReason::Invalid {
                            column: name.clone(),
                            message,
                        });
                    }
                    OnInvalid::CoerceToNull => Value::Null,
                },
            };
            if value.is_null() && col.policy.on_missing == OnMissing::DropRow {
                return Err(DropReason::Missing {
                    column: name.clone(),
                });
            }
            let value = match value {
                Value::Text(s) if col.policy.lowercase => Value::Text(s.to_lowercase()),
                other => other,
            };
            record.set(col.id, value);
        }
        Ok(record)
    }

    fn apply_require_any(&self, rows: Vec<Pending>, drops: &mut DropLog) -> Vec<Pending> {
        if self.require_any.is_empty() {
            return rows;
        }
        rows.into_iter()
            .filter(|p| {
                let failed = self
                    .require_any
                    .iter()
                    .find(|group| group.iter().all(|&id| p.record.get(id).is_null()));
                if let Some(group) = failed {
                    drops.record(
                        p.row_index,
                        p.raw_key.clone(),
                        DropReason::AllMissing {
                            columns: group
                                .iter()
                                .map(|&id| self.schema.def(id).name.clone())
                                .collect(),
                        },
                    );
                    false
                } else {
                    true
                }
            })
            .collect()
    }

    fn dedup(&self, rows: Vec<Pending>, drops: &mut DropLog) -> Vec<Pending> {
        let mut seen: HashMap<Vec<String>, usize> = HashMap::with_capacity(rows.len());
        rows.into_iter()
            .filter(|p| {
                let key = self.schema.key_of(&p.record);
                if let Some(&first_row) = seen.get(&key) {
                    drops.record(
                        p.row_index,
                        p.raw_key.clone(),
                        DropReason::Duplicate { first_row },
                    );
                    false
                } else {
                    seen.insert(key, p.row_index);
                    true
                }
            })
            .collect()
    }

    fn normalize_units(&self, rows: &mut [Pending]) -> Vec<String> {
        let mut normalized = Vec::new();
        for n in &self.normalizations {
            let max = rows
                .iter()
                .filter_map(|p| p.record.get(n.column).as_f64())
                .max_by(f64::total_cmp);
            let Some(max) = max else { continue };
            if max <= n.threshold {
                continue;
            }
            for p in rows.iter_mut() {
                if let Some(v) = p.record.get(n.column).as_f64() {
                    p.record.set(n.column, Value::Float(v / n.divisor));
                }
            }
            let name = self.schema.def(n.column).name.clone();
            tracing::info!(column = %name, max, divisor = n.divisor, "normalized column units");
            normalized.push(name);
        }
        normalized
    }

    fn apply_preconditions(&self, rows: Vec<Pending>, drops: &mut DropLog) -> Vec<Pending> {
        if self.preconditions.is_empty() {
            return rows;
        }
        rows.into_iter()
            .filter(|p| {
                let failed = self.preconditions.iter().find(|pre| {
                    let args: Vec<&Value> =
                        pre.columns.iter().map(|&id| p.record.get(id)).collect();
                    !(pre.check)(&args)
                });
                if let Some(pre) = failed {
                    drops.record(
                        p.row_index,
                        p.raw_key.clone(),
                        DropReason::Precondition {
                            name: pre.name.clone(),
                        },
                    );
                    false
                } else {
                    true
                }
            })
            .collect()
    }
}

fn fill_column(
    schema: &Schema,
    col: &SourceColumn,
    rows: Vec<Pending>,
    drops: &mut DropLog,
) -> Vec<Pending> {
    let def = schema.def(col.id);
    match &col.policy.on_missing {
        OnMissing::DropRow | OnMissing::KeepNull => rows,
        OnMissing::FillConstant(v) => {
            let fill = v.clone().conform(def.kind);
            rows.into_iter()
                .map(|mut p| {
                    if p.record.get(col.id).is_null() {
                        p.record.set(col.id, fill.clone());
                    }
                    p
                })
                .collect()
        }
        OnMissing::FillMedian => {
            let values: Vec<f64> = rows
                .iter()
                .filter_map(|p| p.record.get(col.id).as_f64())
                .collect();
            let fill = median(values).map(|m| match def.kind {
                ColumnKind::Integer => Value::Float(m.round()).conform(ColumnKind::Integer),
                kind => Value::Float(m).conform(kind),
            });
            rows.into_iter()
                .filter_map(|mut p| {
                    if !p.record.get(col.id).is_null() {
                        return Some(p);
                    }
                    if let Some(fill) = &fill {
                        p.record.set(col.id, fill.clone());
                        Some(p)
                    } else {
                        drops.record(
                            p.row_index,
                            p.raw_key,
                            DropReason::Missing {
                                column: def.name.clone(),
                            },
                        );
                        None
                    }
                })
                .collect()
        }
        OnMissing::FillForward => {
            let mut last: Option<Value> = None;
            rows.into_iter()
                .filter_map(|mut p| {
                    let current = p.record.get(col.id);
                    if !current.is_null() {
                        last = Some(current.clone());
                        return Some(p);
                    }
                    if let Some(carry) = &last {
                        p.record.set(col.id, carry.clone());
                        Some(p)
                    } else {
                        drops.record(
                            p.row_index,
                            p.raw_key,
                            DropReason::NothingToCarry {
                                column: def.name.clone(),
                            },
                        );
                        None
                    }
                })
                .collect()
        }
    }
}

/// Median of `values`; the mean of the two middle values for even counts.
#[must_use]
pub fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

fn render_raw(raw: &RawValue) -> String {
    match raw {
        RawValue::Null => String::new(),
        RawValue::Bool(b) => b.to_string(),
        RawValue::Number(n) => Value::Float(*n).render(),
        RawValue::Text(s) => s.trim().to_string(),
    }
}

/// Builder for [`Cleaner`]. Names are resolved and checked in
/// [`CleanerBuilder::build`].
pub struct CleanerBuilder {
    schema: Arc<Schema>,
    policies: Vec<(String, ColumnPolicy)>,
    require_any: Vec<Vec<String>>,
    normalizations: Vec<(String, f64, f64)>,
    preconditions: Vec<(String, Vec<String>, Predicate)>,
}

impl CleanerBuilder {
    #[must_use]
    pub fn policy(mut self, column: impl Into<String>, policy: ColumnPolicy) -> Self {
        self.policies.push((column.into(), policy));
        self
    }

    /// Drop rows where every one of `columns` is missing.
    #[must_use]
    pub fn require_any(mut self, columns: &[&str]) -> Self {
        self.require_any
            .push(columns.iter().map(ToString::to_string).collect());
        self
    }

    /// Divide every value of `column` by `divisor` when the column's maximum
    /// exceeds `threshold`.
    #[must_use]
    pub fn normalize_units(mut self, column: impl Into<String>, threshold: f64, divisor: f64) -> Self {
        self.normalizations.push((column.into(), threshold, divisor));
        self
    }

    /// Drop rows for which `check` returns false. `check` receives the values
    /// of `columns` in order.
    #[must_use]
    pub fn precondition<F>(mut self, name: impl Into<String>, columns: &[&str], check: F) -> Self
    where
        F: Fn(&[&Value]) -> bool + Send + Sync + 'static,
    {
        self.preconditions.push((
            name.into(),
            columns.iter().map(ToString::to_string).collect(),
            Arc::new(check),
        ));
        self
    }

    /// Drop rows where timestamp `later` is before timestamp `earlier`.
    #[must_use]
    pub fn require_not_before(self, later: &str, earlier: &str) -> Self {
        let name = format!("{later} >= {earlier}");
        self.precondition(name, &[later, earlier], |v| {
            match (v[0].as_timestamp(), v[1].as_timestamp()) {
                (Some(l), Some(e)) => l >= e,
                _ => true,
            }
        })
    }

    /// Resolve and check the configuration.
    ///
    /// # Errors
    /// Fails when a policy names an unknown or derived column, a source column
    /// has no policy or two, `parse_as` disagrees with the schema, a fill is
    /// not valid for the column, or a normalization or precondition is
    /// malformed.
    pub fn build(self) -> Result<Cleaner, SchemaError> {
        let schema = self.schema;
        let mut by_id: BTreeMap<ColumnId, ColumnPolicy> = BTreeMap::new();
        for (name, policy) in self.policies {
            let id = source_column(&schema, &name)?;
            let def = schema.def(id);
            if policy.parse_as != def.kind {
                return Err(SchemaError::invalid(
                    &name,
                    format!("policy parses as {:?} but column is {:?}", policy.parse_as, def.kind),
                ));
            }
            match &policy.on_missing {
                OnMissing::FillMedian if !def.kind.is_numeric() => {
                    return Err(SchemaError::invalid(&name, "fill_median needs a numeric column"));
                }
                OnMissing::KeepNull if !def.nullable => {
                    return Err(SchemaError::invalid(&name, "keep_null needs a nullable column"));
                }
                OnMissing::FillConstant(v) if v.clone().conform(def.kind).is_null() => {
                    return Err(SchemaError::invalid(
                        &name,
                        format!("fill constant {v} does not fit a {:?} column", def.kind),
                    ));
                }
                _ => {}
            }
            if policy.lowercase && def.kind != ColumnKind::Category {
                return Err(SchemaError::invalid(&name, "lowercase applies to category columns"));
            }
            if by_id.insert(id, policy).is_some() {
                return Err(SchemaError::invalid(&name, "more than one policy"));
            }
        }

        let mut columns = Vec::with_capacity(by_id.len());
        for (id, def) in schema.source_columns() {
            let policy = by_id
                .remove(&id)
                .ok_or_else(|| SchemaError::invalid(&def.name, "source column has no policy"))?;
            columns.push(SourceColumn {
                id,
                field: def.source_field().unwrap_or(&def.name).to_string(),
                policy,
            });
        }

        let require_any = self
            .require_any
            .iter()
            .map(|group| {
                if group.is_empty() {
                    return Err(SchemaError::invalid("require_any", "empty column group"));
                }
                group
                    .iter()
                    .map(|n| source_column(&schema, n))
                    .collect::<Result<Vec<ColumnId>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;

        let normalizations = self
            .normalizations
            .into_iter()
            .map(|(name, threshold, divisor)| {
                let column = source_column(&schema, &name)?;
                if schema.def(column).kind != ColumnKind::Float {
                    return Err(SchemaError::invalid(&name, "unit normalization needs a float column"));
                }
                if !threshold.is_finite() || !divisor.is_finite() || divisor <= 0.0 {
                    return Err(SchemaError::invalid(&name, "threshold and divisor must be finite, divisor positive"));
                }
                Ok(UnitNormalization {
                    column,
                    threshold,
                    divisor,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let preconditions = self
            .preconditions
            .into_iter()
            .map(|(name, cols, check)| {
                let columns = cols
                    .iter()
                    .map(|n| source_column(&schema, n))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok::<_, SchemaError>(Precondition {
                    name,
                    columns,
                    check,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Cleaner {
            schema,
            columns,
            require_any,
            normalizations,
            preconditions,
        })
    }
}

fn source_column(schema: &Schema, name: &str) -> Result<ColumnId, SchemaError> {
    let id = schema.column(name)?;
    if schema.def(id).is_derived() {
        return Err(SchemaError::invalid(name, "expected a source column"));
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_even_and_odd() {
        assert_eq!(median(vec![3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(vec![4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(Vec::new()), None);
    }

    #[test]
    fn drop_reason_codes() {
        let r = DropReason::NothingToCarry {
            column: "contract".into(),
        };
        assert_eq!(r.code(), "nothing_to_carry");
        assert_eq!(r.to_string(), "no earlier value to carry into contract");
    }
}
