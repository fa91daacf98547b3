//! Feature derivation: side-table joins and declared formulas.
//!
//! A [`FeatureDeriver`] runs a list of steps in declared order. A step is
//! either a left join against a [`Lookup`] or a [`Formula`] over columns that
//! are already available. The builder checks that every input is a source
//! column or the output of an earlier step, and that no column is assigned
//! twice.

use crate::classify::CutPoints;
use crate::record::{CleanRecord, EnrichedRecord};
use crate::schema::{ColumnId, ColumnKind, Schema, SchemaError};
use crate::value::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// A pure function of its input cells, optionally declaring how many
/// inputs it takes. [`FeatureDeriverBuilder::build`] rejects a step whose
/// input list does not match the declared arity.
#[derive(Clone)]
pub struct Formula {
    arity: Option<usize>,
    eval: Arc<dyn Fn(&[&Value]) -> Value + Send + Sync>,
}

impl Formula {
    /// A formula that accepts any number of inputs.
    pub fn variadic<F>(f: F) -> Self
    where
        F: Fn(&[&Value]) -> Value + Send + Sync + 'static,
    {
        Self {
            arity: None,
            eval: Arc::new(f),
        }
    }

    /// A formula over exactly `arity` inputs.
    pub fn with_arity<F>(arity: usize, f: F) -> Self
    where
        F: Fn(&[&Value]) -> Value + Send + Sync + 'static,
    {
        Self::variadic(f).expecting(arity)
    }

    #[must_use]
    pub fn expecting(mut self, arity: usize) -> Self {
        self.arity = Some(arity);
        self
    }

    #[must_use]
    pub const fn arity(&self) -> Option<usize> {
        self.arity
    }

    /// Apply the formula. A wrong number of inputs yields null.
    #[must_use]
    pub fn eval(&self, args: &[&Value]) -> Value {
        match self.arity {
            Some(n) if n != args.len() => Value::Null,
            _ => (self.eval)(args),
        }
    }
}

impl fmt::Debug for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Formula")
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

/// Anything [`FeatureDeriverBuilder::derive`] accepts: a [`Formula`] or a
/// plain closure, which is treated as variadic.
pub trait IntoFormula {
    fn into_formula(self) -> Formula;
}

impl IntoFormula for Formula {
    fn into_formula(self) -> Formula {
        self
    }
}

impl<F> IntoFormula for F
where
    F: Fn(&[&Value]) -> Value + Send + Sync + 'static,
{
    fn into_formula(self) -> Formula {
        Formula::variadic(self)
    }
}

/// A side table queried by a composite key.
pub trait Lookup: Send + Sync + fmt::Debug {
    /// Number of values each matching row yields.
    fn width(&self) -> usize;

    /// The row matching `key`, if any.
    fn lookup(&self, key: &[&Value]) -> Option<&[Value]>;
}

/// Exact match on rendered key values, ignoring case and surrounding
/// whitespace. The first row inserted for a key wins.
#[derive(Debug, Clone, Default)]
pub struct ExactLookup {
    width: usize,
    rows: HashMap<Vec<String>, Vec<Value>>,
}

impl ExactLookup {
    #[must_use]
    pub fn new(width: usize) -> Self {
        Self {
            width,
            rows: HashMap::new(),
        }
    }

    /// Returns false if the key was already present or `row` has the wrong
    /// width.
    pub fn insert(&mut self, key: &[Value], row: Vec<Value>) -> bool {
        if row.len() != self.width {
            return false;
        }
        let key: Vec<String> = key.iter().map(normalize_key).collect();
        if self.rows.contains_key(&key) {
            return false;
        }
        self.rows.insert(key, row);
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn normalize_key(v: &Value) -> String {
    v.render().trim().to_lowercase()
}

impl Lookup for ExactLookup {
    fn width(&self) -> usize {
        self.width
    }

    fn lookup(&self, key: &[&Value]) -> Option<&[Value]> {
        let key: Vec<String> = key.iter().map(|v| normalize_key(v)).collect();
        self.rows.get(&key).map(Vec::as_slice)
    }
}

/// Match a `(latitude, longitude)` key to the first registered point within
/// `tolerance` degrees on both axes.
#[derive(Debug, Clone)]
pub struct ProximityLookup {
    tolerance: f64,
    width: usize,
    points: Vec<(f64, f64, Vec<Value>)>,
}

impl ProximityLookup {
    #[must_use]
    pub const fn new(tolerance: f64, width: usize) -> Self {
        Self {
            tolerance,
            width,
            points: Vec::new(),
        }
    }

    #[must_use]
    pub fn point(mut self, lat: f64, lon: f64, row: Vec<Value>) -> Self {
        if row.len() == self.width {
            self.points.push((lat, lon, row));
        }
        self
    }
}

impl Lookup for ProximityLookup {
    fn width(&self) -> usize {
        self.width
    }

    fn lookup(&self, key: &[&Value]) -> Option<&[Value]> {
        let [lat, lon] = key else { return None };
        let (lat, lon) = (lat.as_f64()?, lon.as_f64()?);
        self.points
            .iter()
            .find(|(plat, plon, _)| {
                (plat - lat).abs() < self.tolerance && (plon - lon).abs() < self.tolerance
            })
            .map(|(_, _, row)| row.as_slice())
    }
}

/// A left join: key columns are looked up and each matched value goes to an
/// output column. Misses and null matched values take the output's default.
#[derive(Debug, Clone)]
pub struct SideJoin {
    lookup: Arc<dyn Lookup>,
    keys: Vec<String>,
    outputs: Vec<(String, Value)>,
}

impl SideJoin {
    pub fn new(lookup: Arc<dyn Lookup>, keys: &[&str]) -> Self {
        Self {
            lookup,
            keys: keys.iter().map(ToString::to_string).collect(),
            outputs: Vec::new(),
        }
    }

    /// Next output column, in the order the lookup yields values.
    #[must_use]
    pub fn output(mut self, column: impl Into<String>, default: impl Into<Value>) -> Self {
        self.outputs.push((column.into(), default.into()));
        self
    }
}

#[derive(Clone)]
enum Step {
    Join {
        lookup: Arc<dyn Lookup>,
        keys: Vec<ColumnId>,
        outputs: Vec<(ColumnId, ColumnKind, Value)>,
    },
    Derive {
        output: ColumnId,
        kind: ColumnKind,
        inputs: Vec<ColumnId>,
        formula: Formula,
    },
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Join { keys, outputs, .. } => f
                .debug_struct("Join")
                .field("keys", keys)
                .field("outputs", outputs)
                .finish_non_exhaustive(),
            Self::Derive { output, inputs, .. } => f
                .debug_struct("Derive")
                .field("output", output)
                .field("inputs", inputs)
                .finish_non_exhaustive(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeatureDeriver {
    steps: Vec<Step>,
    assigned: Vec<ColumnId>,
}

impl FeatureDeriver {
    #[must_use]
    pub fn builder(schema: Arc<Schema>) -> FeatureDeriverBuilder {
        FeatureDeriverBuilder {
            schema,
            steps: Vec::new(),
        }
    }

    /// Derived columns this deriver writes.
    #[must_use]
    pub fn assigned(&self) -> &[ColumnId] {
        &self.assigned
    }

    /// Enrich one record. Deterministic.
    #[must_use]
    pub fn derive_one(&self, record: CleanRecord) -> EnrichedRecord {
        let mut rec = EnrichedRecord(record.into_record());
        for step in &self.steps {
            match step {
                Step::Join {
                    lookup,
                    keys,
                    outputs,
                } => {
                    let key: Vec<&Value> = keys.iter().map(|&id| rec.get(id)).collect();
                    let found = lookup.lookup(&key);
                    for (i, (column, kind, default)) in outputs.iter().enumerate() {
                        let value = found
                            .and_then(|row| row.get(i))
                            .map(|v| v.clone().conform(*kind))
                            .filter(|v| !v.is_null())
                            .unwrap_or_else(|| default.clone());
                        rec.set(*column, value);
                    }
                }
                Step::Derive {
                    output,
                    kind,
                    inputs,
                    formula,
                } => {
                    let args: Vec<&Value> = inputs.iter().map(|&id| rec.get(id)).collect();
                    let value = formula.eval(&args).conform(*kind);
                    rec.set(*output, value);
                }
            }
        }
        rec
    }

    /// Enrich every record, preserving order.
    #[must_use]
    pub fn derive(&self, records: Vec<CleanRecord>) -> Vec<EnrichedRecord> {
        let out: Vec<EnrichedRecord> = records.into_iter().map(|r| self.derive_one(r)).collect();
        tracing::debug!(rows = out.len(), steps = self.steps.len(), "derived features");
        out
    }
}

enum PendingStep {
    Join(SideJoin),
    Derive {
        output: String,
        inputs: Vec<String>,
        formula: Formula,
    },
}

pub struct FeatureDeriverBuilder {
    schema: Arc<Schema>,
    steps: Vec<PendingStep>,
}

impl FeatureDeriverBuilder {
    #[must_use]
    pub fn join(mut self, join: SideJoin) -> Self {
        self.steps.push(PendingStep::Join(join));
        self
    }

    /// Compute `output` from `inputs` with `formula`.
    #[must_use]
    pub fn derive(
        mut self,
        output: impl Into<String>,
        inputs: &[&str],
        formula: impl IntoFormula,
    ) -> Self {
        self.steps.push(PendingStep::Derive {
            output: output.into(),
            inputs: inputs.iter().map(ToString::to_string).collect(),
            formula: formula.into_formula(),
        });
        self
    }

    /// # Errors
    /// Fails on unknown columns, an input that is neither a source column nor
    /// the output of an earlier step, an output that is not a derived column or
    /// is assigned twice, a join whose lookup width differs from its outputs,
    /// a default that does not fit its column, or a formula given a different
    /// number of inputs than it declares.
    pub fn build(self) -> Result<FeatureDeriver, SchemaError> {
        let schema = self.schema;
        let mut available: HashSet<ColumnId> = schema.source_columns().map(|(id, _)| id).collect();
        let mut assigned = Vec::new();
        let mut steps = Vec::with_capacity(self.steps.len());

        let mut assign = |name: &str,
                          available: &mut HashSet<ColumnId>|
         -> Result<ColumnId, SchemaError> {
            let id = schema.column(name)?;
            if !schema.def(id).is_derived() {
                return Err(SchemaError::invalid(name, "cannot overwrite a source column"));
            }
            if !available.insert(id) {
                return Err(SchemaError::invalid(name, "assigned more than once"));
            }
            assigned.push(id);
            Ok(id)
        };

        for step in self.steps {
            match step {
                PendingStep::Join(join) => {
                    if join.lookup.width() != join.outputs.len() {
                        return Err(SchemaError::invalid(
                            join.outputs.first().map_or("join", |(c, _)| c.as_str()),
                            format!(
                                "lookup yields {} values but {} outputs are declared",
                                join.lookup.width(),
                                join.outputs.len()
                            ),
                        ));
                    }
                    let keys = join
                        .keys
                        .iter()
                        .map(|k| require_available(&schema, &available, k))
                        .collect::<Result<Vec<_>, _>>()?;
                    let mut outputs = Vec::with_capacity(join.outputs.len());
                    for (name, default) in join.outputs {
                        let id = assign(&name, &mut available)?;
                        let kind = schema.def(id).kind;
                        let default = default.conform(kind);
                        if default.is_null() {
                            return Err(SchemaError::invalid(
                                &name,
                                "join default must be a non-null value of the column's kind",
                            ));
                        }
                        outputs.push((id, kind, default));
                    }
                    steps.push(Step::Join {
                        lookup: join.lookup,
                        keys,
                        outputs,
                    });
                }
                PendingStep::Derive {
                    output,
                    inputs,
                    formula,
                } => {
                    if let Some(arity) = formula.arity()
                        && arity != inputs.len()
                    {
                        return Err(SchemaError::invalid(
                            &output,
                            format!("formula takes {arity} inputs but {} are declared", inputs.len()),
                        ));
                    }
                    let inputs = inputs
                        .iter()
                        .map(|i| require_available(&schema, &available, i))
                        .collect::<Result<Vec<_>, _>>()?;
                    let id = assign(&output, &mut available)?;
                    steps.push(Step::Derive {
                        output: id,
                        kind: schema.def(id).kind,
                        inputs,
                        formula,
                    });
                }
            }
        }

        Ok(FeatureDeriver { steps, assigned })
    }
}

fn require_available(
    schema: &Schema,
    available: &HashSet<ColumnId>,
    name: &str,
) -> Result<ColumnId, SchemaError> {
    let id = schema.column(name)?;
    if available.contains(&id) {
        Ok(id)
    } else {
        Err(SchemaError::invalid(name, "used before it is computed"))
    }
}

/// Leave non-zero denominators alone; bump a zero one by 1.
#[must_use]
pub fn guard_zero(denominator: f64) -> f64 {
    if denominator == 0.0 {
        denominator + 1.0
    } else {
        denominator
    }
}

/// Lift a numeric function. Any null or non-numeric input yields null.
/// The result is variadic; use [`Formula::expecting`] to pin its arity.
pub fn numeric<F>(f: F) -> Formula
where
    F: Fn(&[f64]) -> f64 + Send + Sync + 'static,
{
    Formula::variadic(move |args| {
        let nums: Option<Vec<f64>> = args.iter().map(|v| v.as_f64()).collect();
        nums.map_or(Value::Null, |n| Value::Float(f(&n)))
    })
}

/// Minutes from the second input timestamp to the first.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn minutes_between() -> Formula {
    Formula::with_arity(2, |args| {
        let [later, earlier] = args else { return Value::Null };
        match (later.as_timestamp(), earlier.as_timestamp()) {
            (Some(later), Some(earlier)) => {
                Value::Float((later - earlier).num_milliseconds() as f64 / 60_000.0)
            }
            _ => Value::Null,
        }
    })
}

/// `sum(weights[i] * inputs[i])`, one input per weight.
#[must_use]
pub fn weighted_sum(weights: Vec<f64>) -> Formula {
    let arity = weights.len();
    numeric(move |xs| xs.iter().zip(&weights).map(|(x, w)| x * w).sum()).expecting(arity)
}

/// `inputs[0] / guard_zero(inputs[1]) * scale`.
#[must_use]
pub fn guarded_div(scale: f64) -> Formula {
    Formula::with_arity(2, move |args| {
        let [n, d] = args else { return Value::Null };
        match (n.as_f64(), d.as_f64()) {
            (Some(n), Some(d)) => Value::Float(n / guard_zero(d) * scale),
            _ => Value::Null,
        }
    })
}

/// Map a numeric input through static cut points with numeric labels.
#[must_use]
pub fn bucket(cuts: CutPoints<f64>) -> Formula {
    Formula::with_arity(1, move |args| {
        let [x] = args else { return Value::Null };
        x.as_f64().map_or(Value::Null, |x| Value::Float(*cuts.assign(x)))
    })
}

/// Map a text input to an integer code; unmapped or null text takes
/// `default`.
#[must_use]
pub fn category_code(codes: &[(&str, i64)], default: i64) -> Formula {
    let codes: HashMap<String, i64> = codes.iter().map(|(k, v)| ((*k).to_string(), *v)).collect();
    Formula::with_arity(1, move |args| {
        let [text] = args else { return Value::Null };
        let code = text
            .as_str()
            .and_then(|s| codes.get(s).copied())
            .unwrap_or(default);
        Value::Int(code)
    })
}

/// 1 when `pred` holds for the text input, else 0. Null input yields null.
pub fn binary_flag<P>(pred: P) -> Formula
where
    P: Fn(&str) -> bool + Send + Sync + 'static,
{
    Formula::with_arity(1, move |args| {
        let [text] = args else { return Value::Null };
        text.as_str()
            .map_or(Value::Null, |s| Value::Int(i64::from(pred(s))))
    })
}

/// Hour of day of a timestamp input.
#[must_use]
pub fn hour_of_day() -> Formula {
    use chrono::Timelike;
    Formula::with_arity(1, |args| {
        let [t] = args else { return Value::Null };
        t.as_timestamp()
            .map_or(Value::Null, |t| Value::Int(i64::from(t.hour())))
    })
}
