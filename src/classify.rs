//! Banding numeric columns into ordered category labels.
//!
//! [`CutPoints`] holds ascending upper bounds, each paired with a label, plus
//! an overflow label. A value takes the label of the first bound it does not
//! exceed, so a value equal to a bound lands in the lower band.
//!
//! [`PercentileBands`] fits cut points from a run's own distribution. The
//! fitted bounds live for one run only and are returned in [`FittedBands`].

use crate::record::EnrichedRecord;
use crate::schema::{ColumnId, ColumnKind, Schema, SchemaError};
use crate::value::Value;
use serde::Serialize;

/// Ordered `(upper_bound, label)` pairs plus the label for values beyond the
/// last bound.
#[derive(Debug, Clone, PartialEq)]
pub struct CutPoints<L> {
    bounds: Vec<(f64, L)>,
    overflow: L,
}

impl<L> CutPoints<L> {
    /// # Errors
    /// Fails if a bound is NaN or the bounds are not strictly ascending.
    pub fn new(bounds: Vec<(f64, L)>, overflow: L) -> Result<Self, SchemaError> {
        if bounds.iter().any(|(b, _)| b.is_nan()) {
            return Err(SchemaError::invalid("cut points", "bound is NaN"));
        }
        if bounds.windows(2).any(|w| w[0].0 >= w[1].0) {
            return Err(SchemaError::invalid("cut points", "bounds must be strictly ascending"));
        }
        Ok(Self { bounds, overflow })
    }

    /// Label for `x`: first bound with `x <= bound`, else the overflow label.
    pub fn assign(&self, x: f64) -> &L {
        self.bounds
            .iter()
            .find(|(b, _)| x <= *b)
            .map_or(&self.overflow, |(_, label)| label)
    }

    pub fn bounds(&self) -> impl Iterator<Item = f64> + '_ {
        self.bounds.iter().map(|(b, _)| *b)
    }

    /// Every label, lowest band first, overflow last.
    pub fn labels(&self) -> impl Iterator<Item = &L> {
        self.bounds
            .iter()
            .map(|(_, l)| l)
            .chain(std::iter::once(&self.overflow))
    }
}

/// Value at quantile `q` of ascending `sorted`, interpolating linearly between
/// the closest ranks (`pos = q * (n - 1)`).
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn percentile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() || !(0.0..=1.0).contains(&q) {
        return None;
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Cut points at quantiles of the run's values. `labels` has one more entry
/// than `quantiles`.
#[derive(Debug, Clone, PartialEq)]
pub struct PercentileBands {
    quantiles: Vec<f64>,
    labels: Vec<String>,
}

impl PercentileBands {
    /// # Errors
    /// Fails unless quantiles are strictly ascending within `[0, 1]` and there
    /// is exactly one more label than quantiles.
    pub fn new<S: Into<String>>(quantiles: Vec<f64>, labels: Vec<S>) -> Result<Self, SchemaError> {
        if quantiles.iter().any(|q| !(0.0..=1.0).contains(q)) {
            return Err(SchemaError::invalid("percentile bands", "quantiles must be within [0, 1]"));
        }
        if quantiles.windows(2).any(|w| w[0] >= w[1]) {
            return Err(SchemaError::invalid("percentile bands", "quantiles must be strictly ascending"));
        }
        if labels.len() != quantiles.len() + 1 {
            return Err(SchemaError::invalid(
                "percentile bands",
                "need exactly one more label than quantiles",
            ));
        }
        Ok(Self {
            quantiles,
            labels: labels.into_iter().map(Into::into).collect(),
        })
    }

    /// Tertiles at 0.33 and 0.66.
    ///
    /// # Errors
    /// Fails if `labels` does not have three entries.
    pub fn tertiles<S: Into<String>>(labels: [S; 3]) -> Result<Self, SchemaError> {
        Self::new(vec![0.33, 0.66], Vec::from(labels))
    }

    pub fn labels(&self) -> impl Iterator<Item = &String> {
        self.labels.iter()
    }

    /// Fit cut points to `values`. Returns `None` when there are no values.
    /// Quantiles that coincide collapse, keeping the lower label.
    #[must_use]
    pub fn fit(&self, values: &[f64]) -> Option<CutPoints<String>> {
        let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_by(f64::total_cmp);
        let mut bounds: Vec<(f64, String)> = Vec::with_capacity(self.quantiles.len());
        for (q, label) in self.quantiles.iter().zip(&self.labels) {
            let cut = percentile(&sorted, *q)?;
            if bounds.last().is_some_and(|(prev, _)| cut <= *prev) {
                continue;
            }
            bounds.push((cut, label.clone()));
        }
        let overflow = self.labels.last()?.clone();
        CutPoints::new(bounds, overflow).ok()
    }
}

/// How a classifier derives its cut points.
#[derive(Debug, Clone, PartialEq)]
pub enum Banding {
    Static(CutPoints<String>),
    Percentile(PercentileBands),
}

impl Banding {
    /// Fixed bands from `(upper_bound, label)` pairs.
    ///
    /// # Errors
    /// See [`CutPoints::new`].
    pub fn fixed<S: Into<String>>(bounds: Vec<(f64, S)>, overflow: S) -> Result<Self, SchemaError> {
        let bounds = bounds.into_iter().map(|(b, l)| (b, l.into())).collect();
        Ok(Self::Static(CutPoints::new(bounds, overflow.into())?))
    }

    fn labels(&self) -> Vec<&String> {
        match self {
            Self::Static(cuts) => cuts.labels().collect(),
            Self::Percentile(bands) => bands.labels().collect(),
        }
    }
}

/// Cut points one classifier used in a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FittedBands {
    pub column: String,
    pub mode: &'static str,
    pub bounds: Vec<f64>,
    pub labels: Vec<String>,
}

/// Writes a category label into `output` from the numeric `input`.
#[derive(Debug, Clone)]
pub struct Classifier {
    input: ColumnId,
    output: ColumnId,
    output_name: String,
    banding: Banding,
}

impl Classifier {
    /// # Errors
    /// Fails if `input` is not numeric, `output` is not a derived category
    /// column, or a label is outside the output column's declared domain.
    pub fn new(schema: &Schema, input: &str, output: &str, banding: Banding) -> Result<Self, SchemaError> {
        let input_id = schema.column(input)?;
        if !schema.def(input_id).kind.is_numeric() {
            return Err(SchemaError::invalid(input, "classifier input must be numeric"));
        }
        let output_id = schema.column(output)?;
        let out = schema.def(output_id);
        if out.kind != ColumnKind::Category || !out.is_derived() {
            return Err(SchemaError::invalid(output, "classifier output must be a derived category column"));
        }
        if let Some(domain) = &out.domain
            && let Some(label) = banding.labels().into_iter().find(|l| !domain.contains(*l))
        {
            return Err(SchemaError::invalid(
                output,
                format!("label {label:?} is not in the declared domain"),
            ));
        }
        Ok(Self {
            input: input_id,
            output: output_id,
            output_name: out.name.clone(),
            banding,
        })
    }

    #[must_use]
    pub const fn output(&self) -> ColumnId {
        self.output
    }

    #[must_use]
    pub const fn input(&self) -> ColumnId {
        self.input
    }

    /// Label every record. Percentile cut points are fitted over all non-null
    /// inputs first. Null inputs get a null label.
    pub fn classify(&self, records: &mut [EnrichedRecord]) -> FittedBands {
        let fitted;
        let (cuts, mode) = match &self.banding {
            Banding::Static(cuts) => (Some(cuts), "static"),
            Banding::Percentile(bands) => {
                let values: Vec<f64> = records
                    .iter()
                    .filter_map(|r| r.get(self.input).as_f64())
                    .collect();
                fitted = bands.fit(&values);
                (fitted.as_ref(), "percentile")
            }
        };

        for rec in records.iter_mut() {
            let label = match (rec.get(self.input).as_f64(), cuts) {
                (Some(x), Some(cuts)) => Value::Text(cuts.assign(x).clone()),
                _ => Value::Null,
            };
            rec.set(self.output, label);
        }

        let report = FittedBands {
            column: self.output_name.clone(),
            mode,
            bounds: cuts.map(|c| c.bounds().collect()).unwrap_or_default(),
            labels: cuts
                .map(|c| c.labels().cloned().collect())
                .unwrap_or_default(),
        };
        tracing::debug!(column = %report.column, mode, bounds = ?report.bounds, "classified");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_interpolates() {
        let v = [10.0, 20.0, 30.0, 40.0, 50.0];
        let p33 = percentile(&v, 0.33).unwrap();
        let p66 = percentile(&v, 0.66).unwrap();
        assert!((p33 - 23.2).abs() < 1e-9);
        assert!((p66 - 36.4).abs() < 1e-9);
        assert_eq!(percentile(&v, 0.0), Some(10.0));
        assert_eq!(percentile(&v, 1.0), Some(50.0));
        assert_eq!(percentile(&[], 0.5), None);
    }

    #[test]
    fn rejects_unsorted_bounds() {
        assert!(CutPoints::new(vec![(10.0, "a"), (5.0, "b")], "c").is_err());
        assert!(CutPoints::new(vec![(10.0, "a"), (10.0, "b")], "c").is_err());
    }

    #[test]
    fn constant_values_collapse_bands() {
        let bands = PercentileBands::tertiles(["low", "mid", "high"]).unwrap();
        let cuts = bands.fit(&[5.0, 5.0, 5.0]).unwrap();
        assert_eq!(cuts.bounds().collect::<Vec<_>>(), vec![5.0]);
        assert_eq!(cuts.assign(5.0), "low");
    }
}
