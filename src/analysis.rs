//! Post-load analysis: summary figures computed from the rows read back out
//! of the target table.
//!
//! Each domain that has an analyzer attaches it to its
//! [`crate::PipelineDefinition`]; the run report then carries an
//! [`Analysis`]. Means skip null and non-numeric cells. A group whose cells
//! are all null has no mean and is left out of the map.

use crate::store::Row;
use crate::value::Value;
use serde::Serialize;
use std::collections::BTreeMap;

/// Computes an [`Analysis`] from persisted rows.
pub type Analyzer = fn(&[Row]) -> Analysis;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "domain", rename_all = "snake_case")]
pub enum Analysis {
    AirQuality(AirQualityAnalysis),
    Churn(ChurnAnalysis),
}

impl Analysis {
    /// Log the headline figures.
    pub fn log_summary(&self) {
        match self {
            Self::AirQuality(a) => tracing::info!(
                rows = a.rows,
                top_city_by_pm2_5 = ?a.top_city_by_pm2_5,
                top_city_by_severity = ?a.top_city_by_severity,
                worst_hour_by_pm2_5 = ?a.worst_hour_by_pm2_5,
                risk_flag_share = ?a.risk_flag_share,
                "analysis"
            ),
            Self::Churn(c) => tracing::info!(
                rows = c.rows,
                churn_percentage = ?c.churn_percentage,
                churn_rate_by_charge_segment = ?c.churn_rate_by_charge_segment,
                "analysis"
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AirQualityAnalysis {
    pub rows: usize,
    pub mean_pm2_5_by_city: BTreeMap<String, f64>,
    pub top_city_by_pm2_5: Option<String>,
    pub mean_severity_by_city: BTreeMap<String, f64>,
    pub top_city_by_severity: Option<String>,
    /// Percentage of flagged rows carrying each risk flag, to two decimals.
    pub risk_flag_share: BTreeMap<String, f64>,
    pub mean_pm2_5_by_hour: BTreeMap<i64, f64>,
    pub worst_hour_by_pm2_5: Option<i64>,
    /// City -> risk flag -> row count. Every city lists every flag seen in
    /// the table, with zero where it has none.
    pub risk_flags_by_city: BTreeMap<String, BTreeMap<String, usize>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChurnAnalysis {
    pub rows: usize,
    /// Percentage of customers with `churn_flag = 1`.
    pub churn_percentage: Option<f64>,
    pub mean_monthly_charges_by_contract: BTreeMap<String, f64>,
    /// Fraction of customers in each charge segment who churned.
    pub churn_rate_by_charge_segment: BTreeMap<String, f64>,
    pub customers_by_tenure_group: BTreeMap<String, usize>,
    pub customers_by_internet_service: BTreeMap<String, usize>,
    /// Tenure group -> churn answer -> customer count.
    pub churn_by_tenure_group: BTreeMap<String, BTreeMap<String, usize>>,
}

/// Running `(sum, count)` for a mean.
#[derive(Debug, Clone, Copy, Default)]
struct Mean {
    sum: f64,
    count: u64,
}

impl Mean {
    fn add(&mut self, x: f64) {
        self.sum += x;
        self.count += 1;
    }

    #[allow(clippy::cast_precision_loss)]
    fn finish(self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

fn text<'r>(row: &'r Row, column: &str) -> Option<&'r str> {
    row.get(column).and_then(Value::as_str)
}

fn number(row: &Row, column: &str) -> Option<f64> {
    row.get(column).and_then(Value::as_f64)
}

fn integer(row: &Row, column: &str) -> Option<i64> {
    match row.get(column) {
        Some(Value::Int(i)) => Some(*i),
        _ => None,
    }
}

/// Mean of `value` per group. Rows without a group are skipped.
fn mean_by<K, G>(rows: &[Row], group: G, value: &str) -> BTreeMap<K, f64>
where
    K: Ord,
    G: Fn(&Row) -> Option<K>,
{
    let mut acc: BTreeMap<K, Mean> = BTreeMap::new();
    for row in rows {
        let Some(key) = group(row) else { continue };
        let mean = acc.entry(key).or_default();
        if let Some(x) = number(row, value) {
            mean.add(x);
        }
    }
    acc.into_iter()
        .filter_map(|(k, m)| m.finish().map(|v| (k, v)))
        .collect()
}

/// Key of the largest value. Ties go to the smallest key.
fn argmax<K: Clone>(means: &BTreeMap<K, f64>) -> Option<K> {
    let mut best: Option<(&K, f64)> = None;
    for (k, &v) in means {
        if best.is_none_or(|(_, b)| v > b) {
            best = Some((k, v));
        }
    }
    best.map(|(k, _)| k.clone())
}

fn counts_by(rows: &[Row], column: &str) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for label in rows.iter().filter_map(|r| text(r, column)) {
        *counts.entry(label.to_string()).or_insert(0) += 1;
    }
    counts
}

/// Row counts per `(row_key, col_key)` pair, zero-filled so every row key
/// lists every column key seen.
fn cross_tab(rows: &[Row], row_key: &str, col_key: &str) -> BTreeMap<String, BTreeMap<String, usize>> {
    let labels: Vec<String> = counts_by(rows, col_key).into_keys().collect();
    let mut table: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();
    for row in rows {
        let (Some(r), Some(c)) = (text(row, row_key), text(row, col_key)) else {
            continue;
        };
        let counts = table
            .entry(r.to_string())
            .or_insert_with(|| labels.iter().map(|l| (l.clone(), 0)).collect());
        *counts.entry(c.to_string()).or_insert(0) += 1;
    }
    table
}

#[allow(clippy::cast_precision_loss)]
fn percentages(counts: &BTreeMap<String, usize>) -> BTreeMap<String, f64> {
    let total: usize = counts.values().sum();
    if total == 0 {
        return BTreeMap::new();
    }
    counts
        .iter()
        .map(|(k, &n)| (k.clone(), round2(n as f64 / total as f64 * 100.0)))
        .collect()
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// City, risk and hourly figures for the air-quality table.
#[must_use]
pub fn air_quality(rows: &[Row]) -> Analysis {
    let by_city = |r: &Row| text(r, "city").map(str::to_string);
    let mean_pm2_5_by_city = mean_by(rows, by_city, "pm2_5");
    let mean_severity_by_city = mean_by(rows, by_city, "severity_score");
    let mean_pm2_5_by_hour = mean_by(rows, |r| integer(r, "hour"), "pm2_5");

    Analysis::AirQuality(AirQualityAnalysis {
        rows: rows.len(),
        top_city_by_pm2_5: argmax(&mean_pm2_5_by_city),
        top_city_by_severity: argmax(&mean_severity_by_city),
        worst_hour_by_pm2_5: argmax(&mean_pm2_5_by_hour),
        risk_flag_share: percentages(&counts_by(rows, "risk_flag")),
        risk_flags_by_city: cross_tab(rows, "city", "risk_flag"),
        mean_pm2_5_by_city,
        mean_severity_by_city,
        mean_pm2_5_by_hour,
    })
}

/// Contract, segment and tenure figures for the churn table.
#[must_use]
pub fn churn(rows: &[Row]) -> Analysis {
    let mut overall = Mean::default();
    for flag in rows.iter().filter_map(|r| number(r, "churn_flag")) {
        overall.add(flag);
    }

    Analysis::Churn(ChurnAnalysis {
        rows: rows.len(),
        churn_percentage: overall.finish().map(|rate| round2(rate * 100.0)),
        mean_monthly_charges_by_contract: mean_by(
            rows,
            |r| text(r, "contract").map(str::to_string),
            "monthly_charges",
        ),
        churn_rate_by_charge_segment: mean_by(
            rows,
            |r| text(r, "monthly_charge_segment").map(str::to_string),
            "churn_flag",
        ),
        customers_by_tenure_group: counts_by(rows, "tenure_group"),
        customers_by_internet_service: counts_by(rows, "internet_service"),
        churn_by_tenure_group: cross_tab(rows, "tenure_group", "churn"),
    })
}
