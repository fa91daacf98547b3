//! Urban air quality: hourly pollutant readings per monitored city.
//!
//! Rows are keyed by `(latitude, longitude, time)`. The city comes from the
//! nearest registered coordinate within 0.2 degrees on both axes, else
//! `"Unknown"`. Rows with every pollutant missing are dropped; individual
//! gaps stay null and make the dependent derived values null too.

use crate::analysis;
use crate::classify::{Banding, Classifier, PercentileBands};
use crate::clean::{Cleaner, ColumnPolicy, OnInvalid, OnMissing};
use crate::derive::{hour_of_day, weighted_sum, FeatureDeriver, ProximityLookup, SideJoin};
use crate::pipeline::PipelineDefinition;
use crate::schema::{ColumnDef, ColumnKind, Schema, SchemaError};
use crate::source::HourlySeriesSource;
use crate::validate::Validator;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

pub const TARGET_TABLE: &str = "air_quality_data";

pub const POLLUTANTS: [&str; 7] = [
    "pm10",
    "pm2_5",
    "carbon_monoxide",
    "nitrogen_dioxide",
    "sulphur_dioxide",
    "ozone",
    "uv_index",
];

pub const AQI_CATEGORIES: [&str; 5] = ["Good", "Moderate", "Unhealthy", "Very Unhealthy", "Hazardous"];
pub const RISK_FLAGS: [&str; 3] = ["Low Risk", "Moderate Risk", "High Risk"];

/// Monitored cities and their reference coordinates.
pub const CITIES: [(&str, f64, f64); 5] = [
    ("Delhi", 28.7041, 77.1025),
    ("Mumbai", 19.0760, 72.8777),
    ("Bengaluru", 12.9716, 77.5946),
    ("Hyderabad", 17.3850, 78.4867),
    ("Kolkata", 22.5726, 88.3639),
];

const CITY_TOLERANCE_DEG: f64 = 0.2;
const UNKNOWN_CITY: &str = "Unknown";

/// Severity weights, in `SEVERITY_INPUTS` order.
const SEVERITY_INPUTS: [&str; 6] = [
    "pm2_5",
    "pm10",
    "nitrogen_dioxide",
    "sulphur_dioxide",
    "carbon_monoxide",
    "ozone",
];
const SEVERITY_WEIGHTS: [f64; 6] = [5.0, 3.0, 4.0, 4.0, 2.0, 3.0];

/// How `risk_flag` bands `severity_score`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskBanding {
    /// Low up to 200, moderate up to 400, high above.
    #[default]
    Fixed,
    /// Tertiles (0.33, 0.66) of the run's severity scores.
    Percentile,
}

/// # Errors
/// Never fails for this fixed layout; the `Result` comes from [`Schema::new`].
pub fn schema() -> Result<Schema, SchemaError> {
    use ColumnKind::{Category, Float, Integer, Timestamp};
    let mut columns = vec![
        ColumnDef::source("latitude", Float),
        ColumnDef::source("longitude", Float),
        ColumnDef::source("time", Timestamp),
    ];
    columns.extend(POLLUTANTS.iter().map(|p| ColumnDef::source(*p, Float).nullable()));
    columns.extend([
        ColumnDef::derived("city", Category),
        ColumnDef::derived("aqi_category", Category)
            .nullable()
            .with_domain(AQI_CATEGORIES),
        ColumnDef::derived("severity_score", Float).nullable(),
        ColumnDef::derived("risk_flag", Category).nullable().with_domain(RISK_FLAGS),
        ColumnDef::derived("hour", Integer),
    ]);
    Schema::new(columns, &["latitude", "longitude", "time"])
}

#[must_use]
pub fn city_lookup() -> ProximityLookup {
    CITIES
        .iter()
        .fold(ProximityLookup::new(CITY_TOLERANCE_DEG, 1), |table, (name, lat, lon)| {
            table.point(*lat, *lon, vec![(*name).into()])
        })
}

/// A source reading one hourly-series payload with every pollutant.
pub fn hourly_source(path: impl Into<PathBuf>) -> HourlySeriesSource {
    HourlySeriesSource::new(path, POLLUTANTS)
}

fn risk_banding(mode: RiskBanding) -> Result<Banding, SchemaError> {
    match mode {
        RiskBanding::Fixed => Banding::fixed(
            vec![(200.0, RISK_FLAGS[0]), (400.0, RISK_FLAGS[1])],
            RISK_FLAGS[2],
        ),
        RiskBanding::Percentile => Ok(Banding::Percentile(PercentileBands::tertiles(RISK_FLAGS)?)),
    }
}

/// # Errors
/// Never fails for this fixed layout.
pub fn definition(risk: RiskBanding) -> Result<PipelineDefinition, SchemaError> {
    let schema = Arc::new(schema()?);

    let mut cleaner = Cleaner::builder(Arc::clone(&schema))
        .policy("latitude", ColumnPolicy::required(ColumnKind::Float))
        .policy("longitude", ColumnPolicy::required(ColumnKind::Float))
        .policy("time", ColumnPolicy::required(ColumnKind::Timestamp));
    for p in POLLUTANTS {
        cleaner = cleaner.policy(
            p,
            ColumnPolicy::required(ColumnKind::Float)
                .on_invalid(OnInvalid::CoerceToNull)
                .on_missing(OnMissing::KeepNull),
        );
    }
    let cleaner = cleaner.require_any(&POLLUTANTS).build()?;

    let deriver = FeatureDeriver::builder(Arc::clone(&schema))
        .join(SideJoin::new(Arc::new(city_lookup()), &["latitude", "longitude"]).output("city", UNKNOWN_CITY))
        .derive(
            "severity_score",
            &SEVERITY_INPUTS,
            weighted_sum(SEVERITY_WEIGHTS.to_vec()),
        )
        .derive("hour", &["time"], hour_of_day())
        .build()?;

    let classifiers = vec![
        Classifier::new(
            &schema,
            "pm2_5",
            "aqi_category",
            Banding::fixed(
                vec![
                    (50.0, AQI_CATEGORIES[0]),
                    (100.0, AQI_CATEGORIES[1]),
                    (200.0, AQI_CATEGORIES[2]),
                    (300.0, AQI_CATEGORIES[3]),
                ],
                AQI_CATEGORIES[4],
            )?,
        )?,
        Classifier::new(&schema, "severity_score", "risk_flag", risk_banding(risk)?)?,
    ];

    let validator = Validator::from_schema(&schema);
    Ok(
        PipelineDefinition::new("air_quality", TARGET_TABLE, cleaner, deriver, classifiers, validator)?
            .with_analysis(analysis::air_quality),
    )
}
