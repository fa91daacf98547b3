//! Delivery performance: delays, agent scores and route traffic risk.
//!
//! Deliveries are left-joined to a traffic table on
//! `(source_city, destination_city)`. Routes without traffic data take
//! congestion 5, speed 40 and warning `"none"`.

use crate::classify::{Banding, Classifier, CutPoints};
use crate::clean::{Cleaner, ColumnPolicy, OnMissing};
use crate::derive::{bucket, guard_zero, guarded_div, minutes_between, numeric, ExactLookup, FeatureDeriver, Lookup, SideJoin};
use crate::pipeline::PipelineDefinition;
use crate::record::RawRecord;
use crate::schema::{ColumnDef, ColumnKind, Schema, SchemaError};
use crate::validate::Validator;
use crate::value::{parse_cell, Parsed, RawValue, Value};
use std::sync::Arc;

pub const TARGET_TABLE: &str = "deliveries";

pub const DELAY_CLASSES: [&str; 4] = ["On-Time", "Slight Delay", "Major Delay", "Critical Delay"];
pub const RISK_LEVELS: [&str; 3] = ["Low Risk", "Moderate Risk", "High Risk"];

const DEFAULT_CONGESTION: f64 = 5.0;
const DEFAULT_SPEED: f64 = 40.0;
const DEFAULT_WARNING: &str = "none";

/// Congestion, speed and warning per route.
const TRAFFIC_WIDTH: usize = 3;

/// # Errors
/// Never fails for this fixed layout; the `Result` comes from [`Schema::new`].
pub fn schema() -> Result<Schema, SchemaError> {
    use ColumnKind::{Category, Float, Integer, Timestamp};
    Schema::new(
        vec![
            ColumnDef::source("shipment_id", Category),
            ColumnDef::source("source_city", Category),
            ColumnDef::source("destination_city", Category),
            ColumnDef::source("dispatch_time", Timestamp),
            ColumnDef::source("expected_delivery_time", Timestamp),
            ColumnDef::source("actual_delivery_time", Timestamp),
            ColumnDef::source("package_weight", Float),
            ColumnDef::source("delivery_agent_id", Category).nullable(),
            ColumnDef::derived("congestion_score", Float),
            ColumnDef::derived("avg_route_speed", Float),
            ColumnDef::derived("weather_warnings", Category),
            ColumnDef::derived("delay_minutes", Float),
            ColumnDef::derived("delay_class", Category).with_domain(DELAY_CLASSES),
            ColumnDef::derived("agent_score", Integer).with_domain(["1", "2", "3", "4", "5"]),
            ColumnDef::derived("traffic_impact_score", Float),
            ColumnDef::derived("predicted_delay_risk_level", Category).with_domain(RISK_LEVELS),
            ColumnDef::derived("delivery_efficiency_index", Float),
        ],
        &["shipment_id"],
    )
}

/// Build the traffic side table from raw traffic records.
///
/// City-level records (a `city_name` instead of a route) apply to the route
/// from and to that city. The older field names `avg_speed` and
/// `weather_warning` are accepted. Records with no route are skipped, and
/// the first record for a route wins.
#[must_use]
pub fn traffic_lookup(records: &[RawRecord]) -> ExactLookup {
    let mut table = ExactLookup::new(TRAFFIC_WIDTH);
    let mut skipped = 0usize;
    for rec in records {
        let city = rec.get("city_name");
        let (Some(source), Some(destination)) = (
            text_field(rec.get("source_city").or(city)),
            text_field(rec.get("destination_city").or(city)),
        ) else {
            skipped += 1;
            continue;
        };
        let row = vec![
            typed(rec.get("congestion_score"), ColumnKind::Float),
            typed(rec.get("avg_route_speed").or_else(|| rec.get("avg_speed")), ColumnKind::Float),
            typed(rec.get("weather_warnings").or_else(|| rec.get("weather_warning")), ColumnKind::Category),
        ];
        table.insert(&[source, destination], row);
    }
    if skipped > 0 {
        tracing::warn!(skipped, "traffic records without a route");
    }
    tracing::debug!(routes = table.len(), "built traffic lookup");
    table
}

fn text_field(raw: Option<&RawValue>) -> Option<Value> {
    match parse_cell(raw, ColumnKind::Category) {
        Parsed::Present(v) if !v.is_null() => Some(v),
        _ => None,
    }
}

/// Unparseable side-table cells become null so the join default applies.
fn typed(raw: Option<&RawValue>, kind: ColumnKind) -> Value {
    match parse_cell(raw, kind) {
        Parsed::Present(v) => v,
        Parsed::Missing | Parsed::Invalid(_) => Value::Null,
    }
}

/// The deliveries pipeline, joined against `traffic`.
///
/// # Errors
/// Fails only if `traffic` does not yield three values per route.
pub fn definition(traffic: Arc<dyn Lookup>) -> Result<PipelineDefinition, SchemaError> {
    let schema = Arc::new(schema()?);
    let required = ColumnPolicy::required;

    let cleaner = Cleaner::builder(Arc::clone(&schema))
        .policy("shipment_id", required(ColumnKind::Category))
        .policy("source_city", required(ColumnKind::Category))
        .policy("destination_city", required(ColumnKind::Category))
        .policy("dispatch_time", required(ColumnKind::Timestamp))
        .policy("expected_delivery_time", required(ColumnKind::Timestamp))
        .policy("actual_delivery_time", required(ColumnKind::Timestamp))
        .policy("package_weight", required(ColumnKind::Float))
        .policy(
            "delivery_agent_id",
            required(ColumnKind::Category).on_missing(OnMissing::KeepNull),
        )
        // grams to kilograms
        .normalize_units("package_weight", 1000.0, 1000.0)
        .require_not_before("actual_delivery_time", "expected_delivery_time")
        .build()?;

    let agent_score = CutPoints::new(
        vec![(0.0, 5.0), (30.0, 4.0), (60.0, 3.0), (180.0, 2.0)],
        1.0,
    )?;

    let deriver = FeatureDeriver::builder(Arc::clone(&schema))
        .join(
            SideJoin::new(traffic, &["source_city", "destination_city"])
                .output("congestion_score", DEFAULT_CONGESTION)
                .output("avg_route_speed", DEFAULT_SPEED)
                .output("weather_warnings", DEFAULT_WARNING),
        )
        .derive(
            "delay_minutes",
            &["actual_delivery_time", "expected_delivery_time"],
            minutes_between(),
        )
        .derive("agent_score", &["delay_minutes"], bucket(agent_score))
        .derive(
            "traffic_impact_score",
            &["congestion_score", "avg_route_speed"],
            guarded_div(10.0),
        )
        .derive(
            "delivery_efficiency_index",
            &["package_weight", "delay_minutes", "agent_score"],
            numeric(|x| x[0] / guard_zero(x[1] + 1.0) * x[2]).expecting(3),
        )
        .build()?;

    let classifiers = vec![
        Classifier::new(
            &schema,
            "delay_minutes",
            "delay_class",
            Banding::fixed(
                vec![(0.0, "On-Time"), (60.0, "Slight Delay"), (180.0, "Major Delay")],
                "Critical Delay",
            )?,
        )?,
        Classifier::new(
            &schema,
            "traffic_impact_score",
            "predicted_delay_risk_level",
            Banding::fixed(vec![(7.0, "Low Risk"), (15.0, "Moderate Risk")], "High Risk")?,
        )?,
    ];

    let validator = Validator::from_schema(&schema);
    PipelineDefinition::new("logistics", TARGET_TABLE, cleaner, deriver, classifiers, validator)
}
