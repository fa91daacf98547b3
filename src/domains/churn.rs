//! Telco customer churn: tenure and charge segments plus model-ready flags.
//!
//! Raw fields keep the export's names (`customerID`, `MonthlyCharges`, ...);
//! columns are snake_case. Category text is lowercased. A blank or non-numeric
//! `TotalCharges` (new customers) takes the run median, and other gaps carry
//! the previous customer's value forward.

use crate::analysis;
use crate::classify::{Banding, Classifier};
use crate::clean::{Cleaner, ColumnPolicy, OnInvalid, OnMissing};
use crate::derive::{binary_flag, category_code, FeatureDeriver};
use crate::pipeline::PipelineDefinition;
use crate::schema::{ColumnDef, ColumnKind, Schema, SchemaError};
use crate::validate::Validator;
use std::sync::Arc;

pub const TARGET_TABLE: &str = "telco_churn";

pub const TENURE_GROUPS: [&str; 5] = ["0–1 year", "1–2 years", "2–4 years", "4–5 years", "5+ years"];
pub const CHARGE_SEGMENTS: [&str; 3] = ["low", "medium", "high"];

/// Contract text to code; anything else is month-to-month.
const CONTRACT_CODES: [(&str, i64); 3] = [("month-to-month", 0), ("one year", 1), ("two year", 2)];

const CATEGORY_FIELDS: [(&str, &str); 5] = [
    ("churn", "Churn"),
    ("internet_service", "InternetService"),
    ("contract", "Contract"),
    ("payment_method", "PaymentMethod"),
    ("multiple_lines", "MultipleLines"),
];

/// # Errors
/// Never fails for this fixed layout; the `Result` comes from [`Schema::new`].
pub fn schema() -> Result<Schema, SchemaError> {
    use ColumnKind::{Category, Float, Integer};
    let mut columns = vec![
        ColumnDef::source("customer_id", Category).from_field("customerID"),
        ColumnDef::source("tenure", Integer),
        ColumnDef::source("monthly_charges", Float).from_field("MonthlyCharges"),
        ColumnDef::source("total_charges", Float).from_field("TotalCharges"),
    ];
    columns.extend(
        CATEGORY_FIELDS
            .iter()
            .map(|(name, field)| ColumnDef::source(*name, Category).from_field(*field)),
    );
    columns.extend([
        ColumnDef::derived("tenure_group", Category).with_domain(TENURE_GROUPS),
        ColumnDef::derived("monthly_charge_segment", Category).with_domain(CHARGE_SEGMENTS),
        ColumnDef::derived("churn_flag", Integer).with_domain(["0", "1"]),
        ColumnDef::derived("contract_type_code", Integer).with_domain(["0", "1", "2"]),
        ColumnDef::derived("has_internet_service", Integer).with_domain(["0", "1"]),
        ColumnDef::derived("is_multi_line_user", Integer).with_domain(["0", "1"]),
    ]);
    Schema::new(columns, &["customer_id"])
}

/// # Errors
/// Never fails for this fixed layout.
pub fn definition() -> Result<PipelineDefinition, SchemaError> {
    let schema = Arc::new(schema()?);
    let carried = |kind: ColumnKind| ColumnPolicy::required(kind).on_missing(OnMissing::FillForward);

    let mut cleaner = Cleaner::builder(Arc::clone(&schema))
        .policy("customer_id", ColumnPolicy::required(ColumnKind::Category))
        .policy("tenure", carried(ColumnKind::Integer))
        .policy("monthly_charges", carried(ColumnKind::Float))
        .policy(
            "total_charges",
            ColumnPolicy::required(ColumnKind::Float)
                .on_invalid(OnInvalid::CoerceToNull)
                .on_missing(OnMissing::FillMedian),
        );
    for (name, _) in CATEGORY_FIELDS {
        cleaner = cleaner.policy(name, carried(ColumnKind::Category).lowercase());
    }
    let cleaner = cleaner.build()?;

    let deriver = FeatureDeriver::builder(Arc::clone(&schema))
        .derive("churn_flag", &["churn"], binary_flag(|s| s == "yes"))
        .derive("contract_type_code", &["contract"], category_code(&CONTRACT_CODES, 0))
        .derive("has_internet_service", &["internet_service"], binary_flag(|s| s != "no"))
        .derive("is_multi_line_user", &["multiple_lines"], binary_flag(|s| s != "no"))
        .build()?;

    let classifiers = vec![
        Classifier::new(
            &schema,
            "tenure",
            "tenure_group",
            Banding::fixed(
                vec![
                    (12.0, TENURE_GROUPS[0]),
                    (24.0, TENURE_GROUPS[1]),
                    (48.0, TENURE_GROUPS[2]),
                    (60.0, TENURE_GROUPS[3]),
                ],
                TENURE_GROUPS[4],
            )?,
        )?,
        Classifier::new(
            &schema,
            "monthly_charges",
            "monthly_charge_segment",
            Banding::fixed(
                vec![(35.0, CHARGE_SEGMENTS[0]), (70.0, CHARGE_SEGMENTS[1])],
                CHARGE_SEGMENTS[2],
            )?,
        )?,
    ];

    let validator = Validator::from_schema(&schema);
    Ok(
        PipelineDefinition::new("churn", TARGET_TABLE, cleaner, deriver, classifiers, validator)?
            .with_analysis(analysis::churn),
    )
}
