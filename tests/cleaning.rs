use anyhow::Result;
use ironload::*;
use std::sync::Arc;

#[macro_use]
mod macros;

fn readings_schema() -> Result<Arc<Schema>> {
    Ok(Arc::new(Schema::new(
        vec![
            ColumnDef::source("id", ColumnKind::Category),
            ColumnDef::source("reading", ColumnKind::Float).from_field("Reading"),
            ColumnDef::source("site", ColumnKind::Category),
            ColumnDef::source("note", ColumnKind::Category).nullable(),
        ],
        &["id"],
    )?))
}

fn row(id: &str, reading: RawValue, site: Option<&str>) -> RawRecord {
    RawRecord::new([
        ("id", RawValue::from(id)),
        ("Reading", reading),
        ("site", RawValue::from(site)),
    ])
}

fn cleaner(schema: &Arc<Schema>) -> Result<Cleaner> {
    Ok(Cleaner::builder(Arc::clone(schema))
        .policy("id", ColumnPolicy::required(ColumnKind::Category))
        .policy(
            "reading",
            ColumnPolicy::required(ColumnKind::Float)
                .on_invalid(OnInvalid::CoerceToNull)
                .on_missing(OnMissing::FillMedian),
        )
        .policy(
            "site",
            ColumnPolicy::required(ColumnKind::Category)
                .on_missing(OnMissing::FillForward)
                .lowercase(),
        )
        .policy(
            "note",
            ColumnPolicy::required(ColumnKind::Category).on_missing(OnMissing::KeepNull),
        )
        .build()?)
}

#[test]
fn invalid_numbers_take_the_median() -> Result<()> {
    let schema = readings_schema()?;
    let out = cleaner(&schema)?.clean(&[
        row("a", RawValue::from(10.0), Some("North")),
        row("b", RawValue::from(" "), Some("North")),
        row("c", RawValue::from("n/a"), Some("South")),
        row("d", RawValue::from("30"), Some("South")),
    ]);
    assert!(out.drops.is_empty());
    let reading = schema.column("reading")?;
    let values: Vec<f64> = out
        .records
        .iter()
        .map(|r| r.get(reading).as_f64().unwrap())
        .collect();
    assert_approx_eq!(values[1], 20.0);
    assert_approx_eq!(values[2], 20.0);
    assert_approx_eq!(values[3], 30.0);
    Ok(())
}

#[test]
fn forward_fill_and_lowercase() -> Result<()> {
    let schema = readings_schema()?;
    let out = cleaner(&schema)?.clean(&[
        row("a", RawValue::from(1.0), None),
        row("b", RawValue::from(2.0), Some("  NORTH ")),
        row("c", RawValue::from(3.0), None),
    ]);
    let site = schema.column("site")?;
    assert_eq!(out.records.len(), 2);
    assert_eq!(out.records[0].get(site), &Value::from("north"));
    assert_eq!(out.records[1].get(site), &Value::from("north"));
    assert_eq!(out.drops.len(), 1);
    assert_eq!(out.drops.drops()[0].row_index, 0);
    assert_eq!(
        out.drops.drops()[0].reason,
        DropReason::NothingToCarry {
            column: "site".into()
        }
    );
    Ok(())
}

#[test]
fn duplicates_keep_the_first_row() -> Result<()> {
    let schema = readings_schema()?;
    let out = cleaner(&schema)?.clean(&[
        row("a", RawValue::from(1.0), Some("n")),
        row("a", RawValue::from(2.0), Some("n")),
        row("b", RawValue::from(3.0), Some("n")),
    ]);
    assert_eq!(out.records.len(), 2);
    assert_eq!(out.drops.counts_by_reason().get("duplicate"), Some(&1));
    assert_eq!(out.drops.drops()[0].reason, DropReason::Duplicate { first_row: 0 });
    assert_eq!(out.drops.drops()[0].key, "a");
    Ok(())
}

#[test]
fn composite_keys_compare_part_by_part() -> Result<()> {
    let schema = Arc::new(Schema::new(
        vec![
            ColumnDef::source("a", ColumnKind::Category),
            ColumnDef::source("b", ColumnKind::Category),
        ],
        &["a", "b"],
    )?);
    let cleaner = Cleaner::builder(Arc::clone(&schema))
        .policy("a", ColumnPolicy::required(ColumnKind::Category))
        .policy("b", ColumnPolicy::required(ColumnKind::Category))
        .build()?;
    let out = cleaner.clean(&[
        RawRecord::new([("a", "x|y"), ("b", "z")]),
        RawRecord::new([("a", "x"), ("b", "y|z")]),
        RawRecord::new([("a", "x"), ("b", "y|z")]),
    ]);
    assert_eq!(out.records.len(), 2);
    assert_eq!(out.drops.len(), 1);
    assert_eq!(out.drops.drops()[0].reason, DropReason::Duplicate { first_row: 1 });

    let first = schema.key_of(&out.records[0]);
    let second = schema.key_of(&out.records[1]);
    assert_eq!(first, ["x|y", "z"]);
    assert_ne!(first, second);
    Ok(())
}

#[test]
fn missing_required_value_drops_the_row() -> Result<()> {
    let schema = readings_schema()?;
    let out = cleaner(&schema)?.clean(&[
        RawRecord::new([("Reading", RawValue::from(1.0)), ("site", RawValue::from("n"))]),
        row("b", RawValue::from(2.0), Some("n")),
    ]);
    assert_eq!(out.records.len(), 1);
    assert_eq!(
        out.drops.drops()[0].reason,
        DropReason::Missing { column: "id".into() }
    );
    Ok(())
}

#[test]
fn every_required_column_is_non_null_after_cleaning() -> Result<()> {
    let schema = readings_schema()?;
    let out = cleaner(&schema)?.clean(&[
        row("a", RawValue::Null, Some("n")),
        row("b", RawValue::from(4.0), None),
        row("c", RawValue::from("bad"), Some("s")),
    ]);
    for rec in &out.records {
        for (id, def) in schema.source_columns() {
            if !def.nullable {
                assert!(!rec.get(id).is_null(), "{} is null", def.name);
            }
        }
    }
    Ok(())
}

fn shipments_schema() -> Result<Arc<Schema>> {
    Ok(Arc::new(Schema::new(
        vec![
            ColumnDef::source("id", ColumnKind::Category),
            ColumnDef::source("expected", ColumnKind::Timestamp),
            ColumnDef::source("actual", ColumnKind::Timestamp),
            ColumnDef::source("weight", ColumnKind::Float),
        ],
        &["id"],
    )?))
}

fn shipment(id: &str, expected: &str, actual: &str, weight: f64) -> RawRecord {
    RawRecord::new([
        ("id", RawValue::from(id)),
        ("expected", RawValue::from(expected)),
        ("actual", RawValue::from(actual)),
        ("weight", RawValue::from(weight)),
    ])
}

fn shipments_cleaner(schema: &Arc<Schema>) -> Result<Cleaner> {
    Ok(Cleaner::builder(Arc::clone(schema))
        .policy("id", ColumnPolicy::required(ColumnKind::Category))
        .policy("expected", ColumnPolicy::required(ColumnKind::Timestamp))
        .policy("actual", ColumnPolicy::required(ColumnKind::Timestamp))
        .policy("weight", ColumnPolicy::required(ColumnKind::Float))
        .normalize_units("weight", 1000.0, 1000.0)
        .require_not_before("actual", "expected")
        .build()?)
}

#[test]
fn early_delivery_is_excluded_not_repaired() -> Result<()> {
    let schema = shipments_schema()?;
    let out = shipments_cleaner(&schema)?.clean(&[
        shipment("s1", "2025-12-11T16:00:00", "2025-12-11T16:30:00", 12.5),
        shipment("s2", "2025-12-11T14:00:00", "2025-12-11T13:50:00", 7.2),
    ]);
    assert_eq!(out.records.len(), 1);
    assert_eq!(out.drops.counts_by_reason().get("precondition"), Some(&1));
    assert_eq!(out.drops.drops()[0].key, "s2");
    Ok(())
}

#[test]
fn unparseable_timestamp_drops_the_row() -> Result<()> {
    let schema = shipments_schema()?;
    let out = shipments_cleaner(&schema)?.clean(&[shipment(
        "s1",
        "tomorrow",
        "2025-12-11T16:30:00",
        1.0,
    )]);
    assert!(out.records.is_empty());
    assert!(matches!(
        &out.drops.drops()[0].reason,
        DropReason::Invalid { column, .. } if column == "expected"
    ));
    Ok(())
}

#[test]
fn grams_are_converted_when_the_maximum_exceeds_the_threshold() -> Result<()> {
    let schema = shipments_schema()?;
    let c = shipments_cleaner(&schema)?;
    let weight = schema.column("weight")?;

    let out = c.clean(&[
        shipment("s1", "2025-12-11T16:00:00", "2025-12-11T16:00:00", 12_500.0),
        shipment("s2", "2025-12-11T16:00:00", "2025-12-11T16:00:00", 800.0),
    ]);
    assert_eq!(out.normalized, vec!["weight".to_string()]);
    assert_approx_eq!(out.records[0].get(weight).as_f64().unwrap(), 12.5);
    assert_approx_eq!(out.records[1].get(weight).as_f64().unwrap(), 0.8);

    let out = c.clean(&[shipment("s1", "2025-12-11T16:00:00", "2025-12-11T16:00:00", 1000.0)]);
    assert!(out.normalized.is_empty());
    assert_approx_eq!(out.records[0].get(weight).as_f64().unwrap(), 1000.0);
    Ok(())
}

#[test]
fn rows_with_every_reading_missing_are_dropped() -> Result<()> {
    let schema = Arc::new(Schema::new(
        vec![
            ColumnDef::source("t", ColumnKind::Integer),
            ColumnDef::source("pm10", ColumnKind::Float).nullable(),
            ColumnDef::source("ozone", ColumnKind::Float).nullable(),
        ],
        &["t"],
    )?);
    let keep_null = ColumnPolicy::required(ColumnKind::Float).on_missing(OnMissing::KeepNull);
    let c = Cleaner::builder(Arc::clone(&schema))
        .policy("t", ColumnPolicy::required(ColumnKind::Integer))
        .policy("pm10", keep_null.clone())
        .policy("ozone", keep_null)
        .require_any(&["pm10", "ozone"])
        .build()?;
    let out = c.clean(&[
        RawRecord::new([("t", RawValue::from(1_i64)), ("pm10", RawValue::from(3.0))]),
        RawRecord::new([("t", RawValue::from(2_i64))]),
    ]);
    assert_eq!(out.records.len(), 1);
    assert!(out.records[0].get(schema.column("ozone")?).is_null());
    assert_eq!(out.drops.counts_by_reason().get("all_missing"), Some(&1));
    Ok(())
}

#[test]
fn builder_rejects_inconsistent_policies() -> Result<()> {
    let schema = readings_schema()?;
    let missing_policy = Cleaner::builder(Arc::clone(&schema))
        .policy("id", ColumnPolicy::required(ColumnKind::Category))
        .build();
    assert!(matches!(missing_policy, Err(SchemaError::InvalidColumn { .. })));

    let wrong_kind = Cleaner::builder(Arc::clone(&schema))
        .policy("id", ColumnPolicy::required(ColumnKind::Float))
        .build();
    assert!(wrong_kind.is_err());

    let median_on_text = Cleaner::builder(Arc::clone(&schema))
        .policy(
            "site",
            ColumnPolicy::required(ColumnKind::Category).on_missing(OnMissing::FillMedian),
        )
        .build();
    assert!(median_on_text.is_err());
    Ok(())
}

#[test]
fn drop_log_round_trips_through_a_file() -> Result<()> {
    let schema = readings_schema()?;
    let out = cleaner(&schema)?.clean(&[
        row("a", RawValue::from(1.0), Some("n")),
        row("a", RawValue::from(1.0), Some("n")),
    ]);
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("drops.json");
    out.drops.write_to_file(&path)?;
    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    assert_eq!(json[0]["reason"], "duplicate");
    assert_eq!(json[0]["first_row"], 0);
    assert_eq!(json[0]["row_index"], 1);
    Ok(())
}
