use anyhow::Result;
use ironload::*;
use std::sync::Arc;

fn schema() -> Result<Arc<Schema>> {
    Ok(Arc::new(Schema::new(
        vec![
            ColumnDef::source("customer_id", ColumnKind::Category),
            ColumnDef::source("tenure", ColumnKind::Integer),
            ColumnDef::source("note", ColumnKind::Category).nullable(),
            ColumnDef::derived("contract_type_code", ColumnKind::Integer).with_domain(["0", "1", "2"]),
        ],
        &["customer_id"],
    )?))
}

/// Staged records built straight from a code column.
fn staged(schema: &Arc<Schema>, codes: &[i64]) -> Result<Vec<EnrichedRecord>> {
    let raw: Vec<RawRecord> = codes
        .iter()
        .enumerate()
        .map(|(i, _)| {
            RawRecord::new([
                ("customer_id", RawValue::from(format!("C{i}"))),
                ("tenure", RawValue::from(12_i64)),
            ])
        })
        .collect();
    let cleaner = Cleaner::builder(Arc::clone(schema))
        .policy("customer_id", ColumnPolicy::required(ColumnKind::Category))
        .policy("tenure", ColumnPolicy::required(ColumnKind::Integer))
        .policy(
            "note",
            ColumnPolicy::required(ColumnKind::Category).on_missing(OnMissing::KeepNull),
        )
        .build()?;
    let codes = codes.to_vec();
    let position = std::sync::atomic::AtomicUsize::new(0);
    let deriver = FeatureDeriver::builder(Arc::clone(schema))
        .derive("contract_type_code", &["customer_id"], move |_: &[&Value]| {
            let i = position.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Value::Int(codes[i])
        })
        .build()?;
    Ok(deriver.derive(cleaner.clean(&raw).records))
}

fn read_back(schema: &Schema, records: &[EnrichedRecord]) -> Vec<Row> {
    records.iter().map(|r| schema.to_row(r)).collect()
}

fn assertion<'a>(report: &'a ValidationReport, check: Check, column: Option<&str>) -> &'a Assertion {
    report
        .assertions
        .iter()
        .find(|a| a.check == check && a.column.as_deref() == column)
        .unwrap_or_else(|| panic!("no {check:?} assertion for {column:?}"))
}

#[test]
fn matching_read_back_passes() -> Result<()> {
    let schema = schema()?;
    let records = staged(&schema, &[0, 1, 2])?;
    let report = Validator::from_schema(&schema).validate(&records, &read_back(&schema, &records));
    assert!(report.passed(), "{:?}", report.failures().collect::<Vec<_>>());
    assert_eq!(report.duplicate_rows, 0);
    // row count, three non-null columns, one domain
    assert_eq!(report.assertions.len(), 5);
    Ok(())
}

#[test]
fn row_count_mismatch_fails() -> Result<()> {
    let schema = schema()?;
    let records = staged(&schema, &[0, 1, 2])?;
    let mut persisted = read_back(&schema, &records);
    persisted.pop();
    let report = Validator::from_schema(&schema).validate(&records, &persisted);
    assert!(!report.passed());
    let count = assertion(&report, Check::RowCount, None);
    assert!(!count.passed);
    assert_eq!(count.detail, "staged=3 persisted=2");
    Ok(())
}

#[test]
fn nulls_and_missing_columns_fail_not_null() -> Result<()> {
    let schema = schema()?;
    let records = staged(&schema, &[0, 1])?;
    let mut persisted = read_back(&schema, &records);
    persisted[0].insert("tenure".into(), Value::Null);
    persisted[1].remove("customer_id");
    let report = Validator::from_schema(&schema).validate(&records, &persisted);

    assert!(!assertion(&report, Check::NotNull, Some("tenure")).passed);
    assert!(!assertion(&report, Check::NotNull, Some("customer_id")).passed);
    assert!(assertion(&report, Check::NotNull, Some("contract_type_code")).passed);
    assert!(assertion(&report, Check::RowCount, None).passed);
    Ok(())
}

#[test]
fn out_of_domain_values_fail() -> Result<()> {
    let schema = schema()?;
    let records = staged(&schema, &[0, 1])?;
    let mut persisted = read_back(&schema, &records);
    persisted[1].insert("contract_type_code".into(), Value::Int(7));
    let report = Validator::from_schema(&schema).validate(&records, &persisted);
    let domain = assertion(&report, Check::Domain, Some("contract_type_code"));
    assert!(!domain.passed);
    assert!(domain.detail.contains('7'));
    Ok(())
}

#[test]
fn extra_declarations_extend_the_defaults() -> Result<()> {
    let schema = schema()?;
    let records = staged(&schema, &[0])?;
    let persisted = read_back(&schema, &records);
    let report = Validator::from_schema(&schema)
        .with_non_null("note")
        .with_domain("customer_id", ["C1"])
        .validate(&records, &persisted);
    assert!(!assertion(&report, Check::NotNull, Some("note")).passed);
    assert!(!assertion(&report, Check::Domain, Some("customer_id")).passed);
    Ok(())
}

#[test]
fn duplicate_rows_are_counted_but_do_not_fail() -> Result<()> {
    let schema = schema()?;
    let records = staged(&schema, &[0, 1])?;
    let mut persisted = read_back(&schema, &records);
    persisted[1] = persisted[0].clone();
    let report = Validator::from_schema(&schema).validate(&records, &persisted);
    assert_eq!(report.duplicate_rows, 1);
    assert!(report.passed());
    Ok(())
}

#[test]
fn unreadable_table_reports_a_failed_read_back() {
    let err = StoreError::new(StoreErrorKind::Unavailable, "connection reset");
    let report = ValidationReport::read_back_failed(4, &err);
    assert!(!report.passed());
    assert_eq!(report.assertions[0].check, Check::ReadBack);
    assert!(report.assertions[0].detail.contains("connection reset"));
}
