use anyhow::Result;
use ironload::source::{flatten_hourly, records_from_json_array};
use ironload::*;
use serde_json::json;
use std::fs;
use std::path::PathBuf;
use tempfile::tempdir;

fn no_wait(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts, Backoff::none())
}

#[test]
fn json_array_source_reads_one_record_per_object() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("deliveries.json");
    fs::write(
        &path,
        r#"[{"shipment_id": "SHP001", "package_weight": 2.5}, {"shipment_id": "SHP002", "package_weight": null}]"#,
    )?;
    let records = JsonArraySource::new(&path).fetch()?;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].get("package_weight"), Some(&RawValue::Number(2.5)));
    assert_eq!(records[1].get("package_weight"), Some(&RawValue::Null));
    Ok(())
}

#[test]
fn json_array_rejects_other_shapes() {
    assert!(records_from_json_array(&json!({"a": 1})).is_err());
    let err = records_from_json_array(&json!([{"a": 1}, 2])).unwrap_err();
    assert!(err.contains("element 1"));
}

#[test]
fn csv_source_trims_headers_and_keeps_cells_as_text() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("telco.csv");
    fs::write(&path, "customerID, tenure ,TotalCharges\n7590-VHVEG,1, \n")?;
    let records = CsvSource::new(&path).fetch()?;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].get("tenure"), Some(&RawValue::from("1")));
    assert!(records[0].get("TotalCharges").is_some_and(RawValue::is_missing));
    Ok(())
}

#[test]
fn hourly_payload_flattens_with_padding_and_trimming() -> Result<()> {
    let payload = json!({
        "latitude": 28.6,
        "longitude": 77.2,
        "hourly": {
            "time": ["2025-12-11T00:00", "2025-12-11T01:00", "2025-12-11T02:00"],
            "pm2_5": [40.0, 55.5],
            "pm10": [1.0, 2.0, 3.0, 4.0]
        }
    });
    let metrics = vec!["pm2_5".to_string(), "pm10".to_string(), "ozone".to_string()];
    let records = flatten_hourly(&payload, &metrics).map_err(anyhow::Error::msg)?;

    assert_eq!(records.len(), 3);
    assert_eq!(records[0].get("latitude"), Some(&RawValue::Number(28.6)));
    assert_eq!(records[2].get("time"), Some(&RawValue::from("2025-12-11T02:00")));
    assert_eq!(records[1].get("pm2_5"), Some(&RawValue::Number(55.5)));
    assert_eq!(records[2].get("pm2_5"), Some(&RawValue::Null));
    assert_eq!(records[2].get("pm10"), Some(&RawValue::Number(3.0)));
    assert_eq!(records[0].get("ozone"), Some(&RawValue::Null));
    Ok(())
}

#[test]
fn hourly_payload_without_times_is_empty() -> Result<()> {
    let payload = json!({"latitude": 1.0, "longitude": 2.0, "hourly": {"pm10": [1.0]}});
    let records = flatten_hourly(&payload, &["pm10".to_string()]).map_err(anyhow::Error::msg)?;
    assert!(records.is_empty());
    Ok(())
}

#[test]
fn glob_source_reads_matches_in_sorted_order() -> Result<()> {
    let dir = tempdir()?;
    for (name, id) in [("b.json", "second"), ("a.json", "first"), ("c.txt", "ignored")] {
        fs::write(dir.path().join(name), format!(r#"[{{"id": "{id}"}}]"#))?;
    }
    let pattern = dir.path().join("*.json").display().to_string();
    let source = GlobSource::new(pattern, |p: PathBuf| -> Box<dyn RecordSource> {
        Box::new(JsonArraySource::new(p))
    });

    let names: Vec<String> = source
        .paths()?
        .iter()
        .filter_map(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, ["a.json", "b.json"]);

    let ids: Vec<RawValue> = source.fetch()?.iter().filter_map(|r| r.get("id").cloned()).collect();
    assert_eq!(ids, [RawValue::from("first"), RawValue::from("second")]);
    assert_eq!(source.units()?.len(), 2);
    Ok(())
}

#[test]
fn missing_unit_is_reported_and_others_still_extract() -> Result<()> {
    let dir = tempdir()?;
    let present = dir.path().join("present.json");
    fs::write(&present, r#"[{"id": 1}, {"id": 2}]"#)?;

    let sources: Vec<Box<dyn RecordSource>> = vec![
        Box::new(JsonArraySource::new(dir.path().join("absent.json"))),
        Box::new(JsonArraySource::new(&present)),
    ];
    let extraction = extract(&sources, &no_wait(3));

    assert_eq!(extraction.records.len(), 2);
    let failed: Vec<&UnitOutcome> = extraction.failed_units().collect();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].unit.ends_with("absent.json"));
    // a missing file is not retried
    assert_eq!(failed[0].attempts, 1);
    assert_eq!(extraction.units[1].rows, 2);
    Ok(())
}

struct Flaky {
    failures: std::cell::Cell<u32>,
}

impl RecordSource for Flaky {
    fn name(&self) -> &str {
        "flaky-api"
    }

    fn fetch(&self) -> std::result::Result<Vec<RawRecord>, SourceError> {
        if self.failures.get() > 0 {
            self.failures.set(self.failures.get() - 1);
            return Err(SourceError::transient("flaky-api", "HTTP 503"));
        }
        Ok(vec![RawRecord::new([("id", "x")])])
    }
}

#[test]
fn transient_unit_failures_are_retried() {
    let sources: Vec<Box<dyn RecordSource>> = vec![Box::new(Flaky {
        failures: std::cell::Cell::new(2),
    })];
    let extraction = extract(&sources, &no_wait(3));
    assert_eq!(extraction.units[0].attempts, 3);
    assert!(extraction.units[0].error.is_none());
    assert_eq!(extraction.records.len(), 1);

    let sources: Vec<Box<dyn RecordSource>> = vec![Box::new(Flaky {
        failures: std::cell::Cell::new(5),
    })];
    let extraction = extract(&sources, &no_wait(2));
    assert_eq!(extraction.units[0].attempts, 2);
    assert!(extraction.units[0].error.as_deref().is_some_and(|e| e.contains("503")));
    assert!(extraction.records.is_empty());
}
