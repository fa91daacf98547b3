use anyhow::Result;
use ironload::*;
use std::fs;
use tempfile::tempdir;

fn schema() -> Result<Schema> {
    Ok(Schema::new(
        vec![
            ColumnDef::source("shipment_id", ColumnKind::Category),
            ColumnDef::source("dispatch_time", ColumnKind::Timestamp),
            ColumnDef::derived("delay_minutes", ColumnKind::Float),
            ColumnDef::derived("agent_score", ColumnKind::Integer),
            ColumnDef::derived("weather_warnings", ColumnKind::Category).nullable(),
        ],
        &["shipment_id"],
    )?)
}

const STAGED: &str = "\
shipment_id,dispatch_time,delay_minutes,agent_score,weather_warnings
SHP001,2025-12-11 08:00:00,0,5,none
SHP002,2025-12-11 09:15:00,90.5,2,
";

#[test]
fn staged_csv_reads_into_schema_layout() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("staged.csv");
    fs::write(&path, STAGED)?;
    let schema = schema()?;

    let records = read_staged(&path, &schema)?;
    assert_eq!(records.len(), 2);
    let delay = schema.column("delay_minutes")?;
    let warn = schema.column("weather_warnings")?;
    let score = schema.column("agent_score")?;
    assert_eq!(records[1].get(delay), &Value::Float(90.5));
    assert_eq!(records[1].get(score), &Value::Int(2));
    assert!(records[1].get(warn).is_null());
    assert_eq!(records[0].get(warn), &Value::from("none"));
    Ok(())
}

#[test]
fn write_then_read_preserves_every_cell() -> Result<()> {
    let dir = tempdir()?;
    let source = dir.path().join("in.csv");
    fs::write(&source, STAGED)?;
    let schema = schema()?;
    let records = read_staged(&source, &schema)?;

    let out = dir.path().join("nested/out/staged.csv");
    assert_eq!(write_staged(&out, &schema, &records)?, 2);
    let header = fs::read_to_string(&out)?;
    assert!(header.starts_with("shipment_id,dispatch_time,delay_minutes,agent_score,weather_warnings"));
    assert_eq!(read_staged(&out, &schema)?, records);
    Ok(())
}

#[cfg(feature = "compression-gzip")]
#[test]
fn gzip_artifacts_are_transparent() -> Result<()> {
    let dir = tempdir()?;
    let source = dir.path().join("in.csv");
    fs::write(&source, STAGED)?;
    let schema = schema()?;
    let records = read_staged(&source, &schema)?;

    let out = dir.path().join("staged.csv.gz");
    write_staged(&out, &schema, &records)?;
    let bytes = fs::read(&out)?;
    assert_eq!(&bytes[..2], &[0x1f, 0x8b]);
    assert_eq!(read_staged(&out, &schema)?, records);
    Ok(())
}

#[test]
fn reordered_columns_are_accepted() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("staged.csv");
    fs::write(
        &path,
        "agent_score,shipment_id,weather_warnings,delay_minutes,dispatch_time\n4,SHP009,fog,12,2025-12-11T10:00:00\n",
    )?;
    let schema = schema()?;
    let records = read_staged(&path, &schema)?;
    assert_eq!(records[0].get(schema.column("shipment_id")?), &Value::from("SHP009"));
    assert_eq!(records[0].get(schema.column("agent_score")?), &Value::Int(4));
    Ok(())
}

#[test]
fn header_must_match_the_schema() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("staged.csv");
    fs::write(
        &path,
        "shipment_id,dispatch_time,delay_minutes,agent_score,comment\nSHP001,2025-12-11 08:00:00,0,5,hi\n",
    )?;
    match read_staged(&path, &schema()?) {
        Err(StagingError::ColumnMismatch { missing, extra }) => {
            assert_eq!(missing, vec!["weather_warnings".to_string()]);
            assert_eq!(extra, vec!["comment".to_string()]);
        }
        other => panic!("expected a column mismatch, got {other:?}"),
    }
    Ok(())
}

#[test]
fn repeated_header_names_are_drift() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("staged.csv");
    fs::write(
        &path,
        "shipment_id,dispatch_time,delay_minutes,agent_score,weather_warnings,delay_minutes\n\
         SHP001,2025-12-11 08:00:00,0,5,none,90\n",
    )?;
    match read_staged(&path, &schema()?) {
        Err(StagingError::DuplicateColumns(columns)) => {
            assert_eq!(columns, vec!["delay_minutes".to_string()]);
        }
        other => panic!("expected repeated columns, got {other:?}"),
    }
    Ok(())
}

#[test]
fn sub_second_timestamps_survive_staging() -> Result<()> {
    let dir = tempdir()?;
    let source = dir.path().join("in.csv");
    fs::write(
        &source,
        "shipment_id,dispatch_time,delay_minutes,agent_score,weather_warnings\n\
         SHP001,2025-12-11T08:00:00.250,0,5,none\n\
         SHP002,2025-12-11T09:00:00,0,5,none\n",
    )?;
    let schema = schema()?;
    let records = read_staged(&source, &schema)?;
    let dispatch = schema.column("dispatch_time")?;
    assert_eq!(records[0].get(dispatch).render(), "2025-12-11T08:00:00.250");
    assert_eq!(records[1].get(dispatch).render(), "2025-12-11T09:00:00");

    let out = dir.path().join("out.csv");
    write_staged(&out, &schema, &records)?;
    assert_eq!(read_staged(&out, &schema)?, records);
    Ok(())
}

#[test]
fn unparsable_cells_name_row_and_column() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("staged.csv");
    fs::write(
        &path,
        "shipment_id,dispatch_time,delay_minutes,agent_score,weather_warnings\nSHP001,2025-12-11 08:00:00,soon,5,\n",
    )?;
    match read_staged(&path, &schema()?) {
        Err(StagingError::Parse { row, column, .. }) => {
            assert_eq!(row, 1);
            assert_eq!(column, "delay_minutes");
        }
        other => panic!("expected a parse error, got {other:?}"),
    }
    Ok(())
}

#[test]
fn missing_file_is_an_io_error() -> Result<()> {
    let dir = tempdir()?;
    let err = read_staged(dir.path().join("absent.csv"), &schema()?).unwrap_err();
    assert!(matches!(err, StagingError::Io(_)));
    Ok(())
}
