//! The staged artifact: enriched records written as CSV between transform
//! and load.
//!
//! The header row names exactly the schema's columns. Reading back checks the
//! header against the schema and rejects missing, extra or repeated columns;
//! column order may differ. Paths ending in `.gz` are gzip-compressed (feature
//! `compression-gzip`).

use crate::record::{EnrichedRecord, Record};
use crate::schema::Schema;
use crate::value::{parse_text, Parsed, Value};
use anyhow::Context;
use std::collections::HashSet;
use std::fs::{create_dir_all, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StagingError {
    #[error("staged header does not match schema (missing: [{}], extra: [{}])", missing.join(", "), extra.join(", "))]
    ColumnMismatch {
        missing: Vec<String>,
        extra: Vec<String>,
    },

    #[error("staged header repeats column(s): [{}]", .0.join(", "))]
    DuplicateColumns(Vec<String>),

    #[error("row {row}, column `{column}`: {message}")]
    Parse {
        row: usize,
        column: String,
        message: String,
    },

    #[error("compression for {0} is not enabled")]
    UnsupportedCompression(String),

    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

fn is_gzip(path: &Path) -> bool {
    path.extension().is_some_and(|e| e.eq_ignore_ascii_case("gz"))
}

fn open_reader(path: &Path) -> Result<Box<dyn Read>, StagingError> {
    let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    if is_gzip(path) {
        #[cfg(feature = "compression-gzip")]
        {
            use flate2::read::GzDecoder;
            return Ok(Box::new(GzDecoder::new(BufReader::new(f))));
        }
        #[cfg(not(feature = "compression-gzip"))]
        return Err(StagingError::UnsupportedCompression(path.display().to_string()));
    }
    Ok(Box::new(BufReader::new(f)))
}

fn create_writer(path: &Path) -> Result<Box<dyn Write>, StagingError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        create_dir_all(parent).with_context(|| format!("mkdir -p {}", parent.display()))?;
    }
    if is_gzip(path) {
        #[cfg(feature = "compression-gzip")]
        {
            use flate2::write::GzEncoder;
            use flate2::Compression;
            let f = File::create(path).with_context(|| format!("create {}", path.display()))?;
            return Ok(Box::new(GzEncoder::new(BufWriter::new(f), Compression::default())));
        }
        #[cfg(not(feature = "compression-gzip"))]
        return Err(StagingError::UnsupportedCompression(path.display().to_string()));
    }
    let f = File::create(path).with_context(|| format!("create {}", path.display()))?;
    Ok(Box::new(BufWriter::new(f)))
}

/// Write `records` to `path` with a header row. Creates parent directories.
/// Returns the number of rows written.
///
/// # Errors
/// Returns an error if the file cannot be created or written.
pub fn write_staged(
    path: impl AsRef<Path>,
    schema: &Schema,
    records: &[EnrichedRecord],
) -> Result<usize, StagingError> {
    let path = path.as_ref();
    let mut wtr = csv::Writer::from_writer(create_writer(path)?);
    wtr.write_record(schema.names())
        .with_context(|| format!("write header to {}", path.display()))?;
    for (i, rec) in records.iter().enumerate() {
        wtr.write_record(rec.values().iter().map(Value::render))
            .with_context(|| format!("write CSV row #{}", i + 1))?;
    }
    let mut inner = wtr
        .into_inner()
        .map_err(|e| anyhow::anyhow!("flush {}: {}", path.display(), e.error()))?;
    inner
        .flush()
        .with_context(|| format!("flush {}", path.display()))?;
    drop(inner);
    tracing::info!(path = %path.display(), rows = records.len(), "wrote staged artifact");
    Ok(records.len())
}

/// Read a staged artifact back as typed records in schema layout.
///
/// # Errors
/// Returns [`StagingError::DuplicateColumns`] when a header name appears more
/// than once, [`StagingError::ColumnMismatch`] when the header is not exactly
/// the schema's column set, [`StagingError::Parse`] when a cell does not parse as
/// its column kind, or an I/O error.
pub fn read_staged(path: impl AsRef<Path>, schema: &Schema) -> Result<Vec<EnrichedRecord>, StagingError> {
    let path = path.as_ref();
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(open_reader(path)?);
    let header: Vec<String> = rdr
        .headers()
        .with_context(|| format!("read header of {}", path.display()))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut seen = HashSet::with_capacity(header.len());
    let mut repeated: Vec<String> = header
        .iter()
        .filter(|h| !seen.insert(h.as_str()))
        .cloned()
        .collect();
    if !repeated.is_empty() {
        repeated.sort();
        repeated.dedup();
        return Err(StagingError::DuplicateColumns(repeated));
    }

    let missing: Vec<String> = schema
        .names()
        .filter(|n| !header.iter().any(|h| h == n))
        .map(ToString::to_string)
        .collect();
    let extra: Vec<String> = header
        .iter()
        .filter(|h| schema.column(h).is_err())
        .cloned()
        .collect();
    if !missing.is_empty() || !extra.is_empty() {
        return Err(StagingError::ColumnMismatch { missing, extra });
    }

    let positions = header
        .iter()
        .map(|h| schema.column(h))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| anyhow::anyhow!(e))?;

    let mut out = Vec::new();
    for (i, row) in rdr.records().enumerate() {
        let row = row.with_context(|| format!("parse CSV record #{}", i + 1))?;
        let mut record = Record::empty(schema);
        for (cell, &id) in row.iter().zip(&positions) {
            let def = schema.def(id);
            let value = match parse_text(cell, def.kind) {
                Parsed::Present(v) => v,
                Parsed::Missing => Value::Null,
                Parsed::Invalid(message) => {
                    return Err(StagingError::Parse {
                        row: i + 1,
                        column: def.name.clone(),
                        message,
                    });
                }
            };
            record.set(id, value);
        }
        out.push(EnrichedRecord(record));
    }
    tracing::debug!(path = %path.display(), rows = out.len(), "read staged artifact");
    Ok(out)
}
