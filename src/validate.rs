//! Post-load consistency checks against a read-back of the target table.

use crate::record::EnrichedRecord;
use crate::schema::Schema;
use crate::store::{Row, StoreError};
use crate::value::Value;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};

/// How many offending values an assertion detail lists.
const SAMPLE_LIMIT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Check {
    RowCount,
    NotNull,
    Domain,
    ReadBack,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assertion {
    pub check: Check,
    pub column: Option<String>,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub assertions: Vec<Assertion>,
    /// Read-back rows identical to an earlier read-back row. Informational.
    pub duplicate_rows: usize,
}

impl ValidationReport {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.assertions.iter().all(|a| a.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &Assertion> {
        self.assertions.iter().filter(|a| !a.passed)
    }

    /// A report for a run whose read-back could not be fetched.
    #[must_use]
    pub fn read_back_failed(staged_rows: usize, err: &StoreError) -> Self {
        Self {
            assertions: vec![Assertion {
                check: Check::ReadBack,
                column: None,
                passed: false,
                detail: format!("read-back of {staged_rows} staged rows failed: {err}"),
            }],
            duplicate_rows: 0,
        }
    }
}

/// Declared non-null and enumerated columns to check.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    non_null: Vec<String>,
    domains: Vec<(String, BTreeSet<String>)>,
}

impl Validator {
    /// Check every non-nullable column and every column with a declared
    /// domain.
    #[must_use]
    pub fn from_schema(schema: &Schema) -> Self {
        let non_null = schema
            .columns()
            .iter()
            .filter(|c| !c.nullable)
            .map(|c| c.name.clone())
            .collect();
        let domains = schema
            .columns()
            .iter()
            .filter_map(|c| {
                c.domain
                    .as_ref()
                    .map(|d| (c.name.clone(), d.iter().cloned().collect()))
            })
            .collect();
        Self { non_null, domains }
    }

    #[must_use]
    pub fn with_non_null(mut self, column: impl Into<String>) -> Self {
        let column = column.into();
        if !self.non_null.contains(&column) {
            self.non_null.push(column);
        }
        self
    }

    /// Add or replace the allowed values of `column`.
    #[must_use]
    pub fn with_domain<I, S>(mut self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let column = column.into();
        let values: BTreeSet<String> = values.into_iter().map(Into::into).collect();
        self.domains.retain(|(c, _)| *c != column);
        self.domains.push((column, values));
        self
    }

    /// Compare `staged` with the `persisted` read-back. Never mutates either.
    #[must_use]
    pub fn validate(&self, staged: &[EnrichedRecord], persisted: &[Row]) -> ValidationReport {
        let mut assertions = Vec::with_capacity(1 + self.non_null.len() + self.domains.len());

        assertions.push(Assertion {
            check: Check::RowCount,
            column: None,
            passed: staged.len() == persisted.len(),
            detail: format!("staged={} persisted={}", staged.len(), persisted.len()),
        });

        for column in &self.non_null {
            let nulls = persisted
                .iter()
                .filter(|row| row.get(column).is_none_or(Value::is_null))
                .count();
            assertions.push(Assertion {
                check: Check::NotNull,
                column: Some(column.clone()),
                passed: nulls == 0,
                detail: format!("{nulls} null values"),
            });
        }

        for (column, allowed) in &self.domains {
            let outside: BTreeSet<String> = persisted
                .iter()
                .filter_map(|row| row.get(column))
                .filter(|v| !v.is_null())
                .map(Value::render)
                .filter(|v| !allowed.contains(v))
                .collect();
            let detail = if outside.is_empty() {
                format!("all values within {} allowed", allowed.len())
            } else {
                let sample: Vec<&str> = outside.iter().take(SAMPLE_LIMIT).map(String::as_str).collect();
                format!("{} values outside the domain: {}", outside.len(), sample.join(", "))
            };
            assertions.push(Assertion {
                check: Check::Domain,
                column: Some(column.clone()),
                passed: outside.is_empty(),
                detail,
            });
        }

        let report = ValidationReport {
            assertions,
            duplicate_rows: count_duplicates(persisted),
        };
        for failed in report.failures() {
            tracing::warn!(check = ?failed.check, column = ?failed.column, detail = %failed.detail, "validation failed");
        }
        tracing::info!(
            passed = report.passed(),
            assertions = report.assertions.len(),
            duplicate_rows = report.duplicate_rows,
            "validation finished"
        );
        report
    }
}

fn count_duplicates(rows: &[Row]) -> usize {
    let mut seen: HashSet<Vec<(&str, String)>> = HashSet::with_capacity(rows.len());
    rows.iter()
        .filter(|row| {
            let key = row.iter().map(|(k, v)| (k.as_str(), v.render())).collect();
            !seen.insert(key)
        })
        .count()
}
