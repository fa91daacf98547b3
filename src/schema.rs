//! Typed table schema shared by every stage.
//!
//! A [`Schema`] fixes the column layout of cleaned and enriched records once,
//! when a pipeline is built. Stages resolve column names to [`ColumnId`]s at
//! construction time and then address cells by index, so a misspelled column
//! is a construction error instead of a silent per-row miss.

use crate::record::Record;
use crate::store::Row;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The type a column holds once cleaned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Timestamp,
    Float,
    Integer,
    Category,
}

impl ColumnKind {
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(self, Self::Float | Self::Integer)
    }
}

/// Where a column's values come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnOrigin {
    /// Parsed from the raw field `field`.
    Source { field: String },
    /// Computed by a join, derivation or classifier.
    Derived,
}

/// Index of a column within its schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnId(pub(crate) usize);

impl ColumnId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub kind: ColumnKind,
    pub origin: ColumnOrigin,
    pub nullable: bool,
    /// Allowed rendered values, for enumerated columns.
    pub domain: Option<Vec<String>>,
}

impl ColumnDef {
    /// A column parsed from the raw field of the same name.
    pub fn source(name: impl Into<String>, kind: ColumnKind) -> Self {
        let name = name.into();
        Self {
            origin: ColumnOrigin::Source {
                field: name.clone(),
            },
            name,
            kind,
            nullable: false,
            domain: None,
        }
    }

    /// A column filled by the transform stages.
    pub fn derived(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
            origin: ColumnOrigin::Derived,
            nullable: false,
            domain: None,
        }
    }

    /// Read this column from a differently named raw field.
    #[must_use]
    pub fn from_field(mut self, field: impl Into<String>) -> Self {
        if let ColumnOrigin::Source { field: f } = &mut self.origin {
            *f = field.into();
        }
        self
    }

    #[must_use]
    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    #[must_use]
    pub fn with_domain<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.domain = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Raw field name for source columns.
    #[must_use]
    pub fn source_field(&self) -> Option<&str> {
        match &self.origin {
            ColumnOrigin::Source { field } => Some(field),
            ColumnOrigin::Derived => None,
        }
    }

    #[must_use]
    pub const fn is_derived(&self) -> bool {
        matches!(self.origin, ColumnOrigin::Derived)
    }
}

/// Construction-time schema errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("duplicate column `{0}`")]
    DuplicateColumn(String),
    #[error("unknown column `{0}`")]
    UnknownColumn(String),
    #[error("column `{column}`: {message}")]
    InvalidColumn { column: String, message: String },
    #[error("schema declares no natural key")]
    MissingNaturalKey,
}

impl SchemaError {
    pub(crate) fn invalid(column: &str, message: impl Into<String>) -> Self {
        Self::InvalidColumn {
            column: column.to_string(),
            message: message.into(),
        }
    }
}

/// An ordered set of typed columns plus the natural key.
#[derive(Debug, Clone)]
pub struct Schema {
    columns: Vec<ColumnDef>,
    index: HashMap<String, usize>,
    natural_key: Vec<ColumnId>,
}

impl Schema {
    /// Build a schema.
    ///
    /// # Errors
    /// Fails on duplicate column names, an empty natural key, a natural key
    /// naming an unknown or derived column, or an empty domain.
    pub fn new(columns: Vec<ColumnDef>, natural_key: &[&str]) -> Result<Self, SchemaError> {
        let mut index = HashMap::with_capacity(columns.len());
        for (i, col) in columns.iter().enumerate() {
            if index.insert(col.name.clone(), i).is_some() {
                return Err(SchemaError::DuplicateColumn(col.name.clone()));
            }
            if col.domain.as_ref().is_some_and(Vec::is_empty) {
                return Err(SchemaError::invalid(&col.name, "declared domain is empty"));
            }
        }
        if natural_key.is_empty() {
            return Err(SchemaError::MissingNaturalKey);
        }
        let mut schema = Self {
            columns,
            index,
            natural_key: Vec::new(),
        };
        let mut key = Vec::with_capacity(natural_key.len());
        for name in natural_key {
            let id = schema.column(name)?;
            if schema.def(id).is_derived() {
                return Err(SchemaError::invalid(name, "natural key must be a source column"));
            }
            key.push(id);
        }
        schema.natural_key = key;
        Ok(schema)
    }

    /// Resolve a column name.
    ///
    /// # Errors
    /// Returns [`SchemaError::UnknownColumn`] if no such column exists.
    pub fn column(&self, name: &str) -> Result<ColumnId, SchemaError> {
        self.index
            .get(name)
            .map(|&i| ColumnId(i))
            .ok_or_else(|| SchemaError::UnknownColumn(name.to_string()))
    }

    #[must_use]
    pub fn def(&self, id: ColumnId) -> &ColumnDef {
        &self.columns[id.0]
    }

    #[must_use]
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn ids(&self) -> impl Iterator<Item = ColumnId> + '_ {
        (0..self.columns.len()).map(ColumnId)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn source_columns(&self) -> impl Iterator<Item = (ColumnId, &ColumnDef)> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.is_derived())
            .map(|(i, c)| (ColumnId(i), c))
    }

    pub fn derived_columns(&self) -> impl Iterator<Item = (ColumnId, &ColumnDef)> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_derived())
            .map(|(i, c)| (ColumnId(i), c))
    }

    #[must_use]
    pub fn natural_key(&self) -> &[ColumnId] {
        &self.natural_key
    }

    /// Render each natural key part of a record. Parts are kept apart so
    /// that `("x|y", "z")` and `("x", "y|z")` stay distinct.
    #[must_use]
    pub fn key_of(&self, record: &Record) -> Vec<String> {
        self.natural_key
            .iter()
            .map(|&id| record.get(id).render())
            .collect()
    }

    /// Convert a record into a store row keyed by column name.
    #[must_use]
    pub fn to_row(&self, record: &Record) -> Row {
        self.columns
            .iter()
            .zip(record.values())
            .map(|(col, v)| (col.name.clone(), v.clone()))
            .collect()
    }
}
