//! Record types for each stage of a run.

use crate::schema::{ColumnId, Schema};
use crate::value::{RawValue, Value};
use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};

/// A record as received from a source. There is no mutating API.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    fields: BTreeMap<String, RawValue>,
}

impl RawRecord {
    pub fn new<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<RawValue>,
    {
        Self {
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Build from a JSON object. Returns `None` for any other JSON value.
    #[must_use]
    pub fn from_json_object(value: &serde_json::Value) -> Option<Self> {
        let obj = value.as_object()?;
        Some(Self {
            fields: obj
                .iter()
                .map(|(k, v)| (k.clone(), RawValue::from(v)))
                .collect(),
        })
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&RawValue> {
        self.fields.get(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &RawValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Typed cells laid out in schema order.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    values: Vec<Value>,
}

impl Record {
    /// An all-null record for `schema`.
    #[must_use]
    pub fn empty(schema: &Schema) -> Self {
        Self {
            values: vec![Value::Null; schema.len()],
        }
    }

    #[must_use]
    pub const fn from_values(values: Vec<Value>) -> Self {
        Self { values }
    }

    #[must_use]
    pub fn get(&self, id: ColumnId) -> &Value {
        &self.values[id.index()]
    }

    pub fn set(&mut self, id: ColumnId, value: Value) {
        self.values[id.index()] = value;
    }

    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// Output of the cleaner: every non-nullable source column is set.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanRecord(pub(crate) Record);

/// A clean record with derived and classified columns filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedRecord(pub(crate) Record);

macro_rules! record_wrapper {
    ($name:ident) => {
        impl $name {
            #[must_use]
            pub fn into_record(self) -> Record {
                self.0
            }
        }

        impl Deref for $name {
            type Target = Record;

            fn deref(&self) -> &Record {
                &self.0
            }
        }
    };
}

record_wrapper!(CleanRecord);
record_wrapper!(EnrichedRecord);

impl DerefMut for EnrichedRecord {
    fn deref_mut(&mut self) -> &mut Record {
        &mut self.0
    }
}
