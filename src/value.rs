//! Cell values: raw values as received from a source and typed values as held
//! in cleaned and enriched records.
//!
//! [`RawValue`] mirrors what a JSON or CSV source hands over (text, number,
//! bool or null). [`Value`] is the typed cell produced by parsing a raw value
//! against a [`ColumnKind`](crate::schema::ColumnKind).

use crate::schema::ColumnKind;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Serialize, Serializer};
use std::fmt;

/// Canonical text form for timestamps in staged files and read-backs.
/// Sub-second digits are written only when present.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// A field value exactly as a source delivered it.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl RawValue {
    /// Absent, null and blank text all count as missing.
    #[must_use]
    pub fn is_missing(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

impl From<&serde_json::Value> for RawValue {
    fn from(v: &serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => n.as_f64().map_or(Self::Null, Self::Number),
            serde_json::Value::String(s) => Self::Text(s.clone()),
            nested => Self::Text(nested.to_string()),
        }
    }
}

impl From<&str> for RawValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for RawValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<f64> for RawValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i64> for RawValue {
    #[allow(clippy::cast_precision_loss)]
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<bool> for RawValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl<T: Into<Self>> From<Option<T>> for RawValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// A typed cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Timestamp(NaiveDateTime),
    Text(String),
}

impl Value {
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Numeric view of the cell. Integers widen to `f64`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            Self::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    /// Text form used for staged files, domain checks and join keys.
    /// Null renders as the empty string.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Timestamp(t) => t.format(TIMESTAMP_FORMAT).to_string(),
            Self::Text(s) => s.clone(),
        }
    }

    /// Coerce a computed value into the representation a column of `kind`
    /// holds. Values that cannot be represented become [`Value::Null`].
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn conform(self, kind: ColumnKind) -> Self {
        match (kind, self) {
            (_, Self::Null) => Self::Null,
            (ColumnKind::Float, Self::Float(f)) if f.is_finite() => Self::Float(f),
            (ColumnKind::Float, Self::Int(i)) => Self::Float(i as f64),
            (ColumnKind::Integer, Self::Int(i)) => Self::Int(i),
            (ColumnKind::Integer, Self::Float(f))
                if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15 =>
            {
                Self::Int(f as i64)
            }
            (ColumnKind::Timestamp, Self::Timestamp(t)) => Self::Timestamp(t),
            (ColumnKind::Category, Self::Text(s)) => Self::Text(s),
            (ColumnKind::Category, other @ (Self::Int(_) | Self::Float(_))) => {
                Self::Text(other.render())
            }
            _ => Self::Null,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("null")
        } else {
            f.write_str(&self.render())
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_none(),
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::Float(f) => serializer.serialize_f64(*f),
            Self::Timestamp(_) => serializer.serialize_str(&self.render()),
            Self::Text(s) => serializer.serialize_str(s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(t: NaiveDateTime) -> Self {
        Self::Timestamp(t)
    }
}

/// Result of parsing one raw cell against a column kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed {
    Present(Value),
    Missing,
    Invalid(String),
}

/// Parse a raw cell into a typed value of `kind`.
#[must_use]
pub fn parse_cell(raw: Option<&RawValue>, kind: ColumnKind) -> Parsed {
    let Some(raw) = raw.filter(|r| !r.is_missing()) else {
        return Parsed::Missing;
    };
    match kind {
        ColumnKind::Float => parse_float(raw).map_or_else(
            || Parsed::Invalid(format!("not a number: {}", describe(raw))),
            |f| Parsed::Present(Value::Float(f)),
        ),
        ColumnKind::Integer => parse_integer(raw).map_or_else(
            || Parsed::Invalid(format!("not an integer: {}", describe(raw))),
            |i| Parsed::Present(Value::Int(i)),
        ),
        ColumnKind::Timestamp => match raw {
            RawValue::Text(s) => parse_timestamp(s).map_or_else(
                || Parsed::Invalid(format!("not a timestamp: {s:?}")),
                |t| Parsed::Present(Value::Timestamp(t)),
            ),
            other => Parsed::Invalid(format!("not a timestamp: {}", describe(other))),
        },
        ColumnKind::Category => match raw {
            RawValue::Text(s) => Parsed::Present(Value::Text(s.trim().to_string())),
            RawValue::Number(n) if n.is_finite() => {
                Parsed::Present(Value::Text(Value::Float(*n).render()))
            }
            RawValue::Bool(b) => Parsed::Present(Value::Text(b.to_string())),
            other => Parsed::Invalid(format!("not a category: {}", describe(other))),
        },
    }
}

/// Parse a staged-file cell. Empty text is null.
#[must_use]
pub fn parse_text(text: &str, kind: ColumnKind) -> Parsed {
    if text.is_empty() {
        return Parsed::Present(Value::Null);
    }
    parse_cell(Some(&RawValue::Text(text.to_string())), kind)
}

/// Parse the timestamp forms sources are known to emit.
#[must_use]
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn parse_float(raw: &RawValue) -> Option<f64> {
    let f = match raw {
        RawValue::Number(n) => *n,
        RawValue::Text(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    f.is_finite().then_some(f)
}

#[allow(clippy::cast_possible_truncation)]
fn parse_integer(raw: &RawValue) -> Option<i64> {
    match raw {
        RawValue::Number(n) if n.is_finite() && n.fract() == 0.0 => Some(*n as i64),
        RawValue::Text(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                let f = s.parse::<f64>().ok()?;
                (f.is_finite() && f.fract() == 0.0).then_some(f as i64)
            })
        }
        _ => None,
    }
}

fn describe(raw: &RawValue) -> String {
    match raw {
        RawValue::Null => "null".to_string(),
        RawValue::Bool(b) => b.to_string(),
        RawValue::Number(n) => n.to_string(),
        RawValue::Text(s) => format!("{s:?}"),
    }
}
