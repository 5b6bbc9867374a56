//! Application-level records and the values they carry.
//!
//! A [`Record`] is an insertion-ordered field map. Its field-name set is its
//! shape; the first record of a partition also fixes the column order used
//! when that partition is rendered into SQL.

use std::io::Read;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, SecondsFormat};
use serde_json::{Map, Number, Value as JsonValue};

use crate::error::BatchError;

/// One field value. Store-specific types without a native variant travel as
/// [`FieldValue::Opaque`] and are passed through uninterpreted.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(DateTime<FixedOffset>),
    Json(JsonValue),
    Opaque { type_name: String, bytes: Vec<u8> },
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Borrows the text payload, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }

    /// Converts a JSON scalar or document into a field value.
    ///
    /// Integral numbers that fit `i64` become [`FieldValue::Int`], other numbers
    /// [`FieldValue::Float`]; arrays and objects stay JSON.
    pub fn from_json(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(flag) => Self::Bool(flag),
            JsonValue::Number(number) => match number.as_i64() {
                Some(int) => Self::Int(int),
                None => number.as_f64().map(Self::Float).unwrap_or(Self::Null),
            },
            JsonValue::String(text) => Self::Text(text),
            other @ (JsonValue::Array(_) | JsonValue::Object(_)) => Self::Json(other),
        }
    }

    /// Renders the value as JSON for CLI output.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Null => JsonValue::Null,
            Self::Bool(flag) => JsonValue::Bool(*flag),
            Self::Int(int) => JsonValue::Number((*int).into()),
            Self::Float(float) => Number::from_f64(*float)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Self::Text(text) => JsonValue::String(text.clone()),
            Self::Date(date) => JsonValue::String(date.format("%Y-%m-%d").to_string()),
            Self::Time(time) => JsonValue::String(time.format("%H:%M:%S%.f").to_string()),
            Self::Timestamp(ts) => {
                JsonValue::String(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            Self::Json(json) => json.clone(),
            Self::Opaque { type_name, bytes } => {
                let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
                JsonValue::String(format!("{type_name}:\\x{hex}"))
            }
        }
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<NaiveDate> for FieldValue {
    fn from(value: NaiveDate) -> Self {
        Self::Date(value)
    }
}

impl From<DateTime<FixedOffset>> for FieldValue {
    fn from(value: DateTime<FixedOffset>) -> Self {
        Self::Timestamp(value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Order-independent identity of a record's field-name set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShapeKey(Vec<String>);

impl ShapeKey {
    /// Sorted field names making up the shape.
    pub fn names(&self) -> &[String] {
        &self.0
    }
}

/// Insertion-ordered mapping from field name to value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, FieldValue)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert used heavily by callers and tests.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Sets a field, keeping the original position when the name exists.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<FieldValue>,
    ) -> Option<FieldValue> {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.fields.push((name, value));
                None
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value)
    }

    /// Returns the field as text; `None` when missing, null, or non-text.
    pub fn get_text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(FieldValue::as_text)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|(existing, _)| existing == name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Field names in insertion order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Computes the shape key (sorted field names).
    pub fn shape_key(&self) -> ShapeKey {
        let mut names: Vec<String> = self.fields.iter().map(|(name, _)| name.clone()).collect();
        names.sort_unstable();
        ShapeKey(names)
    }

    /// Builds a record from a JSON object. Field order follows the document's
    /// key order (`serde_json` is built with `preserve_order`).
    pub fn from_json_object(object: Map<String, JsonValue>) -> Self {
        object
            .into_iter()
            .map(|(name, value)| (name, FieldValue::from_json(value)))
            .collect()
    }

    pub fn to_json(&self) -> JsonValue {
        let mut object = Map::new();
        for (name, value) in &self.fields {
            object.insert(name.clone(), value.to_json());
        }
        JsonValue::Object(object)
    }
}

impl<K: Into<String>> FromIterator<(K, FieldValue)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, FieldValue)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (name, value) in iter {
            record.insert(name, value);
        }
        record
    }
}

/// Parses a JSON array of objects (or a single object) into records.
pub fn records_from_json(document: JsonValue) -> Result<Vec<Record>, BatchError> {
    let items = match document {
        JsonValue::Array(items) => items,
        JsonValue::Object(object) => return Ok(vec![Record::from_json_object(object)]),
        other => {
            return Err(BatchError::InvalidRecord {
                index: 0,
                reason: format!("expected an array of objects, found {}", json_kind(&other)),
            })
        }
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            JsonValue::Object(object) => Ok(Record::from_json_object(object)),
            other => Err(BatchError::InvalidRecord {
                index,
                reason: format!("expected an object, found {}", json_kind(&other)),
            }),
        })
        .collect()
}

/// Reads and parses a JSON record document from any reader.
pub fn read_records(mut reader: impl Read) -> Result<Vec<Record>, BatchError> {
    let mut raw = String::new();
    reader
        .read_to_string(&mut raw)
        .map_err(|err| BatchError::InvalidRecord {
            index: 0,
            reason: format!("read input: {err}"),
        })?;
    let document: JsonValue =
        serde_json::from_str(&raw).map_err(|err| BatchError::InvalidRecord {
            index: 0,
            reason: format!("parse json: {err}"),
        })?;
    records_from_json(document)
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
