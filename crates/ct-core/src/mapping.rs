//! # Field Mappings
//!
//! The declared type of every field path seen in a table. Derived from the
//! indexed documents: the first type observed for a path wins, the same way
//! a dynamically-mapped search index fixes a field's type on first sight.

use crate::document::{ID_FIELD, TIMESTAMP_FIELD};
use crate::error::{QueryStoreError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldType {
    String,
    Long,
    Double,
    Boolean,
}

impl FieldType {
    /// Type of a scalar value; arrays take their first typed element.
    pub fn of(value: &Value) -> Option<Self> {
        match value {
            Value::String(_) => Some(Self::String),
            Value::Bool(_) => Some(Self::Boolean),
            Value::Number(n) if n.is_f64() => Some(Self::Double),
            Value::Number(_) => Some(Self::Long),
            Value::Array(items) => items.iter().find_map(Self::of),
            Value::Null | Value::Object(_) => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Long | Self::Double)
    }

    /// Coerce a filter operand to this type, or reject it.
    pub fn coerce(&self, field: &str, value: &Value) -> Result<Value> {
        let coerced = match (self, value) {
            (Self::String, Value::String(_)) => Some(value.clone()),
            (Self::String, Value::Number(n)) => Some(Value::String(n.to_string())),
            (Self::String, Value::Bool(b)) => Some(Value::String(b.to_string())),
            (Self::Long | Self::Double, Value::Number(_)) => Some(value.clone()),
            (Self::Long | Self::Double, Value::String(s)) => parse_number(s.trim()),
            (Self::Boolean, Value::Bool(_)) => Some(value.clone()),
            (Self::Boolean, Value::String(s)) => match s.as_str() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
            _ => None,
        };
        coerced.ok_or_else(|| {
            QueryStoreError::invalid(format!(
                "operand {} is not coercible to {:?} for field '{}'",
                value, self, field
            ))
        })
    }
}

fn parse_number(raw: &str) -> Option<Value> {
    if let Ok(n) = raw.parse::<i64>() {
        return Some(Value::from(n));
    }
    raw.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldTypeMapping {
    pub field: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

impl FieldTypeMapping {
    pub fn new(field: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            field: field.into(),
            field_type,
        }
    }
}

/// All field mappings of one table. `mappings` is kept sorted by field and
/// holds at most one entry per field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableFieldMapping {
    pub table: String,
    pub mappings: Vec<FieldTypeMapping>,
}

impl TableFieldMapping {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            mappings: Vec::new(),
        }
    }

    /// Record a mapping unless the field is already mapped.
    pub fn insert(&mut self, mapping: FieldTypeMapping) {
        if let Err(pos) = self
            .mappings
            .binary_search_by(|m| m.field.as_str().cmp(mapping.field.as_str()))
        {
            self.mappings.insert(pos, mapping);
        }
    }

    pub fn extend(&mut self, mappings: impl IntoIterator<Item = FieldTypeMapping>) {
        for mapping in mappings {
            self.insert(mapping);
        }
    }

    /// Declared type of a field, including the `_id`/`_timestamp` pseudo-fields.
    pub fn field_type(&self, field: &str) -> Option<FieldType> {
        match field {
            ID_FIELD => Some(FieldType::String),
            TIMESTAMP_FIELD => Some(FieldType::Long),
            _ => self
                .mappings
                .binary_search_by(|m| m.field.as_str().cmp(field))
                .ok()
                .map(|pos| self.mappings[pos].field_type),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

/// Flatten a document's `data` into `(path, type)` pairs, objects recursing
/// with dot-joined paths.
pub fn flatten(data: &Value) -> Vec<FieldTypeMapping> {
    let mut out = Vec::new();
    if let Value::Object(map) = data {
        for (key, value) in map {
            flatten_into(key.clone(), value, &mut out);
        }
    }
    out
}

fn flatten_into(path: String, value: &Value, out: &mut Vec<FieldTypeMapping>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                flatten_into(format!("{path}.{key}"), child, out);
            }
        }
        other => {
            if let Some(field_type) = FieldType::of(other) {
                out.push(FieldTypeMapping::new(path, field_type));
            }
        }
    }
}
