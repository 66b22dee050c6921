//! # Documents
//!
//! The unit of ingest: an id unique per table, an epoch-millis timestamp and
//! an opaque JSON object. Documents are immutable once accepted.

use crate::error::{QueryStoreError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;

/// Pseudo-field addressing [`Document::timestamp`].
pub const TIMESTAMP_FIELD: &str = "_timestamp";

/// Pseudo-field addressing [`Document::id`].
pub const ID_FIELD: &str = "_id";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub data: Value,
}

impl Document {
    pub fn new(id: impl Into<String>, timestamp: i64, data: Value) -> Self {
        Self {
            id: id.into(),
            timestamp,
            data,
        }
    }

    /// Resolve a field path against this document.
    ///
    /// `_id` and `_timestamp` address the envelope; anything else is a
    /// dot-separated path into `data`. Explicit nulls read as absent.
    pub fn field(&self, path: &str) -> Option<Cow<'_, Value>> {
        match path {
            ID_FIELD => Some(Cow::Owned(Value::String(self.id.clone()))),
            TIMESTAMP_FIELD => Some(Cow::Owned(Value::from(self.timestamp))),
            _ => {
                let mut current = &self.data;
                for segment in path.split('.') {
                    current = current.as_object()?.get(segment)?;
                }
                if current.is_null() {
                    None
                } else {
                    Some(Cow::Borrowed(current))
                }
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(QueryStoreError::invalid("document id must not be empty"));
        }
        if self.timestamp < 0 {
            return Err(QueryStoreError::invalid(format!(
                "document '{}' has negative timestamp {}",
                self.id, self.timestamp
            )));
        }
        if !self.data.is_object() {
            return Err(QueryStoreError::invalid(format!(
                "document '{}' data must be a JSON object",
                self.id
            )));
        }
        Ok(())
    }
}
