//! Action results and async retrieval tokens.

use crate::document::Document;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Tagged result of an action, keyed by the opcode that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "opcode", rename_all = "snake_case")]
pub enum ActionResponse {
    /// Documents in the resolved sort order.
    Query { documents: Vec<Document> },
    /// Nested counts, one map level per nesting field.
    Group { result: Map<String, Value> },
    Histogram { counts: Vec<HistogramCount> },
}

impl ActionResponse {
    pub fn opcode(&self) -> &'static str {
        match self {
            Self::Query { .. } => "query",
            Self::Group { .. } => "group",
            Self::Histogram { .. } => "histogram",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistogramCount {
    /// Bucket start, epoch millis.
    pub period: i64,
    pub count: u64,
}

/// Capability returned by an async submission; redeem it by polling.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AsyncDataToken {
    pub action: String,
    pub key: String,
}

impl AsyncDataToken {
    pub fn new(action: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            key: key.into(),
        }
    }
}
