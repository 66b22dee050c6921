//! # Index Clauses
//!
//! The query language spoken to the search index: term, range, regexp and
//! boolean composition. Filters lower into these mechanically, so the index
//! layer never has to know about filter operators.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IndexClause {
    MatchAll,
    Term {
        field: String,
        value: Value,
    },
    Range {
        field: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gt: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gte: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lt: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lte: Option<Value>,
    },
    /// Whole-value regular expression.
    Regexp {
        field: String,
        pattern: String,
    },
    /// Matches documents the inner clause does not, including those missing
    /// the field.
    Not {
        clause: Box<IndexClause>,
    },
    /// All of `must` and, when `should` is non-empty, at least one of it.
    Bool {
        #[serde(default)]
        must: Vec<IndexClause>,
        #[serde(default)]
        should: Vec<IndexClause>,
    },
}

impl IndexClause {
    pub fn term(field: impl Into<String>, value: Value) -> Self {
        Self::Term {
            field: field.into(),
            value,
        }
    }

    /// Conjunction of `self` with another clause, flattening match-alls.
    pub fn and(self, other: IndexClause) -> IndexClause {
        match (self, other) {
            (IndexClause::MatchAll, c) | (c, IndexClause::MatchAll) => c,
            (a, b) => IndexClause::Bool {
                must: vec![a, b],
                should: Vec::new(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_range_serializes_only_set_bounds() {
        let clause = IndexClause::Range {
            field: "battery".into(),
            gt: None,
            gte: Some(json!(47)),
            lt: None,
            lte: Some(json!(75)),
        };
        assert_eq!(
            serde_json::to_value(&clause).unwrap(),
            json!({"type": "range", "field": "battery", "gte": 47, "lte": 75})
        );
    }

    #[test]
    fn test_and_drops_match_all() {
        let term = IndexClause::term("os", json!("ios"));
        assert_eq!(IndexClause::MatchAll.and(term.clone()), term);
        assert!(matches!(
            term.clone().and(term),
            IndexClause::Bool { ref must, .. } if must.len() == 2
        ));
    }
}
