//! # Filter Model
//!
//! Typed predicates over a single field, applied as a flat list under one
//! [`FilterCombinerType`]. There is no nesting: `AND` requires every filter,
//! `OR` requires at least one, and an empty list matches everything.
//!
//! A filter goes through [`Filter::validate`] against the table's
//! [`TableFieldMapping`] first. Validation rejects unknown fields and
//! operands that cannot be coerced to the field's declared type, and returns
//! a copy with coerced operands. Only validated filters are translated with
//! [`Filter::to_clause`]; for those, the translated clause selects exactly
//! the documents [`Filter::matches`] accepts.

use crate::clause::IndexClause;
use crate::document::{Document, TIMESTAMP_FIELD};
use crate::error::{QueryStoreError, Result};
use crate::mapping::{FieldType, TableFieldMapping};
use crate::query::TimeWindow;
use crate::value::{any_scalar, compare, equals};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operator", rename_all = "snake_case")]
pub enum Filter {
    /// Always true.
    Any {},
    /// Exact match on the declared type; strings match whole tokens.
    Equals { field: String, value: Value },
    /// Also true when the field is absent.
    NotEquals { field: String, value: Value },
    GreaterThan { field: String, value: Value },
    GreaterEqual { field: String, value: Value },
    LessThan { field: String, value: Value },
    LessEqual { field: String, value: Value },
    /// Inclusive on both ends.
    Between { field: String, from: Value, to: Value },
    /// Regular expression anchored at both ends.
    Contains { field: String, expression: String },
}

/// How the filter list is combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterCombinerType {
    #[default]
    And,
    Or,
}

impl Filter {
    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Equals {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn between(field: impl Into<String>, from: impl Into<Value>, to: impl Into<Value>) -> Self {
        Self::Between {
            field: field.into(),
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn contains(field: impl Into<String>, expression: impl Into<String>) -> Self {
        Self::Contains {
            field: field.into(),
            expression: expression.into(),
        }
    }

    /// The field this filter constrains; `None` for [`Filter::Any`].
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Any {} => None,
            Self::Equals { field, .. }
            | Self::NotEquals { field, .. }
            | Self::GreaterThan { field, .. }
            | Self::GreaterEqual { field, .. }
            | Self::LessThan { field, .. }
            | Self::LessEqual { field, .. }
            | Self::Between { field, .. }
            | Self::Contains { field, .. } => Some(field),
        }
    }

    /// In-process evaluation against a document.
    pub fn matches(&self, document: &Document) -> bool {
        let Some(field) = self.field() else {
            return true;
        };
        let actual = document.field(field);
        let Some(actual) = actual.as_deref() else {
            return matches!(self, Self::NotEquals { .. });
        };

        match self {
            Self::Any {} => true,
            Self::Equals { value, .. } => any_scalar(actual, |v| equals(v, value)),
            Self::NotEquals { value, .. } => !any_scalar(actual, |v| equals(v, value)),
            Self::GreaterThan { value, .. } => ordered(actual, value, |o| o.is_gt()),
            Self::GreaterEqual { value, .. } => ordered(actual, value, |o| o.is_ge()),
            Self::LessThan { value, .. } => ordered(actual, value, |o| o.is_lt()),
            Self::LessEqual { value, .. } => ordered(actual, value, |o| o.is_le()),
            Self::Between { from, to, .. } => any_scalar(actual, |v| {
                compare(v, from).is_some_and(Ordering::is_ge)
                    && compare(v, to).is_some_and(Ordering::is_le)
            }),
            Self::Contains { expression, .. } => match anchored(expression) {
                Ok(regex) => any_scalar(actual, |v| v.as_str().is_some_and(|s| regex.is_match(s))),
                Err(_) => false,
            },
        }
    }

    /// Check this filter against the table mapping and coerce its operands.
    pub fn validate(&self, mapping: &TableFieldMapping) -> Result<Filter> {
        let Some(field) = self.field() else {
            return Ok(self.clone());
        };
        if field.trim().is_empty() {
            return Err(QueryStoreError::invalid("filter field must not be empty"));
        }
        let field_type = mapping.field_type(field).ok_or_else(|| {
            QueryStoreError::invalid(format!(
                "field '{}' is not mapped in table '{}'",
                field, mapping.table
            ))
        })?;
        let owned = field.to_string();

        let validated = match self {
            Self::Any {} => Self::Any {},
            Self::Equals { value, .. } => Self::Equals {
                field: owned,
                value: field_type.coerce(field, value)?,
            },
            Self::NotEquals { value, .. } => Self::NotEquals {
                field: owned,
                value: field_type.coerce(field, value)?,
            },
            Self::GreaterThan { value, .. } => Self::GreaterThan {
                field: owned,
                value: range_operand(field, field_type, value)?,
            },
            Self::GreaterEqual { value, .. } => Self::GreaterEqual {
                field: owned,
                value: range_operand(field, field_type, value)?,
            },
            Self::LessThan { value, .. } => Self::LessThan {
                field: owned,
                value: range_operand(field, field_type, value)?,
            },
            Self::LessEqual { value, .. } => Self::LessEqual {
                field: owned,
                value: range_operand(field, field_type, value)?,
            },
            Self::Between { from, to, .. } => Self::Between {
                field: owned,
                from: range_operand(field, field_type, from)?,
                to: range_operand(field, field_type, to)?,
            },
            Self::Contains { expression, .. } => {
                if field_type != FieldType::String {
                    return Err(QueryStoreError::invalid(format!(
                        "contains requires a STRING field, '{}' is {:?}",
                        field, field_type
                    )));
                }
                anchored(expression).map_err(|e| {
                    QueryStoreError::invalid(format!("bad expression for '{}': {}", field, e))
                })?;
                Self::Contains {
                    field: owned,
                    expression: expression.clone(),
                }
            }
        };
        Ok(validated)
    }

    /// Lower a validated filter into an index clause.
    pub fn to_clause(&self) -> IndexClause {
        match self {
            Self::Any {} => IndexClause::MatchAll,
            Self::Equals { field, value } => IndexClause::term(field, value.clone()),
            Self::NotEquals { field, value } => IndexClause::Not {
                clause: Box::new(IndexClause::term(field, value.clone())),
            },
            Self::GreaterThan { field, value } => IndexClause::Range {
                field: field.clone(),
                gt: Some(value.clone()),
                gte: None,
                lt: None,
                lte: None,
            },
            Self::GreaterEqual { field, value } => IndexClause::Range {
                field: field.clone(),
                gt: None,
                gte: Some(value.clone()),
                lt: None,
                lte: None,
            },
            Self::LessThan { field, value } => IndexClause::Range {
                field: field.clone(),
                gt: None,
                gte: None,
                lt: Some(value.clone()),
                lte: None,
            },
            Self::LessEqual { field, value } => IndexClause::Range {
                field: field.clone(),
                gt: None,
                gte: None,
                lt: None,
                lte: Some(value.clone()),
            },
            Self::Between { field, from, to } => IndexClause::Range {
                field: field.clone(),
                gt: None,
                gte: Some(from.clone()),
                lt: None,
                lte: Some(to.clone()),
            },
            Self::Contains { field, expression } => IndexClause::Regexp {
                field: field.clone(),
                pattern: expression.clone(),
            },
        }
    }
}

fn ordered(actual: &Value, bound: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    any_scalar(actual, |v| compare(v, bound).is_some_and(&accept))
}

fn range_operand(field: &str, field_type: FieldType, value: &Value) -> Result<Value> {
    if field_type == FieldType::Boolean {
        return Err(QueryStoreError::invalid(format!(
            "range filters are not supported on BOOLEAN field '{}'",
            field
        )));
    }
    field_type.coerce(field, value)
}

/// Compile a contains expression with full-token semantics.
pub fn anchored(expression: &str) -> std::result::Result<regex::Regex, regex::Error> {
    regex::Regex::new(&format!("^(?:{})$", expression))
}

/// Validate every filter of a request against the table mapping.
pub fn validate_all(filters: &[Filter], mapping: &TableFieldMapping) -> Result<Vec<Filter>> {
    filters.iter().map(|f| f.validate(mapping)).collect()
}

/// Logical evaluation of a combined filter list.
pub fn matches_all(filters: &[Filter], combiner: FilterCombinerType, document: &Document) -> bool {
    if filters.is_empty() {
        return true;
    }
    match combiner {
        FilterCombinerType::And => filters.iter().all(|f| f.matches(document)),
        FilterCombinerType::Or => filters.iter().any(|f| f.matches(document)),
    }
}

/// Translate a validated filter list into one clause.
pub fn combine(filters: &[Filter], combiner: FilterCombinerType) -> IndexClause {
    let mut clauses: Vec<IndexClause> = filters.iter().map(Filter::to_clause).collect();
    match clauses.len() {
        0 => IndexClause::MatchAll,
        1 => clauses.remove(0),
        _ => match combiner {
            FilterCombinerType::And => IndexClause::Bool {
                must: clauses,
                should: Vec::new(),
            },
            FilterCombinerType::Or => IndexClause::Bool {
                must: Vec::new(),
                should: clauses,
            },
        },
    }
}

/// The timestamp window implied by `_timestamp` filters. Only `AND` lists
/// narrow it; under `OR` any single filter may admit the rest of time.
pub fn timestamp_window(filters: &[Filter], combiner: FilterCombinerType) -> TimeWindow {
    let mut window = TimeWindow::unbounded();
    if combiner == FilterCombinerType::Or {
        return window;
    }
    for filter in filters {
        if filter.field() != Some(TIMESTAMP_FIELD) {
            continue;
        }
        let bound = match filter {
            Filter::Equals { value, .. } => {
                millis(value).map(|v| TimeWindow::between(v.ceil() as i64, v.floor() as i64))
            }
            Filter::GreaterThan { value, .. } => millis(value).map(|v| TimeWindow::since(v.floor() as i64 + 1)),
            Filter::GreaterEqual { value, .. } => millis(value).map(|v| TimeWindow::since(v.ceil() as i64)),
            Filter::LessThan { value, .. } => millis(value).map(|v| TimeWindow::until(v.ceil() as i64 - 1)),
            Filter::LessEqual { value, .. } => millis(value).map(|v| TimeWindow::until(v.floor() as i64)),
            Filter::Between { from, to, .. } => match (millis(from), millis(to)) {
                (Some(f), Some(t)) => Some(TimeWindow::between(f.ceil() as i64, t.floor() as i64)),
                _ => None,
            },
            _ => None,
        };
        if let Some(bound) = bound {
            window = window.intersect(&bound);
        }
    }
    window
}

fn millis(value: &Value) -> Option<f64> {
    value.as_f64()
}
