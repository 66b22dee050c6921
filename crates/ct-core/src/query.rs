//! # Requests
//!
//! Envelopes for every action: the generic [`ActionRequest`] that carries
//! an opcode plus an action-specific body, and the typed bodies of the
//! built-in `query`, `group` and `histogram` actions.

use crate::document::Document;
use crate::error::{QueryStoreError, Result};
use crate::filter::{Filter, FilterCombinerType};
use crate::value::sort_compare;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Result cap applied when a query does not set `limit`.
pub const DEFAULT_QUERY_LIMIT: usize = 10_000;

fn default_limit() -> usize {
    DEFAULT_QUERY_LIMIT
}

// ============================================================================
// Sorting
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResultSort {
    pub field: String,
    #[serde(default)]
    pub order: SortOrder,
}

impl ResultSort {
    pub fn new(field: impl Into<String>, order: SortOrder) -> Self {
        Self {
            field: field.into(),
            order,
        }
    }

    /// Total order over documents. Missing values sort last in either
    /// direction and ties fall back to id ascending.
    pub fn compare(&self, a: &Document, b: &Document) -> Ordering {
        let primary = match (a.field(&self.field), b.field(&self.field)) {
            (Some(x), Some(y)) => {
                let ord = sort_compare(&x, &y);
                match self.order {
                    SortOrder::Asc => ord,
                    SortOrder::Desc => ord.reverse(),
                }
            }
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        primary.then_with(|| a.id.cmp(&b.id))
    }
}

/// Natural order when no sort is requested.
pub fn natural_order(a: &Document, b: &Document) -> Ordering {
    a.id.cmp(&b.id)
}

/// Comparator for an optional sort.
pub fn compare_documents(sort: Option<&ResultSort>, a: &Document, b: &Document) -> Ordering {
    match sort {
        Some(sort) => sort.compare(a, b),
        None => natural_order(a, b),
    }
}

// ============================================================================
// Time windows
// ============================================================================

/// Inclusive range of epoch millis; `None` leaves that side open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub from: Option<i64>,
    pub to: Option<i64>,
}

impl TimeWindow {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn since(from: i64) -> Self {
        Self { from: Some(from), to: None }
    }

    pub fn until(to: i64) -> Self {
        Self { from: None, to: Some(to) }
    }

    pub fn between(from: i64, to: i64) -> Self {
        Self { from: Some(from), to: Some(to) }
    }

    pub fn intersect(&self, other: &TimeWindow) -> TimeWindow {
        let from = match (self.from, other.from) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        let to = match (self.to, other.to) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        TimeWindow { from, to }
    }

    pub fn is_empty(&self) -> bool {
        matches!((self.from, self.to), (Some(from), Some(to)) if from > to)
    }

    /// Whether the half-open span `[start, end)` shares any instant with this window.
    pub fn overlaps(&self, start: i64, end: i64) -> bool {
        !self.is_empty()
            && self.from.map_or(true, |from| from < end)
            && self.to.map_or(true, |to| to >= start)
    }
}

// ============================================================================
// Action bodies
// ============================================================================

/// Body of the `query` action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub table: String,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub combiner: FilterCombinerType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<ResultSort>,
    #[serde(default)]
    pub from: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

impl Query {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filters: Vec::new(),
            combiner: FilterCombinerType::And,
            sort: None,
            from: 0,
            limit: DEFAULT_QUERY_LIMIT,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn combiner(mut self, combiner: FilterCombinerType) -> Self {
        self.combiner = combiner;
        self
    }

    pub fn sort(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort = Some(ResultSort::new(field, order));
        self
    }

    pub fn page(mut self, from: usize, limit: usize) -> Self {
        self.from = from;
        self.limit = limit;
        self
    }
}

/// Body of the `group` action: nested counts keyed by each field in `nesting`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRequest {
    pub table: String,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub combiner: FilterCombinerType,
    pub nesting: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistogramPeriod {
    Minutes,
    Hours,
    Days,
}

impl HistogramPeriod {
    pub fn millis(&self) -> i64 {
        match self {
            Self::Minutes => 60_000,
            Self::Hours => 3_600_000,
            Self::Days => 86_400_000,
        }
    }

    /// Start of the bucket holding `ts`.
    pub fn bucket(&self, ts: i64) -> i64 {
        ts - ts.rem_euclid(self.millis())
    }
}

/// Body of the `histogram` action: document counts per period in `[from, to]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramRequest {
    pub table: String,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub combiner: FilterCombinerType,
    pub from: i64,
    pub to: i64,
    pub period: HistogramPeriod,
}

// ============================================================================
// Envelope
// ============================================================================

/// A request addressed to an action by opcode. The body stays untyped until
/// the resolved action parses it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub opcode: String,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl ActionRequest {
    pub fn new(opcode: impl Into<String>, body: Map<String, Value>) -> Self {
        Self {
            opcode: opcode.into(),
            body,
        }
    }

    /// Wrap a typed body under `opcode`.
    pub fn wrap<T: Serialize>(opcode: &str, body: &T) -> Result<Self> {
        match serde_json::to_value(body) {
            Ok(Value::Object(map)) => Ok(Self::new(opcode, map)),
            Ok(_) => Err(QueryStoreError::invalid("request body must be a JSON object")),
            Err(e) => Err(QueryStoreError::invalid(e.to_string())),
        }
    }

    pub fn from_query(query: &Query) -> Result<Self> {
        Self::wrap("query", query)
    }

    /// Decode the body into an action's request type.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.body.clone())).map_err(|e| {
            QueryStoreError::invalid(format!("malformed '{}' request: {}", self.opcode, e))
        })
    }

    pub fn table(&self) -> Option<&str> {
        self.body.get("table").and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, ts: i64) -> Document {
        Document::new(id, ts, json!({}))
    }

    #[test]
    fn test_ties_break_by_id_in_both_directions() {
        let w = doc("W", 100);
        let x = doc("X", 100);
        let asc = ResultSort::new("_timestamp", SortOrder::Asc);
        let desc = ResultSort::new("_timestamp", SortOrder::Desc);
        assert_eq!(asc.compare(&w, &x), Ordering::Less);
        assert_eq!(desc.compare(&w, &x), Ordering::Less);
        assert_eq!(desc.compare(&doc("E", 200), &w), Ordering::Less);
    }

    #[test]
    fn test_missing_sort_value_sorts_last() {
        let with = Document::new("B", 1, json!({"battery": 10}));
        let without = Document::new("A", 1, json!({}));
        for order in [SortOrder::Asc, SortOrder::Desc] {
            let sort = ResultSort::new("battery", order);
            assert_eq!(sort.compare(&with, &without), Ordering::Less);
        }
    }

    #[test]
    fn test_query_defaults() {
        let query: Query = serde_json::from_value(json!({"table": "test-app"})).unwrap();
        assert_eq!(query, Query::new("test-app"));
        assert_eq!(query.limit, DEFAULT_QUERY_LIMIT);
    }

    #[test]
    fn test_action_request_flattens_body() {
        let query = Query::new("test-app").sort("_timestamp", SortOrder::Desc).page(0, 2);
        let request = ActionRequest::from_query(&query).unwrap();
        let wire = serde_json::to_value(&request).unwrap();
        assert_eq!(wire["opcode"], json!("query"));
        assert_eq!(wire["limit"], json!(2));

        let decoded: ActionRequest = serde_json::from_value(wire).unwrap();
        assert_eq!(decoded.table(), Some("test-app"));
        assert_eq!(decoded.parse::<Query>().unwrap(), query);
    }

    #[test]
    fn test_parse_reports_invalid_request() {
        let request = ActionRequest::new("query", Map::new());
        let err = request.parse::<Query>().unwrap_err();
        assert!(matches!(err, QueryStoreError::InvalidRequest(_)));
    }

    #[test]
    fn test_time_window_overlap() {
        let window = TimeWindow::between(150, 250);
        assert!(window.overlaps(100, 200));
        assert!(window.overlaps(250, 300));
        assert!(!window.overlaps(0, 150));
        assert!(TimeWindow::between(10, 5).is_empty());
        assert!(!TimeWindow::between(10, 5).overlaps(0, 100));
        assert!(TimeWindow::unbounded().overlaps(0, 1));
    }

    #[test]
    fn test_histogram_buckets() {
        assert_eq!(HistogramPeriod::Minutes.bucket(1_397_658_118_004), 1_397_658_060_000);
        assert_eq!(HistogramPeriod::Days.bucket(86_400_001), 86_400_000);
    }
}
