//! # ct-core: The "Model" of CANTATA
//!
//! Defines what flows through the analytics store: timestamped JSON
//! [`Document`]s, the flat [`Filter`] list with its [`FilterCombinerType`],
//! the request envelopes every action consumes, and the responses they
//! produce.
//!
//! Two evaluation paths live here and must agree:
//!
//! - **Logical**: [`Filter::matches`] evaluates a predicate in-process.
//! - **Translated**: [`Filter::to_clause`] lowers a validated filter into an
//!   [`IndexClause`] that the search index executes.
//!
//! Filters are validated (and their operands coerced) against a table's
//! [`TableFieldMapping`] before either path runs.

pub mod clause;
pub mod document;
pub mod error;
pub mod filter;
pub mod mapping;
pub mod query;
pub mod response;
pub mod value;

pub use clause::IndexClause;
pub use document::{Document, ID_FIELD, TIMESTAMP_FIELD};
pub use error::{ErrorCode, QueryStoreError, Result};
pub use filter::{Filter, FilterCombinerType};
pub use mapping::{FieldType, FieldTypeMapping, TableFieldMapping};
pub use query::{
    ActionRequest, GroupRequest, HistogramPeriod, HistogramRequest, Query, ResultSort, SortOrder,
    TimeWindow, DEFAULT_QUERY_LIMIT,
};
pub use response::{ActionResponse, AsyncDataToken, HistogramCount};
