//! # Search Index
//!
//! Interface to the search engine that holds one physical index per
//! `(table, bucket)`. Implementations accept translated [`IndexClause`]s and
//! know nothing about filters, tables or shard topology.

use async_trait::async_trait;
use ct_core::{Document, FieldTypeMapping, IndexClause, ResultSort, Result};

/// One search against a single physical index.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub clause: IndexClause,
    pub sort: Option<ResultSort>,
    /// Maximum number of hits to return, after sorting.
    pub size: usize,
}

impl SearchRequest {
    pub fn new(clause: IndexClause) -> Self {
        Self {
            clause,
            sort: None,
            size: usize::MAX,
        }
    }
}

/// Per-document outcome of a bulk write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkResult {
    pub indexed: Vec<String>,
    /// `(id, reason)` for every rejected document.
    pub failed: Vec<(String, String)>,
}

impl BulkResult {
    pub fn merge(&mut self, other: BulkResult) {
        self.indexed.extend(other.indexed);
        self.failed.extend(other.failed);
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Index documents into `index`, creating it on first write. A document
    /// whose id already exists replaces the previous version.
    async fn bulk_index(&self, index: &str, documents: &[Document]) -> Result<BulkResult>;

    /// Remove documents by id. Unknown ids and indices are ignored; returns
    /// the number of documents removed.
    async fn delete(&self, index: &str, ids: &[String]) -> Result<usize>;

    /// Hits of `request` in `index`, sorted and truncated to `request.size`.
    async fn search(&self, index: &str, request: &SearchRequest) -> Result<Vec<Document>>;

    /// Names of all existing indices.
    async fn list_indices(&self) -> Result<Vec<String>>;

    /// Introspected field types of one index.
    async fn field_mappings(&self, index: &str) -> Result<Vec<FieldTypeMapping>>;
}
