//! # In-Memory Search Index
//!
//! Single-node [`SearchIndex`] that evaluates [`IndexClause`]s directly over
//! stored documents. Field types are fixed on first sight per index and
//! documents that contradict them are rejected, as a dynamically-mapped
//! search engine would.

use crate::index::{BulkResult, SearchIndex, SearchRequest};
use async_trait::async_trait;
use ct_core::mapping::flatten;
use ct_core::query::compare_documents;
use ct_core::value::{any_scalar, compare, equals};
use ct_core::{Document, FieldTypeMapping, IndexClause, QueryStoreError, Result, TableFieldMapping};
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

struct Shard {
    documents: BTreeMap<String, Document>,
    mappings: TableFieldMapping,
}

impl Shard {
    fn new(index: &str) -> Self {
        Self {
            documents: BTreeMap::new(),
            mappings: TableFieldMapping::new(index),
        }
    }

    fn conflict(&self, document: &Document) -> Option<String> {
        flatten(&document.data).into_iter().find_map(|incoming| {
            let existing = self.mappings.field_type(&incoming.field)?;
            let compatible = existing == incoming.field_type
                || (existing.is_numeric() && incoming.field_type.is_numeric());
            (!compatible).then(|| {
                format!(
                    "field '{}' is mapped as {:?}, document has {:?}",
                    incoming.field, existing, incoming.field_type
                )
            })
        })
    }
}

#[derive(Default)]
pub struct MemoryIndex {
    shards: RwLock<HashMap<String, Shard>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents held by `index`, zero when it does not exist.
    pub async fn document_count(&self, index: &str) -> usize {
        self.shards
            .read()
            .await
            .get(index)
            .map_or(0, |shard| shard.documents.len())
    }
}

#[async_trait]
impl SearchIndex for MemoryIndex {
    async fn bulk_index(&self, index: &str, documents: &[Document]) -> Result<BulkResult> {
        let mut shards = self.shards.write().await;
        let shard = shards
            .entry(index.to_string())
            .or_insert_with(|| Shard::new(index));

        let mut result = BulkResult::default();
        for document in documents {
            if let Err(e) = document.validate() {
                result.failed.push((document.id.clone(), e.to_string()));
                continue;
            }
            if let Some(reason) = shard.conflict(document) {
                result.failed.push((document.id.clone(), reason));
                continue;
            }
            shard.mappings.extend(flatten(&document.data));
            shard.documents.insert(document.id.clone(), document.clone());
            result.indexed.push(document.id.clone());
        }
        Ok(result)
    }

    async fn delete(&self, index: &str, ids: &[String]) -> Result<usize> {
        let mut shards = self.shards.write().await;
        let Some(shard) = shards.get_mut(index) else {
            return Ok(0);
        };
        Ok(ids
            .iter()
            .filter(|id| shard.documents.remove(id.as_str()).is_some())
            .count())
    }

    async fn search(&self, index: &str, request: &SearchRequest) -> Result<Vec<Document>> {
        let compiled = Compiled::new(&request.clause)?;
        let shards = self.shards.read().await;
        let shard = shards
            .get(index)
            .ok_or_else(|| QueryStoreError::Internal(format!("index '{}' not found", index)))?;

        let mut hits: Vec<Document> = shard
            .documents
            .values()
            .filter(|doc| compiled.matches(doc))
            .cloned()
            .collect();
        hits.sort_by(|a, b| compare_documents(request.sort.as_ref(), a, b));
        hits.truncate(request.size);
        Ok(hits)
    }

    async fn list_indices(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.shards.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn field_mappings(&self, index: &str) -> Result<Vec<FieldTypeMapping>> {
        self.shards
            .read()
            .await
            .get(index)
            .map(|shard| shard.mappings.mappings.clone())
            .ok_or_else(|| QueryStoreError::Internal(format!("index '{}' not found", index)))
    }
}

// ============================================================================
// Clause evaluation
// ============================================================================

/// A clause with its regular expressions compiled once per search.
enum Compiled<'a> {
    MatchAll,
    Term {
        field: &'a str,
        value: &'a Value,
    },
    Range {
        field: &'a str,
        bounds: Vec<(&'a Value, fn(Ordering) -> bool)>,
    },
    Regexp {
        field: &'a str,
        regex: Regex,
    },
    Not(Box<Compiled<'a>>),
    Bool {
        must: Vec<Compiled<'a>>,
        should: Vec<Compiled<'a>>,
    },
}

impl<'a> Compiled<'a> {
    fn new(clause: &'a IndexClause) -> Result<Self> {
        Ok(match clause {
            IndexClause::MatchAll => Self::MatchAll,
            IndexClause::Term { field, value } => Self::Term {
                field: field.as_str(),
                value,
            },
            IndexClause::Range {
                field,
                gt,
                gte,
                lt,
                lte,
            } => {
                let mut bounds: Vec<(&Value, fn(Ordering) -> bool)> = Vec::new();
                if let Some(v) = gt {
                    bounds.push((v, Ordering::is_gt));
                }
                if let Some(v) = gte {
                    bounds.push((v, Ordering::is_ge));
                }
                if let Some(v) = lt {
                    bounds.push((v, Ordering::is_lt));
                }
                if let Some(v) = lte {
                    bounds.push((v, Ordering::is_le));
                }
                Self::Range {
                    field: field.as_str(),
                    bounds,
                }
            }
            IndexClause::Regexp { field, pattern } => Self::Regexp {
                field: field.as_str(),
                regex: ct_core::filter::anchored(pattern)
                    .map_err(|e| QueryStoreError::invalid(format!("bad pattern: {}", e)))?,
            },
            IndexClause::Not { clause } => Self::Not(Box::new(Self::new(clause)?)),
            IndexClause::Bool { must, should } => Self::Bool {
                must: must.iter().map(Self::new).collect::<Result<_>>()?,
                should: should.iter().map(Self::new).collect::<Result<_>>()?,
            },
        })
    }

    fn matches(&self, doc: &Document) -> bool {
        match self {
            Self::MatchAll => true,
            Self::Term { field, value } => doc
                .field(field)
                .is_some_and(|actual| any_scalar(&actual, |v| equals(v, value))),
            Self::Range { field, bounds } => doc.field(field).is_some_and(|actual| {
                any_scalar(&actual, |v| {
                    bounds
                        .iter()
                        .all(|(bound, accept)| compare(v, bound).is_some_and(*accept))
                })
            }),
            Self::Regexp { field, regex } => doc.field(field).is_some_and(|actual| {
                any_scalar(&actual, |v| v.as_str().is_some_and(|s| regex.is_match(s)))
            }),
            Self::Not(inner) => !inner.matches(doc),
            Self::Bool { must, should } => {
                must.iter().all(|c| c.matches(doc))
                    && (should.is_empty() || should.iter().any(|c| c.matches(doc)))
            }
        }
    }
}
