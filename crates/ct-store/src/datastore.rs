//! # Raw Document Store
//!
//! Path of record for ingested documents and the backend for id lookups.

use async_trait::async_trait;
use ct_core::{Document, QueryStoreError, Result};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[async_trait]
pub trait DataStore: Send + Sync {
    /// Persist a batch; either every document is stored or none is.
    async fn save_all(&self, table: &str, documents: &[Document]) -> Result<()>;

    async fn save(&self, table: &str, document: &Document) -> Result<()> {
        self.save_all(table, std::slice::from_ref(document)).await
    }

    /// Fails with `DocumentNotFound` when the id is unknown.
    async fn get(&self, table: &str, id: &str) -> Result<Document>;

    /// Documents in the order of `ids`; any missing id fails the whole call.
    async fn get_all(&self, table: &str, ids: &[String]) -> Result<Vec<Document>>;

    /// Stored versions of whichever `ids` exist, skipping the rest.
    async fn find_all(&self, table: &str, ids: &[String]) -> Result<Vec<Document>>;
}

#[derive(Default)]
pub struct MemoryDataStore {
    tables: RwLock<HashMap<String, HashMap<String, Document>>>,
}

impl MemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self, table: &str) -> usize {
        self.tables.read().await.get(table).map_or(0, HashMap::len)
    }
}

#[async_trait]
impl DataStore for MemoryDataStore {
    async fn save_all(&self, table: &str, documents: &[Document]) -> Result<()> {
        let mut tables = self.tables.write().await;
        let rows = tables.entry(table.to_string()).or_default();
        for document in documents {
            rows.insert(document.id.clone(), document.clone());
        }
        Ok(())
    }

    async fn get(&self, table: &str, id: &str) -> Result<Document> {
        self.tables
            .read()
            .await
            .get(table)
            .and_then(|rows| rows.get(id))
            .cloned()
            .ok_or_else(|| QueryStoreError::DocumentNotFound {
                table: table.to_string(),
                id: id.to_string(),
            })
    }

    async fn get_all(&self, table: &str, ids: &[String]) -> Result<Vec<Document>> {
        let tables = self.tables.read().await;
        let rows = tables.get(table);
        ids.iter()
            .map(|id| {
                rows.and_then(|rows| rows.get(id)).cloned().ok_or_else(|| {
                    QueryStoreError::DocumentNotFound {
                        table: table.to_string(),
                        id: id.clone(),
                    }
                })
            })
            .collect()
    }

    async fn find_all(&self, table: &str, ids: &[String]) -> Result<Vec<Document>> {
        let tables = self.tables.read().await;
        let Some(rows) = tables.get(table) else {
            return Ok(Vec::new());
        };
        Ok(ids.iter().filter_map(|id| rows.get(id).cloned()).collect())
    }
}
