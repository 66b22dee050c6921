//! # Query Store
//!
//! Document ingest and id lookups. Saves go to the raw store first, as the
//! path of record, then to the time-sharded index. A document counts as
//! saved only once both have accepted it.

use crate::actions::ActionContext;
use ct_core::{Document, QueryStoreError, Result, TableFieldMapping};
use ct_store::{DataStore, ShardedIndex, Table, TableMetadataManager};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

pub struct QueryStore {
    tables: Arc<dyn TableMetadataManager>,
    store: Arc<dyn DataStore>,
    index: Arc<ShardedIndex>,
}

impl QueryStore {
    pub fn new(context: &ActionContext) -> Self {
        Self {
            tables: context.tables.clone(),
            store: context.store.clone(),
            index: context.index.clone(),
        }
    }

    async fn ensure_table(&self, table: &str) -> Result<()> {
        if self.tables.exists(table).await? {
            Ok(())
        } else {
            Err(QueryStoreError::NoSuchTable(table.to_string()))
        }
    }

    pub async fn save(&self, table: &str, document: Document) -> Result<()> {
        self.save_all(table, &[document]).await
    }

    /// Save a batch. Nothing is written unless the table exists and every
    /// document is well-formed. Index failures after the raw write are
    /// reported with the ids that did make it into both stores.
    ///
    /// Re-saving an id replaces it. When the new timestamp falls into another
    /// bucket, the copy in the old bucket index is evicted so the id stays
    /// unique across shards.
    pub async fn save_all(&self, table: &str, documents: &[Document]) -> Result<()> {
        self.ensure_table(table).await?;
        if documents.is_empty() {
            return Err(QueryStoreError::invalid("no documents to save"));
        }
        let mut ids = HashSet::with_capacity(documents.len());
        for document in documents {
            document.validate()?;
            if !ids.insert(document.id.as_str()) {
                return Err(QueryStoreError::invalid(format!(
                    "document id '{}' appears more than once in the batch",
                    document.id
                )));
            }
        }

        let nothing_saved = |e: QueryStoreError| QueryStoreError::DocumentSaveError {
            table: table.to_string(),
            message: e.to_string(),
            saved: Vec::new(),
        };
        let ids: Vec<String> = documents.iter().map(|d| d.id.clone()).collect();
        let previous = self
            .store
            .find_all(table, &ids)
            .await
            .map_err(nothing_saved)?;
        self.store
            .save_all(table, documents)
            .await
            .map_err(nothing_saved)?;

        let mut bulk = self.index.write(table, documents).await;
        let evicted = self.index.evict_moved(table, &previous, documents).await;
        if !evicted.failed.is_empty() {
            bulk.indexed
                .retain(|id| !evicted.failed.iter().any(|(failed, _)| failed == id));
            bulk.failed.extend(evicted.failed);
        }

        if let Some((id, reason)) = bulk.failed.first() {
            warn!(
                "Indexed {} of {} document(s) into {}",
                bulk.indexed.len(),
                documents.len(),
                table
            );
            return Err(QueryStoreError::DocumentSaveError {
                table: table.to_string(),
                message: format!(
                    "{} document(s) failed to index, first '{}': {}",
                    bulk.failed.len(),
                    id,
                    reason
                ),
                saved: bulk.indexed,
            });
        }
        info!("Saved {} document(s) to {}", documents.len(), table);
        Ok(())
    }

    pub async fn get(&self, table: &str, id: &str) -> Result<Document> {
        self.ensure_table(table).await?;
        self.store.get(table, id).await.map_err(|e| lookup_error(table, e))
    }

    pub async fn get_all(&self, table: &str, ids: &[String]) -> Result<Vec<Document>> {
        self.ensure_table(table).await?;
        if ids.is_empty() {
            return Err(QueryStoreError::invalid("no document ids given"));
        }
        self.store
            .get_all(table, ids)
            .await
            .map_err(|e| lookup_error(table, e))
    }

    pub async fn field_mappings(&self, table: &str) -> Result<TableFieldMapping> {
        self.ensure_table(table).await?;
        self.index.field_mappings(table).await
    }

    pub async fn create_table(&self, table: &Table) -> Result<()> {
        self.tables.save(table).await?;
        info!("Registered table {} (ttl {} days)", table.name, table.ttl_days);
        Ok(())
    }

    pub async fn table(&self, name: &str) -> Result<Table> {
        self.tables
            .get(name)
            .await?
            .ok_or_else(|| QueryStoreError::NoSuchTable(name.to_string()))
    }

    /// Registered tables, ordered by name.
    pub async fn tables(&self) -> Result<Vec<Table>> {
        self.tables.list().await
    }
}

fn lookup_error(table: &str, error: QueryStoreError) -> QueryStoreError {
    match error {
        e @ QueryStoreError::DocumentNotFound { .. } => e,
        e => QueryStoreError::DocumentGetError {
            table: table.to_string(),
            message: e.to_string(),
        },
    }
}
