//! # Actions
//!
//! A unit of analytical work bound to an opcode. Every action validates its
//! own request before anything runs: it checks the table, checks the filters
//! against the table's field mapping and produces a [`PreparedRequest`]. The
//! prepared request's canonical form is what the action executes and what the
//! async cache key is derived from, so two structurally identical requests
//! share one cache slot.

pub mod group;
pub mod histogram;
pub mod query;
pub mod registry;

use async_trait::async_trait;
use ct_core::filter::validate_all;
use ct_core::{
    ActionRequest, ActionResponse, Filter, QueryStoreError, Result, TableFieldMapping,
};
use ct_store::{DataStore, ShardedIndex, TableMetadataManager};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;

pub use registry::ActionRegistry;

/// Collaborators available to every action.
pub struct ActionContext {
    pub tables: Arc<dyn TableMetadataManager>,
    pub store: Arc<dyn DataStore>,
    pub index: Arc<ShardedIndex>,
}

/// A validated request in canonical form.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub opcode: &'static str,
    pub canonical: Value,
}

impl PreparedRequest {
    pub fn new<T: Serialize>(opcode: &'static str, body: &T) -> Result<Self> {
        let canonical = serde_json::to_value(body)
            .map_err(|e| QueryStoreError::Internal(format!("unserializable request: {}", e)))?;
        Ok(Self { opcode, canonical })
    }

    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.canonical.clone())
            .map_err(|e| QueryStoreError::Internal(format!("prepared request mismatch: {}", e)))
    }

    /// Hex SHA-256 over the opcode and the canonical JSON. Object keys
    /// serialize sorted, so field order in the client's request is irrelevant.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.opcode.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.canonical.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[async_trait]
pub trait Action: Send + Sync {
    fn opcode(&self) -> &'static str;

    /// Check the request shape and its table. Must not cause side effects.
    async fn validate(&self, request: &ActionRequest, ctx: &ActionContext) -> Result<PreparedRequest>;

    async fn execute(&self, request: &PreparedRequest, ctx: &ActionContext) -> Result<ActionResponse>;
}

/// Fails with `NoSuchTable` unless `table` is registered.
pub async fn ensure_table(ctx: &ActionContext, table: &str) -> Result<()> {
    if ctx.tables.exists(table).await? {
        Ok(())
    } else {
        Err(QueryStoreError::NoSuchTable(table.to_string()))
    }
}

/// The field mapping of a registered table.
pub async fn table_mapping(ctx: &ActionContext, table: &str) -> Result<TableFieldMapping> {
    ensure_table(ctx, table).await?;
    ctx.index.field_mappings(table).await
}

/// Validate filters and a list of referenced fields against the mapping.
pub fn check_request(
    mapping: &TableFieldMapping,
    filters: &[Filter],
    fields: &[&str],
) -> Result<Vec<Filter>> {
    for field in fields {
        if mapping.field_type(field).is_none() {
            return Err(QueryStoreError::invalid(format!(
                "field '{}' is not mapped in table '{}'",
                field, mapping.table
            )));
        }
    }
    validate_all(filters, mapping)
}
