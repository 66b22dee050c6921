//! # Table Metadata
//!
//! Registry of known tables. Every save and query checks existence here
//! before touching the raw store or the index.

use async_trait::async_trait;
use ct_core::{QueryStoreError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

fn default_ttl_days() -> u32 {
    15
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    /// Retention in days, applied by an external sweeper.
    #[serde(default = "default_ttl_days")]
    pub ttl_days: u32,
}

impl Table {
    pub fn new(name: impl Into<String>, ttl_days: u32) -> Self {
        Self {
            name: name.into(),
            ttl_days,
        }
    }

    /// Names become part of index names: lowercase ASCII letters, digits,
    /// `-` and `_`, starting with a letter or digit.
    pub fn validate(&self) -> Result<()> {
        let valid = self.name.len() <= 128
            && self
                .name
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
            && self
                .name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
        if !valid {
            return Err(QueryStoreError::invalid(format!(
                "invalid table name '{}'",
                self.name
            )));
        }
        if self.ttl_days == 0 {
            return Err(QueryStoreError::invalid("ttl_days must be positive"));
        }
        Ok(())
    }
}

#[async_trait]
pub trait TableMetadataManager: Send + Sync {
    /// Register or update a table.
    async fn save(&self, table: &Table) -> Result<()>;
    async fn get(&self, name: &str) -> Result<Option<Table>>;
    async fn exists(&self, name: &str) -> Result<bool>;
    async fn list(&self) -> Result<Vec<Table>>;
}

#[derive(Default)]
pub struct MemoryTableManager {
    tables: RwLock<BTreeMap<String, Table>>,
}

impl MemoryTableManager {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TableMetadataManager for MemoryTableManager {
    async fn save(&self, table: &Table) -> Result<()> {
        table.validate()?;
        self.tables
            .write()
            .await
            .insert(table.name.clone(), table.clone());
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<Table>> {
        Ok(self.tables.read().await.get(name).cloned())
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.tables.read().await.contains_key(name))
    }

    async fn list(&self) -> Result<Vec<Table>> {
        Ok(self.tables.read().await.values().cloned().collect())
    }
}
