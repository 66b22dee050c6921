//! # Action Registry
//!
//! Opcode to [`Action`] lookup. Built once at start-up and read-only
//! afterwards, so concurrent lookups need no locking.

use super::group::GroupAction;
use super::histogram::HistogramAction;
use super::query::QueryAction;
use super::Action;
use ct_core::{QueryStoreError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

pub struct ActionRegistry {
    actions: HashMap<&'static str, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn builder() -> ActionRegistryBuilder {
        ActionRegistryBuilder::default()
    }

    /// Registry with the built-in `query`, `group` and `histogram` actions.
    pub fn with_defaults() -> Result<Self> {
        Self::builder()
            .register(Arc::new(QueryAction))
            .register(Arc::new(GroupAction))
            .register(Arc::new(HistogramAction))
            .build()
    }

    pub fn resolve(&self, opcode: &str) -> Result<Arc<dyn Action>> {
        self.actions
            .get(opcode)
            .cloned()
            .ok_or_else(|| QueryStoreError::UnknownAction(opcode.to_string()))
    }

    pub fn opcodes(&self) -> Vec<&'static str> {
        let mut opcodes: Vec<&'static str> = self.actions.keys().copied().collect();
        opcodes.sort_unstable();
        opcodes
    }
}

#[derive(Default)]
pub struct ActionRegistryBuilder {
    actions: HashMap<&'static str, Arc<dyn Action>>,
    duplicates: Vec<&'static str>,
}

impl ActionRegistryBuilder {
    pub fn register(mut self, action: Arc<dyn Action>) -> Self {
        let opcode = action.opcode();
        if self.actions.insert(opcode, action).is_some() {
            self.duplicates.push(opcode);
        }
        self
    }

    pub fn build(self) -> Result<ActionRegistry> {
        if !self.duplicates.is_empty() {
            return Err(QueryStoreError::Internal(format!(
                "opcodes registered more than once: {}",
                self.duplicates.join(", ")
            )));
        }
        let registry = ActionRegistry {
            actions: self.actions,
        };
        info!("Registered actions: {}", registry.opcodes().join(", "));
        Ok(registry)
    }
}
