//! # Async Result Cache
//!
//! Outcomes of asynchronous computations, keyed by request fingerprint.
//! A slot is either reserved (computation in flight), holds a finished
//! outcome, or is absent (never submitted, expired or evicted). Failed
//! computations are stored like successes so pollers can tell "failed with
//! X" apart from "not yet available".

pub mod memory;

use async_trait::async_trait;
use ct_core::{ActionResponse, ErrorCode, QueryStoreError, Result};
use serde::{Deserialize, Serialize};

pub use memory::MemoryResultCache;

/// A computation that ended in an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedComputation {
    pub code: ErrorCode,
    pub message: String,
}

impl From<&QueryStoreError> for FailedComputation {
    fn from(error: &QueryStoreError) -> Self {
        Self {
            code: error.code(),
            message: error.to_string(),
        }
    }
}

/// What a finished computation leaves in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachedOutcome {
    Ready(ActionResponse),
    Failed(FailedComputation),
}

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    /// Reserved by a computation that has not finished yet.
    Pending,
    Ready(ActionResponse),
    Failed(FailedComputation),
    /// Never submitted, expired or evicted.
    Absent,
}

impl From<CachedOutcome> for CacheLookup {
    fn from(outcome: CachedOutcome) -> Self {
        match outcome {
            CachedOutcome::Ready(response) => Self::Ready(response),
            CachedOutcome::Failed(failure) => Self::Failed(failure),
        }
    }
}

/// Storage for async outcomes. Implementations report their own failures as
/// [`QueryStoreError::CacheUnavailable`].
#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<CacheLookup>;

    /// Store a finished outcome. The last writer wins.
    async fn put(&self, key: &str, outcome: &CachedOutcome) -> Result<()>;

    /// Atomically claim `key` for one computation. Returns `true` when the
    /// caller must compute: the key was absent or held a failure. Returns
    /// `false` when a computation is in flight or a result is ready.
    async fn reserve(&self, key: &str) -> Result<bool>;

    /// Drop a reservation whose computation will never run.
    async fn release(&self, key: &str) -> Result<()>;
}
