//! # Query Executor
//!
//! Runs actions in two modes that share one validation step:
//!
//! - [`QueryExecutor::execute`] blocks until the action finishes or the
//!   per-call timeout fires.
//! - [`QueryExecutor::execute_async`] validates, claims the request's cache
//!   slot and hands the work to the [`WorkerPool`], returning an
//!   [`AsyncDataToken`] right away. Only the submission that wins the slot
//!   computes; concurrent identical submissions get the same token.
//!
//! Validation errors surface synchronously from both modes. Execution errors
//! of async work are written to the cache as failed outcomes.

pub mod pool;

use crate::actions::{Action, ActionContext, ActionRegistry, PreparedRequest};
use crate::cache::{CacheLookup, CachedOutcome, FailedComputation, ResultCache};
use ct_core::{ActionRequest, ActionResponse, AsyncDataToken, QueryStoreError, Result};
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub use pool::WorkerPool;

pub struct QueryExecutor {
    registry: Arc<ActionRegistry>,
    context: Arc<ActionContext>,
    cache: Arc<dyn ResultCache>,
    pool: WorkerPool,
    timeout: Duration,
}

impl QueryExecutor {
    pub fn new(
        registry: Arc<ActionRegistry>,
        context: Arc<ActionContext>,
        cache: Arc<dyn ResultCache>,
        pool: WorkerPool,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            context,
            cache,
            pool,
            timeout,
        }
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    pub async fn execute(&self, request: &ActionRequest) -> Result<ActionResponse> {
        let action = self.registry.resolve(&request.opcode)?;
        let prepared = action.validate(request, &self.context).await?;

        let response = run(action.as_ref(), &prepared, &self.context, self.timeout).await?;

        let key = prepared.fingerprint();
        if let Err(e) = self
            .cache
            .put(&key, &CachedOutcome::Ready(response.clone()))
            .await
        {
            warn!("Could not cache {} result {}: {}", prepared.opcode, key, e);
        }
        Ok(response)
    }

    pub async fn execute_async(&self, request: &ActionRequest) -> Result<AsyncDataToken> {
        let action = self.registry.resolve(&request.opcode)?;
        let prepared = action.validate(request, &self.context).await?;
        let token = AsyncDataToken::new(action.opcode(), prepared.fingerprint());

        if !self.cache.reserve(&token.key).await? {
            debug!("Coalesced {} request onto {}", token.action, token.key);
            return Ok(token);
        }

        let cache = self.cache.clone();
        let context = self.context.clone();
        let key = token.key.clone();
        let timeout = self.timeout;
        let job = async move {
            let outcome = match run(action.as_ref(), &prepared, &context, timeout).await {
                Ok(response) => CachedOutcome::Ready(response),
                Err(e) => {
                    warn!("Async {} {} failed: {} ({})", prepared.opcode, key, e, e.code());
                    CachedOutcome::Failed(FailedComputation::from(&e))
                }
            };
            if let Err(e) = cache.put(&key, &outcome).await {
                error!("Could not store outcome of {}: {}", key, e);
            }
        };

        if let Err(e) = self.pool.submit(job) {
            warn!("Rejected async {} {}: {}", token.action, token.key, e);
            if let Err(release) = self.cache.release(&token.key).await {
                warn!("Could not release {}: {}", token.key, release);
            }
            return Err(e);
        }
        info!(
            "Submitted async {} on {} as {}",
            token.action,
            request.table().unwrap_or("-"),
            token.key
        );
        Ok(token)
    }

    /// Redeem a token. `Absent` covers never-submitted and expired alike.
    pub async fn fetch(&self, token: &AsyncDataToken) -> Result<CacheLookup> {
        self.registry.resolve(&token.action)?;
        self.cache.get(&token.key).await
    }
}

/// Execute under the per-call timeout. A panicking action is turned into
/// an `Internal` error so its outcome still reaches the caller or the cache.
async fn run(
    action: &dyn Action,
    prepared: &PreparedRequest,
    context: &ActionContext,
    timeout: Duration,
) -> Result<ActionResponse> {
    let guarded = AssertUnwindSafe(action.execute(prepared, context)).catch_unwind();
    match tokio::time::timeout(timeout, guarded).await {
        Ok(Ok(result)) => result,
        Ok(Err(panic)) => {
            let reason = panic_message(panic.as_ref());
            error!("{} action panicked: {}", prepared.opcode, reason);
            Err(QueryStoreError::Internal(format!(
                "{} action panicked: {}",
                prepared.opcode, reason
            )))
        }
        Err(_) => Err(QueryStoreError::ExecutionTimeout(timeout.as_millis() as u64)),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
