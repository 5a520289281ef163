use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{IdCounter, StoreError};

/// Decorates saves against a shared identifier counter.
///
/// A save that fails with a primary-key collision triggers one resync of the
/// counter to the true maximum identifier and exactly one retry. Anything else,
/// a failed resync, or a failed retry surfaces the original error.
#[derive(Clone)]
pub struct IdAllocator {
    counter: Arc<dyn IdCounter>,
    resyncs: Arc<AtomicU64>,
}

impl IdAllocator {
    pub fn new(counter: Arc<dyn IdCounter>) -> Self {
        Self {
            counter,
            resyncs: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn counter(&self) -> &Arc<dyn IdCounter> {
        &self.counter
    }

    /// Number of successful counter resyncs performed by this allocator
    pub fn resync_count(&self) -> u64 {
        self.resyncs.load(Ordering::Relaxed)
    }

    pub async fn next_id(&self) -> Result<i64, StoreError> {
        self.counter.next_id().await
    }

    /// Advance the counter past every identifier in use. Idempotent and monotonic.
    pub async fn resync(&self) -> Result<i64, StoreError> {
        let max = self.counter.max_assigned_id().await?;
        let next = self.counter.advance_to(max + 1).await?;
        self.resyncs.fetch_add(1, Ordering::Relaxed);
        info!(max_assigned = max, next_id = next, "identifier counter resynchronized");
        Ok(next)
    }

    /// Run `op`, recovering once from an identifier collision.
    ///
    /// `op` is invoked at most twice. Operations that allocate an identifier
    /// must draw it inside `op` so the retry picks up the resynced counter.
    pub async fn save_with_resync<T, F, Fut>(&self, op: F) -> Result<T, StoreError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_identifier_collision() => err,
            Err(err) => return Err(err),
        };

        warn!(error = %err, "primary key collision on save, resynchronizing identifier counter");

        if let Err(resync_err) = self.resync().await {
            error!(
                error = %resync_err,
                "identifier counter could not be adjusted, giving up on save"
            );
            return Err(err);
        }

        match op().await {
            Ok(value) => Ok(value),
            Err(retry_err) => {
                error!(error = %retry_err, "save failed again after counter resync");
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for IdAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdAllocator")
            .field("resyncs", &self.resync_count())
            .finish()
    }
}
