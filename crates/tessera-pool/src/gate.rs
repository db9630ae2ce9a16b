use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::context::Context;
use crate::error::{PoolError, PoolResult};

/// Bounded counting semaphore shared by every routed operation.
#[derive(Clone, Debug)]
pub struct AdmissionGate {
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl AdmissionGate {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Default capacity: available parallelism × 100.
    pub fn default_capacity() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            * 100
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Wait for a permit, or give up when `ctx` is done.
    pub async fn acquire(&self, ctx: &Context) -> PoolResult<OwnedSemaphorePermit> {
        if ctx.is_done() {
            return Err(PoolError::Cancelled);
        }
        tokio::select! {
            permit = Arc::clone(&self.permits).acquire_owned() => {
                permit.map_err(|_| PoolError::Cancelled)
            }
            _ = ctx.done() => Err(PoolError::Cancelled),
        }
    }

    /// Run `work` while holding a permit.
    ///
    /// If `ctx` ends while waiting for the permit, `work` never starts. If it
    /// ends while `work` runs, the call returns [`PoolError::Cancelled`] and
    /// the work is dropped.
    pub async fn run<T, E, F>(&self, ctx: &Context, work: F) -> Result<T, E>
    where
        F: std::future::Future<Output = Result<T, E>>,
        E: From<PoolError>,
    {
        let _permit = self.acquire(ctx).await?;
        tokio::select! {
            out = work => out,
            _ = ctx.done() => Err(PoolError::Cancelled.into()),
        }
    }
}

impl Default for AdmissionGate {
    fn default() -> Self {
        Self::new(Self::default_capacity())
    }
}
