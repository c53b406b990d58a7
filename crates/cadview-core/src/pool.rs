// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Bounded tessellation workers and the cache-coordinated mesh lookup.

use std::num::NonZeroUsize;
use std::sync::Arc;

use cadview_cache::{Acquired, FlightError, TessCache};
use cadview_geom::ShapeDescriptor;
use cadview_tess::{TessellationError, TessellationResult, Tessellator};
use tokio::sync::Semaphore;
use tracing::debug;

use crate::progress::ObjectStatus;

/// How often a joiner re-acquires after its owner was cancelled.
const MAX_JOIN_RETRIES: usize = 3;

/// Runs tessellations on the blocking pool, at most `workers` at a time.
#[derive(Debug, Clone)]
pub struct TessPool {
    permits: Arc<Semaphore>,
    workers: usize,
}

impl TessPool {
    /// Pool with `workers` concurrent tessellations (at least one).
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            permits: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    /// Pool sized to the available parallelism.
    pub fn available() -> Self {
        Self::new(std::thread::available_parallelism().map_or(1, NonZeroUsize::get))
    }

    /// Concurrency bound.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Tessellate `descriptor` on a blocking worker.
    ///
    /// The permit travels with the blocking job, so a worker stays counted
    /// until its tessellation returns even when the awaiting call is dropped.
    pub async fn run(
        &self,
        engine: Arc<dyn Tessellator>,
        descriptor: ShapeDescriptor,
    ) -> Result<TessellationResult, TessellationError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| TessellationError::Degenerate("tessellation pool shut down".into()))?;
        tokio::task::spawn_blocking(move || {
            let result = engine.tessellate(&descriptor);
            drop(permit);
            result
        })
        .await
        .map_err(|err| {
            TessellationError::Degenerate(format!("tessellation worker died: {err}"))
        })?
    }
}

impl Default for TessPool {
    fn default() -> Self {
        Self::available()
    }
}

/// Final outcome of resolving one descriptor's mesh.
#[derive(Debug, Clone)]
pub(crate) enum MeshOutcome {
    /// Mesh ready; `Cached` or `Done`.
    Ready(ObjectStatus, Arc<TessellationResult>),
    /// Tessellation failed with this message.
    Failed(String),
}

/// Compute or join the computation of `descriptor`'s mesh.
///
/// Call after a cache lookup missed. Joins and late hits yield `Cached`;
/// owning the computation yields `Done` on success. A joiner whose owner was
/// cancelled re-acquires, up to [`MAX_JOIN_RETRIES`] times.
pub(crate) async fn compute_or_join(
    cache: &TessCache,
    pool: &TessPool,
    engine: &Arc<dyn Tessellator>,
    descriptor: &ShapeDescriptor,
) -> MeshOutcome {
    let fp = descriptor.fingerprint();
    let mut cancelled = 0usize;
    loop {
        match cache.acquire_or_wait(fp).await {
            Ok(Acquired::Hit(mesh) | Acquired::Joined(mesh)) => {
                return MeshOutcome::Ready(ObjectStatus::Cached, mesh)
            }
            Ok(Acquired::Owner(ticket)) => {
                return match pool.run(Arc::clone(engine), descriptor.clone()).await {
                    Ok(result) => MeshOutcome::Ready(ObjectStatus::Done, ticket.commit(result)),
                    Err(err) => {
                        let msg = err.to_string();
                        ticket.fail(err);
                        MeshOutcome::Failed(msg)
                    }
                };
            }
            Err(FlightError::Failed(err)) => return MeshOutcome::Failed(err.to_string()),
            Err(FlightError::Cancelled) if cancelled < MAX_JOIN_RETRIES => {
                cancelled += 1;
                debug!(
                    fingerprint = %fp.short(),
                    attempt = cancelled,
                    "owner cancelled, re-acquiring"
                );
            }
            Err(err @ FlightError::Cancelled) => return MeshOutcome::Failed(err.to_string()),
        }
    }
}
