// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Cache storage and the single-flight ownership protocol.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use cadview_geom::Fingerprint;
use cadview_tess::{TessellationError, TessellationResult};
use lru::LruCache;
use tokio::sync::watch;
use tracing::debug;

use crate::{CacheLimits, CacheStats, FlightError};

type Outcome = Result<Arc<TessellationResult>, FlightError>;

struct Flight {
    id: u64,
    tx: watch::Sender<Option<Outcome>>,
}

struct Inner {
    entries: LruCache<Fingerprint, Arc<TessellationResult>>,
    bytes: usize,
    limits: CacheLimits,
    inflight: HashMap<Fingerprint, Flight>,
    next_flight: u64,
}

impl Inner {
    fn insert(&mut self, fingerprint: Fingerprint, result: Arc<TessellationResult>) -> u64 {
        self.bytes += result.byte_size();
        self.entries.put(fingerprint, result);
        let mut evicted = 0;
        // The newest entry is kept even if it alone exceeds the byte budget.
        while self.entries.len() > 1
            && (self.entries.len() > self.limits.max_entries.max(1)
                || self.bytes > self.limits.max_bytes)
        {
            let Some((victim, value)) = self.entries.pop_lru() else {
                break;
            };
            self.bytes = self.bytes.saturating_sub(value.byte_size());
            evicted += 1;
            debug!(fingerprint = %victim.short(), bytes = value.byte_size(), "evicted");
        }
        evicted
    }
}

struct Shared {
    inner: Mutex<Inner>,
    hits: AtomicU64,
    misses: AtomicU64,
    joins: AtomicU64,
    evictions: AtomicU64,
}

/// Process-wide tessellation cache. Cloning yields another handle to the
/// same storage.
#[derive(Clone)]
pub struct TessCache {
    shared: Arc<Shared>,
}

/// Result of [`TessCache::acquire_or_wait`].
#[derive(Debug)]
pub enum Acquired {
    /// A committed entry was already present.
    Hit(Arc<TessellationResult>),
    /// The caller must compute the result and resolve the ticket.
    Owner(OwnerTicket),
    /// Another caller computed the result while this one waited.
    Joined(Arc<TessellationResult>),
}

impl TessCache {
    /// Empty cache with the given budget.
    pub fn new(limits: CacheLimits) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    entries: LruCache::unbounded(),
                    bytes: 0,
                    limits,
                    inflight: HashMap::new(),
                    next_flight: 0,
                }),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                joins: AtomicU64::new(0),
                evictions: AtomicU64::new(0),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Committed result for `fingerprint`, marking it most recently used.
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<Arc<TessellationResult>> {
        let found = self.lock().entries.get(fingerprint).cloned();
        if found.is_some() {
            self.shared.hits.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Returns `true` when a committed entry exists. Does not touch recency.
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.lock().entries.contains(fingerprint)
    }

    /// Returns `true` while a computation for `fingerprint` is in flight.
    pub fn is_inflight(&self, fingerprint: &Fingerprint) -> bool {
        self.lock().inflight.contains_key(fingerprint)
    }

    /// Resolve `fingerprint` to a cached result, ownership of its computation,
    /// or the outcome of somebody else's computation.
    ///
    /// # Errors
    /// Returns the owner's [`FlightError`] when this caller joined a
    /// computation that failed or was cancelled.
    pub async fn acquire_or_wait(&self, fingerprint: Fingerprint) -> Result<Acquired, FlightError> {
        let mut rx = {
            let mut inner = self.lock();
            if let Some(hit) = inner.entries.get(&fingerprint).cloned() {
                self.shared.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Acquired::Hit(hit));
            }
            let joined = inner.inflight.get(&fingerprint).map(|f| f.tx.subscribe());
            if let Some(rx) = joined {
                self.shared.joins.fetch_add(1, Ordering::Relaxed);
                rx
            } else {
                let id = inner.next_flight;
                inner.next_flight += 1;
                let (tx, _) = watch::channel(None);
                inner.inflight.insert(fingerprint, Flight { id, tx });
                self.shared.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(Acquired::Owner(OwnerTicket {
                    cache: self.clone(),
                    fingerprint,
                    flight: id,
                    resolved: false,
                }));
            }
        };
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(value) => (*value).clone().unwrap_or(Err(FlightError::Cancelled)),
            Err(_) => Err(FlightError::Cancelled),
        };
        outcome.map(Acquired::Joined)
    }

    /// Store `result` under `fingerprint` and release any joiners.
    ///
    /// First writer wins: if an entry is already committed it is kept and
    /// returned, and `result` is discarded.
    pub fn commit(
        &self,
        fingerprint: Fingerprint,
        result: TessellationResult,
    ) -> Arc<TessellationResult> {
        self.resolve_commit(fingerprint, None, result)
    }

    /// Release joiners of `fingerprint` with `error`. Nothing is cached.
    pub fn fail(&self, fingerprint: Fingerprint, error: TessellationError) {
        self.resolve(fingerprint, None, Err(FlightError::Failed(error)));
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            hits: self.shared.hits.load(Ordering::Relaxed),
            misses: self.shared.misses.load(Ordering::Relaxed),
            joins: self.shared.joins.load(Ordering::Relaxed),
            evictions: self.shared.evictions.load(Ordering::Relaxed),
            entries: inner.entries.len(),
            bytes: inner.bytes,
        }
    }

    /// Drop every committed entry. In-flight computations are unaffected.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.bytes = 0;
    }

    fn resolve_commit(
        &self,
        fingerprint: Fingerprint,
        flight: Option<u64>,
        result: TessellationResult,
    ) -> Arc<TessellationResult> {
        let mut inner = self.lock();
        let existing = inner.entries.get(&fingerprint).cloned();
        let stored = existing.unwrap_or_else(|| {
            let arc = Arc::new(result);
            let evicted = inner.insert(fingerprint, Arc::clone(&arc));
            self.shared.evictions.fetch_add(evicted, Ordering::Relaxed);
            arc
        });
        Self::release(&mut inner, fingerprint, flight, Ok(Arc::clone(&stored)));
        stored
    }

    fn resolve(&self, fingerprint: Fingerprint, flight: Option<u64>, outcome: Outcome) {
        let mut inner = self.lock();
        Self::release(&mut inner, fingerprint, flight, outcome);
    }

    /// Wake joiners of the current flight. With `Some(id)`, only that flight
    /// is released; a newer flight for the same key is left alone.
    fn release(inner: &mut Inner, fingerprint: Fingerprint, flight: Option<u64>, outcome: Outcome) {
        let matches = inner
            .inflight
            .get(&fingerprint)
            .is_some_and(|f| flight.is_none_or(|id| f.id == id));
        if matches {
            if let Some(f) = inner.inflight.remove(&fingerprint) {
                f.tx.send_replace(Some(outcome));
            }
        }
    }
}

impl Default for TessCache {
    fn default() -> Self {
        Self::new(CacheLimits::default())
    }
}

impl std::fmt::Debug for TessCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TessCache").field("stats", &self.stats()).finish()
    }
}

/// Exclusive right to compute one fingerprint.
///
/// Resolve it with [`commit`](Self::commit) or [`fail`](Self::fail). Dropping
/// it unresolved releases joiners with [`FlightError::Cancelled`].
#[must_use = "dropping an OwnerTicket cancels the computation for all joiners"]
pub struct OwnerTicket {
    cache: TessCache,
    fingerprint: Fingerprint,
    flight: u64,
    resolved: bool,
}

impl OwnerTicket {
    /// Fingerprint this ticket owns.
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Store `result` and release joiners. Returns the canonical shared result.
    pub fn commit(mut self, result: TessellationResult) -> Arc<TessellationResult> {
        self.resolved = true;
        self.cache
            .resolve_commit(self.fingerprint, Some(self.flight), result)
    }

    /// Release joiners with `error`.
    pub fn fail(mut self, error: TessellationError) {
        self.resolved = true;
        self.cache.resolve(
            self.fingerprint,
            Some(self.flight),
            Err(FlightError::Failed(error)),
        );
    }
}

impl Drop for OwnerTicket {
    fn drop(&mut self) {
        if !self.resolved {
            debug!(fingerprint = %self.fingerprint.short(), "owner ticket dropped unresolved");
            self.cache
                .resolve(self.fingerprint, Some(self.flight), Err(FlightError::Cancelled));
        }
    }
}

impl std::fmt::Debug for OwnerTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnerTicket")
            .field("fingerprint", &self.fingerprint.short())
            .field("flight", &self.flight)
            .finish_non_exhaustive()
    }
}
