// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Tessellation cache for CadView.
//!
//! [`TessCache`] maps a shape [`Fingerprint`](cadview_geom::Fingerprint) to an
//! immutable, shared [`TessellationResult`](cadview_tess::TessellationResult).
//!
//! # Single-Flight
//!
//! [`TessCache::acquire_or_wait`] hands exactly one caller per fingerprint an
//! [`OwnerTicket`]. Everyone else arriving before the owner resolves suspends
//! and receives the owner's outcome:
//!
//! - [`OwnerTicket::commit`] stores the result and wakes joiners with it;
//! - [`OwnerTicket::fail`] wakes joiners with [`FlightError::Failed`] and
//!   stores nothing;
//! - dropping the ticket unresolved wakes joiners with
//!   [`FlightError::Cancelled`].
//!
//! # Eviction
//!
//! Committed entries live in an LRU ordered by lookup. Once the entry count or
//! the byte total exceeds [`CacheLimits`], least-recently-used entries are
//! dropped. In-flight computations are not entries and are never evicted.
//! Evicting an entry never invalidates an `Arc` already handed out.

mod cache;

pub use cache::{Acquired, OwnerTicket, TessCache};

use cadview_tess::TessellationError;
use thiserror::Error;

/// Outcome delivered to joiners whose owner did not commit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlightError {
    /// The owner's tessellation failed; nothing was cached.
    #[error("[TESS_FAILED] {0}")]
    Failed(TessellationError),
    /// The owner dropped its ticket without resolving it.
    #[error("[CANCELLED] tessellation abandoned by its owner")]
    Cancelled,
}

/// Budget for committed entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLimits {
    /// Maximum number of committed entries.
    pub max_entries: usize,
    /// Maximum total [`byte_size`](cadview_tess::TessellationResult::byte_size).
    pub max_bytes: usize,
}

impl CacheLimits {
    /// Default entry ceiling.
    pub const DEFAULT_MAX_ENTRIES: usize = 1024;
    /// Default byte ceiling (512 MiB).
    pub const DEFAULT_MAX_BYTES: usize = 512 * 1024 * 1024;
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            max_entries: Self::DEFAULT_MAX_ENTRIES,
            max_bytes: Self::DEFAULT_MAX_BYTES,
        }
    }
}

/// Point-in-time counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups and acquisitions answered from a committed entry.
    pub hits: u64,
    /// Acquisitions that made the caller the owner.
    pub misses: u64,
    /// Acquisitions that waited on another caller's computation.
    pub joins: u64,
    /// Entries dropped by the LRU policy.
    pub evictions: u64,
    /// Committed entries currently held.
    pub entries: usize,
    /// Bytes currently held.
    pub bytes: usize,
}
