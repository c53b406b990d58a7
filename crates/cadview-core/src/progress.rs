// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-object progress reporting.
//!
//! Reporters only observe. The pipeline behaves identically with any of them,
//! including [`NullReporter`].

use std::io::Write;
use std::sync::Mutex;

use cadview_geom::Fingerprint;
use tracing::{debug, info, warn};

/// Tessellation status of one stack entry.
///
/// Order: `Reference → Tessellating → Cached | Done | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectStatus {
    /// Accepted into the stack; mesh not resolved yet.
    Reference,
    /// Mesh being computed (by this call or another one).
    Tessellating,
    /// Mesh came from the cache or from another call's computation.
    Cached,
    /// Mesh computed by this call.
    Done,
    /// Tessellation failed.
    Failed,
}

impl ObjectStatus {
    /// `Cached`, `Done` and `Failed` are terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cached | Self::Done | Self::Failed)
    }

    /// Short indicator symbol, if this status has one.
    pub fn symbol(self) -> Option<char> {
        match self {
            Self::Reference => Some('-'),
            Self::Tessellating => None,
            Self::Cached => Some('*'),
            Self::Done => Some('+'),
            Self::Failed => Some('!'),
        }
    }

    /// Lowercase name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reference => "reference",
            Self::Tessellating => "tessellating",
            Self::Cached => "cached",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ObjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observer of status transitions.
pub trait ProgressReporter: Send + Sync {
    /// Called once per transition of the entry `name`.
    fn report(&self, name: &str, fingerprint: &Fingerprint, status: ObjectStatus);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl ProgressReporter for NullReporter {
    fn report(&self, _name: &str, _fingerprint: &Fingerprint, _status: ObjectStatus) {}
}

/// Emits one `tracing` event per transition.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn report(&self, name: &str, fingerprint: &Fingerprint, status: ObjectStatus) {
        let fp = fingerprint.short();
        match status {
            ObjectStatus::Failed => {
                warn!(name, fingerprint = %fp, status = %status, "object failed");
            }
            s if s.is_terminal() => info!(name, fingerprint = %fp, status = %s, "object ready"),
            s => debug!(name, fingerprint = %fp, status = %s, "object progress"),
        }
    }
}

/// One recorded transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Entry name.
    pub name: String,
    /// Fingerprint of the entry's shape.
    pub fingerprint: Fingerprint,
    /// New status.
    pub status: ObjectStatus,
}

/// Records every transition in memory.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: Mutex<Vec<ProgressEvent>>,
}

impl CollectingReporter {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// All transitions so far, in arrival order.
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Transitions of one entry, in arrival order.
    pub fn statuses(&self, name: &str) -> Vec<ObjectStatus> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| e.name == name)
            .map(|e| e.status)
            .collect()
    }

    /// Forget recorded transitions.
    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl ProgressReporter for CollectingReporter {
    fn report(&self, name: &str, fingerprint: &Fingerprint, status: ObjectStatus) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ProgressEvent {
                name: name.to_string(),
                fingerprint: *fingerprint,
                status,
            });
    }
}

/// Writes one indicator symbol per transition that has one
/// (`-` reference, `+` new, `*` cached, `!` failed).
#[derive(Debug)]
pub struct SymbolReporter<W> {
    out: Mutex<W>,
}

impl<W: Write + Send> SymbolReporter<W> {
    /// Reporter writing to `out`.
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    /// Recover the writer.
    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

impl<W: Write + Send> ProgressReporter for SymbolReporter<W> {
    fn report(&self, _name: &str, _fingerprint: &Fingerprint, status: ObjectStatus) {
        let Some(symbol) = status.symbol() else {
            return;
        };
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        // Indicator output is best-effort.
        let _ = write!(out, "{symbol}");
        let _ = out.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbols_cover_reference_and_terminal_states() {
        let r = SymbolReporter::new(Vec::new());
        let fp = Fingerprint([0; 32]);
        for s in [
            ObjectStatus::Reference,
            ObjectStatus::Tessellating,
            ObjectStatus::Done,
            ObjectStatus::Reference,
            ObjectStatus::Cached,
            ObjectStatus::Failed,
        ] {
            r.report("x", &fp, s);
        }
        assert_eq!(r.into_inner(), b"-+-*!");
    }

    #[test]
    fn collecting_reporter_filters_by_name() {
        let r = CollectingReporter::new();
        let fp = Fingerprint([1; 32]);
        r.report("a", &fp, ObjectStatus::Reference);
        r.report("b", &fp, ObjectStatus::Reference);
        r.report("a", &fp, ObjectStatus::Done);
        assert_eq!(r.statuses("a"), [ObjectStatus::Reference, ObjectStatus::Done]);
        assert_eq!(r.events().len(), 3);
        r.clear();
        assert!(r.events().is_empty());
    }

    #[test]
    fn terminal_states() {
        assert!(!ObjectStatus::Reference.is_terminal());
        assert!(!ObjectStatus::Tessellating.is_terminal());
        assert!(ObjectStatus::Cached.is_terminal());
        assert_eq!(ObjectStatus::Done.to_string(), "done");
    }
}
