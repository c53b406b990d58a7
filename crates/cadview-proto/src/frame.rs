// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Stack frames: full snapshots and gapless diffs of the displayed stack.

use std::sync::Arc;

use cadview_app_core::{DisplayOptions, ViewerConfig};
use cadview_geom::{Fingerprint, ShapeKind};
use cadview_tess::TessellationResult;
use ciborium::ser::into_writer;
use serde::{Deserialize, Serialize};

/// Monotonic epoch identifier (one per delivered frame).
pub type EpochId = u64;
/// Blake3 state hash (32 bytes).
pub type Hash32 = [u8; 32];

/// Mesh payload of one entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MeshRef {
    /// Mesh data carried in this frame.
    Inline(Arc<TessellationResult>),
    /// Mesh the receiver already holds, by fingerprint.
    Cached(Fingerprint),
    /// Tessellation has not finished.
    Pending,
    /// Tessellation failed with this message.
    Failed(String),
}

impl MeshRef {
    fn readiness(&self) -> Readiness<'_> {
        match self {
            Self::Inline(_) | Self::Cached(_) => Readiness::Ready,
            Self::Pending => Readiness::Pending,
            Self::Failed(msg) => Readiness::Failed(msg),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
enum Readiness<'a> {
    Pending,
    Ready,
    Failed(&'a str),
}

/// One displayed object as the viewer sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEntry {
    /// Unique name within the stack.
    pub name: String,
    /// Shape classification.
    pub kind: ShapeKind,
    /// Content fingerprint; identifies the mesh.
    pub fingerprint: Fingerprint,
    /// Display options.
    pub options: DisplayOptions,
    /// Parent entry name (relation only).
    pub parent: Option<String>,
    /// Mesh payload or reference.
    pub mesh: MeshRef,
}

impl WireEntry {
    /// Equal in everything the viewer displays. Inline and cached references
    /// to the same fingerprint are the same state.
    pub fn same_state(&self, other: &Self) -> bool {
        self.view() == other.view()
    }

    fn view(&self) -> EntryView<'_> {
        EntryView {
            name: &self.name,
            kind: self.kind,
            fingerprint: self.fingerprint,
            options: self.options,
            parent: self.parent.as_deref(),
            mesh: self.mesh.readiness(),
        }
    }
}

/// Mesh-free projection hashed into the state hash.
#[derive(Debug, PartialEq, Serialize)]
struct EntryView<'a> {
    name: &'a str,
    kind: ShapeKind,
    fingerprint: Fingerprint,
    options: DisplayOptions,
    parent: Option<&'a str>,
    mesh: Readiness<'a>,
}

/// blake3 over the canonical CBOR of the mesh-free view of `entries`.
pub fn state_hash(entries: &[WireEntry]) -> Hash32 {
    let view: Vec<EntryView<'_>> = entries.iter().map(WireEntry::view).collect();
    let mut bytes = Vec::new();
    // Plain data into a Vec: serialization is infallible.
    let _ = into_writer(&view, &mut bytes);
    blake3::hash(&bytes).into()
}

/// Structural change in a diff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StackOp {
    /// Remove the entry with this name.
    Remove {
        /// Entry name.
        name: String,
    },
    /// Place `entry` at `index`, replacing or moving an entry of the same name.
    Upsert {
        /// Target position after all earlier ops.
        index: u32,
        /// Entry state.
        entry: WireEntry,
    },
}

/// Full stack state for an epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackSnapshot {
    /// Epoch of this state.
    pub epoch: EpochId,
    /// Ordered entries.
    pub entries: Vec<WireEntry>,
    /// Merged viewer configuration.
    pub config: ViewerConfig,
    /// [`state_hash`] of `entries`.
    pub state_hash: Hash32,
}

/// Change between consecutive epochs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackDiff {
    /// Epoch the diff applies to.
    pub from_epoch: EpochId,
    /// Epoch after applying (`from_epoch + 1`).
    pub to_epoch: EpochId,
    /// Removes first, then upserts in ascending index order.
    pub ops: Vec<StackOp>,
    /// Merged viewer configuration.
    pub config: ViewerConfig,
    /// [`state_hash`] of the post-state.
    pub state_hash: Hash32,
}

/// Stack state frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StackFrame {
    /// Full state.
    Snapshot(StackSnapshot),
    /// Gapless change.
    Diff(StackDiff),
}

impl StackFrame {
    /// Epoch the receiver holds after applying this frame.
    pub fn epoch(&self) -> EpochId {
        match self {
            Self::Snapshot(s) => s.epoch,
            Self::Diff(d) => d.to_epoch,
        }
    }

    /// Entries carried by this frame (all for a snapshot, upserted ones for a diff).
    pub fn carried_entries(&self) -> Box<dyn Iterator<Item = &WireEntry> + '_> {
        match self {
            Self::Snapshot(s) => Box::new(s.entries.iter()),
            Self::Diff(d) => Box::new(d.ops.iter().filter_map(|op| match op {
                StackOp::Upsert { entry, .. } => Some(entry),
                StackOp::Remove { .. } => None,
            })),
        }
    }
}

/// Ops turning `old` into `new`. Names must be unique within each list.
///
/// Removes come first, then upserts in ascending index order; entries already
/// in the right place with the same state produce no op.
pub fn diff_entries(old: &[WireEntry], new: &[WireEntry]) -> Vec<StackOp> {
    let mut ops = Vec::new();
    let mut work: Vec<WireEntry> = Vec::with_capacity(old.len());
    for e in old {
        if new.iter().any(|n| n.name == e.name) {
            work.push(e.clone());
        } else {
            ops.push(StackOp::Remove {
                name: e.name.clone(),
            });
        }
    }
    for (i, e) in new.iter().enumerate() {
        if work.get(i).is_some_and(|w| w.same_state(e)) {
            continue;
        }
        // `new` has unique names, so placing entry i never disturbs 0..i.
        let _ = place(&mut work, i, e.clone());
        ops.push(StackOp::Upsert {
            index: i as u32,
            entry: e.clone(),
        });
    }
    ops
}

/// Insert or move `entry` to `index`. Returns the index bound violated, if any.
pub(crate) fn place(
    entries: &mut Vec<WireEntry>,
    index: usize,
    entry: WireEntry,
) -> Result<(), usize> {
    if let Some(pos) = entries.iter().position(|e| e.name == entry.name) {
        if pos == index {
            entries[pos] = entry;
            return Ok(());
        }
        entries.remove(pos);
    }
    if index > entries.len() {
        return Err(entries.len());
    }
    entries.insert(index, entry);
    Ok(())
}
