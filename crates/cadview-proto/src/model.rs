// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Receiving side of the stack protocol.

use std::collections::HashMap;
use std::sync::Arc;

use cadview_app_core::ViewerConfig;
use cadview_geom::Fingerprint;
use cadview_tess::TessellationResult;
use thiserror::Error;

use crate::frame::{place, state_hash, EpochId, Hash32, MeshRef, StackFrame, StackOp, WireEntry};
use crate::ViewerStatus;

/// Why a frame was rejected. The model is unchanged after any error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    /// Diff does not start at the held epoch (or nothing is held yet).
    #[error("[DESYNC] diff from epoch {got} but viewer holds {held:?}")]
    Gap {
        /// Epoch the model holds.
        held: Option<EpochId>,
        /// `from_epoch` of the rejected diff.
        got: EpochId,
    },
    /// Diff does not advance by exactly one epoch.
    #[error("[DESYNC] diff {from} -> {to} is not consecutive")]
    NotConsecutive {
        /// `from_epoch`.
        from: EpochId,
        /// `to_epoch`.
        to: EpochId,
    },
    /// Post-state hash differs from the frame's declared hash.
    #[error("[DESYNC] state hash mismatch")]
    HashMismatch {
        /// Declared by the sender.
        expected: Hash32,
        /// Computed by the viewer.
        computed: Hash32,
    },
    /// A cached mesh reference the viewer does not hold.
    #[error("[DESYNC] unknown mesh {0}")]
    UnknownMesh(Fingerprint),
    /// A remove for an entry that does not exist.
    #[error("[DESYNC] unknown entry `{0}`")]
    UnknownEntry(String),
    /// An upsert index past the end of the stack.
    #[error("[DESYNC] upsert index {index} beyond stack length {len}")]
    IndexOutOfRange {
        /// Requested index.
        index: u32,
        /// Stack length at that point.
        len: usize,
    },
}

/// Viewer-side stack model.
///
/// Holds the entries of the last applied epoch plus the meshes they
/// reference. Meshes no longer referenced are dropped after every frame, so a
/// sender can track what the viewer holds from the entries it delivered.
#[derive(Debug, Default, Clone)]
pub struct ViewerModel {
    epoch: Option<EpochId>,
    entries: Vec<WireEntry>,
    meshes: HashMap<Fingerprint, Arc<TessellationResult>>,
    config: ViewerConfig,
}

impl ViewerModel {
    /// Empty model holding no epoch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Epoch of the held state.
    pub fn epoch(&self) -> Option<EpochId> {
        self.epoch
    }

    /// Entries in display order. Ready entries carry `MeshRef::Cached`.
    pub fn entries(&self) -> &[WireEntry] {
        &self.entries
    }

    /// Mesh held for `fingerprint`.
    pub fn mesh(&self, fingerprint: &Fingerprint) -> Option<&Arc<TessellationResult>> {
        self.meshes.get(fingerprint)
    }

    /// Configuration delivered with the last frame.
    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    /// Overlay a standalone config message.
    pub fn merge_config(&mut self, config: &ViewerConfig) {
        self.config.merge(config);
    }

    /// Summary answered to `status` commands.
    pub fn status(&self) -> ViewerStatus {
        ViewerStatus {
            epoch: self.epoch,
            names: self.entries.iter().map(|e| e.name.clone()).collect(),
            config: self.config.clone(),
        }
    }

    /// Apply `frame` atomically.
    ///
    /// # Errors
    /// Any [`ApplyError`]; the model keeps its previous state.
    pub fn apply(&mut self, frame: StackFrame) -> Result<(), ApplyError> {
        let mut meshes = self.meshes.clone();
        let (epoch, entries, config, expected) = match frame {
            StackFrame::Snapshot(snap) => {
                let entries = snap
                    .entries
                    .into_iter()
                    .map(|e| ingest(e, &mut meshes))
                    .collect::<Result<Vec<_>, _>>()?;
                (snap.epoch, entries, snap.config, snap.state_hash)
            }
            StackFrame::Diff(diff) => {
                if self.epoch != Some(diff.from_epoch) {
                    return Err(ApplyError::Gap {
                        held: self.epoch,
                        got: diff.from_epoch,
                    });
                }
                if diff.to_epoch != diff.from_epoch + 1 {
                    return Err(ApplyError::NotConsecutive {
                        from: diff.from_epoch,
                        to: diff.to_epoch,
                    });
                }
                let mut entries = self.entries.clone();
                for op in diff.ops {
                    match op {
                        StackOp::Remove { name } => {
                            let before = entries.len();
                            entries.retain(|e| e.name != name);
                            if entries.len() == before {
                                return Err(ApplyError::UnknownEntry(name));
                            }
                        }
                        StackOp::Upsert { index, entry } => {
                            let entry = ingest(entry, &mut meshes)?;
                            place(&mut entries, index as usize, entry)
                                .map_err(|len| ApplyError::IndexOutOfRange { index, len })?;
                        }
                    }
                }
                (diff.to_epoch, entries, diff.config, diff.state_hash)
            }
        };

        let computed = state_hash(&entries);
        if computed != expected {
            return Err(ApplyError::HashMismatch { expected, computed });
        }
        meshes.retain(|fp, _| {
            entries
                .iter()
                .any(|e| matches!(e.mesh, MeshRef::Cached(c) if c == *fp))
        });
        self.epoch = Some(epoch);
        self.entries = entries;
        self.meshes = meshes;
        self.config = config;
        Ok(())
    }
}

/// Move inline meshes into the store and check cached references.
fn ingest(
    mut entry: WireEntry,
    meshes: &mut HashMap<Fingerprint, Arc<TessellationResult>>,
) -> Result<WireEntry, ApplyError> {
    match std::mem::replace(&mut entry.mesh, MeshRef::Pending) {
        MeshRef::Inline(mesh) => {
            meshes.insert(entry.fingerprint, mesh);
            entry.mesh = MeshRef::Cached(entry.fingerprint);
        }
        MeshRef::Cached(fp) => {
            if !meshes.contains_key(&fp) {
                return Err(ApplyError::UnknownMesh(fp));
            }
            entry.mesh = MeshRef::Cached(fp);
        }
        other => entry.mesh = other,
    }
    Ok(entry)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::frame::{StackDiff, StackSnapshot};
    use cadview_app_core::DisplayOptions;
    use cadview_geom::ShapeKind;

    fn entry(name: &str, fp: u8, inline: bool) -> WireEntry {
        let fingerprint = Fingerprint([fp; 32]);
        WireEntry {
            name: name.into(),
            kind: ShapeKind::Face,
            fingerprint,
            options: DisplayOptions::default(),
            parent: None,
            mesh: if inline {
                MeshRef::Inline(Arc::new(TessellationResult::default()))
            } else {
                MeshRef::Cached(fingerprint)
            },
        }
    }

    fn snapshot(epoch: EpochId, entries: Vec<WireEntry>) -> StackFrame {
        StackFrame::Snapshot(StackSnapshot {
            epoch,
            state_hash: state_hash(&entries),
            entries,
            config: ViewerConfig::default(),
        })
    }

    #[test]
    fn snapshot_stores_inline_meshes() {
        let mut m = ViewerModel::new();
        m.apply(snapshot(1, vec![entry("a", 1, true)])).unwrap();
        assert_eq!(m.epoch(), Some(1));
        assert!(m.mesh(&Fingerprint([1; 32])).is_some());
        assert_eq!(m.entries()[0].mesh, MeshRef::Cached(Fingerprint([1; 32])));
    }

    #[test]
    fn cached_reference_to_unknown_mesh_is_rejected() {
        let mut m = ViewerModel::new();
        let err = m.apply(snapshot(1, vec![entry("a", 1, false)])).unwrap_err();
        assert_eq!(err, ApplyError::UnknownMesh(Fingerprint([1; 32])));
        assert_eq!(m.epoch(), None);
    }

    #[test]
    fn diff_needs_matching_base_epoch() {
        let mut m = ViewerModel::new();
        m.apply(snapshot(4, vec![entry("a", 1, true)])).unwrap();
        let target = vec![entry("a", 1, false)];
        let diff = StackFrame::Diff(StackDiff {
            from_epoch: 2,
            to_epoch: 3,
            ops: vec![],
            config: ViewerConfig::default(),
            state_hash: state_hash(&target),
        });
        assert!(matches!(m.apply(diff), Err(ApplyError::Gap { held: Some(4), got: 2 })));
    }

    #[test]
    fn bad_hash_leaves_model_untouched() {
        let mut m = ViewerModel::new();
        m.apply(snapshot(1, vec![entry("a", 1, true)])).unwrap();
        let diff = StackFrame::Diff(StackDiff {
            from_epoch: 1,
            to_epoch: 2,
            ops: vec![StackOp::Remove { name: "a".into() }],
            config: ViewerConfig::default(),
            state_hash: [0; 32],
        });
        assert!(matches!(m.apply(diff), Err(ApplyError::HashMismatch { .. })));
        assert_eq!(m.epoch(), Some(1));
        assert_eq!(m.entries().len(), 1);
    }

    #[test]
    fn unreferenced_meshes_are_dropped() {
        let mut m = ViewerModel::new();
        m.apply(snapshot(1, vec![entry("a", 1, true)])).unwrap();
        m.apply(snapshot(2, vec![entry("b", 2, true)])).unwrap();
        assert!(m.mesh(&Fingerprint([1; 32])).is_none());
        assert!(m.mesh(&Fingerprint([2; 32])).is_some());
    }
}
