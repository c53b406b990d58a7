// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Ordered, named object stack of one viewer session.

use std::sync::Arc;

use cadview_app_core::DisplayOptions;
use cadview_geom::{Fingerprint, ShapeDescriptor, ShapeKind};
use cadview_proto::{MeshRef, WireEntry};
use cadview_tess::TessellationResult;
use indexmap::IndexMap;

use crate::progress::ObjectStatus;

/// One displayed object.
#[derive(Debug, Clone)]
pub struct StackEntry {
    /// Unique name within the stack.
    pub name: String,
    /// Normalized shape.
    pub descriptor: ShapeDescriptor,
    /// Display options.
    pub options: DisplayOptions,
    /// Name of the parent entry (relation only).
    pub parent: Option<String>,
    /// Tessellation status.
    pub status: ObjectStatus,
    /// Mesh once available.
    pub mesh: Option<Arc<TessellationResult>>,
    /// Failure message when `status` is `Failed`.
    pub error: Option<String>,
}

impl StackEntry {
    /// Fresh entry in `Reference` state.
    pub fn new(
        name: impl Into<String>,
        descriptor: ShapeDescriptor,
        options: DisplayOptions,
    ) -> Self {
        Self {
            name: name.into(),
            descriptor,
            options,
            parent: None,
            status: ObjectStatus::Reference,
            mesh: None,
            error: None,
        }
    }

    /// Set the parent relation.
    pub fn with_parent(mut self, parent: Option<String>) -> Self {
        self.parent = parent;
        self
    }

    /// Shape kind.
    pub fn kind(&self) -> ShapeKind {
        self.descriptor.kind()
    }

    /// Content fingerprint.
    pub fn fingerprint(&self) -> Fingerprint {
        self.descriptor.fingerprint()
    }

    fn to_wire(&self, parent: Option<String>) -> WireEntry {
        let mesh = match (&self.mesh, self.status) {
            (_, ObjectStatus::Failed) => {
                MeshRef::Failed(self.error.clone().unwrap_or_default())
            }
            (Some(mesh), _) => MeshRef::Inline(mesh.clone()),
            (None, _) => MeshRef::Pending,
        };
        WireEntry {
            name: self.name.clone(),
            kind: self.kind(),
            fingerprint: self.fingerprint(),
            options: self.options,
            parent,
            mesh,
        }
    }
}

/// Insertion-ordered stack of entries keyed by name.
///
/// Every mutation bumps [`revision`](Self::revision).
#[derive(Debug, Default, Clone)]
pub struct ObjectStack {
    entries: IndexMap<String, StackEntry>,
    revision: u64,
}

impl ObjectStack {
    /// Empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.revision += 1;
    }

    /// Replace the entry with the same name in place, or append.
    /// Returns the replaced entry.
    pub fn upsert(&mut self, entry: StackEntry) -> Option<StackEntry> {
        self.revision += 1;
        self.entries.insert(entry.name.clone(), entry)
    }

    /// Remove `name`, keeping the order of the others.
    pub fn remove_by_name(&mut self, name: &str) -> Option<StackEntry> {
        let removed = self.entries.shift_remove(name);
        if removed.is_some() {
            self.revision += 1;
        }
        removed
    }

    /// Entries in display order.
    pub fn snapshot(&self) -> Vec<StackEntry> {
        self.entries.values().cloned().collect()
    }

    /// Entry called `name`.
    pub fn get(&self, name: &str) -> Option<&StackEntry> {
        self.entries.get(name)
    }

    /// Names in display order.
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when the stack holds no entry.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Mutation counter.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// First free name among `Label`, `Label_1`, `Label_2`, ...
    pub fn generate_name(&self, kind: ShapeKind) -> String {
        let base = kind.label();
        if !self.entries.contains_key(base) {
            return base.to_string();
        }
        (1u64..)
            .map(|i| format!("{base}_{i}"))
            .find(|candidate| !self.entries.contains_key(candidate))
            .unwrap_or_else(|| base.to_string())
    }

    /// Record a tessellation outcome for `name`.
    ///
    /// Applies only while the stored entry still carries `fingerprint`; an
    /// entry replaced in the meantime keeps its own state. Returns whether
    /// the update applied.
    pub fn set_status(
        &mut self,
        name: &str,
        fingerprint: Fingerprint,
        status: ObjectStatus,
        mesh: Option<Arc<TessellationResult>>,
        error: Option<String>,
    ) -> bool {
        let Some(entry) = self.entries.get_mut(name) else {
            return false;
        };
        if entry.fingerprint() != fingerprint {
            return false;
        }
        entry.status = status;
        if mesh.is_some() {
            entry.mesh = mesh;
        }
        entry.error = error;
        self.revision += 1;
        true
    }

    /// Outbound form of the stack. Parents that name no entry are dropped.
    pub fn to_wire(&self) -> Vec<WireEntry> {
        self.entries
            .values()
            .map(|e| {
                let parent = e
                    .parent
                    .as_ref()
                    .filter(|p| self.entries.contains_key(p.as_str()))
                    .cloned();
                e.to_wire(parent)
            })
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use cadview_geom::{normalize, CadObject, TessParams};

    fn entry(name: &str, size: f64) -> StackEntry {
        let d = normalize(CadObject::cuboid(size, 1.0, 1.0), TessParams::default()).unwrap();
        StackEntry::new(name, d, DisplayOptions::default())
    }

    #[test]
    fn upsert_preserves_position_of_reused_name() {
        let mut s = ObjectStack::new();
        s.upsert(entry("a", 1.0));
        s.upsert(entry("b", 1.0));
        s.upsert(entry("c", 1.0));
        let old = s.upsert(entry("b", 2.0)).unwrap();
        assert_eq!(old.fingerprint(), entry("b", 1.0).fingerprint());
        assert_eq!(s.names(), ["a", "b", "c"]);
        assert_eq!(s.get("b").unwrap().fingerprint(), entry("x", 2.0).fingerprint());
    }

    #[test]
    fn clear_then_upserts_follow_call_order() {
        let mut s = ObjectStack::new();
        s.upsert(entry("old", 1.0));
        s.clear();
        for n in ["z", "y", "x"] {
            s.upsert(entry(n, 1.0));
        }
        assert_eq!(s.names(), ["z", "y", "x"]);
    }

    #[test]
    fn remove_keeps_order_of_the_rest() {
        let mut s = ObjectStack::new();
        for n in ["a", "b", "c"] {
            s.upsert(entry(n, 1.0));
        }
        let rev = s.revision();
        assert!(s.remove_by_name("b").is_some());
        assert!(s.remove_by_name("b").is_none());
        assert_eq!(s.names(), ["a", "c"]);
        assert_eq!(s.revision(), rev + 1);
    }

    #[test]
    fn generated_names_skip_taken_ones() {
        let mut s = ObjectStack::new();
        assert_eq!(s.generate_name(ShapeKind::Solid), "Solid");
        s.upsert(entry("Solid", 1.0));
        assert_eq!(s.generate_name(ShapeKind::Solid), "Solid_1");
        s.upsert(entry("Solid_1", 1.0));
        assert_eq!(s.generate_name(ShapeKind::Solid), "Solid_2");
        assert_eq!(s.generate_name(ShapeKind::Edge), "Edge");
    }

    #[test]
    fn stale_status_update_is_ignored() {
        let mut s = ObjectStack::new();
        let first = entry("box", 1.0);
        let fp1 = first.fingerprint();
        s.upsert(first);
        s.upsert(entry("box", 2.0));
        let mesh = Arc::new(TessellationResult::default());
        assert!(!s.set_status("box", fp1, ObjectStatus::Done, Some(mesh), None));
        assert_eq!(s.get("box").unwrap().status, ObjectStatus::Reference);
    }

    #[test]
    fn wire_form_reflects_status_and_parent() {
        let mut s = ObjectStack::new();
        s.upsert(entry("face", 1.0));
        s.upsert(entry("edge", 2.0).with_parent(Some("face".into())));
        s.upsert(entry("orphan", 3.0).with_parent(Some("gone".into())));
        let fp = s.get("face").unwrap().fingerprint();
        let mesh = Some(Arc::new(TessellationResult::default()));
        s.set_status("face", fp, ObjectStatus::Done, mesh, None);
        let fp = s.get("orphan").unwrap().fingerprint();
        s.set_status("orphan", fp, ObjectStatus::Failed, None, Some("boom".into()));

        let wire = s.to_wire();
        assert!(matches!(wire[0].mesh, MeshRef::Inline(_)));
        assert_eq!(wire[1].mesh, MeshRef::Pending);
        assert_eq!(wire[1].parent.as_deref(), Some("face"));
        assert_eq!(wire[2].mesh, MeshRef::Failed("boom".into()));
        assert_eq!(wire[2].parent, None);
    }
}
