// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(missing_docs, clippy::unwrap_used, clippy::panic)]

use std::collections::HashSet;
use std::sync::Arc;

use cadview_app_core::{DisplayOptions, ViewerConfig};
use cadview_geom::{Fingerprint, ShapeKind};
use cadview_proto::{
    decode_message, diff_entries, encode_message, state_hash, Message, MeshRef, StackDiff,
    StackFrame, StackSnapshot, ViewerModel, WireEntry,
};
use cadview_tess::TessellationResult;
use proptest::prelude::*;

const NAMES: [&str; 6] = ["base", "lid", "hinge", "pin", "edge", "Solid_1"];

fn mesh(seed: u8) -> Arc<TessellationResult> {
    Arc::new(TessellationResult {
        vertices: vec![[f32::from(seed), 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        triangles: vec![[0, 1, 2]],
        ..TessellationResult::default()
    })
}

fn entry(name: &str, fp: u8, pending: bool, alpha: f32) -> WireEntry {
    WireEntry {
        name: name.to_string(),
        kind: ShapeKind::Solid,
        fingerprint: Fingerprint([fp; 32]),
        options: DisplayOptions::default().with_alpha(alpha),
        parent: None,
        mesh: if pending {
            MeshRef::Pending
        } else {
            MeshRef::Inline(mesh(fp))
        },
    }
}

fn stack() -> impl Strategy<Value = Vec<WireEntry>> {
    prop::collection::vec((0..NAMES.len(), 0u8..4, any::<bool>(), 0u8..3), 0..8).prop_map(|raw| {
        let mut seen = HashSet::new();
        raw.into_iter()
            .filter(|(n, ..)| seen.insert(*n))
            .map(|(n, fp, pending, a)| entry(NAMES[n], fp, pending, f32::from(a) / 2.0))
            .collect()
    })
}

/// Replace inline meshes the viewer already holds by references.
fn as_sent(entries: &[WireEntry], known: &HashSet<Fingerprint>) -> Vec<WireEntry> {
    entries
        .iter()
        .cloned()
        .map(|mut e| {
            if matches!(e.mesh, MeshRef::Inline(_)) && known.contains(&e.fingerprint) {
                e.mesh = MeshRef::Cached(e.fingerprint);
            }
            e
        })
        .collect()
}

fn snapshot(epoch: u64, entries: Vec<WireEntry>) -> StackFrame {
    StackFrame::Snapshot(StackSnapshot {
        epoch,
        state_hash: state_hash(&entries),
        entries,
        config: ViewerConfig::builtin(),
    })
}

fn through_wire(frame: StackFrame) -> StackFrame {
    let bytes = encode_message(&Message::Data(frame), 9).unwrap();
    match decode_message(&bytes).unwrap().0 {
        Message::Data(frame) => frame,
        other => panic!("unexpected message {other:?}"),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn diff_reproduces_the_new_stack(old in stack(), new in stack()) {
        let mut model = ViewerModel::new();
        model.apply(through_wire(snapshot(1, old.clone()))).unwrap();

        let known: HashSet<Fingerprint> = model
            .entries()
            .iter()
            .filter(|e| matches!(e.mesh, MeshRef::Cached(_)))
            .map(|e| e.fingerprint)
            .collect();
        let sent = as_sent(&new, &known);
        let diff = StackFrame::Diff(StackDiff {
            from_epoch: 1,
            to_epoch: 2,
            ops: diff_entries(&old, &sent),
            config: ViewerConfig::builtin(),
            state_hash: state_hash(&sent),
        });
        model.apply(through_wire(diff)).unwrap();

        prop_assert_eq!(model.epoch(), Some(2));
        prop_assert_eq!(model.entries().len(), new.len());
        for (held, want) in model.entries().iter().zip(&new) {
            prop_assert!(held.same_state(want), "{} differs", want.name);
        }
        prop_assert_eq!(state_hash(model.entries()), state_hash(&new));
        for e in new.iter().filter(|e| !matches!(e.mesh, MeshRef::Pending)) {
            prop_assert_eq!(
                model.mesh(&e.fingerprint).map(|m| m.vertices[0][0]),
                Some(f32::from(e.fingerprint.0[0]))
            );
        }
    }
}

#[test]
fn reconnect_snapshot_replaces_everything() {
    let mut model = ViewerModel::new();
    model
        .apply(snapshot(1, vec![entry("base", 1, false, 1.0), entry("lid", 2, false, 1.0)]))
        .unwrap();
    model.apply(snapshot(1, vec![entry("pin", 3, false, 0.5)])).unwrap();
    let names: Vec<_> = model.entries().iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, ["pin"]);
    assert!(model.mesh(&Fingerprint([1; 32])).is_none());
}

#[test]
fn replaying_a_diff_is_a_gap() {
    let mut model = ViewerModel::new();
    let old = vec![entry("base", 1, false, 1.0)];
    let new = vec![entry("base", 1, false, 1.0), entry("lid", 2, true, 1.0)];
    model.apply(snapshot(5, old.clone())).unwrap();
    let diff = StackFrame::Diff(StackDiff {
        from_epoch: 5,
        to_epoch: 6,
        ops: diff_entries(&old, &new),
        config: ViewerConfig::default(),
        state_hash: state_hash(&new),
    });
    model.apply(diff.clone()).unwrap();
    assert!(model.apply(diff).is_err());
    assert_eq!(model.epoch(), Some(6));
    assert_eq!(model.entries()[1].mesh, MeshRef::Pending);
}

#[test]
fn config_with_passthrough_keys_survives_the_wire() {
    let mut cfg = ViewerConfig::builtin();
    cfg.extra
        .insert("collapse".to_string(), serde_json::json!("leaves"));
    let bytes = encode_message(&Message::Config(cfg.clone()), 3).unwrap();
    let (msg, _, _) = decode_message(&bytes).unwrap();
    assert_eq!(msg, Message::Config(cfg));
}
