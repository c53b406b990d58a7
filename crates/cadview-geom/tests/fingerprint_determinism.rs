// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(missing_docs, clippy::unwrap_used)]
//! Fingerprints are a pure function of geometry and tessellation parameters.

use cadview_geom::{normalize, CadObject, Edge, Face, Solid, TessParams};
use proptest::prelude::*;

fn finite() -> impl Strategy<Value = f64> {
    -1.0e3..1.0e3f64
}

fn point() -> impl Strategy<Value = [f64; 3]> {
    [finite(), finite(), finite()]
}

fn object() -> impl Strategy<Value = CadObject> {
    let leaf = prop_oneof![
        (point(), point()).prop_map(|(origin, size)| CadObject::Solid(Solid::Box { origin, size })),
        (point(), 0.01..100.0f64)
            .prop_map(|(center, radius)| CadObject::Solid(Solid::Sphere { center, radius })),
        prop::collection::vec(point(), 3..8)
            .prop_map(|points| CadObject::Face(Face::Polygon { points })),
        (point(), point()).prop_map(|(start, end)| CadObject::Edge(Edge::Line { start, end })),
        point().prop_map(CadObject::Vertex),
    ];
    leaf.prop_recursive(2, 8, 4, |inner| {
        prop::collection::vec(inner, 1..4).prop_map(CadObject::Compound)
    })
}

fn params() -> impl Strategy<Value = TessParams> {
    (0.001..1.0f64, 0.05..1.0f64).prop_map(|(d, a)| TessParams::new(d, a))
}

proptest! {
    #[test]
    fn same_input_same_fingerprint(obj in object(), p in params()) {
        let a = normalize(obj.clone(), p).unwrap();
        let b = normalize(obj, p).unwrap();
        prop_assert_eq!(a.fingerprint(), b.fingerprint());
        prop_assert_eq!(a.kind(), b.kind());
    }

    #[test]
    fn deviation_change_changes_fingerprint(obj in object(), p in params()) {
        let a = normalize(obj.clone(), p).unwrap();
        let q = TessParams { deviation: p.deviation * 2.0, ..p };
        let b = normalize(obj, q).unwrap();
        prop_assert_ne!(a.fingerprint(), b.fingerprint());
    }
}

#[test]
fn fingerprint_is_stable_across_repeated_calls() {
    let fps: Vec<_> = (0..16)
        .map(|_| {
            normalize(CadObject::cuboid(10.0, 20.0, 30.0), TessParams::default())
                .unwrap()
                .fingerprint()
        })
        .collect();
    assert!(fps.windows(2).all(|w| w[0] == w[1]));
}
