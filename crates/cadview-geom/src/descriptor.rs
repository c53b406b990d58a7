// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shape classification and the immutable [`ShapeDescriptor`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fingerprint::{Fingerprint, FingerprintHasher};
use crate::object::{CadObject, Edge, Face, Solid};
use crate::params::TessParams;

const FINGERPRINT_DOMAIN: &str = "cadview.shape.v1";

/// Uniform classification of displayable objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeKind {
    /// Closed volume.
    Solid,
    /// Connected set of faces.
    Shell,
    /// Single face.
    Face,
    /// Curve.
    Edge,
    /// Point.
    Vertex,
    /// Pre-tessellated triangles.
    Mesh,
}

impl ShapeKind {
    /// Topological rank used to classify compounds (solid highest).
    pub fn rank(self) -> u8 {
        match self {
            Self::Vertex => 0,
            Self::Edge => 1,
            Self::Face | Self::Mesh => 2,
            Self::Shell => 3,
            Self::Solid => 4,
        }
    }

    /// Human-readable label, also used to generate entry names.
    pub fn label(self) -> &'static str {
        match self {
            Self::Solid => "Solid",
            Self::Shell => "Shell",
            Self::Face => "Face",
            Self::Edge => "Edge",
            Self::Vertex => "Vertex",
            Self::Mesh => "Mesh",
        }
    }

    fn tag(self) -> u8 {
        match self {
            Self::Solid => 1,
            Self::Shell => 2,
            Self::Face => 3,
            Self::Edge => 4,
            Self::Vertex => 5,
            Self::Mesh => 6,
        }
    }
}

impl std::fmt::Display for ShapeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Errors raised while normalizing client input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    /// The object's representation cannot be classified.
    #[error("[UNSUPPORTED_SHAPE_KIND] {0}")]
    UnsupportedShapeKind(String),
}

/// Normalized, immutable description of one displayable object.
///
/// Cloning is cheap: the geometry payload is shared.
#[derive(Debug, Clone)]
pub struct ShapeDescriptor {
    kind: ShapeKind,
    geometry: Arc<CadObject>,
    params: TessParams,
    fingerprint: Fingerprint,
}

impl ShapeDescriptor {
    /// Shape classification.
    pub fn kind(&self) -> ShapeKind {
        self.kind
    }

    /// Geometry payload.
    pub fn geometry(&self) -> &CadObject {
        &self.geometry
    }

    /// Tessellation parameters baked into the fingerprint.
    pub fn params(&self) -> &TessParams {
        &self.params
    }

    /// Content fingerprint of geometry + parameters.
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }
}

impl PartialEq for ShapeDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint == other.fingerprint
    }
}

impl Eq for ShapeDescriptor {}

/// Classify an object without hashing it.
pub fn classify(object: &CadObject) -> Result<ShapeKind, NormalizeError> {
    match object {
        CadObject::Solid(_) => Ok(ShapeKind::Solid),
        CadObject::Shell(faces) if faces.is_empty() => Err(NormalizeError::UnsupportedShapeKind(
            "shell without faces".into(),
        )),
        CadObject::Shell(_) => Ok(ShapeKind::Shell),
        CadObject::Face(_) => Ok(ShapeKind::Face),
        CadObject::Edge(_) => Ok(ShapeKind::Edge),
        CadObject::Vertex(_) => Ok(ShapeKind::Vertex),
        CadObject::Mesh(_) => Ok(ShapeKind::Mesh),
        CadObject::Compound(members) => classify_compound(members),
        CadObject::Foreign { type_name } => Err(NormalizeError::UnsupportedShapeKind(format!(
            "cannot classify kernel type `{type_name}`"
        ))),
    }
}

fn classify_compound(members: &[CadObject]) -> Result<ShapeKind, NormalizeError> {
    let mut kinds = Vec::with_capacity(members.len());
    for member in members {
        kinds.push(classify(member)?);
    }
    let has_mesh = kinds.iter().any(|k| *k == ShapeKind::Mesh);
    let has_brep = kinds.iter().any(|k| *k != ShapeKind::Mesh);
    if has_mesh && has_brep {
        return Err(NormalizeError::UnsupportedShapeKind(
            "compound mixes meshes and b-rep shapes".into(),
        ));
    }
    kinds
        .into_iter()
        .max_by_key(|k| k.rank())
        .ok_or_else(|| NormalizeError::UnsupportedShapeKind("empty compound".into()))
}

/// Fingerprint of `object` tessellated with `params`.
pub fn fingerprint_of(kind: ShapeKind, object: &CadObject, params: &TessParams) -> Fingerprint {
    let mut h = FingerprintHasher::new(FINGERPRINT_DOMAIN);
    h.tag(kind.tag());
    feed_object(&mut h, object);
    h.f64(params.deviation)
        .f64(params.angular_tolerance)
        .f64(params.edge_accuracy());
    h.finish()
}

/// Classify `object` and wrap it in a [`ShapeDescriptor`].
///
/// Pure: identical input yields an identical descriptor and fingerprint.
pub fn normalize(object: CadObject, params: TessParams) -> Result<ShapeDescriptor, NormalizeError> {
    let kind = classify(&object)?;
    let fingerprint = fingerprint_of(kind, &object, &params);
    Ok(ShapeDescriptor {
        kind,
        geometry: Arc::new(object),
        params,
        fingerprint,
    })
}

fn feed_object(h: &mut FingerprintHasher, object: &CadObject) {
    match object {
        CadObject::Solid(solid) => {
            h.tag(0x10);
            feed_solid(h, solid);
        }
        CadObject::Shell(faces) => {
            h.tag(0x20).count(faces.len());
            for face in faces {
                feed_face(h, face);
            }
        }
        CadObject::Face(face) => {
            h.tag(0x30);
            feed_face(h, face);
        }
        CadObject::Edge(edge) => {
            h.tag(0x40);
            feed_edge(h, edge);
        }
        CadObject::Vertex(p) => {
            h.tag(0x50).point(p);
        }
        CadObject::Mesh(mesh) => {
            h.tag(0x60).count(mesh.vertices.len());
            for v in &mesh.vertices {
                h.point(v);
            }
            h.count(mesh.triangles.len());
            for t in &mesh.triangles {
                h.u32(t[0]).u32(t[1]).u32(t[2]);
            }
        }
        CadObject::Compound(members) => {
            h.tag(0x70).count(members.len());
            for m in members {
                feed_object(h, m);
            }
        }
        CadObject::Foreign { type_name } => {
            h.tag(0x7f).str(type_name);
        }
    }
}

fn feed_solid(h: &mut FingerprintHasher, solid: &Solid) {
    match solid {
        Solid::Box { origin, size } => {
            h.tag(1).point(origin).point(size);
        }
        Solid::Sphere { center, radius } => {
            h.tag(2).point(center).f64(*radius);
        }
        Solid::Cylinder {
            base,
            radius,
            height,
        } => {
            h.tag(3).point(base).f64(*radius).f64(*height);
        }
    }
}

fn feed_face(h: &mut FingerprintHasher, face: &Face) {
    match face {
        Face::Polygon { points } => {
            h.tag(1).count(points.len());
            for p in points {
                h.point(p);
            }
        }
        Face::Disk {
            center,
            normal,
            radius,
        } => {
            h.tag(2).point(center).point(normal).f64(*radius);
        }
    }
}

fn feed_edge(h: &mut FingerprintHasher, edge: &Edge) {
    match edge {
        Edge::Line { start, end } => {
            h.tag(1).point(start).point(end);
        }
        Edge::Polyline { points } => {
            h.tag(2).count(points.len());
            for p in points {
                h.point(p);
            }
        }
        Edge::Circle {
            center,
            normal,
            radius,
        } => {
            h.tag(3).point(center).point(normal).f64(*radius);
        }
    }
}
