// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Render buffers produced by tessellation.

use cadview_geom::Point3;
use serde::{Deserialize, Serialize};

/// Renderable buffers for one shape.
///
/// `normals`, when present, has exactly one entry per vertex. Edge and vertex
/// primitives live in their own buffers and never index into `vertices`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TessellationResult {
    /// Triangle vertex positions.
    pub vertices: Vec<[f32; 3]>,
    /// Triangles as indices into `vertices`.
    pub triangles: Vec<[u32; 3]>,
    /// Per-vertex normals.
    pub normals: Option<Vec<[f32; 3]>>,
    /// Edge polylines flattened into segments.
    pub edges: Vec<[[f32; 3]; 2]>,
    /// Vertex markers.
    pub points: Vec<[f32; 3]>,
}

impl TessellationResult {
    /// Number of triangles.
    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Returns `true` when nothing renderable was produced.
    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty() && self.edges.is_empty() && self.points.is_empty()
    }

    /// Approximate heap footprint in bytes (used for the cache budget).
    pub fn byte_size(&self) -> usize {
        let v3 = std::mem::size_of::<[f32; 3]>();
        self.vertices.len() * v3
            + self.triangles.len() * std::mem::size_of::<[u32; 3]>()
            + self.normals.as_ref().map_or(0, |n| n.len() * v3)
            + self.edges.len() * 2 * v3
            + self.points.len() * v3
    }

    /// Append `other`, re-basing its triangle indices.
    pub fn merge(&mut self, other: Self) {
        let base = self.vertices.len() as u32;
        match (&mut self.normals, other.normals) {
            (Some(mine), Some(theirs)) => mine.extend(theirs),
            (Some(mine), None) => mine.extend(std::iter::repeat_n([0.0; 3], other.vertices.len())),
            (None, Some(theirs)) => {
                let mut padded = vec![[0.0; 3]; self.vertices.len()];
                padded.extend(theirs);
                self.normals = Some(padded);
            }
            (None, None) => {}
        }
        self.vertices.extend(other.vertices);
        self.triangles.extend(
            other
                .triangles
                .into_iter()
                .map(|[a, b, c]| [a + base, b + base, c + base]),
        );
        self.edges.extend(other.edges);
        self.points.extend(other.points);
    }

    pub(crate) fn push_vertex(&mut self, p: Point3, n: Point3) -> u32 {
        let idx = self.vertices.len() as u32;
        self.vertices.push(to_f32(p));
        self.normals.get_or_insert_with(Vec::new).push(to_f32(n));
        idx
    }

    pub(crate) fn push_polyline(&mut self, points: &[Point3], closed: bool) {
        for pair in points.windows(2) {
            self.edges.push([to_f32(pair[0]), to_f32(pair[1])]);
        }
        if closed && points.len() > 2 {
            if let (Some(last), Some(first)) = (points.last(), points.first()) {
                self.edges.push([to_f32(*last), to_f32(*first)]);
            }
        }
    }

    pub(crate) fn push_point(&mut self, p: Point3) {
        self.points.push(to_f32(p));
    }
}

pub(crate) fn to_f32(p: Point3) -> [f32; 3] {
    [p[0] as f32, p[1] as f32, p[2] as f32]
}
