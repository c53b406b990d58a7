// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The [`Tessellator`] port and the built-in [`MeshEngine`].

use cadview_geom::{CadObject, MeshData, ShapeDescriptor, TessParams};
use tracing::{debug, instrument};

use crate::edge::{tessellate_edge, tessellate_vertex};
use crate::face::tessellate_face;
use crate::result::{to_f32, TessellationResult};
use crate::sampling::{add, cross, normalized, sub};
use crate::solid::{check_budget, tessellate_solid};
use crate::TessellationError;

/// Converts one normalized shape into render buffers.
///
/// Implementations must be pure with respect to the descriptor: the same
/// fingerprint always yields an equivalent result. Calls may run on any
/// thread and concurrently with each other.
pub trait Tessellator: Send + Sync {
    /// Tessellate `shape` with the parameters baked into it.
    ///
    /// # Errors
    /// Returns [`TessellationError`] when the parameters are invalid, the
    /// geometry is degenerate, or the tolerances need more output than the
    /// engine allows.
    fn tessellate(&self, shape: &ShapeDescriptor) -> Result<TessellationResult, TessellationError>;
}

/// Analytic mesher for the shapes `cadview-geom` can describe.
#[derive(Debug, Clone, Copy)]
pub struct MeshEngine {
    max_triangles: usize,
}

impl MeshEngine {
    /// Default per-shape triangle ceiling.
    pub const DEFAULT_MAX_TRIANGLES: usize = 8_000_000;

    /// Engine with the default triangle ceiling.
    pub fn new() -> Self {
        Self {
            max_triangles: Self::DEFAULT_MAX_TRIANGLES,
        }
    }

    /// Engine refusing shapes that would need more than `max_triangles`.
    pub fn with_max_triangles(max_triangles: usize) -> Self {
        Self { max_triangles }
    }

    fn object(
        &self,
        object: &CadObject,
        params: &TessParams,
    ) -> Result<TessellationResult, TessellationError> {
        match object {
            CadObject::Solid(solid) => tessellate_solid(solid, params, self.max_triangles),
            CadObject::Shell(faces) => {
                let mut out = TessellationResult::default();
                for face in faces {
                    out.merge(tessellate_face(face, params)?);
                }
                Ok(out)
            }
            CadObject::Face(face) => tessellate_face(face, params),
            CadObject::Edge(edge) => tessellate_edge(edge, params),
            CadObject::Vertex(p) => tessellate_vertex(*p),
            CadObject::Mesh(mesh) => passthrough(mesh, self.max_triangles),
            CadObject::Compound(members) => {
                let mut out = TessellationResult::default();
                for member in members {
                    out.merge(self.object(member, params)?);
                }
                check_budget("compound", out.triangles.len() as u64, self.max_triangles)?;
                Ok(out)
            }
            CadObject::Foreign { type_name } => Err(TessellationError::Degenerate(format!(
                "unclassified object `{type_name}`"
            ))),
        }
    }
}

impl Default for MeshEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Tessellator for MeshEngine {
    #[instrument(
        level = "debug",
        skip_all,
        fields(fingerprint = %shape.fingerprint().short(), kind = %shape.kind())
    )]
    fn tessellate(&self, shape: &ShapeDescriptor) -> Result<TessellationResult, TessellationError> {
        let params = shape.params();
        if !params.is_valid() {
            return Err(TessellationError::InvalidParams(format!(
                "deviation={} angular_tolerance={} edge_accuracy={}",
                params.deviation,
                params.angular_tolerance,
                params.edge_accuracy()
            )));
        }
        let out = self.object(shape.geometry(), params)?;
        debug!(
            triangles = out.triangle_count(),
            edges = out.edges.len(),
            points = out.points.len(),
            "tessellated"
        );
        Ok(out)
    }
}

/// Pre-tessellated meshes are validated and given smooth normals.
fn passthrough(
    mesh: &MeshData,
    max_triangles: usize,
) -> Result<TessellationResult, TessellationError> {
    if mesh.triangles.is_empty() {
        return Err(TessellationError::Degenerate("mesh has no triangles".into()));
    }
    check_budget("mesh", mesh.triangles.len() as u64, max_triangles)?;
    if mesh.vertices.iter().flatten().any(|c| !c.is_finite()) {
        return Err(TessellationError::Degenerate(
            "mesh has non-finite coordinates".into(),
        ));
    }
    let count = mesh.vertices.len();
    if let Some(bad) = mesh.triangles.iter().flatten().find(|i| **i as usize >= count) {
        return Err(TessellationError::Degenerate(format!(
            "mesh index {bad} out of range for {count} vertices"
        )));
    }

    let mut accum = vec![[0.0_f64; 3]; count];
    for [a, b, c] in &mesh.triangles {
        let (pa, pb, pc) = (
            mesh.vertices[*a as usize],
            mesh.vertices[*b as usize],
            mesh.vertices[*c as usize],
        );
        // Unnormalized cross product weights by area.
        let n = cross(sub(pb, pa), sub(pc, pa));
        for i in [a, b, c] {
            accum[*i as usize] = add(accum[*i as usize], n);
        }
    }

    Ok(TessellationResult {
        vertices: mesh.vertices.iter().copied().map(to_f32).collect(),
        triangles: mesh.triangles.clone(),
        normals: Some(
            accum
                .into_iter()
                .map(|n| to_f32(normalized(n).unwrap_or([0.0; 3])))
                .collect(),
        ),
        edges: Vec::new(),
        points: Vec::new(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use cadview_geom::{normalize, Face};

    fn shape(object: CadObject) -> ShapeDescriptor {
        normalize(object, TessParams::default()).unwrap()
    }

    #[test]
    fn cuboid_has_twelve_triangles_twelve_edges_eight_points() {
        let r = MeshEngine::new().tessellate(&shape(CadObject::cuboid(1.0, 2.0, 3.0))).unwrap();
        assert_eq!(r.triangle_count(), 12);
        assert_eq!(r.edges.len(), 12);
        assert_eq!(r.points.len(), 8);
        assert_eq!(r.normals.as_ref().map(Vec::len), Some(r.vertices.len()));
    }

    #[test]
    fn invalid_params_are_reported_before_meshing() {
        let bad = normalize(CadObject::sphere(1.0), TessParams::new(-1.0, 0.2)).unwrap();
        let err = MeshEngine::new().tessellate(&bad).unwrap_err();
        assert!(matches!(err, TessellationError::InvalidParams(_)));
    }

    #[test]
    fn zero_radius_sphere_is_degenerate() {
        let err = MeshEngine::new().tessellate(&shape(CadObject::sphere(0.0))).unwrap_err();
        assert!(matches!(err, TessellationError::Degenerate(_)));
    }

    #[test]
    fn shell_merges_faces() {
        let tri = |z: f64| Face::Polygon {
            points: vec![[0.0, 0.0, z], [1.0, 0.0, z], [0.0, 1.0, z]],
        };
        let r = MeshEngine::new()
            .tessellate(&shape(CadObject::Shell(vec![tri(0.0), tri(1.0)])))
            .unwrap();
        assert_eq!(r.triangle_count(), 2);
        assert_eq!(r.triangles[1], [3, 4, 5]);
    }

    #[test]
    fn mesh_passthrough_validates_indices() {
        let broken = CadObject::Mesh(MeshData {
            vertices: vec![[0.0; 3], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            triangles: vec![[0, 1, 3]],
        });
        let err = MeshEngine::new().tessellate(&shape(broken)).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn mesh_passthrough_computes_unit_normals() {
        let quad = CadObject::Mesh(MeshData {
            vertices: vec![[0.0; 3], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [0.0, 1.0, 0.0]],
            triangles: vec![[0, 1, 2], [0, 2, 3]],
        });
        let r = MeshEngine::new().tessellate(&shape(quad)).unwrap();
        for n in r.normals.unwrap() {
            assert!((n[2] - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn triangle_ceiling_is_enforced() {
        let engine = MeshEngine::with_max_triangles(100);
        let fine = normalize(CadObject::sphere(10.0), TessParams::new(0.001, 0.2)).unwrap();
        let err = engine.tessellate(&fine).unwrap_err();
        assert!(matches!(err, TessellationError::ResolutionLimit { .. }));
    }
}
