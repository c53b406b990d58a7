// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Planar faces, filled with lyon in the face's own 2D frame.

use std::f64::consts::PI;

use cadview_geom::{Face, Point3, TessParams};
use lyon::geom::point;
use lyon::path::Path;
use lyon::tessellation::{BuffersBuilder, FillOptions, FillTessellator, FillVertex, VertexBuffers};

use crate::result::TessellationResult;
use crate::sampling::{
    add, arc_segments, check_finite, circle_points, dot, normalized, plane_basis, scale, sub,
};
use crate::TessellationError;

pub(crate) fn tessellate_face(
    face: &Face,
    params: &TessParams,
) -> Result<TessellationResult, TessellationError> {
    match face {
        Face::Polygon { points } => polygon(points),
        Face::Disk {
            center,
            normal,
            radius,
        } => disk(*center, *normal, *radius, params),
    }
}

fn polygon(points: &[Point3]) -> Result<TessellationResult, TessellationError> {
    if points.len() < 3 {
        return Err(TessellationError::Degenerate(format!(
            "polygon needs at least 3 points, got {}",
            points.len()
        )));
    }
    for p in points {
        check_finite("polygon", p)?;
    }
    let normal = normalized(newell_normal(points))
        .ok_or_else(|| TessellationError::Degenerate("polygon has zero area".into()))?;
    let mut out = fill_planar(points, normal)?;
    out.push_polyline(points, true);
    for p in points {
        out.push_point(*p);
    }
    Ok(out)
}

/// Disk boundary is an inscribed polygon whose chords respect `deviation`.
fn disk(
    center: Point3,
    normal: Point3,
    radius: f64,
    params: &TessParams,
) -> Result<TessellationResult, TessellationError> {
    check_finite("disk", &[center[0], center[1], center[2], radius])?;
    check_finite("disk normal", &normal)?;
    if radius <= 0.0 {
        return Err(TessellationError::Degenerate(format!(
            "disk radius must be positive, got {radius}"
        )));
    }
    let n = normalized(normal)
        .ok_or_else(|| TessellationError::Degenerate("disk normal is zero".into()))?;
    let (u, v) = plane_basis(n);
    let segments = arc_segments(radius, 2.0 * PI, params.deviation, params.angular_tolerance, 8)?;
    let mut out = fill_planar(&circle_points(center, u, v, radius, segments), n)?;

    let edge_segments = arc_segments(
        radius,
        2.0 * PI,
        params.edge_accuracy(),
        params.angular_tolerance,
        8,
    )?;
    out.push_polyline(&circle_points(center, u, v, radius, edge_segments), true);
    out.push_point(add(center, scale(u, radius)));
    Ok(out)
}

/// Fill a closed planar outline. Triangles are wound counter-clockwise
/// around `normal`.
fn fill_planar(
    outline: &[Point3],
    normal: Point3,
) -> Result<TessellationResult, TessellationError> {
    let origin = outline[0];
    let (u, v) = plane_basis(normal);
    let project = |p: Point3| {
        let d = sub(p, origin);
        point(dot(d, u) as f32, dot(d, v) as f32)
    };

    let mut builder = Path::builder();
    builder.begin(project(origin));
    for p in &outline[1..] {
        builder.line_to(project(*p));
    }
    builder.close();
    let path = builder.build();

    let mut buffers: VertexBuffers<lyon::math::Point, u32> = VertexBuffers::new();
    let mut tessellator = FillTessellator::new();
    tessellator
        .tessellate_path(
            &path,
            &FillOptions::default(),
            &mut BuffersBuilder::new(&mut buffers, |vertex: FillVertex<'_>| vertex.position()),
        )
        .map_err(|err| TessellationError::Degenerate(format!("planar fill failed: {err:?}")))?;
    if buffers.indices.len() < 3 {
        return Err(TessellationError::Degenerate(
            "planar fill produced no triangles".into(),
        ));
    }

    let mut out = TessellationResult::default();
    for p in &buffers.vertices {
        let lifted = add(
            origin,
            add(scale(u, f64::from(p.x)), scale(v, f64::from(p.y))),
        );
        out.push_vertex(lifted, normal);
    }
    for tri in buffers.indices.chunks_exact(3) {
        let (a, b, c) = (tri[0], tri[1], tri[2]);
        if signed_area(&buffers.vertices, a, b, c) < 0.0 {
            out.triangles.push([a, c, b]);
        } else {
            out.triangles.push([a, b, c]);
        }
    }
    Ok(out)
}

fn signed_area(vertices: &[lyon::math::Point], a: u32, b: u32, c: u32) -> f32 {
    let (pa, pb, pc) = (
        vertices[a as usize],
        vertices[b as usize],
        vertices[c as usize],
    );
    (pb - pa).cross(pc - pa)
}

fn newell_normal(points: &[Point3]) -> Point3 {
    let mut n = [0.0; 3];
    for (i, p) in points.iter().enumerate() {
        let q = points[(i + 1) % points.len()];
        n[0] += (p[1] - q[1]) * (p[2] + q[2]);
        n[1] += (p[2] - q[2]) * (p[0] + q[0]);
        n[2] += (p[0] - q[0]) * (p[1] + q[1]);
    }
    n
}
