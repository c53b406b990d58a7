// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Analytic solids: box, sphere, cylinder.

use std::f64::consts::PI;

use cadview_geom::{Point3, Solid, TessParams};

use crate::result::TessellationResult;
use crate::sampling::{
    add, arc_segments, check_finite, circle_points, max_chord_angle, scale, segments_for_step,
    sub,
};
use crate::TessellationError;

pub(crate) fn tessellate_solid(
    solid: &Solid,
    params: &TessParams,
    max_triangles: usize,
) -> Result<TessellationResult, TessellationError> {
    match solid {
        Solid::Box { origin, size } => cuboid(*origin, *size),
        Solid::Sphere { center, radius } => sphere(*center, *radius, params, max_triangles),
        Solid::Cylinder {
            base,
            radius,
            height,
        } => cylinder(*base, *radius, *height, params, max_triangles),
    }
}

fn cuboid(origin: Point3, size: [f64; 3]) -> Result<TessellationResult, TessellationError> {
    check_finite("box", &[origin[0], origin[1], origin[2], size[0], size[1], size[2]])?;
    if size.iter().any(|s| *s <= 0.0) {
        return Err(TessellationError::Degenerate(format!(
            "box extents must be positive, got {size:?}"
        )));
    }
    let x = [size[0], 0.0, 0.0];
    let y = [0.0, size[1], 0.0];
    let z = [0.0, 0.0, size[2]];
    // (corner, u, v) with u × v pointing out of the box.
    let faces = [
        (origin, z, y),
        (add(origin, x), y, z),
        (origin, x, z),
        (add(origin, y), z, x),
        (origin, y, x),
        (add(origin, z), x, y),
    ];
    let mut out = TessellationResult::default();
    for (corner, u, v) in faces {
        let n = unit_cross(u, v);
        let a = out.push_vertex(corner, n);
        let b = out.push_vertex(add(corner, u), n);
        let c = out.push_vertex(add(add(corner, u), v), n);
        let d = out.push_vertex(add(corner, v), n);
        out.triangles.push([a, b, c]);
        out.triangles.push([a, c, d]);
    }
    let corners: Vec<Point3> = (0..8u8)
        .map(|bits| {
            let mut p = origin;
            for axis in 0..3 {
                if bits & (1 << axis) != 0 {
                    p[axis] += size[axis];
                }
            }
            p
        })
        .collect();
    for (i, from) in corners.iter().enumerate() {
        for axis in 0..3 {
            let bit = 1 << axis;
            if i & bit == 0 {
                out.push_polyline(&[*from, corners[i | bit]], false);
            }
        }
    }
    for c in &corners {
        out.push_point(*c);
    }
    Ok(out)
}

/// UV sphere.
///
/// The grid step is a quarter of the deviation-limited chord angle: every
/// triangle then lies in a spherical cap of half that angle around one of its
/// corners, which keeps each facet within `deviation` of the surface.
fn sphere(
    center: Point3,
    radius: f64,
    params: &TessParams,
    max_triangles: usize,
) -> Result<TessellationResult, TessellationError> {
    check_finite("sphere", &[center[0], center[1], center[2], radius])?;
    if radius <= 0.0 {
        return Err(TessellationError::Degenerate(format!(
            "sphere radius must be positive, got {radius}"
        )));
    }
    let step = (max_chord_angle(radius, params.deviation) / 4.0).min(params.angular_tolerance);
    let n_lat = segments_for_step("sphere latitude", PI, step, 4)?;
    let n_lon = segments_for_step("sphere longitude", 2.0 * PI, step, 8)?;
    let tri_count = u64::from(n_lon) * 2 * u64::from(n_lat - 1);
    check_budget("sphere", tri_count, max_triangles)?;

    let point_at = |lat: f64, lon: f64| -> (Point3, Point3) {
        let n = [lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin()];
        (add(center, scale(n, radius)), n)
    };

    let mut out = TessellationResult::default();
    let (south_p, south_n) = point_at(-PI / 2.0, 0.0);
    let south = out.push_vertex(south_p, south_n);
    let mut rings: Vec<Vec<u32>> = Vec::with_capacity(n_lat as usize - 1);
    for i in 1..n_lat {
        let lat = -PI / 2.0 + PI * f64::from(i) / f64::from(n_lat);
        let ring = (0..n_lon)
            .map(|j| {
                let lon = 2.0 * PI * f64::from(j) / f64::from(n_lon);
                let (p, n) = point_at(lat, lon);
                out.push_vertex(p, n)
            })
            .collect();
        rings.push(ring);
    }
    let (north_p, north_n) = point_at(PI / 2.0, 0.0);
    let north = out.push_vertex(north_p, north_n);

    let n = n_lon as usize;
    if let (Some(first), Some(last)) = (rings.first(), rings.last()) {
        for j in 0..n {
            let k = (j + 1) % n;
            out.triangles.push([south, first[k], first[j]]);
            out.triangles.push([north, last[j], last[k]]);
        }
    }
    for pair in rings.windows(2) {
        let (lo, up) = (&pair[0], &pair[1]);
        for j in 0..n {
            let k = (j + 1) % n;
            out.triangles.push([lo[j], lo[k], up[k]]);
            out.triangles.push([lo[j], up[k], up[j]]);
        }
    }

    let seam_segments = arc_segments(
        radius,
        PI,
        params.edge_accuracy(),
        params.angular_tolerance,
        2,
    )?;
    let seam: Vec<Point3> = (0..=seam_segments)
        .map(|i| point_at(-PI / 2.0 + PI * f64::from(i) / f64::from(seam_segments), 0.0).0)
        .collect();
    out.push_polyline(&seam, false);
    out.push_point(south_p);
    out.push_point(north_p);
    Ok(out)
}

/// Cylinder along +Z. Side facets use the deviation-limited chord angle
/// directly; caps are planar fans.
fn cylinder(
    base: Point3,
    radius: f64,
    height: f64,
    params: &TessParams,
    max_triangles: usize,
) -> Result<TessellationResult, TessellationError> {
    check_finite("cylinder", &[base[0], base[1], base[2], radius, height])?;
    if radius <= 0.0 || height <= 0.0 {
        return Err(TessellationError::Degenerate(format!(
            "cylinder needs positive radius and height, got r={radius} h={height}"
        )));
    }
    let n = arc_segments(radius, 2.0 * PI, params.deviation, params.angular_tolerance, 8)?;
    check_budget("cylinder", u64::from(n) * 4, max_triangles)?;

    let u = [1.0, 0.0, 0.0];
    let v = [0.0, 1.0, 0.0];
    let top = add(base, [0.0, 0.0, height]);
    let bottom_ring = circle_points(base, u, v, radius, n);
    let top_ring = circle_points(top, u, v, radius, n);

    let mut out = TessellationResult::default();
    let count = n as usize;

    let side_lo: Vec<u32> = bottom_ring
        .iter()
        .map(|p| out.push_vertex(*p, radial(sub(*p, base))))
        .collect();
    let side_hi: Vec<u32> = top_ring
        .iter()
        .map(|p| out.push_vertex(*p, radial(sub(*p, top))))
        .collect();
    for j in 0..count {
        let k = (j + 1) % count;
        out.triangles.push([side_lo[j], side_lo[k], side_hi[k]]);
        out.triangles.push([side_lo[j], side_hi[k], side_hi[j]]);
    }

    let down = [0.0, 0.0, -1.0];
    let bottom_center = out.push_vertex(base, down);
    let cap_lo: Vec<u32> = bottom_ring.iter().map(|p| out.push_vertex(*p, down)).collect();
    let up = [0.0, 0.0, 1.0];
    let top_center = out.push_vertex(top, up);
    let cap_hi: Vec<u32> = top_ring.iter().map(|p| out.push_vertex(*p, up)).collect();
    for j in 0..count {
        let k = (j + 1) % count;
        out.triangles.push([bottom_center, cap_lo[k], cap_lo[j]]);
        out.triangles.push([top_center, cap_hi[j], cap_hi[k]]);
    }

    let edge_n = arc_segments(
        radius,
        2.0 * PI,
        params.edge_accuracy(),
        params.angular_tolerance,
        8,
    )?;
    out.push_polyline(&circle_points(base, u, v, radius, edge_n), true);
    out.push_polyline(&circle_points(top, u, v, radius, edge_n), true);
    let seam_lo = add(base, scale(u, radius));
    let seam_hi = add(top, scale(u, radius));
    out.push_polyline(&[seam_lo, seam_hi], false);
    out.push_point(seam_lo);
    out.push_point(seam_hi);
    Ok(out)
}

fn radial(offset: Point3) -> Point3 {
    let len = offset[0].hypot(offset[1]);
    [offset[0] / len, offset[1] / len, 0.0]
}

fn unit_cross(u: Point3, v: Point3) -> Point3 {
    crate::sampling::normalized(crate::sampling::cross(u, v)).unwrap_or([0.0, 0.0, 1.0])
}

pub(crate) fn check_budget(
    what: &'static str,
    triangles: u64,
    max_triangles: usize,
) -> Result<(), TessellationError> {
    let limit = max_triangles as u64;
    if triangles > limit {
        return Err(TessellationError::ResolutionLimit {
            what,
            needed: triangles,
            limit,
        });
    }
    Ok(())
}
