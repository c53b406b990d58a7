// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Step-size math shared by surfaces and curves.

use std::f64::consts::PI;

use cadview_geom::Point3;

use crate::TessellationError;

/// Upper bound on segments along a single arc.
pub const MAX_ARC_SEGMENTS: u32 = 1 << 16;

/// Largest angle a chord on a circle of `radius` may subtend while its
/// sagitta stays within `deviation`.
///
/// `2 · acos(1 − d/r)`, clamped to π once the deviation reaches the radius.
pub fn max_chord_angle(radius: f64, deviation: f64) -> f64 {
    if deviation >= radius {
        return PI;
    }
    2.0 * (1.0 - deviation / radius).acos()
}

/// Number of equal segments needed to cover `sweep` radians of a circle of
/// `radius` with per-segment sagitta `<= deviation` and per-segment angle
/// `<= angular_tolerance`. Never fewer than `min_segments`.
pub fn arc_segments(
    radius: f64,
    sweep: f64,
    deviation: f64,
    angular_tolerance: f64,
    min_segments: u32,
) -> Result<u32, TessellationError> {
    let step = max_chord_angle(radius, deviation).min(angular_tolerance);
    segments_for_step("arc", sweep, step, min_segments)
}

/// Segments of size `<= step` needed to cover `sweep`, bounded by
/// [`MAX_ARC_SEGMENTS`].
pub(crate) fn segments_for_step(
    what: &'static str,
    sweep: f64,
    step: f64,
    min_segments: u32,
) -> Result<u32, TessellationError> {
    let needed = (sweep / step).ceil();
    if !needed.is_finite() || needed > f64::from(MAX_ARC_SEGMENTS) {
        return Err(TessellationError::ResolutionLimit {
            what,
            needed: if needed.is_finite() { needed as u64 } else { u64::MAX },
            limit: u64::from(MAX_ARC_SEGMENTS),
        });
    }
    Ok((needed as u32).max(min_segments))
}

pub(crate) fn sub(a: Point3, b: Point3) -> Point3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

pub(crate) fn add(a: Point3, b: Point3) -> Point3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

pub(crate) fn scale(a: Point3, s: f64) -> Point3 {
    [a[0] * s, a[1] * s, a[2] * s]
}

pub(crate) fn dot(a: Point3, b: Point3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

pub(crate) fn cross(a: Point3, b: Point3) -> Point3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

pub(crate) fn length(a: Point3) -> f64 {
    dot(a, a).sqrt()
}

/// Unit vector along `a`, or `None` for (near) zero vectors.
pub(crate) fn normalized(a: Point3) -> Option<Point3> {
    let len = length(a);
    (len.is_finite() && len > f64::EPSILON).then(|| scale(a, 1.0 / len))
}

/// Orthonormal `(u, v)` spanning the plane with unit normal `n`.
pub(crate) fn plane_basis(n: Point3) -> (Point3, Point3) {
    let helper = if n[0].abs() < 0.9 {
        [1.0, 0.0, 0.0]
    } else {
        [0.0, 1.0, 0.0]
    };
    let u = normalized(cross(helper, n)).unwrap_or([0.0, 1.0, 0.0]);
    let v = cross(n, u);
    (u, v)
}

/// `segments` points evenly spaced on a full circle (no repeated closing point).
pub(crate) fn circle_points(
    center: Point3,
    u: Point3,
    v: Point3,
    radius: f64,
    segments: u32,
) -> Vec<Point3> {
    (0..segments)
        .map(|i| {
            let t = 2.0 * PI * f64::from(i) / f64::from(segments);
            add(center, add(scale(u, radius * t.cos()), scale(v, radius * t.sin())))
        })
        .collect()
}

pub(crate) fn check_finite(what: &str, values: &[f64]) -> Result<(), TessellationError> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(TessellationError::Degenerate(format!("{what} has non-finite coordinates")))
    }
}
