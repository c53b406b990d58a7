// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Curves become segment lists sampled with `edge_accuracy`.

use std::f64::consts::PI;

use cadview_geom::{Edge, Point3, TessParams};

use crate::result::TessellationResult;
use crate::sampling::{
    add, arc_segments, check_finite, circle_points, length, normalized, plane_basis, scale, sub,
};
use crate::TessellationError;

pub(crate) fn tessellate_edge(
    edge: &Edge,
    params: &TessParams,
) -> Result<TessellationResult, TessellationError> {
    let mut out = TessellationResult::default();
    match edge {
        Edge::Line { start, end } => {
            check_finite("line", start)?;
            check_finite("line", end)?;
            if length(sub(*end, *start)) <= f64::EPSILON {
                return Err(TessellationError::Degenerate("line has zero length".into()));
            }
            out.push_polyline(&[*start, *end], false);
            out.push_point(*start);
            out.push_point(*end);
        }
        Edge::Polyline { points } => {
            if points.len() < 2 {
                return Err(TessellationError::Degenerate(format!(
                    "polyline needs at least 2 points, got {}",
                    points.len()
                )));
            }
            for p in points {
                check_finite("polyline", p)?;
            }
            out.push_polyline(points, false);
            if let (Some(first), Some(last)) = (points.first(), points.last()) {
                out.push_point(*first);
                out.push_point(*last);
            }
        }
        Edge::Circle {
            center,
            normal,
            radius,
        } => {
            check_finite("circle", &[center[0], center[1], center[2], *radius])?;
            if *radius <= 0.0 {
                return Err(TessellationError::Degenerate(format!(
                    "circle radius must be positive, got {radius}"
                )));
            }
            let n = normalized(*normal)
                .ok_or_else(|| TessellationError::Degenerate("circle normal is zero".into()))?;
            let (u, v) = plane_basis(n);
            let segments = arc_segments(
                *radius,
                2.0 * PI,
                params.edge_accuracy(),
                params.angular_tolerance,
                8,
            )?;
            out.push_polyline(&circle_points(*center, u, v, *radius, segments), true);
            out.push_point(add(*center, scale(u, *radius)));
        }
    }
    Ok(out)
}

/// Vertex marker.
pub(crate) fn tessellate_vertex(p: Point3) -> Result<TessellationResult, TessellationError> {
    check_finite("vertex", &p)?;
    let mut out = TessellationResult::default();
    out.push_point(p);
    Ok(out)
}
