// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Tessellation engine for CadView.
//!
//! [`Tessellator`] is the port the display pipeline calls; [`MeshEngine`] is
//! the built-in implementation. One call tessellates one descriptor on the
//! calling thread. Running several descriptors at once is the caller's job.
//!
//! # Deflection Bound
//!
//! For every curved surface the sampling step is derived from the chord
//! sagitta `s = r · (1 − cos(θ/2))`, so each facet (not just the average)
//! stays within `deviation` of the true surface and each step stays within
//! `angular_tolerance`. Edges use `edge_accuracy` the same way.

mod edge;
mod engine;
mod face;
mod result;
mod sampling;
mod solid;

pub use engine::{MeshEngine, Tessellator};
pub use result::TessellationResult;
pub use sampling::{arc_segments, max_chord_angle, MAX_ARC_SEGMENTS};

use thiserror::Error;

/// Errors produced while meshing a shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TessellationError {
    /// Deviation, angular tolerance or edge accuracy is not a positive finite number.
    #[error("[TESS_INVALID_PARAMS] {0}")]
    InvalidParams(String),
    /// The geometry cannot be meshed (zero size, non-finite coordinates, ...).
    #[error("[TESS_DEGENERATE] {0}")]
    Degenerate(String),
    /// Honouring the requested tolerances would exceed the engine's output limit.
    #[error("[TESS_RESOLUTION_LIMIT] {what} needs {needed} elements (limit {limit})")]
    ResolutionLimit {
        /// What was being sampled.
        what: &'static str,
        /// Elements required by the tolerances.
        needed: u64,
        /// Configured maximum.
        limit: u64,
    },
}
