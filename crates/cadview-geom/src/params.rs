// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Tessellation parameters.

use serde::{Deserialize, Serialize};

/// Parameters that change the mesh produced for a shape.
///
/// All three participate in the fingerprint; `edge_accuracy` is hashed through
/// [`TessParams::edge_accuracy`], so leaving it unset and setting it to
/// `deviation / 100` produce the same fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TessParams {
    /// Maximum linear distance between a facet and the true surface.
    pub deviation: f64,
    /// Maximum angle (radians) subtended by one facet or edge segment.
    pub angular_tolerance: f64,
    /// Maximum linear distance between an edge polyline and the true curve.
    /// `None` means `deviation / 100`.
    pub edge_accuracy: Option<f64>,
}

impl TessParams {
    /// Default linear deviation.
    pub const DEFAULT_DEVIATION: f64 = 0.1;
    /// Default angular tolerance in radians.
    pub const DEFAULT_ANGULAR_TOLERANCE: f64 = 0.2;

    /// Parameters with explicit deviation and angular tolerance.
    pub fn new(deviation: f64, angular_tolerance: f64) -> Self {
        Self {
            deviation,
            angular_tolerance,
            edge_accuracy: None,
        }
    }

    /// Override the edge accuracy.
    pub fn with_edge_accuracy(mut self, edge_accuracy: f64) -> Self {
        self.edge_accuracy = Some(edge_accuracy);
        self
    }

    /// Effective edge accuracy.
    pub fn edge_accuracy(&self) -> f64 {
        self.edge_accuracy.unwrap_or(self.deviation / 100.0)
    }

    /// Returns `true` when every parameter is finite and strictly positive.
    pub fn is_valid(&self) -> bool {
        let ok = |v: f64| v.is_finite() && v > 0.0;
        ok(self.deviation) && ok(self.angular_tolerance) && ok(self.edge_accuracy())
    }
}

impl Default for TessParams {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DEVIATION, Self::DEFAULT_ANGULAR_TOLERANCE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_accuracy_defaults_to_hundredth_of_deviation() {
        let p = TessParams::new(0.5, 0.2);
        assert!((p.edge_accuracy() - 0.005).abs() < 1e-12);
        assert!((p.with_edge_accuracy(0.01).edge_accuracy() - 0.01).abs() < 1e-12);
    }

    #[test]
    fn validity() {
        assert!(TessParams::default().is_valid());
        assert!(!TessParams::new(0.0, 0.2).is_valid());
        assert!(!TessParams::new(0.1, f64::NAN).is_valid());
        assert!(!TessParams::default().with_edge_accuracy(-1.0).is_valid());
    }
}
