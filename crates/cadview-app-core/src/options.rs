// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-object display options.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::viewer_config::ViewerConfig;

/// Rejected configuration or display values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OptionsError {
    /// Alpha outside `[0, 1]` or not finite.
    #[error("[INVALID_OPTIONS] alpha must be within [0, 1], got {0}")]
    Alpha(f32),
    /// Tessellation parameters must be positive and finite.
    #[error(
        "[INVALID_OPTIONS] tessellation parameters must be positive and finite \
         (deviation={deviation}, angular_tolerance={angular_tolerance}, \
         edge_accuracy={edge_accuracy})"
    )]
    TessParams {
        /// Effective deviation.
        deviation: f64,
        /// Effective angular tolerance.
        angular_tolerance: f64,
        /// Effective edge accuracy.
        edge_accuracy: f64,
    },
    /// Worker count of zero.
    #[error("[INVALID_OPTIONS] workers must be at least 1")]
    Workers,
}

/// How one object is drawn. Compared by value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplayOptions {
    /// Opacity in `[0, 1]`.
    pub alpha: f32,
    /// RGB colour.
    pub color: [u8; 3],
    /// Show the parent object as transparent context.
    pub show_parent: bool,
    /// Draw edges.
    pub render_edges: bool,
    /// Draw normals.
    pub render_normals: bool,
}

impl DisplayOptions {
    /// Options derived from a (merged) viewer configuration.
    pub fn from_config(config: &ViewerConfig) -> Self {
        let base = ViewerConfig::builtin();
        let pick = |field: fn(&ViewerConfig) -> Option<bool>| {
            field(config).or_else(|| field(&base)).unwrap_or(false)
        };
        Self {
            alpha: config
                .default_alpha
                .or(base.default_alpha)
                .unwrap_or(1.0),
            color: config
                .default_color
                .or(base.default_color)
                .unwrap_or([255; 3]),
            show_parent: pick(|c| c.show_parent),
            render_edges: pick(|c| c.render_edges),
            render_normals: pick(|c| c.render_normals),
        }
    }

    /// Same options with a different colour.
    pub fn with_color(mut self, color: [u8; 3]) -> Self {
        self.color = color;
        self
    }

    /// Same options with a different alpha.
    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha;
        self
    }

    /// Reject out-of-range values.
    pub fn validate(&self) -> Result<(), OptionsError> {
        check_alpha(self.alpha)
    }
}

impl Default for DisplayOptions {
    fn default() -> Self {
        Self::from_config(&ViewerConfig::builtin())
    }
}

pub(crate) fn check_alpha(alpha: f32) -> Result<(), OptionsError> {
    if alpha.is_finite() && (0.0..=1.0).contains(&alpha) {
        Ok(())
    } else {
        Err(OptionsError::Alpha(alpha))
    }
}
