// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Viewer configuration: what the pipeline interprets plus whatever the
//! viewer understands that the pipeline does not.

use std::collections::BTreeMap;

use cadview_geom::TessParams;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::options::OptionsError;

/// Camera behaviour when a new stack arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetCamera {
    /// Reset position, rotation and zoom.
    Reset,
    /// Keep rotation and zoom, re-center.
    Center,
    /// Keep the camera untouched.
    Keep,
}

/// Viewer colour theme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    /// Light background.
    Light,
    /// Dark background.
    Dark,
    /// Follow the hosting browser/editor.
    Browser,
}

/// World up axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpAxis {
    /// Z up (CAD convention).
    Z,
    /// Y up.
    Y,
}

/// Partial viewer configuration.
///
/// Every named field is optional so the same type carries built-in values,
/// process defaults and per-call overrides. Unknown keys land in `extra` and
/// are forwarded to the viewer verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewerConfig {
    /// Linear tessellation deviation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deviation: Option<f64>,
    /// Angular tessellation tolerance (radians).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angular_tolerance: Option<f64>,
    /// Edge sampling accuracy; unset means `deviation / 100`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_accuracy: Option<f64>,
    /// Tessellate independent objects concurrently.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel: Option<bool>,
    /// Worker count for parallel tessellation; unset means available parallelism.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    /// Colour for objects shown without an explicit one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_color: Option<[u8; 3]>,
    /// Opacity for objects shown without an explicit one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_alpha: Option<f32>,
    /// Draw edges.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render_edges: Option<bool>,
    /// Draw normals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render_normals: Option<bool>,
    /// Show parent objects as transparent context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_parent: Option<bool>,
    /// Show the axes helper.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub axes: Option<bool>,
    /// Anchor the axes helper at the origin instead of the bounding-box center.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub axes0: Option<bool>,
    /// Grid planes XY, XZ, YZ.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid: Option<[bool; 3]>,
    /// Orthographic projection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ortho: Option<bool>,
    /// Render all objects transparent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transparent: Option<bool>,
    /// Draw edges in black.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub black_edges: Option<bool>,
    /// Camera behaviour on update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_camera: Option<ResetCamera>,
    /// Colour theme.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<Theme>,
    /// World up axis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub up: Option<UpAxis>,
    /// Keys the pipeline does not interpret.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

macro_rules! overlay {
    ($dst:ident, $src:ident; $($field:ident),+ $(,)?) => {
        $(
            if $src.$field.is_some() {
                $dst.$field = $src.$field;
            }
        )+
    };
}

impl ViewerConfig {
    /// Built-in values, the base layer of every merge.
    pub fn builtin() -> Self {
        Self {
            deviation: Some(TessParams::DEFAULT_DEVIATION),
            angular_tolerance: Some(TessParams::DEFAULT_ANGULAR_TOLERANCE),
            edge_accuracy: None,
            parallel: Some(false),
            workers: None,
            default_color: Some([232, 176, 36]),
            default_alpha: Some(1.0),
            render_edges: Some(true),
            render_normals: Some(false),
            show_parent: Some(false),
            axes: Some(false),
            axes0: Some(false),
            grid: Some([false; 3]),
            ortho: Some(true),
            transparent: Some(false),
            black_edges: Some(false),
            reset_camera: Some(ResetCamera::Reset),
            theme: Some(Theme::Browser),
            up: Some(UpAxis::Z),
            extra: BTreeMap::new(),
        }
    }

    /// Overlay every value set in `other` onto `self`.
    pub fn merge(&mut self, other: &Self) {
        overlay!(self, other;
            deviation, angular_tolerance, edge_accuracy, parallel, workers,
            default_color, default_alpha, render_edges, render_normals,
            show_parent, axes, axes0, grid, ortho, transparent, black_edges,
            reset_camera, theme, up,
        );
        for (k, v) in &other.extra {
            self.extra.insert(k.clone(), v.clone());
        }
    }

    /// `self` overlaid with `other`, leaving both untouched.
    pub fn merged(&self, other: &Self) -> Self {
        let mut out = self.clone();
        out.merge(other);
        out
    }

    /// Returns `true` when no value is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Tessellation parameters, falling back to built-ins for unset values.
    pub fn tess_params(&self) -> TessParams {
        TessParams {
            deviation: self.deviation.unwrap_or(TessParams::DEFAULT_DEVIATION),
            angular_tolerance: self
                .angular_tolerance
                .unwrap_or(TessParams::DEFAULT_ANGULAR_TOLERANCE),
            edge_accuracy: self.edge_accuracy,
        }
    }

    /// Check every value the pipeline interprets.
    pub fn validate(&self) -> Result<(), OptionsError> {
        let p = self.tess_params();
        if !p.is_valid() {
            return Err(OptionsError::TessParams {
                deviation: p.deviation,
                angular_tolerance: p.angular_tolerance,
                edge_accuracy: p.edge_accuracy(),
            });
        }
        if let Some(alpha) = self.default_alpha {
            crate::options::check_alpha(alpha)?;
        }
        if self.workers == Some(0) {
            return Err(OptionsError::Workers);
        }
        Ok(())
    }

    /// Flat key/value view (unset fields omitted, `extra` inlined).
    pub fn to_map(&self) -> BTreeMap<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map.into_iter().collect(),
            _ => BTreeMap::new(),
        }
    }

    /// Rebuild from a flat key/value view. Unknown keys go to `extra`.
    pub fn from_map(map: BTreeMap<String, Value>) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(map.into_iter().collect()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_order_last_layer_wins() {
        let mut cfg = ViewerConfig::builtin();
        let defaults = ViewerConfig {
            deviation: Some(0.5),
            render_edges: Some(false),
            ..ViewerConfig::default()
        };
        let call = ViewerConfig {
            deviation: Some(0.01),
            ..ViewerConfig::default()
        };
        cfg.merge(&defaults);
        cfg.merge(&call);
        assert_eq!(cfg.deviation, Some(0.01));
        assert_eq!(cfg.render_edges, Some(false));
        assert_eq!(cfg.ortho, Some(true));
    }

    #[test]
    fn unknown_keys_pass_through_verbatim() {
        let raw = json!({ "deviation": 0.3, "glass": true, "tree_width": 240 });
        let cfg: ViewerConfig = serde_json::from_value(raw).unwrap();
        assert_eq!(cfg.deviation, Some(0.3));
        assert_eq!(cfg.extra.get("glass"), Some(&json!(true)));
        let map = cfg.to_map();
        assert_eq!(map.get("tree_width"), Some(&json!(240)));
        assert_eq!(map.get("deviation"), Some(&json!(0.3)));
        assert!(!map.contains_key("ortho"));
    }

    #[test]
    fn map_round_trip_preserves_extra() {
        let mut cfg = ViewerConfig::builtin();
        cfg.extra.insert("zoom".into(), json!(1.5));
        let back = ViewerConfig::from_map(cfg.to_map()).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let neg = ViewerConfig {
            deviation: Some(-1.0),
            ..ViewerConfig::default()
        };
        assert!(neg.validate().is_err());
        let alpha = ViewerConfig {
            default_alpha: Some(1.5),
            ..ViewerConfig::default()
        };
        assert!(alpha.validate().is_err());
        assert!(ViewerConfig::builtin().validate().is_ok());
    }

    #[test]
    fn tess_params_fall_back_to_builtins() {
        let p = ViewerConfig::default().tess_params();
        assert_eq!(p, TessParams::default());
    }
}
