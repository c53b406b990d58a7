// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared configuration services for CadView (viewer config, display options,
//! process defaults, config storage port).
//! Keeps the pipeline and the viewer host agnostic of where settings live.

pub mod config;
pub mod defaults;
pub mod options;
pub mod viewer_config;

pub use config::{ConfigError, ConfigService, ConfigStore, MemoryConfigStore};
pub use defaults::DefaultsStore;
pub use options::{DisplayOptions, OptionsError};
pub use viewer_config::{ResetCamera, Theme, UpAxis, ViewerConfig};
