// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Process-wide viewer defaults.

use std::sync::RwLock;

use crate::config::{ConfigError, ConfigService, ConfigStore};
use crate::options::OptionsError;
use crate::viewer_config::ViewerConfig;

/// Holds the process-defaults layer of the configuration merge:
/// built-in → process defaults → per call.
#[derive(Debug, Default)]
pub struct DefaultsStore {
    overrides: RwLock<ViewerConfig>,
}

impl DefaultsStore {
    /// Config-store key used by [`load`](Self::load) and [`persist`](Self::persist).
    pub const KEY: &'static str = "defaults";

    /// Store with no process overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Effective defaults: built-in values overlaid with process overrides.
    pub fn get_defaults(&self) -> ViewerConfig {
        ViewerConfig::builtin().merged(&self.read())
    }

    /// Only the values set on top of the built-ins.
    pub fn overrides(&self) -> ViewerConfig {
        self.read().clone()
    }

    /// Merge `partial` into the process overrides. Keys absent from `partial`
    /// keep their current value. Nothing changes when the result is invalid.
    pub fn set_defaults(&self, partial: &ViewerConfig) -> Result<(), OptionsError> {
        let mut guard = self.overrides.write().unwrap_or_else(|e| e.into_inner());
        let next = guard.merged(partial);
        ViewerConfig::builtin().merged(&next).validate()?;
        *guard = next;
        Ok(())
    }

    /// Drop every process override.
    pub fn reset_defaults(&self) {
        *self.overrides.write().unwrap_or_else(|e| e.into_inner()) = ViewerConfig::default();
    }

    /// Final configuration for one call.
    pub fn resolve(&self, per_call: &ViewerConfig) -> Result<ViewerConfig, OptionsError> {
        let cfg = self.get_defaults().merged(per_call);
        cfg.validate()?;
        Ok(cfg)
    }

    /// Replace the overrides with the ones persisted under [`Self::KEY`].
    /// Returns `false` when nothing was stored.
    pub fn load<S: ConfigStore>(&self, service: &ConfigService<S>) -> Result<bool, ConfigError> {
        let Some(stored) = service.load::<ViewerConfig>(Self::KEY)? else {
            return Ok(false);
        };
        ViewerConfig::builtin()
            .merged(&stored)
            .validate()
            .map_err(|e| ConfigError::Other(e.to_string()))?;
        *self.overrides.write().unwrap_or_else(|e| e.into_inner()) = stored;
        Ok(true)
    }

    /// Persist the current overrides under [`Self::KEY`].
    pub fn persist<S: ConfigStore>(&self, service: &ConfigService<S>) -> Result<(), ConfigError> {
        service.save(Self::KEY, &self.overrides())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ViewerConfig> {
        self.overrides.read().unwrap_or_else(|e| e.into_inner())
    }
}
