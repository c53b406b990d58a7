// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Viewer port discovery.

use std::path::{Path, PathBuf};
use std::time::Duration;

use cadview_app_core::{ConfigError, ConfigService, ConfigStore};
use cadview_proto::DEFAULT_PORT;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

/// Environment variable naming the viewer port.
pub const PORT_ENV: &str = "CADVIEW_PORT";

/// Port resolution failures.
#[derive(Debug, Error)]
pub enum PortError {
    /// `CADVIEW_PORT` is set but not a port number.
    #[error("[INVALID_PORT] {PORT_ENV}=`{0}` is not a port number")]
    InvalidEnv(String),
    /// Several live viewers and none owns the working directory.
    #[error("[AMBIGUOUS_PORT] several viewers are running ({0:?}); pass a port explicitly")]
    Ambiguous(Vec<u16>),
    /// Registry could not be read or written.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// A running viewer as recorded in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortEntry {
    /// Port the viewer listens on.
    pub port: u16,
    /// Workspace root the viewer was started for.
    pub root: PathBuf,
}

/// Persistent record of running viewers, stored under [`PortRegistry::KEY`].
pub struct PortRegistry<S> {
    service: ConfigService<S>,
}

impl<S: ConfigStore> PortRegistry<S> {
    /// Config-store key.
    pub const KEY: &'static str = "ports";

    /// Registry backed by `service`.
    pub fn new(service: ConfigService<S>) -> Self {
        Self { service }
    }

    /// Recorded viewers.
    pub fn entries(&self) -> Result<Vec<PortEntry>, ConfigError> {
        Ok(self.service.load(Self::KEY)?.unwrap_or_default())
    }

    /// Record a viewer, replacing any older record for the same port.
    pub fn register(&self, port: u16, root: impl Into<PathBuf>) -> Result<(), ConfigError> {
        let mut entries = self.entries()?;
        entries.retain(|e| e.port != port);
        entries.push(PortEntry {
            port,
            root: root.into(),
        });
        self.service.save(Self::KEY, &entries)
    }

    /// Forget the viewer on `port`.
    pub fn unregister(&self, port: u16) -> Result<(), ConfigError> {
        let mut entries = self.entries()?;
        let before = entries.len();
        entries.retain(|e| e.port != port);
        if entries.len() != before {
            self.service.save(Self::KEY, &entries)?;
        }
        Ok(())
    }

    /// Probe every recorded viewer, drop the dead ones and return the live ones.
    pub async fn live_entries(&self, probe: Duration) -> Result<Vec<PortEntry>, ConfigError> {
        let entries = self.entries()?;
        let mut live = Vec::with_capacity(entries.len());
        for entry in &entries {
            if port_check(entry.port, probe).await {
                live.push(entry.clone());
            } else {
                debug!(port = entry.port, "pruning stale viewer registration");
            }
        }
        if live.len() != entries.len() {
            self.service.save(Self::KEY, &live)?;
        }
        Ok(live)
    }

    /// Borrow the config service.
    pub fn service(&self) -> &ConfigService<S> {
        &self.service
    }
}

/// Returns `true` when something accepts connections on `127.0.0.1:port`.
pub async fn port_check(port: u16, within: Duration) -> bool {
    matches!(
        timeout(within, TcpStream::connect(("127.0.0.1", port))).await,
        Ok(Ok(_))
    )
}

/// Inputs to port resolution.
///
/// Order: explicit port, then [`PORT_ENV`], then the live registered viewer
/// whose root is the deepest ancestor of `cwd`, then the only live
/// registered viewer, then [`DEFAULT_PORT`].
#[derive(Debug, Clone)]
pub struct PortResolver {
    /// Port passed by the caller.
    pub explicit: Option<u16>,
    /// Value of [`PORT_ENV`], if set.
    pub env: Option<String>,
    /// Working directory of the caller.
    pub cwd: PathBuf,
    /// Liveness probe timeout per registered viewer.
    pub probe: Duration,
}

impl PortResolver {
    /// Resolver reading [`PORT_ENV`] and the process working directory.
    pub fn from_env(explicit: Option<u16>) -> Self {
        Self {
            explicit,
            env: std::env::var(PORT_ENV).ok(),
            cwd: std::env::current_dir().unwrap_or_default(),
            probe: Duration::from_millis(250),
        }
    }

    /// Resolve without a registry.
    pub fn resolve_static(&self) -> Result<Option<u16>, PortError> {
        if let Some(port) = self.explicit {
            return Ok(Some(port));
        }
        match self.env.as_deref().map(str::trim) {
            Some("") | None => Ok(None),
            Some(raw) => raw
                .parse::<u16>()
                .map(Some)
                .map_err(|_| PortError::InvalidEnv(raw.to_string())),
        }
    }

    /// Resolve the port, consulting `registry` when nothing static applies.
    pub async fn resolve<S: ConfigStore>(
        &self,
        registry: Option<&PortRegistry<S>>,
    ) -> Result<u16, PortError> {
        if let Some(port) = self.resolve_static()? {
            return Ok(port);
        }
        let Some(registry) = registry else {
            return Ok(DEFAULT_PORT);
        };
        let live = registry.live_entries(self.probe).await?;
        if let Some(owner) = deepest_owner(&live, &self.cwd) {
            info!(port = owner.port, root = %owner.root.display(), "viewer found for workspace");
            return Ok(owner.port);
        }
        match live.as_slice() {
            [] => Ok(DEFAULT_PORT),
            [only] => Ok(only.port),
            many => Err(PortError::Ambiguous(many.iter().map(|e| e.port).collect())),
        }
    }
}

fn deepest_owner<'a>(entries: &'a [PortEntry], cwd: &Path) -> Option<&'a PortEntry> {
    entries
        .iter()
        .filter(|e| cwd.starts_with(&e.root))
        .max_by_key(|e| e.root.components().count())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use cadview_app_core::MemoryConfigStore;
    use tokio::net::TcpListener;

    fn resolver(explicit: Option<u16>, env: Option<&str>, cwd: &str) -> PortResolver {
        PortResolver {
            explicit,
            env: env.map(str::to_string),
            cwd: PathBuf::from(cwd),
            probe: Duration::from_millis(250),
        }
    }

    async fn live_port() -> (TcpListener, u16) {
        let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = l.local_addr().unwrap().port();
        (l, port)
    }

    async fn dead_port() -> u16 {
        let (l, port) = live_port().await;
        drop(l);
        port
    }

    fn registry() -> PortRegistry<MemoryConfigStore> {
        PortRegistry::new(ConfigService::new(MemoryConfigStore::new()))
    }

    #[tokio::test]
    async fn explicit_beats_env_and_env_beats_registry() {
        let reg = registry();
        let (_l, port) = live_port().await;
        reg.register(port, "/").unwrap();
        let explicit = resolver(Some(7000), Some("7001"), "/w");
        assert_eq!(explicit.resolve(Some(&reg)).await.unwrap(), 7000);
        assert_eq!(resolver(None, Some("7001"), "/w").resolve(Some(&reg)).await.unwrap(), 7001);
        assert_eq!(resolver(None, None, "/w").resolve(Some(&reg)).await.unwrap(), port);
    }

    #[tokio::test]
    async fn garbage_env_is_an_error() {
        let err = resolver(None, Some("http"), "/").resolve::<MemoryConfigStore>(None).await;
        assert!(matches!(err, Err(PortError::InvalidEnv(v)) if v == "http"));
    }

    #[tokio::test]
    async fn workspace_owner_wins_over_other_live_viewers() {
        let reg = registry();
        let (_a, outer) = live_port().await;
        let (_b, inner) = live_port().await;
        let (_c, other) = live_port().await;
        reg.register(outer, "/work").unwrap();
        reg.register(inner, "/work/project").unwrap();
        reg.register(other, "/elsewhere").unwrap();
        let r = resolver(None, None, "/work/project/src");
        assert_eq!(r.resolve(Some(&reg)).await.unwrap(), inner);
        let r = resolver(None, None, "/tmp");
        assert!(matches!(
            r.resolve(Some(&reg)).await,
            Err(PortError::Ambiguous(p)) if p.len() == 3
        ));
    }

    #[tokio::test]
    async fn stale_entries_are_pruned_and_default_applies() {
        let reg = registry();
        let dead = dead_port().await;
        reg.register(dead, "/work").unwrap();
        assert_eq!(resolver(None, None, "/work").resolve(Some(&reg)).await.unwrap(), DEFAULT_PORT);
        assert!(reg.entries().unwrap().is_empty());
    }

    #[test]
    fn register_replaces_same_port() {
        let reg = registry();
        reg.register(4000, "/a").unwrap();
        reg.register(4000, "/b").unwrap();
        reg.register(4001, "/c").unwrap();
        let entries = reg.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].root, PathBuf::from("/b"));
        reg.unregister(4000).unwrap();
        assert_eq!(reg.entries().unwrap()[0].port, 4001);
    }
}
