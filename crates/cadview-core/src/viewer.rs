// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The `show` pipeline and its siblings.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use cadview_app_core::{ConfigStore, DefaultsStore, DisplayOptions, ViewerConfig};
use cadview_cache::TessCache;
use cadview_geom::{normalize, CadObject, Fingerprint, ShapeDescriptor, ShapeKind};
use cadview_proto::{CommandPayload, ResponsePayload, ViewerStatus, DEFAULT_PORT};
use cadview_session::{ChannelError, ChannelPolicy, PortRegistry, PortResolver};
use cadview_tess::{MeshEngine, Tessellator};
use futures_util::stream::{self, StreamExt};
use serde_json::Value;
use tracing::{debug, info_span, Instrument};

use crate::pool::{compute_or_join, MeshOutcome, TessPool};
use crate::progress::{ObjectStatus, ProgressReporter, TracingReporter};
use crate::session::{Delivery, ViewerSession};
use crate::stack::StackEntry;
use crate::ShowError;

/// Per-object overrides on top of the configured display defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ObjectOptions {
    /// Opacity in `[0, 1]`.
    pub alpha: Option<f32>,
    /// RGB colour.
    pub color: Option<[u8; 3]>,
    /// Show the parent as transparent context.
    pub show_parent: Option<bool>,
}

impl ObjectOptions {
    /// Effective options over `base`.
    pub fn apply(self, base: DisplayOptions) -> DisplayOptions {
        DisplayOptions {
            alpha: self.alpha.unwrap_or(base.alpha),
            color: self.color.unwrap_or(base.color),
            show_parent: self.show_parent.unwrap_or(base.show_parent),
            ..base
        }
    }
}

/// One object of a [`ShowRequest`].
#[derive(Debug, Clone)]
pub struct ShowObject {
    /// Geometry to display.
    pub object: CadObject,
    /// Stack name; generated from the shape kind when absent.
    pub name: Option<String>,
    /// Display overrides.
    pub options: ObjectOptions,
    /// Name of a related parent entry.
    pub parent: Option<String>,
}

impl ShowObject {
    /// Unnamed object with default options.
    pub fn new(object: CadObject) -> Self {
        Self {
            object,
            name: None,
            options: ObjectOptions::default(),
            parent: None,
        }
    }

    /// Set the stack name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the opacity.
    pub fn alpha(mut self, alpha: f32) -> Self {
        self.options.alpha = Some(alpha);
        self
    }

    /// Set the colour.
    pub fn color(mut self, color: [u8; 3]) -> Self {
        self.options.color = Some(color);
        self
    }

    /// Relate this object to `parent`.
    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }
}

impl From<CadObject> for ShowObject {
    fn from(object: CadObject) -> Self {
        Self::new(object)
    }
}

/// Arguments of [`Viewer::show`].
#[derive(Debug, Clone, Default)]
pub struct ShowRequest {
    /// Objects in display order.
    pub objects: Vec<ShowObject>,
    /// Replace the whole stack instead of updating it.
    pub clear: bool,
    /// Target port; resolved when absent.
    pub port: Option<u16>,
    /// Per-call configuration overrides.
    pub config: ViewerConfig,
}

impl ShowRequest {
    /// Empty request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an object.
    pub fn object(mut self, object: impl Into<ShowObject>) -> Self {
        self.objects.push(object.into());
        self
    }

    /// Replace the stack instead of updating it.
    pub fn clearing(mut self) -> Self {
        self.clear = true;
        self
    }

    /// Target a specific port.
    pub fn on_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Per-call configuration overrides.
    pub fn with_config(mut self, config: ViewerConfig) -> Self {
        self.config = config;
        self
    }
}

/// Outcome for one object of a show call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectReport {
    /// Stack name.
    pub name: String,
    /// Shape kind.
    pub kind: ShapeKind,
    /// Content fingerprint.
    pub fingerprint: Fingerprint,
    /// Terminal status.
    pub status: ObjectStatus,
    /// Failure message when `status` is `Failed`.
    pub error: Option<String>,
}

/// Outcome of a show call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShowReport {
    /// Port the stack belongs to.
    pub port: u16,
    /// One report per requested object, in request order.
    pub objects: Vec<ObjectReport>,
    /// Whether the viewer got the update.
    pub delivery: Delivery,
}

impl ShowReport {
    /// Report for `name`.
    pub fn object(&self, name: &str) -> Option<&ObjectReport> {
        self.objects.iter().find(|o| o.name == name)
    }

    /// Returns `true` when no object failed.
    pub fn all_ready(&self) -> bool {
        self.objects.iter().all(|o| o.status != ObjectStatus::Failed)
    }
}

/// Entry point of the display pipeline.
///
/// Owns the tessellation cache and one [`ViewerSession`] per port. Calls
/// may run concurrently from any number of tasks.
pub struct Viewer {
    engine: Arc<dyn Tessellator>,
    cache: TessCache,
    pool: TessPool,
    defaults: Arc<DefaultsStore>,
    reporter: Arc<dyn ProgressReporter>,
    policy: ChannelPolicy,
    ports: PortResolver,
    sessions: Mutex<HashMap<u16, Arc<ViewerSession>>>,
}

impl std::fmt::Debug for Viewer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Viewer")
            .field("cache", &self.cache.stats())
            .field("workers", &self.pool.workers())
            .field("policy", &self.policy)
            .field("ports", &self.ports)
            .finish_non_exhaustive()
    }
}

impl Default for Viewer {
    fn default() -> Self {
        Self::new()
    }
}

impl Viewer {
    /// Viewer with the built-in engine, default cache and tracing reporter.
    pub fn new() -> Self {
        Self {
            engine: Arc::new(MeshEngine::new()),
            cache: TessCache::default(),
            pool: TessPool::available(),
            defaults: Arc::new(DefaultsStore::new()),
            reporter: Arc::new(TracingReporter),
            policy: ChannelPolicy::default(),
            ports: PortResolver::from_env(None),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Use a different tessellation engine.
    pub fn with_engine(mut self, engine: Arc<dyn Tessellator>) -> Self {
        self.engine = engine;
        self
    }

    /// Use a preconfigured cache.
    pub fn with_cache(mut self, cache: TessCache) -> Self {
        self.cache = cache;
        self
    }

    /// Bound tessellation concurrency.
    pub fn with_pool(mut self, pool: TessPool) -> Self {
        self.pool = pool;
        self
    }

    /// Share a defaults store.
    pub fn with_defaults(mut self, defaults: Arc<DefaultsStore>) -> Self {
        self.defaults = defaults;
        self
    }

    /// Report progress to `reporter`.
    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Channel policy for sessions created from now on.
    pub fn with_policy(mut self, policy: ChannelPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Port used by calls that name none.
    pub fn with_port(mut self, port: u16) -> Self {
        self.ports.explicit = Some(port);
        self
    }

    /// Replace port resolution inputs.
    pub fn with_port_resolver(mut self, ports: PortResolver) -> Self {
        self.ports = ports;
        self
    }

    /// Pick the default port from live registered viewers.
    ///
    /// # Errors
    /// [`ShowError::Port`] when several viewers match or the registry cannot
    /// be read.
    pub async fn discover<S: ConfigStore>(
        mut self,
        registry: &PortRegistry<S>,
    ) -> Result<Self, ShowError> {
        let port = self.ports.resolve(Some(registry)).await?;
        self.ports.explicit = Some(port);
        Ok(self)
    }

    /// The tessellation cache.
    pub fn cache(&self) -> &TessCache {
        &self.cache
    }

    /// The process defaults.
    pub fn defaults(&self) -> &DefaultsStore {
        &self.defaults
    }

    /// Session for `port`, created on first use.
    pub fn session(&self, port: u16) -> Arc<ViewerSession> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            sessions
                .entry(port)
                .or_insert_with(|| Arc::new(ViewerSession::new(port, self.policy))),
        )
    }

    fn port_for(&self, requested: Option<u16>) -> Result<u16, ShowError> {
        if let Some(port) = requested {
            return Ok(port);
        }
        Ok(self.ports.resolve_static()?.unwrap_or(DEFAULT_PORT))
    }

    /// Display `request.objects`, tessellating what the cache lacks.
    ///
    /// Invalid input is rejected before the stack changes. Tessellation
    /// failures are per object and never abort the call; delivery failures
    /// leave the stack updated and are reported in [`ShowReport::delivery`].
    ///
    /// # Errors
    /// [`ShowError`] for unsupported shapes, invalid options or an
    /// unresolvable port.
    pub async fn show(&self, request: ShowRequest) -> Result<ShowReport, ShowError> {
        let ShowRequest {
            objects,
            clear,
            port,
            config,
        } = request;
        let config = self.defaults.resolve(&config)?;
        let params = config.tess_params();
        let base = DisplayOptions::from_config(&config);

        let mut prepared = Vec::with_capacity(objects.len());
        for object in objects {
            let descriptor = normalize(object.object, params)?;
            let options = object.options.apply(base);
            options.validate()?;
            prepared.push((object.name, descriptor, options, object.parent));
        }
        let port = self.port_for(port)?;
        let session = self.session(port);

        let span = info_span!("show", port, objects = prepared.len(), clear);
        let report = async move {
            let (accepted, ticket) = session
                .mutate(|stack| {
                    if clear {
                        stack.clear();
                    }
                    prepared
                        .into_iter()
                        .map(|(name, descriptor, options, parent)| {
                            let name = name
                                .unwrap_or_else(|| stack.generate_name(descriptor.kind()));
                            stack.upsert(
                                StackEntry::new(name.clone(), descriptor.clone(), options)
                                    .with_parent(parent),
                            );
                            (name, descriptor)
                        })
                        .collect::<Vec<_>>()
                })
                .await;
            for (name, descriptor) in &accepted {
                self.reporter
                    .report(name, &descriptor.fingerprint(), ObjectStatus::Reference);
            }

            let lanes = if config.parallel == Some(true) {
                config.workers.unwrap_or_else(|| self.pool.workers()).max(1)
            } else {
                1
            };
            let objects: Vec<ObjectReport> = stream::iter(accepted)
                .map(|(name, descriptor)| self.resolve(&session, name, descriptor))
                .buffered(lanes)
                .collect()
                .await;

            let delivery = session.deliver(ticket, &config).await;
            ShowReport {
                port,
                objects,
                delivery,
            }
        }
        .instrument(span)
        .await;
        Ok(report)
    }

    async fn resolve(
        &self,
        session: &ViewerSession,
        name: String,
        descriptor: ShapeDescriptor,
    ) -> ObjectReport {
        let fp = descriptor.fingerprint();
        let outcome = match self.cache.lookup(&fp) {
            Some(mesh) => MeshOutcome::Ready(ObjectStatus::Cached, mesh),
            None => {
                self.reporter.report(&name, &fp, ObjectStatus::Tessellating);
                session
                    .update(|s| s.set_status(&name, fp, ObjectStatus::Tessellating, None, None))
                    .await;
                compute_or_join(&self.cache, &self.pool, &self.engine, &descriptor).await
            }
        };
        let (status, mesh, error) = match outcome {
            MeshOutcome::Ready(status, mesh) => (status, Some(mesh), None),
            MeshOutcome::Failed(msg) => (ObjectStatus::Failed, None, Some(msg)),
        };
        let applied = session
            .update(|s| s.set_status(&name, fp, status, mesh, error.clone()))
            .await;
        if !applied {
            debug!(
                name = %name,
                fingerprint = %fp.short(),
                "entry replaced before its mesh resolved"
            );
        }
        self.reporter.report(&name, &fp, status);
        ObjectReport {
            name,
            kind: descriptor.kind(),
            fingerprint: fp,
            status,
            error,
        }
    }

    fn delivery_config(&self, session: &ViewerSession) -> ViewerConfig {
        session
            .last_config()
            .unwrap_or_else(|| self.defaults.get_defaults())
    }

    /// Remove `names` from the stack and push the result.
    ///
    /// Unknown names are ignored.
    ///
    /// # Errors
    /// [`ShowError::Port`] when no port can be resolved.
    pub async fn remove(&self, port: Option<u16>, names: &[&str]) -> Result<Delivery, ShowError> {
        let session = self.session(self.port_for(port)?);
        let (_, ticket) = session
            .mutate(|stack| {
                for name in names {
                    stack.remove_by_name(name);
                }
            })
            .await;
        let config = self.delivery_config(&session);
        Ok(session.deliver(ticket, &config).await)
    }

    /// Empty the stack and push the result.
    ///
    /// # Errors
    /// [`ShowError::Port`] when no port can be resolved.
    pub async fn clear(&self, port: Option<u16>) -> Result<Delivery, ShowError> {
        let session = self.session(self.port_for(port)?);
        let (_, ticket) = session.mutate(crate::stack::ObjectStack::clear).await;
        let config = self.delivery_config(&session);
        Ok(session.deliver(ticket, &config).await)
    }

    /// Entries of the stack on `port`, in display order.
    ///
    /// # Errors
    /// [`ShowError::Port`] when no port can be resolved.
    pub async fn snapshot(&self, port: Option<u16>) -> Result<Vec<StackEntry>, ShowError> {
        Ok(self.session(self.port_for(port)?).snapshot().await)
    }

    /// Drop the connection to `port`. The stack is kept.
    ///
    /// # Errors
    /// [`ShowError::Port`] when no port can be resolved.
    pub async fn disconnect(&self, port: Option<u16>) -> Result<(), ShowError> {
        self.session(self.port_for(port)?).disconnect().await;
        Ok(())
    }

    /// Send configuration overrides (merged over the defaults) without
    /// touching the stack.
    ///
    /// # Errors
    /// Invalid configuration, unresolvable port or channel failure.
    pub async fn send_config(
        &self,
        port: Option<u16>,
        overrides: &ViewerConfig,
    ) -> Result<(), ShowError> {
        let config = self.defaults.resolve(overrides)?;
        let session = self.session(self.port_for(port)?);
        session.send_config(&config).await?;
        Ok(())
    }

    /// Forward `body` to the backend process attached to the viewer.
    ///
    /// # Errors
    /// Unresolvable port or channel failure.
    pub async fn send_backend(&self, port: Option<u16>, body: &Value) -> Result<(), ShowError> {
        let session = self.session(self.port_for(port)?);
        session.send_backend(body).await?;
        Ok(())
    }

    /// Hand a backend answer to the viewer.
    ///
    /// # Errors
    /// Unresolvable port or channel failure.
    pub async fn send_response(&self, port: Option<u16>, body: &Value) -> Result<(), ShowError> {
        let session = self.session(self.port_for(port)?);
        session.send_response(body).await?;
        Ok(())
    }

    /// Ask the viewer for its status.
    ///
    /// # Errors
    /// Unresolvable port, channel failure, or an unexpected response.
    pub async fn status(&self, port: Option<u16>) -> Result<ViewerStatus, ShowError> {
        let session = self.session(self.port_for(port)?);
        match session.command(CommandPayload::named("status")).await? {
            ResponsePayload::Status(status) => Ok(status),
            ResponsePayload::Ok => Err(ShowError::Channel(ChannelError::Protocol(
                "viewer answered `status` without a status".into(),
            ))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn object_options_override_only_what_they_set() {
        let base = DisplayOptions::default();
        let opts = ObjectOptions {
            alpha: Some(0.25),
            ..ObjectOptions::default()
        }
        .apply(base);
        assert!((opts.alpha - 0.25).abs() < f32::EPSILON);
        assert_eq!(opts.color, base.color);
        assert_eq!(opts.render_edges, base.render_edges);
    }

    #[test]
    fn explicit_port_wins_over_the_resolver() {
        let viewer = Viewer::new().with_port(4000);
        assert_eq!(viewer.port_for(None).unwrap(), 4000);
        assert_eq!(viewer.port_for(Some(5000)).unwrap(), 5000);
    }

    #[test]
    fn sessions_are_shared_per_port() {
        let viewer = Viewer::new();
        let a = viewer.session(4100);
        let b = viewer.session(4100);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(viewer.session(4101).port(), 4101);
    }
}
