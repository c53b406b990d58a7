// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(dead_code)]

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cadview_core::{CollectingReporter, Viewer};
use cadview_geom::ShapeDescriptor;
use cadview_host::Host;
use cadview_session::ChannelPolicy;
use cadview_tess::{MeshEngine, TessellationError, TessellationResult, Tessellator};

/// Built-in engine that counts calls and can be slowed down.
#[derive(Debug, Default)]
pub struct CountingEngine {
    inner: MeshEngine,
    calls: AtomicUsize,
    delay: Duration,
}

impl CountingEngine {
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Tessellator for CountingEngine {
    fn tessellate(&self, shape: &ShapeDescriptor) -> Result<TessellationResult, TessellationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.inner.tessellate(shape)
    }
}

/// Writer whose bytes stay readable after the reporter is handed away.
#[derive(Debug, Clone, Default)]
pub struct SharedBuf(pub Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

pub fn acked() -> ChannelPolicy {
    ChannelPolicy {
        require_ack: true,
        ..ChannelPolicy::default()
    }
}

pub async fn host() -> (Host, u16) {
    let host = Host::new();
    let port = host.spawn("127.0.0.1:0").await.unwrap().port();
    (host, port)
}

pub struct Rig {
    pub viewer: Viewer,
    pub engine: Arc<CountingEngine>,
    pub reporter: Arc<CollectingReporter>,
}

pub fn rig(port: u16, engine: CountingEngine) -> Rig {
    let engine = Arc::new(engine);
    let reporter = Arc::new(CollectingReporter::new());
    let viewer = Viewer::new()
        .with_engine(engine.clone())
        .with_reporter(reporter.clone())
        .with_policy(acked())
        .with_port(port);
    Rig {
        viewer,
        engine,
        reporter,
    }
}

/// A port nothing listens on.
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}
