// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Headless viewer host.
//!
//! Accepts TCP connections, applies stack frames to a [`ViewerModel`] and
//! acknowledges each one, answers `status` commands and broadcasts changed
//! configuration keys to listeners. Backend requests are relayed to
//! listeners; backend responses are kept for the viewer.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use cadview_app_core::ViewerConfig;
use cadview_proto::{
    encode_message, AckPayload, CommandPayload, ErrorPayload, Message, ResponsePayload,
    StackFrame, ViewerModel, ViewerStatus, WireEntry,
};
use cadview_session::framing::read_message;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// Error code sent for commands the host does not know.
pub const E_UNKNOWN_COMMAND: u32 = 404;

/// Backend responses kept for inspection.
const RESPONSE_LOG: usize = 64;

struct ConnState {
    tx: mpsc::Sender<Vec<u8>>,
}

/// Packets queued while the host lock is held, sent once it is released.
#[derive(Default)]
struct Outbox {
    replies: Vec<(mpsc::Sender<Vec<u8>>, Vec<u8>)>,
    broadcasts: Vec<(u64, mpsc::Sender<Vec<u8>>, Vec<u8>)>,
}

/// Frame counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostStats {
    /// Data frames applied.
    pub applied: u64,
    /// Data frames rejected.
    pub rejected: u64,
    /// Snapshots among the applied frames.
    pub snapshots: u64,
}

#[derive(Default)]
struct HostState {
    next_conn_id: u64,
    next_ts: u64,
    model: ViewerModel,
    conns: HashMap<u64, ConnState>,
    listeners: HashSet<u64>,
    responses: VecDeque<Value>,
    stats: HostStats,
}

impl HostState {
    fn alloc_ts(&mut self) -> u64 {
        let t = self.next_ts;
        self.next_ts += 1;
        t
    }

    fn reply(&mut self, out: &mut Outbox, conn_id: u64, msg: &Message) -> Result<()> {
        let ts = self.alloc_ts();
        let pkt = encode_message(msg, ts)?;
        if let Some(conn) = self.conns.get(&conn_id) {
            out.replies.push((conn.tx.clone(), pkt));
        }
        Ok(())
    }

    fn broadcast_changes(
        &mut self,
        out: &mut Outbox,
        before: &BTreeMap<String, Value>,
    ) -> Result<()> {
        let after = self.model.config().to_map();
        let changed: BTreeMap<String, Value> = after
            .into_iter()
            .filter(|(k, v)| before.get(k) != Some(v))
            .collect();
        if changed.is_empty() || self.listeners.is_empty() {
            return Ok(());
        }
        self.broadcast(out, &Message::Updates(changed))
    }

    fn broadcast(&mut self, out: &mut Outbox, msg: &Message) -> Result<()> {
        let ts = self.alloc_ts();
        let pkt = encode_message(msg, ts)?;
        for id in &self.listeners {
            if let Some(conn) = self.conns.get(id) {
                out.broadcasts.push((*id, conn.tx.clone(), pkt.clone()));
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, msg: Message, conn_id: u64) -> Result<Outbox> {
        let op = msg.op();
        let mut out = Outbox::default();
        match msg {
            Message::Data(frame) => {
                let epoch = frame.epoch();
                let snapshot = matches!(frame, StackFrame::Snapshot(_));
                let before = self.model.config().to_map();
                let ack = match self.model.apply(frame) {
                    Ok(()) => {
                        self.stats.applied += 1;
                        if snapshot {
                            self.stats.snapshots += 1;
                        }
                        debug!(
                            conn_id,
                            epoch,
                            entries = self.model.entries().len(),
                            "frame applied"
                        );
                        AckPayload::applied(epoch)
                    }
                    Err(err) => {
                        self.stats.rejected += 1;
                        warn!(conn_id, epoch, %err, "frame rejected");
                        AckPayload::rejected(epoch, err.to_string())
                    }
                };
                self.reply(&mut out, conn_id, &Message::Ack(ack))?;
                self.broadcast_changes(&mut out, &before)?;
            }
            Message::Config(config) => {
                let before = self.model.config().to_map();
                self.model.merge_config(&config);
                self.broadcast_changes(&mut out, &before)?;
            }
            Message::Command(CommandPayload { command, .. }) => {
                let reply = match command.as_str() {
                    "status" => Message::Response(ResponsePayload::Status(self.model.status())),
                    "ping" => Message::Response(ResponsePayload::Ok),
                    other => Message::Error(ErrorPayload {
                        code: E_UNKNOWN_COMMAND,
                        name: "E_UNKNOWN_COMMAND".into(),
                        message: format!("unknown command `{other}`"),
                    }),
                };
                self.reply(&mut out, conn_id, &reply)?;
            }
            Message::Listen => {
                self.listeners.insert(conn_id);
                let current = self.model.config().to_map();
                if !current.is_empty() {
                    self.reply(&mut out, conn_id, &Message::Updates(current))?;
                }
            }
            Message::Backend(body) => {
                if self.listeners.is_empty() {
                    debug!(conn_id, "backend request with no listener");
                }
                self.broadcast(&mut out, &Message::Backend(body))?;
            }
            Message::BackendResponse(body) => {
                if self.responses.len() == RESPONSE_LOG {
                    self.responses.pop_front();
                }
                self.responses.push_back(body);
            }
            Message::Response(_) | Message::Updates(_) | Message::Ack(_) | Message::Error(_) => {
                anyhow::bail!("`{op}` is not a client message");
            }
        }
        Ok(out)
    }
}

/// Shared viewer host.
#[derive(Clone, Default)]
pub struct Host {
    state: Arc<Mutex<HostState>>,
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host").finish_non_exhaustive()
    }
}

impl Host {
    /// Empty host.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `addr` and serve in the background. Returns the bound address.
    ///
    /// # Errors
    /// Bind failure.
    pub async fn spawn(&self, addr: &str) -> Result<SocketAddr> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        let host = self.clone();
        tokio::spawn(async move {
            if let Err(err) = host.serve(listener).await {
                warn!(?err, "host accept loop ended");
            }
        });
        Ok(local)
    }

    /// Accept clients until the listener fails.
    ///
    /// # Errors
    /// Accept failure.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        info!(addr = ?listener.local_addr().ok(), "viewer host listening");
        loop {
            let (stream, peer) = listener.accept().await?;
            debug!(%peer, "client connected");
            let host = self.clone();
            tokio::spawn(async move {
                if let Err(err) = host.handle_client(stream).await {
                    warn!(?err, "client handler error");
                }
            });
        }
    }

    /// What the host currently displays.
    pub async fn status(&self) -> ViewerStatus {
        self.state.lock().await.model.status()
    }

    /// Entries currently displayed.
    pub async fn entries(&self) -> Vec<WireEntry> {
        self.state.lock().await.model.entries().to_vec()
    }

    /// Merged configuration.
    pub async fn config(&self) -> ViewerConfig {
        self.state.lock().await.model.config().clone()
    }

    /// Frame counters.
    pub async fn stats(&self) -> HostStats {
        self.state.lock().await.stats
    }

    /// Backend responses received, oldest first.
    pub async fn backend_responses(&self) -> Vec<Value> {
        self.state.lock().await.responses.iter().cloned().collect()
    }

    /// Number of open client connections.
    pub async fn connections(&self) -> usize {
        self.state.lock().await.conns.len()
    }

    async fn handle_client(&self, stream: TcpStream) -> Result<()> {
        let (mut reader, mut writer) = stream.into_split();
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(256);
        let conn_id = {
            let mut h = self.state.lock().await;
            let id = h.next_conn_id;
            h.next_conn_id += 1;
            h.conns.insert(id, ConnState { tx });
            id
        };

        tokio::spawn(async move {
            while let Some(buf) = rx.recv().await {
                if writer.write_all(&buf).await.is_err() {
                    break;
                }
            }
        });

        loop {
            match read_message(&mut reader).await {
                Ok(Some((msg, _ts))) => {
                    if let Err(err) = self.handle_message(msg, conn_id).await {
                        warn!(?err, conn_id, "dropping connection");
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(%err, conn_id, "failed to read packet");
                    break;
                }
            }
        }

        let mut h = self.state.lock().await;
        h.conns.remove(&conn_id);
        h.listeners.remove(&conn_id);
        debug!(conn_id, "client disconnected");
        Ok(())
    }

    /// Handle one inbound message from connection `conn_id`.
    ///
    /// Replies and broadcasts go out after the host lock is released. A
    /// listener whose queue is full is unregistered instead of waited on.
    ///
    /// # Errors
    /// Encoding failure of a reply, or a message clients must not send.
    pub async fn handle_message(&self, msg: Message, conn_id: u64) -> Result<()> {
        let out = self.state.lock().await.dispatch(msg, conn_id)?;
        for (tx, pkt) in out.replies {
            let _ = tx.send(pkt).await;
        }
        let mut stalled = Vec::new();
        for (id, tx, pkt) in out.broadcasts {
            if matches!(tx.try_send(pkt), Err(mpsc::error::TrySendError::Full(_))) {
                stalled.push(id);
            }
        }
        if !stalled.is_empty() {
            let mut h = self.state.lock().await;
            for id in stalled {
                warn!(conn_id = id, "listener not reading, unregistering");
                h.listeners.remove(&id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use cadview_proto::{decode_message, state_hash, StackDiff, StackSnapshot};
    use tokio::time::{timeout, Duration};

    async fn add_conn(host: &Host) -> (u64, mpsc::Receiver<Vec<u8>>) {
        add_conn_with_capacity(host, 64).await
    }

    async fn add_conn_with_capacity(
        host: &Host,
        capacity: usize,
    ) -> (u64, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel::<Vec<u8>>(capacity);
        let mut h = host.state.lock().await;
        let id = h.next_conn_id;
        h.next_conn_id += 1;
        h.conns.insert(id, ConnState { tx });
        (id, rx)
    }

    async fn recv(rx: &mut mpsc::Receiver<Vec<u8>>) -> (Message, u64) {
        let pkt = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        let (msg, ts, _) = decode_message(&pkt).unwrap();
        (msg, ts)
    }

    fn empty_snapshot(epoch: u64) -> StackFrame {
        StackFrame::Snapshot(StackSnapshot {
            epoch,
            entries: vec![],
            config: ViewerConfig::default(),
            state_hash: state_hash(&[]),
        })
    }

    #[tokio::test]
    async fn frames_are_acked_with_monotonic_ts() {
        let host = Host::new();
        let (conn, mut rx) = add_conn(&host).await;

        host.handle_message(Message::Data(empty_snapshot(1)), conn).await.unwrap();
        let (ack1, ts1) = recv(&mut rx).await;
        assert_eq!(ack1, Message::Ack(AckPayload::applied(1)));

        let gap = StackFrame::Diff(StackDiff {
            from_epoch: 5,
            to_epoch: 6,
            ops: vec![],
            config: ViewerConfig::default(),
            state_hash: state_hash(&[]),
        });
        host.handle_message(Message::Data(gap), conn).await.unwrap();
        let (ack2, ts2) = recv(&mut rx).await;
        let Message::Ack(ack2) = ack2 else {
            panic!("expected ack");
        };
        assert!(!ack2.ok);
        assert!(ack2.reason.unwrap().contains("[DESYNC]"));
        assert_eq!(ts2, ts1 + 1);
        assert_eq!(host.stats().await, HostStats { applied: 1, rejected: 1, snapshots: 1 });
    }

    #[tokio::test]
    async fn listeners_get_only_changed_keys() {
        let host = Host::new();
        let (sender, _rx) = add_conn(&host).await;
        let (listener, mut lrx) = add_conn(&host).await;
        host.handle_message(Message::Listen, listener).await.unwrap();

        let cfg = ViewerConfig {
            axes: Some(true),
            ..ViewerConfig::default()
        };
        host.handle_message(Message::Config(cfg.clone()), sender).await.unwrap();
        let (Message::Updates(first), _) = recv(&mut lrx).await else {
            panic!("expected updates");
        };
        assert_eq!(first.keys().collect::<Vec<_>>(), ["axes"]);

        // Same value again: nothing to broadcast.
        host.handle_message(Message::Config(cfg), sender).await.unwrap();
        assert!(lrx.try_recv().is_err());
    }

    #[tokio::test]
    async fn listener_that_stops_reading_does_not_stall_the_host() {
        let host = Host::new();
        let (sender, mut srx) = add_conn(&host).await;
        let (stuck, _stuck_rx) = add_conn_with_capacity(&host, 1).await;
        host.handle_message(Message::Listen, stuck).await.unwrap();

        for i in 0..4 {
            let cfg = ViewerConfig {
                workers: Some(i + 1),
                ..ViewerConfig::default()
            };
            timeout(Duration::from_secs(1), host.handle_message(Message::Config(cfg), sender))
                .await
                .unwrap()
                .unwrap();
        }
        assert!(!host.state.lock().await.listeners.contains(&stuck));

        host.handle_message(Message::Command(CommandPayload::named("ping")), sender)
            .await
            .unwrap();
        let (reply, _) = recv(&mut srx).await;
        assert_eq!(reply, Message::Response(ResponsePayload::Ok));
    }

    #[tokio::test]
    async fn unknown_command_is_an_error_reply() {
        let host = Host::new();
        let (conn, mut rx) = add_conn(&host).await;
        host.handle_message(Message::Command(CommandPayload::named("explode")), conn)
            .await
            .unwrap();
        let (Message::Error(err), _) = recv(&mut rx).await else {
            panic!("expected error");
        };
        assert_eq!(err.code, E_UNKNOWN_COMMAND);
    }

    #[tokio::test]
    async fn server_messages_from_clients_drop_the_connection() {
        let host = Host::new();
        let (conn, _rx) = add_conn(&host).await;
        let err = host
            .handle_message(Message::Ack(AckPayload::applied(1)), conn)
            .await;
        assert!(err.is_err());
    }
}
