// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Delivery channel to one viewer port.

use std::collections::HashSet;
use std::time::Duration;

use cadview_app_core::ViewerConfig;
use cadview_geom::Fingerprint;
use cadview_proto::{
    diff_entries, state_hash, CommandPayload, EpochId, Message, MeshRef, ResponsePayload,
    StackDiff, StackFrame, StackSnapshot, WireEntry,
};
use serde_json::Value;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::framing::{read_message, write_message};
use crate::ChannelError;

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No connection.
    Disconnected,
    /// Connection attempt in progress.
    Connecting,
    /// Connected; frames flow.
    Connected,
}

/// Reconnect behaviour for failed deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra delivery attempts after the first failure.
    pub attempts: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 1,
            backoff: Duration::from_millis(100),
        }
    }
}

/// Timeouts, retries and acknowledgement mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelPolicy {
    /// Upper bound on one connection attempt.
    pub connect_timeout: Duration,
    /// Upper bound on waiting for an ack or a command response.
    pub ack_timeout: Duration,
    /// Wait for the viewer to acknowledge every data frame.
    pub require_ack: bool,
    /// Reconnect behaviour.
    pub retry: RetryPolicy,
}

impl Default for ChannelPolicy {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(1),
            ack_timeout: Duration::from_secs(5),
            require_ack: false,
            retry: RetryPolicy::default(),
        }
    }
}

struct Connection {
    writer: OwnedWriteHalf,
    inbox: mpsc::UnboundedReceiver<Message>,
    reader: JoinHandle<()>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

enum Attempt {
    Failed(ChannelError),
    Desync(String),
}

impl From<ChannelError> for Attempt {
    fn from(err: ChannelError) -> Self {
        Self::Failed(err)
    }
}

/// Channel to the viewer on one port.
///
/// Tracks the last delivered stack so later sends go out as diffs. Any
/// (re)connect forgets it, so the first frame on a fresh connection is always
/// a full snapshot.
pub struct ViewerChannel {
    port: u16,
    policy: ChannelPolicy,
    state: ChannelState,
    conn: Option<Connection>,
    next_ts: u64,
    epoch: EpochId,
    delivered: Option<Vec<WireEntry>>,
    known: HashSet<Fingerprint>,
}

impl std::fmt::Debug for ViewerChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewerChannel")
            .field("port", &self.port)
            .field("state", &self.state)
            .field("epoch", &self.epoch)
            .field("known", &self.known.len())
            .finish_non_exhaustive()
    }
}

impl ViewerChannel {
    /// Disconnected channel for `port`.
    pub fn new(port: u16, policy: ChannelPolicy) -> Self {
        Self {
            port,
            policy,
            state: ChannelState::Disconnected,
            conn: None,
            next_ts: 0,
            epoch: 0,
            delivered: None,
            known: HashSet::new(),
        }
    }

    /// Viewer port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Current connection state.
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Epoch of the last delivered frame (0 before the first).
    pub fn epoch(&self) -> EpochId {
        self.epoch
    }

    /// Active policy.
    pub fn policy(&self) -> &ChannelPolicy {
        &self.policy
    }

    /// Connect, bounded by the connect timeout. No-op when connected.
    pub async fn connect(&mut self) -> Result<(), ChannelError> {
        if self.conn.is_some() {
            return Ok(());
        }
        self.state = ChannelState::Connecting;
        let attempt = timeout(
            self.policy.connect_timeout,
            TcpStream::connect(("127.0.0.1", self.port)),
        )
        .await;
        let stream = match attempt {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => return Err(self.unavailable(err.to_string())),
            Err(_) => return Err(self.unavailable("connect timed out".into())),
        };
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();
        let (tx, inbox) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_loop(reader, tx));
        self.conn = Some(Connection {
            writer,
            inbox,
            reader,
        });
        self.forget_delivered();
        self.state = ChannelState::Connected;
        info!(port = self.port, "viewer connected");
        Ok(())
    }

    /// Close the connection. The next send starts with a full snapshot.
    pub fn disconnect(&mut self) {
        if self.conn.take().is_some() {
            debug!(port = self.port, "viewer disconnected");
        }
        self.forget_delivered();
        self.state = ChannelState::Disconnected;
    }

    /// Forget the delivered stack and the meshes the viewer holds. The next
    /// frame is a snapshot with every ready mesh inline.
    fn forget_delivered(&mut self) {
        self.delivered = None;
        self.known.clear();
    }

    /// Deliver the stack and configuration. Returns the delivered epoch.
    ///
    /// Entries carry `MeshRef::Inline` for ready meshes; meshes the viewer
    /// already holds go out as `MeshRef::Cached`. Transient failures are
    /// retried per [`RetryPolicy`] over a fresh connection; a negative
    /// acknowledgement triggers one full-snapshot resend.
    pub async fn send(
        &mut self,
        entries: &[WireEntry],
        config: &ViewerConfig,
    ) -> Result<EpochId, ChannelError> {
        let mut retries = 0u32;
        let mut resent = false;
        loop {
            match self.try_send(entries, config).await {
                Ok(epoch) => return Ok(epoch),
                Err(Attempt::Desync(reason)) if !resent => {
                    warn!(port = self.port, %reason, "viewer out of sync, resending snapshot");
                    self.forget_delivered();
                    resent = true;
                }
                Err(Attempt::Desync(reason)) => {
                    self.forget_delivered();
                    return Err(ChannelError::Rejected {
                        port: self.port,
                        reason,
                    });
                }
                Err(Attempt::Failed(err)) => {
                    self.disconnect();
                    if !err.is_transient() || retries >= self.policy.retry.attempts {
                        return Err(err);
                    }
                    let delay = self.policy.retry.backoff.saturating_mul(1 << retries.min(16));
                    retries += 1;
                    debug!(port = self.port, %err, retry = retries, "delivery failed, retrying");
                    sleep(delay).await;
                }
            }
        }
    }

    /// Send a configuration change without touching the stack.
    pub async fn send_config(&mut self, config: &ViewerConfig) -> Result<(), ChannelError> {
        self.post(&Message::Config(config.clone())).await
    }

    /// Forward a request to the viewer's backend process.
    pub async fn send_backend(&mut self, body: &Value) -> Result<(), ChannelError> {
        self.post(&Message::Backend(body.clone())).await
    }

    /// Hand a backend answer to the viewer.
    pub async fn send_response(&mut self, body: &Value) -> Result<(), ChannelError> {
        self.post(&Message::BackendResponse(body.clone())).await
    }

    /// Fire-and-forget write on the current connection.
    async fn post(&mut self, msg: &Message) -> Result<(), ChannelError> {
        self.connect().await?;
        let result = self.write(msg).await;
        if result.is_err() {
            self.disconnect();
        }
        result
    }

    /// Send a command and wait for its response.
    pub async fn send_command(
        &mut self,
        command: CommandPayload,
    ) -> Result<ResponsePayload, ChannelError> {
        let result = self.command_round_trip(command).await;
        if matches!(result, Err(ChannelError::ChannelUnavailable { .. })) {
            self.disconnect();
        }
        result
    }

    async fn command_round_trip(
        &mut self,
        command: CommandPayload,
    ) -> Result<ResponsePayload, ChannelError> {
        self.connect().await?;
        self.drain_inbox()?;
        self.write(&Message::Command(command)).await?;
        let deadline = Instant::now() + self.policy.ack_timeout;
        loop {
            match self.next_inbound(deadline).await? {
                Message::Response(resp) => return Ok(resp),
                Message::Error(err) => return Err(ChannelError::Protocol(err.message)),
                other => self.note_unsolicited(other),
            }
        }
    }

    async fn try_send(
        &mut self,
        entries: &[WireEntry],
        config: &ViewerConfig,
    ) -> Result<EpochId, Attempt> {
        self.connect().await?;
        self.drain_inbox()?;

        let sent: Vec<WireEntry> = entries
            .iter()
            .cloned()
            .map(|mut e| {
                if matches!(e.mesh, MeshRef::Inline(_)) && self.known.contains(&e.fingerprint) {
                    e.mesh = MeshRef::Cached(e.fingerprint);
                }
                e
            })
            .collect();
        let epoch = self.epoch + 1;
        let hash = state_hash(&sent);
        let frame = match &self.delivered {
            Some(prev) => StackFrame::Diff(StackDiff {
                from_epoch: self.epoch,
                to_epoch: epoch,
                ops: diff_entries(prev, &sent),
                config: config.clone(),
                state_hash: hash,
            }),
            None => StackFrame::Snapshot(StackSnapshot {
                epoch,
                entries: sent.clone(),
                config: config.clone(),
                state_hash: hash,
            }),
        };
        let kind = if matches!(frame, StackFrame::Snapshot(_)) {
            "snapshot"
        } else {
            "diff"
        };
        self.write(&Message::Data(frame)).await?;

        if self.policy.require_ack {
            let deadline = Instant::now() + self.policy.ack_timeout;
            loop {
                match self.next_inbound(deadline).await {
                    Ok(Message::Ack(ack)) if ack.epoch == epoch => {
                        if !ack.ok {
                            return Err(Attempt::Desync(ack.reason.unwrap_or_default()));
                        }
                        break;
                    }
                    Ok(other) => self.note_unsolicited(other),
                    Err(ChannelError::AckTimeout { .. }) => {
                        return Err(Attempt::Failed(ChannelError::AckTimeout {
                            port: self.port,
                            epoch,
                        }))
                    }
                    Err(err) => return Err(Attempt::Failed(err)),
                }
            }
        }

        self.epoch = epoch;
        self.known = sent
            .iter()
            .filter(|e| matches!(e.mesh, MeshRef::Inline(_) | MeshRef::Cached(_)))
            .map(|e| e.fingerprint)
            .collect();
        self.delivered = Some(sent);
        debug!(port = self.port, epoch, kind, "stack delivered");
        Ok(epoch)
    }

    async fn write(&mut self, msg: &Message) -> Result<(), ChannelError> {
        let ts = self.next_ts;
        self.next_ts += 1;
        let port = self.port;
        let conn = self.conn.as_mut().ok_or_else(|| ChannelError::ChannelUnavailable {
            port,
            reason: "not connected".into(),
        })?;
        write_message(&mut conn.writer, msg, ts)
            .await
            .map_err(|err| ChannelError::ChannelUnavailable {
                port,
                reason: format!("write failed: {err}"),
            })
    }

    async fn next_inbound(&mut self, deadline: Instant) -> Result<Message, ChannelError> {
        let port = self.port;
        let epoch = self.epoch + 1;
        let conn = self.conn.as_mut().ok_or_else(|| ChannelError::ChannelUnavailable {
            port,
            reason: "not connected".into(),
        })?;
        match tokio::time::timeout_at(deadline, conn.inbox.recv()).await {
            Ok(Some(msg)) => Ok(msg),
            Ok(None) => Err(ChannelError::ChannelUnavailable {
                port,
                reason: "viewer closed the connection".into(),
            }),
            Err(_) => Err(ChannelError::AckTimeout { port, epoch }),
        }
    }

    /// Consume messages that arrived since the last call.
    fn drain_inbox(&mut self) -> Result<(), ChannelError> {
        let port = self.port;
        let mut pending = Vec::new();
        let mut closed = false;
        if let Some(conn) = self.conn.as_mut() {
            loop {
                match conn.inbox.try_recv() {
                    Ok(msg) => pending.push(msg),
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => {
                        closed = true;
                        break;
                    }
                }
            }
        }
        for msg in pending {
            self.note_unsolicited(msg);
        }
        if closed {
            return Err(ChannelError::ChannelUnavailable {
                port,
                reason: "viewer closed the connection".into(),
            });
        }
        Ok(())
    }

    fn note_unsolicited(&mut self, msg: Message) {
        match msg {
            Message::Ack(ack) if !ack.ok => {
                warn!(
                    port = self.port,
                    epoch = ack.epoch,
                    reason = ack.reason.as_deref().unwrap_or(""),
                    "viewer rejected a frame; next send is a snapshot"
                );
                self.forget_delivered();
            }
            Message::Error(err) => {
                warn!(port = self.port, code = err.code, name = %err.name, "viewer error");
            }
            _ => {}
        }
    }

    fn unavailable(&mut self, reason: String) -> ChannelError {
        self.state = ChannelState::Disconnected;
        ChannelError::ChannelUnavailable {
            port: self.port,
            reason,
        }
    }
}

async fn read_loop(mut reader: OwnedReadHalf, tx: mpsc::UnboundedSender<Message>) {
    loop {
        match read_message(&mut reader).await {
            Ok(Some((msg, _ts))) => {
                if tx.send(msg).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(err) => {
                debug!(%err, "viewer stream ended");
                break;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closed_port_is_unavailable_quickly() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut ch = ViewerChannel::new(port, ChannelPolicy::default());
        let started = Instant::now();
        let err = ch.send(&[], &ViewerConfig::default()).await.unwrap_err();
        assert!(matches!(err, ChannelError::ChannelUnavailable { port: p, .. } if p == port));
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(ch.state(), ChannelState::Disconnected);
        assert_eq!(ch.epoch(), 0);
    }

    #[test]
    fn default_policy() {
        let p = ChannelPolicy::default();
        assert_eq!(p.connect_timeout, Duration::from_secs(1));
        assert!(!p.require_ack);
        assert_eq!(p.retry.attempts, 1);
    }
}
