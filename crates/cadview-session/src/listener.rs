// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Subscription to viewer-side status updates.

use std::collections::BTreeMap;
use std::time::Duration;

use cadview_proto::Message;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::framing::{read_message, write_message};
use crate::ChannelError;

/// What a listener receives from the viewer.
#[derive(Debug, Clone, PartialEq)]
pub enum ListenerEvent {
    /// Status keys whose value differs from what this listener saw before.
    Changes(BTreeMap<String, Value>),
    /// Request addressed to the backend process.
    Backend(Value),
}

/// Listens for viewer status changes on a dedicated connection.
pub struct ViewerListener {
    port: u16,
    stream: TcpStream,
    seen: BTreeMap<String, Value>,
}

impl ViewerListener {
    /// Connect to `port` and register for updates.
    pub async fn connect(port: u16, connect_timeout: Duration) -> Result<Self, ChannelError> {
        let unavailable = |reason: String| ChannelError::ChannelUnavailable { port, reason };
        let attempt = timeout(connect_timeout, TcpStream::connect(("127.0.0.1", port))).await;
        let mut stream = match attempt {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => return Err(unavailable(err.to_string())),
            Err(_) => return Err(unavailable("connect timed out".into())),
        };
        write_message(&mut stream, &Message::Listen, 0)
            .await
            .map_err(|err| unavailable(err.to_string()))?;
        debug!(port, "listening for viewer updates");
        Ok(Self {
            port,
            stream,
            seen: BTreeMap::new(),
        })
    }

    /// Next status change or backend request. Returns `Ok(None)` when the
    /// viewer closes the connection.
    pub async fn next_event(&mut self) -> Result<Option<ListenerEvent>, ChannelError> {
        loop {
            let msg = read_message(&mut self.stream)
                .await
                .map_err(|err| ChannelError::ChannelUnavailable {
                    port: self.port,
                    reason: err.to_string(),
                })?;
            let Some((msg, _)) = msg else {
                return Ok(None);
            };
            let updates = match msg {
                Message::Updates(updates) => updates,
                Message::Backend(body) => return Ok(Some(ListenerEvent::Backend(body))),
                _ => continue,
            };
            let changed: BTreeMap<String, Value> = updates
                .into_iter()
                .filter(|(k, v)| self.seen.get(k) != Some(v))
                .collect();
            if changed.is_empty() {
                continue;
            }
            for (k, v) in &changed {
                self.seen.insert(k.clone(), v.clone());
            }
            return Ok(Some(ListenerEvent::Changes(changed)));
        }
    }

    /// Next batch of changed status keys. Backend requests arriving first
    /// are skipped.
    pub async fn next_changes(
        &mut self,
    ) -> Result<Option<BTreeMap<String, Value>>, ChannelError> {
        loop {
            match self.next_event().await? {
                Some(ListenerEvent::Changes(changed)) => return Ok(Some(changed)),
                Some(ListenerEvent::Backend(_)) => {}
                None => return Ok(None),
            }
        }
    }

    /// Values seen so far.
    pub fn seen(&self) -> &BTreeMap<String, Value> {
        &self.seen
    }
}
