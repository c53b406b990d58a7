// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! One viewer port: its object stack, its channel and its delivery order.

use std::sync::{Arc, Mutex as StdMutex};

use cadview_app_core::ViewerConfig;
use cadview_proto::{CommandPayload, EpochId, ResponsePayload};
use cadview_session::{ChannelError, ChannelPolicy, ChannelState, ViewerChannel};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::sequencer::{Sequencer, Ticket};
use crate::stack::{ObjectStack, StackEntry};

/// Result of pushing the stack to the viewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// The viewer received (and, if required, acknowledged) this epoch.
    Delivered {
        /// Epoch of the delivered frame.
        epoch: EpochId,
    },
    /// The stack changed locally but the viewer was not updated.
    Failed(ChannelError),
}

impl Delivery {
    /// Returns `true` when the viewer got the update.
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }

    /// Delivered epoch, if any.
    pub fn epoch(&self) -> Option<EpochId> {
        match self {
            Self::Delivered { epoch } => Some(*epoch),
            Self::Failed(_) => None,
        }
    }
}

/// State shared by every call targeting the same port.
///
/// Lock order is stack before channel; neither is held across the other's
/// await.
#[derive(Debug)]
pub struct ViewerSession {
    port: u16,
    stack: Mutex<ObjectStack>,
    channel: Mutex<ViewerChannel>,
    sequencer: Arc<Sequencer>,
    last_config: StdMutex<Option<ViewerConfig>>,
}

impl ViewerSession {
    /// Session for `port`; connects lazily on first delivery.
    pub fn new(port: u16, policy: ChannelPolicy) -> Self {
        Self {
            port,
            stack: Mutex::new(ObjectStack::new()),
            channel: Mutex::new(ViewerChannel::new(port, policy)),
            sequencer: Sequencer::new(),
            last_config: StdMutex::new(None),
        }
    }

    /// Viewer port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Copy of the stack entries in display order.
    pub async fn snapshot(&self) -> Vec<StackEntry> {
        self.stack.lock().await.snapshot()
    }

    /// Current channel state.
    pub async fn channel_state(&self) -> ChannelState {
        self.channel.lock().await.state()
    }

    /// Configuration sent with the most recent delivery attempt.
    pub fn last_config(&self) -> Option<ViewerConfig> {
        self.last_config
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Mutate the stack and take a delivery ticket under the same lock.
    pub(crate) async fn mutate<R>(&self, f: impl FnOnce(&mut ObjectStack) -> R) -> (R, Ticket) {
        let mut stack = self.stack.lock().await;
        let out = f(&mut stack);
        (out, self.sequencer.ticket())
    }

    /// Mutate the stack without joining the delivery order.
    pub(crate) async fn update<R>(&self, f: impl FnOnce(&mut ObjectStack) -> R) -> R {
        f(&mut *self.stack.lock().await)
    }

    /// Send the stack as it is at this ticket's turn.
    pub(crate) async fn deliver(&self, ticket: Ticket, config: &ViewerConfig) -> Delivery {
        ticket.wait().await;
        let entries = self.stack.lock().await.to_wire();
        let result = self.channel.lock().await.send(&entries, config).await;
        *self.last_config.lock().unwrap_or_else(|e| e.into_inner()) = Some(config.clone());
        drop(ticket);
        match result {
            Ok(epoch) => {
                info!(port = self.port, epoch, entries = entries.len(), "stack delivered");
                Delivery::Delivered { epoch }
            }
            Err(err) => {
                warn!(port = self.port, %err, "stack not delivered");
                Delivery::Failed(err)
            }
        }
    }

    /// Push a configuration change.
    pub(crate) async fn send_config(&self, config: &ViewerConfig) -> Result<(), ChannelError> {
        self.channel.lock().await.send_config(config).await
    }

    /// Forward a backend request.
    pub(crate) async fn send_backend(&self, body: &Value) -> Result<(), ChannelError> {
        self.channel.lock().await.send_backend(body).await
    }

    /// Hand a backend answer to the viewer.
    pub(crate) async fn send_response(&self, body: &Value) -> Result<(), ChannelError> {
        self.channel.lock().await.send_response(body).await
    }

    /// Run a viewer command.
    pub(crate) async fn command(
        &self,
        command: CommandPayload,
    ) -> Result<ResponsePayload, ChannelError> {
        self.channel.lock().await.send_command(command).await
    }

    /// Drop the connection; the next delivery reconnects with a snapshot.
    pub async fn disconnect(&self) {
        self.channel.lock().await.disconnect();
    }
}
