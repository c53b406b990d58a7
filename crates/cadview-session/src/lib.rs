// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Client helpers for talking to a CadView viewer over TCP (CBOR-framed):
//! the delivery channel, port discovery and the update listener.

use cadview_proto::WireError;
use thiserror::Error;

mod channel;
pub mod framing;
mod listener;
mod ports;

pub use channel::{ChannelPolicy, ChannelState, RetryPolicy, ViewerChannel};
pub use listener::{ListenerEvent, ViewerListener};
pub use ports::{port_check, PortEntry, PortError, PortRegistry, PortResolver, PORT_ENV};

/// Delivery failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// No viewer reachable on the port (refused, timed out or dropped).
    #[error("[CHANNEL_UNAVAILABLE] no viewer on port {port}: {reason}")]
    ChannelUnavailable {
        /// Viewer port.
        port: u16,
        /// What went wrong.
        reason: String,
    },
    /// The viewer did not acknowledge in time.
    #[error("[ACK_TIMEOUT] viewer on port {port} did not acknowledge epoch {epoch}")]
    AckTimeout {
        /// Viewer port.
        port: u16,
        /// Epoch awaiting acknowledgement.
        epoch: u64,
    },
    /// The viewer rejected a full snapshot.
    #[error("[REJECTED] viewer on port {port} rejected the stack: {reason}")]
    Rejected {
        /// Viewer port.
        port: u16,
        /// Reason reported by the viewer.
        reason: String,
    },
    /// Message could not be framed or parsed.
    #[error("[PROTOCOL] {0}")]
    Protocol(String),
}

impl From<WireError> for ChannelError {
    fn from(err: WireError) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl ChannelError {
    /// Returns `true` for failures a reconnect may cure.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ChannelUnavailable { .. } | Self::AckTimeout { .. })
    }
}
