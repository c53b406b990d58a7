// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Session wire schema for CadView viewers (stack snapshots/diffs, config,
//! commands and update notifications), carried in checksummed CBOR
//! OpEnvelopes. See [`wire`] for the packet layout.

use std::collections::BTreeMap;

use cadview_app_core::ViewerConfig;
use serde::{Deserialize, Serialize};

pub mod frame;
pub mod model;
pub mod wire;

pub use frame::{
    diff_entries, state_hash, EpochId, Hash32, MeshRef, StackDiff, StackFrame, StackOp,
    StackSnapshot, WireEntry,
};
pub use model::{ApplyError, ViewerModel};
pub use wire::{decode_message, encode_message, payload_len, Packet, WireError};

/// Port a viewer listens on when nothing else is configured.
pub const DEFAULT_PORT: u16 = 3939;

/// OpEnvelope carried as the payload of a packet.
///
/// * `op` – operation name (`data`, `config`, `command`, ...).
/// * `ts` – logical timestamp of the sender.
/// * `payload` – operation specific body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpEnvelope<P> {
    /// Operation name.
    pub op: String,
    /// Logical timestamp (monotonic per sender).
    pub ts: u64,
    /// Operation-specific body.
    pub payload: P,
}

/// Request for viewer-side information or an action (op = "command").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandPayload {
    /// Command name, e.g. `status`.
    pub command: String,
    /// Command arguments.
    #[serde(default)]
    pub args: serde_json::Value,
}

impl CommandPayload {
    /// Command without arguments.
    pub fn named(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: serde_json::Value::Null,
        }
    }
}

/// What the viewer currently displays.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ViewerStatus {
    /// Epoch of the held stack, if any.
    pub epoch: Option<EpochId>,
    /// Entry names in display order.
    pub names: Vec<String>,
    /// Merged configuration.
    pub config: ViewerConfig,
}

/// Answer to a command (op = "response").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ResponsePayload {
    /// Answer to `status`.
    Status(ViewerStatus),
    /// Command executed, nothing to report.
    Ok,
}

/// Delivery acknowledgement for a data frame (op = "ack").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AckPayload {
    /// Epoch the frame carried.
    pub epoch: EpochId,
    /// Whether the frame was applied.
    pub ok: bool,
    /// Rejection reason when `ok` is false.
    pub reason: Option<String>,
}

impl AckPayload {
    /// Positive acknowledgement.
    pub fn applied(epoch: EpochId) -> Self {
        Self {
            epoch,
            ok: true,
            reason: None,
        }
    }

    /// Negative acknowledgement (the viewer is out of sync).
    pub fn rejected(epoch: EpochId, reason: impl Into<String>) -> Self {
        Self {
            epoch,
            ok: false,
            reason: Some(reason.into()),
        }
    }
}

/// Error payload (op = "error").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorPayload {
    /// Numeric error code.
    pub code: u32,
    /// Stable identifier (e.g. `E_BAD_PAYLOAD`).
    pub name: String,
    /// Human readable message.
    pub message: String,
}

/// Wire message kinds carried inside OpEnvelope payloads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Message {
    /// Stack state frame (op = "data").
    Data(StackFrame),
    /// Configuration change without stack change (op = "config").
    Config(ViewerConfig),
    /// Command request (op = "command").
    Command(CommandPayload),
    /// Command answer (op = "response").
    Response(ResponsePayload),
    /// Register for viewer-side updates (op = "listen").
    Listen,
    /// Changed viewer status keys (op = "updates").
    Updates(BTreeMap<String, serde_json::Value>),
    /// Frame acknowledgement (op = "ack").
    Ack(AckPayload),
    /// Protocol or processing error (op = "error").
    Error(ErrorPayload),
    /// Request for the viewer's backend process, relayed to listeners
    /// (op = "backend").
    Backend(serde_json::Value),
    /// Backend answer for the viewer to display (op = "backend_response").
    BackendResponse(serde_json::Value),
}

impl Message {
    /// Operation name used in the envelope.
    pub fn op(&self) -> &'static str {
        match self {
            Self::Data(_) => "data",
            Self::Config(_) => "config",
            Self::Command(_) => "command",
            Self::Response(_) => "response",
            Self::Listen => "listen",
            Self::Updates(_) => "updates",
            Self::Ack(_) => "ack",
            Self::Error(_) => "error",
            Self::Backend(_) => "backend",
            Self::BackendResponse(_) => "backend_response",
        }
    }
}
