// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Packet framing and CBOR helpers.
//!
//! Packet layout:
//!
//! ``MAGIC(4) || VERSION(2) || FLAGS(2) || LENGTH(4) || PAYLOAD || CHECKSUM(32)``
//!
//! * PAYLOAD is a CBOR [`OpEnvelope`]
//! * CHECKSUM = blake3-256 over HEADER (first 12 bytes) || PAYLOAD

use blake3::Hasher;
use ciborium::value::Value;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Message, OpEnvelope};

/// Protocol magic constant "CADV".
pub const MAGIC: [u8; 4] = *b"CADV";
/// Wire protocol version (big-endian u16).
pub const VERSION: u16 = 0x0001;
/// Reserved flags (zero for v1).
pub const FLAGS: u16 = 0x0000;
/// Header length in bytes.
pub const HEADER_LEN: usize = 12;
/// Checksum length in bytes.
pub const CHECKSUM_LEN: usize = 32;
/// Largest payload a peer accepts.
pub const MAX_PAYLOAD: usize = 256 * 1024 * 1024;

/// Framing and codec failures.
#[derive(Debug, Error)]
pub enum WireError {
    /// Fewer bytes than the packet needs.
    #[error("incomplete packet: need {needed} bytes, have {have}")]
    Incomplete {
        /// Bytes required.
        needed: usize,
        /// Bytes available.
        have: usize,
    },
    /// Header does not start with [`MAGIC`].
    #[error("bad magic")]
    BadMagic,
    /// Header version differs from [`VERSION`].
    #[error("unsupported version {0}")]
    UnsupportedVersion(u16),
    /// Payload length exceeds [`MAX_PAYLOAD`].
    #[error("payload of {0} bytes exceeds limit")]
    PayloadTooLarge(usize),
    /// Checksum does not match header and payload.
    #[error("checksum mismatch")]
    ChecksumMismatch,
    /// Envelope names an operation this peer does not know.
    #[error("unknown op `{0}`")]
    UnknownOp(String),
    /// CBOR encoding failed.
    #[error("encode: {0}")]
    Encode(String),
    /// CBOR decoding failed.
    #[error("decode: {0}")]
    Decode(String),
}

/// Encode to CBOR bytes.
pub fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, WireError> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(value, &mut out).map_err(|e| WireError::Encode(e.to_string()))?;
    Ok(out)
}

/// Decode from CBOR bytes.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, WireError> {
    ciborium::de::from_reader(bytes).map_err(|e| WireError::Decode(e.to_string()))
}

/// A full packet (header + payload + checksum).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Raw header.
    pub header: [u8; HEADER_LEN],
    /// CBOR payload bytes.
    pub payload: Vec<u8>,
    /// blake3 checksum over header||payload.
    pub checksum: [u8; CHECKSUM_LEN],
}

impl Packet {
    /// Build a packet from a CBOR payload.
    pub fn from_payload(payload: Vec<u8>) -> Self {
        let mut header = [0u8; HEADER_LEN];
        header[0..4].copy_from_slice(&MAGIC);
        header[4..6].copy_from_slice(&VERSION.to_be_bytes());
        header[6..8].copy_from_slice(&FLAGS.to_be_bytes());
        header[8..12].copy_from_slice(&(payload.len() as u32).to_be_bytes());
        let checksum = checksum(&header, &payload);
        Packet {
            header,
            payload,
            checksum,
        }
    }

    /// Concatenated packet bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len() + CHECKSUM_LEN);
        out.extend_from_slice(&self.header);
        out.extend_from_slice(&self.payload);
        out.extend_from_slice(&self.checksum);
        out
    }

    /// Encode an `OpEnvelope` into a full packet byte vector.
    pub fn encode_envelope<P: Serialize>(env: &OpEnvelope<P>) -> Result<Vec<u8>, WireError> {
        let payload = to_cbor(env)?;
        if payload.len() > MAX_PAYLOAD {
            return Err(WireError::PayloadTooLarge(payload.len()));
        }
        Ok(Packet::from_payload(payload).into_bytes())
    }

    /// Decode a packet from a byte slice, returning the envelope and bytes consumed.
    pub fn decode_envelope<P: DeserializeOwned>(
        bytes: &[u8],
    ) -> Result<(OpEnvelope<P>, usize), WireError> {
        let len = payload_len(bytes)?;
        let total = HEADER_LEN + len + CHECKSUM_LEN;
        if bytes.len() < total {
            return Err(WireError::Incomplete {
                needed: total,
                have: bytes.len(),
            });
        }
        let header = &bytes[..HEADER_LEN];
        let payload = &bytes[HEADER_LEN..HEADER_LEN + len];
        if checksum(header, payload) != bytes[HEADER_LEN + len..total] {
            return Err(WireError::ChecksumMismatch);
        }
        let env: OpEnvelope<P> = from_cbor(payload)?;
        Ok((env, total))
    }
}

/// Validate a packet header and return its payload length.
///
/// Stream readers call this on the first [`HEADER_LEN`] bytes to learn how
/// many more bytes (`len + CHECKSUM_LEN`) complete the packet.
pub fn payload_len(header: &[u8]) -> Result<usize, WireError> {
    if header.len() < HEADER_LEN {
        return Err(WireError::Incomplete {
            needed: HEADER_LEN,
            have: header.len(),
        });
    }
    if header[0..4] != MAGIC {
        return Err(WireError::BadMagic);
    }
    let version = u16::from_be_bytes([header[4], header[5]]);
    if version != VERSION {
        return Err(WireError::UnsupportedVersion(version));
    }
    let len = u32::from_be_bytes([header[8], header[9], header[10], header[11]]) as usize;
    if len > MAX_PAYLOAD {
        return Err(WireError::PayloadTooLarge(len));
    }
    Ok(len)
}

fn checksum(header: &[u8], payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let mut hasher = Hasher::new();
    hasher.update(header);
    hasher.update(payload);
    *hasher.finalize().as_bytes()
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, WireError> {
    Value::serialized(value).map_err(|e| WireError::Encode(e.to_string()))
}

fn from_value<T: for<'de> Deserialize<'de>>(value: Value) -> Result<T, WireError> {
    value
        .deserialized()
        .map_err(|e| WireError::Decode(e.to_string()))
}

/// Encode a `Message` into a packet with the provided logical timestamp.
pub fn encode_message(msg: &Message, ts: u64) -> Result<Vec<u8>, WireError> {
    let payload = match msg {
        Message::Data(frame) => to_value(frame)?,
        Message::Config(cfg) => to_value(cfg)?,
        Message::Command(cmd) => to_value(cmd)?,
        Message::Response(resp) => to_value(resp)?,
        Message::Listen => Value::Null,
        Message::Updates(changes) => to_value(changes)?,
        Message::Ack(ack) => to_value(ack)?,
        Message::Error(err) => to_value(err)?,
        Message::Backend(body) | Message::BackendResponse(body) => to_value(body)?,
    };
    let env = OpEnvelope {
        op: msg.op().to_string(),
        ts,
        payload,
    };
    Packet::encode_envelope(&env)
}

/// Decode bytes into (Message, ts, bytes_consumed).
pub fn decode_message(bytes: &[u8]) -> Result<(Message, u64, usize), WireError> {
    let (env, used) = Packet::decode_envelope::<Value>(bytes)?;
    let msg = match env.op.as_str() {
        "data" => Message::Data(from_value(env.payload)?),
        "config" => Message::Config(from_value(env.payload)?),
        "command" => Message::Command(from_value(env.payload)?),
        "response" => Message::Response(from_value(env.payload)?),
        "listen" => Message::Listen,
        "updates" => Message::Updates(from_value(env.payload)?),
        "ack" => Message::Ack(from_value(env.payload)?),
        "error" => Message::Error(from_value(env.payload)?),
        "backend" => Message::Backend(from_value(env.payload)?),
        "backend_response" => Message::BackendResponse(from_value(env.payload)?),
        other => return Err(WireError::UnknownOp(other.to_string())),
    };
    Ok((msg, env.ts, used))
}
