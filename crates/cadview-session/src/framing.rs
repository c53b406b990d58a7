// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Reading and writing whole packets on async byte streams.

use std::io;

use cadview_proto::wire::{CHECKSUM_LEN, HEADER_LEN};
use cadview_proto::{decode_message, encode_message, payload_len, Message, WireError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Stream-level failures.
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    /// Transport failed or closed mid-packet.
    #[error("io: {0}")]
    Io(#[from] io::Error),
    /// Packet was malformed.
    #[error("wire: {0}")]
    Wire(#[from] WireError),
}

/// Read one message. Returns `Ok(None)` when the stream is closed before any
/// byte of a new packet arrives.
///
/// Reads until a full header is buffered so short reads cannot desynchronize
/// framing.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<(Message, u64)>, FramingError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    let mut read = 0usize;
    while read < header.len() {
        let n = reader.read(&mut header[read..]).await?;
        if n == 0 {
            if read == 0 {
                return Ok(None);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("truncated packet header: read {read} of {HEADER_LEN} bytes"),
            )
            .into());
        }
        read += n;
    }
    let len = payload_len(&header)?;
    let mut packet = Vec::with_capacity(HEADER_LEN + len + CHECKSUM_LEN);
    packet.extend_from_slice(&header);
    packet.resize(HEADER_LEN + len + CHECKSUM_LEN, 0);
    reader.read_exact(&mut packet[HEADER_LEN..]).await?;
    let (msg, ts, _) = decode_message(&packet)?;
    Ok(Some((msg, ts)))
}

/// Encode and write one message.
pub async fn write_message<W>(writer: &mut W, msg: &Message, ts: u64) -> Result<(), FramingError>
where
    W: AsyncWrite + Unpin,
{
    let packet = encode_message(msg, ts)?;
    writer.write_all(&packet).await?;
    writer.flush().await?;
    Ok(())
}
