//! Message framing on the TCP stream.
//!
//! One physical message (a run of opcode records closed by `END_MSG`) is
//! one frame:
//!
//! ```text
//! +-------------------+--------------------------------------+
//! | length (4 bytes)  | records ... END_MSG                  |
//! | u32 little-endian | (length bytes)                       |
//! +-------------------+--------------------------------------+
//! ```
//!
//! The length counts payload bytes only. Framing does not look inside the
//! payload; an empty one is passed up and rejected by the session layer.

use bytes::{BufMut, BytesMut};
use std::io::ErrorKind;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const LEN_PREFIX: usize = 4;

#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Largest payload accepted or sent, in bytes.
    pub max_payload_size: u32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: 1_048_576,
        }
    }
}

impl FrameConfig {
    fn check(&self, size: u32) -> Result<(), FrameError> {
        if size > self.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size,
                max: self.max_payload_size,
            });
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("payload size {size} exceeds maximum {max}")]
    PayloadTooLarge { size: u32, max: u32 },

    /// The peer went away, possibly mid-frame.
    #[error("connection closed")]
    ConnectionClosed,

    #[error("I/O error: {0}")]
    Io(std::io::Error),
}

impl From<std::io::Error> for FrameError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset | ErrorKind::BrokenPipe => {
                FrameError::ConnectionClosed
            }
            _ => FrameError::Io(e),
        }
    }
}

/// Reads one message payload.
pub async fn read_frame<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    config: &FrameConfig,
) -> Result<Vec<u8>, FrameError> {
    let size = reader.read_u32_le().await?;
    config.check(size)?;

    let mut payload = vec![0u8; size as usize];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Writes one message as a single buffer and flushes.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    payload: &[u8],
    config: &FrameConfig,
) -> Result<(), FrameError> {
    let size = u32::try_from(payload.len()).unwrap_or(u32::MAX);
    config.check(size)?;

    let mut frame = BytesMut::with_capacity(LEN_PREFIX + payload.len());
    frame.put_u32_le(size);
    frame.put_slice(payload);
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}
