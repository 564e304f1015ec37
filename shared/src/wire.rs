//! Byte-level writer/reader primitives shared by both ends of the connection.
//!
//! All multi-byte values are little-endian. Hash tokens occupy a fixed
//! [`TOKEN_LEN`]-byte field; a field of all zero bytes encodes "no token".

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use thiserror::Error;

/// Width of an encoded hash token in bytes (256 bits).
pub const TOKEN_LEN: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("unexpected end of message: needed {needed} bytes, {remaining} left")]
    Truncated { needed: usize, remaining: usize },

    #[error("invalid hash token: {0}")]
    InvalidToken(String),
}

/// Fixed-capacity identity used for stages and rooms.
///
/// Holds an ASCII name of 1..=32 bytes, zero padded. The all-zero pattern is
/// reserved for the null token, so a real token is never empty.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HashToken([u8; TOKEN_LEN]);

impl HashToken {
    pub fn new(name: &str) -> Result<Self, WireError> {
        let raw = name.as_bytes();
        if raw.is_empty() {
            return Err(WireError::InvalidToken("empty name".to_string()));
        }
        if raw.len() > TOKEN_LEN {
            return Err(WireError::InvalidToken(format!(
                "{} is longer than {} bytes",
                name, TOKEN_LEN
            )));
        }
        if raw.contains(&0) {
            return Err(WireError::InvalidToken(format!("{:?} contains NUL", name)));
        }

        let mut bytes = [0u8; TOKEN_LEN];
        bytes[..raw.len()].copy_from_slice(raw);
        Ok(Self(bytes))
    }

    fn from_raw(bytes: [u8; TOKEN_LEN]) -> Result<Option<Self>, WireError> {
        if bytes.iter().all(|b| *b == 0) {
            return Ok(None);
        }
        // Padding must be trailing: a NUL followed by data cannot come from `new`.
        let len = bytes.iter().position(|b| *b == 0).unwrap_or(TOKEN_LEN);
        if bytes[len..].iter().any(|b| *b != 0) {
            return Err(WireError::InvalidToken("interior NUL".to_string()));
        }
        Ok(Some(Self(bytes)))
    }

    pub fn as_str(&self) -> &str {
        let len = self.0.iter().position(|b| *b == 0).unwrap_or(TOKEN_LEN);
        std::str::from_utf8(&self.0[..len]).unwrap_or("<non-utf8>")
    }
}

impl fmt::Debug for HashToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HashToken({:?})", self.as_str())
    }
}

impl fmt::Display for HashToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Growable outbound buffer.
#[derive(Debug, Default, Clone)]
pub struct Writer {
    buf: BytesMut,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn write_i8(&mut self, value: i8) {
        self.buf.put_i8(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.put_u16_le(value);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.put_u32_le(value);
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.put_i32_le(value);
    }

    pub fn write_f32(&mut self, value: f32) {
        self.buf.put_f32_le(value);
    }

    pub fn write_token(&mut self, token: Option<&HashToken>) {
        match token {
            Some(token) => self.buf.put_slice(&token.0),
            None => self.buf.put_bytes(0, TOKEN_LEN),
        }
    }

    /// Splices everything written to `other` onto the end of this writer.
    pub fn append(&mut self, other: &Writer) {
        self.buf.extend_from_slice(&other.buf);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Cursor over an inbound message.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn need(&self, needed: usize) -> Result<(), WireError> {
        if self.buf.remaining() < needed {
            return Err(WireError::Truncated {
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_i8(&mut self) -> Result<i8, WireError> {
        self.need(1)?;
        Ok(self.buf.get_i8())
    }

    pub fn read_u16(&mut self) -> Result<u16, WireError> {
        self.need(2)?;
        Ok(self.buf.get_u16_le())
    }

    pub fn read_u32(&mut self) -> Result<u32, WireError> {
        self.need(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn read_i32(&mut self) -> Result<i32, WireError> {
        self.need(4)?;
        Ok(self.buf.get_i32_le())
    }

    pub fn read_f32(&mut self) -> Result<f32, WireError> {
        self.need(4)?;
        Ok(self.buf.get_f32_le())
    }

    pub fn read_token(&mut self) -> Result<Option<HashToken>, WireError> {
        self.need(TOKEN_LEN)?;
        let mut raw = [0u8; TOKEN_LEN];
        self.buf.copy_to_slice(&mut raw);
        HashToken::from_raw(raw)
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
