//! Frame - length-prefixed opaque payloads
//!
//! Wire format: the payload length in ASCII decimal, a single `\n`, then
//! exactly that many payload bytes. The payload itself is opaque at this
//! layer; control envelopes and channel data are layered on top.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Longest accepted length prefix, in digits.
pub const MAX_PREFIX_DIGITS: usize = 10;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Empty length prefix")]
    EmptyPrefix,

    #[error("Invalid byte in length prefix: 0x{0:02x}")]
    InvalidDigit(u8),

    #[error("Length prefix longer than {MAX_PREFIX_DIGITS} digits")]
    PrefixTooLong,

    #[error("Length prefix overflows: {0}")]
    Overflow(String),
}

/// A single frame payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    payload: Bytes,
}

impl Frame {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Encode prefix and payload into one contiguous buffer, so a single
    /// write puts the whole frame on the wire.
    pub fn encode(&self) -> Bytes {
        let header = self.payload.len().to_string();
        let mut buf = BytesMut::with_capacity(header.len() + 1 + self.payload.len());
        buf.put_slice(header.as_bytes());
        buf.put_u8(b'\n');
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}

impl From<Vec<u8>> for Frame {
    fn from(payload: Vec<u8>) -> Self {
        Self::new(payload)
    }
}

impl From<Bytes> for Frame {
    fn from(payload: Bytes) -> Self {
        Self::new(payload)
    }
}

/// Parse the digits of a length prefix (without the trailing newline).
pub fn parse_length_prefix(digits: &[u8]) -> Result<usize, FrameError> {
    if digits.is_empty() {
        return Err(FrameError::EmptyPrefix);
    }
    if digits.len() > MAX_PREFIX_DIGITS {
        return Err(FrameError::PrefixTooLong);
    }

    let mut length: usize = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(FrameError::InvalidDigit(b));
        }
        length = length
            .checked_mul(10)
            .and_then(|l| l.checked_add(usize::from(b - b'0')))
            .ok_or_else(|| FrameError::Overflow(String::from_utf8_lossy(digits).into_owned()))?;
    }

    Ok(length)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_prefix() {
        let payload = b"\n{\"command\":\"init\"}";
        let encoded = Frame::new(&payload[..]).encode();

        assert!(encoded.starts_with(b"19\n\n{"));
        assert_eq!(encoded.len(), 3 + payload.len());
        assert_eq!(&encoded[3..], &payload[..]);
    }

    #[test]
    fn test_encode_empty() {
        let frame = Frame::new(Bytes::new());
        assert_eq!(&frame.encode()[..], b"0\n");
        assert!(frame.is_empty());
    }

    #[test]
    fn test_parse_prefix() {
        assert_eq!(parse_length_prefix(b"0"), Ok(0));
        assert_eq!(parse_length_prefix(b"1234"), Ok(1234));
    }

    #[test]
    fn test_parse_prefix_rejects_garbage() {
        assert_eq!(parse_length_prefix(b""), Err(FrameError::EmptyPrefix));
        assert_eq!(parse_length_prefix(b"12a"), Err(FrameError::InvalidDigit(b'a')));
        assert_eq!(parse_length_prefix(b"-1"), Err(FrameError::InvalidDigit(b'-')));
        assert_eq!(
            parse_length_prefix(b"12345678901"),
            Err(FrameError::PrefixTooLong)
        );
    }
}
