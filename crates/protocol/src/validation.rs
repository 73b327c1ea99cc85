//! Control frame validation utilities

use crate::control::{ControlMessage, DecodeError};
use crate::frame::Frame;
use thiserror::Error;

/// Validation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Control message too large: {size} bytes (max: {max})")]
    ControlTooLarge { size: usize, max: usize },

    #[error("Expected a control message, got data for channel \"{0}\"")]
    UnexpectedChannel(String),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Maximum accepted size of a single control message (64KB)
pub const MAX_CONTROL_SIZE: usize = 65536;

/// Validate a frame that must carry a control message and decode it.
///
/// Used where only control traffic is legal, e.g. the negotiation with a
/// verifier before any channel exists.
pub fn decode_control_frame(frame: &Frame) -> Result<ControlMessage, ValidationError> {
    if frame.len() > MAX_CONTROL_SIZE {
        return Err(ValidationError::ControlTooLarge {
            size: frame.len(),
            max: MAX_CONTROL_SIZE,
        });
    }

    match crate::control::split_channel(frame.payload()) {
        Some(("", _)) => Ok(ControlMessage::decode(frame.payload())?),
        Some((channel, _)) => Err(ValidationError::UnexpectedChannel(channel.to_string())),
        None => Err(DecodeError::NotControl.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_control_frame() {
        let frame = Frame::new(&b"\n{\"command\":\"init\",\"version\":1,\"user\":\"me\"}"[..]);
        let msg = decode_control_frame(&frame).unwrap();
        assert_eq!(msg.command(), "init");
    }

    #[test]
    fn test_channel_data_rejected() {
        let frame = Frame::new(&b"4\nhello"[..]);
        let result = decode_control_frame(&frame);
        assert_eq!(result, Err(ValidationError::UnexpectedChannel("4".into())));
    }

    #[test]
    fn test_control_too_large() {
        let mut payload = b"\n{\"command\":\"init\",\"pad\":\"".to_vec();
        payload.extend(std::iter::repeat_n(b'x', MAX_CONTROL_SIZE));
        payload.extend_from_slice(b"\"}");

        let result = decode_control_frame(&Frame::new(payload));
        assert!(matches!(result, Err(ValidationError::ControlTooLarge { .. })));
    }

    #[test]
    fn test_garbage_rejected() {
        let result = decode_control_frame(&Frame::new(&b"garbage"[..]));
        assert_eq!(result, Err(ValidationError::Decode(DecodeError::NotControl)));
    }
}
