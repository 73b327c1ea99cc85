//! wsgate Transport - Stream and process layer
//!
//! This crate provides:
//! - Async frame reader/writer over any byte stream
//! - Backend processes speaking frames on stdin/stdout
//! - WebSocket message <-> frame payload conversion
//! - The gateway TCP listener with a connection limit

mod backend;
mod frame_codec;
mod frame_io;
mod listener;

pub use backend::*;
pub use frame_codec::*;
pub use frame_io::*;
pub use listener::*;

use thiserror::Error;
use wsgate_protocol::FrameError;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bad frame: {0}")]
    Frame(#[from] FrameError),

    #[error("Stream ended inside a length prefix")]
    TruncatedPrefix,

    #[error("Stream ended inside a frame: expected {expected} bytes, got {got}")]
    TruncatedFrame { expected: usize, got: usize },

    #[error("Failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },
}
