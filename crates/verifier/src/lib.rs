//! wsgate Verifier - Reference credential verifier
//!
//! This crate provides:
//! - A sans-IO negotiation engine for the verifier side of the authorize protocol
//! - The fixed credential and scenario table the reference verifier answers with
//! - A driver running the engine over stdin/stdout, with bridge handoff

mod driver;
mod engine;
mod scenario;

pub use driver::*;
pub use engine::*;
pub use scenario::*;

use thiserror::Error;
use wsgate_transport::TransportError;

#[derive(Error, Debug)]
pub enum NegotiationError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Gateway closed the stream before a verdict")]
    Closed,

    #[error("Failed to start bridge {program}: {reason}")]
    Bridge { program: String, reason: String },
}
