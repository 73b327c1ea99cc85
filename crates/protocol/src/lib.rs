//! wsgate Protocol - Frame and control message definitions
//!
//! This crate defines the wire-level data structures shared by the gateway
//! and the credential verifier:
//! - `Frame`: a length-prefixed opaque payload (`<length>\n<payload>`)
//! - `ControlMessage`: JSON envelopes (`init`, `authorize`, `open`, `close`)
//! - `Challenge`/`AuthOutcome`/`Problem`: the authorize negotiation vocabulary
//!
//! Nothing here performs I/O; see `wsgate-transport` for stream handling.

mod auth;
mod control;
mod frame;
mod validation;

pub use auth::*;
pub use control::*;
pub use frame::*;
pub use validation::*;
