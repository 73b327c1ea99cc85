//! wsgate Daemon
//!
//! The web-facing gateway: runs login negotiations against credential
//! verifiers, keeps the resulting sessions, and routes browser channels to
//! each session's bridge process.

pub mod bridge;
pub mod channel;
pub mod config;
pub mod environment;
pub mod error;
pub mod handler;
pub mod login;
pub mod metrics;
pub mod response;
pub mod routes;
pub mod session_registry;

pub use config::GatewayConfig;
pub use handler::{Gateway, run_gateway};
