//! wsgate Crypto - Cookie authenticity and unguessable tokens
//!
//! This crate provides:
//! - HMAC-SHA256 with constant-time verification
//! - Signed session cookie values (`CookieSigner`)
//! - CSPRNG-backed identifiers and CSRF tokens

mod cookie;
mod hmac_auth;
mod token;

pub use cookie::*;
pub use hmac_auth::*;
pub use token::*;
