//! Signed session cookie values
//!
//! A cookie value is `<id>.<tag>`, both URL-safe base64 without padding:
//! `id` is 32 random bytes naming the session, `tag` the HMAC-SHA256 of the
//! id under the gateway's cookie secret. A value whose tag does not verify
//! is rejected before any session lookup happens.

use crate::hmac_auth::{HMAC_TAG_LEN, HmacAuthenticator};
use crate::token::random_bytes;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CookieError {
    #[error("Malformed cookie value")]
    Malformed,

    #[error("Cookie signature mismatch")]
    BadSignature,
}

/// A freshly minted cookie
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedCookie {
    /// Registry key
    pub id: String,
    /// Full value to place in `Set-Cookie`
    pub value: String,
}

/// Mints and checks signed cookie values
#[derive(Debug, Clone)]
pub struct CookieSigner {
    hmac: HmacAuthenticator,
}

impl CookieSigner {
    pub fn new(hmac: HmacAuthenticator) -> Self {
        Self { hmac }
    }

    /// Mint a new cookie from 32 bytes of CSPRNG output
    pub fn issue(&self) -> SignedCookie {
        let id = URL_SAFE_NO_PAD.encode(random_bytes());
        let tag = URL_SAFE_NO_PAD.encode(self.hmac.compute(id.as_bytes()));
        SignedCookie {
            value: format!("{}.{}", id, tag),
            id,
        }
    }

    /// Check authenticity of a cookie value and return its id
    pub fn verify<'a>(&self, value: &'a str) -> Result<&'a str, CookieError> {
        let (id, tag) = value.split_once('.').ok_or(CookieError::Malformed)?;
        if id.is_empty() || tag.contains('.') {
            return Err(CookieError::Malformed);
        }

        let tag = URL_SAFE_NO_PAD
            .decode(tag)
            .map_err(|_| CookieError::Malformed)?;
        if tag.len() != HMAC_TAG_LEN {
            return Err(CookieError::Malformed);
        }

        self.hmac
            .verify(id.as_bytes(), &tag)
            .map_err(|_| CookieError::BadSignature)?;

        Ok(id)
    }

    pub fn is_valid(&self, value: &str) -> bool {
        self.verify(value).is_ok()
    }
}
