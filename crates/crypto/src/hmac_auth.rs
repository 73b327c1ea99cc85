//! HMAC-SHA256 authentication

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Length of a computed tag in bytes
pub const HMAC_TAG_LEN: usize = 32;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HmacError {
    #[error("Invalid key length")]
    InvalidKeyLength,

    #[error("HMAC verification failed")]
    VerificationFailed,
}

/// HMAC-SHA256 authenticator
#[derive(Clone)]
pub struct HmacAuthenticator {
    secret: [u8; 32],
}

impl HmacAuthenticator {
    /// Create a new authenticator with the given secret
    pub fn new(secret: [u8; 32]) -> Self {
        Self { secret }
    }

    /// Create an authenticator from a hex-encoded 32-byte secret
    pub fn from_hex(secret: &str) -> Result<Self, HmacError> {
        let bytes = hex::decode(secret.trim()).map_err(|_| HmacError::InvalidKeyLength)?;
        let secret: [u8; 32] = bytes.try_into().map_err(|_| HmacError::InvalidKeyLength)?;
        Ok(Self::new(secret))
    }

    /// Create an authenticator with a fresh random secret
    pub fn generate() -> Self {
        Self::new(crate::token::random_bytes())
    }

    fn mac(&self) -> HmacSha256 {
        <HmacSha256 as Mac>::new_from_slice(&self.secret).expect("HMAC can take key of any size")
    }

    /// Compute HMAC for the given data
    pub fn compute(&self, data: &[u8]) -> [u8; HMAC_TAG_LEN] {
        let mut mac = self.mac();
        mac.update(data);
        mac.finalize().into_bytes().into()
    }

    /// Verify HMAC in constant time
    pub fn verify(&self, data: &[u8], expected: &[u8]) -> Result<(), HmacError> {
        let mut mac = self.mac();
        mac.update(data);
        mac.verify_slice(expected)
            .map_err(|_| HmacError::VerificationFailed)
    }
}

impl std::fmt::Debug for HmacAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacAuthenticator").finish_non_exhaustive()
    }
}

/// Constant-time comparison to prevent timing attacks.
///
/// Differing lengths compare unequal; the length itself is not secret.
#[inline]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hmac_compute_verify() {
        let auth = HmacAuthenticator::new([42u8; 32]);

        let data = b"session cookie id";
        let mac = auth.compute(data);

        assert!(auth.verify(data, &mac).is_ok());
    }

    #[test]
    fn test_hmac_wrong_data() {
        let auth = HmacAuthenticator::new([42u8; 32]);

        let mac = auth.compute(b"session cookie id");

        assert_eq!(
            auth.verify(b"another id", &mac),
            Err(HmacError::VerificationFailed)
        );
        assert!(auth.verify(b"session cookie id", &mac[..16]).is_err());
    }

    #[test]
    fn test_hmac_other_key() {
        let a = HmacAuthenticator::new([1u8; 32]);
        let b = HmacAuthenticator::new([2u8; 32]);

        let mac = a.compute(b"data");
        assert!(b.verify(b"data", &mac).is_err());
    }

    #[test]
    fn test_from_hex() {
        let hex_secret = "2a".repeat(32);
        let auth = HmacAuthenticator::from_hex(&hex_secret).unwrap();
        assert_eq!(auth.compute(b"x"), HmacAuthenticator::new([42u8; 32]).compute(b"x"));

        assert_eq!(
            HmacAuthenticator::from_hex("abcd").unwrap_err(),
            HmacError::InvalidKeyLength
        );
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"token", b"token"));
        assert!(!constant_time_eq(b"token", b"tokem"));
        assert!(!constant_time_eq(b"token", b"toke"));
        assert!(!constant_time_eq(b"", b"token"));
    }
}
