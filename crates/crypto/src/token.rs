//! Unguessable identifiers

use rand::RngCore;
use rand::rngs::OsRng;

/// Fill a 32-byte array from the operating system CSPRNG
pub fn random_bytes() -> [u8; 32] {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// A fresh CSRF token: 32 random bytes, hex encoded
pub fn generate_csrf_token() -> String {
    hex::encode(random_bytes())
}

/// Unguessable id for a conversation parked at the gateway
pub fn generate_conversation_id() -> String {
    hex::encode(&random_bytes()[..16])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_csrf_token_shape() {
        let token = generate_csrf_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_tokens_are_distinct() {
        let tokens: HashSet<String> = (0..256).map(|_| generate_csrf_token()).collect();
        assert_eq!(tokens.len(), 256);
    }

    #[test]
    fn test_conversation_id_shape() {
        let id = generate_conversation_id();
        assert_eq!(id.len(), 32);
        assert_ne!(id, generate_conversation_id());
    }
}
