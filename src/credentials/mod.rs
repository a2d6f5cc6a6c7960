/// Credential stores
///
/// Each store owns the lifecycle of one credential type: single-use magic
/// link tokens, browser sessions, bearer API keys and passkeys.

mod api_keys;
mod passkeys;
mod sessions;
mod tokens;

pub use api_keys::{ApiKeyStore, API_KEY_PREFIX};
pub use passkeys::PasskeyStore;
pub use sessions::{SessionStore, SESSION_COOKIE};
pub use tokens::TokenStore;

use rand::RngCore;
use sha2::{Digest, Sha256};

/// Bytes of randomness behind every token, session id and API key
pub const SECRET_BYTES: usize = 32;

/// Generate a 256-bit random value, hex encoded
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Hex-encoded SHA-256 digest
pub fn sha256_hex(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_secret_is_256_bits_of_hex() {
        let secret = generate_secret();
        assert_eq!(secret.len(), 64);
        assert!(secret.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_secrets_are_unique() {
        let secrets: HashSet<String> = (0..100).map(|_| generate_secret()).collect();
        assert_eq!(secrets.len(), 100);
    }

    #[test]
    fn test_sha256_hex_is_stable() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
