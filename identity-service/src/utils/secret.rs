//! Random identifiers and secrets, and their stored hashes.

use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

const HASH_SCHEME: &str = "sha256";

/// Random upper-case identifier for credentials and validations.
pub fn generate_id() -> String {
    let mut bytes = [0u8; 12];
    rand::thread_rng().fill(&mut bytes);
    hex::encode_upper(bytes)
}

/// 256-bit random secret, hex encoded.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// Salted hash in the form `sha256$<salt>$<digest>`.
pub fn hash_secret(secret: &str) -> String {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill(&mut salt);
    let salt = hex::encode(salt);
    format!("{}${}${}", HASH_SCHEME, salt, digest(&salt, secret))
}

/// Constant-time check of `secret` against a value produced by [`hash_secret`].
pub fn verify_secret(secret: &str, stored: &str) -> bool {
    let mut parts = stored.splitn(3, '$');
    let (Some(scheme), Some(salt), Some(expected)) = (parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    if scheme != HASH_SCHEME {
        return false;
    }
    let actual = digest(salt, secret);
    actual.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Unsalted SHA-256 of a token, used where the token itself is the lookup key.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Constant-time check of `token` against a value produced by [`hash_token`].
pub fn verify_token(token: &str, stored_hash: &str) -> bool {
    hash_token(token)
        .as_bytes()
        .ct_eq(stored_hash.as_bytes())
        .into()
}

fn digest(salt: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_salted_hash_verifies() {
        let secret = generate_secret();
        let stored = hash_secret(&secret);
        assert!(stored.starts_with("sha256$"));
        assert!(verify_secret(&secret, &stored));
        assert!(!verify_secret("wrong", &stored));
        assert_ne!(stored, hash_secret(&secret));
    }

    #[test]
    fn test_malformed_stored_hash_never_verifies() {
        assert!(!verify_secret("x", "plain"));
        assert!(!verify_secret("x", "md5$aa$bb"));
    }

    #[test]
    fn test_token_hash() {
        let token = generate_secret();
        assert_eq!(hash_token(&token).len(), 64);
        assert!(verify_token(&token, &hash_token(&token)));
        assert!(!verify_token("other", &hash_token(&token)));
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(generate_id(), generate_id());
        assert_eq!(generate_id().len(), 24);
    }
}
