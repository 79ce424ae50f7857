//! Bearer tokens and lease slugs.

use rand::rngs::OsRng;
use rand::Rng;

/// Length of the plaintext bearer token.
pub const TOKEN_LENGTH: usize = 32;

/// Length of a lease slug.
pub const SLUG_LENGTH: usize = 6;

/// bcrypt work factor. Tokens carry ~190 bits of entropy, so the minimum cost
/// is enough to keep the stored hash one-way.
pub const TOKEN_HASH_COST: u32 = 4;

const ALL_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const SLUG_CHARS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

fn secure_random_string(charset: &[u8], length: usize) -> String {
    let mut rng = OsRng;
    (0..length)
        .map(|_| charset[rng.gen_range(0..charset.len())] as char)
        .collect()
}

/// Generate a new plaintext bearer token.
pub fn generate_token() -> String {
    secure_random_string(ALL_CHARS, TOKEN_LENGTH)
}

/// Generate a lease slug (`[0-9a-z]{6}`).
pub fn generate_slug() -> String {
    secure_random_string(SLUG_CHARS, SLUG_LENGTH)
}

/// Hash a token for storage.
pub fn hash_token(token: &str) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(token, TOKEN_HASH_COST)
}

/// Check a presented token against a stored hash.
///
/// A malformed stored hash counts as a mismatch.
pub fn verify_token(token: &str, hash: &str) -> bool {
    bcrypt::verify(token, hash).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_shape() {
        let token = generate_token();
        assert_eq!(token.len(), TOKEN_LENGTH);
        assert!(token.bytes().all(|b| ALL_CHARS.contains(&b)));
    }

    #[test]
    fn test_slug_shape() {
        let slug = generate_slug();
        assert_eq!(slug.len(), SLUG_LENGTH);
        assert!(slug.bytes().all(|b| SLUG_CHARS.contains(&b)));
    }

    #[test]
    fn test_tokens_differ() {
        assert_ne!(generate_token(), generate_token());
    }

    #[test]
    fn test_hash_verifies_and_hides_token() {
        let token = generate_token();
        let hash = hash_token(&token).unwrap();
        assert_ne!(hash, token);
        assert!(!hash.contains(&token));
        assert!(verify_token(&token, &hash));
        assert!(!verify_token("wrong-token", &hash));
    }

    #[test]
    fn test_malformed_hash_is_mismatch() {
        assert!(!verify_token("anything", "not-a-bcrypt-hash"));
        assert!(!verify_token("anything", ""));
    }
}
