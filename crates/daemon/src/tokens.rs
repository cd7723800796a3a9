//! Webhook bearer-token generation and verification.
//!
//! Tokens are `ts_` followed by 64 hex chars (256 random bits). Only the
//! bcrypt hash is stored; the plaintext is returned once at creation.

use rand::RngCore;

/// Prefix of every issued token.
pub const TOKEN_PREFIX: &str = "ts_";
/// Random bytes per token.
pub const TOKEN_BYTE_LEN: usize = 32;

const BCRYPT_COST: u32 = 12;

/// Generate a fresh plaintext token.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTE_LEN];
    rand::rng().fill_bytes(&mut bytes);
    format!("{TOKEN_PREFIX}{}", hex::encode(bytes))
}

/// Generate a 16-hex-char token id.
pub fn generate_token_id() -> String {
    let mut bytes = [0u8; 8];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Hash a plaintext token for storage.
pub fn hash_token(plaintext: &str) -> anyhow::Result<String> {
    bcrypt::hash(plaintext, BCRYPT_COST).map_err(|err| anyhow::anyhow!("hash token: {err}"))
}

/// Compare a plaintext token against a stored hash.
pub fn verify_token(plaintext: &str, hash: &str) -> bool {
    bcrypt::verify(plaintext, hash).unwrap_or(false)
}

/// Cheap shape check run before any hash comparison.
pub fn is_valid_token_format(token: &str) -> bool {
    let Some(hex_part) = token.strip_prefix(TOKEN_PREFIX) else {
        return false;
    };
    hex_part.len() == TOKEN_BYTE_LEN * 2 && hex_part.bytes().all(|b| b.is_ascii_hexdigit())
}
