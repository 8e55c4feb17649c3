use rand::{rngs::OsRng, RngCore};

pub const API_KEY_PREFIX: &str = "sk_";
const API_KEY_BYTES: usize = 24;
const RESET_TOKEN_BYTES: usize = 32;
const SESSION_ID_BYTES: usize = 32;

/// Hex token from `byte_len` cryptographically random bytes.
pub fn generate_token(byte_len: usize) -> String {
    let mut bytes = vec![0u8; byte_len];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Bearer key handed to a user exactly once at signup: `sk_` + 48 hex chars.
pub fn generate_api_key() -> String {
    format!("{}{}", API_KEY_PREFIX, generate_token(API_KEY_BYTES))
}

pub fn generate_reset_token() -> String {
    generate_token(RESET_TOKEN_BYTES)
}

pub fn generate_session_id() -> String {
    generate_token(SESSION_ID_BYTES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_format() {
        let key = generate_api_key();
        assert!(key.starts_with("sk_"));
        let rest = &key["sk_".len()..];
        assert_eq!(rest.len(), 48);
        assert!(rest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn reset_token_is_64_hex_chars() {
        let token = generate_reset_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn tokens_do_not_repeat() {
        let a = generate_api_key();
        let b = generate_api_key();
        assert_ne!(a, b);
        assert_ne!(generate_session_id(), generate_session_id());
    }
}
