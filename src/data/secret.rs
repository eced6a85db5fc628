use rand::Rng;
use rand::distr::Alphanumeric;

/// Length of generated passwords and backup secrets.
pub const SECRET_LENGTH: usize = 48;

/// High-entropy alphanumeric secret from the thread-local CSPRNG.
pub fn generate_secret(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Hex encoded random token of `bytes` random bytes.
pub fn generate_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::rng().fill(buf.as_mut_slice());
    hex::encode(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_secret() {
        let a = generate_secret(SECRET_LENGTH);
        let b = generate_secret(SECRET_LENGTH);
        assert_eq!(a.len(), SECRET_LENGTH);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_generate_token_is_hex() {
        let token = generate_token(32);
        assert_eq!(token.len(), 64);
        assert!(hex::decode(&token).is_ok());
    }
}
