//! Content addressing for uploaded bytes.

/// Number of hash bytes kept for the content digest.
const DIGEST_BYTES: usize = 16;

/// Compute the content digest of an upload: the 16-byte prefix of the
/// BLAKE3 hash, as 32 lowercase hex characters.
///
/// The digest doubles as the public folder name and the dedup key, so it
/// is a pure function of the bytes. Truncation collisions are treated as
/// identical inputs.
pub fn content_digest(bytes: &[u8]) -> String {
    let hash = blake3::hash(bytes);
    hash.to_hex()[..DIGEST_BYTES * 2].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_shape() {
        let digest = content_digest(b"hello");
        assert_eq!(digest.len(), 32);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_digest_is_pure() {
        assert_eq!(content_digest(b"hello"), content_digest(b"hello"));
        assert_ne!(content_digest(b"hello"), content_digest(b"hello!"));
        assert_ne!(content_digest(b""), content_digest(b"\0"));
    }

    #[test]
    fn test_digest_matches_blake3_prefix() {
        let full = blake3::hash(b"some image bytes").to_hex().to_string();
        assert_eq!(content_digest(b"some image bytes"), full[..32]);
    }
}
