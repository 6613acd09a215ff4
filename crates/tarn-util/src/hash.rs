use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sha2::{Digest, Sha512};

/// Compute the BLAKE3 hash of a byte slice, returning the hex-encoded digest.
#[must_use]
pub fn blake3_bytes(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Compute the raw SHA-512 digest of a byte slice.
#[must_use]
pub fn sha512_bytes(data: &[u8]) -> Vec<u8> {
    Sha512::digest(data).to_vec()
}

/// Compute a Subresource Integrity string (`sha512-<base64>`) for a byte slice.
#[must_use]
pub fn sha512_sri(data: &[u8]) -> String {
    format!("sha512-{}", STANDARD.encode(Sha512::digest(data)))
}

/// Encode bytes as standard base64.
#[must_use]
pub fn base64_encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decode standard base64, returning `None` on malformed input.
#[must_use]
pub fn base64_decode(data: &str) -> Option<Vec<u8>> {
    STANDARD.decode(data).ok()
}

/// Lowercase hex encoding.
#[must_use]
pub fn to_hex(data: &[u8]) -> String {
    use std::fmt::Write;
    data.iter().fold(String::with_capacity(data.len() * 2), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blake3_bytes() {
        let hash = blake3_bytes(b"hello world");
        assert_eq!(
            hash,
            "d74981efa70a0c880b8d8c1985d075dbcbf679b99a5f9914e5aaf96b831a9e24"
        );
    }

    #[test]
    fn test_sha512_sri_empty() {
        assert_eq!(
            sha512_sri(b""),
            "sha512-z4PhNX7vuL3xVChQ1m2AB9Yg5AULVxXcg/SpIdNs6c5H0NE8XYXysP+DGNKHfuwvY7kxvUdBeoGlODJ6+SfaPg=="
        );
    }

    #[test]
    fn test_base64_roundtrip() {
        let digest = sha512_bytes(b"abc");
        let encoded = base64_encode(&digest);
        assert_eq!(base64_decode(&encoded).unwrap(), digest);
        assert!(base64_decode("not base64!!").is_none());
    }

    #[test]
    fn test_to_hex() {
        assert_eq!(to_hex(&[0x00, 0xab, 0xff]), "00abff");
    }
}
