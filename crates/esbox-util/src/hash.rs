use std::fmt::Write as _;

/// Compute the BLAKE3 hash of a byte slice, returning the hex-encoded digest.
///
/// Used to derive stable file names for persistent cache entries whose keys
/// (request paths) contain characters that are not filename-safe.
#[must_use]
pub fn blake3_hex(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Short (16 hex chars) BLAKE3 digest for log-friendly identifiers.
#[must_use]
pub fn blake3_short(data: &[u8]) -> String {
    let digest = blake3::hash(data);
    let mut out = String::with_capacity(16);
    for byte in &digest.as_bytes()[..8] {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blake3_hex() {
        // Known BLAKE3 hash of "hello world"
        assert_eq!(
            blake3_hex(b"hello world"),
            "d74981efa70a0c880b8d8c1985d075dbcbf679b99a5f9914e5aaf96b831a9e24"
        );
    }

    #[test]
    fn test_blake3_short_is_prefix() {
        let full = blake3_hex(b"abc");
        let short = blake3_short(b"abc");
        assert_eq!(short.len(), 16);
        assert!(full.starts_with(&short));
    }
}
