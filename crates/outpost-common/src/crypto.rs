//! Hashing helpers

use sha2::{Digest, Sha256};

/// Compute SHA-256 hash of data
pub fn sha256(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// Compute SHA-256 hash and return as hex string
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// 32 hex character tag for a tenant, sent as a request header so scan
/// traffic can be attributed without exposing the username
pub fn tenant_tag(username: &str) -> String {
    let mut digest = sha256_hex(username.as_bytes());
    digest.truncate(32);
    digest
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256() {
        let hash = sha256_hex(b"hello world");
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_tenant_tag() {
        let tag = tenant_tag("hello world");
        assert_eq!(tag, "b94d27b9934d3e08a52e52d7da7dabfa");
        assert_ne!(tenant_tag("a@acme.com"), tenant_tag("b@acme.com"));
    }
}
