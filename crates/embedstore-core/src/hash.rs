//! Content hashing for files and file parts.
//!
//! Hashes are the content-addressing primitive of the store: identical file
//! bytes in the same group deduplicate to one [`File`](crate::models::File),
//! and identical part text under the same model reuses an existing
//! embedding instead of calling the provider again.
//!
//! Algorithm names follow the SQL Server `HASHBYTES` vocabulary the stored
//! `hash_type` column uses: `MD2`, `MD4`, `MD5`, `SHA`, `SHA1`, `SHA2_256`,
//! `SHA2_512`. `SHA` is SHA-1.
//!
//! # Example
//!
//! ```rust
//! use embedstore_core::hash::{compute_hash_named, verify_hash};
//!
//! let digest = compute_hash_named(b"hello", "SHA2_256").unwrap();
//! assert_eq!(digest.len(), 32);
//! assert!(verify_hash(b"hello", "SHA2_256", &digest).unwrap());
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::Digest;

use crate::error::{Result, StoreError};

/// Supported digest algorithms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HashAlgorithm {
    #[serde(rename = "MD2")]
    Md2,
    #[serde(rename = "MD4")]
    Md4,
    #[serde(rename = "MD5")]
    Md5,
    #[serde(rename = "SHA")]
    Sha,
    #[serde(rename = "SHA1")]
    Sha1,
    #[default]
    #[serde(rename = "SHA2_256")]
    Sha2_256,
    #[serde(rename = "SHA2_512")]
    Sha2_512,
}

impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 7] = [
        HashAlgorithm::Md2,
        HashAlgorithm::Md4,
        HashAlgorithm::Md5,
        HashAlgorithm::Sha,
        HashAlgorithm::Sha1,
        HashAlgorithm::Sha2_256,
        HashAlgorithm::Sha2_512,
    ];

    /// Canonical name as stored in the `hash_type` column.
    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Md2 => "MD2",
            HashAlgorithm::Md4 => "MD4",
            HashAlgorithm::Md5 => "MD5",
            HashAlgorithm::Sha => "SHA",
            HashAlgorithm::Sha1 => "SHA1",
            HashAlgorithm::Sha2_256 => "SHA2_256",
            HashAlgorithm::Sha2_512 => "SHA2_512",
        }
    }

    /// Digest length in bytes.
    pub fn digest_size(&self) -> usize {
        match self {
            HashAlgorithm::Md2 | HashAlgorithm::Md4 | HashAlgorithm::Md5 => 16,
            HashAlgorithm::Sha | HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha2_256 => 32,
            HashAlgorithm::Sha2_512 => 64,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MD2" => Ok(HashAlgorithm::Md2),
            "MD4" => Ok(HashAlgorithm::Md4),
            "MD5" => Ok(HashAlgorithm::Md5),
            "SHA" => Ok(HashAlgorithm::Sha),
            "SHA1" => Ok(HashAlgorithm::Sha1),
            "SHA2_256" | "SHA256" => Ok(HashAlgorithm::Sha2_256),
            "SHA2_512" | "SHA512" => Ok(HashAlgorithm::Sha2_512),
            _ => Err(StoreError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

fn digest_with<D: Digest>(bytes: &[u8]) -> Vec<u8> {
    D::digest(bytes).to_vec()
}

/// Hash `bytes` with a known algorithm.
pub fn compute_hash(bytes: &[u8], algorithm: HashAlgorithm) -> Vec<u8> {
    match algorithm {
        HashAlgorithm::Md2 => digest_with::<md2::Md2>(bytes),
        HashAlgorithm::Md4 => digest_with::<md4::Md4>(bytes),
        HashAlgorithm::Md5 => digest_with::<md5::Md5>(bytes),
        HashAlgorithm::Sha | HashAlgorithm::Sha1 => digest_with::<sha1::Sha1>(bytes),
        HashAlgorithm::Sha2_256 => digest_with::<sha2::Sha256>(bytes),
        HashAlgorithm::Sha2_512 => digest_with::<sha2::Sha512>(bytes),
    }
}

/// Hash `bytes` with an algorithm given by name.
pub fn compute_hash_named(bytes: &[u8], algorithm_name: &str) -> Result<Vec<u8>> {
    let algorithm: HashAlgorithm = algorithm_name.parse()?;
    Ok(compute_hash(bytes, algorithm))
}

/// Check that `digest` is the hash of `bytes` under the named algorithm.
///
/// A digest of the wrong length is simply a mismatch.
pub fn verify_hash(bytes: &[u8], algorithm_name: &str, digest: &[u8]) -> Result<bool> {
    let algorithm: HashAlgorithm = algorithm_name.parse()?;
    if digest.len() != algorithm.digest_size() {
        return Ok(false);
    }
    Ok(compute_hash(bytes, algorithm) == digest)
}

/// Hash of a part's text (its UTF-8 bytes).
pub fn hash_text(text: &str, algorithm: HashAlgorithm) -> Vec<u8> {
    compute_hash(text.as_bytes(), algorithm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_sizes_match_output() {
        for alg in HashAlgorithm::ALL {
            let digest = compute_hash(b"some file bytes", alg);
            assert_eq!(digest.len(), alg.digest_size(), "{}", alg);
        }
    }

    #[test]
    fn test_verify_accepts_own_digest() {
        let data = b"The quick brown fox jumps over the lazy dog";
        for alg in HashAlgorithm::ALL {
            let digest = compute_hash_named(data, alg.name()).unwrap();
            assert!(verify_hash(data, alg.name(), &digest).unwrap(), "{}", alg);
        }
    }

    #[test]
    fn test_verify_rejects_other_bytes() {
        let digest = compute_hash_named(b"alpha", "MD5").unwrap();
        assert!(!verify_hash(b"beta", "MD5", &digest).unwrap());
        assert!(!verify_hash(b"alpha", "MD5", &digest[..8]).unwrap());
    }

    #[test]
    fn test_known_vectors() {
        let md5 = compute_hash(b"", HashAlgorithm::Md5);
        assert_eq!(
            md5,
            [
                0xd4, 0x1d, 0x8c, 0xd9, 0x8f, 0x00, 0xb2, 0x04, 0xe9, 0x80, 0x09, 0x98, 0xec, 0xf8,
                0x42, 0x7e
            ]
        );
        let sha = compute_hash(b"abc", HashAlgorithm::Sha);
        assert_eq!(sha, compute_hash(b"abc", HashAlgorithm::Sha1));
        assert_eq!(sha[..4], [0xa9, 0x99, 0x3e, 0x36]);
    }

    #[test]
    fn test_unknown_algorithm() {
        let err = compute_hash_named(b"x", "CRC32").unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedAlgorithm(ref n) if n == "CRC32"));
        assert!(verify_hash(b"x", "whirlpool", &[0; 64]).is_err());
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(
            "sha2_256".parse::<HashAlgorithm>().unwrap(),
            HashAlgorithm::Sha2_256
        );
        assert_eq!("SHA512".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha2_512);
        for alg in HashAlgorithm::ALL {
            assert_eq!(alg.name().parse::<HashAlgorithm>().unwrap(), alg);
        }
    }
}
