//! SHA-256 identities used as cache keys
//!
//! A `Hash` always corresponds to the exact byte sequence it was computed
//! from. Its string form is 64 lowercase hex characters.

use crate::error::{LfxError, LfxResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

/// Length of a SHA-256 digest in bytes
pub const HASH_LEN: usize = 32;

/// Fixed-length SHA-256 digest
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash([u8; HASH_LEN]);

/// Hash of the raw bytes of a downloaded archive or file
pub type ArchiveId = Hash;

impl Hash {
    /// Wrap raw digest bytes
    pub fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Hash an in-memory byte slice
    pub fn of(bytes: impl AsRef<[u8]>) -> Self {
        Self(Sha256::digest(bytes.as_ref()).into())
    }

    /// Hash everything a reader yields
    pub fn of_reader(mut reader: impl Read) -> std::io::Result<Self> {
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let read = reader.read(&mut buf)?;
            if read == 0 {
                break;
            }
            hasher.update(&buf[..read]);
        }
        Ok(Self(hasher.finalize().into()))
    }

    /// Hash a file on disk
    pub fn of_file(path: &Path) -> LfxResult<Self> {
        let file = File::open(path)
            .map_err(|e| LfxError::io(format!("opening {} for hashing", path.display()), e))?;
        Self::of_reader(file)
            .map_err(|e| LfxError::io(format!("hashing {}", path.display()), e))
    }

    /// Lowercase hex form
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Incremental hasher that produces a [`Hash`]
#[derive(Default)]
pub struct Hasher(Sha256);

impl Hasher {
    pub fn new() -> Self {
        Self(Sha256::new())
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }

    pub fn finish(self) -> Hash {
        Hash(self.0.finalize().into())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl FromStr for Hash {
    type Err = LfxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != HASH_LEN * 2 {
            return Err(LfxError::InvalidHash {
                value: s.to_string(),
                reason: format!("expected {} hex characters, got {}", HASH_LEN * 2, s.len()),
            });
        }
        let mut bytes = [0u8; HASH_LEN];
        hex::decode_to_slice(s, &mut bytes).map_err(|e| LfxError::InvalidHash {
            value: s.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self(bytes))
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const HELLO_WORLD: &str = "7f83b1657ff1fc53b92dc18148a1d65dfc2d4b1fa3d677284addd200126d9069";

    #[test]
    fn hash_known_value() {
        assert_eq!(Hash::of(b"Hello World!").to_string(), HELLO_WORLD);
    }

    #[test]
    fn hash_deterministic() {
        assert_eq!(Hash::of(b"content"), Hash::of(b"content"));
        assert_ne!(Hash::of(b"content 1"), Hash::of(b"content 2"));
    }

    #[test]
    fn parse_roundtrip_and_lowercase() {
        let upper = HELLO_WORLD.to_uppercase();
        let hash: Hash = upper.parse().unwrap();
        assert_eq!(hash.to_string(), HELLO_WORLD);
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!("abc".parse::<Hash>().is_err());
        let not_hex = "z".repeat(64);
        assert!(not_hex.parse::<Hash>().is_err());
    }

    #[test]
    fn file_and_reader_agree() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blob");
        std::fs::write(&path, b"Hello World!").unwrap();
        assert_eq!(Hash::of_file(&path).unwrap(), Hash::of(b"Hello World!"));

        let mut hasher = Hasher::new();
        hasher.update(b"Hello ");
        hasher.update(b"World!");
        assert_eq!(hasher.finish(), Hash::of(b"Hello World!"));
    }

    #[test]
    fn serde_as_hex_string() {
        let hash = Hash::of(b"Hello World!");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", HELLO_WORLD));
        let back: Hash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }
}
