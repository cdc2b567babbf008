//! Hash types for the remote helper: git object ids (SHA-1 on the write
//! path, SHA-256 accepted read-only) and Blossom keys (SHA-256 of the stored
//! package bytes).
//!
//! The two kinds of hash never mix: an [`ObjectId`] names an object inside
//! the local git object store, a [`BlossomKey`] names a compressed package on
//! a Blossom server. Dependency keys embedded in packages are always
//! 32-byte Blossom keys regardless of the repository's object format.

use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::HelperError;

/// Supported object-id algorithms, matching git's `extensions.objectformat`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HashKind {
    #[default]
    Sha1,
    Sha256,
}

impl HashKind {
    /// Byte length of the hash output.
    pub const fn size(&self) -> usize {
        match self {
            HashKind::Sha1 => 20,
            HashKind::Sha256 => 32,
        }
    }

    /// Hex string length of the hash output.
    pub const fn hex_len(&self) -> usize {
        match self {
            HashKind::Sha1 => 40,
            HashKind::Sha256 => 64,
        }
    }

    /// Lowercase name of the hash algorithm.
    pub const fn as_str(&self) -> &'static str {
        match self {
            HashKind::Sha1 => "sha1",
            HashKind::Sha256 => "sha256",
        }
    }
}

impl Display for HashKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashKind {
    type Err = HelperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha1" => Ok(HashKind::Sha1),
            "sha256" => Ok(HashKind::Sha256),
            _ => Err(HelperError::Config(format!(
                "unsupported object format `{s}`"
            ))),
        }
    }
}

/// A git object id carrying the bytes for its algorithm.
///
/// Parsed from hex by length: 40 characters is SHA-1, 64 is SHA-256.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectId {
    Sha1([u8; 20]),
    Sha256([u8; 32]),
}

impl Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.as_ref()))
    }
}

impl AsRef<[u8]> for ObjectId {
    fn as_ref(&self) -> &[u8] {
        match self {
            ObjectId::Sha1(bytes) => bytes.as_slice(),
            ObjectId::Sha256(bytes) => bytes.as_slice(),
        }
    }
}

/// Parse hex (40 for SHA-1, 64 for SHA-256) into `ObjectId`.
impl FromStr for ObjectId {
    type Err = HelperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes =
            hex::decode(s).map_err(|_| HelperError::InvalidObjectId(s.to_string()))?;
        match bytes.len() {
            20 => {
                let mut h = [0u8; 20];
                h.copy_from_slice(&bytes);
                Ok(ObjectId::Sha1(h))
            }
            32 => {
                let mut h = [0u8; 32];
                h.copy_from_slice(&bytes);
                Ok(ObjectId::Sha256(h))
            }
            _ => Err(HelperError::InvalidObjectId(s.to_string())),
        }
    }
}

impl ObjectId {
    /// Return the hash kind for this value.
    pub fn kind(&self) -> HashKind {
        match self {
            ObjectId::Sha1(_) => HashKind::Sha1,
            ObjectId::Sha256(_) => HashKind::Sha256,
        }
    }
}

/// Key of a blob on a Blossom server: the SHA-256 of the stored bytes.
///
/// For this helper the stored bytes are always a zlib-compressed object
/// package, so the key is `SHA-256(compressed package)`, never the git id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlossomKey([u8; 32]);

impl BlossomKey {
    /// Raw length of a key in bytes.
    pub const LEN: usize = 32;

    /// Hash `data` into the Blossom key under which it would be stored.
    pub fn digest(data: &[u8]) -> BlossomKey {
        BlossomKey(Sha256::digest(data).into())
    }

    /// Build a key from exactly [`BlossomKey::LEN`] raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<BlossomKey, HelperError> {
        if bytes.len() != Self::LEN {
            return Err(HelperError::Package(format!(
                "blossom key must be {} bytes, got {}",
                Self::LEN,
                bytes.len()
            )));
        }
        let mut key = [0u8; Self::LEN];
        key.copy_from_slice(bytes);
        Ok(BlossomKey(key))
    }

    /// Parse a key from its 64-character hex form.
    pub fn from_hex(s: &str) -> Result<BlossomKey, HelperError> {
        let bytes = hex::decode(s)
            .map_err(|_| HelperError::Package(format!("invalid blossom key hex `{s}`")))?;
        Self::from_bytes(&bytes)
    }

    /// Raw key bytes, as embedded in encoded packages.
    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }
}

/// Hex form, which is also the Blossom URL path of the blob.
impl Display for BlossomKey {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}
