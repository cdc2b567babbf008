//! Codec for the object packages stored on Blossom servers.
//!
//! A package wraps one git object together with the Blossom keys of every
//! object it references:
//!
//! ```text
//! <type> SP <decimal body length> NUL <raw object bytes> <dep key 1> ... <dep key N>
//! ```
//!
//! The header and body are exactly git's loose-object preimage, so the git
//! object id is preserved; the trailing 32-byte keys let a fetch walk the
//! object graph without any side-channel index. The whole sequence is
//! zlib-compressed before storage, and the Blossom key of the package is the
//! SHA-256 of the *compressed* bytes. Compression with a fixed level keeps
//! the encoding deterministic, so re-pushing the same objects yields the same
//! keys.

use std::fmt::Display;
use std::io::Write;
use std::str::FromStr;

use flate2::Compression;
use flate2::write::{ZlibDecoder, ZlibEncoder};

use crate::errors::HelperError;
use crate::hash::BlossomKey;

/// The four git object types that can travel through a package.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Commit,
    Tree,
    Blob,
    Tag,
}

impl ObjectType {
    /// Lowercase type name as it appears in the package header and in
    /// `git cat-file -t` output.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Commit => "commit",
            ObjectType::Tree => "tree",
            ObjectType::Blob => "blob",
            ObjectType::Tag => "tag",
        }
    }
}

impl Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectType {
    type Err = HelperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "commit" => Ok(ObjectType::Commit),
            "tree" => Ok(ObjectType::Tree),
            "blob" => Ok(ObjectType::Blob),
            "tag" => Ok(ObjectType::Tag),
            _ => Err(HelperError::InvalidObjectType(s.to_string())),
        }
    }
}

/// Prefix `body` with the git loose-object header `<type> SP <len> NUL`.
pub fn with_header(obj_type: ObjectType, body: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(body.len() + 16);
    data.extend_from_slice(obj_type.as_str().as_bytes());
    data.push(b' ');
    data.extend_from_slice(body.len().to_string().as_bytes());
    data.push(b'\x00');
    data.extend_from_slice(body);
    data
}

/// Zlib-compress a package for storage.
pub fn compress(data: &[u8]) -> Result<Vec<u8>, HelperError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Inflate a downloaded package.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, HelperError> {
    let mut decoder = ZlibDecoder::new(Vec::new());
    decoder
        .write_all(data)
        .map_err(|e| HelperError::Package(format!("zlib: {e}")))?;
    decoder
        .finish()
        .map_err(|e| HelperError::Package(format!("zlib: {e}")))
}

/// A decompressed package split into its parts. The dependency keys stay as
/// an opaque tail until the caller knows how many the object references.
#[derive(Debug)]
pub struct ParsedPackage {
    pub obj_type: ObjectType,
    pub body: Vec<u8>,
    key_tail: Vec<u8>,
}

impl ParsedPackage {
    /// Split decompressed package bytes at the first NUL into the
    /// `<type> SP <len>` header, the raw object body, and the key tail.
    pub fn parse(data: &[u8]) -> Result<ParsedPackage, HelperError> {
        let nul = memchr::memchr(b'\x00', data)
            .ok_or_else(|| HelperError::Package("missing header terminator".to_string()))?;
        let header = std::str::from_utf8(&data[..nul])
            .map_err(|_| HelperError::Package("non-utf8 header".to_string()))?;
        let (type_str, len_str) = header
            .split_once(' ')
            .ok_or_else(|| HelperError::Package(format!("malformed header `{header}`")))?;
        let obj_type: ObjectType = type_str.parse()?;
        let len: usize = len_str
            .parse()
            .map_err(|_| HelperError::Package(format!("bad body length `{len_str}`")))?;

        let tail = &data[nul + 1..];
        if tail.len() < len {
            return Err(HelperError::Package(format!(
                "truncated body: header says {len} bytes, {} available",
                tail.len()
            )));
        }
        Ok(ParsedPackage {
            obj_type,
            body: tail[..len].to_vec(),
            key_tail: tail[len..].to_vec(),
        })
    }

    /// Consume the key tail as exactly `count` Blossom keys, in the same
    /// order the referenced objects were listed at encode time. Any shortfall
    /// or remainder is an integrity failure.
    pub fn dependency_keys(self, count: usize) -> Result<Vec<BlossomKey>, HelperError> {
        let want = count * BlossomKey::LEN;
        if self.key_tail.len() < want {
            return Err(HelperError::Package(format!(
                "truncated dependency keys: need {want} bytes, {} available",
                self.key_tail.len()
            )));
        }
        let keys = self.key_tail[..want]
            .chunks_exact(BlossomKey::LEN)
            .map(BlossomKey::from_bytes)
            .collect::<Result<Vec<_>, _>>()?;
        let leftover = self.key_tail.len() - want;
        if leftover > 0 {
            return Err(HelperError::TrailingKeys(leftover));
        }
        Ok(keys)
    }
}
