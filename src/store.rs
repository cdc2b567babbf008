//! On-disk side table mapping git object ids to Blossom keys, kept under
//! `<git-dir>/blossom/` so repeated pushes do not re-hash or re-upload
//! objects that already live on the server.
//!
//! Layout mirrors git's loose objects: the first two hex characters of the
//! object id name a fan-out directory, the rest names a 32-byte file holding
//! the raw key. Writes go to a `.tmp` sibling and are renamed into place, so
//! concurrent writers are safe and readers never observe a partial file.
//! Entries are written on upload and on every successful fetch decode; they
//! are never deleted.

use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::HelperError;
use crate::hash::{BlossomKey, ObjectId};

/// Handle on the key store of one repository.
#[derive(Clone, Debug)]
pub struct KeyStore {
    root: PathBuf,
}

impl KeyStore {
    /// Store rooted at `<git_dir>/blossom`.
    pub fn new(git_dir: &Path) -> KeyStore {
        KeyStore {
            root: git_dir.join("blossom"),
        }
    }

    fn path_for(&self, id: &ObjectId) -> PathBuf {
        let hex = id.to_string();
        self.root.join(&hex[..2]).join(&hex[2..])
    }

    /// Look up the Blossom key of `id`, `None` when it was never recorded.
    pub fn read(&self, id: &ObjectId) -> Result<Option<BlossomKey>, HelperError> {
        let path = self.path_for(id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if bytes.len() != BlossomKey::LEN {
            return Err(HelperError::Package(format!(
                "corrupt key store entry {} ({} bytes)",
                path.display(),
                bytes.len()
            )));
        }
        Ok(Some(BlossomKey::from_bytes(&bytes)?))
    }

    /// Record `id -> key`. Atomic via rename; content addressing makes
    /// overwrites idempotent.
    pub fn write(&self, id: &ObjectId, key: &BlossomKey) -> Result<(), HelperError> {
        let path = self.path_for(id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, key.as_bytes())?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}
