//! NIP-01 events as this helper uses them: the kind-30618 repository state
//! event and the ephemeral kind-24242 Blossom upload authorization.
//!
//! The event id is the SHA-256 of the canonical serialization
//! `[0, pubkey, created_at, kind, tags, content]` in compact JSON; the
//! signature is BIP-340 schnorr over that id.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::HelperError;
use crate::hash::BlossomKey;
use crate::nostr::keys::{self, Keys};

/// Replaceable repository state event (refs + symrefs).
pub const STATE_KIND: u32 = 30618;
/// Blossom upload authorization event.
pub const UPLOAD_AUTH_KIND: u32 = 24242;

/// Fixed expiration tag value carried by upload authorizations.
const UPLOAD_AUTH_EXPIRATION: &str = "1777777777";

/// A signed NIP-01 event in wire form.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub pubkey: String,
    pub created_at: i64,
    pub kind: u32,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

/// Canonical digest of the event fields per NIP-01.
fn canonical_digest(
    pubkey: &str,
    created_at: i64,
    kind: u32,
    tags: &[Vec<String>],
    content: &str,
) -> Result<[u8; 32], HelperError> {
    let canonical = serde_json::to_string(&(0u8, pubkey, created_at, kind, tags, content))?;
    Ok(Sha256::digest(canonical.as_bytes()).into())
}

impl Event {
    /// Build and sign an event with the given fields.
    pub fn signed(
        keys: &Keys,
        kind: u32,
        created_at: i64,
        tags: Vec<Vec<String>>,
        content: &str,
    ) -> Result<Event, HelperError> {
        let pubkey = keys.public_key_hex();
        let digest = canonical_digest(&pubkey, created_at, kind, &tags, content)?;
        let sig = keys.sign(digest);
        Ok(Event {
            id: hex::encode(digest),
            pubkey,
            created_at,
            kind,
            tags,
            content: content.to_string(),
            sig,
        })
    }

    /// The authorization event a Blossom server expects alongside an upload
    /// of the blob stored under `key`.
    pub fn upload_auth(keys: &Keys, key: &BlossomKey) -> Result<Event, HelperError> {
        let key_hex = key.to_string();
        Event::signed(
            keys,
            UPLOAD_AUTH_KIND,
            Utc::now().timestamp(),
            vec![
                vec!["t".to_string(), "upload".to_string()],
                vec!["x".to_string(), key_hex.clone()],
                vec![
                    "expiration".to_string(),
                    UPLOAD_AUTH_EXPIRATION.to_string(),
                ],
            ],
            &format!("Upload {key_hex}"),
        )
    }

    /// Check that the id matches the canonical digest and the signature
    /// matches the id under the event's own pubkey.
    pub fn verify(&self) -> Result<bool, HelperError> {
        let digest = canonical_digest(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )?;
        if hex::encode(digest) != self.id {
            return Ok(false);
        }
        keys::verify(digest, &self.sig, &self.pubkey)
    }

    /// Compact JSON wire form.
    pub fn as_json(&self) -> Result<String, HelperError> {
        Ok(serde_json::to_string(self)?)
    }
}
