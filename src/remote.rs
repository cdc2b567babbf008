//! In-memory view of the remote repository's state: the replaceable
//! kind-30618 event holding one `ref` tag per branch/tag tip and `symref`
//! tags for HEAD.
//!
//! The event is fetched lazily from the relay, mutated only here, and
//! republished whole after every ref update with a strictly increasing
//! `created_at`. Fast-forward checks run against the local repository;
//! their failures are ref-level outcomes reported back to git as
//! `error <dst> <msg>` lines, not process errors.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

use chrono::Utc;

use crate::errors::HelperError;
use crate::git::Git;
use crate::hash::{BlossomKey, ObjectId};
use crate::nostr::event::{Event, STATE_KIND};
use crate::nostr::keys::Keys;
use crate::nostr::relay::RelayTransport;
use crate::store::KeyStore;

/// Why a ref update was declined. Reported to git verbatim.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefRejection {
    FetchFirst,
    NonFastForward,
}

impl Display for RefRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RefRejection::FetchFirst => f.write_str("fetch first"),
            RefRejection::NonFastForward => f.write_str("non-fast-forward"),
        }
    }
}

/// The mutable core of the state event: its tags and timestamp. The id and
/// signature are recomputed at every publish.
#[derive(Clone, Debug)]
struct StateDoc {
    created_at: i64,
    tags: Vec<Vec<String>>,
}

impl StateDoc {
    fn empty(project: &str) -> StateDoc {
        StateDoc {
            created_at: 0,
            tags: vec![vec!["d".to_string(), project.to_string()]],
        }
    }
}

/// Client-side owner of the remote's ref state.
pub struct RemoteState {
    relay: Box<dyn RelayTransport>,
    owner_pubkey: String,
    project: String,
    keys: Option<Keys>,
    git: Git,
    store: KeyStore,
    state: Option<StateDoc>,
    fetched: bool,
}

impl RemoteState {
    pub fn new(
        relay: Box<dyn RelayTransport>,
        owner_pubkey: String,
        project: String,
        keys: Option<Keys>,
        git: Git,
        store: KeyStore,
    ) -> RemoteState {
        RemoteState {
            relay,
            owner_pubkey,
            project,
            keys,
            git,
            store,
            state: None,
            fetched: false,
        }
    }

    /// Require a configured secret key matching the remote URL's owner.
    pub fn assert_owner(&self) -> Result<&Keys, HelperError> {
        let keys = self.keys.as_ref().ok_or_else(|| {
            HelperError::Config(
                "pushing requires a secret key; set it via 'git config --global --add nostr.nsec <nsec1...>'"
                    .to_string(),
            )
        })?;
        if keys.public_key_hex() != self.owner_pubkey {
            return Err(HelperError::NotOwner);
        }
        Ok(keys)
    }

    async fn ensure_fetched(&mut self) -> Result<(), HelperError> {
        if self.fetched {
            return Ok(());
        }
        let event = self
            .relay
            .query_state(&self.owner_pubkey, &self.project)
            .await?;
        self.state = match event {
            None => {
                tracing::info!("no state event found for project {}", self.project);
                None
            }
            Some(event) => {
                if !event.verify()? {
                    return Err(HelperError::Relay(
                        "state event signature is invalid".to_string(),
                    ));
                }
                Some(StateDoc {
                    created_at: event.created_at,
                    tags: event.tags,
                })
            }
        };
        self.fetched = true;
        Ok(())
    }

    /// Load the remote refs. Returns `(first_push, refs)`: `first_push` is
    /// true when pushing to a remote that has no state event yet. Every ref's
    /// Blossom key is written through to the local key store so later pushes
    /// can resolve dependencies on remote tips from disk.
    pub async fn get_refs(
        &mut self,
        for_push: bool,
    ) -> Result<(bool, BTreeMap<String, (ObjectId, BlossomKey)>), HelperError> {
        self.ensure_fetched().await?;

        let Some(state) = &self.state else {
            return Ok((for_push, BTreeMap::new()));
        };

        let mut refs = BTreeMap::new();
        for tag in &state.tags {
            if let [name, short_ref, sha_hex, key_hex, ..] = tag.as_slice() {
                if name != "ref" {
                    continue;
                }
                let sha = ObjectId::from_str(sha_hex)?;
                let key = BlossomKey::from_hex(key_hex)?;
                self.store.write(&sha, &key)?;
                refs.insert(format!("refs/{short_ref}"), (sha, key));
            }
        }
        Ok((false, refs))
    }

    /// Current tip of `refname` on the remote, if present. As a side effect
    /// the tip's Blossom key is recorded in the key store.
    pub fn get_ref(&self, refname: &str) -> Result<Option<ObjectId>, HelperError> {
        let short = strip_refs_prefix(refname)?;
        let Some(state) = &self.state else {
            return Ok(None);
        };
        for tag in &state.tags {
            if let [name, tag_ref, sha_hex, key_hex, ..] = tag.as_slice() {
                if name == "ref" && tag_ref == short {
                    let sha = ObjectId::from_str(sha_hex)?;
                    self.store.write(&sha, &BlossomKey::from_hex(key_hex)?)?;
                    return Ok(Some(sha));
                }
            }
        }
        Ok(None)
    }

    /// Point `refname` at `sha`, whose Blossom key must already be in the
    /// key store (it is, after a successful upload).
    fn set_ref(&mut self, refname: &str, sha: &ObjectId) -> Result<(), HelperError> {
        let short = strip_refs_prefix(refname)?.to_string();
        let key = self
            .store
            .read(sha)?
            .ok_or_else(|| HelperError::MissingKey(sha.to_string()))?;

        let state = self
            .state
            .as_mut()
            .ok_or_else(|| HelperError::Relay("no state event to update".to_string()))?;
        for tag in &mut state.tags {
            if let [name, tag_ref, _, _, ..] = tag.as_slice() {
                if name == "ref" && *tag_ref == short {
                    tag[2] = sha.to_string();
                    tag[3] = key.to_string();
                    return Ok(());
                }
            }
        }
        state.tags.push(vec![
            "ref".to_string(),
            short,
            sha.to_string(),
            key.to_string(),
        ]);
        Ok(())
    }

    /// Add or replace a symref tag such as `HEAD -> refs/heads/main`.
    fn set_symref(&mut self, name: &str, target: &str) -> Result<(), HelperError> {
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| HelperError::Relay("no state event to update".to_string()))?;
        for tag in &mut state.tags {
            if let [tag_name, sym, _, ..] = tag.as_slice() {
                if tag_name == "symref" && sym == name {
                    tag[2] = format!("ref: {target}");
                    return Ok(());
                }
            }
        }
        state.tags.push(vec![
            "symref".to_string(),
            name.to_string(),
            format!("ref: {target}"),
        ]);
        Ok(())
    }

    /// Update `dst` to `new_sha` and republish the state event.
    ///
    /// Returns `Ok(Some(rejection))` when the update is declined at the ref
    /// level (old tip unknown locally, or not a fast-forward without
    /// `force`); the state event is left untouched in that case.
    pub async fn write_ref(
        &mut self,
        new_sha: &ObjectId,
        dst: &str,
        force: bool,
    ) -> Result<Option<RefRejection>, HelperError> {
        tracing::debug!("write_ref(new_sha={new_sha}, dst={dst}, force={force})");
        self.ensure_fetched().await?;
        if self.state.is_none() {
            self.state = Some(StateDoc::empty(&self.project));
        }

        if !force {
            if let Some(old_sha) = self.get_ref(dst)? {
                if !self.git.object_exists(&old_sha).await? {
                    return Ok(Some(RefRejection::FetchFirst));
                }
                if !self.git.is_ancestor(&old_sha, new_sha).await? {
                    return Ok(Some(RefRejection::NonFastForward));
                }
            }
        }

        self.set_ref(dst, new_sha)?;
        self.publish_state().await?;
        Ok(None)
    }

    /// Set a symbolic ref on the remote and republish the state event.
    pub async fn write_symbolic_ref(
        &mut self,
        name: &str,
        target: &str,
    ) -> Result<(), HelperError> {
        tracing::debug!("write_symbolic_ref({name}, {target})");
        self.ensure_fetched().await?;
        if self.state.is_none() {
            self.state = Some(StateDoc::empty(&self.project));
        }
        self.set_symref(name, target)?;
        self.publish_state().await
    }

    /// Target of a remote symbolic ref, e.g. `HEAD -> refs/heads/main`.
    pub async fn read_symbolic_ref(&mut self, name: &str) -> Result<Option<String>, HelperError> {
        self.ensure_fetched().await?;
        let Some(state) = &self.state else {
            return Ok(None);
        };
        for tag in &state.tags {
            if let [tag_name, sym, value, ..] = tag.as_slice() {
                if tag_name == "symref" && sym == name {
                    return Ok(value.strip_prefix("ref: ").map(str::to_string));
                }
            }
        }
        Ok(None)
    }

    async fn publish_state(&mut self) -> Result<(), HelperError> {
        let keys = self.assert_owner()?.clone();
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| HelperError::Relay("no state event to publish".to_string()))?;

        // A replacement must carry a strictly greater created_at, even when
        // two publishes land in the same second or the clock stepped back.
        let now = Utc::now().timestamp();
        let created_at = if now <= state.created_at {
            state.created_at + 1
        } else {
            now
        };

        let event = Event::signed(&keys, STATE_KIND, created_at, state.tags.clone(), "")?;
        tracing::debug!("publishing state event with {} tags", event.tags.len());
        self.relay.publish(&event).await?;
        state.created_at = created_at;
        Ok(())
    }
}

fn strip_refs_prefix(refname: &str) -> Result<&str, HelperError> {
    refname.strip_prefix("refs/").ok_or_else(|| {
        HelperError::Protocol(format!("ref name `{refname}` does not start with refs/"))
    })
}
