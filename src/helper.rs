//! The git-remote-helper command loop.
//!
//! Git launches the helper and speaks the remote-helper line protocol over
//! its stdio: commands arrive on stdin, answers leave on stdout, everything
//! human-facing goes to stderr. This module parses the command grammar,
//! dispatches `list` to the remote state and `push`/`fetch` batches to the
//! transfer engine, and owns the session state that spans commands (the
//! remote refs snapshot, the in-memory key map, the first-push flag).

use std::collections::BTreeMap;
use std::io::Write;
use std::str::FromStr;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Stdin};

use crate::blossom::BlossomClient;
use crate::config::Settings;
use crate::errors::HelperError;
use crate::git::Git;
use crate::hash::{BlossomKey, HashKind, ObjectId};
use crate::nostr::relay::RelayTransport;
use crate::remote::RemoteState;
use crate::store::KeyStore;
use crate::transfer::{BlossomKeyMap, CONCURRENCY, Transfer};
use crate::utils::{Verbosity, trace};

/// One helper session, generic over its stdio so tests can drive it with
/// in-memory buffers.
pub struct Helper<R, W> {
    reader: R,
    out: W,
    settings: Settings,
    git: Git,
    store: KeyStore,
    remote: RemoteState,
    verbosity: Verbosity,
    refs: BTreeMap<String, (ObjectId, BlossomKey)>,
    blossom_keys: BlossomKeyMap,
    first_push: bool,
}

impl Helper<BufReader<Stdin>, std::io::Stdout> {
    /// Helper wired to the real stdio, as when launched by git.
    pub fn from_stdio(settings: Settings, git: Git, relay: Box<dyn RelayTransport>) -> Self {
        Helper::new(
            settings,
            git,
            relay,
            BufReader::new(tokio::io::stdin()),
            std::io::stdout(),
        )
    }
}

impl<R, W> Helper<R, W>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    pub fn new(
        settings: Settings,
        git: Git,
        relay: Box<dyn RelayTransport>,
        reader: R,
        out: W,
    ) -> Self {
        let store = KeyStore::new(&settings.git_dir);
        let remote = RemoteState::new(
            relay,
            settings.owner_pubkey.clone(),
            settings.url.project.clone(),
            settings.keys.clone(),
            git.clone(),
            store.clone(),
        );
        Helper {
            reader,
            out,
            settings,
            git,
            store,
            remote,
            verbosity: Verbosity::default(),
            refs: BTreeMap::new(),
            blossom_keys: Arc::new(DashMap::new()),
            first_push: false,
        }
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    /// Run the command loop until git closes the conversation.
    pub async fn run(&mut self) -> Result<(), HelperError> {
        loop {
            let Some(line) = self.read_command().await? else {
                break;
            };
            if !line.is_empty() {
                self.trace(&format!("< {line}"), Verbosity::Debug);
            }

            if line == "capabilities" {
                self.write("option");
                self.write("push");
                self.write("fetch");
                self.write("");
            } else if line.starts_with("option") {
                self.do_option(&line);
            } else if line.starts_with("list") {
                self.do_list(&line).await?;
            } else if line.starts_with("push") {
                self.do_push(&line).await?;
            } else if line.starts_with("fetch") {
                self.do_fetch(&line).await?;
            } else if line.is_empty() {
                break;
            } else {
                return Err(HelperError::Protocol(line));
            }
        }
        Ok(())
    }

    async fn read_command(&mut self) -> Result<Option<String>, HelperError> {
        let mut buf = String::new();
        let read = self.reader.read_line(&mut buf).await?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(buf.trim().to_string()))
    }

    /// Answer git on stdout.
    fn write(&mut self, message: &str) {
        self.trace(&format!("> {message}"), Verbosity::Debug);
        let _ = writeln!(self.out, "{message}");
        let _ = self.out.flush();
    }

    fn trace(&self, message: &str, level: Verbosity) {
        trace(self.verbosity, level, message);
    }

    fn do_option(&mut self, line: &str) {
        if let Some(value) = line.strip_prefix("option verbosity ") {
            match value.trim().parse::<u8>() {
                Ok(level) => {
                    self.verbosity = Verbosity::from_level(level);
                    self.write("ok");
                }
                Err(_) => self.write("unsupported"),
            }
        } else {
            self.write("unsupported");
        }
    }

    async fn do_list(&mut self, line: &str) -> Result<(), HelperError> {
        let for_push = line.contains("for-push");

        let (first_push, refs) = self.remote.get_refs(for_push).await?;
        self.refs = refs;
        if first_push {
            self.trace("First push to remote repository.", Verbosity::Info);
            self.first_push = true;
        } else if self.refs.is_empty() {
            self.trace("repository is empty", Verbosity::Info);
        }

        if self.settings.object_format == HashKind::Sha256 {
            self.write(":object-format sha256");
        }

        let listing: Vec<String> = self
            .refs
            .iter()
            .map(|(refname, (sha, _))| format!("{sha} {refname}"))
            .collect();
        for entry in listing {
            self.write(&entry);
        }

        if !for_push {
            match self.remote.read_symbolic_ref("HEAD").await? {
                Some(head) => {
                    self.trace(&format!("remote HEAD: {head}"), Verbosity::Debug);
                    self.write(&format!("@{head} HEAD"));
                }
                None => self.trace("no default branch on remote", Verbosity::Info),
            }
        }

        for (sha, key) in self.refs.values() {
            self.blossom_keys.insert(*sha, *key);
        }

        self.write("");
        Ok(())
    }

    async fn do_push(&mut self, first_line: &str) -> Result<(), HelperError> {
        let mut remote_head: Option<String> = None;
        let mut line = first_line.to_string();
        loop {
            let refspec = line
                .strip_prefix("push ")
                .ok_or_else(|| HelperError::Protocol(line.clone()))?;
            let (src, dst) = refspec
                .split_once(':')
                .ok_or_else(|| HelperError::Protocol(line.clone()))?;
            let (src, dst) = (src.to_string(), dst.to_string());

            if src.is_empty() {
                // Deleting remote refs is not part of this protocol.
                self.write(&format!("error {dst} ref deletion is not supported"));
            } else {
                let (force, src) = match src.strip_prefix('+') {
                    Some(stripped) => (true, stripped.to_string()),
                    None => (false, src),
                };
                self.push_one(&src, &dst, force).await?;
                if self.first_push {
                    let head = self.git.symbolic_ref("HEAD").await?;
                    if remote_head.is_none() || head.as_deref() == Some(src.as_str()) {
                        remote_head = Some(dst);
                    }
                }
            }

            let Some(next) = self.read_command().await? else {
                break;
            };
            if next.is_empty() {
                break;
            }
            self.trace(&format!("< {next}"), Verbosity::Debug);
            line = next;
        }

        if self.first_push {
            self.first_push = false;
            if let Some(head_dst) = remote_head {
                if let Err(e) = self.remote.write_symbolic_ref("HEAD", &head_dst).await {
                    self.trace(
                        &format!("failed to set default branch on remote: {e}"),
                        Verbosity::Info,
                    );
                }
            }
        }
        self.write("");
        Ok(())
    }

    async fn push_one(&mut self, src: &str, dst: &str, force: bool) -> Result<(), HelperError> {
        // Gate before any network traffic: only the identity named in the
        // remote URL may rewrite its state.
        let keys = self.remote.assert_owner()?.clone();

        if self.settings.object_format == HashKind::Sha256 {
            return Err(HelperError::Config(
                "pushing from a sha256 object-format repository is not supported".to_string(),
            ));
        }

        let present: Vec<ObjectId> = self.refs.values().map(|(sha, _)| *sha).collect();
        let objects = self.git.list_objects(src, &present).await?;
        self.trace(
            &format!("{} objects to push", objects.len()),
            Verbosity::Debug,
        );

        let transfer = self.transfer()?;
        transfer.push_objects(&keys, &objects).await?;

        let sha = self.git.ref_value(src).await?;
        self.trace(
            &format!("upload finished, {src} is {sha}"),
            Verbosity::Debug,
        );

        match self.remote.write_ref(&sha, dst, force).await? {
            None => {
                self.write(&format!("ok {dst}"));
                let key = self.require_key(&sha)?;
                self.refs.insert(dst.to_string(), (sha, key));
            }
            Some(rejection) => {
                self.write(&format!("error {dst} {rejection}"));
            }
        }
        Ok(())
    }

    fn require_key(&self, sha: &ObjectId) -> Result<BlossomKey, HelperError> {
        self.store
            .read(sha)?
            .ok_or_else(|| HelperError::MissingKey(sha.to_string()))
    }

    async fn do_fetch(&mut self, first_line: &str) -> Result<(), HelperError> {
        let mut line = first_line.to_string();
        loop {
            let mut parts = line.split_whitespace();
            let (Some("fetch"), Some(sha_hex)) = (parts.next(), parts.next()) else {
                return Err(HelperError::Protocol(line.clone()));
            };
            let sha = ObjectId::from_str(sha_hex)?;

            let transfer = self.transfer()?;
            transfer
                .fetch_objects(sha, Arc::clone(&self.blossom_keys))
                .await?;

            let Some(next) = self.read_command().await? else {
                break;
            };
            if next.is_empty() {
                break;
            }
            self.trace(&format!("< {next}"), Verbosity::Debug);
            line = next;
        }
        self.write("");
        Ok(())
    }

    fn transfer(&self) -> Result<Transfer, HelperError> {
        let server = self.settings.blossom.clone().ok_or_else(|| {
            HelperError::Config(
                "Blossom server must be set via 'git config --global --add nostr.blossom https://your.blossom.server'"
                    .to_string(),
            )
        })?;
        Ok(Transfer::new(
            self.git.clone(),
            self.store.clone(),
            BlossomClient::new(server),
            CONCURRENCY,
            self.verbosity,
        ))
    }
}
