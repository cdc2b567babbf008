//! Shared fixtures for the end-to-end helper tests: a fake in-process
//! Blossom server, an in-memory relay, and scratch git repositories.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use sha2::{Digest, Sha256};

use git_remote_blossom::config::{RemoteUrl, Settings};
use git_remote_blossom::errors::HelperError;
use git_remote_blossom::hash::HashKind;
use git_remote_blossom::nostr::event::Event;
use git_remote_blossom::nostr::keys::Keys;
use git_remote_blossom::nostr::relay::RelayTransport;

/// Relay holding at most one state event in memory.
#[derive(Clone, Default)]
pub struct MemoryRelay {
    pub event: Arc<Mutex<Option<Event>>>,
}

impl MemoryRelay {
    pub fn current(&self) -> Option<Event> {
        self.event.lock().unwrap().clone()
    }
}

#[async_trait]
impl RelayTransport for MemoryRelay {
    async fn query_state(
        &self,
        author_pubkey: &str,
        project: &str,
    ) -> Result<Option<Event>, HelperError> {
        let held = self.event.lock().unwrap().clone();
        Ok(held.filter(|event| {
            event.pubkey == author_pubkey
                && event.tags.iter().any(|tag| {
                    tag.first().map(String::as_str) == Some("d")
                        && tag.get(1).map(String::as_str) == Some(project)
                })
        }))
    }

    async fn publish(&self, event: &Event) -> Result<(), HelperError> {
        *self.event.lock().unwrap() = Some(event.clone());
        Ok(())
    }
}

type BlobMap = Arc<Mutex<HashMap<String, Vec<u8>>>>;

#[derive(Clone)]
struct BlossomState {
    blobs: BlobMap,
    puts: Arc<AtomicUsize>,
}

/// Minimal Blossom server: PUT /upload stores the body under its SHA-256,
/// GET /<hash> serves it back.
pub struct FakeBlossom {
    pub base_url: String,
    blobs: BlobMap,
    puts: Arc<AtomicUsize>,
}

impl FakeBlossom {
    pub async fn start() -> FakeBlossom {
        let state = BlossomState {
            blobs: Arc::new(Mutex::new(HashMap::new())),
            puts: Arc::new(AtomicUsize::new(0)),
        };
        let app = Router::new()
            .route("/upload", put(upload_blob))
            .route("/{hash}", get(get_blob))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake blossom server");
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("fake blossom server");
        });

        FakeBlossom {
            base_url: format!("http://{addr}"),
            blobs: state.blobs,
            puts: state.puts,
        }
    }

    pub fn blob_count(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn blob(&self, key_hex: &str) -> Option<Vec<u8>> {
        self.blobs.lock().unwrap().get(key_hex).cloned()
    }

    /// Replace the bytes stored under `key_hex` without rehashing, as a
    /// malicious or corrupted server would.
    pub fn tamper(&self, key_hex: &str, bytes: Vec<u8>) {
        self.blobs
            .lock()
            .unwrap()
            .insert(key_hex.to_string(), bytes);
    }
}

async fn upload_blob(State(state): State<BlossomState>, body: Bytes) -> StatusCode {
    state.puts.fetch_add(1, Ordering::SeqCst);
    let hash = hex::encode(Sha256::digest(&body));
    state.blobs.lock().unwrap().insert(hash, body.to_vec());
    StatusCode::OK
}

async fn get_blob(
    State(state): State<BlossomState>,
    UrlPath(hash): UrlPath<String>,
) -> (StatusCode, Vec<u8>) {
    match state.blobs.lock().unwrap().get(&hash) {
        Some(bytes) => (StatusCode::OK, bytes.clone()),
        None => (StatusCode::NOT_FOUND, Vec::new()),
    }
}

/// Run git in `dir`, asserting success.
pub fn git_in(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .status()
        .expect("git binary available");
    assert!(status.success(), "git {args:?} in {}", dir.display());
}

/// Run git in `dir` and capture trimmed stdout.
pub fn git_out(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git binary available");
    assert!(out.status.success(), "git {args:?} in {}", dir.display());
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

/// Initialize an empty repository with an identity configured.
pub fn init_repo(dir: &Path) {
    git_in(dir, &["init", "-q", "-b", "main"]);
    git_in(dir, &["config", "user.name", "tester"]);
    git_in(dir, &["config", "user.email", "tester@example.invalid"]);
}

/// Write `content` to `name` and commit it.
pub fn commit_file(dir: &Path, name: &str, content: &str, message: &str) {
    std::fs::write(dir.join(name), content).unwrap();
    git_in(dir, &["add", name]);
    git_in(dir, &["commit", "-q", "-m", message]);
}

/// Settings for a helper session against the fake backplane.
pub fn settings_for(
    repo: &Path,
    project: &str,
    secret: Option<&str>,
    owner_secret: &str,
    blossom_url: &str,
) -> Settings {
    let owner = Keys::parse(owner_secret).unwrap();
    Settings {
        remote_name: "origin".to_string(),
        url: RemoteUrl {
            scheme: "blossom".to_string(),
            npub: "npub1testfixture".to_string(),
            project: project.to_string(),
        },
        owner_pubkey: owner.public_key_hex(),
        keys: secret.map(|s| Keys::parse(s).unwrap()),
        relay: "memory://".to_string(),
        blossom: Some(blossom_url.to_string()),
        object_format: HashKind::Sha1,
        git_dir: repo.join(".git"),
    }
}

/// Extract `(sha, blossom_key)` of a ref tag from the state event.
pub fn ref_tag(event: &Event, short_ref: &str) -> Option<(String, String)> {
    event.tags.iter().find_map(|tag| match tag.as_slice() {
        [name, tag_ref, sha, key, ..] if name == "ref" && tag_ref == short_ref => {
            Some((sha.clone(), key.clone()))
        }
        _ => None,
    })
}

/// Convenience holder so tests do not repeat the tempdir plumbing.
pub struct TestRepo {
    pub dir: tempfile::TempDir,
}

impl TestRepo {
    pub fn new() -> TestRepo {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        TestRepo { dir }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }
}
