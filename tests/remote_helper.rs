//! End-to-end helper sessions against a fake Blossom server and an
//! in-memory relay: first push, fast-forward and forced updates, clone
//! round-trips, and integrity failures.

mod common;

use std::path::Path;

use common::{
    FakeBlossom, MemoryRelay, TestRepo, commit_file, git_in, git_out, ref_tag, settings_for,
};
use git_remote_blossom::codec::{ObjectType, ParsedPackage, decompress};
use git_remote_blossom::config::Settings;
use git_remote_blossom::errors::HelperError;
use git_remote_blossom::git::Git;
use git_remote_blossom::hash::BlossomKey;
use git_remote_blossom::helper::Helper;

/// Drive one helper session with scripted stdin, returning the outcome and
/// everything written to stdout.
async fn run_session(
    settings: Settings,
    repo: &Path,
    relay: &MemoryRelay,
    input: &str,
) -> (Result<(), HelperError>, String) {
    let git = Git::new_in(repo);
    let mut out: Vec<u8> = Vec::new();
    let result = {
        let mut helper = Helper::new(
            settings,
            git,
            Box::new(relay.clone()),
            input.as_bytes(),
            &mut out,
        );
        helper.run().await
    };
    (result, String::from_utf8(out).unwrap())
}

const PUSH_MAIN: &str = "capabilities\nlist for-push\npush refs/heads/main:refs/heads/main\n\n";

/// First push to an empty remote: the state event appears with the project
/// tag, the ref, and a HEAD symref; the server holds the full closure, each
/// blob stored under the SHA-256 of its own bytes.
#[tokio::test(flavor = "multi_thread")]
async fn first_push_creates_state_and_uploads_closure() {
    let server = FakeBlossom::start().await;
    let relay = MemoryRelay::default();
    let repo = TestRepo::new();
    commit_file(&repo.path(), "hello.txt", "hello\n", "initial");

    let settings = settings_for(&repo.path(), "myproj", Some("1"), "1", &server.base_url);
    let (result, out) = run_session(settings, &repo.path(), &relay, PUSH_MAIN).await;
    result.unwrap();

    assert!(out.contains("option\npush\nfetch\n"), "capabilities:\n{out}");
    assert!(out.contains("ok refs/heads/main\n"), "push result:\n{out}");

    let event = relay.current().expect("state event published");
    assert_eq!(event.kind, 30618);
    assert!(event.verify().unwrap());
    assert!(
        event
            .tags
            .contains(&vec!["d".to_string(), "myproj".to_string()])
    );
    assert!(event.tags.contains(&vec![
        "symref".to_string(),
        "HEAD".to_string(),
        "ref: refs/heads/main".to_string(),
    ]));

    let head = git_out(&repo.path(), &["rev-parse", "refs/heads/main"]);
    let (sha, key) = ref_tag(&event, "heads/main").expect("ref tag for main");
    assert_eq!(sha, head);

    // Commit, tree and blob were all stored.
    assert_eq!(server.blob_count(), 3);

    // Walk the closure from the tip: every package decodes, addresses
    // itself correctly, and links to the next layer.
    let commit_bytes = server.blob(&key).expect("tip package stored");
    assert_eq!(BlossomKey::digest(&commit_bytes).to_string(), key);
    let commit = ParsedPackage::parse(&decompress(&commit_bytes).unwrap()).unwrap();
    assert_eq!(commit.obj_type, ObjectType::Commit);
    let tree_key = commit.dependency_keys(1).unwrap()[0];

    let tree_bytes = server.blob(&tree_key.to_string()).expect("tree stored");
    let tree = ParsedPackage::parse(&decompress(&tree_bytes).unwrap()).unwrap();
    assert_eq!(tree.obj_type, ObjectType::Tree);
    let blob_key = tree.dependency_keys(1).unwrap()[0];

    let blob_bytes = server.blob(&blob_key.to_string()).expect("blob stored");
    let blob = ParsedPackage::parse(&decompress(&blob_bytes).unwrap()).unwrap();
    assert_eq!(blob.obj_type, ObjectType::Blob);
    assert_eq!(blob.body, b"hello\n");
    assert!(blob.dependency_keys(0).unwrap().is_empty());
}

/// A fast-forward push republishes the state with a strictly newer
/// timestamp and only uploads the new objects.
#[tokio::test(flavor = "multi_thread")]
async fn fast_forward_push_replaces_state() {
    let server = FakeBlossom::start().await;
    let relay = MemoryRelay::default();
    let repo = TestRepo::new();
    commit_file(&repo.path(), "hello.txt", "hello\n", "initial");

    let settings = settings_for(&repo.path(), "myproj", Some("1"), "1", &server.base_url);
    let (result, _) = run_session(settings.clone(), &repo.path(), &relay, PUSH_MAIN).await;
    result.unwrap();
    let first_event = relay.current().unwrap();
    assert_eq!(server.blob_count(), 3);

    commit_file(&repo.path(), "hello.txt", "hello again\n", "second");
    let (result, out) = run_session(settings, &repo.path(), &relay, PUSH_MAIN).await;
    result.unwrap();
    assert!(out.contains("ok refs/heads/main\n"), "push result:\n{out}");

    let second_event = relay.current().unwrap();
    assert!(second_event.created_at > first_event.created_at);

    let head = git_out(&repo.path(), &["rev-parse", "refs/heads/main"]);
    let (sha, _) = ref_tag(&second_event, "heads/main").unwrap();
    assert_eq!(sha, head);

    // New commit, new tree, new blob; the first three are still there.
    assert_eq!(server.blob_count(), 6);
}

/// A divergent tip is declined without force and the state event stays
/// untouched, even though its objects were already uploaded; with force the
/// same refspec replaces the remote tip.
#[tokio::test(flavor = "multi_thread")]
async fn non_fast_forward_rejected_then_forced() {
    let server = FakeBlossom::start().await;
    let relay = MemoryRelay::default();
    let repo = TestRepo::new();
    commit_file(&repo.path(), "hello.txt", "hello\n", "initial");
    let base = git_out(&repo.path(), &["rev-parse", "HEAD"]);
    commit_file(&repo.path(), "hello.txt", "hello again\n", "second");

    let settings = settings_for(&repo.path(), "myproj", Some("1"), "1", &server.base_url);
    let (result, _) = run_session(settings.clone(), &repo.path(), &relay, PUSH_MAIN).await;
    result.unwrap();
    let published = relay.current().unwrap();

    // A sibling branch off the first commit does not descend from the
    // remote tip.
    git_in(&repo.path(), &["checkout", "-q", "-b", "alt", &base]);
    commit_file(&repo.path(), "hello.txt", "diverged\n", "alt");

    let (result, out) = run_session(
        settings.clone(),
        &repo.path(),
        &relay,
        "list for-push\npush refs/heads/alt:refs/heads/main\n\n",
    )
    .await;
    result.unwrap();
    assert!(
        out.contains("error refs/heads/main non-fast-forward\n"),
        "push result:\n{out}"
    );
    let after = relay.current().unwrap();
    assert_eq!(after.created_at, published.created_at);
    assert_eq!(after.id, published.id);

    let (result, out) = run_session(
        settings,
        &repo.path(),
        &relay,
        "list for-push\npush +refs/heads/alt:refs/heads/main\n\n",
    )
    .await;
    result.unwrap();
    assert!(out.contains("ok refs/heads/main\n"), "push result:\n{out}");

    let forced = relay.current().unwrap();
    assert!(forced.created_at > published.created_at);
    let alt_tip = git_out(&repo.path(), &["rev-parse", "refs/heads/alt"]);
    let (sha, _) = ref_tag(&forced, "heads/main").unwrap();
    assert_eq!(sha, alt_tip);
}

/// Clone round-trip: list then fetch in an empty repository reconstructs
/// the exact objects, verified by git itself.
#[tokio::test(flavor = "multi_thread")]
async fn clone_round_trip() {
    let server = FakeBlossom::start().await;
    let relay = MemoryRelay::default();
    let source = TestRepo::new();
    commit_file(&source.path(), "hello.txt", "hello\n", "initial");
    commit_file(&source.path(), "world.txt", "world\n", "second");

    let settings = settings_for(&source.path(), "myproj", Some("1"), "1", &server.base_url);
    let (result, _) = run_session(settings, &source.path(), &relay, PUSH_MAIN).await;
    result.unwrap();

    let event = relay.current().unwrap();
    let (tip, _) = ref_tag(&event, "heads/main").unwrap();

    let clone = TestRepo::new();
    let settings = settings_for(&clone.path(), "myproj", None, "1", &server.base_url);
    let script = format!("capabilities\nlist\nfetch {tip} refs/heads/main\n\n");
    let (result, out) = run_session(settings, &clone.path(), &relay, &script).await;
    result.unwrap();

    assert!(
        out.contains(&format!("{tip} refs/heads/main\n")),
        "list output:\n{out}"
    );
    assert!(
        out.contains("@refs/heads/main HEAD\n"),
        "HEAD symref:\n{out}"
    );

    // The full subgraph is present and byte-identical.
    assert_eq!(
        git_out(&clone.path(), &["cat-file", "-t", &tip]),
        "commit"
    );
    git_in(&clone.path(), &["rev-list", "--objects", &tip]);
    assert_eq!(
        git_out(&clone.path(), &["show", &format!("{tip}:hello.txt")]),
        "hello"
    );
    assert_eq!(
        git_out(&clone.path(), &["show", &format!("{tip}:world.txt")]),
        "world"
    );
    assert_eq!(
        git_out(&source.path(), &["rev-parse", "HEAD^{tree}"]),
        git_out(&clone.path(), &["rev-parse", &format!("{tip}^{{tree}}")]),
    );
}

/// A server returning bytes that decode to a different object id stops the
/// fetch with a hash mismatch.
#[tokio::test(flavor = "multi_thread")]
async fn integrity_failure_aborts_fetch() {
    let server = FakeBlossom::start().await;
    let relay = MemoryRelay::default();
    let source = TestRepo::new();
    commit_file(&source.path(), "hello.txt", "hello\n", "initial");

    let settings = settings_for(&source.path(), "myproj", Some("1"), "1", &server.base_url);
    let (result, _) = run_session(settings, &source.path(), &relay, PUSH_MAIN).await;
    result.unwrap();

    let event = relay.current().unwrap();
    let (tip, key) = ref_tag(&event, "heads/main").unwrap();

    // Swap the tip package for one that inflates and parses cleanly but
    // decodes to some other object.
    let bogus = git_remote_blossom::codec::compress(&git_remote_blossom::codec::with_header(
        ObjectType::Blob,
        b"imposter",
    ))
    .unwrap();
    server.tamper(&key, bogus);

    let clone = TestRepo::new();
    let settings = settings_for(&clone.path(), "myproj", None, "1", &server.base_url);
    let script = format!("list\nfetch {tip} refs/heads/main\n\n");
    let (result, _) = run_session(settings, &clone.path(), &relay, &script).await;
    match result {
        Err(HelperError::HashMismatch { expected, .. }) => assert_eq!(expected, tip),
        other => panic!("expected hash mismatch, got {other:?}"),
    }
}

/// Pushing with a key that is not the owner's aborts before anything is
/// uploaded.
#[tokio::test(flavor = "multi_thread")]
async fn foreign_key_cannot_push() {
    let server = FakeBlossom::start().await;
    let relay = MemoryRelay::default();
    let repo = TestRepo::new();
    commit_file(&repo.path(), "hello.txt", "hello\n", "initial");

    // Secret key 2, but the remote URL belongs to the key-1 identity.
    let settings = settings_for(&repo.path(), "myproj", Some("2"), "1", &server.base_url);
    let (result, _) = run_session(settings, &repo.path(), &relay, PUSH_MAIN).await;
    assert!(matches!(result, Err(HelperError::NotOwner)));
    assert_eq!(server.put_count(), 0);
    assert!(relay.current().is_none());
}

/// Re-pushing identical content produces identical packages: the server
/// sees uploads but stores nothing new.
#[tokio::test(flavor = "multi_thread")]
async fn re_push_is_idempotent() {
    let server = FakeBlossom::start().await;
    let repo = TestRepo::new();
    commit_file(&repo.path(), "hello.txt", "hello\n", "initial");

    let relay_one = MemoryRelay::default();
    let settings = settings_for(&repo.path(), "proj-one", Some("1"), "1", &server.base_url);
    let (result, _) = run_session(settings, &repo.path(), &relay_one, PUSH_MAIN).await;
    result.unwrap();
    let stored = server.blob_count();
    let uploads = server.put_count();

    // Same objects pushed under another project land on the same keys.
    let relay_two = MemoryRelay::default();
    let settings = settings_for(&repo.path(), "proj-two", Some("1"), "1", &server.base_url);
    let (result, _) = run_session(settings, &repo.path(), &relay_two, PUSH_MAIN).await;
    result.unwrap();

    assert!(server.put_count() > uploads);
    assert_eq!(server.blob_count(), stored);
}

/// Deleting a remote ref is answered with a protocol-level error instead of
/// killing the session.
#[tokio::test(flavor = "multi_thread")]
async fn ref_deletion_is_refused() {
    let server = FakeBlossom::start().await;
    let relay = MemoryRelay::default();
    let repo = TestRepo::new();
    commit_file(&repo.path(), "hello.txt", "hello\n", "initial");

    let settings = settings_for(&repo.path(), "myproj", Some("1"), "1", &server.base_url);
    let (result, out) = run_session(
        settings,
        &repo.path(),
        &relay,
        "list for-push\npush :refs/heads/main\n\n",
    )
    .await;
    result.unwrap();
    assert!(
        out.contains("error refs/heads/main ref deletion is not supported\n"),
        "push result:\n{out}"
    );
}
