//! Push pipeline: upload every missing object as a compressed package whose
//! tail embeds the Blossom keys of the objects it references.
//!
//! The object list arrives in `rev-list --objects` order (referrers first)
//! and is iterated in reverse, so dependencies are scheduled before the
//! objects that reference them. Every object gets a have-key signal before
//! any task is spawned; an uploader that needs a dependency's key either
//! finds it in the on-disk store (uploaded by an earlier push, or a remote
//! tip primed at `list` time) or waits for the signal of the in-flight
//! dependency. The signal fires as soon as the dependency's key is computed,
//! before its PUT completes; content addressing makes that safe, because a
//! failed PUT aborts the whole push before the ref is updated.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;

use crate::blossom::BlossomClient;
use crate::codec;
use crate::errors::HelperError;
use crate::git::Git;
use crate::hash::{BlossomKey, ObjectId};
use crate::nostr::keys::Keys;
use crate::store::KeyStore;
use crate::transfer::Transfer;
use crate::transfer::progress::Progress;

/// One-shot "the key of this object is known" signal.
///
/// The watch value is the signal state: `None` while the upload task has not
/// computed the key yet, `Some(key)` once it has.
#[derive(Clone)]
struct KeySignal {
    tx: watch::Sender<Option<BlossomKey>>,
}

impl KeySignal {
    fn new() -> KeySignal {
        let (tx, _rx) = watch::channel(None);
        KeySignal { tx }
    }

    fn set(&self, key: BlossomKey) {
        let _ = self.tx.send(Some(key));
    }

    async fn wait(&self) -> Option<BlossomKey> {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(key) = *rx.borrow_and_update() {
                return Some(key);
            }
            if rx.changed().await.is_err() {
                return *rx.borrow();
            }
        }
    }
}

struct PushCtx {
    git: Git,
    store: KeyStore,
    blossom: BlossomClient,
    keys: Keys,
    signals: DashMap<ObjectId, KeySignal>,
    semaphore: Semaphore,
}

impl Transfer {
    /// Upload `objects` (a `rev-list --objects` listing) to the Blossom
    /// server. On the first failure all in-flight uploads are aborted and
    /// the error is returned; keys already written to the store stay, they
    /// are content-addressed and harmless on retry.
    pub async fn push_objects(
        &self,
        keys: &Keys,
        objects: &[ObjectId],
    ) -> Result<(), HelperError> {
        let total = objects.len();
        if total == 0 {
            return Ok(());
        }

        let ctx = Arc::new(PushCtx {
            git: self.git.clone(),
            store: self.store.clone(),
            blossom: self.blossom.clone(),
            keys: keys.clone(),
            signals: DashMap::with_capacity(total),
            semaphore: Semaphore::new(self.concurrency),
        });
        // Install every signal before the first task runs, so no uploader
        // can look up a dependency signal that does not exist yet.
        for id in objects {
            ctx.signals.insert(*id, KeySignal::new());
        }

        let progress = Progress::new("Writing objects", self.progress_enabled());
        let mut tasks: JoinSet<Result<(), HelperError>> = JoinSet::new();
        let mut queue = objects.iter().rev().copied();
        let mut done = 0usize;

        loop {
            while tasks.len() < self.concurrency {
                let Some(id) = queue.next() else { break };
                tracing::debug!("scheduling upload of {id}");
                let ctx = Arc::clone(&ctx);
                tasks.spawn(async move { upload_object(&ctx, id).await });
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            match flatten(joined) {
                Ok(()) => {
                    done += 1;
                    progress.update(done, total);
                }
                Err(e) => {
                    tasks.abort_all();
                    while tasks.join_next().await.is_some() {}
                    return Err(e);
                }
            }
        }

        progress.finish(done, total);
        Ok(())
    }
}

async fn upload_object(ctx: &PushCtx, id: ObjectId) -> Result<(), HelperError> {
    let _permit = ctx
        .semaphore
        .acquire()
        .await
        .map_err(|e| HelperError::Task(e.to_string()))?;

    let mut data = ctx.git.encode_object(&id).await?;
    for dep in ctx.git.referenced_objects(&id).await? {
        let key = match ctx.store.read(&dep)? {
            Some(key) => key,
            None => {
                // Clone the signal out of the map so no shard lock is held
                // across the wait.
                let signal = ctx
                    .signals
                    .get(&dep)
                    .map(|entry| entry.value().clone())
                    .ok_or_else(|| HelperError::MissingKey(dep.to_string()))?;
                tracing::debug!("{id} waiting for key of {dep}");
                signal
                    .wait()
                    .await
                    .ok_or_else(|| HelperError::MissingKey(dep.to_string()))?
            }
        };
        data.extend_from_slice(key.as_bytes());
    }

    let data = codec::compress(&data)?;
    let key = BlossomKey::digest(&data);
    ctx.store.write(&id, &key)?;
    if let Some(signal) = ctx.signals.get(&id) {
        signal.set(key);
    }

    ctx.blossom.put(&ctx.keys, &key, data).await?;
    tracing::debug!("stored {id} as {key}");
    Ok(())
}

/// Collapse a JoinSet result: a panicked or aborted task is a task error.
pub(super) fn flatten<T>(
    joined: Result<Result<T, HelperError>, tokio::task::JoinError>,
) -> Result<T, HelperError> {
    match joined {
        Ok(result) => result,
        Err(e) => Err(HelperError::Task(e.to_string())),
    }
}
