//! Fetch pipeline: recursively download the closure of an object, verifying
//! every package against the id it claims to be and harvesting the Blossom
//! keys of its references from the package tail.
//!
//! Objects already present locally with their full history are skipped; an
//! object that exists but whose subgraph is incomplete (an interrupted
//! earlier fetch) re-enqueues its references. Dependencies are only
//! enqueued after a successful hash-verified decode, so a corrupted or
//! malicious blob stops the walk before anything downstream of it is
//! touched.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::blossom::BlossomClient;
use crate::codec::ParsedPackage;
use crate::errors::HelperError;
use crate::git::Git;
use crate::hash::ObjectId;
use crate::store::KeyStore;
use crate::transfer::progress::Progress;
use crate::transfer::push::flatten;
use crate::transfer::{BlossomKeyMap, Transfer};

/// How long one completion wait may take before the progress meter is
/// refreshed; purely cosmetic, nothing times out.
const WAIT_QUANTUM: Duration = Duration::from_secs(15);

struct FetchCtx {
    git: Git,
    store: KeyStore,
    blossom: BlossomClient,
    keys_map: BlossomKeyMap,
    semaphore: Semaphore,
}

impl Transfer {
    /// Download `root` and everything it transitively references. The
    /// `keys_map` must already hold the Blossom key of `root` (populated
    /// from the remote refs at `list` time); keys of deeper objects are
    /// discovered from the packages themselves.
    pub async fn fetch_objects(
        &self,
        root: ObjectId,
        keys_map: BlossomKeyMap,
    ) -> Result<(), HelperError> {
        let ctx = Arc::new(FetchCtx {
            git: self.git.clone(),
            store: self.store.clone(),
            blossom: self.blossom.clone(),
            keys_map,
            semaphore: Semaphore::new(self.concurrency),
        });

        let progress = Progress::new("Receiving objects", self.progress_enabled());
        let mut queue: VecDeque<ObjectId> = VecDeque::from([root]);
        let mut pending: HashSet<ObjectId> = HashSet::new();
        let mut downloaded: HashSet<ObjectId> = HashSet::new();
        let mut tasks: JoinSet<Result<(ObjectId, Vec<ObjectId>), HelperError>> = JoinSet::new();

        while !queue.is_empty() || !pending.is_empty() {
            if let Some(id) = queue.pop_front() {
                if downloaded.contains(&id) || pending.contains(&id) {
                    continue;
                }
                if self.git.object_exists(&id).await? {
                    if !self.git.history_exists(&id).await? {
                        // An earlier fetch stopped partway; walk through the
                        // object to whatever is still missing underneath.
                        for dep in self.git.referenced_objects(&id).await? {
                            queue.push_back(dep);
                        }
                    }
                } else {
                    tracing::debug!("GET {id}");
                    pending.insert(id);
                    let ctx = Arc::clone(&ctx);
                    tasks.spawn(async move { download_object(&ctx, id).await });
                }
                continue;
            }

            match tokio::time::timeout(WAIT_QUANTUM, tasks.join_next()).await {
                Err(_elapsed) => {
                    progress.update(downloaded.len(), downloaded.len() + pending.len());
                }
                Ok(None) => {
                    // Pending ids without tasks cannot happen; bail out
                    // rather than spin.
                    return Err(HelperError::Task(
                        "fetch bookkeeping lost track of a download".to_string(),
                    ));
                }
                Ok(Some(joined)) => match flatten(joined) {
                    Ok((id, deps)) => {
                        pending.remove(&id);
                        downloaded.insert(id);
                        for dep in deps {
                            queue.push_back(dep);
                        }
                        progress.update(downloaded.len(), downloaded.len() + pending.len());
                    }
                    Err(e) => {
                        tasks.abort_all();
                        while tasks.join_next().await.is_some() {}
                        return Err(e);
                    }
                },
            }
        }

        progress.finish(downloaded.len(), downloaded.len());
        Ok(())
    }
}

/// Download, inflate, verify and locally store one object; returns its
/// references for the driving loop to enqueue.
async fn download_object(
    ctx: &FetchCtx,
    id: ObjectId,
) -> Result<(ObjectId, Vec<ObjectId>), HelperError> {
    let _permit = ctx
        .semaphore
        .acquire()
        .await
        .map_err(|e| HelperError::Task(e.to_string()))?;

    let key = ctx
        .keys_map
        .get(&id)
        .map(|entry| *entry.value())
        .ok_or_else(|| HelperError::MissingKey(id.to_string()))?;

    let compressed = ctx.blossom.get(&key).await?;
    let data = crate::codec::decompress(&compressed)?;
    let package = ParsedPackage::parse(&data)?;

    let computed = ctx
        .git
        .decode_object_raw(package.obj_type, &package.body)
        .await?;
    if computed != id {
        return Err(HelperError::HashMismatch {
            expected: id.to_string(),
            computed: computed.to_string(),
        });
    }

    let deps = ctx.git.referenced_objects(&id).await?;
    let dep_keys = package.dependency_keys(deps.len())?;
    for (dep, dep_key) in deps.iter().zip(dep_keys) {
        ctx.keys_map.insert(*dep, dep_key);
    }

    // Remember where this object lives so a later push from this clone can
    // resolve it as a dependency without re-uploading.
    ctx.store.write(&id, &key)?;

    Ok((id, deps))
}
