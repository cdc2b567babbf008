//! Bounded-concurrency object transfer between the local repository and a
//! Blossom server.
//!
//! Push walks the object list in reverse dependency order, uploading each
//! object as a compressed package that embeds the Blossom keys of its
//! references; cross-task ordering is enforced by per-object have-key
//! signals, not by upload completion. Fetch walks the graph in the other
//! direction, discovering each object's dependency keys from the package it
//! just verified. Both pipelines cap concurrent Blossom operations with a
//! semaphore, keep at most that many tasks outstanding, abort every sibling
//! task on the first failure, and render git-style progress on stderr.

mod fetch;
mod progress;
mod push;

use std::sync::Arc;

use dashmap::DashMap;

use crate::blossom::BlossomClient;
use crate::git::Git;
use crate::hash::{BlossomKey, ObjectId};
use crate::store::KeyStore;
use crate::utils::Verbosity;

/// Concurrent Blossom operations per pipeline.
pub const CONCURRENCY: usize = 8;

/// Shared map from object id to the Blossom key it is stored under,
/// populated from the remote refs at `list` time and extended as fetched
/// packages reveal the keys of their dependencies.
pub type BlossomKeyMap = Arc<DashMap<ObjectId, BlossomKey>>;

/// One push/fetch engine bound to a repository and a Blossom server.
pub struct Transfer {
    git: Git,
    store: KeyStore,
    blossom: BlossomClient,
    concurrency: usize,
    verbosity: Verbosity,
}

impl Transfer {
    pub fn new(
        git: Git,
        store: KeyStore,
        blossom: BlossomClient,
        concurrency: usize,
        verbosity: Verbosity,
    ) -> Transfer {
        Transfer {
            git,
            store,
            blossom,
            concurrency,
            verbosity,
        }
    }

    fn progress_enabled(&self) -> bool {
        self.verbosity >= Verbosity::Info
    }
}
