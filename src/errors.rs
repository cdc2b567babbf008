//! Error types for the git-remote-blossom crate.
//!
//! This module defines a unified error enumeration used across the git
//! adapter, the object package codec, the Blossom and relay clients, the
//! remote ref state, and the helper loop. It integrates with `thiserror` to
//! provide rich `Display` implementations and error source chaining where
//! applicable.
//!
//! Ref-level push outcomes ("fetch first", "non-fast-forward") are not errors
//! of the process: they are reported back to git as `error <dst> <msg>` lines
//! and therefore live in [`crate::remote::RefRejection`], not here.

use thiserror::Error;

#[derive(Error, Debug)]
/// Unified error enumeration for the remote helper.
///
/// Every variant is fatal to the command that raised it; the helper loop
/// cancels sibling transfer tasks and exits nonzero.
pub enum HelperError {
    /// Missing or malformed configuration (relay, blossom URL, remote URL,
    /// key encoding, object format).
    #[error("{0}")]
    Config(String),

    /// A push was attempted with a secret key that does not belong to the
    /// repository owner named in the remote URL.
    #[error("only the repository owner can push")]
    NotOwner,

    /// The relay could not be reached, or misbehaved during query/publish.
    #[error("relay error: {0}")]
    Relay(String),

    /// The Blossom server answered with a non-success status.
    #[error("blossom server returned {status}: {body}")]
    Blossom { status: u16, body: String },

    /// HTTP transport failure talking to the Blossom server.
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// A downloaded object decoded to a different id than requested.
    #[error("hash mismatch {computed} != {expected}")]
    HashMismatch { expected: String, computed: String },

    /// Bytes were left over after consuming all dependency keys of a
    /// downloaded package.
    #[error("{0} trailing bytes left after reading dependency keys")]
    TrailingKeys(usize),

    /// Malformed object package (bad header, truncated body, bad zlib).
    #[error("malformed object package: {0}")]
    Package(String),

    /// Invalid or unsupported git object type name.
    #[error("the `{0}` is not a valid git object type")]
    InvalidObjectType(String),

    /// Invalid object id text (wrong length or non-hex characters).
    #[error("the `{0}` is not a valid object id")]
    InvalidObjectId(String),

    /// No Blossom key is known for an object that a transfer needs.
    #[error("missing blossom key for {0}")]
    MissingKey(String),

    /// Unknown command received from the host git process.
    #[error("unsupported operation: {0}")]
    Protocol(String),

    /// A `git` child process failed.
    #[error("git: {0}")]
    Git(String),

    /// Invalid key material (nsec/npub decoding, secret key bytes).
    #[error("invalid key material: {0}")]
    Key(String),

    /// A spawned transfer task panicked or was torn down unexpectedly.
    #[error("transfer task failed: {0}")]
    Task(String),

    /// JSON encode/decode failure on the Nostr wire.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error from the underlying reader or writer.
    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),
}
