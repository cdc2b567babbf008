//! Nostr plumbing for the remote helper: key handling, NIP-01 events
//! (signing and the kinds this helper speaks), and the relay client used as
//! the ref-state oracle.

pub mod event;
pub mod keys;
pub mod relay;
