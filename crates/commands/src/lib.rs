//! Warden commands – apply control-plane commands to Ingress objects.
//!
//! A [`Watcher`] polls a [`CommandSource`], orders the batch by creation time,
//! hands each command to the [`Router`] and sends the reports back in one go.

#![forbid(unsafe_code)]

pub mod guard;
pub mod handlers;
pub mod router;
pub mod source;
pub mod watcher;

pub use router::Router;
pub use source::{CommandSource, MemorySource, SpoolSource};
pub use watcher::{apply_batch, CycleOutcome, Watcher, DEFAULT_INTERVAL};
