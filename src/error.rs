//! # Error types used by the dispatch layer and the pool.
//!
//! Recoverable failures surface as [`Error`]. Programming errors — a
//! `BlockingQueued` invocation aimed at the calling executor, which could
//! only ever deadlock — panic at the call site instead, in the same spirit
//! as an out-of-bounds index.

use std::io;

use thiserror::Error;

/// Errors produced by the runtime.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum Error {
    /// `disconnect` was called with neither a signal nor a receiver context.
    ///
    /// At least one side must be given; a fully wildcarded disconnect would
    /// tear down every connection in the process and is always a bug.
    #[error("disconnect needs a signal, a receiver context, or both")]
    InvalidDisconnect,

    /// The operating system refused to start an executor thread.
    #[error("failed to spawn executor thread '{name}'")]
    Spawn {
        /// The name the thread would have carried.
        name: String,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            Error::InvalidDisconnect => "invalid_disconnect",
            Error::Spawn { .. } => "executor_spawn_failed",
        }
    }
}
