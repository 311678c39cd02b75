//! Per-path cooperative locks for files that are being streamed.
//!
//! Readers (streams) share a path; a writer (a task that moves, rewrites or
//! deletes the file) needs the path to itself. Every granted read lock is a
//! `LockContext` whose cancellation token also governs the encoder process
//! attached to it, so releasing or revoking a lock always tears the process
//! down with it.

pub mod context;
pub mod manager;

use std::path::PathBuf;

pub use context::{AttachedProcess, LockContext};
pub use manager::{LockManager, LockSnapshot, WriteGuard};
use thiserror::Error;

/// Errors from lock acquisition and process attachment.
#[derive(Debug, Error)]
pub enum LockError {
    /// The governing request was cancelled before the lock was granted.
    #[error("lock request for {path} cancelled while waiting")]
    Cancelled {
        /// Path the caller was waiting for.
        path: PathBuf,
    },

    /// A process is already attached to this lock context.
    #[error("lock context for {path} already has a running process")]
    ProcessAlreadyAttached {
        /// Path the lock context guards.
        path: PathBuf,
    },

    /// The lock context was released before the process could be attached.
    #[error("lock context for {path} was already released")]
    Released {
        /// Path the lock context guarded.
        path: PathBuf,
    },
}
