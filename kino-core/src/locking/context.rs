//! Read lock handles and the processes bound to them.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::LockError;
use super::manager::LockTable;

/// Upper bound on waiting for an attached process to exit after cancellation.
pub const PROCESS_EXIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to an encoder process owned by a lock context.
#[derive(Debug, Clone)]
pub struct AttachedProcess {
    pid: Option<u32>,
    exited: watch::Receiver<bool>,
}

impl AttachedProcess {
    /// Creates a handle. The supervisor of the process sends `true` on the
    /// paired sender once the process has been reaped.
    pub fn new(pid: Option<u32>, exited: watch::Receiver<bool>) -> Self {
        Self { pid, exited }
    }

    /// Returns the OS process id, if it was known at spawn time.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Returns true once the process has exited.
    pub fn has_exited(&self) -> bool {
        *self.exited.borrow()
    }

    /// Waits for the process to exit.
    ///
    /// A supervisor that disappears without reporting counts as exited.
    pub async fn wait_exited(&self) {
        let mut exited = self.exited.clone();
        let _ = exited.wait_for(|done| *done).await;
    }
}

pub(super) struct ContextInner {
    id: u64,
    path: PathBuf,
    token: CancellationToken,
    process: Mutex<Option<AttachedProcess>>,
    released: AtomicBool,
    table: Arc<LockTable>,
}

impl ContextInner {
    /// Removes the reader entry. Returns true only for the first call.
    fn release_entry(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.table.remove_reader(&self.path, self.id);
        true
    }

    fn attached(&self) -> Option<AttachedProcess> {
        self.process.lock().clone()
    }
}

/// A granted read lock on one file.
///
/// The context carries a cancellation token derived from the request that
/// acquired it. Cancelling the token (directly, through the request, through
/// [`LockManager::revoke`](super::LockManager::revoke) or by dropping the
/// context) kills the attached process and then removes the reader from the
/// lock table, so a waiting writer is only admitted once the process is gone
/// or the exit timeout has passed.
pub struct LockContext {
    inner: Arc<ContextInner>,
}

impl LockContext {
    pub(super) fn spawn(
        id: u64,
        path: PathBuf,
        token: CancellationToken,
        table: Arc<LockTable>,
    ) -> Self {
        let inner = Arc::new(ContextInner {
            id,
            path,
            token,
            process: Mutex::new(None),
            released: AtomicBool::new(false),
            table,
        });

        let watcher = Arc::clone(&inner);
        tokio::spawn(async move {
            watcher.token.cancelled().await;
            if let Some(process) = watcher.attached() {
                if tokio::time::timeout(PROCESS_EXIT_TIMEOUT, process.wait_exited())
                    .await
                    .is_err()
                {
                    warn!(
                        "Process {:?} for {} did not exit within {:?}",
                        process.pid(),
                        watcher.path.display(),
                        PROCESS_EXIT_TIMEOUT
                    );
                }
            }
            if watcher.release_entry() {
                debug!("Released read lock {} on {}", watcher.id, watcher.path.display());
            }
        });

        Self { inner }
    }

    /// Returns the locked path in canonical form.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Returns the token that governs this lock and its process.
    pub fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    /// Returns true once the lock has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Returns true once the reader entry has left the lock table.
    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::Acquire)
    }

    /// Binds a process to this context.
    ///
    /// # Errors
    ///
    /// - `LockError::ProcessAlreadyAttached` - a process is already bound
    /// - `LockError::Released` - the context was cancelled first
    pub fn attach_process(&self, process: AttachedProcess) -> Result<(), LockError> {
        let mut slot = self.inner.process.lock();
        if self.inner.token.is_cancelled() {
            return Err(LockError::Released {
                path: self.inner.path.clone(),
            });
        }
        if slot.is_some() {
            return Err(LockError::ProcessAlreadyAttached {
                path: self.inner.path.clone(),
            });
        }
        *slot = Some(process);
        Ok(())
    }

    /// Returns the attached process, if any.
    pub fn process(&self) -> Option<AttachedProcess> {
        self.inner.attached()
    }

    /// Cancels the lock. The attached process is killed and the reader entry
    /// is removed once it has exited.
    pub fn cancel(&self) {
        self.inner.token.cancel();
    }

    /// Cancels the lock and waits, at most [`PROCESS_EXIT_TIMEOUT`], for the
    /// attached process to exit.
    ///
    /// Returns false when the process was still running at the deadline.
    pub async fn cancel_and_wait(&self) -> bool {
        self.cancel();
        match self.inner.attached() {
            Some(process) => {
                tokio::time::timeout(PROCESS_EXIT_TIMEOUT, process.wait_exited())
                    .await
                    .is_ok()
            }
            None => true,
        }
    }
}

impl Drop for LockContext {
    fn drop(&mut self) {
        self.inner.token.cancel();
        // Without a process there is nothing to wait for.
        if self.inner.attached().is_none() {
            self.inner.release_entry();
        }
    }
}

impl fmt::Debug for LockContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockContext")
            .field("id", &self.inner.id)
            .field("path", &self.inner.path)
            .field("cancelled", &self.inner.token.is_cancelled())
            .field("released", &self.is_released())
            .finish()
    }
}
