//! Lock table keyed by canonical file path.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::LockError;
use super::context::LockContext;

#[derive(Default)]
struct LockEntry {
    readers: HashMap<u64, CancellationToken>,
    writer: bool,
    waiting_writers: usize,
    changed: Arc<Notify>,
}

impl LockEntry {
    fn is_idle(&self) -> bool {
        self.readers.is_empty() && !self.writer && self.waiting_writers == 0
    }

    fn admits_reader(&self) -> bool {
        !self.writer && self.waiting_writers == 0
    }

    fn admits_writer(&self) -> bool {
        !self.writer && self.readers.is_empty()
    }
}

/// Shared state behind every manager clone and context.
#[derive(Default)]
pub(crate) struct LockTable {
    entries: Mutex<HashMap<PathBuf, LockEntry>>,
    next_id: AtomicU64,
}

impl LockTable {
    /// Runs `update` on the entry for `path`, wakes its waiters and drops the
    /// entry once nobody holds or waits for it.
    fn update<F>(&self, path: &Path, update: F)
    where
        F: FnOnce(&mut LockEntry),
    {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(path) {
            update(entry);
            entry.changed.notify_waiters();
            if entry.is_idle() {
                entries.remove(path);
            }
        }
    }

    pub(crate) fn remove_reader(&self, path: &Path, id: u64) {
        self.update(path, |entry| {
            entry.readers.remove(&id);
        });
    }
}

/// Point-in-time view of one locked path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockSnapshot {
    /// Canonical path
    pub path: PathBuf,
    /// Active read locks
    pub readers: usize,
    /// Whether a writer currently holds the path
    pub writer: bool,
    /// Writers queued behind the readers
    pub waiting_writers: usize,
}

/// Registry of read and write locks on media files.
///
/// Cloning is cheap; clones share the same table.
#[derive(Clone, Default)]
pub struct LockManager {
    table: Arc<LockTable>,
}

impl LockManager {
    /// Creates an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires a read lock on `path`, deriving its token from `parent`.
    ///
    /// Any number of readers may share a path. A reader waits while a writer
    /// holds or is queued for the path, so writers cannot starve.
    ///
    /// # Errors
    ///
    /// - `LockError::Cancelled` - `parent` was cancelled before the lock was granted
    pub async fn acquire_read(
        &self,
        parent: &CancellationToken,
        path: impl AsRef<Path>,
    ) -> Result<LockContext, LockError> {
        let key = canonical_key(path.as_ref());

        loop {
            if parent.is_cancelled() {
                return Err(LockError::Cancelled { path: key });
            }

            let notify;
            let notified;
            {
                let mut entries = self.table.entries.lock();
                let entry = entries.entry(key.clone()).or_default();
                if entry.admits_reader() {
                    let id = self.table.next_id.fetch_add(1, Ordering::Relaxed);
                    let token = parent.child_token();
                    entry.readers.insert(id, token.clone());
                    drop(entries);

                    debug!("Granted read lock {} on {}", id, key.display());
                    return Ok(LockContext::spawn(
                        id,
                        key,
                        token,
                        Arc::clone(&self.table),
                    ));
                }
                notify = Arc::clone(&entry.changed);
                notified = notify.notified();
            }

            debug!("Read lock on {} waiting for writer", key.display());
            tokio::select! {
                _ = notified => {}
                _ = parent.cancelled() => {
                    return Err(LockError::Cancelled { path: key });
                }
            }
        }
    }

    /// Acquires exclusive access to `path`.
    ///
    /// Waits until every reader has released. New readers queue behind the
    /// writer from the moment this call starts waiting.
    ///
    /// # Errors
    ///
    /// - `LockError::Cancelled` - `parent` was cancelled before the lock was granted
    pub async fn acquire_write(
        &self,
        parent: &CancellationToken,
        path: impl AsRef<Path>,
    ) -> Result<WriteGuard, LockError> {
        let key = canonical_key(path.as_ref());
        if parent.is_cancelled() {
            return Err(LockError::Cancelled { path: key });
        }

        self.table
            .entries
            .lock()
            .entry(key.clone())
            .or_default()
            .waiting_writers += 1;
        let mut pending = PendingWriter {
            table: Arc::clone(&self.table),
            path: key.clone(),
            armed: true,
        };

        loop {
            if parent.is_cancelled() {
                return Err(LockError::Cancelled { path: key });
            }

            let notify;
            let notified;
            {
                let mut entries = self.table.entries.lock();
                let entry = entries.entry(key.clone()).or_default();
                if entry.admits_writer() {
                    entry.waiting_writers = entry.waiting_writers.saturating_sub(1);
                    entry.writer = true;
                    pending.armed = false;
                    drop(entries);

                    info!("Granted write lock on {}", key.display());
                    return Ok(WriteGuard {
                        table: Arc::clone(&self.table),
                        path: key,
                    });
                }
                notify = Arc::clone(&entry.changed);
                notified = notify.notified();
            }

            tokio::select! {
                _ = notified => {}
                _ = parent.cancelled() => {
                    return Err(LockError::Cancelled { path: key });
                }
            }
        }
    }

    /// Cancels every read lock on `path`, killing their processes.
    ///
    /// Returns the number of readers that were cancelled. Their entries leave
    /// the table as their processes exit.
    pub fn revoke(&self, path: impl AsRef<Path>) -> usize {
        let key = canonical_key(path.as_ref());
        let entries = self.table.entries.lock();
        let Some(entry) = entries.get(&key) else {
            return 0;
        };

        for token in entry.readers.values() {
            token.cancel();
        }
        let revoked = entry.readers.len();
        if revoked > 0 {
            info!("Revoked {} read lock(s) on {}", revoked, key.display());
        }
        revoked
    }

    /// Returns the number of read locks currently held on `path`.
    pub fn reader_count(&self, path: impl AsRef<Path>) -> usize {
        let key = canonical_key(path.as_ref());
        self.table
            .entries
            .lock()
            .get(&key)
            .map_or(0, |entry| entry.readers.len())
    }

    /// Returns the number of read locks held across all paths.
    pub fn active_readers(&self) -> usize {
        self.table
            .entries
            .lock()
            .values()
            .map(|entry| entry.readers.len())
            .sum()
    }

    /// Returns a view of every path with a holder or waiter, sorted by path.
    pub fn snapshot(&self) -> Vec<LockSnapshot> {
        let mut snapshot: Vec<LockSnapshot> = self
            .table
            .entries
            .lock()
            .iter()
            .map(|(path, entry)| LockSnapshot {
                path: path.clone(),
                readers: entry.readers.len(),
                writer: entry.writer,
                waiting_writers: entry.waiting_writers,
            })
            .collect();
        snapshot.sort_by(|a, b| a.path.cmp(&b.path));
        snapshot
    }
}

impl fmt::Debug for LockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockManager")
            .field("paths", &self.table.entries.lock().len())
            .finish()
    }
}

/// Exclusive hold on a path. Dropping it lets readers back in.
pub struct WriteGuard {
    table: Arc<LockTable>,
    path: PathBuf,
}

impl WriteGuard {
    /// Returns the locked path in canonical form.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        self.table.update(&self.path, |entry| entry.writer = false);
        debug!("Released write lock on {}", self.path.display());
    }
}

impl fmt::Debug for WriteGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteGuard").field("path", &self.path).finish()
    }
}

/// Withdraws a queued writer if `acquire_write` gives up or is dropped.
struct PendingWriter {
    table: Arc<LockTable>,
    path: PathBuf,
    armed: bool,
}

impl Drop for PendingWriter {
    fn drop(&mut self) {
        if self.armed {
            self.table.update(&self.path, |entry| {
                entry.waiting_writers = entry.waiting_writers.saturating_sub(1);
            });
        }
    }
}

/// Resolves `path` to the key used in the lock table.
///
/// Paths that cannot be canonicalized (missing files) are used as given.
fn canonical_key(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
