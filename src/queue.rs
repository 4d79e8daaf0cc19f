//! Shared FIFO of pending synchronization tasks

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::listing::RemoteDescriptor;

/// One repository to synchronise under one base directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTask {
    base_directory: PathBuf,
    repo: RemoteDescriptor,
}

impl SyncTask {
    pub fn new(base_directory: impl Into<PathBuf>, repo: RemoteDescriptor) -> Self {
        Self {
            base_directory: base_directory.into(),
            repo,
        }
    }

    pub fn base_directory(&self) -> &Path {
        &self.base_directory
    }

    pub fn repo(&self) -> &RemoteDescriptor {
        &self.repo
    }
}

/// Mutex-guarded queue that any number of workers may drain concurrently
///
/// Every task put in the queue is handed out by exactly one `try_take`, unless
/// the queue is closed first, in which case it is discarded by `close`.
#[derive(Debug, Default)]
pub struct WorkQueue {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    tasks: VecDeque<SyncTask>,
    closed: bool,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a task; tasks put after [`close`](Self::close) are dropped
    pub fn put(&self, task: SyncTask) {
        let mut inner = self.lock();
        if !inner.closed {
            inner.tasks.push_back(task);
        }
    }

    pub fn extend(&self, tasks: impl IntoIterator<Item = SyncTask>) {
        let mut inner = self.lock();
        if !inner.closed {
            inner.tasks.extend(tasks);
        }
    }

    /// Take the next task without blocking; `None` once the queue is empty or closed
    pub fn try_take(&self) -> Option<SyncTask> {
        self.lock().tasks.pop_front()
    }

    /// Like [`try_take`](Self::try_take), but hands out nothing once `stop` returns true
    ///
    /// `stop` is evaluated under the queue lock, so a task is either taken
    /// before the stop condition was observed or stays queued for `close`.
    pub fn try_take_unless(&self, stop: impl FnOnce() -> bool) -> Option<SyncTask> {
        let mut inner = self.lock();
        if stop() {
            return None;
        }
        inner.tasks.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().tasks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    /// Discard every queued task and refuse new ones; returns how many were dropped
    ///
    /// Once this returns, no `try_take` can hand out a task that was still queued.
    pub fn close(&self) -> usize {
        let mut inner = self.lock();
        inner.closed = true;
        let dropped = inner.tasks.len();
        inner.tasks.clear();
        dropped
    }

    // A panicking worker never leaves the deque half-modified, so a poisoned
    // lock still guards a consistent queue.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
