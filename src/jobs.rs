//! Job locks. Each job kind runs at most once at a time; a second caller
//! is turned away instead of queueing.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Check,
    Digest,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Check => "check",
            JobKind::Digest => "digest",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Held while a job runs; dropping it releases the lock.
pub struct JobGuard {
    pub kind: JobKind,
    _guard: OwnedMutexGuard<()>,
}

#[derive(Clone, Default)]
pub struct JobLocks {
    check: Arc<Mutex<()>>,
    digest: Arc<Mutex<()>>,
}

impl JobLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for `kind`, or `None` when that job is already running.
    pub fn try_acquire(&self, kind: JobKind) -> Option<JobGuard> {
        let lock = match kind {
            JobKind::Check => &self.check,
            JobKind::Digest => &self.digest,
        };
        Arc::clone(lock)
            .try_lock_owned()
            .ok()
            .map(|guard| JobGuard { kind, _guard: guard })
    }
}
