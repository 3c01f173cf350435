//! Progress & job registry.
//!
//! [`DownloadProgress`] is written only by the download's own workers and
//! read by any observer without locking: every field is an independent
//! atomic, so a snapshot is eventually consistent but never torn on any
//! single field.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime};

use crate::{FileSize, PeerEndpoint};

/// A concurrently observable snapshot of a download's progress.
///
/// Invariants: exactly one of `{active, success, failed}` is true once
/// the first transition has happened; `pending` implies `active`; once
/// `success` or `failed` becomes true, `active` becomes false and none of
/// the three terminal-ish flags change again.
#[derive(Debug, Default)]
pub struct DownloadProgress {
    total_bytes: AtomicU64,
    done_bytes: AtomicU64,
    total_chunks: AtomicU64,
    done_chunks: AtomicU64,
    active: AtomicBool,
    pending: AtomicBool,
    success: AtomicBool,
    failed: AtomicBool,
}

/// An immutable point-in-time copy of [`DownloadProgress`]'s fields,
/// convenient for rendering (e.g. by the menu/status TUI).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub total_bytes: u64,
    pub done_bytes: u64,
    pub total_chunks: u64,
    pub done_chunks: u64,
    pub active: bool,
    pub pending: bool,
    pub success: bool,
    pub failed: bool,
}

impl DownloadProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_totals(&self, total_bytes: FileSize, total_chunks: u64) {
        self.total_bytes.store(total_bytes, Ordering::Relaxed);
        self.total_chunks.store(total_chunks, Ordering::Relaxed);
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    pub(crate) fn set_pending(&self, pending: bool) {
        self.pending.store(pending, Ordering::Relaxed);
    }

    /// Marks the download as successfully finished. Clears `active` and
    /// `pending`, matching the terminal-exclusivity invariant.
    pub(crate) fn set_success(&self) {
        self.pending.store(false, Ordering::Relaxed);
        self.success.store(true, Ordering::Relaxed);
        self.active.store(false, Ordering::Relaxed);
    }

    /// Marks the download as failed. Clears `active` and `pending`.
    pub(crate) fn set_failed(&self) {
        self.pending.store(false, Ordering::Relaxed);
        self.failed.store(true, Ordering::Relaxed);
        self.active.store(false, Ordering::Relaxed);
    }

    pub(crate) fn add_done(&self, bytes: u64, chunks: u64) {
        self.done_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.done_chunks.fetch_add(chunks, Ordering::Relaxed);
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn is_success(&self) -> bool {
        self.success.load(Ordering::Relaxed)
    }

    pub fn done_chunks(&self) -> u64 {
        self.done_chunks.load(Ordering::Relaxed)
    }

    pub fn total_chunks(&self) -> u64 {
        self.total_chunks.load(Ordering::Relaxed)
    }

    /// Takes a consistent-per-field, eventually-consistent-overall
    /// snapshot of the current progress. Safe to call concurrently with
    /// an in-progress download; never blocks.
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            done_bytes: self.done_bytes.load(Ordering::Relaxed),
            total_chunks: self.total_chunks.load(Ordering::Relaxed),
            done_chunks: self.done_chunks.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            pending: self.pending.load(Ordering::Relaxed),
            success: self.success.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// A single download's bookkeeping: created before the download starts,
/// lives until node shutdown, and is never reused across downloads.
pub struct DownloadJob {
    pub filename: String,
    pub seeders: Vec<PeerEndpoint>,
    pub start_time: SystemTime,
    pub end_time: Mutex<Option<SystemTime>>,
    pub progress: Arc<DownloadProgress>,
    started_at: Instant,
}

impl DownloadJob {
    pub fn new(filename: String, seeders: Vec<PeerEndpoint>) -> Arc<Self> {
        Arc::new(Self {
            filename,
            seeders,
            start_time: SystemTime::now(),
            end_time: Mutex::new(None),
            progress: Arc::new(DownloadProgress::new()),
            started_at: Instant::now(),
        })
    }

    /// Records the job's completion time. Idempotent: only the first call
    /// has an effect.
    pub fn finish(&self) {
        let mut end = self.end_time.lock().unwrap();
        if end.is_none() {
            *end = Some(SystemTime::now());
        }
    }

    pub fn is_finished(&self) -> bool {
        self.end_time.lock().unwrap().is_some()
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }
}

/// A process-local registry of live (and finished) download jobs, held
/// behind a mutex. Observers enumerate jobs and snapshot each job's
/// progress without blocking the jobs' own workers — only the registry's
/// membership (not any job's progress) is behind the lock.
#[derive(Default)]
pub struct JobRegistry {
    jobs: Mutex<Vec<Arc<DownloadJob>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, job: Arc<DownloadJob>) {
        self.jobs.lock().unwrap().push(job);
    }

    /// Returns a clone of the current job list. Cheap: clones `Arc`s, not
    /// the jobs themselves.
    pub fn jobs(&self) -> Vec<Arc<DownloadJob>> {
        self.jobs.lock().unwrap().clone()
    }

    /// Looks up the most recently registered job for `filename`, if any.
    pub fn find(&self, filename: &str) -> Option<Arc<DownloadJob>> {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|j| j.filename == filename)
            .cloned()
    }
}
