//! Server counters.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Default)]
pub(crate) struct Stats {
    jobs_submitted: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    rays_fired: AtomicU64,
    rays_clipped: AtomicU64,
    working: AtomicUsize,
    peak_working: AtomicUsize,
}

impl Stats {
    pub(crate) fn job_submitted(&self) {
        self.jobs_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn job_finished(&self, completed: bool) {
        let counter = if completed {
            &self.jobs_completed
        } else {
            &self.jobs_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn ray_fired(&self) {
        self.rays_fired.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn ray_clipped(&self) {
        self.rays_clipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn start_work(&self) {
        let now = self.working.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_working.fetch_max(now, Ordering::AcqRel);
    }

    pub(crate) fn end_work(&self) {
        self.working.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            rays_fired: self.rays_fired.load(Ordering::Relaxed),
            rays_clipped: self.rays_clipped.load(Ordering::Relaxed),
            peak_working: self.peak_working.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the server counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Jobs accepted by submit.
    pub jobs_submitted: u64,
    /// Jobs that ended `Completed`.
    pub jobs_completed: u64,
    /// Jobs that ended `Failed`.
    pub jobs_failed: u64,
    /// Ray-instance pairs handed to the engine.
    pub rays_fired: u64,
    /// Ray-instance pairs rejected by clipping.
    pub rays_clipped: u64,
    /// Most jobs dispatching at once.
    pub peak_working: usize,
}

impl StatsSnapshot {
    pub(crate) fn log(&self) {
        info!(
            submitted = self.jobs_submitted,
            completed = self.jobs_completed,
            failed = self.jobs_failed,
            rays_fired = self.rays_fired,
            rays_clipped = self.rays_clipped,
            peak_working = self.peak_working,
            "server summary"
        );
    }
}
