//! In-process job control: pause/cancel flags addressable by job id from
//! API threads while the orchestrator loop runs. Flags are observed
//! between batches, never mid-batch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

#[derive(Debug, Default)]
pub struct JobControl {
    paused: AtomicBool,
    cancelled: AtomicBool,
}

impl JobControl {
    pub fn request_pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn request_cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn clear_pause(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: DashMap<String, Arc<JobControl>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch-or-create the control handle for a job.
    pub fn handle(&self, job_id: &str) -> Arc<JobControl> {
        self.jobs
            .entry(job_id.to_string())
            .or_default()
            .clone()
    }

    /// Signal pause. The flag is set even before the job's orchestrator
    /// registers, so a pause raced against job startup still lands.
    pub fn pause(&self, job_id: &str) -> bool {
        tracing::info!(job_id, "pause requested");
        self.handle(job_id).request_pause();
        true
    }

    pub fn cancel(&self, job_id: &str) -> bool {
        tracing::info!(job_id, "cancel requested");
        self.handle(job_id).request_cancel();
        true
    }

    pub fn remove(&self, job_id: &str) {
        self.jobs.remove(job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_creates_and_reuses() {
        let registry = JobRegistry::new();
        let a = registry.handle("job-1");
        let b = registry.handle("job-1");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn pause_flag_visible_through_shared_handle() {
        let registry = JobRegistry::new();
        let control = registry.handle("job-1");
        assert!(!control.is_paused());
        assert!(registry.pause("job-1"));
        assert!(control.is_paused());
        control.clear_pause();
        assert!(!control.is_paused());
    }

    #[test]
    fn pause_before_registration_still_lands() {
        let registry = JobRegistry::new();
        assert!(registry.pause("early"));
        // The orchestrator later fetches the same handle and sees the flag.
        assert!(registry.handle("early").is_paused());
    }

    #[test]
    fn cancel_independent_of_pause() {
        let registry = JobRegistry::new();
        let control = registry.handle("job-1");
        registry.cancel("job-1");
        assert!(control.is_cancelled());
        assert!(!control.is_paused());
    }
}
