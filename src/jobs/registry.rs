//! Process-wide job registry.
//!
//! Every method takes the lock once and releases it before returning, so no job
//! mutation ever spans an await point. Only the `wait_for_*` methods suspend.

use super::types::{Job, JobParams, JobState};
use crate::progress::Phase;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

const MAX_TTL_DAYS: i64 = 36_500;

struct JobEntry {
    job: Job,
    /// Flips to `true` once, on the first terminal transition
    completion: watch::Sender<bool>,
    /// Interrupt handle of the run currently driving this job
    task: Option<CancellationToken>,
    /// `true` while a run is registered
    task_active: watch::Sender<bool>,
}

impl JobEntry {
    fn transition(&mut self, state: JobState) {
        self.job.state = state;
        self.job.updated_at = Utc::now();
        if state == JobState::Completed {
            self.job.phase = Some(Phase::Complete);
        }
        if state.is_terminal() {
            self.completion.send_replace(true);
        }
    }
}

/// Outcome of trying to start a run for a job
#[derive(Debug, Clone, PartialEq)]
pub enum RunStart {
    /// The job moved to running; the caller owns the run
    Started(JobParams),
    /// Another run is already driving the job
    AlreadyRunning,
    /// The job already finished; carries its final snapshot
    Terminal(Job),
    NotFound,
}

/// Number of live jobs per state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub error: usize,
    pub cancelled: usize,
    pub total: usize,
}

pub struct JobRegistry {
    jobs: Mutex<HashMap<String, JobEntry>>,
    ttl: Duration,
}

impl JobRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Insert a queued job and return its id.
    pub fn create_job(&self, params: JobParams) -> String {
        let id = Uuid::now_v7().to_string();
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.ttl)
            .unwrap_or_else(|_| chrono::Duration::days(MAX_TTL_DAYS));
        let expires_at = now + ttl;
        let (completion, _) = watch::channel(false);
        let (task_active, _) = watch::channel(false);

        let job = Job {
            id: id.clone(),
            state: JobState::Queued,
            phase: None,
            params,
            result: None,
            reasoning: None,
            error: None,
            cancelled: false,
            created_at: now,
            updated_at: now,
            expires_at,
        };
        self.jobs.lock().insert(
            id.clone(),
            JobEntry {
                job,
                completion,
                task: None,
                task_active,
            },
        );
        debug!(job_id = %id, "Job created");
        id
    }

    /// Snapshot of a job. An expired job is evicted and reported as absent.
    pub fn get_job(&self, id: &str) -> Option<Job> {
        let mut jobs = self.jobs.lock();
        Self::live_entry(&mut jobs, id).map(|entry| entry.job.clone())
    }

    /// Record a state change. Unknown ids and jobs that already reached a terminal
    /// state are left untouched. Returns whether the update was applied.
    pub fn update_status(
        &self,
        id: &str,
        state: JobState,
        result: Option<Value>,
        error: Option<String>,
    ) -> bool {
        let mut jobs = self.jobs.lock();
        let Some(entry) = Self::live_entry(&mut jobs, id) else {
            warn!(job_id = %id, state = %state, "Status update for unknown job");
            return false;
        };
        if entry.job.state.is_terminal() {
            debug!(
                job_id = %id,
                current = %entry.job.state,
                requested = %state,
                "Ignoring update to finished job"
            );
            return false;
        }

        if result.is_some() {
            entry.job.result = result;
        }
        if error.is_some() {
            entry.job.error = error;
        }
        entry.transition(state);
        debug!(job_id = %id, state = %state, "Job status updated");
        true
    }

    /// Record the phase a running job has reached. Finished jobs keep theirs.
    pub fn set_phase(&self, id: &str, phase: Phase) -> bool {
        self.update_live(id, |job| job.phase = Some(phase))
    }

    /// Attach the provider's reasoning text to an unfinished job.
    pub fn set_reasoning(&self, id: &str, reasoning: String) -> bool {
        self.update_live(id, |job| job.reasoning = Some(reasoning))
    }

    fn update_live(&self, id: &str, apply: impl FnOnce(&mut Job)) -> bool {
        let mut jobs = self.jobs.lock();
        match Self::live_entry(&mut jobs, id) {
            Some(entry) if !entry.job.state.is_terminal() => {
                apply(&mut entry.job);
                entry.job.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    /// Cancel a queued or running job and interrupt its run. Returns `false` for
    /// unknown or already finished jobs.
    pub fn cancel(&self, id: &str) -> bool {
        let mut jobs = self.jobs.lock();
        let Some(entry) = Self::live_entry(&mut jobs, id) else {
            return false;
        };
        if entry.job.state.is_terminal() {
            return false;
        }

        entry.job.cancelled = true;
        entry.transition(JobState::Cancelled);
        if let Some(token) = &entry.task {
            token.cancel();
        }
        info!(job_id = %id, "Job cancelled");
        true
    }

    pub fn is_cancelled(&self, id: &str) -> bool {
        self.jobs
            .lock()
            .get(id)
            .map(|entry| entry.job.cancelled)
            .unwrap_or(false)
    }

    /// Associate the run driving a job. A job cancelled in the meantime has its
    /// token cancelled immediately.
    pub fn register_task(&self, id: &str, token: CancellationToken) -> bool {
        let mut jobs = self.jobs.lock();
        let Some(entry) = jobs.get_mut(id) else {
            return false;
        };
        if entry.job.cancelled {
            token.cancel();
        }
        entry.task = Some(token);
        entry.task_active.send_replace(true);
        true
    }

    /// Safe to call for jobs that never registered a run.
    pub fn unregister_task(&self, id: &str) {
        if let Some(entry) = self.jobs.lock().get_mut(id) {
            entry.task = None;
            entry.task_active.send_replace(false);
        }
    }

    /// Move a queued job to running and register its run, in one step.
    pub fn begin_run(&self, id: &str, token: CancellationToken) -> RunStart {
        let mut jobs = self.jobs.lock();
        let Some(entry) = Self::live_entry(&mut jobs, id) else {
            return RunStart::NotFound;
        };
        match entry.job.state {
            state if state.is_terminal() => RunStart::Terminal(entry.job.clone()),
            JobState::Running => RunStart::AlreadyRunning,
            _ => {
                entry.task = Some(token);
                entry.task_active.send_replace(true);
                entry.transition(JobState::Running);
                RunStart::Started(entry.job.params.clone())
            }
        }
    }

    /// Wait until the job reaches a terminal state. Returns `false` on timeout or
    /// when the job does not exist.
    pub async fn wait_for_completion(&self, id: &str, timeout: Duration) -> bool {
        let receiver = {
            let mut jobs = self.jobs.lock();
            match Self::live_entry(&mut jobs, id) {
                Some(entry) => entry.completion.subscribe(),
                None => return false,
            }
        };
        wait_until(receiver, timeout, |done| *done).await
    }

    /// Wait until no run is registered for the job. A missing job counts as clean.
    pub async fn wait_for_cleanup(&self, id: &str, timeout: Duration) -> bool {
        let receiver = match self.jobs.lock().get(id) {
            Some(entry) => entry.task_active.subscribe(),
            None => return true,
        };
        wait_until(receiver, timeout, |active| !*active).await
    }

    /// Remove every expired job. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut jobs = self.jobs.lock();
        let before = jobs.len();
        jobs.retain(|_, entry| {
            let keep = !entry.job.is_expired(now);
            if !keep {
                Self::release(entry);
            }
            keep
        });
        let removed = before - jobs.len();
        if removed > 0 {
            info!(removed, remaining = jobs.len(), "Swept expired jobs");
        }
        removed
    }

    /// Run `sweep` every `interval` until `shutdown` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // First tick fires immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {
                        debug!("Job sweeper shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        registry.sweep();
                    }
                }
            }
        })
    }

    pub fn counts(&self) -> JobCounts {
        let jobs = self.jobs.lock();
        let mut counts = JobCounts {
            total: jobs.len(),
            ..JobCounts::default()
        };
        for entry in jobs.values() {
            match entry.job.state {
                JobState::Queued => counts.queued += 1,
                JobState::Running => counts.running += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Error => counts.error += 1,
                JobState::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    fn live_entry<'a>(jobs: &'a mut HashMap<String, JobEntry>, id: &str) -> Option<&'a mut JobEntry> {
        let expired = jobs.get(id)?.job.is_expired(Utc::now());
        if expired {
            if let Some(entry) = jobs.remove(id) {
                Self::release(&entry);
            }
            debug!(job_id = %id, "Evicted expired job on lookup");
            return None;
        }
        jobs.get_mut(id)
    }

    // An evicted job may still have a run attached; nothing can observe it anymore.
    fn release(entry: &JobEntry) {
        if let Some(token) = &entry.task {
            token.cancel();
        }
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new(super::JobsConfig::default().ttl())
    }
}

async fn wait_until(
    mut receiver: watch::Receiver<bool>,
    timeout: Duration,
    condition: impl FnMut(&bool) -> bool,
) -> bool {
    match tokio::time::timeout(timeout, receiver.wait_for(condition)).await {
        Ok(Ok(_)) => true,
        // Sender dropped: the job was removed while we waited.
        Ok(Err(_)) => false,
        Err(_) => false,
    }
}
