//! Job lifecycle management.
//!
//! Tracks async actions from creation to a terminal state, together with the
//! idempotency index that maps dedup keys to live jobs. Both maps sit behind
//! one lock so lookup-then-insert and eviction stay consistent.

pub mod state_machine;

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::JobError;
use crate::job::state_machine::validate_transition;
use crate::types::{ActionName, Args, Job, JobStatus, Progress, RequestIdentity};

/// Progress recorded for a freshly created job.
pub const QUEUED_PERCENT: u8 = 5;

/// Everything needed to create a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub action: ActionName,
    pub agent_id: String,
    pub identity: RequestIdentity,
    pub args: Args,
}

/// Counts returned by a sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub jobs_removed: usize,
    pub keys_removed: usize,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<Uuid, Job>,
    idempotency: HashMap<String, Uuid>,
}

/// In-memory job store with TTL eviction.
pub struct JobStore {
    ttl: chrono::Duration,
    inner: Mutex<Inner>,
}

impl JobStore {
    /// Create an empty store. Jobs older than `ttl` are removed by [`sweep`](Self::sweep).
    pub fn new(ttl: std::time::Duration) -> Self {
        Self {
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create a new queued job.
    pub fn create(&self, new: NewJob) -> Job {
        let job = build_job(new);
        self.lock().jobs.insert(job.id, job.clone());
        debug!(job_id = %job.id, action = %job.action, "Job created");
        job
    }

    /// Return the live job registered under `dedup_key`, or create one.
    ///
    /// The boolean is true when a new job was created.
    pub fn create_or_get(&self, dedup_key: &str, new: NewJob) -> (Job, bool) {
        let mut inner = self.lock();
        if let Some(existing) = inner
            .idempotency
            .get(dedup_key)
            .and_then(|id| inner.jobs.get(id))
        {
            return (existing.clone(), false);
        }

        let job = build_job(new);
        inner.jobs.insert(job.id, job.clone());
        inner.idempotency.insert(dedup_key.to_string(), job.id);
        debug!(job_id = %job.id, action = %job.action, dedup_key, "Job created");
        (job, true)
    }

    /// The live job registered under `dedup_key`, if any.
    pub fn lookup(&self, dedup_key: &str) -> Option<Job> {
        let inner = self.lock();
        inner
            .idempotency
            .get(dedup_key)
            .and_then(|id| inner.jobs.get(id))
            .cloned()
    }

    /// Get a job by ID.
    pub fn get(&self, id: Uuid) -> Result<Job, JobError> {
        self.lock().jobs.get(&id).cloned().ok_or(JobError::NotFound(id))
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.lock().jobs.contains_key(&id)
    }

    /// Move a queued job to running.
    pub fn mark_running(&self, id: Uuid, percent: u8, message: &str) -> Result<Job, JobError> {
        self.update(id, |job, now| {
            validate_transition(job.status, JobStatus::Running)?;
            job.status = JobStatus::Running;
            job.progress = progress(percent, message, now);
            Ok(())
        })
    }

    /// Record progress on a job that has not finished yet. A terminal job is
    /// returned unchanged, `updated_at` included.
    pub fn report_progress(&self, id: Uuid, percent: u8, message: &str) -> Result<Job, JobError> {
        let mut inner = self.lock();
        let job = inner.jobs.get_mut(&id).ok_or(JobError::NotFound(id))?;
        if job.status.is_terminal() {
            return Ok(job.clone());
        }
        let now = Utc::now();
        job.progress = progress(percent, message, now);
        job.updated_at = now;
        Ok(job.clone())
    }

    /// Move a job to a terminal state, merging `result` into its result map.
    ///
    /// `reason` becomes the job error when `status` is failed.
    pub fn complete(
        &self,
        id: Uuid,
        status: JobStatus,
        result: Map<String, Value>,
        reason: Option<String>,
    ) -> Result<Job, JobError> {
        if !status.is_terminal() {
            let current = self.get(id)?.status;
            return Err(JobError::InvalidTransition(current, status));
        }
        self.update(id, |job, now| {
            validate_transition(job.status, status)?;
            job.status = status;
            job.result.extend(result);
            match status {
                JobStatus::Done => {
                    job.progress = progress(100, "done", now);
                }
                _ => {
                    let message = reason.unwrap_or_else(|| "failed".to_string());
                    job.progress = progress(job.progress.percent, &message, now);
                    job.error = Some(message);
                }
            }
            Ok(())
        })
    }

    /// Fail a job with a verbatim error message.
    pub fn fail(&self, id: Uuid, error: impl Into<String>) -> Result<Job, JobError> {
        self.complete(id, JobStatus::Failed, Map::new(), Some(error.into()))
    }

    fn update<F>(&self, id: Uuid, f: F) -> Result<Job, JobError>
    where
        F: FnOnce(&mut Job, DateTime<Utc>) -> Result<(), JobError>,
    {
        let mut inner = self.lock();
        let job = inner.jobs.get_mut(&id).ok_or(JobError::NotFound(id))?;
        let now = Utc::now();
        f(job, now)?;
        job.updated_at = now;
        Ok(job.clone())
    }

    /// Evict expired jobs using the current time.
    pub fn sweep(&self) -> SweepStats {
        self.sweep_at(Utc::now())
    }

    /// Evict jobs created more than the TTL before `now`, whatever their
    /// status, then drop idempotency entries whose job is gone.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> SweepStats {
        let mut inner = self.lock();
        let ttl = self.ttl;

        let before = inner.jobs.len();
        inner
            .jobs
            .retain(|_, job| now.signed_duration_since(job.created_at) <= ttl);
        let jobs_removed = before - inner.jobs.len();

        let Inner { jobs, idempotency } = &mut *inner;
        let before = idempotency.len();
        idempotency.retain(|_, id| jobs.contains_key(id));
        let keys_removed = before - idempotency.len();

        let stats = SweepStats {
            jobs_removed,
            keys_removed,
        };
        if jobs_removed > 0 || keys_removed > 0 {
            info!(jobs_removed, keys_removed, "Swept expired jobs");
        }
        stats
    }

    /// Number of jobs currently held.
    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of idempotency entries currently held.
    pub fn idempotency_len(&self) -> usize {
        self.lock().idempotency.len()
    }
}

fn progress(percent: u8, message: &str, now: DateTime<Utc>) -> Progress {
    Progress {
        percent: percent.min(100),
        message: message.to_string(),
        updated_at: now,
    }
}

fn build_job(new: NewJob) -> Job {
    let now = Utc::now();
    Job {
        id: Uuid::new_v4(),
        action: new.action,
        status: JobStatus::Queued,
        progress: progress(QUEUED_PERCENT, "queued", now),
        result: Map::new(),
        error: None,
        args: new.args,
        agent_id: new.agent_id,
        request_id: new.identity.request_id,
        mission_id: new.identity.mission_id,
        correlation_id: new.identity.correlation_id,
        created_at: now,
        updated_at: now,
    }
}

/// Derive the idempotency key for an async request.
///
/// - with a request id: `{action}:{request_id}`
/// - with a mission or correlation id: `{action}:{agent_id}:m={mission}:c={correlation}`
/// - otherwise a coarse per-agent key, so every id-less request for the same
///   action and agent collapses onto one live job
pub fn dedup_key(action: ActionName, agent_id: &str, identity: &RequestIdentity) -> String {
    if let Some(request_id) = &identity.request_id {
        return format!("{action}:{request_id}");
    }
    if identity.mission_id.is_some() || identity.correlation_id.is_some() {
        return format!(
            "{action}:{agent_id}:m={}:c={}",
            identity.mission_id.as_deref().unwrap_or(""),
            identity.correlation_id.as_deref().unwrap_or("")
        );
    }
    let digest = Sha256::digest(format!("{action}|{agent_id}").as_bytes());
    let hash = hex::encode(digest);
    format!("{action}:auto:{}", &hash[..16])
}
