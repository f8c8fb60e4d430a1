//! Action dispatcher.
//!
//! Entry point of the engine. Each request is validated, rate limited and then
//! either executed inline (sync actions) or turned into a job that runs in the
//! background (async actions). Execution for one agent is serialized in
//! submission order. Executor failures never escape this module: they end up
//! in the sync result or on the job.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use switchboard_core::config::ActionsConfig;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{DispatchError, ExecutorError, JobError, SessionError};
use crate::executor::Executors;
use crate::job::{dedup_key, JobStore, NewJob};
use crate::process::{ProcessController, ProcessPolicy};
use crate::rate_limit::RateLimiter;
use crate::schema::{self, validate_request, ActionSchema};
use crate::serializer::{AgentSerializer, Turn};
use crate::session::{AgentSession, SessionEvent, SessionRegistry};
use crate::types::{
    ActionMode, ActionName, ActionRequest, Job, JobStatus, JobSummary, ValidatedRequest,
};

/// How long a health probe may take per executor.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Progress recorded when a job starts running.
const RUNNING_PERCENT: u8 = 10;

// =============================================================================
// Outcomes
// =============================================================================

/// Result of submitting a request.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// A sync action ran to completion or failure.
    Completed(SyncResult),
    /// An async action is tracked as a job. `deduplicated` is set when an
    /// existing job was returned instead of creating a new one.
    Queued {
        job: JobSummary,
        deduplicated: bool,
    },
    /// Refused before execution. Nothing was changed.
    Rejected(DispatchError),
}

impl SubmitOutcome {
    pub fn accepted(&self) -> bool {
        !matches!(self, SubmitOutcome::Rejected(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Done,
    Failed,
}

/// Why a sync action failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Executor,
    Timeout,
}

/// Outcome of a sync action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncResult {
    pub accepted: bool,
    pub action: ActionName,
    pub status: SyncStatus,
    /// Executor result; empty on failure.
    pub result: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub failure: Option<FailureKind>,
}

impl SyncResult {
    fn done(action: ActionName, result: Map<String, Value>) -> Self {
        Self {
            accepted: true,
            action,
            status: SyncStatus::Done,
            result,
            error: None,
            failure: None,
        }
    }

    fn failed(action: ActionName, error: String, kind: FailureKind) -> Self {
        Self {
            accepted: true,
            action,
            status: SyncStatus::Failed,
            result: Map::new(),
            error: Some(error),
            failure: Some(kind),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutorHealth {
    pub configured: bool,
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// `ok` when every configured executor is reachable, else `degraded`.
    pub status: &'static str,
    pub encoder: ExecutorHealth,
    pub platform: ExecutorHealth,
    pub jobs: usize,
}

// =============================================================================
// Dispatcher
// =============================================================================

pub struct Dispatcher {
    config: ActionsConfig,
    limiter: RateLimiter,
    jobs: Arc<JobStore>,
    sessions: SessionRegistry,
    serializer: AgentSerializer,
    controller: ProcessController,
}

impl Dispatcher {
    pub fn new(config: ActionsConfig, executors: Executors) -> Arc<Self> {
        let jobs = Arc::new(JobStore::new(Duration::from_secs(config.job_ttl_secs)));
        Self::with_job_store(config, executors, jobs)
    }

    /// Build a dispatcher around an existing job store.
    pub fn with_job_store(
        config: ActionsConfig,
        executors: Executors,
        jobs: Arc<JobStore>,
    ) -> Arc<Self> {
        let policy = ProcessPolicy::from_config(&config);
        Arc::new(Self {
            limiter: RateLimiter::new(config.rate_limit_per_minute),
            jobs,
            sessions: SessionRegistry::new(),
            serializer: AgentSerializer::new(),
            controller: ProcessController::new(executors, policy),
            config,
        })
    }

    pub fn jobs(&self) -> &Arc<JobStore> {
        &self.jobs
    }

    /// Validate, admit and run or enqueue a request.
    pub async fn submit(self: &Arc<Self>, request: ActionRequest) -> SubmitOutcome {
        let validated = match validate_request(&request, self.config.require_request_identity) {
            Ok(v) => v,
            Err(err) => {
                warn!(
                    agent_id = %request.agent_id,
                    action = %request.action,
                    error = %err,
                    "Request rejected"
                );
                return SubmitOutcome::Rejected(err.into());
            }
        };

        let action = validated.action;
        if !self.limiter.admit(action.as_str()) {
            warn!(agent_id = %validated.agent_id, %action, "Rate limit exceeded");
            return SubmitOutcome::Rejected(DispatchError::RateLimited {
                action,
                limit: self.limiter.limit(),
            });
        }

        match action.mode() {
            ActionMode::Sync => SubmitOutcome::Completed(self.run_sync(validated).await),
            ActionMode::Async => self.submit_async(validated),
        }
    }

    // =========================================================================
    // Sync path
    // =========================================================================

    async fn run_sync(self: &Arc<Self>, request: ValidatedRequest) -> SyncResult {
        let ValidatedRequest {
            agent_id,
            action,
            args,
            ..
        } = request;
        let timeout = self.config.timeout_for(action.as_str());

        // executor calls run in their own task so a panic comes back as a JoinError
        let this = Arc::clone(self);
        let lock_agent = agent_id.clone();
        let handle = tokio::spawn(async move {
            this.serializer
                .with_lock(&lock_agent, async {
                    let progress = |_: u8, _: &str| {};
                    tokio::time::timeout(timeout, this.controller.run(action, &args, &progress))
                        .await
                })
                .await
        });

        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(err) => {
                let message = if err.is_panic() {
                    "action execution panicked"
                } else {
                    "action execution was cancelled"
                };
                error!(%agent_id, %action, error = %err, "Sync action task aborted");
                return SyncResult::failed(action, message.to_string(), FailureKind::Executor);
            }
        };

        match outcome {
            Ok(Ok(result)) => {
                info!(%agent_id, %action, "Action completed");
                SyncResult::done(action, result)
            }
            Ok(Err(err)) => {
                warn!(%agent_id, %action, error = %err, "Action failed");
                SyncResult::failed(action, err.to_string(), FailureKind::Executor)
            }
            Err(_) => {
                let err = ExecutorError::Timeout {
                    action,
                    ms: timeout.as_millis() as u64,
                };
                warn!(%agent_id, %action, error = %err, "Action timed out");
                SyncResult::failed(action, err.to_string(), FailureKind::Timeout)
            }
        }
    }

    // =========================================================================
    // Async path
    // =========================================================================

    fn submit_async(self: &Arc<Self>, request: ValidatedRequest) -> SubmitOutcome {
        let action = request.action;
        let agent_id = request.agent_id.clone();
        let key = dedup_key(action, &agent_id, &request.identity);

        if let Some(job) = self.jobs.lookup(&key) {
            info!(%agent_id, %action, job_id = %job.id, "Duplicate request, returning existing job");
            return queued(&job, true);
        }

        let event = match action {
            ActionName::StopStream => SessionEvent::StopRequested,
            _ => SessionEvent::StartRequested,
        };
        let new_job = NewJob {
            action,
            agent_id: agent_id.clone(),
            identity: request.identity,
            args: request.args,
        };

        loop {
            let begun = self.sessions.begin(&agent_id, event, || {
                let (job, created) = self.jobs.create_or_get(&key, new_job.clone());
                // reserve the turn while the session is held so turns follow submission order
                let turn = created.then(|| self.serializer.enqueue(&agent_id));
                let attach = created.then_some(job.id);
                ((job, turn), attach)
            });

            match begun {
                Ok((job, Some(turn))) => {
                    info!(%agent_id, %action, job_id = %job.id, "Job queued");
                    self.spawn_job(job.clone(), turn);
                    return queued(&job, false);
                }
                Ok((job, None)) => {
                    info!(%agent_id, %action, job_id = %job.id, "Duplicate request, returning existing job");
                    return queued(&job, true);
                }
                Err(SessionError::InFlight { state, job_id }) => {
                    let live = job_id
                        .and_then(|id| self.jobs.get(id).ok())
                        .filter(|job| !job.status.is_terminal());
                    if let Some(job) = live {
                        info!(%agent_id, %action, %state, job_id = %job.id, "Operation already in flight");
                        return queued(&job, true);
                    }
                    // the in-flight job is gone or finished; clear the marker and retry
                    debug!(%agent_id, %state, "Clearing stale in-flight session");
                    self.sessions.abandon(&agent_id, job_id);
                }
            }
        }
    }

    fn spawn_job(self: &Arc<Self>, job: Job, turn: Turn) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let job_id = job.id;
            let agent_id = job.agent_id.clone();
            let runner = Arc::clone(&this);
            let handle = tokio::spawn(async move { runner.execute_job(job, turn).await });

            if let Err(err) = handle.await {
                let message = if err.is_panic() {
                    "job execution panicked"
                } else {
                    "job execution was cancelled"
                };
                error!(%job_id, %agent_id, error = %err, "Job task aborted");
                if let Err(e) = this.jobs.fail(job_id, message) {
                    debug!(%job_id, error = %e, "Could not record job failure");
                }
                this.sessions
                    .finish(&agent_id, job_id, SessionEvent::Failed, None);
            }
        });
    }

    async fn execute_job(&self, job: Job, turn: Turn) {
        let _guard = turn.acquire().await;
        let Job {
            id: job_id,
            action,
            agent_id,
            args,
            ..
        } = job;

        // the job may have been swept while waiting for the turn
        if !self.jobs.contains(job_id) {
            warn!(%job_id, %agent_id, %action, "Job expired before execution, skipping");
            self.sessions.abandon(&agent_id, Some(job_id));
            return;
        }
        if let Err(err) = self.jobs.mark_running(job_id, RUNNING_PERCENT, "running") {
            warn!(%job_id, error = %err, "Job could not start");
            return;
        }
        info!(%job_id, %agent_id, %action, "Job running");

        let jobs = &self.jobs;
        let progress = |percent: u8, message: &str| {
            if let Err(err) = jobs.report_progress(job_id, percent, message) {
                debug!(%job_id, error = %err, "Progress not recorded");
            }
        };

        let timeout = self.config.timeout_for(action.as_str());
        let outcome = tokio::time::timeout(timeout, self.controller.run(action, &args, &progress))
            .await
            .unwrap_or_else(|_| {
                Err(ExecutorError::Timeout {
                    action,
                    ms: timeout.as_millis() as u64,
                })
            });

        let recorded = match outcome {
            Ok(result) => {
                let snapshot = result.get("snapshot").cloned();
                let event = match action {
                    ActionName::StopStream => SessionEvent::Stopped,
                    _ => SessionEvent::Started,
                };
                self.sessions.finish(&agent_id, job_id, event, snapshot);
                info!(%job_id, %agent_id, %action, "Job done");
                self.jobs.complete(job_id, JobStatus::Done, result, None)
            }
            Err(err) => {
                self.sessions
                    .finish(&agent_id, job_id, SessionEvent::Failed, None);
                warn!(%job_id, %agent_id, %action, error = %err, "Job failed");
                self.jobs.fail(job_id, err.to_string())
            }
        };
        if let Err(err) = recorded {
            debug!(%job_id, error = %err, "Job outcome not recorded");
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Snapshot of a job.
    pub fn job(&self, id: Uuid) -> Result<JobSummary, JobError> {
        self.jobs.get(id).map(|job| job.summary())
    }

    /// Registered action schemas.
    pub fn actions(&self) -> &'static [ActionSchema] {
        schema::schemas()
    }

    pub fn session(&self, agent_id: &str) -> AgentSession {
        self.sessions.get(agent_id)
    }

    /// Probe executors and report job count. Read-only.
    pub async fn health(&self) -> HealthReport {
        let executors = self.controller.executors();
        let encoder = match &executors.encoder {
            Some(encoder) => probe_health(encoder.probe()).await,
            None => not_configured(),
        };
        let platform = match &executors.platform {
            Some(platform) => probe_health(platform.probe()).await,
            None => not_configured(),
        };

        let degraded = [&encoder, &platform]
            .iter()
            .any(|h| h.configured && !h.reachable);
        HealthReport {
            status: if degraded { "degraded" } else { "ok" },
            encoder,
            platform,
            jobs: self.jobs.len(),
        }
    }
}

fn queued(job: &Job, deduplicated: bool) -> SubmitOutcome {
    SubmitOutcome::Queued {
        job: job.summary(),
        deduplicated,
    }
}

fn not_configured() -> ExecutorHealth {
    ExecutorHealth {
        configured: false,
        reachable: false,
        error: None,
    }
}

async fn probe_health<F>(probe: F) -> ExecutorHealth
where
    F: std::future::Future<Output = Result<(), ExecutorError>>,
{
    let error = match tokio::time::timeout(PROBE_TIMEOUT, probe).await {
        Ok(Ok(())) => None,
        Ok(Err(err)) => Some(err.to_string()),
        Err(_) => Some(format!("probe timed out after {} ms", PROBE_TIMEOUT.as_millis())),
    };
    ExecutorHealth {
        configured: true,
        reachable: error.is_none(),
        error,
    }
}
