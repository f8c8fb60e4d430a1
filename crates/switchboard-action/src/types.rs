//! Core types and value objects for the action engine.
//!
//! Defines action names, requests, jobs, and their supporting enumerations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Validated, normalized action arguments.
pub type Args = Map<String, Value>;

// =============================================================================
// Enums
// =============================================================================

/// Registered action names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionName {
    StartStream,
    StopStream,
    SetTitle,
    SetGame,
    SendChat,
    CreateClip,
    CreateMarker,
}

impl ActionName {
    /// Every registered action, in registry order.
    pub const ALL: [ActionName; 7] = [
        ActionName::StartStream,
        ActionName::StopStream,
        ActionName::SetTitle,
        ActionName::SetGame,
        ActionName::SendChat,
        ActionName::CreateClip,
        ActionName::CreateMarker,
    ];

    /// Whether the action completes inline or runs as a background job.
    pub fn mode(self) -> ActionMode {
        match self {
            ActionName::StartStream | ActionName::StopStream => ActionMode::Async,
            _ => ActionMode::Sync,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionName::StartStream => "start_stream",
            ActionName::StopStream => "stop_stream",
            ActionName::SetTitle => "set_title",
            ActionName::SetGame => "set_game",
            ActionName::SendChat => "send_chat",
            ActionName::CreateClip => "create_clip",
            ActionName::CreateMarker => "create_marker",
        }
    }
}

impl fmt::Display for ActionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionName {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start_stream" => Ok(ActionName::StartStream),
            "stop_stream" => Ok(ActionName::StopStream),
            "set_title" => Ok(ActionName::SetTitle),
            "set_game" => Ok(ActionName::SetGame),
            "send_chat" => Ok(ActionName::SendChat),
            "create_clip" => Ok(ActionName::CreateClip),
            "create_marker" => Ok(ActionName::CreateMarker),
            _ => Err(format!("Unknown action: {}", s)),
        }
    }
}

/// Execution mode of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionMode {
    Sync,
    Async,
}

/// Job lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Done => write!(f, "done"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "done" => Ok(JobStatus::Done),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

// =============================================================================
// Requests
// =============================================================================

/// A raw action request as received from a caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionRequest {
    pub agent_id: String,
    pub action: String,
    /// Expected to be a JSON object; `null` or missing means no arguments.
    #[serde(default)]
    pub args: Value,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub mission_id: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

/// Caller-supplied identifiers, trimmed and with empty values dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestIdentity {
    pub request_id: Option<String>,
    pub mission_id: Option<String>,
    pub correlation_id: Option<String>,
}

impl RequestIdentity {
    pub fn is_empty(&self) -> bool {
        self.request_id.is_none() && self.mission_id.is_none() && self.correlation_id.is_none()
    }
}

/// A request that passed validation.
#[derive(Debug, Clone)]
pub struct ValidatedRequest {
    pub agent_id: String,
    pub action: ActionName,
    pub args: Args,
    pub identity: RequestIdentity,
}

// =============================================================================
// Jobs
// =============================================================================

/// Progress report attached to a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// Percent complete, 0 to 100.
    pub percent: u8,
    pub message: String,
    pub updated_at: DateTime<Utc>,
}

/// Tracked record of an async action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub action: ActionName,
    pub status: JobStatus,
    pub progress: Progress,
    pub result: Map<String, Value>,
    pub error: Option<String>,
    pub args: Args,
    pub agent_id: String,
    pub request_id: Option<String>,
    pub mission_id: Option<String>,
    pub correlation_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Read-only snapshot handed to callers.
    pub fn summary(&self) -> JobSummary {
        JobSummary {
            job_id: self.id,
            action: self.action,
            status: self.status,
            progress: self.progress.clone(),
            result: self.result.clone(),
            error: self.error.clone(),
            agent_id: self.agent_id.clone(),
            request_id: self.request_id.clone(),
            mission_id: self.mission_id.clone(),
            correlation_id: self.correlation_id.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Job status/progress/result snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: Uuid,
    pub action: ActionName,
    pub status: JobStatus,
    pub progress: Progress,
    pub result: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub agent_id: String,
    pub request_id: Option<String>,
    pub mission_id: Option<String>,
    pub correlation_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
