//! Error types for the action engine.

use crate::session::SessionState;
use crate::types::{ActionName, JobStatus};
use uuid::Uuid;

/// A request was malformed. Always raised before any side effect.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Unknown action: {0}")]
    UnknownAction(String),
    #[error("Invalid agent_id: {0}")]
    InvalidAgentId(String),
    #[error("Arguments must be a JSON object")]
    ArgsNotObject,
    #[error("Unexpected field for {action}: {field}")]
    UnexpectedField { action: ActionName, field: String },
    #[error("Missing required field for {action}: {field}")]
    MissingField { action: ActionName, field: String },
    #[error("Invalid field {field} for {action}: {reason}")]
    InvalidField {
        action: ActionName,
        field: String,
        reason: String,
    },
    #[error("Invalid arguments for {action}: {reason}")]
    CrossField { action: ActionName, reason: String },
    #[error("Invalid {field}: {reason}")]
    InvalidIdentifier { field: &'static str, reason: String },
    #[error("{0} requires one of request_id, mission_id or correlation_id")]
    MissingRequestIdentity(ActionName),
}

impl ValidationError {
    /// Machine-readable code for response bodies.
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::UnknownAction(_) => "unknown_action",
            ValidationError::InvalidAgentId(_) => "invalid_agent_id",
            ValidationError::ArgsNotObject => "invalid_args",
            ValidationError::UnexpectedField { .. } => "unexpected_field",
            ValidationError::MissingField { .. } => "missing_field",
            ValidationError::InvalidField { .. } => "invalid_field",
            ValidationError::CrossField { .. } => "invalid_args",
            ValidationError::InvalidIdentifier { .. } => "invalid_identifier",
            ValidationError::MissingRequestIdentity(_) => "missing_request_identity",
        }
    }
}

/// Reasons a request is refused before execution. No state is mutated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Rate limit exceeded for {action}: {limit} per minute")]
    RateLimited { action: ActionName, limit: u32 },
}

/// Failures of an external executor, or of waiting on one.
///
/// The dispatcher records these verbatim and never propagates them further.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutorError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
    #[error("Encoder did not reach {target} within {waited_ms} ms")]
    TargetStateNotReached { target: &'static str, waited_ms: u64 },
    #[error("Action {action} timed out after {ms} ms")]
    Timeout { action: ActionName, ms: u64 },
}

impl ExecutorError {
    /// Whether re-issuing the same idempotent command may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecutorError::Transport(_) | ExecutorError::Protocol(_)
        )
    }
}

/// Errors from job lifecycle management.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(Uuid),
    #[error("Invalid job transition: {0} -> {1}")]
    InvalidTransition(JobStatus, JobStatus),
}

/// Errors from agent session transitions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Agent already has a {state} operation in flight")]
    InFlight {
        state: SessionState,
        job_id: Option<Uuid>,
    },
}
