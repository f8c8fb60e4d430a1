//! Per-agent session state.
//!
//! Soft state used to collapse duplicate start/stop attempts while one is
//! already in flight. It mirrors what the agent last asked for and what the
//! encoder last reported; it does not gate execution order, which is the
//! serializer's job.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::error::SessionError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Starting => write!(f, "starting"),
            SessionState::Running => write!(f, "running"),
            SessionState::Stopping => write!(f, "stopping"),
            SessionState::Stopped => write!(f, "stopped"),
            SessionState::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    StartRequested,
    StopRequested,
    Started,
    Stopped,
    Failed,
}

impl SessionState {
    /// Apply `event`, returning the new state.
    ///
    /// A start while starting, or a stop while stopping, is rejected as
    /// already in flight. Everything else is accepted.
    pub fn on(self, event: SessionEvent) -> Result<SessionState, SessionError> {
        match (self, event) {
            (SessionState::Starting, SessionEvent::StartRequested)
            | (SessionState::Stopping, SessionEvent::StopRequested) => {
                Err(SessionError::InFlight {
                    state: self,
                    job_id: None,
                })
            }
            (_, SessionEvent::StartRequested) => Ok(SessionState::Starting),
            (_, SessionEvent::StopRequested) => Ok(SessionState::Stopping),
            (_, SessionEvent::Started) => Ok(SessionState::Running),
            (_, SessionEvent::Stopped) => Ok(SessionState::Stopped),
            (_, SessionEvent::Failed) => Ok(SessionState::Failed),
        }
    }
}

/// Session record for one agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentSession {
    pub state: SessionState,
    /// Job driving the current in-flight transition.
    pub active_job: Option<Uuid>,
    /// Last encoder snapshot observed for this agent.
    pub snapshot: Value,
    pub updated_at: DateTime<Utc>,
}

impl Default for AgentSession {
    fn default() -> Self {
        Self {
            state: SessionState::Idle,
            active_job: None,
            snapshot: Value::Null,
            updated_at: Utc::now(),
        }
    }
}

/// Agent id -> session.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, AgentSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, AgentSession>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current session for an agent; idle if never seen.
    pub fn get(&self, agent_id: &str) -> AgentSession {
        self.lock().get(agent_id).cloned().unwrap_or_default()
    }

    /// Begin a start or stop for an agent.
    ///
    /// `admit` runs inside the session's critical section only when the
    /// transition is allowed. It returns the caller's value plus the id of a
    /// newly created job, if any; only then does the session move and record
    /// that job as its active one.
    pub fn begin<T, F>(&self, agent_id: &str, event: SessionEvent, admit: F) -> Result<T, SessionError>
    where
        F: FnOnce() -> (T, Option<Uuid>),
    {
        let mut sessions = self.lock();
        let session = sessions.entry(agent_id.to_string()).or_default();
        let next = session.state.on(event).map_err(|e| with_job(e, session.active_job))?;

        let (value, job_id) = admit();
        if let Some(job_id) = job_id {
            debug!(agent_id, %job_id, from = %session.state, to = %next, "Session transition");
            session.state = next;
            session.active_job = Some(job_id);
            session.updated_at = Utc::now();
        }
        Ok(value)
    }

    /// Record the outcome of `job_id`. Ignored unless that job is still the
    /// agent's active one.
    pub fn finish(
        &self,
        agent_id: &str,
        job_id: Uuid,
        event: SessionEvent,
        snapshot: Option<Value>,
    ) -> Option<SessionState> {
        let mut sessions = self.lock();
        let session = sessions.get_mut(agent_id)?;
        if session.active_job != Some(job_id) {
            debug!(agent_id, %job_id, "Stale session completion ignored");
            return None;
        }
        let next = session.state.on(event).ok()?;
        session.state = next;
        session.active_job = None;
        if let Some(snapshot) = snapshot {
            session.snapshot = snapshot;
        }
        session.updated_at = Utc::now();
        Some(next)
    }

    /// Drop the in-flight marker for `job_id`, returning the agent to idle.
    /// Used when the job vanished before it could report an outcome.
    pub fn abandon(&self, agent_id: &str, job_id: Option<Uuid>) -> bool {
        let mut sessions = self.lock();
        match sessions.get_mut(agent_id) {
            Some(session) if session.active_job == job_id => {
                session.state = SessionState::Idle;
                session.active_job = None;
                session.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }
}

fn with_job(err: SessionError, job_id: Option<Uuid>) -> SessionError {
    match err {
        SessionError::InFlight { state, .. } => SessionError::InFlight { state, job_id },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // =====================================================================
    // Transitions
    // =====================================================================

    #[test]
    fn test_start_flow() {
        let state = SessionState::Idle.on(SessionEvent::StartRequested).unwrap();
        assert_eq!(state, SessionState::Starting);
        assert_eq!(state.on(SessionEvent::Started).unwrap(), SessionState::Running);
    }

    #[test]
    fn test_stop_flow() {
        let state = SessionState::Running.on(SessionEvent::StopRequested).unwrap();
        assert_eq!(state, SessionState::Stopping);
        assert_eq!(state.on(SessionEvent::Stopped).unwrap(), SessionState::Stopped);
    }

    #[test]
    fn test_duplicate_in_flight_rejected() {
        assert!(matches!(
            SessionState::Starting.on(SessionEvent::StartRequested),
            Err(SessionError::InFlight {
                state: SessionState::Starting,
                ..
            })
        ));
        assert!(SessionState::Stopping.on(SessionEvent::StopRequested).is_err());
    }

    #[test]
    fn test_opposite_request_while_in_flight_allowed() {
        assert_eq!(
            SessionState::Starting.on(SessionEvent::StopRequested).unwrap(),
            SessionState::Stopping
        );
        assert_eq!(
            SessionState::Stopping.on(SessionEvent::StartRequested).unwrap(),
            SessionState::Starting
        );
    }

    #[test]
    fn test_failure_from_any_state() {
        for state in [
            SessionState::Idle,
            SessionState::Starting,
            SessionState::Running,
            SessionState::Stopping,
        ] {
            assert_eq!(state.on(SessionEvent::Failed).unwrap(), SessionState::Failed);
        }
    }

    // =====================================================================
    // Registry
    // =====================================================================

    #[test]
    fn test_unknown_agent_is_idle() {
        let registry = SessionRegistry::new();
        let session = registry.get("bot-1");
        assert_eq!(session.state, SessionState::Idle);
        assert!(session.active_job.is_none());
    }

    #[test]
    fn test_begin_records_active_job() {
        let registry = SessionRegistry::new();
        let job_id = Uuid::new_v4();
        let value = registry
            .begin("bot-1", SessionEvent::StartRequested, || ("created", Some(job_id)))
            .unwrap();
        assert_eq!(value, "created");

        let session = registry.get("bot-1");
        assert_eq!(session.state, SessionState::Starting);
        assert_eq!(session.active_job, Some(job_id));
    }

    #[test]
    fn test_begin_in_flight_reports_active_job() {
        let registry = SessionRegistry::new();
        let job_id = Uuid::new_v4();
        registry
            .begin("bot-1", SessionEvent::StartRequested, || ((), Some(job_id)))
            .unwrap();

        let mut called = false;
        let err = registry
            .begin("bot-1", SessionEvent::StartRequested, || {
                called = true;
                ((), Some(Uuid::new_v4()))
            })
            .unwrap_err();
        assert!(!called);
        assert_eq!(
            err,
            SessionError::InFlight {
                state: SessionState::Starting,
                job_id: Some(job_id)
            }
        );
    }

    #[test]
    fn test_begin_without_new_job_leaves_session() {
        let registry = SessionRegistry::new();
        registry
            .begin("bot-1", SessionEvent::StopRequested, || ((), None))
            .unwrap();
        assert_eq!(registry.get("bot-1").state, SessionState::Idle);
    }

    #[test]
    fn test_finish_applies_only_for_active_job() {
        let registry = SessionRegistry::new();
        let job_id = Uuid::new_v4();
        registry
            .begin("bot-1", SessionEvent::StartRequested, || ((), Some(job_id)))
            .unwrap();

        let stale = registry.finish("bot-1", Uuid::new_v4(), SessionEvent::Started, None);
        assert!(stale.is_none());
        assert_eq!(registry.get("bot-1").state, SessionState::Starting);

        let next = registry.finish(
            "bot-1",
            job_id,
            SessionEvent::Started,
            Some(json!({"active": true})),
        );
        assert_eq!(next, Some(SessionState::Running));
        let session = registry.get("bot-1");
        assert!(session.active_job.is_none());
        assert_eq!(session.snapshot["active"], true);
    }

    #[test]
    fn test_abandon_resets_to_idle() {
        let registry = SessionRegistry::new();
        let job_id = Uuid::new_v4();
        registry
            .begin("bot-1", SessionEvent::StopRequested, || ((), Some(job_id)))
            .unwrap();
        assert!(!registry.abandon("bot-1", Some(Uuid::new_v4())));
        assert!(registry.abandon("bot-1", Some(job_id)));
        assert_eq!(registry.get("bot-1").state, SessionState::Idle);
    }
}
