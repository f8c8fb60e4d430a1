//! Job state machine with validated transitions.
//!
//! Queued -> Running -> Done/Failed
//! Queued -> Failed

use crate::error::JobError;
use crate::types::JobStatus;

/// Validate that a status transition is allowed.
///
/// Valid transitions:
/// - Queued -> Running
/// - Queued -> Failed (failure before execution was granted)
/// - Running -> Done
/// - Running -> Failed
///
/// Done and Failed are terminal.
pub fn validate_transition(from: JobStatus, to: JobStatus) -> Result<(), JobError> {
    let valid = matches!(
        (from, to),
        (JobStatus::Queued, JobStatus::Running)
            | (JobStatus::Queued, JobStatus::Failed)
            | (JobStatus::Running, JobStatus::Done)
            | (JobStatus::Running, JobStatus::Failed)
    );

    if valid {
        Ok(())
    } else {
        Err(JobError::InvalidTransition(from, to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =====================================================================
    // Valid transitions
    // =====================================================================

    #[test]
    fn test_queued_to_running() {
        assert!(validate_transition(JobStatus::Queued, JobStatus::Running).is_ok());
    }

    #[test]
    fn test_queued_to_failed() {
        assert!(validate_transition(JobStatus::Queued, JobStatus::Failed).is_ok());
    }

    #[test]
    fn test_running_to_done() {
        assert!(validate_transition(JobStatus::Running, JobStatus::Done).is_ok());
    }

    #[test]
    fn test_running_to_failed() {
        assert!(validate_transition(JobStatus::Running, JobStatus::Failed).is_ok());
    }

    // =====================================================================
    // Invalid transitions
    // =====================================================================

    #[test]
    fn test_queued_to_done_skips_running() {
        let err = validate_transition(JobStatus::Queued, JobStatus::Done).unwrap_err();
        assert_eq!(err, JobError::InvalidTransition(JobStatus::Queued, JobStatus::Done));
    }

    #[test]
    fn test_running_to_queued() {
        assert!(validate_transition(JobStatus::Running, JobStatus::Queued).is_err());
    }

    #[test]
    fn test_terminal_states_are_final() {
        for from in [JobStatus::Done, JobStatus::Failed] {
            for to in [
                JobStatus::Queued,
                JobStatus::Running,
                JobStatus::Done,
                JobStatus::Failed,
            ] {
                assert!(
                    validate_transition(from, to).is_err(),
                    "{from} -> {to} should be rejected"
                );
            }
        }
    }

    #[test]
    fn test_self_transitions_rejected() {
        assert!(validate_transition(JobStatus::Queued, JobStatus::Queued).is_err());
        assert!(validate_transition(JobStatus::Running, JobStatus::Running).is_err());
    }
}
