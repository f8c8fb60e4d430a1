//! Action engine for Switchboard.
//!
//! Validates named actions against static schemas, rate limits them, and
//! runs them against the streaming encoder and broadcast platform, either
//! inline or as tracked background jobs serialized per agent.

pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod job;
pub mod process;
pub mod rate_limit;
pub mod schema;
pub mod serializer;
pub mod session;
pub mod sweeper;
pub mod types;

pub use dispatcher::{
    Dispatcher, ExecutorHealth, FailureKind, HealthReport, SubmitOutcome, SyncResult, SyncStatus,
};
pub use error::{DispatchError, ExecutorError, JobError, SessionError, ValidationError};
pub use executor::{EncoderControl, Executors, PlatformApi};
pub use job::JobStore;
pub use schema::ActionSchema;
pub use sweeper::spawn_sweeper;
pub use types::{ActionName, ActionRequest, Job, JobStatus, JobSummary};
