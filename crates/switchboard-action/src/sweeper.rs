//! Background eviction of expired jobs.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::job::JobStore;

/// Sweep `jobs` every `interval` until the returned handle is aborted.
///
/// The first sweep happens one interval after spawning.
pub fn spawn_sweeper(jobs: Arc<JobStore>, interval: Duration) -> JoinHandle<()> {
    info!(interval_secs = interval.as_secs(), "Job sweeper started");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let stats = jobs.sweep();
            debug!(
                jobs_removed = stats.jobs_removed,
                keys_removed = stats.keys_removed,
                remaining = jobs.len(),
                "Sweep finished"
            );
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::NewJob;
    use crate::types::{ActionName, Args, RequestIdentity};

    fn new_job() -> NewJob {
        NewJob {
            action: ActionName::StopStream,
            agent_id: "bot-1".to_string(),
            identity: RequestIdentity::default(),
            args: Args::new(),
        }
    }

    #[tokio::test]
    async fn test_sweeper_evicts_expired_jobs() {
        let jobs = Arc::new(JobStore::new(Duration::from_millis(20)));
        jobs.create_or_get("stop_stream:auto:x", new_job());
        assert_eq!(jobs.len(), 1);

        let handle = spawn_sweeper(Arc::clone(&jobs), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(150)).await;
        handle.abort();

        assert!(jobs.is_empty());
        assert_eq!(jobs.idempotency_len(), 0);
    }

    #[tokio::test]
    async fn test_sweeper_keeps_fresh_jobs() {
        let jobs = Arc::new(JobStore::new(Duration::from_secs(3600)));
        let job = jobs.create(new_job());

        let handle = spawn_sweeper(Arc::clone(&jobs), Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(40)).await;
        handle.abort();

        assert!(jobs.contains(job.id));
    }
}
