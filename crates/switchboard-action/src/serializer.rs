//! Per-agent execution serializer.
//!
//! Each agent has a chain of turns. A turn is reserved synchronously with
//! [`AgentSerializer::enqueue`], which links it behind the agent's current
//! tail, and becomes runnable once its predecessor has released, whether the
//! predecessor finished, failed or panicked. Different agents never wait on
//! each other.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tracing::trace;

type Tails = Arc<Mutex<HashMap<String, Tail>>>;

/// Most recently reserved turn for an agent.
struct Tail {
    seq: u64,
    /// Resolves when that turn releases.
    released: oneshot::Receiver<()>,
}

/// Serializes work per agent id, in submission order.
#[derive(Clone, Default)]
pub struct AgentSerializer {
    tails: Tails,
    next_seq: Arc<AtomicU64>,
}

impl AgentSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next turn for `agent_id`.
    ///
    /// Ordering is fixed here, not when the turn is awaited.
    pub fn enqueue(&self, agent_id: &str) -> Turn {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        let predecessor = {
            let mut tails = self.tails.lock().unwrap_or_else(|e| e.into_inner());
            tails.insert(
                agent_id.to_string(),
                Tail {
                    seq,
                    released: rx,
                },
            )
        };
        trace!(agent_id, seq, queued_behind = predecessor.is_some(), "Turn reserved");

        Turn {
            slot: Some(Slot {
                agent_id: agent_id.to_string(),
                seq,
                tails: Arc::clone(&self.tails),
                release: Some(tx),
            }),
            wait: predecessor.map(|t| t.released),
        }
    }

    /// Run `fut` once every earlier turn for `agent_id` has released.
    pub async fn with_lock<F, T>(&self, agent_id: &str, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let _guard = self.enqueue(agent_id).acquire().await;
        fut.await
    }

    /// Number of agents with a reserved or running turn.
    pub fn active_agents(&self) -> usize {
        self.tails.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Release side of a turn. Dropping it lets the successor run and clears the
/// agent's entry if no successor has been reserved.
struct Slot {
    agent_id: String,
    seq: u64,
    tails: Tails,
    release: Option<oneshot::Sender<()>>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        if let Some(tx) = self.release.take() {
            let _ = tx.send(());
        }
        let mut tails = self.tails.lock().unwrap_or_else(|e| e.into_inner());
        if tails.get(&self.agent_id).map(|t| t.seq) == Some(self.seq) {
            tails.remove(&self.agent_id);
        }
    }
}

/// A reserved, not yet running turn.
pub struct Turn {
    slot: Option<Slot>,
    wait: Option<oneshot::Receiver<()>>,
}

impl Turn {
    /// Wait for the predecessor to release, then hold the turn until the
    /// returned guard is dropped.
    pub async fn acquire(mut self) -> TurnGuard {
        if let Some(wait) = self.wait.as_mut() {
            // a dropped sender also means the predecessor is gone
            let _ = wait.await;
        }
        self.wait = None;
        TurnGuard {
            _slot: self.slot.take(),
        }
    }
}

impl Drop for Turn {
    fn drop(&mut self) {
        // Abandoned before running: keep the chain intact by releasing only
        // after the predecessor does.
        if let (Some(slot), Some(wait)) = (self.slot.take(), self.wait.take()) {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        let _ = wait.await;
                        drop(slot);
                    });
                }
                Err(_) => drop(slot),
            }
        }
    }
}

/// Held while a turn's body runs.
pub struct TurnGuard {
    _slot: Option<Slot>,
}
