//! In-process executors.
//!
//! Used for `mode = "simulated"` dry runs and throughout the test suite. The
//! encoder settles into a commanded state only after a configurable number of
//! status polls, and both executors can be told to fail their next calls.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use super::{
    Artifact, ChatMessage, ClipRequest, EncoderControl, EncoderStatus, MarkerRequest,
    MessageReceipt, MetadataUpdate, PlatformApi,
};
use crate::error::ExecutorError;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// =============================================================================
// Encoder
// =============================================================================

#[derive(Debug, Default)]
struct EncoderState {
    active: bool,
    /// Commanded state not yet reached.
    target: Option<bool>,
    polls_remaining: u32,
}

/// Encoder that lives in memory.
#[derive(Debug, Default)]
pub struct SimulatedEncoder {
    state: Mutex<EncoderState>,
    settle_polls: u32,
    command_delay: Duration,
    command_failures: Mutex<VecDeque<ExecutorError>>,
    status_failures: Mutex<VecDeque<ExecutorError>>,
    start_calls: AtomicU32,
    stop_calls: AtomicU32,
    status_calls: AtomicU32,
    commands_in_flight: AtomicU32,
    max_commands_in_flight: AtomicU32,
}

impl SimulatedEncoder {
    /// An idle encoder that reaches a commanded state on the next poll.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_active(self, active: bool) -> Self {
        lock(&self.state).active = active;
        self
    }

    /// Number of status polls that still report the old state after a command.
    pub fn with_settle_polls(mut self, polls: u32) -> Self {
        self.settle_polls = polls;
        self
    }

    /// The encoder accepts commands but never changes state.
    pub fn never_settles(self) -> Self {
        self.with_settle_polls(u32::MAX)
    }

    /// Delay before each start/stop command completes.
    pub fn with_command_delay(mut self, delay: Duration) -> Self {
        self.command_delay = delay;
        self
    }

    /// Fail the next start/stop command with `err`. Queued failures are used in order.
    pub fn fail_next_command(&self, err: ExecutorError) {
        lock(&self.command_failures).push_back(err);
    }

    /// Fail the next status call with `err`.
    pub fn fail_next_status(&self, err: ExecutorError) {
        lock(&self.status_failures).push_back(err);
    }

    pub fn is_active(&self) -> bool {
        lock(&self.state).active
    }

    pub fn start_calls(&self) -> u32 {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> u32 {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> u32 {
        self.status_calls.load(Ordering::SeqCst)
    }

    /// Highest number of start/stop commands ever running at once.
    pub fn max_concurrent_commands(&self) -> u32 {
        self.max_commands_in_flight.load(Ordering::SeqCst)
    }

    async fn command(&self, target: bool) -> Result<(), ExecutorError> {
        let running = self.commands_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_commands_in_flight
            .fetch_max(running, Ordering::SeqCst);

        if !self.command_delay.is_zero() {
            tokio::time::sleep(self.command_delay).await;
        }

        let failure = lock(&self.command_failures).pop_front();
        let outcome = match failure {
            Some(err) => Err(err),
            None => {
                let mut state = lock(&self.state);
                if state.active != target {
                    state.target = Some(target);
                    state.polls_remaining = self.settle_polls;
                }
                Ok(())
            }
        };

        self.commands_in_flight.fetch_sub(1, Ordering::SeqCst);
        debug!(target, ok = outcome.is_ok(), "Simulated encoder command");
        outcome
    }
}

#[async_trait]
impl EncoderControl for SimulatedEncoder {
    async fn status(&self) -> Result<EncoderStatus, ExecutorError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = lock(&self.status_failures).pop_front() {
            return Err(err);
        }

        let mut state = lock(&self.state);
        if let Some(target) = state.target {
            if state.polls_remaining == 0 {
                state.active = target;
                state.target = None;
            } else {
                state.polls_remaining -= 1;
            }
        }
        Ok(EncoderStatus {
            active: state.active,
            snapshot: json!({"active": state.active, "simulated": true}),
        })
    }

    async fn start_output(&self) -> Result<(), ExecutorError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        self.command(true).await
    }

    async fn stop_output(&self) -> Result<(), ExecutorError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.command(false).await
    }

    async fn probe(&self) -> Result<(), ExecutorError> {
        Ok(())
    }
}

// =============================================================================
// Platform
// =============================================================================

/// A call received by [`SimulatedPlatform`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCall {
    UpdateMetadata(MetadataUpdate),
    SendMessage(ChatMessage),
    CreateClip(ClipRequest),
    CreateMarker(MarkerRequest),
}

/// Calls kept by [`SimulatedPlatform`]; older ones are dropped first.
pub const CALL_LOG_CAPACITY: usize = 256;

/// Platform that records its most recent calls and answers with synthetic ids.
#[derive(Debug, Default)]
pub struct SimulatedPlatform {
    calls: Mutex<VecDeque<PlatformCall>>,
    failures: Mutex<VecDeque<ExecutorError>>,
    delay: Duration,
    next_id: AtomicU64,
}

impl SimulatedPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay before each call completes.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail the next call with `err`.
    pub fn fail_next(&self, err: ExecutorError) {
        lock(&self.failures).push_back(err);
    }

    /// The most recent calls, oldest first, failed ones included.
    pub fn calls(&self) -> Vec<PlatformCall> {
        lock(&self.calls).iter().cloned().collect()
    }

    async fn record(&self, call: PlatformCall) -> Result<u64, ExecutorError> {
        {
            let mut calls = lock(&self.calls);
            if calls.len() == CALL_LOG_CAPACITY {
                calls.pop_front();
            }
            calls.push_back(call);
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(err) = lock(&self.failures).pop_front() {
            return Err(err);
        }
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl PlatformApi for SimulatedPlatform {
    async fn update_metadata(&self, update: &MetadataUpdate) -> Result<Vec<String>, ExecutorError> {
        self.record(PlatformCall::UpdateMetadata(update.clone()))
            .await?;
        Ok(update.fields())
    }

    async fn send_message(&self, message: &ChatMessage) -> Result<MessageReceipt, ExecutorError> {
        let id = self.record(PlatformCall::SendMessage(message.clone())).await?;
        Ok(MessageReceipt {
            message_id: Some(format!("sim-msg-{id}")),
        })
    }

    async fn create_clip(&self, request: &ClipRequest) -> Result<Artifact, ExecutorError> {
        let id = self.record(PlatformCall::CreateClip(request.clone())).await?;
        Ok(Artifact {
            artifact_id: format!("sim-clip-{id}"),
            url: Some(format!("https://clips.invalid/sim-clip-{id}")),
        })
    }

    async fn create_marker(&self, request: &MarkerRequest) -> Result<Artifact, ExecutorError> {
        let id = self.record(PlatformCall::CreateMarker(request.clone())).await?;
        Ok(Artifact {
            artifact_id: format!("sim-marker-{id}"),
            url: None,
        })
    }

    async fn probe(&self) -> Result<(), ExecutorError> {
        Ok(())
    }
}
