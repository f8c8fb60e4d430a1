//! Composed executor operations.
//!
//! Start and stop are "ensure" operations: check the encoder, return early if
//! it is already in the target state, otherwise issue the command (retried
//! with backoff on retryable errors) and poll until the target state holds or
//! the poll timeout passes. The remaining actions are single platform calls.

use std::future::Future;
use std::time::Duration;

use serde_json::{json, Map, Value};
use switchboard_core::config::ActionsConfig;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::ExecutorError;
use crate::executor::{
    ChatMessage, ClipRequest, EncoderControl, Executors, MarkerRequest, MetadataUpdate,
};
use crate::types::{ActionName, Args};

/// Progress callback: percent complete and a short message.
pub type ProgressFn<'a> = &'a (dyn Fn(u8, &str) + Send + Sync);

/// Retry and polling parameters for start/stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessPolicy {
    pub retry_attempts: u32,
    pub retry_base_delay: Duration,
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
}

impl ProcessPolicy {
    pub fn from_config(config: &ActionsConfig) -> Self {
        Self {
            retry_attempts: config.retry_attempts.max(1),
            retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            poll_timeout: Duration::from_millis(config.poll_timeout_ms),
        }
    }
}

impl Default for ProcessPolicy {
    fn default() -> Self {
        Self::from_config(&ActionsConfig::default())
    }
}

/// Run `op` up to `attempts` times.
///
/// Only retryable errors are retried. The delay before attempt `n + 1` is
/// `base_delay * 2^(n - 1)`.
pub async fn retry_with_backoff<T, F, Fut>(
    attempts: u32,
    base_delay: Duration,
    label: &str,
    mut op: F,
) -> Result<T, ExecutorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ExecutorError>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < attempts => {
                let delay = base_delay.saturating_mul(1u32 << (attempt - 1).min(16));
                warn!(
                    operation = label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying after failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Running,
    Stopped,
}

impl Target {
    fn active(self) -> bool {
        self == Target::Running
    }

    fn as_str(self) -> &'static str {
        match self {
            Target::Running => "running",
            Target::Stopped => "stopped",
        }
    }
}

/// Executes validated actions against the configured executors.
#[derive(Clone)]
pub struct ProcessController {
    executors: Executors,
    policy: ProcessPolicy,
}

impl ProcessController {
    pub fn new(executors: Executors, policy: ProcessPolicy) -> Self {
        Self { executors, policy }
    }

    pub fn executors(&self) -> &Executors {
        &self.executors
    }

    /// Run `action` with already validated `args`.
    pub async fn run(
        &self,
        action: ActionName,
        args: &Args,
        progress: ProgressFn<'_>,
    ) -> Result<Map<String, Value>, ExecutorError> {
        match action {
            ActionName::StartStream => self.start_process(args, progress).await,
            ActionName::StopStream => self.stop_process(args, progress).await,
            ActionName::SetTitle | ActionName::SetGame => self.set_metadata(args).await,
            ActionName::SendChat => self.post_message(args).await,
            ActionName::CreateClip | ActionName::CreateMarker => {
                self.create_artifact(action, args).await
            }
        }
    }

    // =========================================================================
    // Start / stop
    // =========================================================================

    /// Apply any requested metadata, then make sure the encoder is live.
    ///
    /// A metadata failure is recorded under `metadata` and does not stop the start.
    pub async fn start_process(
        &self,
        args: &Args,
        progress: ProgressFn<'_>,
    ) -> Result<Map<String, Value>, ExecutorError> {
        let update = MetadataUpdate {
            channel: str_arg(args, "channel"),
            title: str_arg(args, "title"),
            game_name: str_arg(args, "game_name"),
            game_id: None,
        };

        let metadata = if update.is_empty() {
            None
        } else {
            progress(10, "applying metadata");
            Some(match self.executors.platform() {
                Ok(platform) => match platform.update_metadata(&update).await {
                    Ok(applied) => json!({"status": "updated", "applied": applied}),
                    Err(err) => {
                        warn!(error = %err, "Metadata update before start failed");
                        json!({"status": "failed", "error": err.to_string()})
                    }
                },
                Err(err) => json!({"status": "skipped", "reason": err.to_string()}),
            })
        };

        let mut result = self.ensure_state(Target::Running, progress).await?;
        if let Some(metadata) = metadata {
            result.insert("metadata".to_string(), metadata);
        }
        Ok(result)
    }

    /// Make sure the encoder is not live.
    pub async fn stop_process(
        &self,
        args: &Args,
        progress: ProgressFn<'_>,
    ) -> Result<Map<String, Value>, ExecutorError> {
        let mut result = self.ensure_state(Target::Stopped, progress).await?;
        if let Some(reason) = str_arg(args, "reason") {
            result.insert("reason".to_string(), Value::String(reason));
        }
        Ok(result)
    }

    async fn ensure_state(
        &self,
        target: Target,
        progress: ProgressFn<'_>,
    ) -> Result<Map<String, Value>, ExecutorError> {
        let encoder = self.executors.encoder()?;

        progress(20, "checking encoder status");
        let initial = encoder.status().await?;
        if initial.active == target.active() {
            let status = match target {
                Target::Running => "already_running",
                Target::Stopped => "already_stopped",
            };
            info!(state = target.as_str(), "Encoder already in target state");
            return Ok(result_map(status, initial.snapshot));
        }

        let (label, verb) = match target {
            Target::Running => ("start_output", "started"),
            Target::Stopped => ("stop_output", "stopped"),
        };
        progress(35, &format!("issuing {label}"));
        retry_with_backoff(
            self.policy.retry_attempts,
            self.policy.retry_base_delay,
            label,
            move || async move {
                match target {
                    Target::Running => encoder.start_output().await,
                    Target::Stopped => encoder.stop_output().await,
                }
            },
        )
        .await?;

        let snapshot = self.wait_for(&**encoder, target, progress).await?;
        Ok(result_map(verb, snapshot))
    }

    /// Poll until the encoder reports `target` or the poll timeout passes.
    /// Status errors while polling are logged and polling continues.
    async fn wait_for(
        &self,
        encoder: &dyn EncoderControl,
        target: Target,
        progress: ProgressFn<'_>,
    ) -> Result<Value, ExecutorError> {
        let started = Instant::now();
        let deadline = started + self.policy.poll_timeout;
        let timeout_ms = self.policy.poll_timeout.as_millis().max(1);

        loop {
            match encoder.status().await {
                Ok(status) if status.active == target.active() => return Ok(status.snapshot),
                Ok(_) => {}
                Err(err) => warn!(error = %err, "Encoder status poll failed"),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ExecutorError::TargetStateNotReached {
                    target: target.as_str(),
                    waited_ms: now.duration_since(started).as_millis() as u64,
                });
            }

            let elapsed = now.duration_since(started).as_millis();
            let percent = 50 + (elapsed * 40 / timeout_ms).min(40) as u8;
            progress(percent, &format!("waiting for encoder to be {}", target.as_str()));

            let pause = self.policy.poll_interval.min(deadline - now);
            tokio::time::sleep(pause).await;
        }
    }

    // =========================================================================
    // Platform actions
    // =========================================================================

    /// Update title/category. An update with nothing to change is skipped
    /// without calling the platform.
    pub async fn set_metadata(&self, args: &Args) -> Result<Map<String, Value>, ExecutorError> {
        let update = MetadataUpdate {
            channel: str_arg(args, "channel"),
            title: str_arg(args, "title"),
            game_name: str_arg(args, "game_name"),
            game_id: str_arg(args, "game_id"),
        };
        if update.is_empty() {
            let mut result = Map::new();
            result.insert("status".to_string(), Value::from("skipped"));
            return Ok(result);
        }

        let applied = self.executors.platform()?.update_metadata(&update).await?;
        let mut result = Map::new();
        result.insert("status".to_string(), Value::from("updated"));
        result.insert("applied".to_string(), json!(applied));
        Ok(result)
    }

    pub async fn post_message(&self, args: &Args) -> Result<Map<String, Value>, ExecutorError> {
        let message = ChatMessage {
            channel: str_arg(args, "channel"),
            message: str_arg(args, "message").unwrap_or_default(),
            announce: bool_arg(args, "announce"),
            color: str_arg(args, "color"),
        };
        let receipt = self.executors.platform()?.send_message(&message).await?;

        let mut result = Map::new();
        result.insert("status".to_string(), Value::from("sent"));
        if let Some(id) = receipt.message_id {
            result.insert("message_id".to_string(), Value::String(id));
        }
        Ok(result)
    }

    /// Create a clip or a marker.
    pub async fn create_artifact(
        &self,
        action: ActionName,
        args: &Args,
    ) -> Result<Map<String, Value>, ExecutorError> {
        let platform = self.executors.platform()?;
        let artifact = match action {
            ActionName::CreateMarker => {
                platform
                    .create_marker(&MarkerRequest {
                        channel: str_arg(args, "channel"),
                        description: str_arg(args, "description"),
                    })
                    .await?
            }
            _ => {
                platform
                    .create_clip(&ClipRequest {
                        channel: str_arg(args, "channel"),
                        has_delay: bool_arg(args, "has_delay"),
                    })
                    .await?
            }
        };

        let mut result = Map::new();
        result.insert("status".to_string(), Value::from("created"));
        result.insert("artifact_id".to_string(), Value::String(artifact.artifact_id));
        if let Some(url) = artifact.url {
            result.insert("url".to_string(), Value::String(url));
        }
        Ok(result)
    }
}

fn result_map(status: &str, snapshot: Value) -> Map<String, Value> {
    let mut result = Map::new();
    result.insert("status".to_string(), Value::from(status));
    result.insert("snapshot".to_string(), snapshot);
    result
}

fn str_arg(args: &Args, key: &str) -> Option<String> {
    args.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

fn bool_arg(args: &Args, key: &str) -> bool {
    args.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
}
