//! External executors: the streaming encoder and the broadcast platform.
//!
//! The engine only talks to these through the [`EncoderControl`] and
//! [`PlatformApi`] traits. HTTP and in-process simulated implementations are
//! provided; which one is used is decided by configuration.

pub mod http;
pub mod simulated;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use switchboard_core::config::{EncoderConfig, ExecutorMode, PlatformConfig};
use switchboard_core::{SwitchboardConfig, SwitchboardError};
use tracing::info;

use crate::error::ExecutorError;

pub use http::{HttpEncoder, HttpPlatform};
pub use simulated::{SimulatedEncoder, SimulatedPlatform};

// =============================================================================
// Request and response types
// =============================================================================

/// Encoder state as last reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderStatus {
    /// Whether output is currently live.
    pub active: bool,
    /// Raw status document, kept for the agent session.
    pub snapshot: Value,
}

/// Broadcast metadata change. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game_id: Option<String>,
}

impl MetadataUpdate {
    /// True when the update would change nothing. The channel alone is not a change.
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.game_name.is_none() && self.game_id.is_none()
    }

    /// Names of the fields this update sets.
    pub fn fields(&self) -> Vec<String> {
        [
            ("title", &self.title),
            ("game_name", &self.game_name),
            ("game_id", &self.game_id),
        ]
        .into_iter()
        .filter(|(_, v)| v.is_some())
        .map(|(name, _)| name.to_string())
        .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    pub message: String,
    pub announce: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    pub has_delay: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Something the platform created on request: a clip or a marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub artifact_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageReceipt {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

// =============================================================================
// Traits
// =============================================================================

/// Control surface of a streaming encoder.
///
/// `start_output` and `stop_output` must be idempotent: they may be re-issued
/// after a transport failure.
#[async_trait]
pub trait EncoderControl: Send + Sync {
    async fn status(&self) -> Result<EncoderStatus, ExecutorError>;

    async fn start_output(&self) -> Result<(), ExecutorError>;

    async fn stop_output(&self) -> Result<(), ExecutorError>;

    /// Cheap reachability check.
    async fn probe(&self) -> Result<(), ExecutorError>;
}

/// Remote broadcast platform API.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    /// Apply a metadata change and return the names of the fields applied.
    async fn update_metadata(&self, update: &MetadataUpdate) -> Result<Vec<String>, ExecutorError>;

    async fn send_message(&self, message: &ChatMessage) -> Result<MessageReceipt, ExecutorError>;

    async fn create_clip(&self, request: &ClipRequest) -> Result<Artifact, ExecutorError>;

    async fn create_marker(&self, request: &MarkerRequest) -> Result<Artifact, ExecutorError>;

    /// Cheap reachability check.
    async fn probe(&self) -> Result<(), ExecutorError>;
}

// =============================================================================
// Bundle
// =============================================================================

/// The executors available to the dispatcher. Either may be absent.
#[derive(Clone, Default)]
pub struct Executors {
    pub encoder: Option<Arc<dyn EncoderControl>>,
    pub platform: Option<Arc<dyn PlatformApi>>,
}

impl Executors {
    pub fn new(
        encoder: Option<Arc<dyn EncoderControl>>,
        platform: Option<Arc<dyn PlatformApi>>,
    ) -> Self {
        Self { encoder, platform }
    }

    pub fn encoder(&self) -> Result<&Arc<dyn EncoderControl>, ExecutorError> {
        self.encoder
            .as_ref()
            .ok_or(ExecutorError::NotConfigured("encoder"))
    }

    pub fn platform(&self) -> Result<&Arc<dyn PlatformApi>, ExecutorError> {
        self.platform
            .as_ref()
            .ok_or(ExecutorError::NotConfigured("platform"))
    }

    /// Build executors as described by configuration.
    pub fn from_config(config: &SwitchboardConfig) -> Result<Self, SwitchboardError> {
        Ok(Self {
            encoder: build_encoder(&config.encoder)?,
            platform: build_platform(&config.platform)?,
        })
    }
}

fn build_encoder(
    config: &EncoderConfig,
) -> Result<Option<Arc<dyn EncoderControl>>, SwitchboardError> {
    let encoder: Arc<dyn EncoderControl> = match config.mode {
        ExecutorMode::Disabled => return Ok(None),
        ExecutorMode::Simulated => Arc::new(SimulatedEncoder::new()),
        ExecutorMode::Http => {
            let base_url = config.base_url.as_deref().ok_or_else(|| {
                SwitchboardError::ExecutorSetup("encoder.base_url is not set".to_string())
            })?;
            Arc::new(HttpEncoder::new(
                base_url,
                config.api_token.clone(),
                Duration::from_millis(config.request_timeout_ms),
            )?)
        }
    };
    info!(mode = ?config.mode, "Encoder executor configured");
    Ok(Some(encoder))
}

fn build_platform(
    config: &PlatformConfig,
) -> Result<Option<Arc<dyn PlatformApi>>, SwitchboardError> {
    let platform: Arc<dyn PlatformApi> = match config.mode {
        ExecutorMode::Disabled => return Ok(None),
        ExecutorMode::Simulated => Arc::new(SimulatedPlatform::new()),
        ExecutorMode::Http => {
            let base_url = config.base_url.as_deref().ok_or_else(|| {
                SwitchboardError::ExecutorSetup("platform.base_url is not set".to_string())
            })?;
            Arc::new(
                HttpPlatform::new(
                    base_url,
                    config.api_token.clone(),
                    Duration::from_millis(config.request_timeout_ms),
                )?
                .with_default_channel(config.default_channel.clone()),
            )
        }
    };
    info!(mode = ?config.mode, "Platform executor configured");
    Ok(Some(platform))
}
