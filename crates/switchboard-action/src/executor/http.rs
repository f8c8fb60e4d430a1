//! JSON-over-HTTP executors.
//!
//! Encoder endpoints:
//! - `GET  /status`        -> `{"active": bool, ...}`
//! - `POST /stream/start`
//! - `POST /stream/stop`
//!
//! Platform endpoints:
//! - `PATCH /channels`      -> optional `{"applied": [..]}`
//! - `POST  /chat/messages` -> optional `{"id": ..}`
//! - `POST  /clips`         -> `{"id": .., "url"?: ..}`
//! - `POST  /markers`       -> `{"id": ..}`
//! - `GET   /health`
//!
//! Requests carry a bearer token when one is configured.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde_json::Value;
use switchboard_core::SwitchboardError;
use tracing::debug;

use super::{
    Artifact, ChatMessage, ClipRequest, EncoderControl, EncoderStatus, MarkerRequest,
    MessageReceipt, MetadataUpdate, PlatformApi,
};
use crate::error::ExecutorError;

/// Connection details shared by both executors.
#[derive(Clone)]
struct HttpClient {
    base_url: String,
    api_token: Option<String>,
    client: reqwest::Client,
}

impl HttpClient {
    fn new(
        base_url: &str,
        api_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, SwitchboardError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SwitchboardError::ExecutorSetup(format!("HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn call<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Value, ExecutorError> {
        let mut request = self.client.request(method.clone(), self.url(path));
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ExecutorError::Transport(format!("{method} {path}: {e}")))?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ExecutorError::Transport(format!("{method} {path}: {e}")))?;
        debug!(%method, path, %status, "Executor call finished");

        if !status.is_success() {
            return Err(status_error(&method, path, status, &bytes));
        }
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|e| {
            ExecutorError::Protocol(format!("{method} {path}: invalid JSON response: {e}"))
        })
    }
}

fn status_error(method: &Method, path: &str, status: StatusCode, body: &[u8]) -> ExecutorError {
    let message = serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("message")
                .and_then(|v| v.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| String::from_utf8_lossy(body).trim().to_string());
    let detail = format!("{method} {path} returned {status}: {message}");

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ExecutorError::Unauthorized(detail),
        StatusCode::NOT_FOUND => ExecutorError::NotFound(detail),
        _ => ExecutorError::Protocol(detail),
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

// =============================================================================
// Encoder
// =============================================================================

/// Encoder controller reached over HTTP.
#[derive(Clone)]
pub struct HttpEncoder {
    http: HttpClient,
}

impl HttpEncoder {
    pub fn new(
        base_url: &str,
        api_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, SwitchboardError> {
        Ok(Self {
            http: HttpClient::new(base_url, api_token, timeout)?,
        })
    }
}

#[async_trait]
impl EncoderControl for HttpEncoder {
    async fn status(&self) -> Result<EncoderStatus, ExecutorError> {
        let snapshot = self.http.call::<()>(Method::GET, "/status", None).await?;
        let active = snapshot
            .get("active")
            .and_then(|v| v.as_bool())
            .ok_or_else(|| {
                ExecutorError::Protocol("GET /status: response has no boolean 'active'".to_string())
            })?;
        Ok(EncoderStatus { active, snapshot })
    }

    async fn start_output(&self) -> Result<(), ExecutorError> {
        self.http
            .call::<()>(Method::POST, "/stream/start", None)
            .await
            .map(|_| ())
    }

    async fn stop_output(&self) -> Result<(), ExecutorError> {
        self.http
            .call::<()>(Method::POST, "/stream/stop", None)
            .await
            .map(|_| ())
    }

    async fn probe(&self) -> Result<(), ExecutorError> {
        self.status().await.map(|_| ())
    }
}

// =============================================================================
// Platform
// =============================================================================

/// Broadcast platform reached over HTTP.
#[derive(Clone)]
pub struct HttpPlatform {
    http: HttpClient,
    default_channel: Option<String>,
}

impl HttpPlatform {
    pub fn new(
        base_url: &str,
        api_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, SwitchboardError> {
        Ok(Self {
            http: HttpClient::new(base_url, api_token, timeout)?,
            default_channel: None,
        })
    }

    /// Channel used when a request does not name one.
    pub fn with_default_channel(mut self, channel: Option<String>) -> Self {
        self.default_channel = channel;
        self
    }

    fn channel(&self, requested: &Option<String>) -> Option<String> {
        requested.clone().or_else(|| self.default_channel.clone())
    }
}

#[async_trait]
impl PlatformApi for HttpPlatform {
    async fn update_metadata(&self, update: &MetadataUpdate) -> Result<Vec<String>, ExecutorError> {
        let body = MetadataUpdate {
            channel: self.channel(&update.channel),
            ..update.clone()
        };
        let response = self
            .http
            .call(Method::PATCH, "/channels", Some(&body))
            .await?;

        let applied = response
            .get("applied")
            .and_then(|v| v.as_array())
            .map(|fields| {
                fields
                    .iter()
                    .filter_map(|f| f.as_str().map(str::to_string))
                    .collect()
            });
        Ok(applied.unwrap_or_else(|| update.fields()))
    }

    async fn send_message(&self, message: &ChatMessage) -> Result<MessageReceipt, ExecutorError> {
        let body = ChatMessage {
            channel: self.channel(&message.channel),
            ..message.clone()
        };
        let response = self
            .http
            .call(Method::POST, "/chat/messages", Some(&body))
            .await?;
        Ok(MessageReceipt {
            message_id: string_field(&response, "id"),
        })
    }

    async fn create_clip(&self, request: &ClipRequest) -> Result<Artifact, ExecutorError> {
        let body = ClipRequest {
            channel: self.channel(&request.channel),
            ..request.clone()
        };
        let response = self.http.call(Method::POST, "/clips", Some(&body)).await?;
        let artifact_id = string_field(&response, "id").ok_or_else(|| {
            ExecutorError::Protocol("POST /clips: response has no 'id'".to_string())
        })?;
        Ok(Artifact {
            artifact_id,
            url: string_field(&response, "url"),
        })
    }

    async fn create_marker(&self, request: &MarkerRequest) -> Result<Artifact, ExecutorError> {
        let body = MarkerRequest {
            channel: self.channel(&request.channel),
            ..request.clone()
        };
        let response = self.http.call(Method::POST, "/markers", Some(&body)).await?;
        let artifact_id = string_field(&response, "id").ok_or_else(|| {
            ExecutorError::Protocol("POST /markers: response has no 'id'".to_string())
        })?;
        Ok(Artifact {
            artifact_id,
            url: None,
        })
    }

    async fn probe(&self) -> Result<(), ExecutorError> {
        self.http
            .call::<()>(Method::GET, "/health", None)
            .await
            .map(|_| ())
    }
}
