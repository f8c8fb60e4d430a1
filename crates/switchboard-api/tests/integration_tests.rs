//! Integration tests for the Switchboard HTTP surface.
//!
//! Each test builds its own router over simulated executors and drives it
//! with `oneshot`, so no sockets are opened.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use switchboard_action::executor::{SimulatedEncoder, SimulatedPlatform};
use switchboard_action::{Dispatcher, EncoderControl, ExecutorError, Executors, PlatformApi};
use switchboard_api::create_router;
use switchboard_api::handlers::JobAcceptedResponse;
use switchboard_api::state::AppState;
use switchboard_core::config::ActionsConfig;

// =============================================================================
// Helpers
// =============================================================================

struct Harness {
    state: AppState,
    encoder: Arc<SimulatedEncoder>,
    platform: Arc<SimulatedPlatform>,
}

fn fast_config() -> ActionsConfig {
    ActionsConfig {
        retry_base_delay_ms: 5,
        poll_interval_ms: 5,
        poll_timeout_ms: 500,
        ..ActionsConfig::default()
    }
}

fn harness_with(
    config: ActionsConfig,
    encoder: SimulatedEncoder,
    platform: SimulatedPlatform,
) -> Harness {
    let encoder = Arc::new(encoder);
    let platform = Arc::new(platform);
    let executors = Executors::new(
        Some(Arc::clone(&encoder) as Arc<dyn EncoderControl>),
        Some(Arc::clone(&platform) as Arc<dyn PlatformApi>),
    );
    Harness {
        state: AppState::new(Dispatcher::new(config, executors)),
        encoder,
        platform,
    }
}

fn harness() -> Harness {
    harness_with(fast_config(), SimulatedEncoder::new(), SimulatedPlatform::new())
}

impl Harness {
    fn app(&self) -> axum::Router {
        create_router(self.state.clone())
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn wait_terminal(h: &Harness, job_id: &str) -> Value {
    for _ in 0..400 {
        let resp = h.app().oneshot(get(&format!("/jobs/{}", job_id))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let job = body_json(resp).await;
        if job["status"] == "done" || job["status"] == "failed" {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("job {} did not finish", job_id);
}

// =============================================================================
// Health and registry
// =============================================================================

#[tokio::test]
async fn test_health_happy_path() {
    let h = harness();
    let resp = h.app().oneshot(get("/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_json(resp).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["encoder"]["configured"], true);
    assert_eq!(body["encoder"]["reachable"], true);
    assert_eq!(body["platform"]["reachable"], true);
    assert_eq!(body["jobs"], 0);
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_health_without_executors() {
    let state = AppState::new(Dispatcher::new(fast_config(), Executors::default()));
    let resp = create_router(state).oneshot(get("/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_json(resp).await;
    assert_eq!(body["encoder"]["configured"], false);
    assert_eq!(body["platform"]["configured"], false);
}

#[tokio::test]
async fn test_list_actions() {
    let h = harness();
    let resp = h.app().oneshot(get("/actions")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_json(resp).await;
    let actions = body["actions"].as_array().unwrap();
    assert_eq!(actions.len(), 7);
    assert_eq!(actions[0]["action"], "start_stream");
    assert_eq!(actions[0]["mode"], "async");

    let send_chat = actions
        .iter()
        .find(|a| a["action"] == "send_chat")
        .unwrap();
    assert_eq!(send_chat["mode"], "sync");
    assert!(send_chat["fields"]
        .as_array()
        .unwrap()
        .iter()
        .any(|f| f["name"] == "message" && f["required"] == true));
}

// =============================================================================
// POST /actions - sync
// =============================================================================

#[tokio::test]
async fn test_sync_action_returns_200() {
    let h = harness();
    let req = json!({
        "agent_id": "bot-1",
        "action": "send_chat",
        "args": {"message": "hello chat"}
    });
    let resp = h.app().oneshot(post_json("/actions", &req)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_json(resp).await;
    assert_eq!(body["accepted"], true);
    assert_eq!(body["action"], "send_chat");
    assert_eq!(body["status"], "done");
    assert_eq!(body["result"]["status"], "sent");
    assert!(body.get("error").is_none());
    assert_eq!(h.platform.calls().len(), 1);
}

#[tokio::test]
async fn test_sync_executor_failure_returns_502() {
    let h = harness();
    h.platform
        .fail_next(ExecutorError::NotFound("channel nobody".into()));
    let req = json!({
        "agent_id": "bot-1",
        "action": "set_title",
        "args": {"title": "Late night", "channel": "nobody"}
    });
    let resp = h.app().oneshot(post_json("/actions", &req)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

    let body = body_json(resp).await;
    assert_eq!(body["accepted"], true);
    assert_eq!(body["status"], "failed");
    assert!(body["error"].as_str().unwrap().contains("channel nobody"));
}

#[tokio::test]
async fn test_sync_timeout_returns_504() {
    let config = ActionsConfig {
        default_timeout_ms: 20,
        ..fast_config()
    };
    let h = harness_with(
        config,
        SimulatedEncoder::new(),
        SimulatedPlatform::new().with_delay(Duration::from_millis(500)),
    );
    let req = json!({
        "agent_id": "bot-1",
        "action": "create_marker",
        "args": {}
    });
    let resp = h.app().oneshot(post_json("/actions", &req)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);

    let body = body_json(resp).await;
    assert_eq!(body["status"], "failed");
    assert!(body["error"].as_str().unwrap().contains("timed out"));
}

// =============================================================================
// POST /actions - rejections
// =============================================================================

#[tokio::test]
async fn test_missing_field_returns_400() {
    let h = harness();
    let req = json!({
        "agent_id": "bot-1",
        "action": "send_chat",
        "args": {}
    });
    let resp = h.app().oneshot(post_json("/actions", &req)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body = body_json(resp).await;
    assert_eq!(body["error"], "missing_field");
    assert_eq!(body["details"]["accepted"], false);
    assert!(h.platform.calls().is_empty());
}

#[tokio::test]
async fn test_unexpected_field_returns_400() {
    let h = harness();
    let req = json!({
        "agent_id": "bot-1",
        "action": "set_title",
        "args": {"title": "ok", "shell": "rm -rf /"}
    });
    let resp = h.app().oneshot(post_json("/actions", &req)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(resp).await["error"], "unexpected_field");
    assert!(h.platform.calls().is_empty());
}

#[tokio::test]
async fn test_unknown_action_returns_400() {
    let h = harness();
    let req = json!({"agent_id": "bot-1", "action": "format_disk"});
    let resp = h.app().oneshot(post_json("/actions", &req)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(resp).await["error"], "unknown_action");
}

#[tokio::test]
async fn test_start_without_identity_returns_400() {
    let h = harness();
    let req = json!({
        "agent_id": "bot-1",
        "action": "start_stream",
        "args": {"channel": "x"}
    });
    let resp = h.app().oneshot(post_json("/actions", &req)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(resp).await["error"], "missing_request_identity");
    assert_eq!(h.encoder.start_calls(), 0);
}

#[tokio::test]
async fn test_malformed_body_returns_400() {
    let h = harness();
    let req = Request::post("/actions")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let resp = h.app().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(resp).await["error"], "bad_request");
}

#[tokio::test]
async fn test_rate_limited_returns_429() {
    let config = ActionsConfig {
        rate_limit_per_minute: 1,
        ..fast_config()
    };
    let h = harness_with(config, SimulatedEncoder::new(), SimulatedPlatform::new());
    let req = json!({
        "agent_id": "bot-1",
        "action": "set_title",
        "args": {"title": "first"}
    });

    let first = h.app().oneshot(post_json("/actions", &req)).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = h.app().oneshot(post_json("/actions", &req)).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = body_json(second).await;
    assert_eq!(body["error"], "rate_limited");
    assert_eq!(body["details"]["limit"], 1);
    assert_eq!(body["details"]["window_secs"], 60);
    assert_eq!(h.platform.calls().len(), 1);
}

// =============================================================================
// POST /actions - async and GET /jobs/{id}
// =============================================================================

#[tokio::test]
async fn test_start_stream_returns_202_and_completes() {
    let h = harness_with(
        fast_config(),
        SimulatedEncoder::new().with_settle_polls(2),
        SimulatedPlatform::new(),
    );
    let req = json!({
        "agent_id": "bot-1",
        "action": "start_stream",
        "args": {"channel": "x", "title": "Going live"},
        "request_id": "r1"
    });
    let resp = h.app().oneshot(post_json("/actions", &req)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let accepted: JobAcceptedResponse = serde_json::from_slice(&bytes).unwrap();
    assert!(accepted.accepted);
    assert!(!accepted.deduplicated);
    assert_eq!(accepted.job.request_id.as_deref(), Some("r1"));

    let job = wait_terminal(&h, &accepted.job.job_id.to_string()).await;
    assert_eq!(job["status"], "done");
    assert_eq!(job["progress"]["percent"], 100);
    assert_eq!(job["result"]["status"], "started");
    assert_eq!(h.encoder.start_calls(), 1);
}

#[tokio::test]
async fn test_replayed_request_id_returns_same_job() {
    let h = harness();
    let req = json!({
        "agent_id": "bot-1",
        "action": "stop_stream",
        "request_id": "stop-1"
    });

    let first = body_json(h.app().oneshot(post_json("/actions", &req)).await.unwrap()).await;
    let resp = h.app().oneshot(post_json("/actions", &req)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let second = body_json(resp).await;

    assert_eq!(first["job_id"], second["job_id"]);
    assert_eq!(second["deduplicated"], true);

    let job = wait_terminal(&h, first["job_id"].as_str().unwrap()).await;
    assert_eq!(job["result"]["status"], "already_stopped");
    assert_eq!(h.encoder.stop_calls(), 0);
}

#[tokio::test]
async fn test_get_job_not_found() {
    let h = harness();
    let uri = format!("/jobs/{}", uuid::Uuid::new_v4());
    let resp = h.app().oneshot(get(&uri)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(resp).await["error"], "not_found");
}

#[tokio::test]
async fn test_get_job_malformed_id() {
    let h = harness();
    let resp = h.app().oneshot(get("/jobs/not-a-uuid")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(resp).await["error"], "bad_request");
}
