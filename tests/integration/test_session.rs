//! Integration tests for a tracker session driven over HTTP.
//!
//! These tests serve the real router on a loopback port and walk a learner
//! through the fixture tutorial the way an editor host would, then check
//! that the session survives a save and restore.

use std::net::TcpListener;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::{json, Value};
use waymark_tracker::{
    create_router, AppState, Config, SessionSnapshot, SessionState, SessionStatus, StateLock,
    TrackerError, Tutorial,
};

/// Helper to find an available port for testing.
fn find_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

/// Path to the shared fixture tutorial.
fn fixture_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures/tutorial.json")
}

/// Loads the fixture tutorial as a JSON value for request bodies.
fn fixture_json() -> Value {
    serde_json::from_str(include_str!("fixtures/tutorial.json")).expect("Invalid fixture")
}

/// Returns a scratch directory unique to one test.
fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("waymark-it-{name}-{}", std::process::id()));
    std::fs::remove_dir_all(&dir).ok();
    dir
}

/// A served tracker with an HTTP client pointed at it.
struct TestServer {
    base_url: String,
    http: reqwest::Client,
    state: AppState,
    _handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Spawns a tracker with a fresh session.
    async fn spawn() -> Self {
        let state = AppState::new(Config::default());
        let port = find_available_port();
        let addr = format!("127.0.0.1:{port}");

        let router = create_router(state.clone());
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind");
        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.expect("Server failed");
        });

        // Give the server a moment to start
        tokio::time::sleep(Duration::from_millis(50)).await;

        Self {
            base_url: format!("http://{addr}"),
            http: reqwest::Client::new(),
            state,
            _handle: handle,
        }
    }

    /// Posts an inbound event and returns the status code and body.
    async fn event(&self, event: Value) -> (u16, Value) {
        let response = self
            .http
            .post(format!("{}/api/events", self.base_url))
            .json(&event)
            .send()
            .await
            .expect("Failed to send event");
        let status = response.status().as_u16();
        (status, response.json().await.expect("Invalid response body"))
    }

    /// Posts a raw runner result for a run.
    async fn result(&self, run_id: u64, body: &str) -> (u16, Value) {
        let response = self
            .http
            .post(format!("{}/api/runs/{run_id}/result", self.base_url))
            .header("content-type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .expect("Failed to send result");
        let status = response.status().as_u16();
        (status, response.json().await.expect("Invalid response body"))
    }

    /// Fetches the current view.
    async fn status(&self) -> Value {
        self.http
            .get(format!("{}/api/status", self.base_url))
            .send()
            .await
            .expect("Failed to get status")
            .json()
            .await
            .expect("Invalid status body")
    }

    /// Loads the fixture tutorial, optionally pinning a version.
    async fn load(&self, version: Option<&str>) -> (u16, Value) {
        let mut payload = json!({ "tutorial": fixture_json() });
        if let Some(version) = version {
            payload["version"] = json!(version);
        }
        self.event(json!({"type": "LOAD_TUTORIAL", "payload": payload}))
            .await
    }

    /// Runs the tests for a step and returns the run id.
    async fn run_test(&self, step_id: &str) -> u64 {
        let (status, body) = self
            .event(json!({"type": "RUN_TEST", "payload": {"stepId": step_id}}))
            .await;
        assert_eq!(status, 200, "RUN_TEST rejected: {body}");
        body["process"]["runId"].as_u64().expect("Missing runId")
    }

    /// Runs and passes the current step.
    async fn pass_current(&self) -> Value {
        let view = self.status().await;
        let step_id = view["position"]["stepId"]
            .as_str()
            .expect("No current step")
            .to_string();
        let run_id = self.run_test(&step_id).await;
        let (status, body) = self
            .result(run_id, &json!({"outcome": "pass", "stepId": step_id}).to_string())
            .await;
        assert_eq!(status, 200, "Result rejected: {body}");
        body
    }
}

// ============================================================================
// Loading Tests
// ============================================================================

/// Tests that loading picks the latest published version.
#[tokio::test]
async fn test_load_selects_latest_published_version() {
    let server = TestServer::spawn().await;

    let (status, body) = server.load(None).await;

    assert_eq!(status, 200);
    assert_eq!(body["accepted"], true);
    assert_eq!(body["view"]["status"], "ready");
    assert_eq!(body["view"]["tutorialId"], "js-basics");
    assert_eq!(body["view"]["tutorialVersion"], "0.2.0");
    assert_eq!(
        body["view"]["position"],
        json!({"levelId": "L1", "stageId": "S1", "stepId": "1.1"})
    );
}

/// Tests that an explicit version, even an unpublished one, can be followed.
#[tokio::test]
async fn test_load_pinned_version() {
    let server = TestServer::spawn().await;

    let (status, body) = server.load(Some("0.3.0-draft")).await;

    assert_eq!(status, 200);
    assert_eq!(body["view"]["tutorialVersion"], "0.3.0-draft");
}

/// Tests that an unknown version is rejected and the session stays empty.
#[tokio::test]
async fn test_load_unknown_version_returns_404() {
    let server = TestServer::spawn().await;

    let (status, body) = server.load(Some("9.9.9")).await;

    assert_eq!(status, 404);
    assert!(body["error"].as_str().is_some_and(|e| e.contains("9.9.9")));
    assert_eq!(server.status().await["status"], "uninitialized");
}

/// Tests that a second load is rejected once the session is ready.
#[tokio::test]
async fn test_second_load_is_invalid_transition() {
    let server = TestServer::spawn().await;
    server.load(None).await;

    let (status, _) = server.load(None).await;

    assert_eq!(status, 409);
}

// ============================================================================
// Test Run Tests
// ============================================================================

/// Walks the whole fixture, checking each cascade step.
#[tokio::test]
async fn test_full_walk_through_tutorial() {
    let server = TestServer::spawn().await;
    server.load(None).await;

    let body = server.pass_current().await;
    assert_eq!(body["view"]["position"]["stepId"], "1.2");
    assert_eq!(body["view"]["progress"]["steps"]["1.1"], true);

    // Last step of S1 moves into S2 and completes the stage
    let body = server.pass_current().await;
    assert_eq!(body["view"]["position"]["stageId"], "S2");
    assert_eq!(body["view"]["position"]["stepId"], "1.3");
    assert_eq!(body["view"]["progress"]["stages"]["S1"], true);

    // Last step of L1 crosses into L2
    let body = server.pass_current().await;
    assert_eq!(
        body["view"]["position"],
        json!({"levelId": "L2", "stageId": "S3", "stepId": "2.1"})
    );
    assert_eq!(body["view"]["progress"]["stages"]["S2"], true);

    let body = server.pass_current().await;
    assert_eq!(body["view"]["status"], "finished");
    assert_eq!(body["notices"], json!([{"kind": "tutorial_finished"}]));
    assert_eq!(body["view"]["position"]["stepId"], "2.1");
    assert_eq!(body["view"]["progress"]["steps"]["2.1"], true);
    assert_eq!(body["view"]["progress"]["stages"]["S3"], true);

    // No more runs once finished
    let (status, _) = server
        .event(json!({"type": "RUN_TEST", "payload": {"stepId": "2.1"}}))
        .await;
    assert_eq!(status, 409);
}

/// Tests the running and failing path keeps the learner in place.
#[tokio::test]
async fn test_run_then_fail_returns_to_ready() {
    let server = TestServer::spawn().await;
    server.load(None).await;
    let run_id = server.run_test("1.1").await;

    let (status, body) = server.result(run_id, r#"{"outcome": "run"}"#).await;
    assert_eq!(status, 200);
    assert_eq!(body["view"]["process"]["phase"], "running");
    assert_eq!(body["notices"][0]["kind"], "test_running");

    let (status, body) = server
        .result(run_id, r#"{"outcome": "fail", "message": "expected 3, got 2"}"#)
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["view"]["status"], "ready");
    assert!(body["view"]["process"].is_null());
    assert_eq!(body["view"]["position"]["stepId"], "1.1");
    assert_eq!(
        body["notices"],
        json!([{"kind": "test_failed", "stepId": "1.1", "message": "expected 3, got 2"}])
    );
}

/// Tests that an unreadable runner payload is reported as an error.
#[tokio::test]
async fn test_unreadable_result_becomes_error_notice() {
    let server = TestServer::spawn().await;
    server.load(None).await;
    let run_id = server.run_test("1.1").await;

    let (status, body) = server.result(run_id, "Segmentation fault (core dumped)").await;

    assert_eq!(status, 200);
    assert_eq!(body["view"]["status"], "ready");
    assert_eq!(body["notices"][0]["kind"], "test_errored");
    assert!(body["view"]["progress"]["steps"]
        .as_object()
        .is_some_and(serde_json::Map::is_empty));
}

/// Tests that a superseded run's result is dropped.
#[tokio::test]
async fn test_superseded_run_result_is_dropped() {
    let server = TestServer::spawn().await;
    server.load(None).await;
    let first = server.run_test("1.1").await;
    let second = server.run_test("1.1").await;
    assert!(second > first);

    let (status, body) = server.result(first, r#"{"outcome": "pass"}"#).await;
    assert_eq!(status, 200);
    assert_eq!(body["disposition"], "dropped");
    assert_eq!(body["view"]["status"], "testing");
    assert_eq!(body["view"]["position"]["stepId"], "1.1");

    let (_, body) = server.result(second, r#"{"outcome": "pass"}"#).await;
    assert_eq!(body["disposition"], "applied");
    assert_eq!(body["view"]["position"]["stepId"], "1.2");
}

/// Tests that running a step other than the current one is rejected.
#[tokio::test]
async fn test_run_for_wrong_step_returns_409() {
    let server = TestServer::spawn().await;
    server.load(None).await;

    let (status, body) = server
        .event(json!({"type": "RUN_TEST", "payload": {"stepId": "1.3"}}))
        .await;

    assert_eq!(status, 409);
    assert!(body["error"].as_str().is_some_and(|e| e.contains("1.3")));
    assert_eq!(server.status().await["status"], "ready");
}

// ============================================================================
// Cursor Control Tests
// ============================================================================

/// Tests jump, restart and reset between runs.
#[tokio::test]
async fn test_jump_restart_and_reset() {
    let server = TestServer::spawn().await;
    server.load(None).await;
    server.pass_current().await;

    let (status, body) = server
        .event(json!({
            "type": "JUMP_TO_POSITION",
            "payload": {"levelId": "L2", "stageId": "S3", "stepId": "2.1"}
        }))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["view"]["position"]["stepId"], "2.1");
    assert_eq!(body["view"]["progress"]["steps"]["1.1"], true);

    let (status, body) = server.event(json!({"type": "RESTART"})).await;
    assert_eq!(status, 200);
    assert_eq!(body["view"]["position"]["stepId"], "1.1");
    assert_eq!(body["view"]["progress"]["steps"]["1.1"], true);

    let (status, body) = server.event(json!({"type": "RESET_PROGRESS"})).await;
    assert_eq!(status, 200);
    assert_eq!(body["view"]["position"]["stepId"], "1.1");
    assert_eq!(body["view"]["progress"], json!({"steps": {}, "stages": {}}));
}

/// Tests that jumping to a step outside its stage is not found.
#[tokio::test]
async fn test_jump_to_unscoped_step_returns_404() {
    let server = TestServer::spawn().await;
    server.load(None).await;

    let (status, _) = server
        .event(json!({
            "type": "JUMP_TO_POSITION",
            "payload": {"levelId": "L1", "stageId": "S1", "stepId": "1.3"}
        }))
        .await;

    assert_eq!(status, 404);
}

/// Tests that cursor control is refused while a run is in flight.
#[tokio::test]
async fn test_restart_during_run_returns_409() {
    let server = TestServer::spawn().await;
    server.load(None).await;
    server.run_test("1.1").await;

    let (status, _) = server.event(json!({"type": "RESTART"})).await;

    assert_eq!(status, 409);
    assert_eq!(server.status().await["status"], "testing");
}

// ============================================================================
// Persistence Tests
// ============================================================================

/// Tests that a served session can be saved and restored.
#[tokio::test]
async fn test_session_survives_save_and_restore() {
    let server = TestServer::spawn().await;
    server.load(None).await;
    server.pass_current().await;
    server.pass_current().await;
    server.run_test("1.3").await;

    let dir = scratch_dir("restore");
    let state_path = dir.join("session.json");
    let snapshot = server
        .state
        .session
        .lock()
        .await
        .snapshot()
        .expect("Loaded session has a snapshot");
    snapshot.save(&state_path).await.expect("Failed to save");

    let loaded = SessionSnapshot::load(&state_path)
        .await
        .expect("Failed to load")
        .expect("Snapshot missing");
    let tutorial = Tutorial::load(fixture_path()).expect("Failed to load tutorial");
    let restored = SessionState::restore(&tutorial, &loaded).expect("Failed to restore");

    // An in-flight run does not survive a restart
    assert_eq!(restored.status(), SessionStatus::Ready);
    assert!(restored.process().is_none());
    assert_eq!(restored.position().map(|p| p.step_id.as_str()), Some("1.3"));
    assert!(restored.progress().is_stage_complete("S1"));
    assert_eq!(restored.progress().completed_steps(), 2);

    std::fs::remove_dir_all(&dir).ok();
}

/// Tests that a second tracker cannot share a state file.
#[tokio::test]
async fn test_state_lock_is_exclusive() {
    let dir = scratch_dir("lock");
    let state_path = dir.join("session.json");

    let lock = StateLock::acquire(&state_path)
        .await
        .expect("First lock should succeed");
    let err = StateLock::acquire(&state_path)
        .await
        .expect_err("Second lock should fail");
    assert!(matches!(err, TrackerError::SessionAlreadyRunning { .. }));

    drop(lock);
    let relock = StateLock::acquire(&state_path)
        .await
        .expect("Lock should be free after drop");
    drop(relock);

    std::fs::remove_dir_all(&dir).ok();
}
