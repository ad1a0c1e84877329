//! Integration tests for WebSocket event streaming.
//!
//! These tests validate the `/ws` endpoint: the initial `connected` event,
//! settled transitions and notices fanned out to every client, and
//! disconnect handling.

use std::net::TcpListener;
use std::time::Duration;

use futures::SinkExt;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use waymark_tracker::{
    create_router, AppState, Config, Disposition, Notice, SessionEvent, SessionStatus,
    TrackerEvent, Tutorial,
};

/// Helper to find an available port for testing.
fn find_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

/// Loads the shared fixture tutorial.
fn fixture_tutorial() -> Tutorial {
    serde_json::from_str(include_str!("fixtures/tutorial.json")).expect("Invalid fixture")
}

/// Helper type for WebSocket client
type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Spawns the test server and returns the WebSocket URL.
async fn spawn_test_server(state: AppState) -> (String, tokio::task::JoinHandle<()>) {
    let port = find_available_port();
    let addr = format!("127.0.0.1:{port}");
    let ws_url = format!("ws://{addr}/ws");

    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");

    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    // Give the server a moment to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    (ws_url, handle)
}

/// Connects a WebSocket client to the given URL.
async fn connect_client(url: &str) -> WsClient {
    let (ws_stream, _) = connect_async(url)
        .await
        .expect("Failed to connect to WebSocket");
    ws_stream
}

/// Receives the next text message and parses it as a `TrackerEvent`.
/// Answers ping frames with a pong.
async fn receive_event(client: &mut WsClient) -> TrackerEvent {
    loop {
        let msg = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("Timeout waiting for message")
            .expect("Stream ended")
            .expect("WebSocket error");

        match msg {
            Message::Text(text) => {
                return serde_json::from_str(&text).expect("Failed to parse event");
            }
            Message::Ping(data) => {
                client
                    .send(Message::Pong(data))
                    .await
                    .expect("Failed to send pong");
            }
            Message::Pong(_) => {}
            other => panic!("Expected text message, got: {other:?}"),
        }
    }
}

/// Creates app state with the fixture tutorial loaded.
async fn loaded_state() -> AppState {
    let state = AppState::new(Config::default());
    state
        .dispatch(SessionEvent::LoadTutorial {
            tutorial: fixture_tutorial(),
            version: None,
        })
        .await
        .expect("Failed to load tutorial");
    state
}

// ============================================================================
// Connection Tests
// ============================================================================

/// Tests that a fresh client receives a connected event with an empty session.
#[tokio::test]
async fn test_client_receives_connected_event_on_connect() {
    let state = AppState::new(Config::default());
    let (ws_url, _handle) = spawn_test_server(state).await;

    let mut client = connect_client(&ws_url).await;
    let event = receive_event(&mut client).await;

    match event {
        TrackerEvent::Connected(payload) => {
            assert_eq!(payload.view.status, SessionStatus::Uninitialized);
            assert!(payload.view.position.is_none());
            assert!(payload.view.process.is_none());
        }
        other => panic!("Expected Connected event, got: {other:?}"),
    }
}

/// Tests that the connected event reflects the current session.
#[tokio::test]
async fn test_connected_event_contains_current_view() {
    let state = loaded_state().await;
    let (ws_url, _handle) = spawn_test_server(state).await;

    let mut client = connect_client(&ws_url).await;
    let event = receive_event(&mut client).await;

    match event {
        TrackerEvent::Connected(payload) => {
            assert_eq!(payload.view.status, SessionStatus::Ready);
            assert_eq!(payload.view.tutorial_id.as_deref(), Some("js-basics"));
            assert_eq!(payload.view.tutorial_version.as_deref(), Some("0.2.0"));
            let position = payload.view.position.expect("Expected a position");
            assert_eq!(position.step_id, "1.1");
        }
        other => panic!("Expected Connected event, got: {other:?}"),
    }
}

// ============================================================================
// Broadcast Tests
// ============================================================================

/// Tests that multiple clients can connect concurrently.
#[tokio::test]
async fn test_multiple_clients_can_connect() {
    let state = AppState::new(Config::default());
    let (ws_url, _handle) = spawn_test_server(state).await;

    let mut client1 = connect_client(&ws_url).await;
    let mut client2 = connect_client(&ws_url).await;
    let mut client3 = connect_client(&ws_url).await;

    assert!(matches!(receive_event(&mut client1).await, TrackerEvent::Connected(_)));
    assert!(matches!(receive_event(&mut client2).await, TrackerEvent::Connected(_)));
    assert!(matches!(receive_event(&mut client3).await, TrackerEvent::Connected(_)));
}

/// Tests that a dispatched transition reaches every client.
#[tokio::test]
async fn test_settled_event_broadcast_to_all_clients() {
    let state = loaded_state().await;
    let dispatcher = state.clone();
    let (ws_url, _handle) = spawn_test_server(state).await;

    let mut client1 = connect_client(&ws_url).await;
    let mut client2 = connect_client(&ws_url).await;
    receive_event(&mut client1).await;
    receive_event(&mut client2).await;

    dispatcher
        .dispatch(SessionEvent::RunTest {
            step_id: "1.1".to_string(),
        })
        .await
        .expect("RUN_TEST rejected");

    for client in [&mut client1, &mut client2] {
        match receive_event(client).await {
            TrackerEvent::Settled(payload) => {
                assert_eq!(payload.event, "RUN_TEST");
                assert_eq!(payload.disposition, Disposition::Applied);
                assert_eq!(payload.view.status, SessionStatus::Testing);
                let process = payload.view.process.expect("Expected a process");
                assert_eq!(process.step_id, "1.1");
            }
            other => panic!("Expected Settled event, got: {other:?}"),
        }
    }
}

/// Tests that notices follow the settled event that raised them.
#[tokio::test]
async fn test_notice_follows_settled_event() {
    let state = loaded_state().await;
    let dispatcher = state.clone();
    let (ws_url, _handle) = spawn_test_server(state).await;

    let mut client = connect_client(&ws_url).await;
    receive_event(&mut client).await;

    let settled = dispatcher
        .dispatch(SessionEvent::RunTest {
            step_id: "1.1".to_string(),
        })
        .await
        .expect("RUN_TEST rejected");
    let run_id = settled.process.expect("Expected a process").run_id;
    receive_event(&mut client).await;

    dispatcher
        .dispatch(SessionEvent::TestFail {
            run_id,
            step_id: Some("1.1".to_string()),
            message: Some("expected 3, got 2".to_string()),
        })
        .await
        .expect("TEST_FAIL rejected");

    match receive_event(&mut client).await {
        TrackerEvent::Settled(payload) => {
            assert_eq!(payload.event, "TEST_FAIL");
            assert_eq!(payload.view.status, SessionStatus::Ready);
        }
        other => panic!("Expected Settled event, got: {other:?}"),
    }
    match receive_event(&mut client).await {
        TrackerEvent::Notice(Notice::TestFailed { step_id, message }) => {
            assert_eq!(step_id, "1.1");
            assert_eq!(message.as_deref(), Some("expected 3, got 2"));
        }
        other => panic!("Expected TestFailed notice, got: {other:?}"),
    }
}

/// Tests that a stale result is broadcast as dropped without changing the view.
#[tokio::test]
async fn test_stale_result_broadcast_as_dropped() {
    let state = loaded_state().await;
    let dispatcher = state.clone();
    let (ws_url, _handle) = spawn_test_server(state).await;

    let mut client = connect_client(&ws_url).await;
    receive_event(&mut client).await;

    let run = SessionEvent::RunTest {
        step_id: "1.1".to_string(),
    };
    let first = dispatcher.dispatch(run.clone()).await.expect("RUN_TEST rejected");
    let stale = first.process.expect("Expected a process").run_id;
    dispatcher.dispatch(run).await.expect("RUN_TEST rejected");
    receive_event(&mut client).await;
    receive_event(&mut client).await;

    dispatcher
        .dispatch(SessionEvent::TestPass {
            run_id: stale,
            step_id: None,
        })
        .await
        .expect("Stale result should settle");

    match receive_event(&mut client).await {
        TrackerEvent::Settled(payload) => {
            assert_eq!(payload.event, "TEST_PASS");
            assert_eq!(payload.disposition, Disposition::Dropped);
            assert_eq!(payload.view.status, SessionStatus::Testing);
            assert!(payload.view.progress.is_empty());
        }
        other => panic!("Expected Settled event, got: {other:?}"),
    }
}

// ============================================================================
// API Integration Tests
// ============================================================================

/// Tests that HTTP results drive the cascade and stream to clients.
#[tokio::test]
async fn test_api_triggers_websocket_events() {
    let state = loaded_state().await;
    let (ws_url, _handle) = spawn_test_server(state).await;

    let mut client = connect_client(&ws_url).await;
    receive_event(&mut client).await;

    let http_url = ws_url.replace("ws://", "http://").replace("/ws", "");
    let http = reqwest::Client::new();

    let response = http
        .post(format!("{http_url}/api/events"))
        .json(&serde_json::json!({"type": "RUN_TEST", "payload": {"stepId": "1.1"}}))
        .send()
        .await
        .expect("Failed to send HTTP request");
    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.expect("Invalid response body");
    let run_id = body["process"]["runId"].as_u64().expect("Missing runId");

    let event = receive_event(&mut client).await;
    assert!(
        matches!(event, TrackerEvent::Settled(_)),
        "Expected Settled event, got: {event:?}"
    );

    let response = http
        .post(format!("{http_url}/api/runs/{run_id}/result"))
        .json(&serde_json::json!({"outcome": "pass", "stepId": "1.1"}))
        .send()
        .await
        .expect("Failed to send HTTP request");
    assert!(response.status().is_success());

    match receive_event(&mut client).await {
        TrackerEvent::Settled(payload) => {
            assert_eq!(payload.event, "TEST_PASS");
            assert_eq!(payload.view.status, SessionStatus::Ready);
            let position = payload.view.position.expect("Expected a position");
            assert_eq!(position.step_id, "1.2");
            assert!(payload.view.progress.is_step_complete("1.1"));
        }
        other => panic!("Expected Settled event, got: {other:?}"),
    }
}

// ============================================================================
// Disconnection Tests
// ============================================================================

/// Tests that a client can cleanly disconnect.
#[tokio::test]
async fn test_client_can_disconnect() {
    let state = AppState::new(Config::default());
    let (ws_url, _handle) = spawn_test_server(state).await;

    let mut client = connect_client(&ws_url).await;
    receive_event(&mut client).await;

    client
        .close(None)
        .await
        .expect("Failed to close connection");
}

/// Tests that the server keeps broadcasting after a client disconnects.
#[tokio::test]
async fn test_server_continues_after_client_disconnect() {
    let state = loaded_state().await;
    let dispatcher = state.clone();
    let (ws_url, _handle) = spawn_test_server(state).await;

    let mut client1 = connect_client(&ws_url).await;
    receive_event(&mut client1).await;
    client1.close(None).await.ok();
    drop(client1);

    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut client2 = connect_client(&ws_url).await;
    assert!(matches!(receive_event(&mut client2).await, TrackerEvent::Connected(_)));

    dispatcher
        .dispatch(SessionEvent::ResetProgress)
        .await
        .expect("RESET_PROGRESS rejected");
    match receive_event(&mut client2).await {
        TrackerEvent::Settled(payload) => assert_eq!(payload.event, "RESET_PROGRESS"),
        other => panic!("Expected Settled event, got: {other:?}"),
    }
}
