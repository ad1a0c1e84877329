//! HTTP API for the editor host.
//!
//! The host drives the session through this boundary: it supplies the
//! tutorial, requests test runs, relays runner results and moves the cursor.
//! Every mutation goes through [`AppState::dispatch`], one event at a time.
//!
//! # Endpoints
//!
//! - `GET /api/status` - Current session view
//! - `POST /api/events` - Apply an inbound event
//! - `POST /api/runs/:run_id/result` - Relay a raw test-runner result
//! - `GET /ws` - Outbound event stream
//!
//! # Example
//!
//! ```no_run
//! use waymark_tracker::{create_router, AppState, Config};
//!
//! # async fn example() {
//! let router = create_router(AppState::new(Config::default()));
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await.unwrap();
//! axum::serve(listener, router).await.unwrap();
//! # }
//! ```

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

use crate::error::{Result, TrackerError};
use crate::events::{ws_handler, EventBroadcaster};
use crate::process::{ProcessHandle, RunId, TestOutcome};
use crate::session::{apply_event, Disposition, Notice, SessionEvent, SessionState, SessionView, Settled};
use crate::Config;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Response body for an applied or dropped event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventResponse {
    /// Whether the event was accepted (not rejected).
    pub accepted: bool,
    /// Whether the event acted on state.
    pub disposition: Disposition,
    /// Process handle emitted by the event, for `RUN_TEST` and `TEST_RUN`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<ProcessHandle>,
    /// Notifications produced by the event.
    pub notices: Vec<Notice>,
    /// The session view after the event.
    pub view: SessionView,
}

impl From<&Settled> for EventResponse {
    fn from(settled: &Settled) -> Self {
        Self {
            accepted: true,
            disposition: settled.disposition,
            process: settled.process.clone(),
            notices: settled.notices.clone(),
            view: settled.state.view(),
        }
    }
}

/// Error response body returned on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Description of the error.
    pub error: String,
}

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for the HTTP server.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Tracker configuration.
    pub config: Config,
    /// The session, replaced wholesale after each settled event.
    pub session: Arc<Mutex<SessionState>>,
    /// Outbound event stream.
    pub broadcaster: EventBroadcaster,
}

impl AppState {
    /// Creates a new `AppState` with an uninitialized session.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self::with_state(config, SessionState::new())
    }

    /// Creates a new `AppState` around an existing session.
    ///
    /// Used when resuming from a snapshot.
    #[must_use]
    pub fn with_state(config: Config, session: SessionState) -> Self {
        let broadcaster = EventBroadcaster::new(config.event_capacity);
        Self {
            config,
            session: Arc::new(Mutex::new(session)),
            broadcaster,
        }
    }

    /// Applies one event to the session.
    ///
    /// Holds the session lock for the whole transition, replaces the state
    /// when the event settles and broadcasts the result before releasing it.
    ///
    /// # Errors
    ///
    /// Returns the rejection from [`apply_event`]; the session is unchanged.
    pub async fn dispatch(&self, event: SessionEvent) -> Result<Settled> {
        let name = event.name();
        let mut session = self.session.lock().await;

        match apply_event(&session, event) {
            Ok(settled) => {
                *session = settled.state.clone();
                if settled.disposition == Disposition::Applied {
                    info!(
                        event = name,
                        status = %session.status(),
                        position = ?session.position().map(ToString::to_string),
                        notices = settled.notices.len(),
                        "Event applied"
                    );
                }
                self.broadcaster.publish(name, &settled);
                Ok(settled)
            }
            Err(e) if e.is_rejection() => {
                warn!(event = name, status = %session.status(), error = %e, "Event rejected");
                Err(e)
            }
            Err(e) => {
                error!(event = name, status = %session.status(), error = %e, "Event failed");
                Err(e)
            }
        }
    }
}

// ============================================================================
// API Error Type
// ============================================================================

/// Error type for API handlers.
#[derive(Debug)]
struct ApiError(TrackerError);

impl From<TrackerError> for ApiError {
    fn from(err: TrackerError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            TrackerError::InvalidTransition { .. } | TrackerError::RunMismatch { .. } => {
                StatusCode::CONFLICT
            }
            TrackerError::NotFound { .. } | TrackerError::UnknownVersion { .. } => {
                StatusCode::NOT_FOUND
            }
            TrackerError::InvalidTutorial { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(ErrorResponse {
            error: self.0.to_string(),
        });
        (status, body).into_response()
    }
}

// ============================================================================
// Router Setup
// ============================================================================

/// Creates the HTTP router.
///
/// Routes the API under `/api` and the event stream at `/ws`, with CORS
/// open for local development and request tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/status", get(handle_status))
        .route("/events", post(handle_event))
        .route("/runs/:run_id/result", post(handle_run_result));

    Router::new()
        .nest("/api", api_routes)
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(Arc::new(state))
}

// ============================================================================
// Handlers
// ============================================================================

/// Handler for `GET /api/status`.
async fn handle_status(State(state): State<Arc<AppState>>) -> Json<SessionView> {
    Json(state.session.lock().await.view())
}

/// Handler for `POST /api/events`.
///
/// A load that leaves the session in `loading` answers 422 with the full
/// response so the host still sees the notice and view.
async fn handle_event(
    State(state): State<Arc<AppState>>,
    Json(event): Json<SessionEvent>,
) -> std::result::Result<(StatusCode, Json<EventResponse>), ApiError> {
    info!(event = event.name(), "Received event");

    let settled = state.dispatch(event).await?;
    let status = if settled
        .notices
        .iter()
        .any(|n| matches!(n, Notice::InvalidTutorial { .. }))
    {
        StatusCode::UNPROCESSABLE_ENTITY
    } else {
        StatusCode::OK
    };

    Ok((status, Json(EventResponse::from(&settled))))
}

/// Handler for `POST /api/runs/:run_id/result`.
///
/// The body is whatever the test runner produced. Anything that does not
/// read as a test outcome is treated as a runner error.
async fn handle_run_result(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<u64>,
    body: Bytes,
) -> std::result::Result<Json<EventResponse>, ApiError> {
    let raw: serde_json::Value = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    let step_id = raw
        .get("stepId")
        .and_then(serde_json::Value::as_str)
        .map(ToString::to_string);
    let outcome = TestOutcome::from_value(raw);

    info!(run_id, outcome = ?outcome, "Received runner result");

    let event = SessionEvent::from_outcome(RunId(run_id), step_id, outcome);
    let settled = state.dispatch(event).await?;
    Ok(Json(EventResponse::from(&settled)))
}

// ============================================================================
// Tests
// ============================================================================
