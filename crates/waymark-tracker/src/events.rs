//! Outbound event stream for rendering collaborators.
//!
//! Every settled event is broadcast to connected WebSocket clients as a
//! fresh [`SessionView`], followed by the notices it produced.
//!
//! # Event Types
//!
//! - `connected` - Sent when a client connects, includes the current view
//! - `settled` - An inbound event settled; carries the new view
//! - `notice` - A test failure, load failure, structural problem or completion
//!
//! # Example
//!
//! ```no_run
//! use waymark_tracker::events::{EventBroadcaster, TrackerEvent};
//! use waymark_tracker::SessionState;
//!
//! # async fn example() {
//! let broadcaster = EventBroadcaster::new(100);
//! let mut receiver = broadcaster.subscribe();
//!
//! broadcaster.send(TrackerEvent::connected(SessionState::new().view()));
//!
//! if let Ok(event) = receiver.recv().await {
//!     println!("Received: {:?}", event);
//! }
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::api::AppState;
use crate::session::{Disposition, Notice, SessionView, Settled};

// ============================================================================
// Event Payloads
// ============================================================================

/// Payload for the `connected` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedPayload {
    /// The current session view.
    pub view: SessionView,
}

/// Payload for the `settled` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettledPayload {
    /// Wire name of the inbound event, e.g. `TEST_PASS`.
    pub event: String,
    /// Whether the event acted on state.
    pub disposition: Disposition,
    /// The session view after the event.
    pub view: SessionView,
}

// ============================================================================
// Event Enum
// ============================================================================

/// Events streamed to rendering collaborators.
///
/// Serialized as JSON objects with "event" and "payload" fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum TrackerEvent {
    /// Sent when a client connects.
    Connected(ConnectedPayload),
    /// Sent once per settled inbound event.
    Settled(SettledPayload),
    /// Sent for each notice a transition produced.
    Notice(Notice),
}

impl TrackerEvent {
    /// Creates a `Connected` event.
    #[must_use]
    pub const fn connected(view: SessionView) -> Self {
        Self::Connected(ConnectedPayload { view })
    }

    /// Creates a `Settled` event.
    #[must_use]
    pub fn settled(event: impl Into<String>, disposition: Disposition, view: SessionView) -> Self {
        Self::Settled(SettledPayload {
            event: event.into(),
            disposition,
            view,
        })
    }

    /// Returns the event name as a string.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Connected(_) => "connected",
            Self::Settled(_) => "settled",
            Self::Notice(_) => "notice",
        }
    }
}

// ============================================================================
// Event Broadcaster
// ============================================================================

/// Broadcasts tracker events to every subscriber.
///
/// Events are not persisted for disconnected clients.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<TrackerEvent>,
}

impl EventBroadcaster {
    /// Creates a new `EventBroadcaster` with the given per-subscriber buffer.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Creates a new subscriber.
    ///
    /// A subscriber that falls behind receives a `Lagged` error and misses
    /// some events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.sender.subscribe()
    }

    /// Broadcasts an event, returning the number of receivers.
    pub fn send(&self, event: TrackerEvent) -> usize {
        // send() returns Err only if there are no receivers, which is fine
        self.sender.send(event).unwrap_or(0)
    }

    /// Broadcasts a settled transition followed by its notices.
    pub fn publish(&self, event_name: &str, settled: &Settled) {
        self.send(TrackerEvent::settled(
            event_name,
            settled.disposition,
            settled.state.view(),
        ));
        for notice in &settled.notices {
            self.send(TrackerEvent::Notice(notice.clone()));
        }
    }

    /// Returns the number of active subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

// ============================================================================
// WebSocket Handler
// ============================================================================

/// Heartbeat ping interval.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Maximum number of missed pong responses before disconnecting.
const MAX_MISSED_PONGS: u8 = 3;

/// WebSocket upgrade handler for `/ws`.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    info!("New WebSocket connection request");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Streams events to one client until it leaves or stops answering pings.
///
/// The client first gets `connected` with the current view, then every
/// broadcast event in order.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();

    // Subscribe before reading the view so no settle slips between them
    let mut events = state.broadcaster.subscribe();
    let view = state.session.lock().await.view();

    if !forward(&mut sink, &TrackerEvent::connected(view)).await {
        return;
    }
    debug!("Stream client attached");

    let mut heartbeat = interval(HEARTBEAT_INTERVAL);
    let mut unanswered = 0u8;

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Pong(_))) => unanswered = 0,
                Some(Ok(Message::Ping(data))) => {
                    if sink.send(Message::Pong(data)).await.is_err() {
                        break;
                    }
                }
                // Outbound only; inbound events go through the HTTP API
                Some(Ok(Message::Text(_) | Message::Binary(_))) => {}
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
            },

            event = events.recv() => match event {
                Ok(event) => {
                    if !forward(&mut sink, &event).await {
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "Stream client lagged, events skipped");
                }
                Err(RecvError::Closed) => break,
            },

            _ = heartbeat.tick() => {
                if unanswered >= MAX_MISSED_PONGS {
                    info!(unanswered, "Stream client stopped answering pings");
                    break;
                }
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
                unanswered += 1;
            }
        }
    }

    debug!("Stream client detached");
}

/// Sends one event as a JSON text frame.
///
/// Returns `false` once the client is gone. An event that fails to
/// serialize is logged and skipped.
async fn forward(sink: &mut SplitSink<WebSocket, Message>, event: &TrackerEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(json) => sink.send(Message::Text(json)).await.is_ok(),
        Err(e) => {
            warn!(error = %e, event = event.event_name(), "Failed to serialize event");
            true
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
