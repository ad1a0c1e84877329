//! Waymark Tutorial Tracker
//!
//! Tracks a learner's position and progress through a hierarchical,
//! versioned tutorial, driven by test-result events from an external runner.

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod navigator;
pub mod process;
pub mod progress;
pub mod session;
pub mod snapshot;
pub mod tutorial;

pub use api::{create_router, AppState, ErrorResponse, EventResponse};
pub use config::{Config, LogFormat};
pub use error::{Result, TrackerError};
pub use events::{EventBroadcaster, TrackerEvent};
pub use navigator::{advance_level, advance_stage, advance_step, Advance};
pub use process::{ProcessHandle, ProcessPhase, RunId, RunTracker, TestOutcome};
pub use progress::Progress;
pub use session::{
    apply_event, Disposition, Notice, SessionEvent, SessionState, SessionStatus, SessionView,
    Settled,
};
pub use snapshot::{SessionSnapshot, StateLock, STATE_VERSION};
pub use tutorial::{
    Level, Position, Stage, Step, StepActions, Tutorial, TutorialDocument, TutorialVersion,
    MAX_TUTORIAL_SIZE,
};
