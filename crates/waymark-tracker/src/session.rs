//! Tutorial session machine.
//!
//! [`apply_event`] is the single transition function: it takes the current
//! [`SessionState`] and one [`SessionEvent`] and returns either a fully
//! settled new state or a rejection. Nothing is mutated in place, so a
//! rejected event leaves the caller's state exactly as it was.
//!
//! The status transitions through these states:
//! - `Uninitialized` -> `Loading` -> `Ready`
//! - `Ready` -> `Testing` (run requested) -> `Testing` (re-armed)
//! - From `Testing`:
//!   - `Ready` (fail, error, pass with a next step, structural inconsistency)
//!   - `Finished` (pass on the last step of the tutorial)
//! - `Ready` / `Finished` -> `Ready` (jump, restart, reset progress)

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, TrackerError};
use crate::navigator::{advance_level, advance_stage, advance_step, Advance};
use crate::process::{ProcessHandle, RunId, RunTracker, TestOutcome};
use crate::progress::Progress;
use crate::snapshot::{SessionSnapshot, STATE_VERSION};
use crate::tutorial::{Position, Tutorial, TutorialDocument};

/// Message used when the runner reports an error without detail.
const DEFAULT_ERROR_MESSAGE: &str = "test runner reported an error";

// ============================================================================
// SessionStatus
// ============================================================================

/// Named state of the session machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No tutorial has been requested.
    #[default]
    Uninitialized,
    /// A tutorial was requested but is not navigable yet.
    Loading,
    /// Idle at a position, no test running.
    Ready,
    /// A test run is in flight.
    Testing,
    /// Every step of the tutorial has been passed.
    Finished,
}

impl SessionStatus {
    /// Returns `true` if the session accepts cursor control events.
    ///
    /// # Examples
    ///
    /// ```
    /// use waymark_tracker::SessionStatus;
    ///
    /// assert!(SessionStatus::Ready.accepts_cursor_control());
    /// assert!(SessionStatus::Finished.accepts_cursor_control());
    /// assert!(!SessionStatus::Testing.accepts_cursor_control());
    /// ```
    #[must_use]
    pub const fn accepts_cursor_control(&self) -> bool {
        matches!(self, Self::Ready | Self::Finished)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Testing => "testing",
            Self::Finished => "finished",
        };
        f.write_str(name)
    }
}

// ============================================================================
// SessionEvent
// ============================================================================

/// Inbound event from the host.
///
/// Wire form is `{"type": "RUN_TEST", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionEvent {
    /// Supplies the tutorial, optionally pinning a version.
    LoadTutorial {
        /// The tutorial payload.
        tutorial: Tutorial,
        /// Version to select; the latest published one when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },

    /// Requests a test run for the current step.
    #[serde(rename_all = "camelCase")]
    RunTest {
        /// Must equal the current position's step.
        step_id: String,
    },

    /// The runner started executing tests.
    #[serde(rename_all = "camelCase")]
    TestRun {
        /// Run the report belongs to.
        run_id: RunId,
    },

    /// Tests passed.
    #[serde(rename_all = "camelCase")]
    TestPass {
        /// Run the result belongs to.
        run_id: RunId,
        /// Step the result belongs to, if the runner knows it.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step_id: Option<String>,
    },

    /// Tests ran and failed.
    #[serde(rename_all = "camelCase")]
    TestFail {
        /// Run the result belongs to.
        run_id: RunId,
        /// Step the result belongs to, if the runner knows it.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step_id: Option<String>,
        /// Failure detail.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// The runner failed to produce a result.
    #[serde(rename_all = "camelCase")]
    TestError {
        /// Run the result belongs to.
        run_id: RunId,
        /// Step the result belongs to, if the runner knows it.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step_id: Option<String>,
        /// Error detail.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Moves the cursor directly.
    JumpToPosition(Position),

    /// Moves the cursor back to the first step.
    Restart,

    /// Clears all completion flags.
    ResetProgress,
}

impl SessionEvent {
    /// Wire name of the event type.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::LoadTutorial { .. } => "LOAD_TUTORIAL",
            Self::RunTest { .. } => "RUN_TEST",
            Self::TestRun { .. } => "TEST_RUN",
            Self::TestPass { .. } => "TEST_PASS",
            Self::TestFail { .. } => "TEST_FAIL",
            Self::TestError { .. } => "TEST_ERROR",
            Self::JumpToPosition(_) => "JUMP_TO_POSITION",
            Self::Restart => "RESTART",
            Self::ResetProgress => "RESET_PROGRESS",
        }
    }

    /// Builds the result event for a parsed runner outcome.
    #[must_use]
    pub fn from_outcome(run_id: RunId, step_id: Option<String>, outcome: TestOutcome) -> Self {
        match outcome {
            TestOutcome::Run => Self::TestRun { run_id },
            TestOutcome::Pass => Self::TestPass { run_id, step_id },
            TestOutcome::Fail { message } => Self::TestFail {
                run_id,
                step_id,
                message,
            },
            TestOutcome::Error { message } => Self::TestError {
                run_id,
                step_id,
                message,
            },
        }
    }
}

// ============================================================================
// Notice, Disposition and Settled
// ============================================================================

/// Outbound notification emitted alongside a settled state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    /// The authoritative run started executing.
    #[serde(rename_all = "camelCase")]
    TestRunning {
        /// The run.
        run_id: RunId,
        /// Its step.
        step_id: String,
    },

    /// The authoritative run failed.
    #[serde(rename_all = "camelCase")]
    TestFailed {
        /// The step that failed.
        step_id: String,
        /// Failure detail.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// The runner errored for the authoritative run.
    #[serde(rename_all = "camelCase")]
    TestErrored {
        /// The step being tested.
        step_id: String,
        /// Error detail.
        message: String,
    },

    /// A tutorial could not be loaded.
    InvalidTutorial {
        /// Why it was refused.
        message: String,
    },

    /// The document could not be navigated while advancing.
    StructuralInconsistency {
        /// The failed lookup.
        message: String,
    },

    /// The last step of the tutorial was passed.
    TutorialFinished,
}

/// Whether an event acted on the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// The event was acted on.
    Applied,
    /// The event was stale or out of place and ignored.
    Dropped,
}

/// Result of one accepted event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settled {
    /// The state after the event.
    pub state: SessionState,
    /// Whether the event acted on state.
    pub disposition: Disposition,
    /// Process handle emitted by this transition.
    pub process: Option<ProcessHandle>,
    /// Notifications for the host.
    pub notices: Vec<Notice>,
}

impl Settled {
    fn applied(state: SessionState) -> Self {
        Self {
            state,
            disposition: Disposition::Applied,
            process: None,
            notices: Vec::new(),
        }
    }

    fn dropped(state: &SessionState) -> Self {
        Self {
            state: state.clone(),
            disposition: Disposition::Dropped,
            process: None,
            notices: Vec::new(),
        }
    }

    fn with_process(mut self, process: ProcessHandle) -> Self {
        self.process = Some(process);
        self
    }

    fn with_notice(mut self, notice: Notice) -> Self {
        self.notices.push(notice);
        self
    }
}

// ============================================================================
// SessionState
// ============================================================================

/// Immutable state owned by the session machine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    status: SessionStatus,
    document: Option<Arc<TutorialDocument>>,
    position: Option<Position>,
    progress: Progress,
    runs: RunTracker,
}

/// Rendering snapshot handed to collaborators after each settle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    /// Current status.
    pub status: SessionStatus,
    /// Current position, once loaded.
    pub position: Option<Position>,
    /// Completion flags.
    pub progress: Progress,
    /// The authoritative run, if any.
    pub process: Option<ProcessHandle>,
    /// Loaded tutorial id.
    pub tutorial_id: Option<String>,
    /// Loaded tutorial version.
    pub tutorial_version: Option<String>,
}

impl SessionState {
    /// Creates an uninitialized session.
    ///
    /// # Examples
    ///
    /// ```
    /// use waymark_tracker::{SessionState, SessionStatus};
    ///
    /// let state = SessionState::new();
    /// assert_eq!(state.status(), SessionStatus::Uninitialized);
    /// assert!(state.position().is_none());
    /// assert!(state.snapshot().is_none());
    /// ```
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a session from a persisted snapshot.
    ///
    /// The run counter starts over: no process outlives the host that started it.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::UnknownVersion` if the snapshot's version is gone.
    /// Returns `TrackerError::InvalidTutorial` if that version is not navigable.
    /// Returns `TrackerError::StructuralInconsistency` if the snapshot belongs to
    /// another tutorial or its position no longer resolves.
    pub fn restore(tutorial: &Tutorial, snapshot: &SessionSnapshot) -> Result<Self> {
        if snapshot.tutorial_id != tutorial.id {
            return Err(TrackerError::structural(format!(
                "snapshot belongs to tutorial '{}', not '{}'",
                snapshot.tutorial_id, tutorial.id
            )));
        }

        let version = tutorial.select_version(Some(&snapshot.tutorial_version))?;
        let document = TutorialDocument::new(tutorial.id.clone(), version)?;
        document
            .resolve(&snapshot.position)
            .map_err(TrackerError::into_structural)?;

        let status = if snapshot.completed {
            SessionStatus::Finished
        } else {
            SessionStatus::Ready
        };

        Ok(Self {
            status,
            document: Some(Arc::new(document)),
            position: Some(snapshot.position.clone()),
            progress: snapshot.progress.clone(),
            runs: RunTracker::new(),
        })
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> SessionStatus {
        self.status
    }

    /// The loaded document.
    #[must_use]
    pub fn document(&self) -> Option<&Arc<TutorialDocument>> {
        self.document.as_ref()
    }

    /// Current position.
    #[must_use]
    pub const fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    /// Completion flags.
    #[must_use]
    pub const fn progress(&self) -> &Progress {
        &self.progress
    }

    /// The authoritative run, if one is in flight.
    #[must_use]
    pub const fn process(&self) -> Option<&ProcessHandle> {
        self.runs.current()
    }

    /// Persisted form of this session, once a tutorial is loaded.
    #[must_use]
    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        let document = self.document.as_ref()?;
        let position = self.position.as_ref()?;

        Some(SessionSnapshot {
            format_version: STATE_VERSION,
            tutorial_id: document.tutorial_id().to_string(),
            tutorial_version: document.version().to_string(),
            position: position.clone(),
            progress: self.progress.clone(),
            completed: self.status == SessionStatus::Finished,
            saved_at: Utc::now(),
        })
    }

    /// Rendering view of this session.
    #[must_use]
    pub fn view(&self) -> SessionView {
        SessionView {
            status: self.status,
            position: self.position.clone(),
            progress: self.progress.clone(),
            process: self.runs.current().cloned(),
            tutorial_id: self.document.as_ref().map(|d| d.tutorial_id().to_string()),
            tutorial_version: self.document.as_ref().map(|d| d.version().to_string()),
        }
    }

    fn loaded_parts(&self) -> Result<(&Arc<TutorialDocument>, &Position)> {
        match (&self.document, &self.position) {
            (Some(document), Some(position)) => Ok((document, position)),
            _ => Err(TrackerError::structural(format!(
                "session is {} but has no document",
                self.status
            ))),
        }
    }
}

// ============================================================================
// Transitions
// ============================================================================

/// Applies one event to `state`.
///
/// # Errors
///
/// Returns the rejection when the event is not acceptable in the current
/// state: `InvalidTransition`, `RunMismatch`, `NotFound` or `UnknownVersion`.
/// The caller's state is unchanged in that case. Stale results are not
/// errors: they settle with [`Disposition::Dropped`].
pub fn apply_event(state: &SessionState, event: SessionEvent) -> Result<Settled> {
    let name = event.name();
    match event {
        SessionEvent::LoadTutorial { tutorial, version } => {
            load_tutorial(state, &tutorial, version.as_deref())
        }
        SessionEvent::RunTest { step_id } => run_test(state, step_id),
        SessionEvent::TestRun { run_id } => Ok(test_run(state, run_id)),
        SessionEvent::TestPass { run_id, step_id } => {
            Ok(test_pass(state, run_id, step_id.as_deref()))
        }
        SessionEvent::TestFail {
            run_id,
            step_id,
            message,
        } => Ok(test_failed(state, name, run_id, step_id.as_deref(), |step_id| {
            Notice::TestFailed { step_id, message }
        })),
        SessionEvent::TestError {
            run_id,
            step_id,
            message,
        } => Ok(test_failed(state, name, run_id, step_id.as_deref(), |step_id| {
            Notice::TestErrored {
                step_id,
                message: message.unwrap_or_else(|| DEFAULT_ERROR_MESSAGE.to_string()),
            }
        })),
        SessionEvent::JumpToPosition(target) => jump(state, name, target),
        SessionEvent::Restart => restart(state, name),
        SessionEvent::ResetProgress => reset_progress(state, name),
    }
}

fn load_tutorial(state: &SessionState, tutorial: &Tutorial, version: Option<&str>) -> Result<Settled> {
    if !matches!(
        state.status,
        SessionStatus::Uninitialized | SessionStatus::Loading
    ) {
        return Err(TrackerError::invalid_transition(state.status, "LOAD_TUTORIAL"));
    }

    let loaded = TutorialDocument::from_tutorial(tutorial, version)
        .and_then(|document| document.first_position().map(|first| (document, first)));

    match loaded {
        Ok((document, first)) => Ok(Settled::applied(SessionState {
            status: SessionStatus::Ready,
            document: Some(Arc::new(document)),
            position: Some(first),
            progress: Progress::new(),
            runs: state.runs.clone(),
        })),
        Err(TrackerError::InvalidTutorial { message }) => Ok(Settled::applied(SessionState {
            status: SessionStatus::Loading,
            document: None,
            position: None,
            progress: Progress::new(),
            runs: state.runs.clone(),
        })
        .with_notice(Notice::InvalidTutorial { message })),
        Err(other) => Err(other),
    }
}

fn run_test(state: &SessionState, step_id: String) -> Result<Settled> {
    if !matches!(state.status, SessionStatus::Ready | SessionStatus::Testing) {
        return Err(TrackerError::invalid_transition(state.status, "RUN_TEST"));
    }

    let (_, position) = state.loaded_parts()?;
    if position.step_id != step_id {
        return Err(TrackerError::run_mismatch(step_id, &position.step_id));
    }

    let (runs, handle) = state.runs.start(step_id);
    let next = SessionState {
        status: SessionStatus::Testing,
        runs,
        ..state.clone()
    };
    Ok(Settled::applied(next).with_process(handle))
}

/// Returns the authoritative handle a result may act on, or `None` if the
/// result must be dropped.
fn authoritative<'a>(
    state: &'a SessionState,
    event: &str,
    run_id: RunId,
    step_id: Option<&str>,
) -> Option<&'a ProcessHandle> {
    if state.status != SessionStatus::Testing {
        debug!(event, run_id = %run_id, status = %state.status, "Dropping result outside of a test run");
        return None;
    }

    let handle = state.runs.accept(run_id, step_id);
    if handle.is_none() {
        debug!(
            event,
            run_id = %run_id,
            current = ?state.runs.current().map(|h| h.run_id),
            "Dropping stale result"
        );
    }
    handle
}

fn test_run(state: &SessionState, run_id: RunId) -> Settled {
    let Some(handle) = authoritative(state, "TEST_RUN", run_id, None) else {
        return Settled::dropped(state);
    };

    let notice = Notice::TestRunning {
        run_id,
        step_id: handle.step_id.clone(),
    };
    let runs = state.runs.mark_running();
    let process = runs.current().cloned();
    let next = SessionState {
        runs,
        ..state.clone()
    };

    let settled = Settled::applied(next).with_notice(notice);
    match process {
        Some(process) => settled.with_process(process),
        None => settled,
    }
}

fn test_failed(
    state: &SessionState,
    event: &str,
    run_id: RunId,
    step_id: Option<&str>,
    notice: impl FnOnce(String) -> Notice,
) -> Settled {
    let Some(handle) = authoritative(state, event, run_id, step_id) else {
        return Settled::dropped(state);
    };

    let notice = notice(handle.step_id.clone());
    let next = SessionState {
        status: SessionStatus::Ready,
        runs: state.runs.finish(),
        ..state.clone()
    };
    Settled::applied(next).with_notice(notice)
}

/// Where the completion cascade ended.
enum CascadeEnd {
    Moved(Position),
    Finished,
}

fn test_pass(state: &SessionState, run_id: RunId, step_id: Option<&str>) -> Settled {
    if authoritative(state, "TEST_PASS", run_id, step_id).is_none() {
        return Settled::dropped(state);
    }

    let runs = state.runs.finish();
    match cascade(state) {
        Ok((CascadeEnd::Moved(position), progress)) => Settled::applied(SessionState {
            status: SessionStatus::Ready,
            position: Some(position),
            progress,
            runs,
            ..state.clone()
        }),
        Ok((CascadeEnd::Finished, progress)) => Settled::applied(SessionState {
            status: SessionStatus::Finished,
            progress,
            runs,
            ..state.clone()
        })
        .with_notice(Notice::TutorialFinished),
        Err(err) => {
            let message = err.into_structural().to_string();
            Settled::applied(SessionState {
                status: SessionStatus::Ready,
                runs,
                ..state.clone()
            })
            .with_notice(Notice::StructuralInconsistency { message })
        }
    }
}

/// Marks the current step complete and advances, cascading up the tiers.
///
/// Reads document and position once; on error nothing is committed.
fn cascade(state: &SessionState) -> Result<(CascadeEnd, Progress)> {
    let (document, position) = state.loaded_parts()?;
    let mut progress = state.progress.mark_step_complete(&position.step_id);

    if let Advance::To(next) = advance_step(document, position)? {
        return Ok((CascadeEnd::Moved(next), progress));
    }

    progress = progress.mark_stage_complete(&position.stage_id);
    if let Advance::To(next) = advance_stage(document, position)? {
        return Ok((CascadeEnd::Moved(next), progress));
    }

    match advance_level(document, position)? {
        Advance::To(next) => Ok((CascadeEnd::Moved(next), progress)),
        _ => Ok((CascadeEnd::Finished, progress)),
    }
}

fn jump(state: &SessionState, event: &str, target: Position) -> Result<Settled> {
    if !state.status.accepts_cursor_control() {
        return Err(TrackerError::invalid_transition(state.status, event));
    }

    let (document, _) = state.loaded_parts()?;
    document.resolve(&target)?;

    Ok(Settled::applied(SessionState {
        status: SessionStatus::Ready,
        position: Some(target),
        ..state.clone()
    }))
}

fn restart(state: &SessionState, event: &str) -> Result<Settled> {
    if !state.status.accepts_cursor_control() {
        return Err(TrackerError::invalid_transition(state.status, event));
    }

    let (document, _) = state.loaded_parts()?;
    let first = document.first_position()?;

    Ok(Settled::applied(SessionState {
        status: SessionStatus::Ready,
        position: Some(first),
        ..state.clone()
    }))
}

fn reset_progress(state: &SessionState, event: &str) -> Result<Settled> {
    if !state.status.accepts_cursor_control() {
        return Err(TrackerError::invalid_transition(state.status, event));
    }

    Ok(Settled::applied(SessionState {
        status: SessionStatus::Ready,
        progress: Progress::new(),
        ..state.clone()
    }))
}

// ============================================================================
// Tests
// ============================================================================
