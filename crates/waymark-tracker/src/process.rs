//! Test-run fencing.
//!
//! Every test run gets a [`RunId`] strictly greater than any allocated
//! before it. Only the most recent run is authoritative; a result is acted
//! on only if it presents that run's id back. Starting a new run is the only
//! cancellation mechanism: the superseded run's result is simply dropped.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Generic message used when a runner result cannot be read.
pub const UNREADABLE_RESULT_MESSAGE: &str = "test runner returned an unreadable result";

// ============================================================================
// RunId and ProcessHandle
// ============================================================================

/// Monotonic fencing token identifying one test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub u64);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle phase of an in-flight run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessPhase {
    /// The run was requested; the runner has not reported yet.
    #[default]
    Requested,
    /// The runner reported that tests are executing.
    Running,
}

/// Handle for an in-flight test run, returned to the host on request.
///
/// The host presents `run_id` back with the result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessHandle {
    /// Fencing token for this run.
    pub run_id: RunId,
    /// Step the run targets.
    pub step_id: String,
    /// Current phase.
    pub phase: ProcessPhase,
}

// ============================================================================
// RunTracker
// ============================================================================

/// Allocates run ids and remembers the single authoritative run.
///
/// Operations return a new tracker; the previous value stays valid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunTracker {
    last_allocated: u64,
    current: Option<ProcessHandle>,
}

impl RunTracker {
    /// Creates a tracker that has allocated nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a run for `step_id`, superseding any run in flight.
    ///
    /// # Examples
    ///
    /// ```
    /// use waymark_tracker::{RunId, RunTracker};
    ///
    /// let tracker = RunTracker::new();
    /// let (tracker, first) = tracker.start("1.1");
    /// let (tracker, second) = tracker.start("1.1");
    ///
    /// assert_eq!(first.run_id, RunId(1));
    /// assert!(second.run_id > first.run_id);
    /// assert!(!tracker.is_authoritative(first.run_id));
    /// assert!(tracker.is_authoritative(second.run_id));
    /// ```
    #[must_use]
    pub fn start(&self, step_id: impl Into<String>) -> (Self, ProcessHandle) {
        let run_id = RunId(self.last_allocated + 1);
        let handle = ProcessHandle {
            run_id,
            step_id: step_id.into(),
            phase: ProcessPhase::Requested,
        };
        let next = Self {
            last_allocated: run_id.0,
            current: Some(handle.clone()),
        };
        (next, handle)
    }

    /// The authoritative run, if one is in flight.
    #[must_use]
    pub const fn current(&self) -> Option<&ProcessHandle> {
        self.current.as_ref()
    }

    /// The most recently allocated run id.
    #[must_use]
    pub const fn last_allocated(&self) -> Option<RunId> {
        if self.last_allocated == 0 {
            None
        } else {
            Some(RunId(self.last_allocated))
        }
    }

    /// Returns `true` if `run_id` is the run in flight.
    #[must_use]
    pub fn is_authoritative(&self, run_id: RunId) -> bool {
        self.current.as_ref().is_some_and(|h| h.run_id == run_id)
    }

    /// Returns the authoritative handle if a result for `run_id` (and
    /// optionally `step_id`) may act on state.
    #[must_use]
    pub fn accept(&self, run_id: RunId, step_id: Option<&str>) -> Option<&ProcessHandle> {
        self.current
            .as_ref()
            .filter(|h| h.run_id == run_id)
            .filter(|h| step_id.map_or(true, |s| s == h.step_id))
    }

    /// Moves the authoritative run into the running phase.
    #[must_use]
    pub fn mark_running(&self) -> Self {
        let mut next = self.clone();
        if let Some(handle) = next.current.as_mut() {
            handle.phase = ProcessPhase::Running;
        }
        next
    }

    /// Consumes the authoritative run. The id counter is kept.
    #[must_use]
    pub fn finish(&self) -> Self {
        Self {
            last_allocated: self.last_allocated,
            current: None,
        }
    }
}

// ============================================================================
// TestOutcome
// ============================================================================

/// Result reported by the external test runner for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TestOutcome {
    /// Tests started executing.
    Run,
    /// Tests passed.
    Pass,
    /// Tests ran and failed.
    Fail {
        /// Failure detail for the learner.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// The runner itself failed.
    Error {
        /// Error detail.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl TestOutcome {
    /// Parses a raw runner payload.
    ///
    /// Anything that is not a recognizable outcome becomes an `Error` with a
    /// generic message.
    ///
    /// # Examples
    ///
    /// ```
    /// use waymark_tracker::TestOutcome;
    ///
    /// let pass = TestOutcome::from_value(serde_json::json!({"outcome": "pass"}));
    /// assert_eq!(pass, TestOutcome::Pass);
    ///
    /// let junk = TestOutcome::from_value(serde_json::json!([1, 2, 3]));
    /// assert!(matches!(junk, TestOutcome::Error { .. }));
    /// ```
    #[must_use]
    pub fn from_value(value: serde_json::Value) -> Self {
        serde_json::from_value(value).unwrap_or_else(|_| Self::unreadable())
    }

    /// The outcome used for payloads that cannot be parsed.
    #[must_use]
    pub fn unreadable() -> Self {
        Self::Error {
            message: Some(UNREADABLE_RESULT_MESSAGE.to_string()),
        }
    }
}
