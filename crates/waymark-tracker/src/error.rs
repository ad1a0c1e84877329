//! Error types for the Waymark tracker.
//!
//! This module defines the error hierarchy for every tracker operation,
//! including configuration loading, tutorial parsing, document lookups,
//! session transitions, and snapshot persistence.

use std::path::PathBuf;

/// A specialized `Result` type for tracker operations.
pub type Result<T> = std::result::Result<T, TrackerError>;

/// Errors that can occur while tracking a tutorial session.
///
/// Variants are organized by subsystem. User-facing variants carry an
/// actionable suggestion in their display text.
///
/// A stale test result is never an error: it is dropped by the session
/// machine and reported only through its disposition.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your waymark.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // Tutorial Loading Errors
    // ========================================================================
    /// Tutorial file was not found at the specified path.
    #[error("Tutorial not found: '{path}'\n\nSuggestion: Check the 'tutorial' field in waymark.json or pass the path on the command line")]
    TutorialNotFound {
        /// Path where the tutorial was expected.
        path: PathBuf,
    },

    /// Tutorial file exceeds the size limit.
    #[error("Tutorial exceeds size limit (1024KB): '{path}' is {size_kb}KB\n\nSuggestion: Split the tutorial into smaller versions")]
    TutorialTooLarge {
        /// Path to the oversized tutorial.
        path: PathBuf,
        /// Actual size in kilobytes.
        size_kb: u64,
    },

    /// Tutorial file is not a valid tutorial document.
    #[error("Tutorial '{path}' could not be parsed: {message}\n\nSuggestion: Check the file against the tutorial JSON format")]
    TutorialParseError {
        /// Path to the tutorial file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// The requested tutorial version does not exist.
    #[error("Tutorial version not found: '{version}'\n\nSuggestion: Omit the version to use the latest published one")]
    UnknownVersion {
        /// The requested version string.
        version: String,
    },

    // ========================================================================
    // Document and Session Errors
    // ========================================================================
    /// An identifier does not exist in the expected parent scope.
    #[error("{kind} not found: '{id}'")]
    NotFound {
        /// What was being looked up ("level", "stage" or "step").
        kind: String,
        /// The identifier that missed.
        id: String,
    },

    /// The tutorial cannot be navigated (empty or ambiguous sequences).
    #[error("Invalid tutorial: {message}\n\nSuggestion: Every level needs a stage and every stage needs a step, with unique ids")]
    InvalidTutorial {
        /// Description of the structural problem.
        message: String,
    },

    /// A document lookup failed while advancing the position.
    #[error("Structural inconsistency: {message}")]
    StructuralInconsistency {
        /// Description of the failed lookup.
        message: String,
    },

    /// A test run was requested for a step other than the current one.
    #[error("Cannot run tests for step '{requested}': the current step is '{current}'")]
    RunMismatch {
        /// The step the run was requested for.
        requested: String,
        /// The step at the current position.
        current: String,
    },

    /// The event is not accepted in the current session status.
    #[error("Invalid state transition: {event} is not accepted while {status}")]
    InvalidTransition {
        /// The current session status.
        status: String,
        /// The rejected event type.
        event: String,
    },

    // ========================================================================
    // State Persistence Errors
    // ========================================================================
    /// State file contains malformed JSON that cannot be recovered.
    #[error("Corrupted state file '{path}': {message}\n\nSuggestion: Remove the state file to start fresh, or restore from backup")]
    StateFileCorrupted {
        /// Path to the corrupted state file.
        path: PathBuf,
        /// Description of the corruption.
        message: String,
    },

    /// State file was written by a newer, incompatible format.
    #[error("Unsupported state file format version {found}\n\nSuggestion: Upgrade waymark or remove the state file")]
    UnsupportedStateVersion {
        /// The format version found in the file.
        found: u32,
    },

    /// Another tracker holds the state file.
    #[error("A waymark session is already running (state file locked: '{state_file}')\n\nSuggestion: Stop the other session or remove the lock file if it's stale")]
    SessionAlreadyRunning {
        /// Path to the locked state file.
        state_file: PathBuf,
    },

    // ========================================================================
    // General I/O Errors
    // ========================================================================
    /// General I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TrackerError {
    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `TutorialNotFound` error.
    #[must_use]
    pub fn tutorial_not_found(path: impl Into<PathBuf>) -> Self {
        Self::TutorialNotFound { path: path.into() }
    }

    /// Creates a new `TutorialTooLarge` error.
    #[must_use]
    pub fn tutorial_too_large(path: impl Into<PathBuf>, size_kb: u64) -> Self {
        Self::TutorialTooLarge {
            path: path.into(),
            size_kb,
        }
    }

    /// Creates a new `TutorialParseError`.
    #[must_use]
    pub fn tutorial_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::TutorialParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `UnknownVersion` error.
    #[must_use]
    pub fn unknown_version(version: impl Into<String>) -> Self {
        Self::UnknownVersion {
            version: version.into(),
        }
    }

    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Creates a new `InvalidTutorial` error.
    #[must_use]
    pub fn invalid_tutorial(message: impl Into<String>) -> Self {
        Self::InvalidTutorial {
            message: message.into(),
        }
    }

    /// Creates a new `StructuralInconsistency` error.
    #[must_use]
    pub fn structural(message: impl Into<String>) -> Self {
        Self::StructuralInconsistency {
            message: message.into(),
        }
    }

    /// Creates a new `RunMismatch` error.
    #[must_use]
    pub fn run_mismatch(requested: impl Into<String>, current: impl Into<String>) -> Self {
        Self::RunMismatch {
            requested: requested.into(),
            current: current.into(),
        }
    }

    /// Creates a new `InvalidTransition` error.
    #[must_use]
    pub fn invalid_transition(status: impl std::fmt::Display, event: impl Into<String>) -> Self {
        Self::InvalidTransition {
            status: status.to_string(),
            event: event.into(),
        }
    }

    /// Creates a new `StateFileCorrupted` error.
    #[must_use]
    pub fn state_corrupted(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::StateFileCorrupted {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `SessionAlreadyRunning` error.
    #[must_use]
    pub fn session_already_running(state_file: impl Into<PathBuf>) -> Self {
        Self::SessionAlreadyRunning {
            state_file: state_file.into(),
        }
    }

    /// Converts a document lookup miss into a structural inconsistency.
    ///
    /// Other errors pass through unchanged.
    #[must_use]
    pub fn into_structural(self) -> Self {
        match self {
            Self::NotFound { kind, id } => Self::StructuralInconsistency {
                message: format!("{kind} '{id}' vanished from the tutorial while advancing"),
            },
            other => other,
        }
    }

    /// Returns `true` if the error rejects a session event without changing state.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::RunMismatch { .. }
                | Self::InvalidTransition { .. }
                | Self::UnknownVersion { .. }
        )
    }
}
