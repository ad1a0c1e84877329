//! Persisted session snapshots.
//!
//! A snapshot carries just enough to resume a session: which tutorial and
//! version, the position, and the progress ledger. Run ids and in-flight
//! processes are never persisted.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, TrackerError};
use crate::progress::Progress;
use crate::tutorial::Position;

/// Current snapshot format version.
pub const STATE_VERSION: u32 = 1;

/// Resumable session state as written to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Snapshot format version.
    pub format_version: u32,

    /// Tutorial the session belongs to.
    pub tutorial_id: String,

    /// Version of the tutorial being followed.
    pub tutorial_version: String,

    /// Cursor at the time of saving.
    pub position: Position,

    /// Completion flags at the time of saving.
    #[serde(default)]
    pub progress: Progress,

    /// Whether the session had finished the tutorial.
    #[serde(default)]
    pub completed: bool,

    /// When the snapshot was taken.
    pub saved_at: DateTime<Utc>,
}

impl SessionSnapshot {
    /// Writes the snapshot as pretty JSON.
    ///
    /// The file is written to a temporary sibling first and renamed into
    /// place. Parent directories are created as needed.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(self)?;
        let temp_path = sibling(path, "tmp");
        tokio::fs::write(&temp_path, json).await?;
        tokio::fs::rename(&temp_path, path).await?;

        debug!(path = %path.display(), "Snapshot saved");
        Ok(())
    }

    /// Reads a snapshot, returning `None` if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::StateFileCorrupted` if the file is not a valid snapshot.
    /// Returns `TrackerError::UnsupportedStateVersion` if it was written by a newer format.
    pub async fn load(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref();

        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(TrackerError::Io(e)),
        };

        let value: serde_json::Value = serde_json::from_str(&content)
            .map_err(|e| TrackerError::state_corrupted(path, e.to_string()))?;

        let found = value
            .get("formatVersion")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| TrackerError::state_corrupted(path, "missing formatVersion"))?;
        let found = u32::try_from(found).unwrap_or(u32::MAX);
        if found > STATE_VERSION {
            return Err(TrackerError::UnsupportedStateVersion { found });
        }

        let snapshot = serde_json::from_value(value)
            .map_err(|e| TrackerError::state_corrupted(path, e.to_string()))?;
        Ok(Some(snapshot))
    }
}

// ============================================================================
// StateLock
// ============================================================================

/// Exclusive claim on a state file, held for the lifetime of a session.
///
/// The lock is a `<state>.lock` file created exclusively; it is removed when
/// the lock is dropped.
#[derive(Debug)]
pub struct StateLock {
    path: PathBuf,
}

impl StateLock {
    /// Acquires the lock for `state_path`.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::SessionAlreadyRunning` if the lock file exists.
    pub async fn acquire(state_path: impl AsRef<Path>) -> Result<Self> {
        let state_path = state_path.as_ref();
        let path = sibling(state_path, "lock");

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(_) => {
                debug!(lock = %path.display(), "State lock acquired");
                Ok(Self { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(TrackerError::session_already_running(state_path))
            }
            Err(e) => Err(TrackerError::Io(e)),
        }
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(lock = %self.path.display(), error = %e, "Failed to remove state lock");
        }
    }
}

/// `session.json` -> `session.json.<suffix>`
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}
