//! Tutorial documents for the Waymark tracker.
//!
//! A [`Tutorial`] is the raw payload supplied by the host: a list of
//! versions, each an ordered tree of levels, stages and steps. A
//! [`TutorialDocument`] is one validated version of that tree, immutable and
//! shared read-only by the navigator and the session machine.
//!
//! Identifiers are unique within their parent's sequence only, so every
//! lookup is scoped: a stage is found within a level, a step within a stage.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackerError};
use crate::progress::Progress;

/// Maximum allowed tutorial file size in bytes (1MB).
pub const MAX_TUTORIAL_SIZE: u64 = 1024 * 1024;

// ============================================================================
// Raw payload
// ============================================================================

/// Actions applied to the learner's workspace around a step.
///
/// Setup actions run before a step is attempted; solution actions reveal a
/// worked answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepActions {
    /// Commits to cherry-pick into the workspace.
    #[serde(default)]
    pub commits: Vec<String>,

    /// Files to open in the editor.
    #[serde(default)]
    pub files: Vec<String>,

    /// Shell commands to run.
    #[serde(default)]
    pub commands: Vec<String>,
}

/// Leaf unit of a tutorial; the target of a test run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Identifier, unique within the parent stage.
    pub id: String,

    /// Short title.
    #[serde(default)]
    pub title: String,

    /// Markdown body.
    #[serde(default)]
    pub text: String,

    /// Actions applied before the step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup: Option<StepActions>,

    /// Actions that reveal the worked answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solution: Option<StepActions>,
}

/// An ordered group of steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    /// Identifier, unique within the parent level.
    pub id: String,

    /// Short title.
    #[serde(default)]
    pub title: String,

    /// Markdown body.
    #[serde(default)]
    pub text: String,

    /// Actions applied when the stage is entered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup: Option<StepActions>,

    /// Steps in order.
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// An ordered group of stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    /// Identifier, unique within the version.
    pub id: String,

    /// Short title.
    #[serde(default)]
    pub title: String,

    /// Markdown body.
    #[serde(default)]
    pub text: String,

    /// Actions applied when the level is entered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup: Option<StepActions>,

    /// Stages in order.
    #[serde(default)]
    pub stages: Vec<Stage>,
}

/// One published (or draft) revision of a tutorial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TutorialVersion {
    /// Version string, e.g. `"0.1.0"`.
    pub version: String,

    /// When the version was published; drafts have none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,

    /// Levels in order.
    #[serde(default)]
    pub levels: Vec<Level>,
}

/// Root tutorial payload as supplied by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tutorial {
    /// Tutorial identifier.
    pub id: String,

    /// Display title.
    #[serde(default)]
    pub title: String,

    /// Markdown summary.
    #[serde(default)]
    pub text: String,

    /// All known versions.
    #[serde(default)]
    pub versions: Vec<TutorialVersion>,
}

impl Tutorial {
    /// Loads a tutorial from a JSON file.
    ///
    /// Validates that:
    /// - The file exists
    /// - The file size is within the 1MB limit
    /// - The content is a well-formed tutorial document
    ///
    /// Structural validation (non-empty sequences) happens when a version is
    /// turned into a [`TutorialDocument`].
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::TutorialNotFound` if the file doesn't exist.
    /// Returns `TrackerError::TutorialTooLarge` if the file exceeds 1MB.
    /// Returns `TrackerError::TutorialParseError` if the content is not valid JSON
    /// for a tutorial.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let metadata = std::fs::metadata(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TrackerError::tutorial_not_found(path)
            } else {
                TrackerError::Io(e)
            }
        })?;

        let file_size = metadata.len();
        if file_size > MAX_TUTORIAL_SIZE {
            return Err(TrackerError::tutorial_too_large(path, file_size / 1024));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::InvalidData {
                TrackerError::tutorial_parse(path, "file is not valid UTF-8")
            } else {
                TrackerError::Io(e)
            }
        })?;

        serde_json::from_str(&content).map_err(|e| TrackerError::tutorial_parse(path, e.to_string()))
    }

    /// Selects a version by its version string, or the default one.
    ///
    /// With no version requested, the published version with the latest
    /// `publishedAt` wins; if nothing is published, the last listed version.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::UnknownVersion` if the requested version does not exist.
    /// Returns `TrackerError::InvalidTutorial` if the tutorial has no versions.
    pub fn select_version(&self, version: Option<&str>) -> Result<&TutorialVersion> {
        if let Some(wanted) = version {
            return self
                .versions
                .iter()
                .find(|v| v.version == wanted)
                .ok_or_else(|| TrackerError::unknown_version(wanted));
        }

        let published = self
            .versions
            .iter()
            .filter(|v| v.published_at.is_some())
            .max_by_key(|v| v.published_at);

        published
            .or_else(|| self.versions.last())
            .ok_or_else(|| {
                TrackerError::invalid_tutorial(format!("tutorial '{}' has no versions", self.id))
            })
    }
}

// ============================================================================
// Position
// ============================================================================

/// Cursor pointing at exactly one step of the loaded document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    /// Current level.
    pub level_id: String,
    /// Current stage within the level.
    pub stage_id: String,
    /// Current step within the stage.
    pub step_id: String,
}

impl Position {
    /// Creates a new `Position`.
    #[must_use]
    pub fn new(
        level_id: impl Into<String>,
        stage_id: impl Into<String>,
        step_id: impl Into<String>,
    ) -> Self {
        Self {
            level_id: level_id.into(),
            stage_id: stage_id.into(),
            step_id: step_id.into(),
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.level_id, self.stage_id, self.step_id)
    }
}

// ============================================================================
// TutorialDocument
// ============================================================================

/// A validated, navigable tutorial version.
///
/// Every level, stage and step sequence is non-empty and identifiers are
/// unique within their parent, so the first position always exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TutorialDocument {
    tutorial_id: String,
    version: String,
    levels: Vec<Level>,
}

impl TutorialDocument {
    /// Builds a document from one version of a tutorial.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::InvalidTutorial` if any level, stage or step
    /// sequence is empty, or if an identifier repeats within its parent.
    pub fn new(tutorial_id: impl Into<String>, version: &TutorialVersion) -> Result<Self> {
        let tutorial_id = tutorial_id.into();
        validate_levels(&version.version, &version.levels)?;

        Ok(Self {
            tutorial_id,
            version: version.version.clone(),
            levels: version.levels.clone(),
        })
    }

    /// Selects a version of `tutorial` and builds its document.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`Tutorial::select_version`] and [`TutorialDocument::new`].
    pub fn from_tutorial(tutorial: &Tutorial, version: Option<&str>) -> Result<Self> {
        let selected = tutorial.select_version(version)?;
        Self::new(tutorial.id.clone(), selected)
    }

    /// The tutorial this document belongs to.
    #[must_use]
    pub fn tutorial_id(&self) -> &str {
        &self.tutorial_id
    }

    /// The version string of this document.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// All levels in order.
    #[must_use]
    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    /// Resolves a level by id.
    pub fn level(&self, level_id: &str) -> Result<&Level> {
        self.levels
            .iter()
            .find(|l| l.id == level_id)
            .ok_or_else(|| TrackerError::not_found("level", level_id))
    }

    /// All stages of a level in order.
    pub fn stages(&self, level_id: &str) -> Result<&[Stage]> {
        Ok(&self.level(level_id)?.stages)
    }

    /// Resolves a stage by id within a level.
    pub fn stage(&self, level_id: &str, stage_id: &str) -> Result<&Stage> {
        self.stages(level_id)?
            .iter()
            .find(|s| s.id == stage_id)
            .ok_or_else(|| TrackerError::not_found("stage", stage_id))
    }

    /// All steps of a stage in order.
    pub fn steps(&self, level_id: &str, stage_id: &str) -> Result<&[Step]> {
        Ok(&self.stage(level_id, stage_id)?.steps)
    }

    /// Resolves a step by id within a stage.
    pub fn step(&self, level_id: &str, stage_id: &str, step_id: &str) -> Result<&Step> {
        self.steps(level_id, stage_id)?
            .iter()
            .find(|s| s.id == step_id)
            .ok_or_else(|| TrackerError::not_found("step", step_id))
    }

    /// Resolves the step a position points at.
    pub fn resolve(&self, position: &Position) -> Result<&Step> {
        self.step(&position.level_id, &position.stage_id, &position.step_id)
    }

    /// The first step of the first stage of the first level.
    pub fn first_position(&self) -> Result<Position> {
        let level = self
            .levels
            .first()
            .ok_or_else(|| TrackerError::invalid_tutorial("version has no levels"))?;
        first_position_in(level)
    }

    /// Total number of steps across all levels.
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.levels
            .iter()
            .flat_map(|l| &l.stages)
            .map(|s| s.steps.len())
            .sum()
    }

    /// Returns `true` if every stage of the level is marked complete.
    ///
    /// Level completion is derived from stage flags rather than stored.
    pub fn is_level_complete(&self, progress: &Progress, level_id: &str) -> Result<bool> {
        Ok(self
            .stages(level_id)?
            .iter()
            .all(|s| progress.is_stage_complete(&s.id)))
    }
}

/// First stage and step of `level`, as a position.
pub(crate) fn first_position_in(level: &Level) -> Result<Position> {
    let stage = level.stages.first().ok_or_else(|| {
        TrackerError::invalid_tutorial(format!("level '{}' has no stages", level.id))
    })?;
    first_position_in_stage(&level.id, stage)
}

/// First step of `stage` within `level_id`, as a position.
pub(crate) fn first_position_in_stage(level_id: &str, stage: &Stage) -> Result<Position> {
    let step = stage.steps.first().ok_or_else(|| {
        TrackerError::invalid_tutorial(format!("stage '{}' has no steps", stage.id))
    })?;
    Ok(Position::new(level_id, &stage.id, &step.id))
}

fn validate_levels(version: &str, levels: &[Level]) -> Result<()> {
    if levels.is_empty() {
        return Err(TrackerError::invalid_tutorial(format!(
            "version '{version}' has no levels"
        )));
    }
    ensure_unique("level", version, levels.iter().map(|l| l.id.as_str()))?;

    for level in levels {
        if level.stages.is_empty() {
            return Err(TrackerError::invalid_tutorial(format!(
                "level '{}' has no stages",
                level.id
            )));
        }
        ensure_unique("stage", &level.id, level.stages.iter().map(|s| s.id.as_str()))?;

        for stage in &level.stages {
            if stage.steps.is_empty() {
                return Err(TrackerError::invalid_tutorial(format!(
                    "stage '{}' has no steps",
                    stage.id
                )));
            }
            ensure_unique("step", &stage.id, stage.steps.iter().map(|s| s.id.as_str()))?;
        }
    }

    Ok(())
}

fn ensure_unique<'a>(kind: &str, parent: &str, ids: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(TrackerError::invalid_tutorial(format!(
                "duplicate {kind} id '{id}' in '{parent}'"
            )));
        }
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
