//! Position navigator.
//!
//! Pure functions computing the next cursor from a document and the current
//! position. Each operation moves one tier: [`advance_step`] within a stage,
//! [`advance_stage`] within a level, [`advance_level`] within the version.
//! The session machine composes them into the completion cascade.
//!
//! A lookup miss is returned as `TrackerError::NotFound`; callers decide
//! whether that is a rejection or a structural inconsistency.

use crate::error::{Result, TrackerError};
use crate::tutorial::{first_position_in, first_position_in_stage, Position, TutorialDocument};

/// Outcome of a single advance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    /// The cursor moves to this position.
    To(Position),
    /// The current step was the last of its stage.
    EndOfStage,
    /// The current stage was the last of its level.
    EndOfLevel,
    /// The current level was the last of the version.
    EndOfTutorial,
}

impl Advance {
    /// Returns the new position, if the advance moved the cursor.
    #[must_use]
    pub const fn position(&self) -> Option<&Position> {
        match self {
            Self::To(position) => Some(position),
            _ => None,
        }
    }
}

/// Moves to the next step of the current stage.
///
/// Returns [`Advance::EndOfStage`] when the current step is the last one.
pub fn advance_step(doc: &TutorialDocument, position: &Position) -> Result<Advance> {
    let steps = doc.steps(&position.level_id, &position.stage_id)?;
    let index = index_of(steps.iter().map(|s| s.id.as_str()), "step", &position.step_id)?;

    Ok(match steps.get(index + 1) {
        Some(next) => Advance::To(Position {
            step_id: next.id.clone(),
            ..position.clone()
        }),
        None => Advance::EndOfStage,
    })
}

/// Moves to the first step of the next stage in the current level.
///
/// Returns [`Advance::EndOfLevel`] when the current stage is the last one.
pub fn advance_stage(doc: &TutorialDocument, position: &Position) -> Result<Advance> {
    let stages = doc.stages(&position.level_id)?;
    let index = index_of(stages.iter().map(|s| s.id.as_str()), "stage", &position.stage_id)?;

    match stages.get(index + 1) {
        Some(next) => first_position_in_stage(&position.level_id, next).map(Advance::To),
        None => Ok(Advance::EndOfLevel),
    }
}

/// Moves to the first stage and step of the next level.
///
/// Returns [`Advance::EndOfTutorial`] when the current level is the last one.
pub fn advance_level(doc: &TutorialDocument, position: &Position) -> Result<Advance> {
    let levels = doc.levels();
    let index = index_of(levels.iter().map(|l| l.id.as_str()), "level", &position.level_id)?;

    match levels.get(index + 1) {
        Some(next) => first_position_in(next).map(Advance::To),
        None => Ok(Advance::EndOfTutorial),
    }
}

fn index_of<'a>(mut ids: impl Iterator<Item = &'a str>, kind: &str, id: &str) -> Result<usize> {
    ids.position(|candidate| candidate == id)
        .ok_or_else(|| TrackerError::not_found(kind, id))
}
