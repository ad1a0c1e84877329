//! Progress ledger.
//!
//! Records which steps and stages have ever been completed, independent of
//! the cursor. Marking returns a new ledger; nothing here clears a `true`
//! entry. An explicit reset replaces the ledger with [`Progress::new`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Completion flags keyed by step and stage identifier.
///
/// Unknown keys read as incomplete. Maps are ordered so serialized snapshots
/// are stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Step completion flags.
    #[serde(default)]
    pub steps: BTreeMap<String, bool>,

    /// Stage completion flags.
    #[serde(default)]
    pub stages: BTreeMap<String, bool>,
}

impl Progress {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a ledger with `step_id` marked complete.
    #[must_use]
    pub fn mark_step_complete(&self, step_id: &str) -> Self {
        let mut next = self.clone();
        next.steps.insert(step_id.to_string(), true);
        next
    }

    /// Returns a ledger with `stage_id` marked complete.
    #[must_use]
    pub fn mark_stage_complete(&self, stage_id: &str) -> Self {
        let mut next = self.clone();
        next.stages.insert(stage_id.to_string(), true);
        next
    }

    /// Returns `true` if the step has been completed.
    #[must_use]
    pub fn is_step_complete(&self, step_id: &str) -> bool {
        self.steps.get(step_id).copied().unwrap_or(false)
    }

    /// Returns `true` if the stage has been completed.
    #[must_use]
    pub fn is_stage_complete(&self, stage_id: &str) -> bool {
        self.stages.get(stage_id).copied().unwrap_or(false)
    }

    /// Number of steps marked complete.
    #[must_use]
    pub fn completed_steps(&self) -> usize {
        self.steps.values().filter(|done| **done).count()
    }

    /// Number of stages marked complete.
    #[must_use]
    pub fn completed_stages(&self) -> usize {
        self.stages.values().filter(|done| **done).count()
    }

    /// Returns `true` if nothing has been completed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.completed_steps() == 0 && self.completed_stages() == 0
    }
}
