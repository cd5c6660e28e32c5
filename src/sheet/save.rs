use super::overlay::PendingOverlay;
use super::row::{FieldMap, RowId};
use serde::Serialize;
use uuid::Uuid;

/// One row of a save request: the row id plus only the fields that differ
/// from the baseline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchEntry {
    #[serde(rename = "rowId")]
    pub row_id: RowId,
    #[serde(flatten)]
    pub changes: FieldMap,
}

/// The overlay contents captured when a save started.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InFlightBatch {
    pub id: Uuid,
    /// Revision of the baseline the edits were made against.
    pub revision: String,
    pub entries: Vec<BatchEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldIssue {
    pub row_id: RowId,
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SaveFailure {
    #[error("{message}")]
    Validation {
        message: String,
        issues: Vec<FieldIssue>,
    },

    #[error("transport error: {0}")]
    Transport(String),

    /// The sheet was locked or changed by someone else since it was loaded.
    #[error("stale sheet: {0}")]
    Stale(String),
}

impl SaveFailure {
    pub fn code(&self) -> &'static str {
        match self {
            SaveFailure::Validation { .. } => "validation_failed",
            SaveFailure::Transport(_) => "transport_failed",
            SaveFailure::Stale(_) => "stale_state",
        }
    }

    pub fn issues(&self) -> &[FieldIssue] {
        match self {
            SaveFailure::Validation { issues, .. } => issues,
            _ => &[],
        }
    }

    /// Stale failures are the one case where the host should refetch even
    /// though the save did not go through.
    pub fn refetch_required(&self) -> bool {
        matches!(self, SaveFailure::Stale(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SaveRefused {
    #[error("sheet is locked")]
    Locked,
    #[error("a save is already in flight")]
    AlreadySaving,
    #[error("no pending changes")]
    NoChanges,
    #[error("sheet has not been loaded")]
    NotLoaded,
}

impl SaveRefused {
    pub fn code(&self) -> &'static str {
        match self {
            SaveRefused::Locked => "locked",
            SaveRefused::AlreadySaving => "already_saving",
            SaveRefused::NoChanges => "no_changes",
            SaveRefused::NotLoaded => "not_loaded",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SaveReport {
    Saved {
        batch_id: Uuid,
        rows: usize,
        /// Set when the follow-up refetch failed; the sheet stays settling.
        refetch_error: Option<String>,
    },
    Failed {
        batch_id: Uuid,
        failure: SaveFailure,
    },
    /// Completion for a batch that is no longer in flight.
    Ignored { batch_id: Uuid },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveState {
    Idle,
    Saving,
    /// Saved, waiting for the baseline refetch to land.
    Settling,
}

#[derive(Debug, Default)]
enum Phase {
    #[default]
    Idle,
    Saving {
        id: Uuid,
        rows: usize,
        edits: PendingOverlay,
    },
    Settling {
        edits: PendingOverlay,
    },
}

/// `Idle -> Saving -> (Success | Failure)`. Only one batch may be in flight.
#[derive(Debug, Default)]
pub struct SaveCoordinator {
    phase: Phase,
}

impl SaveCoordinator {
    pub fn state(&self) -> SaveState {
        match self.phase {
            Phase::Idle => SaveState::Idle,
            Phase::Saving { .. } => SaveState::Saving,
            Phase::Settling { .. } => SaveState::Settling,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.phase, Phase::Idle)
    }

    pub fn in_flight_id(&self) -> Option<Uuid> {
        match self.phase {
            Phase::Saving { id, .. } => Some(id),
            _ => None,
        }
    }

    /// Edits sent to the server that the baseline does not reflect yet.
    pub fn unconfirmed(&self) -> Option<&PendingOverlay> {
        match &self.phase {
            Phase::Idle => None,
            Phase::Saving { edits, .. } | Phase::Settling { edits } => Some(edits),
        }
    }

    pub fn start(&mut self, edits: PendingOverlay, rows: usize) -> Result<Uuid, SaveRefused> {
        if !self.is_idle() {
            return Err(SaveRefused::AlreadySaving);
        }
        let id = Uuid::new_v4();
        self.phase = Phase::Saving { id, rows, edits };
        Ok(id)
    }

    /// Returns the number of rows the batch carried, or `None` when `id` is
    /// not the batch in flight.
    pub fn succeed(&mut self, id: Uuid) -> Option<usize> {
        match std::mem::take(&mut self.phase) {
            Phase::Saving {
                id: current,
                rows,
                edits,
            } if current == id => {
                self.phase = Phase::Settling { edits };
                Some(rows)
            }
            other => {
                self.phase = other;
                None
            }
        }
    }

    /// Hands the batch's edits back so they can be merged into the live
    /// overlay. `None` when `id` is not the batch in flight.
    pub fn fail(&mut self, id: Uuid) -> Option<PendingOverlay> {
        match std::mem::take(&mut self.phase) {
            Phase::Saving {
                id: current, edits, ..
            } if current == id => Some(edits),
            other => {
                self.phase = other;
                None
            }
        }
    }

    /// A fresh baseline has landed.
    pub fn settle(&mut self) {
        if matches!(self.phase, Phase::Settling { .. }) {
            self.phase = Phase::Idle;
        }
    }

    pub fn retain_rows(&mut self, keep: impl FnMut(&str) -> bool) {
        if let Phase::Saving { edits, .. } = &mut self.phase {
            edits.retain_rows(keep);
        }
    }
}
