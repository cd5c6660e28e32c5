//! Bulk-edit sheet core.
//!
//! A sheet keeps the last server-confirmed rows (baseline), a sparse layer
//! of pending edits on top (overlay), a multi-row selection for bulk
//! actions, the server lock flag, and a save state machine that sends the
//! overlay as one batch. What the user sees is always
//! `project(baseline, [unconfirmed batch, overlay])`.

mod baseline;
mod editor;
mod guard;
mod lock;
mod overlay;
mod project;
mod row;
mod save;
mod selection;

pub use baseline::BaselineStore;
pub use editor::{EditOutcome, LoadReport, Sheet, SheetError, SheetPayload};
pub use guard::{FieldError, FieldGuard, ATTENDANCE_STATUSES};
pub use lock::LockGuard;
pub use overlay::PendingOverlay;
pub use project::project;
pub use row::{FieldMap, Row, RowId, RowKind, SheetScope};
pub use save::{
    BatchEntry, FieldIssue, InFlightBatch, SaveCoordinator, SaveFailure, SaveRefused, SaveReport,
    SaveState,
};
pub use selection::SelectionSet;
