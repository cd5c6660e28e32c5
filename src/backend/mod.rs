//! Collaborators the sheet core talks to: fetch, batch save and lock toggle.
//!
//! The core only sees these traits. The workspace database implements them
//! in [`sqlite`]; a remote REST backend would implement the same contracts.

pub mod sqlite;

use crate::sheet::{InFlightBatch, SaveFailure, SheetPayload, SheetScope};
use serde::Deserialize;

/// Who is acting and for which branch. Passed explicitly into every
/// backend call instead of living in a global.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    pub branch_id: String,
    pub actor: String,
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("{what} not found")]
    NotFound { what: &'static str },

    #[error("{0}")]
    Invalid(String),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

impl BackendError {
    pub fn code(&self) -> &'static str {
        match self {
            BackendError::NotFound { .. } => "not_found",
            BackendError::Invalid(_) => "bad_params",
            BackendError::Db(_) => "db_query_failed",
        }
    }
}

pub trait SheetBackend {
    fn fetch(&self, ctx: &SessionContext, scope: &SheetScope) -> Result<SheetPayload, BackendError>;

    fn save_batch(
        &mut self,
        ctx: &SessionContext,
        scope: &SheetScope,
        batch: &InFlightBatch,
    ) -> Result<(), SaveFailure>;
}

/// Lock and unlock are idempotent and invoked by the host, never by a sheet.
pub trait LockControl {
    fn set_locked(
        &mut self,
        ctx: &SessionContext,
        scope: &SheetScope,
        locked: bool,
    ) -> Result<(), BackendError>;
}
