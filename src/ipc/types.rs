use crate::backend::SessionContext;
use crate::sheet::{InFlightBatch, Sheet};
use rusqlite::Connection;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// A sheet the host has open, plus the batch it is currently saving when
/// the save was started with `sheet.saveBegin`.
pub struct OpenSheet {
    pub sheet: Sheet,
    pub batch: Option<InFlightBatch>,
}

#[derive(Default)]
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub session: Option<SessionContext>,
    pub sheets: HashMap<String, OpenSheet>,
}
