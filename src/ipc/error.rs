use crate::backend::BackendError;
use crate::sheet::{SaveRefused, SheetError};
use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<rusqlite::Error> for HandlerErr {
    fn from(e: rusqlite::Error) -> Self {
        HandlerErr::new("db_query_failed", e.to_string())
    }
}

impl From<BackendError> for HandlerErr {
    fn from(e: BackendError) -> Self {
        HandlerErr::new(e.code(), e.to_string())
    }
}

impl From<SheetError> for HandlerErr {
    fn from(e: SheetError) -> Self {
        let details = match &e {
            SheetError::UnknownRow(row_id) => Some(json!({ "rowId": row_id })),
            SheetError::Field(field_err) => Some(json!({ "field": field_err.field() })),
            _ => None,
        };
        HandlerErr {
            code: e.code(),
            message: e.to_string(),
            details,
        }
    }
}

impl From<SaveRefused> for HandlerErr {
    fn from(e: SaveRefused) -> Self {
        HandlerErr::new(e.code(), e.to_string())
    }
}
