use super::row::RowKind;
use serde_json::Value;

pub const ATTENDANCE_STATUSES: &[&str] = &["present", "absent", "late", "excused"];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FieldError {
    #[error("field {field} is not editable on {kind} rows")]
    NotEditable { field: String, kind: &'static str },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: String,
        value: f64,
        min: f64,
        max: f64,
    },
}

impl FieldError {
    pub fn field(&self) -> &str {
        match self {
            FieldError::NotEditable { field, .. }
            | FieldError::InvalidValue { field, .. }
            | FieldError::OutOfRange { field, .. } => field,
        }
    }
}

/// Caller-side validation applied before a value reaches the overlay.
///
/// The backend runs the same checks again when a batch arrives; this guard
/// only keeps obviously bad values out of the pending edits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldGuard {
    kind: RowKind,
    max_score: Option<f64>,
}

impl FieldGuard {
    pub fn new(kind: RowKind, max_score: Option<f64>) -> Self {
        Self { kind, max_score }
    }

    pub fn kind(&self) -> RowKind {
        self.kind
    }

    pub fn check(&self, field: &str, value: &Value) -> Result<(), FieldError> {
        if !self.kind.is_editable(field) {
            return Err(FieldError::NotEditable {
                field: field.to_string(),
                kind: self.kind.as_str(),
            });
        }
        match (self.kind, field) {
            (RowKind::Attendance, "status") => check_status(field, value),
            (RowKind::Grade, "score") => self.check_score(field, value),
            (RowKind::Slot, "class_id" | "time_slot") => check_required_text(field, value),
            // notes, subject, room
            _ => check_optional_text(field, value),
        }
    }

    fn check_score(&self, field: &str, value: &Value) -> Result<(), FieldError> {
        if value.is_null() {
            return Ok(());
        }
        let Some(score) = value.as_f64() else {
            return Err(invalid(field, "expected a number or null"));
        };
        if !score.is_finite() {
            return Err(invalid(field, "score must be finite"));
        }
        let max = self.max_score.unwrap_or(f64::MAX);
        if score < 0.0 || score > max {
            return Err(FieldError::OutOfRange {
                field: field.to_string(),
                value: score,
                min: 0.0,
                max,
            });
        }
        Ok(())
    }
}

fn check_status(field: &str, value: &Value) -> Result<(), FieldError> {
    match value {
        Value::Null => Ok(()),
        Value::String(s) if ATTENDANCE_STATUSES.contains(&s.as_str()) => Ok(()),
        _ => Err(invalid(
            field,
            "status must be one of: present, absent, late, excused",
        )),
    }
}

fn check_required_text(field: &str, value: &Value) -> Result<(), FieldError> {
    match value.as_str() {
        Some(s) if !s.trim().is_empty() => Ok(()),
        _ => Err(invalid(field, "expected a non-empty string")),
    }
}

fn check_optional_text(field: &str, value: &Value) -> Result<(), FieldError> {
    match value {
        Value::Null | Value::String(_) => Ok(()),
        _ => Err(invalid(field, "expected a string or null")),
    }
}

fn invalid(field: &str, reason: &str) -> FieldError {
    FieldError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
