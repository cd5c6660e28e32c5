use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type RowId = String;

/// Editable field name -> value. Only ever holds the fields of one row kind.
pub type FieldMap = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowKind {
    Attendance,
    Grade,
    Slot,
}

impl RowKind {
    pub fn editable_fields(self) -> &'static [&'static str] {
        match self {
            RowKind::Attendance => &["status"],
            RowKind::Grade => &["score", "notes"],
            RowKind::Slot => &["class_id", "time_slot", "subject", "room"],
        }
    }

    pub fn is_editable(self, field: &str) -> bool {
        self.editable_fields().contains(&field)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RowKind::Attendance => "attendance",
            RowKind::Grade => "grade",
            RowKind::Slot => "slot",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    pub row_id: RowId,
    pub kind: RowKind,
    pub fields: FieldMap,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Row {
    pub fn new(row_id: impl Into<RowId>, kind: RowKind) -> Self {
        Self {
            row_id: row_id.into(),
            kind,
            fields: FieldMap::new(),
            labels: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, field: &str, value: serde_json::Value) -> Self {
        self.fields.insert(field.to_string(), value);
        self
    }

    pub fn with_label(mut self, key: &str, value: impl Into<String>) -> Self {
        self.labels.insert(key.to_string(), value.into());
        self
    }

    /// A field the row does not carry reads as null.
    pub fn field(&self, name: &str) -> &serde_json::Value {
        self.fields.get(name).unwrap_or(&serde_json::Value::Null)
    }
}

/// The query a baseline snapshot was fetched for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SheetScope {
    Attendance {
        #[serde(rename = "classId")]
        class_id: String,
        date: NaiveDate,
    },
    Grades {
        #[serde(rename = "assessmentId")]
        assessment_id: String,
    },
    Timetable {
        #[serde(rename = "templateId")]
        template_id: String,
    },
}

impl SheetScope {
    pub fn row_kind(&self) -> RowKind {
        match self {
            SheetScope::Attendance { .. } => RowKind::Attendance,
            SheetScope::Grades { .. } => RowKind::Grade,
            SheetScope::Timetable { .. } => RowKind::Slot,
        }
    }

    /// Stable key used for lock bookkeeping on the backend.
    pub fn key(&self) -> String {
        match self {
            SheetScope::Attendance { class_id, date } => format!("attendance:{class_id}:{date}"),
            SheetScope::Grades { assessment_id } => format!("grades:{assessment_id}"),
            SheetScope::Timetable { template_id } => format!("timetable:{template_id}"),
        }
    }
}

/// Field equality as the server sees it. Numbers compare by value, so the
/// `18` a user typed matches the `18.0` a REAL column hands back.
pub fn same_value(a: &serde_json::Value, b: &serde_json::Value) -> bool {
    match (a, b) {
        (serde_json::Value::Number(x), serde_json::Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}
