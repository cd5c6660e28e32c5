use super::{BackendError, LockControl, SessionContext, SheetBackend};
use crate::db;
use crate::sheet::{
    FieldGuard, FieldIssue, FieldMap, InFlightBatch, Row, RowKind, SaveFailure, SheetPayload,
    SheetScope,
};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::{debug, info};

pub const MAX_BATCH_EDITS_KEY: &str = "sheets.maxBatchEdits";
pub const DEFAULT_MAX_BATCH_EDITS: usize = 5000;

/// The workspace database acting as the server for sheets.
pub struct SqliteBackend<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteBackend<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn max_batch_edits(&self) -> usize {
        match db::settings_get_json(self.conn, MAX_BATCH_EDITS_KEY) {
            Ok(Some(v)) => v
                .as_u64()
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or(DEFAULT_MAX_BATCH_EDITS),
            _ => DEFAULT_MAX_BATCH_EDITS,
        }
    }

    fn scope_locked(&self, scope: &SheetScope) -> Result<bool, rusqlite::Error> {
        let locked: Option<i64> = self
            .conn
            .query_row(
                "SELECT locked FROM sheet_locks WHERE scope_key = ?",
                [scope.key()],
                |r| r.get(0),
            )
            .optional()?;
        Ok(locked.unwrap_or(0) != 0)
    }

    fn require_class(&self, ctx: &SessionContext, class_id: &str) -> Result<String, BackendError> {
        self.conn
            .query_row(
                "SELECT name FROM classes WHERE id = ? AND branch_id = ?",
                (class_id, &ctx.branch_id),
                |r| r.get(0),
            )
            .optional()?
            .ok_or(BackendError::NotFound { what: "class" })
    }

    fn student_rows(
        &self,
        class_id: &str,
        kind: RowKind,
    ) -> Result<Vec<Row>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            "SELECT id, last_name, first_name, student_no
             FROM students
             WHERE class_id = ? AND active = 1
             ORDER BY sort_order",
        )?;
        stmt.query_map([class_id], |r| {
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            let student_no: Option<String> = r.get(3)?;
            let mut row = Row::new(r.get::<_, String>(0)?, kind)
                .with_label("displayName", format!("{last}, {first}"));
            if let Some(no) = student_no {
                row = row.with_label("studentNo", no);
            }
            Ok(row)
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    }

    fn attendance_rows(
        &self,
        ctx: &SessionContext,
        class_id: &str,
        date: &str,
    ) -> Result<Vec<Row>, BackendError> {
        self.require_class(ctx, class_id)?;
        let mut rows = self.student_rows(class_id, RowKind::Attendance)?;

        let mut stmt = self.conn.prepare(
            "SELECT student_id, status FROM attendance_marks WHERE class_id = ? AND date = ?",
        )?;
        let marks: HashMap<String, String> = stmt
            .query_map((class_id, date), |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<Result<_, _>>()?;

        for row in &mut rows {
            let status = marks
                .get(&row.row_id)
                .map(|s| Value::String(s.clone()))
                .unwrap_or(Value::Null);
            row.fields.insert("status".into(), status);
        }
        Ok(rows)
    }

    fn grade_rows(
        &self,
        ctx: &SessionContext,
        assessment_id: &str,
    ) -> Result<(Vec<Row>, f64), BackendError> {
        let (class_id, title, max_score): (String, String, f64) = self
            .conn
            .query_row(
                "SELECT a.class_id, a.title, a.max_score
                 FROM assessments a JOIN classes c ON c.id = a.class_id
                 WHERE a.id = ? AND c.branch_id = ?",
                (assessment_id, &ctx.branch_id),
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?
            .ok_or(BackendError::NotFound { what: "assessment" })?;
        let mut rows = self.student_rows(&class_id, RowKind::Grade)?;

        let mut stmt = self.conn.prepare(
            "SELECT student_id, score, notes FROM grade_entries WHERE assessment_id = ?",
        )?;
        let entries: HashMap<String, (Option<f64>, Option<String>)> = stmt
            .query_map([assessment_id], |r| Ok((r.get(0)?, (r.get(1)?, r.get(2)?))))?
            .collect::<Result<_, _>>()?;

        for row in &mut rows {
            let (score, notes) = entries.get(&row.row_id).cloned().unwrap_or((None, None));
            row.fields.insert("score".into(), json!(score));
            row.fields.insert("notes".into(), json!(notes));
            row.labels.insert("assessment".into(), title.clone());
        }
        Ok((rows, max_score))
    }

    fn slot_rows(
        &self,
        ctx: &SessionContext,
        template_id: &str,
    ) -> Result<Vec<Row>, BackendError> {
        self.conn
            .query_row(
                "SELECT 1 FROM timetable_templates WHERE id = ? AND branch_id = ?",
                (template_id, &ctx.branch_id),
                |r| r.get::<_, i64>(0),
            )
            .optional()?
            .ok_or(BackendError::NotFound { what: "timetable template" })?;

        let mut stmt = self.conn.prepare(
            "SELECT s.id, s.class_id, s.time_slot, s.subject, s.room, c.name
             FROM timetable_slots s LEFT JOIN classes c ON c.id = s.class_id
             WHERE s.template_id = ?
             ORDER BY s.sort_order",
        )?;
        let rows = stmt
            .query_map([template_id], |r| {
                let class_id: String = r.get(1)?;
                let time_slot: String = r.get(2)?;
                let subject: Option<String> = r.get(3)?;
                let room: Option<String> = r.get(4)?;
                let class_name: Option<String> = r.get(5)?;
                Ok(Row::new(r.get::<_, String>(0)?, RowKind::Slot)
                    .with_field("class_id", json!(class_id))
                    .with_field("time_slot", json!(time_slot))
                    .with_field("subject", json!(subject))
                    .with_field("room", json!(room))
                    .with_label("className", class_name.unwrap_or_default()))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn apply_entry(
        &self,
        ctx: &SessionContext,
        scope: &SheetScope,
        merged: &Row,
        now: &str,
    ) -> Result<(), rusqlite::Error> {
        match scope {
            SheetScope::Attendance { class_id, date } => {
                let date = date.to_string();
                match merged.field("status").as_str() {
                    Some(status) => {
                        self.conn.execute(
                            "INSERT INTO attendance_marks(class_id, student_id, date, status, updated_by, updated_at)
                             VALUES(?, ?, ?, ?, ?, ?)
                             ON CONFLICT(class_id, student_id, date) DO UPDATE SET
                               status = excluded.status,
                               updated_by = excluded.updated_by,
                               updated_at = excluded.updated_at",
                            (class_id, &merged.row_id, &date, status, &ctx.actor, now),
                        )?;
                    }
                    None => {
                        self.conn.execute(
                            "DELETE FROM attendance_marks WHERE class_id = ? AND student_id = ? AND date = ?",
                            (class_id, &merged.row_id, &date),
                        )?;
                    }
                }
            }
            SheetScope::Grades { assessment_id } => {
                let score = merged.field("score").as_f64();
                let notes = merged.field("notes").as_str();
                if score.is_none() && notes.is_none() {
                    self.conn.execute(
                        "DELETE FROM grade_entries WHERE assessment_id = ? AND student_id = ?",
                        (assessment_id, &merged.row_id),
                    )?;
                } else {
                    self.conn.execute(
                        "INSERT INTO grade_entries(assessment_id, student_id, score, notes, updated_by, updated_at)
                         VALUES(?, ?, ?, ?, ?, ?)
                         ON CONFLICT(assessment_id, student_id) DO UPDATE SET
                           score = excluded.score,
                           notes = excluded.notes,
                           updated_by = excluded.updated_by,
                           updated_at = excluded.updated_at",
                        (assessment_id, &merged.row_id, score, notes, &ctx.actor, now),
                    )?;
                }
            }
            SheetScope::Timetable { template_id } => {
                self.conn.execute(
                    "UPDATE timetable_slots
                     SET class_id = ?, time_slot = ?, subject = ?, room = ?
                     WHERE id = ? AND template_id = ?",
                    (
                        merged.field("class_id").as_str(),
                        merged.field("time_slot").as_str(),
                        merged.field("subject").as_str(),
                        merged.field("room").as_str(),
                        &merged.row_id,
                        template_id,
                    ),
                )?;
            }
        }
        Ok(())
    }

    fn unknown_classes(
        &self,
        ctx: &SessionContext,
        merged: &[Row],
        edited: &HashMap<&str, &FieldMap>,
    ) -> Result<Vec<FieldIssue>, rusqlite::Error> {
        let mut issues = Vec::new();
        for row in merged {
            let Some(changes) = edited.get(row.row_id.as_str()) else {
                continue;
            };
            if !changes.contains_key("class_id") {
                continue;
            }
            let class_id = row.field("class_id").as_str().unwrap_or_default();
            let known = self
                .conn
                .query_row(
                    "SELECT 1 FROM classes WHERE id = ? AND branch_id = ?",
                    (class_id, &ctx.branch_id),
                    |r| r.get::<_, i64>(0),
                )
                .optional()?
                .is_some();
            if !known {
                issues.push(FieldIssue {
                    row_id: row.row_id.clone(),
                    field: "class_id".into(),
                    message: format!("unknown class {class_id}"),
                });
            }
        }
        Ok(issues)
    }
}

/// Opaque token identifying one server state of a sheet. Any change to the
/// rows or the lock flag produces a different revision.
pub fn revision_of(rows: &[Row], locked: bool) -> Result<String, BackendError> {
    let bytes = serde_json::to_vec(&(rows, locked))
        .map_err(|e| BackendError::Invalid(format!("failed to encode rows: {e}")))?;
    let digest = Sha256::digest(&bytes);
    Ok(format!("{digest:x}"))
}

/// Fields whose change can move a slot into a clash.
const PLACEMENT_FIELDS: [&str; 3] = ["time_slot", "room", "class_id"];

/// Two slots in the same time slot may not share a room or a class. Only
/// rows whose placement the batch changes are checked, so a clash that
/// already exists does not block unrelated edits.
fn timetable_clashes(merged: &[Row], edited: &HashMap<&str, &FieldMap>) -> Vec<FieldIssue> {
    let mut issues = Vec::new();
    let moved = merged.iter().filter(|r| {
        edited
            .get(r.row_id.as_str())
            .is_some_and(|changes| PLACEMENT_FIELDS.iter().any(|f| changes.contains_key(*f)))
    });
    for row in moved {
        let time_slot = row.field("time_slot");
        for other in merged.iter().filter(|o| o.row_id != row.row_id) {
            if other.field("time_slot") != time_slot {
                continue;
            }
            let room = row.field("room");
            if !room.is_null() && other.field("room") == room {
                issues.push(FieldIssue {
                    row_id: row.row_id.clone(),
                    field: "room".into(),
                    message: format!(
                        "room {} is already used by slot {} at {}",
                        room.as_str().unwrap_or_default(),
                        other.row_id,
                        time_slot.as_str().unwrap_or_default()
                    ),
                });
            }
            if other.field("class_id") == row.field("class_id") {
                issues.push(FieldIssue {
                    row_id: row.row_id.clone(),
                    field: "class_id".into(),
                    message: format!(
                        "class is already scheduled by slot {} at {}",
                        other.row_id,
                        time_slot.as_str().unwrap_or_default()
                    ),
                });
            }
        }
    }
    issues
}

fn fetch_failure(e: BackendError) -> SaveFailure {
    match e {
        BackendError::NotFound { what } => SaveFailure::Stale(format!("{what} no longer exists")),
        other => SaveFailure::Transport(other.to_string()),
    }
}

impl SheetBackend for SqliteBackend<'_> {
    fn fetch(
        &self,
        ctx: &SessionContext,
        scope: &SheetScope,
    ) -> Result<SheetPayload, BackendError> {
        let (rows, max_score) = match scope {
            SheetScope::Attendance { class_id, date } => {
                (self.attendance_rows(ctx, class_id, &date.to_string())?, None)
            }
            SheetScope::Grades { assessment_id } => {
                let (rows, max) = self.grade_rows(ctx, assessment_id)?;
                (rows, Some(max))
            }
            SheetScope::Timetable { template_id } => (self.slot_rows(ctx, template_id)?, None),
        };
        let locked = self.scope_locked(scope)?;
        let revision = revision_of(&rows, locked)?;
        debug!(scope = %scope.key(), rows = rows.len(), locked, "sheet fetched");
        Ok(SheetPayload {
            rows,
            locked,
            revision,
            max_score,
        })
    }

    fn save_batch(
        &mut self,
        ctx: &SessionContext,
        scope: &SheetScope,
        batch: &InFlightBatch,
    ) -> Result<(), SaveFailure> {
        let max_edits = self.max_batch_edits();
        if batch.entries.len() > max_edits {
            return Err(SaveFailure::Validation {
                message: format!(
                    "batch exceeds max edits: {} > {}",
                    batch.entries.len(),
                    max_edits
                ),
                issues: Vec::new(),
            });
        }

        let current = self.fetch(ctx, scope).map_err(fetch_failure)?;
        if current.locked {
            return Err(SaveFailure::Stale("sheet is locked".into()));
        }
        if current.revision != batch.revision {
            return Err(SaveFailure::Stale(
                "sheet changed since it was loaded".into(),
            ));
        }

        let guard = FieldGuard::new(scope.row_kind(), current.max_score);
        let edited: HashMap<&str, &FieldMap> = batch
            .entries
            .iter()
            .map(|e| (e.row_id.as_str(), &e.changes))
            .collect();
        let mut issues = Vec::new();
        for entry in &batch.entries {
            for (field, value) in &entry.changes {
                if let Err(e) = guard.check(field, value) {
                    issues.push(FieldIssue {
                        row_id: entry.row_id.clone(),
                        field: field.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        let merged: Vec<Row> = current
            .rows
            .iter()
            .map(|row| {
                let mut row = row.clone();
                if let Some(changes) = edited.get(row.row_id.as_str()) {
                    row.fields
                        .extend(changes.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                row
            })
            .collect();
        if issues.is_empty() && matches!(scope, SheetScope::Timetable { .. }) {
            issues.extend(
                self.unknown_classes(ctx, &merged, &edited)
                    .map_err(|e| SaveFailure::Transport(e.to_string()))?,
            );
            issues.extend(timetable_clashes(&merged, &edited));
        }
        if !issues.is_empty() {
            return Err(SaveFailure::Validation {
                message: format!("{} edit(s) rejected", issues.len()),
                issues,
            });
        }

        let now = chrono::Utc::now().to_rfc3339();
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| SaveFailure::Transport(e.to_string()))?;
        for row in merged
            .iter()
            .filter(|r| edited.contains_key(r.row_id.as_str()))
        {
            self.apply_entry(ctx, scope, row, &now)
                .map_err(|e| SaveFailure::Transport(e.to_string()))?;
        }
        tx.commit()
            .map_err(|e| SaveFailure::Transport(e.to_string()))?;

        info!(
            scope = %scope.key(),
            batch = %batch.id,
            rows = batch.entries.len(),
            actor = %ctx.actor,
            "batch applied"
        );
        Ok(())
    }
}

impl LockControl for SqliteBackend<'_> {
    fn set_locked(
        &mut self,
        ctx: &SessionContext,
        scope: &SheetScope,
        locked: bool,
    ) -> Result<(), BackendError> {
        // Only scopes visible to the branch can be locked.
        self.fetch(ctx, scope)?;
        self.conn.execute(
            "INSERT INTO sheet_locks(scope_key, locked, updated_by, updated_at)
             VALUES(?, ?, ?, ?)
             ON CONFLICT(scope_key) DO UPDATE SET
               locked = excluded.locked,
               updated_by = excluded.updated_by,
               updated_at = excluded.updated_at",
            (
                scope.key(),
                i64::from(locked),
                &ctx.actor,
                chrono::Utc::now().to_rfc3339(),
            ),
        )?;
        info!(scope = %scope.key(), locked, actor = %ctx.actor, "sheet lock changed");
        Ok(())
    }
}
