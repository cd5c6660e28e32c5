use super::baseline::BaselineStore;
use super::guard::{FieldError, FieldGuard};
use super::lock::LockGuard;
use super::overlay::PendingOverlay;
use super::project::project;
use super::row::{same_value, Row, RowId, SheetScope};
use super::save::{
    BatchEntry, InFlightBatch, SaveCoordinator, SaveFailure, SaveRefused, SaveReport, SaveState,
};
use super::selection::SelectionSet;
use crate::backend::{BackendError, SessionContext, SheetBackend};
use serde::Serialize;
use serde_json::Value;
use std::borrow::Cow;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What the fetch collaborator returns for one scope.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetPayload {
    pub rows: Vec<Row>,
    pub locked: bool,
    pub revision: String,
    pub max_score: Option<f64>,
}

#[derive(Debug, thiserror::Error)]
pub enum SheetError {
    #[error("row {0} is not part of this sheet")]
    UnknownRow(RowId),

    #[error("duplicate row id {0} in snapshot")]
    DuplicateRow(RowId),

    #[error("row {row_id} is a {found} row, this sheet holds {expected} rows")]
    WrongKind {
        row_id: RowId,
        found: &'static str,
        expected: &'static str,
    },

    #[error(transparent)]
    Field(#[from] FieldError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl SheetError {
    pub fn code(&self) -> &'static str {
        match self {
            SheetError::UnknownRow(_) => "not_found",
            SheetError::DuplicateRow(_) | SheetError::WrongKind { .. } => "bad_snapshot",
            SheetError::Field(_) => "invalid_value",
            SheetError::Backend(e) => e.code(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EditOutcome {
    Applied { rows: usize },
    /// The sheet is locked; nothing changed.
    Locked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadReport {
    pub generation: u64,
    pub rows: usize,
    pub locked: bool,
    pub dropped_edits: usize,
    pub dropped_selections: usize,
}

/// One bulk-edit session over one scope.
#[derive(Debug)]
pub struct Sheet {
    scope: SheetScope,
    guard: FieldGuard,
    baseline: BaselineStore,
    overlay: PendingOverlay,
    selection: SelectionSet,
    lock: LockGuard,
    saver: SaveCoordinator,
}

impl Sheet {
    pub fn new(scope: SheetScope) -> Self {
        let guard = FieldGuard::new(scope.row_kind(), None);
        Self {
            scope,
            guard,
            baseline: BaselineStore::default(),
            overlay: PendingOverlay::default(),
            selection: SelectionSet::default(),
            lock: LockGuard::default(),
            saver: SaveCoordinator::default(),
        }
    }

    pub fn scope(&self) -> &SheetScope {
        &self.scope
    }

    pub fn baseline(&self) -> &[Row] {
        self.baseline.get()
    }

    pub fn revision(&self) -> &str {
        self.baseline.revision()
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    pub fn save_state(&self) -> SaveState {
        self.saver.state()
    }

    pub fn selection(&self) -> &SelectionSet {
        &self.selection
    }

    pub fn overlay(&self) -> &PendingOverlay {
        &self.overlay
    }

    pub fn pending_count(&self) -> usize {
        self.overlay.count()
    }

    /// Pending locally or sent but not yet reflected in the baseline.
    pub fn is_pending(&self, row_id: &str) -> bool {
        self.overlay.has(row_id) || self.saver.unconfirmed().is_some_and(|u| u.has(row_id))
    }

    pub fn can_save(&self) -> bool {
        self.baseline.generation() > 0
            && !self.lock.is_locked()
            && self.saver.is_idle()
            && !self.overlay.is_empty()
    }

    /// Replace the baseline with a fresh payload. Edits and selections for
    /// rows that vanished are dropped in the same transition.
    pub fn load(&mut self, payload: SheetPayload) -> Result<LoadReport, SheetError> {
        let expected = self.scope.row_kind();
        if let Some(row) = payload.rows.iter().find(|r| r.kind != expected) {
            return Err(SheetError::WrongKind {
                row_id: row.row_id.clone(),
                found: row.kind.as_str(),
                expected: expected.as_str(),
            });
        }
        let rows = payload.rows.len();
        self.baseline
            .load(payload.rows, payload.revision)
            .map_err(SheetError::DuplicateRow)?;
        self.guard = FieldGuard::new(expected, payload.max_score);
        self.lock.observe(payload.locked);

        let baseline = &self.baseline;
        let dropped_edits = self.overlay.retain_rows(|id| baseline.contains(id));
        let dropped_selections = self.selection.retain(|id| baseline.contains(id));
        self.saver.retain_rows(|id| baseline.contains(id));
        self.saver.settle();

        let report = LoadReport {
            generation: self.baseline.generation(),
            rows,
            locked: payload.locked,
            dropped_edits,
            dropped_selections,
        };
        debug!(
            scope = %self.scope.key(),
            generation = report.generation,
            rows,
            locked = report.locked,
            dropped_edits,
            dropped_selections,
            "baseline loaded"
        );
        Ok(report)
    }

    pub fn refresh<B>(
        &mut self,
        ctx: &SessionContext,
        backend: &B,
    ) -> Result<LoadReport, SheetError>
    where
        B: SheetBackend + ?Sized,
    {
        let payload = backend.fetch(ctx, &self.scope)?;
        self.load(payload)
    }

    /// What the user sees right now.
    pub fn view(&self) -> Vec<Cow<'_, Row>> {
        match self.saver.unconfirmed() {
            Some(unconfirmed) => project(self.baseline.get(), &[unconfirmed, &self.overlay]),
            None => project(self.baseline.get(), &[&self.overlay]),
        }
    }

    pub fn set_field(
        &mut self,
        row_id: &str,
        field: &str,
        value: Value,
    ) -> Result<EditOutcome, SheetError> {
        if self.lock.is_locked() {
            return Ok(EditOutcome::Locked);
        }
        if !self.baseline.contains(row_id) {
            return Err(SheetError::UnknownRow(row_id.to_string()));
        }
        self.guard.check(field, &value)?;
        self.overlay.set_field(row_id, field, value);
        Ok(EditOutcome::Applied { rows: 1 })
    }

    /// Same field/value on several rows. Either every row is updated or,
    /// on any error, none is.
    pub fn set_many(
        &mut self,
        row_ids: &[RowId],
        field: &str,
        value: Value,
    ) -> Result<EditOutcome, SheetError> {
        if self.lock.is_locked() {
            return Ok(EditOutcome::Locked);
        }
        if let Some(missing) = row_ids.iter().find(|id| !self.baseline.contains(id)) {
            return Err(SheetError::UnknownRow(missing.clone()));
        }
        self.guard.check(field, &value)?;
        self.overlay
            .set_many(row_ids.iter().map(String::as_str), field, &value);
        let rows = row_ids.iter().collect::<BTreeSet<_>>().len();
        Ok(EditOutcome::Applied { rows })
    }

    /// Apply one field/value to every selected row, then clear the selection.
    pub fn bulk_apply(&mut self, field: &str, value: Value) -> Result<EditOutcome, SheetError> {
        if self.lock.is_locked() {
            return Ok(EditOutcome::Locked);
        }
        let ids: Vec<RowId> = self.selection.ids().map(str::to_string).collect();
        let outcome = self.set_many(&ids, field, value)?;
        self.selection.clear();
        Ok(outcome)
    }

    pub fn toggle_selected(&mut self, row_id: &str) -> Result<bool, SheetError> {
        if !self.baseline.contains(row_id) {
            return Err(SheetError::UnknownRow(row_id.to_string()));
        }
        Ok(self.selection.toggle(row_id))
    }

    pub fn select(&mut self, row_ids: &[RowId]) -> Result<usize, SheetError> {
        if let Some(missing) = row_ids.iter().find(|id| !self.baseline.contains(id)) {
            return Err(SheetError::UnknownRow(missing.clone()));
        }
        self.selection.select_all(row_ids.iter().map(String::as_str));
        Ok(self.selection.size())
    }

    pub fn select_every_row(&mut self) -> usize {
        let baseline = &self.baseline;
        self.selection
            .select_all(baseline.get().iter().map(|r| r.row_id.as_str()));
        self.selection.size()
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    pub fn discard_row(&mut self, row_id: &str) -> bool {
        self.overlay.discard_row(row_id)
    }

    /// Cancel: drop every pending edit not yet sent.
    pub fn discard_all(&mut self) -> usize {
        let n = self.overlay.count();
        self.overlay.clear();
        n
    }

    /// Capture the overlay as the in-flight batch. Edits made after this
    /// call go to a fresh overlay and are not part of the batch.
    pub fn begin_save(&mut self) -> Result<InFlightBatch, SaveRefused> {
        if self.baseline.generation() == 0 {
            return Err(SaveRefused::NotLoaded);
        }
        if self.lock.is_locked() {
            return Err(SaveRefused::Locked);
        }
        if !self.saver.is_idle() {
            return Err(SaveRefused::AlreadySaving);
        }
        if self.overlay.is_empty() {
            return Err(SaveRefused::NoChanges);
        }

        let entries = diff_against_baseline(&self.baseline, &self.overlay);
        if entries.is_empty() {
            // Every pending value already matches the server.
            self.overlay.clear();
            return Err(SaveRefused::NoChanges);
        }
        let edits = self.overlay.take();
        let id = self.saver.start(edits, entries.len())?;
        info!(
            scope = %self.scope.key(),
            batch = %id,
            rows = entries.len(),
            "save started"
        );
        Ok(InFlightBatch {
            id,
            revision: self.baseline.revision().to_string(),
            entries,
        })
    }

    pub fn finish_save(&mut self, batch_id: Uuid, result: Result<(), SaveFailure>) -> SaveReport {
        match result {
            Ok(()) => match self.saver.succeed(batch_id) {
                Some(rows) => {
                    info!(scope = %self.scope.key(), batch = %batch_id, rows, "save acknowledged");
                    SaveReport::Saved {
                        batch_id,
                        rows,
                        refetch_error: None,
                    }
                }
                None => {
                    debug!(batch = %batch_id, "ignoring completion for batch not in flight");
                    SaveReport::Ignored { batch_id }
                }
            },
            Err(failure) => match self.saver.fail(batch_id) {
                Some(edits) => {
                    self.overlay.absorb_older(edits);
                    let baseline = &self.baseline;
                    self.overlay.retain_rows(|id| baseline.contains(id));
                    warn!(
                        scope = %self.scope.key(),
                        batch = %batch_id,
                        code = failure.code(),
                        "save failed: {failure}"
                    );
                    SaveReport::Failed { batch_id, failure }
                }
                None => {
                    debug!(batch = %batch_id, "ignoring failure for batch not in flight");
                    SaveReport::Ignored { batch_id }
                }
            },
        }
    }

    /// Begin, send, finish and, on success, refetch before returning.
    pub fn save<B>(
        &mut self,
        ctx: &SessionContext,
        backend: &mut B,
    ) -> Result<SaveReport, SaveRefused>
    where
        B: SheetBackend + ?Sized,
    {
        let batch = self.begin_save()?;
        let result = backend.save_batch(ctx, &self.scope, &batch);
        let mut report = self.finish_save(batch.id, result);
        if let SaveReport::Saved { refetch_error, .. } = &mut report {
            if let Err(e) = self.refresh(ctx, &*backend) {
                warn!(scope = %self.scope.key(), "refetch after save failed: {e}");
                *refetch_error = Some(e.to_string());
            }
        }
        Ok(report)
    }
}

fn diff_against_baseline(baseline: &BaselineStore, overlay: &PendingOverlay) -> Vec<BatchEntry> {
    overlay
        .iter()
        .filter_map(|(row_id, fields)| {
            let row = baseline.row(row_id)?;
            let changes: super::row::FieldMap = fields
                .iter()
                .filter(|(field, value)| !same_value(row.field(field), value))
                .map(|(field, value)| (field.clone(), value.clone()))
                .collect();
            (!changes.is_empty()).then(|| BatchEntry {
                row_id: row_id.clone(),
                changes,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheet::RowKind;
    use chrono::NaiveDate;
    use serde_json::json;

    fn attendance_scope() -> SheetScope {
        SheetScope::Attendance {
            class_id: "c1".into(),
            date: NaiveDate::from_ymd_opt(2026, 3, 2).expect("date"),
        }
    }

    fn attendance_rows(ids: &[&str]) -> Vec<Row> {
        ids.iter()
            .map(|id| Row::new(*id, RowKind::Attendance).with_field("status", json!("present")))
            .collect()
    }

    fn payload(rows: Vec<Row>, locked: bool) -> SheetPayload {
        SheetPayload {
            rows,
            locked,
            revision: "rev-1".into(),
            max_score: None,
        }
    }

    fn loaded_sheet(ids: &[&str]) -> Sheet {
        let mut sheet = Sheet::new(attendance_scope());
        sheet
            .load(payload(attendance_rows(ids), false))
            .expect("load");
        sheet
    }

    fn ctx() -> SessionContext {
        SessionContext {
            branch_id: "b1".into(),
            actor: "tester".into(),
        }
    }

    /// Applies accepted batches to its own rows and serves them back.
    struct FakeBackend {
        rows: Vec<Row>,
        reject_with: Option<SaveFailure>,
        /// Serve fetches only until the first batch lands.
        unreachable_after_save: bool,
        batches: Vec<InFlightBatch>,
    }

    impl FakeBackend {
        fn new(rows: Vec<Row>) -> Self {
            Self {
                rows,
                reject_with: None,
                unreachable_after_save: false,
                batches: Vec::new(),
            }
        }
    }

    impl SheetBackend for FakeBackend {
        fn fetch(
            &self,
            _ctx: &SessionContext,
            _scope: &SheetScope,
        ) -> Result<SheetPayload, BackendError> {
            if self.unreachable_after_save && !self.batches.is_empty() {
                return Err(BackendError::Invalid("connection reset".into()));
            }
            Ok(SheetPayload {
                rows: self.rows.clone(),
                locked: false,
                revision: format!("rev-{}", self.batches.len() + 1),
                max_score: None,
            })
        }

        fn save_batch(
            &mut self,
            _ctx: &SessionContext,
            _scope: &SheetScope,
            batch: &InFlightBatch,
        ) -> Result<(), SaveFailure> {
            if let Some(failure) = self.reject_with.clone() {
                return Err(failure);
            }
            for entry in &batch.entries {
                if let Some(row) = self.rows.iter_mut().find(|r| r.row_id == entry.row_id) {
                    row.fields.extend(entry.changes.clone());
                }
            }
            self.batches.push(batch.clone());
            Ok(())
        }
    }

    #[test]
    fn bulk_mark_changes_view_not_baseline() {
        let mut sheet = loaded_sheet(&["s1", "s2", "s3"]);
        assert_eq!(sheet.select_every_row(), 3);
        let outcome = sheet.bulk_apply("status", json!("absent")).expect("bulk");
        assert_eq!(outcome, EditOutcome::Applied { rows: 3 });

        let view = sheet.view();
        assert!(view.iter().all(|r| r.field("status") == &json!("absent")));
        assert!(sheet
            .baseline()
            .iter()
            .all(|r| r.field("status") == &json!("present")));
        assert_eq!(sheet.selection().size(), 0);
        assert_eq!(sheet.pending_count(), 3);
    }

    #[test]
    fn set_many_is_all_or_nothing() {
        let mut sheet = loaded_sheet(&["s1", "s2", "s3"]);
        let ids: Vec<RowId> = vec!["s1".into(), "s2".into(), "s3".into()];
        sheet.set_many(&ids, "status", json!("late")).expect("set_many");
        assert!(sheet.view().iter().all(|r| r.field("status") == &json!("late")));

        let with_ghost: Vec<RowId> = vec!["s1".into(), "ghost".into()];
        let err = sheet
            .set_many(&with_ghost, "status", json!("excused"))
            .unwrap_err();
        assert!(matches!(err, SheetError::UnknownRow(id) if id == "ghost"));
        assert_eq!(sheet.view()[0].field("status"), &json!("late"));
    }

    #[test]
    fn set_many_counts_each_row_once() {
        let mut sheet = loaded_sheet(&["s1", "s2"]);
        let ids: Vec<RowId> = vec!["s1".into(), "s2".into(), "s1".into()];
        let outcome = sheet.set_many(&ids, "status", json!("absent")).expect("set_many");
        assert_eq!(outcome, EditOutcome::Applied { rows: 2 });
        assert_eq!(sheet.pending_count(), 2);
    }

    #[test]
    fn locked_sheet_ignores_edits() {
        let mut sheet = Sheet::new(attendance_scope());
        sheet
            .load(payload(attendance_rows(&["s1", "s2"]), true))
            .expect("load");
        for _ in 0..3 {
            assert_eq!(
                sheet.set_field("s1", "status", json!("absent")).expect("edit"),
                EditOutcome::Locked
            );
        }
        sheet.select_every_row();
        assert_eq!(
            sheet.bulk_apply("status", json!("late")).expect("bulk"),
            EditOutcome::Locked
        );
        let ids: Vec<RowId> = vec!["s2".into()];
        assert_eq!(
            sheet.set_many(&ids, "status", json!("late")).expect("many"),
            EditOutcome::Locked
        );
        assert_eq!(sheet.pending_count(), 0);
        assert!(!sheet.can_save());
        assert_eq!(sheet.begin_save().unwrap_err(), SaveRefused::Locked);
    }

    #[test]
    fn reload_drops_vanished_selection_and_edits() {
        let mut sheet = loaded_sheet(&["a", "b", "c"]);
        sheet.select(&["a".into(), "b".into()]).expect("select");
        sheet.set_field("b", "status", json!("absent")).expect("edit");
        sheet.set_field("c", "status", json!("late")).expect("edit");

        let report = sheet
            .load(payload(attendance_rows(&["a", "c"]), false))
            .expect("reload");
        assert_eq!(report.dropped_selections, 1);
        assert_eq!(report.dropped_edits, 1);
        assert!(!sheet.selection().is_selected("b"));
        assert_eq!(sheet.selection().size(), 1);
        assert!(sheet.overlay().has("c"));
        assert!(!sheet.overlay().has("b"));
    }

    #[test]
    fn grade_score_above_max_never_reaches_overlay() {
        let mut sheet = Sheet::new(SheetScope::Grades {
            assessment_id: "quiz-1".into(),
        });
        sheet
            .load(SheetPayload {
                rows: vec![Row::new("studentX", RowKind::Grade)
                    .with_field("score", Value::Null)
                    .with_field("notes", Value::Null)],
                locked: false,
                revision: "r".into(),
                max_score: Some(100.0),
            })
            .expect("load");

        let err = sheet
            .set_field("studentX", "score", json!(150))
            .unwrap_err();
        assert!(matches!(err, SheetError::Field(FieldError::OutOfRange { .. })));
        assert_eq!(sheet.pending_count(), 0);

        sheet.set_field("studentX", "score", json!(99.5)).expect("valid");
        assert_eq!(sheet.pending_count(), 1);
    }

    #[test]
    fn success_clears_only_the_in_flight_batch() {
        let mut sheet = loaded_sheet(&["A", "B", "C"]);
        sheet.set_field("A", "status", json!("absent")).expect("A");
        sheet.set_field("B", "status", json!("late")).expect("B");

        let batch = sheet.begin_save().expect("begin");
        assert_eq!(batch.entries.len(), 2);
        assert_eq!(sheet.save_state(), SaveState::Saving);
        assert_eq!(sheet.pending_count(), 0);
        // In-flight edits stay visible while the request is out.
        assert_eq!(sheet.view()[0].field("status"), &json!("absent"));

        sheet.set_field("C", "status", json!("excused")).expect("C");
        assert_eq!(sheet.begin_save().unwrap_err(), SaveRefused::AlreadySaving);

        let report = sheet.finish_save(batch.id, Ok(()));
        assert!(matches!(report, SaveReport::Saved { rows: 2, .. }));
        assert_eq!(sheet.pending_count(), 1);
        assert!(sheet.overlay().has("C"));
        assert!(!sheet.overlay().has("A"));
        assert_eq!(sheet.save_state(), SaveState::Settling);

        let mut confirmed = attendance_rows(&["A", "B", "C"]);
        confirmed[0].fields.insert("status".into(), json!("absent"));
        confirmed[1].fields.insert("status".into(), json!("late"));
        sheet.load(payload(confirmed, false)).expect("refetch");
        assert_eq!(sheet.save_state(), SaveState::Idle);
        assert_eq!(sheet.view()[1].field("status"), &json!("late"));
        assert_eq!(sheet.view()[2].field("status"), &json!("excused"));
    }

    #[test]
    fn failure_preserves_every_edit() {
        let mut sheet = loaded_sheet(&["A", "B"]);
        sheet.set_field("A", "status", json!("absent")).expect("A");
        let before = sheet.overlay().clone();

        let batch = sheet.begin_save().expect("begin");
        let report = sheet.finish_save(batch.id, Err(SaveFailure::Transport("offline".into())));
        assert!(matches!(report, SaveReport::Failed { .. }));
        assert_eq!(sheet.overlay(), &before);
        assert_eq!(sheet.save_state(), SaveState::Idle);
    }

    #[test]
    fn failure_keeps_newer_edits_on_top() {
        let mut sheet = loaded_sheet(&["A", "B"]);
        sheet.set_field("A", "status", json!("absent")).expect("A");
        let batch = sheet.begin_save().expect("begin");
        sheet.set_field("A", "status", json!("late")).expect("A again");

        sheet.finish_save(
            batch.id,
            Err(SaveFailure::Stale("changed by someone else".into())),
        );
        assert_eq!(sheet.overlay().count(), 1);
        assert_eq!(sheet.view()[0].field("status"), &json!("late"));
    }

    #[test]
    fn late_completion_is_ignored() {
        let mut sheet = loaded_sheet(&["A"]);
        sheet.set_field("A", "status", json!("absent")).expect("A");
        let batch = sheet.begin_save().expect("begin");
        assert!(matches!(
            sheet.finish_save(Uuid::new_v4(), Ok(())),
            SaveReport::Ignored { .. }
        ));
        assert_eq!(sheet.save_state(), SaveState::Saving);
        assert!(matches!(
            sheet.finish_save(batch.id, Ok(())),
            SaveReport::Saved { .. }
        ));
        assert!(matches!(
            sheet.finish_save(batch.id, Ok(())),
            SaveReport::Ignored { .. }
        ));
    }

    #[test]
    fn edits_equal_to_baseline_are_not_sent() {
        let mut sheet = loaded_sheet(&["A", "B"]);
        sheet.set_field("A", "status", json!("present")).expect("noop");
        assert_eq!(sheet.begin_save().unwrap_err(), SaveRefused::NoChanges);
        assert_eq!(sheet.pending_count(), 0);

        sheet.set_field("A", "status", json!("present")).expect("noop");
        sheet.set_field("B", "status", json!("late")).expect("B");
        let batch = sheet.begin_save().expect("begin");
        assert_eq!(batch.entries.len(), 1);
        assert_eq!(batch.entries[0].row_id, "B");
        assert_eq!(batch.revision, "rev-1");
    }

    #[test]
    fn save_round_trip_refetches_before_returning() {
        let mut backend = FakeBackend::new(attendance_rows(&["A", "B"]));
        let mut sheet = Sheet::new(attendance_scope());
        sheet.refresh(&ctx(), &backend).expect("open");
        sheet.set_field("B", "status", json!("absent")).expect("B");

        let report = sheet.save(&ctx(), &mut backend).expect("save");
        assert!(matches!(
            report,
            SaveReport::Saved {
                rows: 1,
                refetch_error: None,
                ..
            }
        ));
        assert_eq!(backend.batches.len(), 1);
        assert_eq!(sheet.save_state(), SaveState::Idle);
        assert_eq!(sheet.pending_count(), 0);
        assert_eq!(sheet.baseline()[1].field("status"), &json!("absent"));
        assert_eq!(sheet.revision(), "rev-2");
    }

    #[test]
    fn failed_refetch_after_save_holds_settling_until_refresh() {
        let mut backend = FakeBackend::new(attendance_rows(&["A", "B"]));
        let mut sheet = Sheet::new(attendance_scope());
        sheet.refresh(&ctx(), &backend).expect("open");
        sheet.set_field("A", "status", json!("late")).expect("A");
        backend.unreachable_after_save = true;

        let report = sheet.save(&ctx(), &mut backend).expect("save");
        let SaveReport::Saved { refetch_error, .. } = &report else {
            panic!("expected saved, got {report:?}");
        };
        assert!(refetch_error.is_some());
        assert_eq!(sheet.save_state(), SaveState::Settling);
        assert_eq!(sheet.revision(), "rev-1");
        assert_eq!(sheet.view()[0].field("status"), &json!("late"));
        assert_eq!(sheet.baseline()[0].field("status"), &json!("present"));

        sheet.set_field("B", "status", json!("absent")).expect("B");
        assert_eq!(sheet.begin_save().unwrap_err(), SaveRefused::AlreadySaving);
        assert!(!sheet.can_save());

        backend.unreachable_after_save = false;
        sheet.refresh(&ctx(), &backend).expect("refresh");
        assert_eq!(sheet.save_state(), SaveState::Idle);
        assert_eq!(sheet.baseline()[0].field("status"), &json!("late"));
        assert_eq!(sheet.view()[1].field("status"), &json!("absent"));
        assert!(sheet.begin_save().is_ok());
    }

    #[test]
    fn rejected_save_reports_validation_issues() {
        let mut backend = FakeBackend::new(attendance_rows(&["A"]));
        backend.reject_with = Some(SaveFailure::Validation {
            message: "1 edit rejected".into(),
            issues: vec![crate::sheet::FieldIssue {
                row_id: "A".into(),
                field: "status".into(),
                message: "closed day".into(),
            }],
        });
        let mut sheet = Sheet::new(attendance_scope());
        sheet.refresh(&ctx(), &backend).expect("open");
        sheet.set_field("A", "status", json!("absent")).expect("A");

        let report = sheet.save(&ctx(), &mut backend).expect("save");
        let SaveReport::Failed { failure, .. } = &report else {
            panic!("expected failure, got {report:?}");
        };
        assert_eq!(failure.issues().len(), 1);
        assert!(!failure.refetch_required());
        assert!(sheet.overlay().has("A"));
        assert!(sheet.can_save());
    }

    #[test]
    fn snapshot_of_wrong_kind_is_rejected() {
        let mut sheet = Sheet::new(attendance_scope());
        let err = sheet
            .load(payload(vec![Row::new("x", RowKind::Slot)], false))
            .unwrap_err();
        assert!(matches!(err, SheetError::WrongKind { .. }));
        assert_eq!(sheet.begin_save().unwrap_err(), SaveRefused::NotLoaded);
    }
}
