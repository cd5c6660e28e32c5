use crate::backend::sqlite::SqliteBackend;
use crate::backend::{LockControl, SheetBackend};
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{
    get_optional_str, get_required_str, get_required_value, get_str_list, require_db,
    require_session,
};
use crate::ipc::types::{AppState, OpenSheet, Request};
use crate::sheet::{SaveReport, Sheet, SheetScope};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

fn sheet_view_json(sheet_id: &str, sheet: &Sheet) -> serde_json::Value {
    let selection = sheet.selection();
    let rows: Vec<serde_json::Value> = sheet
        .view()
        .iter()
        .map(|row| {
            json!({
                "rowId": row.row_id,
                "kind": row.kind,
                "fields": row.fields,
                "labels": row.labels,
                "pending": sheet.is_pending(&row.row_id),
                "selected": selection.is_selected(&row.row_id),
            })
        })
        .collect();
    json!({
        "sheetId": sheet_id,
        "scope": sheet.scope(),
        "revision": sheet.revision(),
        "locked": sheet.is_locked(),
        "saveState": sheet.save_state(),
        "canSave": sheet.can_save(),
        "pendingCount": sheet.pending_count(),
        "selected": selection.ids().collect::<Vec<_>>(),
        "rows": rows,
    })
}

fn open_sheet_mut<'a>(
    sheets: &'a mut std::collections::HashMap<String, OpenSheet>,
    params: &serde_json::Value,
) -> Result<(String, &'a mut OpenSheet), HandlerErr> {
    let sheet_id = get_required_str(params, "sheetId")?;
    match sheets.get_mut(&sheet_id) {
        Some(open) => Ok((sheet_id, open)),
        None => Err(HandlerErr::new("not_found", "sheet not open")
            .with_details(json!({ "sheetId": sheet_id }))),
    }
}

fn save_report_json(sheet_id: &str, sheet: &Sheet, report: SaveReport) -> serde_json::Value {
    let view = sheet_view_json(sheet_id, sheet);
    match report {
        SaveReport::Saved {
            batch_id,
            rows,
            refetch_error,
        } => json!({
            "status": "saved",
            "batchId": batch_id,
            "rows": rows,
            "refetchError": refetch_error,
            "view": view,
        }),
        SaveReport::Failed { batch_id, failure } => json!({
            "status": "failed",
            "batchId": batch_id,
            "code": failure.code(),
            "message": failure.to_string(),
            "issues": failure.issues(),
            "refetchRequired": failure.refetch_required(),
            "view": view,
        }),
        SaveReport::Ignored { batch_id } => json!({
            "status": "ignored",
            "batchId": batch_id,
            "view": view,
        }),
    }
}

fn sheet_open(
    state: &mut AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state.db.as_ref())?;
    let ctx = require_session(state.session.as_ref())?;
    let scope_json = get_required_value(params, "scope")?;
    let scope: SheetScope = serde_json::from_value(scope_json)
        .map_err(|e| HandlerErr::new("bad_params", format!("invalid scope: {e}")))?;

    let mut sheet = Sheet::new(scope);
    sheet.refresh(ctx, &SqliteBackend::new(conn))?;
    let sheet_id = Uuid::new_v4().to_string();
    info!(sheet = %sheet_id, scope = %sheet.scope().key(), "sheet opened");
    let view = sheet_view_json(&sheet_id, &sheet);
    state
        .sheets
        .insert(sheet_id, OpenSheet { sheet, batch: None });
    Ok(view)
}

fn sheet_view(
    state: &mut AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (sheet_id, open) = open_sheet_mut(&mut state.sheets, params)?;
    Ok(sheet_view_json(&sheet_id, &open.sheet))
}

fn sheet_set_field(
    state: &mut AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (_, open) = open_sheet_mut(&mut state.sheets, params)?;
    let row_id = get_required_str(params, "rowId")?;
    let field = get_required_str(params, "field")?;
    let value = get_required_value(params, "value")?;
    let outcome = open.sheet.set_field(&row_id, &field, value)?;
    Ok(json!({
        "edit": outcome,
        "pendingCount": open.sheet.pending_count(),
    }))
}

fn sheet_set_many(
    state: &mut AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (_, open) = open_sheet_mut(&mut state.sheets, params)?;
    let row_ids = get_str_list(params, "rowIds")?;
    let field = get_required_str(params, "field")?;
    let value = get_required_value(params, "value")?;
    let outcome = open.sheet.set_many(&row_ids, &field, value)?;
    Ok(json!({
        "edit": outcome,
        "pendingCount": open.sheet.pending_count(),
    }))
}

fn sheet_select(
    state: &mut AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (_, open) = open_sheet_mut(&mut state.sheets, params)?;
    let mode = get_optional_str(params, "mode").unwrap_or_else(|| "add".to_string());
    match mode.as_str() {
        "toggle" => {
            let row_id = get_required_str(params, "rowId")?;
            open.sheet.toggle_selected(&row_id)?;
        }
        "add" => {
            let row_ids = get_str_list(params, "rowIds")?;
            open.sheet.select(&row_ids)?;
        }
        "all" => {
            open.sheet.select_every_row();
        }
        "clear" => open.sheet.clear_selection(),
        other => {
            return Err(HandlerErr::new(
                "bad_params",
                "mode must be one of: toggle, add, all, clear",
            )
            .with_details(json!({ "mode": other })))
        }
    }
    let selection = open.sheet.selection();
    Ok(json!({
        "selected": selection.ids().collect::<Vec<_>>(),
        "size": selection.size(),
    }))
}

fn sheet_bulk_apply(
    state: &mut AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (_, open) = open_sheet_mut(&mut state.sheets, params)?;
    let field = get_required_str(params, "field")?;
    let value = get_required_value(params, "value")?;
    let outcome = open.sheet.bulk_apply(&field, value)?;
    Ok(json!({
        "edit": outcome,
        "pendingCount": open.sheet.pending_count(),
    }))
}

fn sheet_discard(
    state: &mut AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (_, open) = open_sheet_mut(&mut state.sheets, params)?;
    let discarded = match get_optional_str(params, "rowId") {
        Some(row_id) => usize::from(open.sheet.discard_row(&row_id)),
        None => open.sheet.discard_all(),
    };
    Ok(json!({
        "discarded": discarded,
        "pendingCount": open.sheet.pending_count(),
    }))
}

fn sheet_save(
    state: &mut AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state.db.as_ref())?;
    let ctx = require_session(state.session.as_ref())?;
    let (sheet_id, open) = open_sheet_mut(&mut state.sheets, params)?;
    let mut backend = SqliteBackend::new(conn);
    let report = open.sheet.save(ctx, &mut backend)?;
    Ok(save_report_json(&sheet_id, &open.sheet, report))
}

fn sheet_save_begin(
    state: &mut AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (sheet_id, open) = open_sheet_mut(&mut state.sheets, params)?;
    let batch = open.sheet.begin_save()?;
    let result = json!({
        "sheetId": sheet_id,
        "batch": batch,
        "pendingCount": open.sheet.pending_count(),
    });
    open.batch = Some(batch);
    Ok(result)
}

/// Send the batch captured by `sheet.saveBegin`. Edits made in between are
/// not part of it.
fn sheet_save_finish(
    state: &mut AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state.db.as_ref())?;
    let ctx = require_session(state.session.as_ref())?;
    let (sheet_id, open) = open_sheet_mut(&mut state.sheets, params)?;
    let batch_id = get_required_str(params, "batchId")?;
    let batch_id = Uuid::parse_str(&batch_id)
        .map_err(|e| HandlerErr::new("bad_params", format!("invalid batchId: {e}")))?;

    let batch = match open.batch.take() {
        Some(batch) if batch.id == batch_id => batch,
        other => {
            // Not the batch in flight; the sheet reports it as ignored.
            open.batch = other;
            let report = open.sheet.finish_save(batch_id, Ok(()));
            return Ok(save_report_json(&sheet_id, &open.sheet, report));
        }
    };
    let mut backend = SqliteBackend::new(conn);
    let result = backend.save_batch(ctx, open.sheet.scope(), &batch);
    let mut report = open.sheet.finish_save(batch.id, result);
    if let SaveReport::Saved { refetch_error, .. } = &mut report {
        if let Err(e) = open.sheet.refresh(ctx, &backend) {
            *refetch_error = Some(e.to_string());
        }
    }
    Ok(save_report_json(&sheet_id, &open.sheet, report))
}

fn sheet_refresh(
    state: &mut AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state.db.as_ref())?;
    let ctx = require_session(state.session.as_ref())?;
    let (sheet_id, open) = open_sheet_mut(&mut state.sheets, params)?;
    let report = open.sheet.refresh(ctx, &SqliteBackend::new(conn))?;
    Ok(json!({
        "load": report,
        "view": sheet_view_json(&sheet_id, &open.sheet),
    }))
}

fn sheet_set_locked(
    state: &mut AppState,
    params: &serde_json::Value,
    locked: bool,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state.db.as_ref())?;
    let ctx = require_session(state.session.as_ref())?;
    let (sheet_id, open) = open_sheet_mut(&mut state.sheets, params)?;
    let mut backend = SqliteBackend::new(conn);
    backend.set_locked(ctx, open.sheet.scope(), locked)?;
    let report = open.sheet.refresh(ctx, &backend)?;
    Ok(json!({
        "load": report,
        "view": sheet_view_json(&sheet_id, &open.sheet),
    }))
}

fn sheet_close(
    state: &mut AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let sheet_id = get_required_str(params, "sheetId")?;
    let Some(open) = state.sheets.remove(&sheet_id) else {
        return Err(HandlerErr::new("not_found", "sheet not open")
            .with_details(json!({ "sheetId": sheet_id })));
    };
    info!(sheet = %sheet_id, discarded = open.sheet.pending_count(), "sheet closed");
    Ok(json!({ "discarded": open.sheet.pending_count() }))
}

fn dispatch(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let params = &req.params;
    match req.method.as_str() {
        "sheet.open" => sheet_open(state, params),
        "sheet.view" => sheet_view(state, params),
        "sheet.setField" => sheet_set_field(state, params),
        "sheet.setMany" => sheet_set_many(state, params),
        "sheet.select" => sheet_select(state, params),
        "sheet.bulkApply" => sheet_bulk_apply(state, params),
        "sheet.discard" => sheet_discard(state, params),
        "sheet.save" => sheet_save(state, params),
        "sheet.saveBegin" => sheet_save_begin(state, params),
        "sheet.saveFinish" => sheet_save_finish(state, params),
        "sheet.refresh" => sheet_refresh(state, params),
        "sheet.lock" => sheet_set_locked(state, params, true),
        "sheet.unlock" => sheet_set_locked(state, params, false),
        "sheet.close" => sheet_close(state, params),
        other => Err(HandlerErr::new(
            "not_implemented",
            format!("unknown method: {}", other),
        )),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    if !req.method.starts_with("sheet.") {
        return None;
    }
    Some(match dispatch(state, req) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    })
}
