use crate::backend::SessionContext;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;
use tracing::info;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "branchId": state.session.as_ref().map(|s| s.branch_id.clone()),
            "openSheets": state.sheets.len(),
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match db::open_db(&path) {
        Ok(conn) => {
            // Open sheets belong to the previous workspace.
            let closed = state.sheets.len();
            state.sheets.clear();
            state.workspace = Some(path.clone());
            state.db = Some(conn);
            info!(workspace = %path.to_string_lossy(), closed, "workspace selected");
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

fn handle_session_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session: SessionContext = match serde_json::from_value(req.params.clone()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "bad_params", format!("invalid session: {e}"), None),
    };
    if session.branch_id.trim().is_empty() || session.actor.trim().is_empty() {
        return err(&req.id, "bad_params", "branchId and actor must be non-empty", None);
    }
    let switched_branch = state
        .session
        .as_ref()
        .is_some_and(|s| s.branch_id != session.branch_id);
    if switched_branch {
        state.sheets.clear();
    }
    info!(branch = %session.branch_id, actor = %session.actor, "session set");
    let result = json!({
        "branchId": session.branch_id,
        "actor": session.actor,
        "sheetsClosed": switched_branch,
    });
    state.session = Some(session);
    ok(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "session.set" => Some(handle_session_set(state, req)),
        _ => None,
    }
}
