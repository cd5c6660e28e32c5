use crate::backend::SessionContext;
use crate::ipc::error::HandlerErr;
use rusqlite::Connection;

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn get_str_list(params: &serde_json::Value, key: &str) -> Result<Vec<String>, HandlerErr> {
    let Some(arr) = params.get(key).and_then(|v| v.as_array()) else {
        return Err(HandlerErr::new("bad_params", format!("missing {}[]", key)));
    };
    arr.iter()
        .enumerate()
        .map(|(i, v)| {
            v.as_str().map(|s| s.to_string()).ok_or_else(|| {
                HandlerErr::new("bad_params", format!("{}[{}] must be a string", key, i))
            })
        })
        .collect()
}

/// `value` may legitimately be null, so only a missing key is an error.
pub fn get_required_value(
    params: &serde_json::Value,
    key: &str,
) -> Result<serde_json::Value, HandlerErr> {
    params
        .get(key)
        .cloned()
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

pub fn require_db(db: Option<&Connection>) -> Result<&Connection, HandlerErr> {
    db.ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn require_session(session: Option<&SessionContext>) -> Result<&SessionContext, HandlerErr> {
    session.ok_or_else(|| HandlerErr::new("no_session", "call session.set first"))
}
