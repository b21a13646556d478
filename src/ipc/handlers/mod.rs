pub mod bulletins;
pub mod core;
pub mod setup;

use rusqlite::Connection;

use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::store::BulletinError;

pub(super) fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

/// Grading term, defaulting to the first trimester when the caller leaves
/// it out.
pub(super) fn period_id(req: &Request) -> String {
    req.params
        .get("periodId")
        .and_then(|v| v.as_str())
        .unwrap_or("T1")
        .to_string()
}

pub(super) fn db_conn<'a>(
    state: &'a AppState,
    req: &Request,
) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub(super) fn core_err(req: &Request, e: BulletinError) -> serde_json::Value {
    err(&req.id, &e.code, e.message, e.details)
}
