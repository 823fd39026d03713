use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{db_conn, required_i64, required_str};
use crate::ipc::types::{AppState, Request};
use crate::legacy;
use serde_json::json;
use std::path::PathBuf;

fn handle_import_legacy(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let context_id = match required_i64(req, "contextId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let backup_path = match required_str(req, "backupPath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e,
    };
    let processing = match setup::import_text_processing(conn) {
        Ok(p) => p,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    match legacy::import_backup(conn, context_id, &backup_path, processing) {
        Ok(summary) => ok(&req.id, json!(summary)),
        Err(e) => err(
            &req.id,
            "legacy_import_failed",
            format!("{e:#}"),
            Some(json!({ "backupPath": backup_path.to_string_lossy() })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "questions.importLegacy" => Some(handle_import_legacy(state, req)),
        _ => None,
    }
}
