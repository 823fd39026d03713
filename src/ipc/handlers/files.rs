use crate::files::{self, FileArea};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_i64, required_i64, required_str};
use crate::ipc::types::{AppState, Request};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::json;

fn handle_put_draft(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let filename = match required_str(req, "filename") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let encoded = match required_str(req, "contentBase64") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let content = match STANDARD.decode(encoded.trim()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "bad_params", format!("contentBase64: {}", e), None),
    };
    let draft_item_id = match optional_i64(req, "draftItemId") {
        Ok(Some(v)) => v,
        Ok(None) => match files::next_draft_item_id(conn) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        },
        Err(e) => return e,
    };

    if let Err(e) = files::add_area_file(conn, &FileArea::draft(draft_item_id), &filename, &content) {
        return err(&req.id, "files_failed", e.to_string(), None);
    }
    ok(
        &req.id,
        json!({
            "draftItemId": draft_item_id,
            "url": files::draft_url(draft_item_id, filename.trim().trim_start_matches('/')),
            "contenthash": files::content_hash(&content),
        }),
    )
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let context_id = match required_i64(req, "contextId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let component = match required_str(req, "component") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let filearea = match required_str(req, "filearea") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let item_id = match required_i64(req, "itemId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let area = FileArea {
        context_id,
        component: &component,
        filearea: &filearea,
        item_id,
    };
    match files::list_area_files(conn, &area) {
        Ok(list) => ok(&req.id, json!({ "files": list })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "files.putDraft" => Some(handle_put_draft(state, req)),
        "files.list" => Some(handle_list(state, req)),
        _ => None,
    }
}
