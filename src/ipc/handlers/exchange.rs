use crate::ipc::error::{err, ok, save_failed};
use crate::ipc::helpers::{db_conn, required_i64, required_str, save_response};
use crate::ipc::types::{AppState, Request};
use crate::sync;
use crate::xml;
use serde_json::json;
use tracing::debug;

fn handle_export_xml(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let question_id = match required_i64(req, "questionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let q = match sync::load_question(conn, question_id) {
        Ok(q) => q,
        Err(e) => return save_failed(&req.id, &e),
    };
    match xml::export_question_xml(conn, &q) {
        Ok(text) => ok(&req.id, json!({ "xml": text })),
        Err(e) => err(&req.id, "export_failed", e.to_string(), None),
    }
}

fn handle_import_xml(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let context_id = match required_i64(req, "contextId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let text = match required_str(req, "xml") {
        Ok(v) => v,
        Err(e) => return e,
    };

    // Files shipped in the document are staged in the same transaction as the save.
    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let def = match xml::import_question_xml(&tx, &text) {
        Ok(Some(def)) => def,
        Ok(None) => {
            let _ = tx.rollback();
            debug!("xml import declined: other question type");
            return ok(&req.id, json!({ "applicable": false }));
        }
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, "bad_xml", e.to_string(), None);
        }
    };
    let res = sync::create_within(&tx, context_id, &def);
    match &res {
        Ok(sync::SaveOutcome::Saved(_)) => {
            if let Err(e) = tx.commit() {
                return err(&req.id, "db_commit_failed", e.to_string(), None);
            }
        }
        _ => {
            let _ = tx.rollback();
        }
    }
    let mut resp = save_response(req, res);
    if let Some(result) = resp.get_mut("result") {
        result["applicable"] = json!(true);
    }
    resp
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "questions.exportXml" => Some(handle_export_xml(state, req)),
        "questions.importXml" => Some(handle_import_xml(state, req)),
        _ => None,
    }
}
