use crate::ipc::error::{err, ok, save_failed};
use crate::ipc::helpers::{
    db_conn, formatted_param, parse_save_fields, required_i64, required_str, save_response,
};
use crate::ipc::types::{AppState, Request};
use crate::model::QuestionDefinition;
use crate::sync::{self, SaveRequest};
use serde_json::json;

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let context_id = match required_i64(req, "contextId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let question_text = match formatted_param(req, "questionText") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let general_feedback = match formatted_param(req, "generalFeedback") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let fields = match parse_save_fields(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let default_mark = req
        .params
        .get("defaultMark")
        .and_then(|v| v.as_f64())
        .unwrap_or(1.0);
    let penalty = req
        .params
        .get("penalty")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.3333333);

    let def = QuestionDefinition {
        name,
        question_text,
        general_feedback,
        default_mark,
        penalty,
        options: fields.options,
        answers: fields.answers,
        hints: fields.hints,
    };
    save_response(req, sync::create_question(conn, context_id, &def))
}

fn handle_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let question_id = match required_i64(req, "questionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let fields = match parse_save_fields(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let context_id = match crate::db::get_question(conn, question_id) {
        Ok(Some(h)) => h.context_id,
        Ok(None) => return err(&req.id, "not_found", "question not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let save = SaveRequest {
        question_id,
        context_id,
        options: fields.options,
        answers: fields.answers,
        hints: fields.hints,
    };
    save_response(req, sync::save_question_options(conn, &save))
}

fn handle_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let question_id = match required_i64(req, "questionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match sync::load_question(conn, question_id) {
        Ok(q) => ok(
            &req.id,
            json!({
                "randomGuessScore": sync::random_guess_score(&q),
                "question": q,
            }),
        ),
        Err(e) => save_failed(&req.id, &e),
    }
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let question_id = match required_i64(req, "questionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match sync::delete_question(conn, question_id) {
        Ok(()) => ok(&req.id, json!({ "deleted": true })),
        Err(e) => save_failed(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "questions.create" => Some(handle_create(state, req)),
        "questions.save" => Some(handle_save(state, req)),
        "questions.open" => Some(handle_open(state, req)),
        "questions.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
