use crate::ipc::error::{err, ok, rejected, save_failed};
use crate::ipc::types::{AppState, Request};
use crate::model::{ChoiceOptions, FormattedText, Hint, SubmittedAnswer};
use crate::sync::{SaveError, SaveOutcome};
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::{json, Value};

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn required_str(req: &Request, key: &str) -> Result<String, Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn required_i64(req: &Request, key: &str) -> Result<i64, Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_i64(req: &Request, key: &str) -> Result<Option<i64>, Value> {
    match req.params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| err(&req.id, "bad_params", format!("{} must be integer", key), None)),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnswerParam {
    #[serde(default)]
    answer: FormattedText,
    fraction: Option<f64>,
    #[serde(default)]
    feedback: FormattedText,
}

/// Options, answers and hints shared by `questions.create` and `questions.save`.
pub struct SaveFields {
    pub options: ChoiceOptions,
    pub answers: Vec<SubmittedAnswer>,
    pub hints: Vec<Hint>,
}

fn bad_params(req: &Request, message: String) -> Value {
    err(&req.id, "bad_params", message, None)
}

pub fn parse_save_fields(req: &Request) -> Result<SaveFields, Value> {
    let options = match req.params.get("options") {
        None | Some(Value::Null) => ChoiceOptions::default(),
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|e| bad_params(req, format!("invalid options: {}", e)))?,
    };

    let raw_answers: Vec<AnswerParam> = match req.params.get("answers") {
        None | Some(Value::Null) => Vec::new(),
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|e| bad_params(req, format!("invalid answers: {}", e)))?,
    };
    let mut answers = Vec::with_capacity(raw_answers.len());
    for (i, a) in raw_answers.into_iter().enumerate() {
        let fraction = match (a.fraction, a.answer.is_blank()) {
            (Some(f), _) => f,
            (None, true) => 0.0,
            (None, false) => {
                return Err(bad_params(req, format!("answers[{}].fraction is required", i)));
            }
        };
        answers.push(SubmittedAnswer {
            answer: a.answer,
            fraction,
            feedback: a.feedback,
        });
    }

    let hints: Vec<Hint> = match req.params.get("hints") {
        None | Some(Value::Null) => Vec::new(),
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|e| bad_params(req, format!("invalid hints: {}", e)))?,
    };

    Ok(SaveFields {
        options,
        answers,
        hints,
    })
}

pub fn formatted_param(req: &Request, key: &str) -> Result<FormattedText, Value> {
    match req.params.get(key) {
        None | Some(Value::Null) => Ok(FormattedText::html("")),
        Some(Value::String(s)) => Ok(FormattedText::html(s.clone())),
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|e| bad_params(req, format!("invalid {}: {}", key, e))),
    }
}

/// Response for a save or create, whichever way it went.
pub fn save_response(req: &Request, res: Result<SaveOutcome, SaveError>) -> Value {
    match res {
        Ok(SaveOutcome::Saved(ids)) => {
            let mut result = serde_json::to_value(&ids).unwrap_or_else(|_| json!({}));
            result["saved"] = json!(true);
            ok(&req.id, result)
        }
        Ok(SaveOutcome::Rejected(notice)) => rejected(&req.id, &notice),
        Err(e) => save_failed(&req.id, &e),
    }
}
