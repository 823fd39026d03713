use crate::grading::ValidationNotice;
use crate::sync::SaveError;
use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// A refused save is a normal result, not an error envelope.
pub fn rejected(id: &str, notice: &ValidationNotice) -> serde_json::Value {
    ok(
        id,
        json!({
            "saved": false,
            "notice": {
                "kind": notice.kind,
                "value": notice.value,
                "message": notice.to_string(),
            }
        }),
    )
}

pub fn save_failed(id: &str, e: &SaveError) -> serde_json::Value {
    err(id, e.code(), e.to_string(), None)
}
