use crate::error::EngineError;
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

#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<EngineError> for HandlerErr {
    fn from(e: EngineError) -> Self {
        let message = e.to_string();
        match e {
            EngineError::Presence(p) => HandlerErr::new(p.code(), message),
            EngineError::Registration(r) => HandlerErr::new(r.code(), message),
            EngineError::NotFound { kind, id } => HandlerErr {
                code: "not_found",
                message,
                details: Some(json!({ "kind": kind, "id": id })),
            },
            EngineError::Invalid(_) => HandlerErr::new("bad_params", message),
            EngineError::Corrupt(_) => HandlerErr::new("corrupt_data", message),
            EngineError::Db(_) => {
                tracing::error!(error = %message, "database error");
                HandlerErr::new("db_query_failed", message)
            }
        }
    }
}

impl From<anyhow::Error> for HandlerErr {
    fn from(e: anyhow::Error) -> Self {
        tracing::error!(error = %format!("{e:#}"), "request failed");
        HandlerErr::new("db_query_failed", format!("{e:#}"))
    }
}

pub fn respond(id: &str, result: Result<serde_json::Value, HandlerErr>) -> serde_json::Value {
    match result {
        Ok(v) => ok(id, v),
        Err(e) => e.response(id),
    }
}
