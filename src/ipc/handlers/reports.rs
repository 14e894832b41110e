use crate::collab::{ReportIntent, ReportKind};
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{self, optional_bool, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::reports;
use serde_json::{json, Value};

fn messages_triage(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = helpers::db(state)?;
    let triage = reports::triage_message(
        conn,
        state.collaborators.classifier.as_ref(),
        state.sink(),
        helpers::admin_recipients(conn)?,
        required_str(params, "studentId")?,
        required_str(params, "text")?,
        helpers::now(params)?,
    )?;
    helpers::to_value(&triage)
}

fn reports_submit(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = helpers::db(state)?;
    let kind = ReportKind::parse(required_str(params, "type")?)
        .ok_or_else(|| HandlerErr::bad_params("type must be one of: late, absent"))?;
    let intent = ReportIntent {
        kind,
        category: optional_str(params, "category")?.map(|s| s.to_string()),
        summary: required_str(params, "summary")?.to_string(),
    };
    let report = reports::submit_report(
        conn,
        state.sink(),
        helpers::admin_recipients(conn)?,
        required_str(params, "studentId")?,
        &intent,
        helpers::now(params)?,
    )?;
    Ok(json!({ "report": helpers::to_value(&report)? }))
}

fn reports_list(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = helpers::db(state)?;
    let unresolved_only = optional_bool(params, "unresolvedOnly")?.unwrap_or(false);
    let rows = reports::list_reports(conn, unresolved_only)?;
    Ok(json!({ "reports": helpers::to_value(&rows)? }))
}

fn reports_resolve(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = helpers::db(state)?;
    reports::resolve_report(conn, required_str(params, "id")?)?;
    Ok(json!({ "ok": true }))
}

fn reports_count(state: &AppState, _params: &Value) -> Result<Value, HandlerErr> {
    let conn = helpers::db(state)?;
    Ok(json!({ "unresolved": reports::unresolved_count(conn)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "messages.triage" => messages_triage(state, &req.params),
        "reports.submit" => reports_submit(state, &req.params),
        "reports.list" => reports_list(state, &req.params),
        "reports.resolve" => reports_resolve(state, &req.params),
        "reports.count" => reports_count(state, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
