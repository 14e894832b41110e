use crate::attendance;
use crate::error::EngineError;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{self, optional_i64, optional_str, required_i64, required_str};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{self, RecordFilter};
use crate::model::AttendanceStatus;
use serde_json::{json, Value};

fn attendance_classify(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = helpers::db(state)?;
    let period = required_i64(params, "period")?;
    let now = helpers::now(params)?;
    let c = attendance::classify(conn, period, now)?;
    Ok(json!({ "period": period, "classification": c.as_str() }))
}

fn attendance_register(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = helpers::db(state)?;
    let reg = attendance::register_attendance(
        conn,
        state.sink(),
        required_str(params, "studentId")?,
        optional_str(params, "subjectId")?,
        optional_i64(params, "period")?,
        helpers::now(params)?,
    )?;
    helpers::to_value(&reg)
}

fn attendance_list(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = helpers::db(state)?;
    let filter = RecordFilter {
        term: optional_i64(params, "term")?,
        student_id: optional_str(params, "studentId")?.map(|s| s.to_string()),
    };
    let rows = ledger::list_records(conn, &filter)?;
    Ok(json!({ "records": helpers::to_value(&rows)? }))
}

fn attendance_update_status(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = helpers::db(state)?;
    let record_id = required_str(params, "recordId")?;
    let status = AttendanceStatus::parse(required_str(params, "status")?)
        .ok_or_else(|| HandlerErr::bad_params("status must be one of: onTime, late, absent"))?;
    ledger::update_status(conn, record_id, status)?;
    let record = ledger::get_record(conn, record_id)?
        .ok_or_else(|| EngineError::not_found("attendance record", record_id))?;
    Ok(json!({ "record": helpers::to_value(&record)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "attendance.classify" => attendance_classify(state, &req.params),
        "attendance.register" => attendance_register(state, &req.params),
        "attendance.list" => attendance_list(state, &req.params),
        "attendance.updateStatus" => attendance_update_status(state, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
