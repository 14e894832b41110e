use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{self, optional_str, required_date, required_i64, required_str};
use crate::ipc::types::{AppState, Request};
use crate::model::Weekday;
use crate::timetable;
use serde_json::{json, Value};

fn weekday_param(params: &Value) -> Result<Weekday, HandlerErr> {
    let raw = required_str(params, "weekday")?;
    Weekday::parse(raw)
        .ok_or_else(|| HandlerErr::bad_params("weekday must be one of: Mon, Tue, Wed, Thu, Fri"))
}

fn timetable_set(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = helpers::db(state)?;
    let term = required_i64(params, "term")?;
    let weekday = weekday_param(params)?;
    let period = required_i64(params, "period")?;
    timetable::set_slot(
        conn,
        term,
        weekday,
        period,
        optional_str(params, "subjectId")?,
        optional_str(params, "note")?,
    )?;
    let slot = timetable::get_slot(conn, term, weekday, period)?;
    Ok(json!({ "slot": helpers::to_value(&slot)? }))
}

fn timetable_list(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = helpers::db(state)?;
    let term = required_i64(params, "term")?;
    Ok(json!({ "slots": helpers::to_value(&timetable::list_slots(conn, term)?)? }))
}

fn timetable_save_default(state: &AppState, _params: &Value) -> Result<Value, HandlerErr> {
    let conn = helpers::db(state)?;
    Ok(json!({ "saved": timetable::save_default(conn)? }))
}

fn timetable_restore_default(state: &AppState, _params: &Value) -> Result<Value, HandlerErr> {
    let conn = helpers::db(state)?;
    match timetable::restore_default(conn)? {
        Some(n) => Ok(json!({ "restored": n })),
        None => Err(HandlerErr::new(
            "no_snapshot",
            "no saved default timetable to restore",
        )),
    }
}

fn overrides_upsert(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = helpers::db(state)?;
    let slot = timetable::upsert_override(
        conn,
        required_date(params, "date")?,
        required_i64(params, "period")?,
        optional_str(params, "subjectId")?,
        optional_str(params, "roomId")?,
        optional_str(params, "note")?,
    )?;
    Ok(json!({ "override": helpers::to_value(&slot)? }))
}

fn overrides_delete(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = helpers::db(state)?;
    let deleted = timetable::delete_override(
        conn,
        required_date(params, "date")?,
        required_i64(params, "period")?,
    )?;
    Ok(json!({ "deleted": deleted }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "timetable.set" => timetable_set(state, &req.params),
        "timetable.list" => timetable_list(state, &req.params),
        "timetable.saveDefault" => timetable_save_default(state, &req.params),
        "timetable.restoreDefault" => timetable_restore_default(state, &req.params),
        "overrides.upsert" => overrides_upsert(state, &req.params),
        "overrides.delete" => overrides_delete(state, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
