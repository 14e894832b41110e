use crate::collab;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{self, optional_date, optional_i64, required_str};
use crate::ipc::types::{AppState, Request};
use crate::schedule;
use serde_json::{json, Value};

/// Longest range `schedule.week` will resolve in one call.
const MAX_WEEK_DAYS: i64 = 31;

/// `schedule.slot {date, period}` resolves one slot; without them it resolves
/// whatever is in session at `now`.
fn schedule_slot(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = helpers::db(state)?;
    let date = optional_date(params, "date")?;
    let period = optional_i64(params, "period")?;
    let slot = match (date, period) {
        (Some(d), Some(p)) => Some(schedule::resolve_slot(conn, d, p)?),
        (None, None) => schedule::current_slot(conn, helpers::now(params)?)?,
        _ => return Err(HandlerErr::bad_params("date and period must be given together")),
    };
    Ok(json!({ "slot": helpers::to_value(&slot)? }))
}

fn schedule_day(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = helpers::db(state)?;
    let date = match optional_date(params, "date")? {
        Some(d) => d,
        None => helpers::now(params)?.date(),
    };
    let day = schedule::resolve_day(conn, date)?;
    Ok(json!({ "day": helpers::to_value(&day)? }))
}

fn schedule_week(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = helpers::db(state)?;
    let start = match optional_date(params, "start")? {
        Some(d) => d,
        None => helpers::now(params)?.date(),
    };
    let days = optional_i64(params, "days")?.unwrap_or(7);
    if !(1..=MAX_WEEK_DAYS).contains(&days) {
        return Err(HandlerErr::bad_params(format!(
            "days must be in 1..={}",
            MAX_WEEK_DAYS
        )));
    }
    let week = schedule::resolve_week(conn, start, days as u32)?;
    Ok(json!({
        "days": helpers::to_value(&week)?,
        "text": schedule::render_text(&week),
    }))
}

fn schedule_ask(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = helpers::db(state)?;
    let question = required_str(params, "question")?;
    let start = match optional_date(params, "date")? {
        Some(d) => d,
        None => helpers::now(params)?.date(),
    };
    let advice = collab::advise(conn, state.collaborators.advisor.as_ref(), question, start)?;
    helpers::to_value(&advice)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "schedule.slot" => schedule_slot(state, &req.params),
        "schedule.day" => schedule_day(state, &req.params),
        "schedule.week" => schedule_week(state, &req.params),
        "schedule.ask" => schedule_ask(state, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
