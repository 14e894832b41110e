use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{self, optional_str, required_i64, required_str};
use crate::ipc::types::{AppState, Request};
use crate::model::{parse_date, CalendarDayPlan, Period, Subject};
use crate::reference;
use serde_json::{json, Value};
use uuid::Uuid;

fn students_create(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = helpers::db(state)?;
    let student = reference::create_student(
        conn,
        optional_str(params, "id")?,
        required_str(params, "name")?,
        optional_str(params, "guardianEmail")?,
    )?;
    Ok(json!({ "studentId": student.id, "student": helpers::to_value(&student)? }))
}

fn students_list(state: &AppState, _params: &Value) -> Result<Value, HandlerErr> {
    let conn = helpers::db(state)?;
    let students = reference::list_students(conn)?;
    Ok(json!({ "students": helpers::to_value(&students)? }))
}

fn students_set_guardian_email(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = helpers::db(state)?;
    let student_id = required_str(params, "studentId")?;
    let email = optional_str(params, "email")?;
    if let Some(e) = email {
        if !e.contains('@') {
            return Err(HandlerErr::bad_params("email must be an email address"));
        }
    }
    reference::set_guardian_email(conn, student_id, email)?;
    Ok(json!({ "ok": true }))
}

fn rooms_upsert(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = helpers::db(state)?;
    let id = required_str(params, "id")?;
    reference::upsert_room(conn, id, required_str(params, "name")?)?;
    Ok(json!({ "roomId": id }))
}

fn subjects_upsert(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = helpers::db(state)?;
    let room_id = optional_str(params, "roomId")?;
    if let Some(rid) = room_id {
        if reference::room_name(conn, rid)?.is_none() {
            return Err(crate::error::EngineError::not_found("room", rid).into());
        }
    }
    let subject = Subject {
        id: optional_str(params, "id")?
            .map(|s| s.to_string())
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        name: required_str(params, "name")?.to_string(),
        teacher: optional_str(params, "teacher")?.map(|s| s.to_string()),
        room_id: room_id.map(|s| s.to_string()),
    };
    reference::upsert_subject(conn, &subject)?;
    Ok(json!({ "subjectId": subject.id, "subject": helpers::to_value(&subject)? }))
}

fn subjects_list(state: &AppState, _params: &Value) -> Result<Value, HandlerErr> {
    let conn = helpers::db(state)?;
    Ok(json!({ "subjects": helpers::to_value(&reference::list_subjects(conn)?)? }))
}

fn periods_upsert(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = helpers::db(state)?;
    let period = Period {
        period: required_i64(params, "period")?,
        start_time: required_str(params, "startTime")?.to_string(),
        end_time: required_str(params, "endTime")?.to_string(),
        note: optional_str(params, "note")?.map(|s| s.to_string()),
    };
    reference::upsert_period(conn, &period)?;
    let stored = reference::get_period(conn, period.period)?;
    Ok(json!({ "period": helpers::to_value(&stored)? }))
}

fn periods_list(state: &AppState, _params: &Value) -> Result<Value, HandlerErr> {
    let conn = helpers::db(state)?;
    Ok(json!({
        "periods": helpers::to_value(&reference::list_periods(conn)?)?,
        "lastPeriod": reference::last_period(conn)?,
    }))
}

fn parse_day(v: &Value, index: usize) -> Result<CalendarDayPlan, HandlerErr> {
    let bad = |what: &str| HandlerErr::bad_params(format!("days[{}]: {}", index, what));
    let date = v
        .get("date")
        .and_then(|d| d.as_str())
        .and_then(parse_date)
        .ok_or_else(|| bad("date must be YYYY-MM-DD"))?;
    let term = v
        .get("term")
        .and_then(|t| t.as_i64())
        .ok_or_else(|| bad("term must be integer"))?;
    let weekday_code = v
        .get("weekdayCode")
        .and_then(|t| t.as_i64())
        .ok_or_else(|| bad("weekdayCode must be integer"))?;
    let note = v
        .get("note")
        .and_then(|n| n.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string());
    Ok(CalendarDayPlan {
        date,
        term,
        weekday_code,
        note,
    })
}

fn calendar_upsert_days(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = helpers::db(state)?;
    let days = params
        .get("days")
        .and_then(|v| v.as_array())
        .ok_or_else(|| HandlerErr::bad_params("days must be an array"))?;
    let plans = days
        .iter()
        .enumerate()
        .map(|(i, v)| parse_day(v, i))
        .collect::<Result<Vec<_>, _>>()?;

    let tx = conn
        .unchecked_transaction()
        .map_err(crate::error::EngineError::from)?;
    for plan in &plans {
        reference::upsert_calendar_day(&tx, plan)?;
    }
    tx.commit().map_err(crate::error::EngineError::from)?;
    Ok(json!({ "count": plans.len() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "students.create" => students_create(state, &req.params),
        "students.list" => students_list(state, &req.params),
        "students.setGuardianEmail" => students_set_guardian_email(state, &req.params),
        "rooms.upsert" => rooms_upsert(state, &req.params),
        "subjects.upsert" => subjects_upsert(state, &req.params),
        "subjects.list" => subjects_list(state, &req.params),
        "periods.upsert" => periods_upsert(state, &req.params),
        "periods.list" => periods_list(state, &req.params),
        "calendar.upsertDays" => calendar_upsert_days(state, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
