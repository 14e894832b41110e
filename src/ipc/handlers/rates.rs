use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{self, optional_date, optional_i64, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::rates;
use crate::reference;
use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::{json, Value};

/// `asOf` defaults to today; `term` to the term planned for `asOf`.
fn term_and_as_of(conn: &Connection, params: &Value) -> Result<(i64, NaiveDate), HandlerErr> {
    let as_of = match optional_date(params, "asOf")? {
        Some(d) => d,
        None => helpers::now(params)?.date(),
    };
    let term = match optional_i64(params, "term")? {
        Some(t) => t,
        None => reference::term_for_date(conn, as_of)?,
    };
    Ok((term, as_of))
}

fn rates_get(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = helpers::db(state)?;
    let student_id = required_str(params, "studentId")?;
    let subject_id = required_str(params, "subjectId")?;
    reference::require_student(conn, student_id)?;
    reference::require_subject(conn, subject_id)?;
    let (term, as_of) = term_and_as_of(conn, params)?;
    let rate = rates::compute_rate(conn, student_id, subject_id, term, as_of)?;
    helpers::to_value(&rate)
}

fn rates_term_summary(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = helpers::db(state)?;
    let student_id = required_str(params, "studentId")?;
    reference::require_student(conn, student_id)?;
    let (term, as_of) = term_and_as_of(conn, params)?;
    let rows = rates::term_summary(conn, student_id, term, as_of)?;
    Ok(json!({ "term": term, "rates": helpers::to_value(&rows)? }))
}

/// `rates.subjectSummary {subjectId, term?, asOf?, format?}`: the class roster
/// for one subject. `format: "csv"` adds the same rows as CSV text.
fn rates_subject_summary(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = helpers::db(state)?;
    let subject = reference::require_subject(conn, required_str(params, "subjectId")?)?;
    let with_csv = match optional_str(params, "format")? {
        None | Some("json") => false,
        Some("csv") => true,
        Some(_) => return Err(HandlerErr::bad_params("format must be one of: json, csv")),
    };
    let (term, as_of) = term_and_as_of(conn, params)?;
    let rows = rates::subject_summary(conn, &subject.id, term, as_of)?;
    let mut out = json!({
        "subjectId": subject.id,
        "subjectName": subject.name,
        "term": term,
        "asOf": as_of.format("%Y-%m-%d").to_string(),
        "rows": helpers::to_value(&rows)?,
    });
    if with_csv {
        out["csv"] = json!(rates::roster_csv(&rows));
    }
    Ok(out)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "rates.get" => rates_get(state, &req.params),
        "rates.termSummary" => rates_term_summary(state, &req.params),
        "rates.subjectSummary" => rates_subject_summary(state, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
