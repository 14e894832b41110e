use super::error::HandlerErr;
use super::types::AppState;
use crate::config;
use crate::model::{parse_date, parse_timestamp};
use chrono::{Local, NaiveDate, NaiveDateTime};
use rusqlite::Connection;
use serde_json::Value;

pub fn db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Absent, null and blank strings all read as `None`.
pub fn optional_str<'a>(params: &'a Value, key: &str) -> Result<Option<&'a str>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let s = s.trim();
            Ok(if s.is_empty() { None } else { Some(s) })
        }
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be string", key))),
    }
}

pub fn required_i64(params: &Value, key: &str) -> Result<i64, HandlerErr> {
    optional_i64(params, key)?.ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn optional_i64(params: &Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be integer", key))),
    }
}

pub fn optional_bool(params: &Value, key: &str) -> Result<Option<bool>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_bool()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be boolean", key))),
    }
}

pub fn optional_date(params: &Value, key: &str) -> Result<Option<NaiveDate>, HandlerErr> {
    match optional_str(params, key)? {
        None => Ok(None),
        Some(s) => parse_date(s)
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be YYYY-MM-DD", key))),
    }
}

pub fn required_date(params: &Value, key: &str) -> Result<NaiveDate, HandlerErr> {
    optional_date(params, key)?.ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// `params.now` when given, else the local wall clock.
pub fn now(params: &Value) -> Result<NaiveDateTime, HandlerErr> {
    match optional_str(params, "now")? {
        None => Ok(Local::now().naive_local()),
        Some(s) => parse_timestamp(s)
            .ok_or_else(|| HandlerErr::bad_params("now must be YYYY-MM-DDTHH:MM[:SS]")),
    }
}

pub fn to_value<T: serde::Serialize>(v: &T) -> Result<Value, HandlerErr> {
    serde_json::to_value(v).map_err(|e| HandlerErr::new("internal", e.to_string()))
}

/// Who hears about alerts and reports, or nobody when notifications are off.
pub fn admin_recipients(conn: &Connection) -> Result<Vec<String>, HandlerErr> {
    let settings = config::load_notifications(conn)?;
    if !settings.enabled {
        return Ok(Vec::new());
    }
    Ok(settings.admin_recipients())
}
