use crate::config::{self, PresenceMode};
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{self, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::presence::{self, ToggleOutcome};
use crate::reconcile;
use crate::schedule;
use rusqlite::Connection;
use serde_json::{json, Value};

fn require_mode(conn: &Connection, wanted: PresenceMode) -> Result<(), HandlerErr> {
    let mode = config::load_presence(conn)?.mode;
    if mode == wanted {
        return Ok(());
    }
    Err(match wanted {
        PresenceMode::Toggle => HandlerErr::new(
            "toggle_disabled",
            "entry toggle is off while temporary exits are tracked",
        ),
        PresenceMode::Fine => HandlerErr::new(
            "temporary_exit_disabled",
            "temporary exits are off while the entry toggle is in use",
        ),
    })
}

fn session_result(session: &crate::model::PresenceSession) -> Result<Value, HandlerErr> {
    Ok(json!({
        "state": presence::PresenceState::of(session.exited_at.is_none().then_some(session)),
        "session": helpers::to_value(session)?,
    }))
}

fn presence_check_in(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = helpers::db(state)?;
    let session = presence::check_in(
        conn,
        required_str(params, "studentId")?,
        optional_str(params, "roomId")?,
        helpers::now(params)?,
    )?;
    session_result(&session)
}

fn presence_temporary_exit(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = helpers::db(state)?;
    require_mode(conn, PresenceMode::Fine)?;
    let session = presence::temporary_exit(
        conn,
        required_str(params, "studentId")?,
        helpers::now(params)?,
    )?;
    session_result(&session)
}

fn presence_return(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = helpers::db(state)?;
    require_mode(conn, PresenceMode::Fine)?;
    let session = presence::return_from_exit(
        conn,
        required_str(params, "studentId")?,
        helpers::now(params)?,
    )?;
    session_result(&session)
}

fn presence_check_out(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = helpers::db(state)?;
    let session = presence::check_out(
        conn,
        required_str(params, "studentId")?,
        helpers::now(params)?,
    )?;
    session_result(&session)
}

fn presence_toggle(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = helpers::db(state)?;
    require_mode(conn, PresenceMode::Toggle)?;
    let student_id = required_str(params, "studentId")?;
    let now = helpers::now(params)?;
    // Sensor check-ins land in the room of whatever class is on.
    let room_id = schedule::current_slot(conn, now)?.and_then(|s| s.room_id);
    let (action, session) = match presence::toggle_entry(conn, student_id, room_id.as_deref(), now)? {
        ToggleOutcome::CheckedIn(s) => ("checkedIn", s),
        ToggleOutcome::CheckedOut(s) => ("checkedOut", s),
    };
    let mut out = session_result(&session)?;
    out["action"] = json!(action);
    Ok(out)
}

fn presence_status(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = helpers::db(state)?;
    let now = helpers::now(params)?;
    let reconciled = reconcile::reconcile(conn, now, state.sink())?;
    let board = presence::status_board(conn, now)?;
    Ok(json!({
        "students": helpers::to_value(&board)?,
        "reconciled": helpers::to_value(&reconciled)?,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "presence.checkIn" => presence_check_in(state, &req.params),
        "presence.temporaryExit" => presence_temporary_exit(state, &req.params),
        "presence.return" => presence_return(state, &req.params),
        "presence.checkOut" => presence_check_out(state, &req.params),
        "presence.toggle" => presence_toggle(state, &req.params),
        "presence.status" => presence_status(state, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
