use crate::error::{EngineError, EngineResult, PresenceError};
use crate::model::{format_timestamp, parse_timestamp, PresenceSession};
use crate::reference;
use chrono::{Duration, NaiveDateTime};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

/// Note carried by an open session while the student has stepped out.
pub const TEMP_EXIT_NOTE: &str = "temporarily-out";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PresenceState {
    Absent,
    Present,
    TemporarilyOut,
}

impl PresenceState {
    pub fn of(open: Option<&PresenceSession>) -> Self {
        match open {
            None => PresenceState::Absent,
            Some(s) if s.note.as_deref() == Some(TEMP_EXIT_NOTE) => PresenceState::TemporarilyOut,
            Some(_) => PresenceState::Present,
        }
    }
}

type RawSession = (String, String, Option<String>, String, Option<String>, Option<String>);

fn raw_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<RawSession> {
    Ok((
        r.get(0)?,
        r.get(1)?,
        r.get(2)?,
        r.get(3)?,
        r.get(4)?,
        r.get(5)?,
    ))
}

fn session_from_raw(raw: RawSession) -> EngineResult<PresenceSession> {
    let (id, student_id, room_id, entered_at, exited_at, note) = raw;
    let entered_at = parse_timestamp(&entered_at)
        .ok_or_else(|| EngineError::Corrupt(format!("entered_at {}", entered_at)))?;
    let exited_at = match exited_at {
        Some(s) => Some(
            parse_timestamp(&s).ok_or_else(|| EngineError::Corrupt(format!("exited_at {}", s)))?,
        ),
        None => None,
    };
    Ok(PresenceSession {
        id,
        student_id,
        room_id,
        entered_at,
        exited_at,
        note,
    })
}

pub fn open_session(conn: &Connection, student_id: &str) -> EngineResult<Option<PresenceSession>> {
    let raw = conn
        .query_row(
            "SELECT id, student_id, room_id, entered_at, exited_at, note
             FROM presence_sessions
             WHERE student_id = ? AND exited_at IS NULL",
            [student_id],
            raw_from_row,
        )
        .optional()?;
    raw.map(session_from_raw).transpose()
}

fn get_session(conn: &Connection, id: &str) -> EngineResult<PresenceSession> {
    let raw = conn.query_row(
        "SELECT id, student_id, room_id, entered_at, exited_at, note
         FROM presence_sessions WHERE id = ?",
        [id],
        raw_from_row,
    )?;
    session_from_raw(raw)
}

pub fn open_sessions(conn: &Connection) -> EngineResult<Vec<PresenceSession>> {
    let mut stmt = conn.prepare(
        "SELECT id, student_id, room_id, entered_at, exited_at, note
         FROM presence_sessions
         WHERE exited_at IS NULL
         ORDER BY entered_at",
    )?;
    let raws = stmt
        .query_map([], raw_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    raws.into_iter().map(session_from_raw).collect()
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

/// Opens a session. The partial unique index on open sessions makes a racing
/// second check-in fail here rather than produce two open rows.
pub fn check_in(
    conn: &Connection,
    student_id: &str,
    room_id: Option<&str>,
    now: NaiveDateTime,
) -> EngineResult<PresenceSession> {
    reference::require_student(conn, student_id)?;
    if open_session(conn, student_id)?.is_some() {
        return Err(PresenceError::AlreadyPresent.into());
    }
    let id = Uuid::new_v4().to_string();
    let inserted = conn.execute(
        "INSERT INTO presence_sessions(id, student_id, room_id, entered_at, exited_at, note)
         VALUES(?, ?, ?, ?, NULL, NULL)",
        (&id, student_id, room_id, format_timestamp(now)),
    );
    match inserted {
        Ok(_) => {}
        Err(e) if is_unique_violation(&e) => return Err(PresenceError::AlreadyPresent.into()),
        Err(e) => return Err(e.into()),
    }
    tracing::info!(student_id, room_id, at = %now, "checked in");
    get_session(conn, &id)
}

pub fn temporary_exit(
    conn: &Connection,
    student_id: &str,
    now: NaiveDateTime,
) -> EngineResult<PresenceSession> {
    let n = conn.execute(
        "UPDATE presence_sessions SET note = ?
         WHERE student_id = ? AND exited_at IS NULL AND note IS NULL",
        (TEMP_EXIT_NOTE, student_id),
    )?;
    if n == 0 {
        return Err(match open_session(conn, student_id)? {
            None => PresenceError::NotPresent,
            Some(_) => PresenceError::AlreadyOut,
        }
        .into());
    }
    tracing::info!(student_id, at = %now, "stepped out");
    open_session(conn, student_id)?.ok_or_else(|| PresenceError::NotPresent.into())
}

pub fn return_from_exit(
    conn: &Connection,
    student_id: &str,
    now: NaiveDateTime,
) -> EngineResult<PresenceSession> {
    let n = conn.execute(
        "UPDATE presence_sessions SET note = NULL
         WHERE student_id = ? AND exited_at IS NULL AND note = ?",
        (student_id, TEMP_EXIT_NOTE),
    )?;
    if n == 0 {
        return Err(PresenceError::NotOut.into());
    }
    tracing::info!(student_id, at = %now, "returned");
    open_session(conn, student_id)?.ok_or_else(|| PresenceError::NotPresent.into())
}

/// Closes the open session. The exit time never precedes the entry time.
pub fn check_out(
    conn: &Connection,
    student_id: &str,
    now: NaiveDateTime,
) -> EngineResult<PresenceSession> {
    let Some(open) = open_session(conn, student_id)? else {
        return Err(PresenceError::NotPresent.into());
    };
    let n = conn.execute(
        "UPDATE presence_sessions SET exited_at = MAX(entered_at, ?)
         WHERE id = ? AND exited_at IS NULL",
        (format_timestamp(now), &open.id),
    )?;
    if n == 0 {
        return Err(PresenceError::NotPresent.into());
    }
    tracing::info!(student_id, at = %now, "checked out");
    get_session(conn, &open.id)
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToggleOutcome {
    CheckedIn(PresenceSession),
    CheckedOut(PresenceSession),
}

/// Entry-sensor toggle: no open session checks the student in, anything else checks out.
pub fn toggle_entry(
    conn: &Connection,
    student_id: &str,
    room_id: Option<&str>,
    now: NaiveDateTime,
) -> EngineResult<ToggleOutcome> {
    match open_session(conn, student_id)? {
        None => Ok(ToggleOutcome::CheckedIn(check_in(conn, student_id, room_id, now)?)),
        Some(_) => Ok(ToggleOutcome::CheckedOut(check_out(conn, student_id, now)?)),
    }
}

/// Time spent in the room so far, clamped at zero.
pub fn elapsed(entered_at: NaiveDateTime, now: NaiveDateTime) -> Duration {
    let d = now - entered_at;
    if d < Duration::zero() {
        Duration::zero()
    } else {
        d
    }
}

pub fn format_duration(d: Duration) -> String {
    let secs = d.num_seconds().max(0);
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRow {
    pub student_id: String,
    pub name: String,
    pub state: PresenceState,
    pub room_id: Option<String>,
    pub room: Option<String>,
    pub entered_at: Option<String>,
    pub duration: Option<String>,
    pub duration_seconds: Option<i64>,
}

/// Every student with their current presence state, ordered by name.
pub fn status_board(conn: &Connection, now: NaiveDateTime) -> EngineResult<Vec<PresenceRow>> {
    let mut open: HashMap<String, PresenceSession> = open_sessions(conn)?
        .into_iter()
        .map(|s| (s.student_id.clone(), s))
        .collect();
    let mut rooms: HashMap<String, Option<String>> = HashMap::new();

    let mut out = Vec::new();
    for student in reference::list_students(conn)? {
        let session = open.remove(&student.id);
        let state = PresenceState::of(session.as_ref());
        let row = match session {
            Some(s) => {
                let room = match s.room_id.as_deref() {
                    Some(rid) => match rooms.get(rid) {
                        Some(name) => name.clone(),
                        None => {
                            let name = reference::room_name(conn, rid)?;
                            rooms.insert(rid.to_string(), name.clone());
                            name
                        }
                    },
                    None => None,
                };
                let d = elapsed(s.entered_at, now);
                PresenceRow {
                    student_id: student.id,
                    name: student.name,
                    state,
                    room_id: s.room_id,
                    room,
                    entered_at: Some(format_timestamp(s.entered_at)),
                    duration: Some(format_duration(d)),
                    duration_seconds: Some(d.num_seconds()),
                }
            }
            None => PresenceRow {
                student_id: student.id,
                name: student.name,
                state,
                room_id: None,
                room: None,
                entered_at: None,
                duration: None,
                duration_seconds: None,
            },
        };
        out.push(row);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn ts(s: &str) -> NaiveDateTime {
        parse_timestamp(s).unwrap()
    }

    fn seed() -> Connection {
        let conn = db::open_in_memory().unwrap();
        reference::create_student(&conn, Some("s1"), "Aoki", None).unwrap();
        reference::create_student(&conn, Some("s2"), "Baba", None).unwrap();
        reference::upsert_room(&conn, "r1", "Lab 1").unwrap();
        conn
    }

    fn sessions_for_student(conn: &Connection, student_id: &str) -> Vec<PresenceSession> {
        let mut stmt = conn
            .prepare(
                "SELECT id, student_id, room_id, entered_at, exited_at, note
                 FROM presence_sessions
                 WHERE student_id = ?
                 ORDER BY entered_at, rowid",
            )
            .unwrap();
        let raws = stmt
            .query_map([student_id], raw_from_row)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        raws.into_iter().map(|r| session_from_raw(r).unwrap()).collect()
    }

    fn presence_err(r: EngineResult<PresenceSession>) -> PresenceError {
        match r {
            Err(EngineError::Presence(e)) => e,
            other => panic!("expected presence error, got {:?}", other),
        }
    }

    #[test]
    fn check_out_without_session_is_not_present() {
        let conn = seed();
        let e = presence_err(check_out(&conn, "s1", ts("2025-04-07 09:00")));
        assert_eq!(e, PresenceError::NotPresent);
    }

    #[test]
    fn double_check_in_is_rejected() {
        let conn = seed();
        check_in(&conn, "s1", Some("r1"), ts("2025-04-07 08:40")).unwrap();
        let e = presence_err(check_in(&conn, "s1", Some("r1"), ts("2025-04-07 08:41")));
        assert_eq!(e, PresenceError::AlreadyPresent);
    }

    #[test]
    fn temporary_exit_and_return_walk_the_state_machine() {
        let conn = seed();
        assert_eq!(
            presence_err(temporary_exit(&conn, "s1", ts("2025-04-07 08:00"))),
            PresenceError::NotPresent
        );
        check_in(&conn, "s1", Some("r1"), ts("2025-04-07 08:40")).unwrap();
        assert_eq!(
            presence_err(return_from_exit(&conn, "s1", ts("2025-04-07 08:45"))),
            PresenceError::NotOut
        );

        let out = temporary_exit(&conn, "s1", ts("2025-04-07 09:00")).unwrap();
        assert_eq!(PresenceState::of(Some(&out)), PresenceState::TemporarilyOut);
        assert_eq!(
            presence_err(temporary_exit(&conn, "s1", ts("2025-04-07 09:01"))),
            PresenceError::AlreadyOut
        );

        let back = return_from_exit(&conn, "s1", ts("2025-04-07 09:10")).unwrap();
        assert_eq!(PresenceState::of(Some(&back)), PresenceState::Present);
        assert_eq!(back.id, out.id);

        // Checking out straight from temporarily-out is allowed.
        temporary_exit(&conn, "s1", ts("2025-04-07 09:20")).unwrap();
        let closed = check_out(&conn, "s1", ts("2025-04-07 09:30")).unwrap();
        assert_eq!(closed.exited_at, Some(ts("2025-04-07 09:30")));
        assert!(open_session(&conn, "s1").unwrap().is_none());
    }

    #[test]
    fn check_in_out_in_leaves_one_closed_and_one_open_session() {
        let conn = seed();
        check_in(&conn, "s1", Some("r1"), ts("2025-04-07 08:40")).unwrap();
        check_out(&conn, "s1", ts("2025-04-07 12:00")).unwrap();
        check_in(&conn, "s1", None, ts("2025-04-07 13:00")).unwrap();

        let all = sessions_for_student(&conn, "s1");
        assert_eq!(all.len(), 2);
        assert!(all[0].exited_at.is_some());
        assert!(all[1].exited_at.is_none());
    }

    #[test]
    fn exit_time_is_clamped_to_entry() {
        let conn = seed();
        check_in(&conn, "s1", None, ts("2025-04-07 10:00")).unwrap();
        let closed = check_out(&conn, "s1", ts("2025-04-07 09:00")).unwrap();
        assert_eq!(closed.exited_at, Some(ts("2025-04-07 10:00")));
    }

    #[test]
    fn toggle_alternates_between_check_in_and_out() {
        let conn = seed();
        let first = toggle_entry(&conn, "s2", Some("r1"), ts("2025-04-07 08:40")).unwrap();
        assert!(matches!(first, ToggleOutcome::CheckedIn(_)));
        temporary_exit(&conn, "s2", ts("2025-04-07 09:00")).unwrap();
        let second = toggle_entry(&conn, "s2", None, ts("2025-04-07 09:10")).unwrap();
        assert!(matches!(second, ToggleOutcome::CheckedOut(_)));
        let third = toggle_entry(&conn, "s2", None, ts("2025-04-07 09:20")).unwrap();
        assert!(matches!(third, ToggleOutcome::CheckedIn(_)));
    }

    #[test]
    fn status_board_reports_duration_and_room() {
        let conn = seed();
        check_in(&conn, "s1", Some("r1"), ts("2025-04-07 08:40:00")).unwrap();
        let board = status_board(&conn, ts("2025-04-07 10:05:30")).unwrap();
        assert_eq!(board.len(), 2);
        let aoki = &board[0];
        assert_eq!(aoki.state, PresenceState::Present);
        assert_eq!(aoki.room.as_deref(), Some("Lab 1"));
        assert_eq!(aoki.duration.as_deref(), Some("01:25:30"));
        assert_eq!(board[1].state, PresenceState::Absent);

        // A clock behind the entry time never yields a negative duration.
        let early = status_board(&conn, ts("2025-04-07 08:00:00")).unwrap();
        assert_eq!(early[0].duration.as_deref(), Some("00:00:00"));
    }
}
