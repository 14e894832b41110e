use crate::error::{EngineError, EngineResult};
use crate::model::{format_date, parse_date, CalendarDayPlan, Period, Student, Subject};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

pub const DEFAULT_TERM: i64 = 1;

pub fn create_student(
    conn: &Connection,
    id: Option<&str>,
    name: &str,
    guardian_email: Option<&str>,
) -> EngineResult<Student> {
    let name = name.trim();
    if name.is_empty() {
        return Err(EngineError::Invalid("student name must not be empty".into()));
    }
    let id = id
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    conn.execute(
        "INSERT INTO students(id, name, guardian_email, created_at)
         VALUES(?, ?, ?, datetime('now', 'localtime'))",
        (&id, name, guardian_email),
    )?;
    Ok(Student {
        id,
        name: name.to_string(),
        guardian_email: guardian_email.map(|s| s.to_string()),
    })
}

pub fn get_student(conn: &Connection, id: &str) -> EngineResult<Option<Student>> {
    Ok(conn
        .query_row(
            "SELECT id, name, guardian_email FROM students WHERE id = ?",
            [id],
            |r| {
                Ok(Student {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    guardian_email: r.get(2)?,
                })
            },
        )
        .optional()?)
}

pub fn require_student(conn: &Connection, id: &str) -> EngineResult<Student> {
    get_student(conn, id)?.ok_or_else(|| EngineError::not_found("student", id))
}

pub fn list_students(conn: &Connection) -> EngineResult<Vec<Student>> {
    let mut stmt =
        conn.prepare("SELECT id, name, guardian_email FROM students ORDER BY name, id")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(Student {
                id: r.get(0)?,
                name: r.get(1)?,
                guardian_email: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn set_guardian_email(
    conn: &Connection,
    student_id: &str,
    email: Option<&str>,
) -> EngineResult<()> {
    let email = email.map(str::trim).filter(|s| !s.is_empty());
    let changed = conn.execute(
        "UPDATE students SET guardian_email = ? WHERE id = ?",
        (email, student_id),
    )?;
    if changed == 0 {
        return Err(EngineError::not_found("student", student_id));
    }
    Ok(())
}

pub fn upsert_room(conn: &Connection, id: &str, name: &str) -> EngineResult<()> {
    conn.execute(
        "INSERT INTO rooms(id, name) VALUES(?, ?)
         ON CONFLICT(id) DO UPDATE SET name = excluded.name",
        (id, name),
    )?;
    Ok(())
}

pub fn room_name(conn: &Connection, id: &str) -> EngineResult<Option<String>> {
    Ok(conn
        .query_row("SELECT name FROM rooms WHERE id = ?", [id], |r| r.get(0))
        .optional()?)
}

pub fn upsert_subject(conn: &Connection, subject: &Subject) -> EngineResult<()> {
    conn.execute(
        "INSERT INTO subjects(id, name, teacher, room_id) VALUES(?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           name = excluded.name,
           teacher = excluded.teacher,
           room_id = excluded.room_id",
        (
            &subject.id,
            &subject.name,
            &subject.teacher,
            &subject.room_id,
        ),
    )?;
    Ok(())
}

pub fn get_subject(conn: &Connection, id: &str) -> EngineResult<Option<Subject>> {
    Ok(conn
        .query_row(
            "SELECT id, name, teacher, room_id FROM subjects WHERE id = ?",
            [id],
            |r| {
                Ok(Subject {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    teacher: r.get(2)?,
                    room_id: r.get(3)?,
                })
            },
        )
        .optional()?)
}

pub fn require_subject(conn: &Connection, id: &str) -> EngineResult<Subject> {
    get_subject(conn, id)?.ok_or_else(|| EngineError::not_found("subject", id))
}

pub fn list_subjects(conn: &Connection) -> EngineResult<Vec<Subject>> {
    let mut stmt = conn.prepare("SELECT id, name, teacher, room_id FROM subjects ORDER BY name, id")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(Subject {
                id: r.get(0)?,
                name: r.get(1)?,
                teacher: r.get(2)?,
                room_id: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn upsert_period(conn: &Connection, period: &Period) -> EngineResult<()> {
    if period.period <= 0 {
        return Err(EngineError::Invalid("period must be positive".into()));
    }
    let (Some(start), Some(end)) = (period.start(), period.end()) else {
        return Err(EngineError::Invalid("period times must be HH:MM".into()));
    };
    if end <= start {
        return Err(EngineError::Invalid("period must end after it starts".into()));
    }
    conn.execute(
        "INSERT INTO periods(period, start_time, end_time, note) VALUES(?, ?, ?, ?)
         ON CONFLICT(period) DO UPDATE SET
           start_time = excluded.start_time,
           end_time = excluded.end_time,
           note = excluded.note",
        (
            period.period,
            start.format("%H:%M").to_string(),
            end.format("%H:%M").to_string(),
            &period.note,
        ),
    )?;
    Ok(())
}

pub fn get_period(conn: &Connection, period: i64) -> EngineResult<Option<Period>> {
    Ok(conn
        .query_row(
            "SELECT period, start_time, end_time, note FROM periods WHERE period = ?",
            [period],
            period_from_row,
        )
        .optional()?)
}

pub fn list_periods(conn: &Connection) -> EngineResult<Vec<Period>> {
    let mut stmt =
        conn.prepare("SELECT period, start_time, end_time, note FROM periods ORDER BY period")?;
    let rows = stmt
        .query_map([], period_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn period_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Period> {
    Ok(Period {
        period: r.get(0)?,
        start_time: r.get(1)?,
        end_time: r.get(2)?,
        note: r.get(3)?,
    })
}

/// Highest configured period number; the slot that carries labels like lunch or homeroom.
pub fn last_period(conn: &Connection) -> EngineResult<Option<i64>> {
    Ok(conn.query_row("SELECT MAX(period) FROM periods", [], |r| r.get(0))?)
}

pub fn upsert_calendar_day(conn: &Connection, plan: &CalendarDayPlan) -> EngineResult<()> {
    conn.execute(
        "INSERT INTO calendar_days(date, term, weekday_code, note) VALUES(?, ?, ?, ?)
         ON CONFLICT(date) DO UPDATE SET
           term = excluded.term,
           weekday_code = excluded.weekday_code,
           note = excluded.note",
        (
            format_date(plan.date),
            plan.term,
            plan.weekday_code,
            &plan.note,
        ),
    )?;
    Ok(())
}

pub fn get_calendar_day(conn: &Connection, date: NaiveDate) -> EngineResult<Option<CalendarDayPlan>> {
    let row: Option<(String, i64, i64, Option<String>)> = conn
        .query_row(
            "SELECT date, term, weekday_code, note FROM calendar_days WHERE date = ?",
            [format_date(date)],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()?;
    let Some((raw_date, term, weekday_code, note)) = row else {
        return Ok(None);
    };
    let date = parse_date(&raw_date)
        .ok_or_else(|| EngineError::Corrupt(format!("calendar date {}", raw_date)))?;
    Ok(Some(CalendarDayPlan {
        date,
        term,
        weekday_code,
        note,
    }))
}

/// Term of the plan covering `date`, or the first term when the date is unplanned.
pub fn term_for_date(conn: &Connection, date: NaiveDate) -> EngineResult<i64> {
    Ok(get_calendar_day(conn, date)?
        .map(|p| p.term)
        .unwrap_or(DEFAULT_TERM))
}
