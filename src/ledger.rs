use crate::error::{EngineError, EngineResult};
use crate::model::{
    format_date, format_timestamp, parse_date, parse_timestamp, AttendanceRecord, AttendanceStatus,
};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashSet;
use uuid::Uuid;

/// Result of a ledger insert. A duplicate is a normal outcome, not an error:
/// each caller decides whether it matters.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted(AttendanceRecord),
    Duplicate,
}

/// Inserts one record unless the (student, subject, period, day) occurrence is already recorded.
pub fn insert_record(
    conn: &Connection,
    student_id: &str,
    subject_id: &str,
    period: i64,
    at: NaiveDateTime,
    status: AttendanceStatus,
) -> EngineResult<InsertOutcome> {
    let id = Uuid::new_v4().to_string();
    let attended_on = at.date();
    let changed = conn.execute(
        "INSERT INTO attendance_records(id, student_id, subject_id, period, recorded_at, attended_on, status)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, subject_id, period, attended_on) DO NOTHING",
        (
            &id,
            student_id,
            subject_id,
            period,
            format_timestamp(at),
            format_date(attended_on),
            status.as_str(),
        ),
    )?;
    if changed == 0 {
        return Ok(InsertOutcome::Duplicate);
    }
    Ok(InsertOutcome::Inserted(AttendanceRecord {
        id,
        student_id: student_id.to_string(),
        subject_id: subject_id.to_string(),
        period,
        recorded_at: at,
        attended_on,
        status,
    }))
}

/// Subset of `candidates` that already hold a record for the given class occurrence.
pub fn recorded_students(
    conn: &Connection,
    subject_id: &str,
    period: i64,
    on: NaiveDate,
    candidates: &[String],
) -> EngineResult<HashSet<String>> {
    if candidates.is_empty() {
        return Ok(HashSet::new());
    }
    let placeholders = vec!["?"; candidates.len()].join(", ");
    let sql = format!(
        "SELECT student_id FROM attendance_records
         WHERE subject_id = ? AND period = ? AND attended_on = ? AND student_id IN ({})",
        placeholders
    );
    let mut bind: Vec<Value> = vec![
        Value::Text(subject_id.to_string()),
        Value::Integer(period),
        Value::Text(format_date(on)),
    ];
    bind.extend(candidates.iter().map(|s| Value::Text(s.clone())));
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(bind), |r| r.get::<_, String>(0))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(rows)
}

pub fn update_status(conn: &Connection, record_id: &str, status: AttendanceStatus) -> EngineResult<()> {
    let n = conn.execute(
        "UPDATE attendance_records SET status = ? WHERE id = ?",
        (status.as_str(), record_id),
    )?;
    if n == 0 {
        return Err(EngineError::not_found("attendance record", record_id));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub on_time: i64,
    pub late: i64,
    pub absent: i64,
}

/// Tally of a student's records for a subject whose day belongs to `term` in the calendar plan.
pub fn status_counts(
    conn: &Connection,
    student_id: &str,
    subject_id: &str,
    term: i64,
) -> EngineResult<StatusCounts> {
    let mut stmt = conn.prepare(
        "SELECT r.status, COUNT(*)
         FROM attendance_records r
         JOIN calendar_days c ON c.date = r.attended_on
         WHERE r.student_id = ? AND r.subject_id = ? AND c.term = ?
         GROUP BY r.status",
    )?;
    let rows = stmt
        .query_map((student_id, subject_id, term), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let mut counts = StatusCounts::default();
    for (status, n) in rows {
        match AttendanceStatus::parse(&status) {
            Some(AttendanceStatus::OnTime) => counts.on_time += n,
            Some(AttendanceStatus::Late) => counts.late += n,
            Some(AttendanceStatus::Absent) => counts.absent += n,
            None => tracing::warn!(status = %status, student_id, subject_id, "ignoring records with unknown status"),
        }
    }
    Ok(counts)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordRow {
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    pub subject_id: String,
    pub subject_name: String,
    pub period: i64,
    pub recorded_at: String,
    pub attended_on: String,
    pub status: String,
}

#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub term: Option<i64>,
    pub student_id: Option<String>,
}

/// Records with student and subject names, newest first.
pub fn list_records(conn: &Connection, filter: &RecordFilter) -> EngineResult<Vec<RecordRow>> {
    let mut sql = String::from(
        "SELECT r.id, r.student_id, st.name, r.subject_id, su.name, r.period,
                r.recorded_at, r.attended_on, r.status
         FROM attendance_records r
         JOIN students st ON st.id = r.student_id
         JOIN subjects su ON su.id = r.subject_id
         WHERE 1 = 1",
    );
    let mut bind: Vec<Value> = Vec::new();
    if let Some(term) = filter.term {
        sql.push_str(
            " AND r.attended_on IN (SELECT date FROM calendar_days WHERE term = ?)",
        );
        bind.push(Value::Integer(term));
    }
    if let Some(sid) = &filter.student_id {
        sql.push_str(" AND r.student_id = ?");
        bind.push(Value::Text(sid.clone()));
    }
    sql.push_str(" ORDER BY r.recorded_at DESC, r.period DESC");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(bind), |r| {
            Ok(RecordRow {
                id: r.get(0)?,
                student_id: r.get(1)?,
                student_name: r.get(2)?,
                subject_id: r.get(3)?,
                subject_name: r.get(4)?,
                period: r.get(5)?,
                recorded_at: r.get(6)?,
                attended_on: r.get(7)?,
                status: r.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Loads one record back into its typed form.
pub fn get_record(conn: &Connection, record_id: &str) -> EngineResult<Option<AttendanceRecord>> {
    let row: Option<(String, String, String, i64, String, String, String)> = conn
        .query_row(
            "SELECT id, student_id, subject_id, period, recorded_at, attended_on, status
             FROM attendance_records WHERE id = ?",
            [record_id],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get(5)?,
                    r.get(6)?,
                ))
            },
        )
        .optional()?;
    let Some((id, student_id, subject_id, period, recorded_at, attended_on, status)) = row else {
        return Ok(None);
    };
    Ok(Some(AttendanceRecord {
        id,
        student_id,
        subject_id,
        period,
        recorded_at: parse_timestamp(&recorded_at)
            .ok_or_else(|| EngineError::Corrupt(format!("recorded_at {}", recorded_at)))?,
        attended_on: parse_date(&attended_on)
            .ok_or_else(|| EngineError::Corrupt(format!("attended_on {}", attended_on)))?,
        status: AttendanceStatus::parse(&status)
            .ok_or_else(|| EngineError::Corrupt(format!("status {}", status)))?,
    }))
}
