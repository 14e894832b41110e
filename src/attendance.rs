use crate::error::{EngineError, EngineResult, PresenceError, RegistrationError};
use crate::ledger::{self, InsertOutcome};
use crate::model::{AttendanceRecord, AttendanceStatus, PresenceSession};
use crate::notify::{AlertJob, AlertSink};
use crate::presence;
use crate::reference;
use crate::schedule;
use chrono::{Duration, NaiveDateTime, NaiveTime};
use rusqlite::Connection;
use serde::Serialize;

/// Minutes after a period's nominal start during which arrival counts as late
/// rather than absent. Same for every period.
pub const LATE_THRESHOLD_MINUTES: i64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Classification {
    OnTime,
    Late,
    Absent,
    Undefined,
    TimeError,
}

impl Classification {
    pub fn as_str(self) -> &'static str {
        match self {
            Classification::OnTime => "onTime",
            Classification::Late => "late",
            Classification::Absent => "absent",
            Classification::Undefined => "undefined",
            Classification::TimeError => "timeError",
        }
    }

    /// The ledger status, when the classification is one.
    pub fn status(self) -> Option<AttendanceStatus> {
        match self {
            Classification::OnTime => Some(AttendanceStatus::OnTime),
            Classification::Late => Some(AttendanceStatus::Late),
            Classification::Absent => Some(AttendanceStatus::Absent),
            Classification::Undefined | Classification::TimeError => None,
        }
    }
}

impl From<AttendanceStatus> for Classification {
    fn from(s: AttendanceStatus) -> Self {
        match s {
            AttendanceStatus::OnTime => Classification::OnTime,
            AttendanceStatus::Late => Classification::Late,
            AttendanceStatus::Absent => Classification::Absent,
        }
    }
}

/// Status for an event at `at` against a period starting at `start` on the same day.
pub fn classify_against(start: NaiveTime, at: NaiveDateTime) -> AttendanceStatus {
    let elapsed = at - at.date().and_time(start);
    if elapsed <= Duration::zero() {
        AttendanceStatus::OnTime
    } else if elapsed <= Duration::minutes(LATE_THRESHOLD_MINUTES) {
        AttendanceStatus::Late
    } else {
        AttendanceStatus::Absent
    }
}

pub fn classify(conn: &Connection, period: i64, at: NaiveDateTime) -> EngineResult<Classification> {
    let Some(p) = reference::get_period(conn, period)? else {
        return Ok(Classification::Undefined);
    };
    let Some(start) = p.start() else {
        tracing::warn!(period, start_time = %p.start_time, "period start time is unreadable");
        return Ok(Classification::TimeError);
    };
    Ok(classify_against(start, at).into())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub record: AttendanceRecord,
    pub subject_name: Option<String>,
    /// Session opened on the student's behalf, if they were not already checked in.
    pub opened_session: Option<PresenceSession>,
}

struct Target {
    subject_id: String,
    subject_name: Option<String>,
    period: i64,
    room_id: Option<String>,
}

fn explicit_target(
    conn: &Connection,
    subject_id: &str,
    period: i64,
    now: NaiveDateTime,
) -> EngineResult<Target> {
    let subject = reference::require_subject(conn, subject_id)?;
    // Prefer the room of the resolved slot when it is this subject's class.
    let slot = schedule::resolve_slot(conn, now.date(), period)?;
    let room_id = if slot.subject_id.as_deref() == Some(subject_id) && slot.room_id.is_some() {
        slot.room_id
    } else {
        subject.room_id
    };
    Ok(Target {
        subject_id: subject.id,
        subject_name: Some(subject.name),
        period,
        room_id,
    })
}

fn resolved_target(conn: &Connection, now: NaiveDateTime) -> EngineResult<Target> {
    let Some(slot) = schedule::current_slot(conn, now)? else {
        return Err(RegistrationError::NoClassScheduled.into());
    };
    let Some(subject_id) = slot.subject_id else {
        return Err(RegistrationError::NoClassScheduled.into());
    };
    Ok(Target {
        subject_id,
        subject_name: slot.subject_name,
        period: slot.period,
        room_id: slot.room_id,
    })
}

/// Records a student's own registration for a class.
///
/// With no subject and period, the class in session at `now` is used. A second
/// registration for the same class is refused. On success the student is
/// checked in if they were not already, and a rate check is queued.
pub fn register_attendance(
    conn: &Connection,
    sink: &dyn AlertSink,
    student_id: &str,
    subject_id: Option<&str>,
    period: Option<i64>,
    now: NaiveDateTime,
) -> EngineResult<Registration> {
    reference::require_student(conn, student_id)?;
    let target = match (subject_id, period) {
        (Some(sid), Some(p)) => explicit_target(conn, sid, p, now)?,
        (None, None) => resolved_target(conn, now)?,
        _ => {
            return Err(EngineError::Invalid(
                "subjectId and period must be given together".into(),
            ))
        }
    };

    let status = match classify(conn, target.period, now)? {
        Classification::Undefined => return Err(RegistrationError::PeriodUndefined.into()),
        Classification::TimeError => return Err(RegistrationError::PeriodTimeError.into()),
        c => c.status().ok_or(RegistrationError::PeriodTimeError)?,
    };

    let tx = conn.unchecked_transaction()?;
    let record = match ledger::insert_record(
        &tx,
        student_id,
        &target.subject_id,
        target.period,
        now,
        status,
    )? {
        InsertOutcome::Inserted(r) => r,
        InsertOutcome::Duplicate => return Err(RegistrationError::AlreadyRecorded.into()),
    };

    let opened_session = if presence::open_session(&tx, student_id)?.is_none() {
        match presence::check_in(&tx, student_id, target.room_id.as_deref(), now) {
            Ok(s) => Some(s),
            Err(EngineError::Presence(PresenceError::AlreadyPresent)) => None,
            Err(e) => return Err(e),
        }
    } else {
        None
    };
    tx.commit()?;

    tracing::info!(
        student_id,
        subject_id = %record.subject_id,
        period = record.period,
        status = record.status.as_str(),
        "attendance registered"
    );
    sink.submit(AlertJob::RateCheck {
        student_id: student_id.to_string(),
        subject_id: record.subject_id.clone(),
        as_of: now.date(),
    });

    Ok(Registration {
        record,
        subject_name: target.subject_name,
        opened_session,
    })
}
