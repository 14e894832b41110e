use crate::error::EngineResult;
use crate::model::{format_date, CalendarDayPlan, Period};
use crate::reference;
use crate::timetable;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::Connection;
use serde::Serialize;
use std::fmt::Write as _;

pub const LABEL_EMPTY: &str = "Unscheduled";
pub const LABEL_NO_CLASS: &str = "No class";
pub const LABEL_BREAK: &str = "Break";
pub const LABEL_NON_INSTRUCTIONAL: &str = "No classes";

/// Grace on both sides of a period's nominal window when matching "now" to a period.
pub const PERIOD_GRACE_MINUTES: i64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SlotKind {
    Class,
    Label,
    Break,
    NoClass,
    Empty,
    NonInstructional,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotResolution {
    pub date: String,
    pub period: i64,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub subject_id: Option<String>,
    pub subject_name: Option<String>,
    pub teacher: Option<String>,
    pub room_id: Option<String>,
    pub room: Option<String>,
    pub note: Option<String>,
    pub display_name: String,
    pub kind: SlotKind,
    pub is_override: bool,
    pub is_non_instructional: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DaySchedule {
    pub date: String,
    pub term: Option<i64>,
    pub weekday: Option<String>,
    pub note: Option<String>,
    pub is_non_instructional: bool,
    pub slots: Vec<SlotResolution>,
}

fn non_instructional_slot(date: NaiveDate, period: i64, times: Option<&Period>) -> SlotResolution {
    SlotResolution {
        date: format_date(date),
        period,
        start_time: times.map(|p| p.start_time.clone()),
        end_time: times.map(|p| p.end_time.clone()),
        subject_id: None,
        subject_name: None,
        teacher: None,
        room_id: None,
        room: None,
        note: None,
        display_name: LABEL_NON_INSTRUCTIONAL.to_string(),
        kind: SlotKind::NonInstructional,
        is_override: false,
        is_non_instructional: true,
    }
}

/// What is actually scheduled on `date` at `period`.
///
/// Days without a plan, or whose weekday-code is outside Mon..Fri, are
/// non-instructional for every period; override rows for such days are not consulted.
pub fn resolve_slot(conn: &Connection, date: NaiveDate, period: i64) -> EngineResult<SlotResolution> {
    let plan = reference::get_calendar_day(conn, date)?;
    let last = reference::last_period(conn)?;
    let times = reference::get_period(conn, period)?;
    resolve_with_plan(conn, date, plan.as_ref(), period, last, times.as_ref())
}

fn resolve_with_plan(
    conn: &Connection,
    date: NaiveDate,
    plan: Option<&CalendarDayPlan>,
    period: i64,
    last: Option<i64>,
    times: Option<&Period>,
) -> EngineResult<SlotResolution> {
    let Some((term, weekday)) = plan.and_then(|p| p.weekday().map(|w| (p.term, w))) else {
        if timetable::get_override(conn, date, period)?.is_some() {
            tracing::debug!(date = %date, period, "override ignored on non-instructional day");
        }
        return Ok(non_instructional_slot(date, period, times));
    };

    let base = timetable::get_slot(conn, term, weekday, period)?;
    let over = timetable::get_override(conn, date, period)?;
    let has_row = base.is_some() || over.is_some();
    let is_override = over.is_some();

    // An override row replaces the master assignment wholesale.
    let (subject_id, room_override, note) = match (over, base) {
        (Some(o), _) => (o.subject_id, o.room_id, o.note),
        (None, Some(b)) => (b.subject_id, None, b.note),
        (None, None) => (None, None, None),
    };

    let subject = match subject_id.as_deref() {
        Some(sid) => {
            let s = reference::get_subject(conn, sid)?;
            if s.is_none() {
                tracing::warn!(subject_id = sid, date = %date, period, "slot references unknown subject");
            }
            s
        }
        None => None,
    };

    let room_id = room_override.or_else(|| subject.as_ref().and_then(|s| s.room_id.clone()));
    let room = match room_id.as_deref() {
        Some(rid) => reference::room_name(conn, rid)?,
        None => None,
    };

    let is_last = last == Some(period);
    let (display_name, kind) = match (&subject, &note) {
        (Some(_), Some(n)) if is_last => (n.clone(), SlotKind::Label),
        (Some(s), _) => (s.name.clone(), SlotKind::Class),
        (None, Some(n)) if is_last => (n.clone(), SlotKind::Label),
        (None, None) if is_last && has_row => (LABEL_BREAK.to_string(), SlotKind::Break),
        (None, Some(_)) => (LABEL_NO_CLASS.to_string(), SlotKind::NoClass),
        (None, None) => (LABEL_EMPTY.to_string(), SlotKind::Empty),
    };

    Ok(SlotResolution {
        date: format_date(date),
        period,
        start_time: times.map(|p| p.start_time.clone()),
        end_time: times.map(|p| p.end_time.clone()),
        subject_id: subject.as_ref().map(|s| s.id.clone()),
        subject_name: subject.as_ref().map(|s| s.name.clone()),
        teacher: subject.as_ref().and_then(|s| s.teacher.clone()),
        room_id,
        room,
        note,
        display_name,
        kind,
        is_override,
        is_non_instructional: false,
    })
}

/// Resolves periods `1..=last` for `date`.
pub fn resolve_day(conn: &Connection, date: NaiveDate) -> EngineResult<DaySchedule> {
    let plan = reference::get_calendar_day(conn, date)?;
    let periods = reference::list_periods(conn)?;
    let last = periods.iter().map(|p| p.period).max();
    let weekday = plan.as_ref().and_then(|p| p.weekday());

    let mut slots = Vec::new();
    if let Some(last) = last {
        for n in 1..=last {
            let times = periods.iter().find(|p| p.period == n);
            slots.push(resolve_with_plan(
                conn,
                date,
                plan.as_ref(),
                n,
                Some(last),
                times,
            )?);
        }
    }

    Ok(DaySchedule {
        date: format_date(date),
        term: plan.as_ref().map(|p| p.term),
        weekday: weekday.map(|w| w.name().to_string()),
        note: plan.as_ref().and_then(|p| p.note.clone()),
        is_non_instructional: weekday.is_none(),
        slots,
    })
}

pub fn resolve_week(conn: &Connection, start: NaiveDate, days: u32) -> EngineResult<Vec<DaySchedule>> {
    let mut out = Vec::with_capacity(days as usize);
    for offset in 0..days {
        out.push(resolve_day(conn, start + Duration::days(offset as i64))?);
    }
    Ok(out)
}

/// Period in session at `at`.
///
/// A period whose nominal window contains `at` is taken outright. Between or
/// around periods, a window widened by `grace_minutes` on both sides still
/// matches, and the period whose nominal window is nearest wins (the lower
/// number on a tie).
pub fn period_at(conn: &Connection, at: NaiveTime, grace_minutes: i64) -> EngineResult<Option<Period>> {
    let grace = Duration::minutes(grace_minutes);
    // Compare as datetimes on a fixed day so the widened window cannot wrap past midnight.
    let day = NaiveDate::default();
    let at = day.and_time(at);
    let mut nearest: Option<(Duration, Period)> = None;
    for p in reference::list_periods(conn)? {
        let (Some(start), Some(end)) = (p.start(), p.end()) else {
            tracing::warn!(period = p.period, "skipping period with unparsable times");
            continue;
        };
        let (start, end) = (day.and_time(start), day.and_time(end));
        if start <= at && at <= end {
            return Ok(Some(p));
        }
        let gap = if at < start { start - at } else { at - end };
        if gap > grace {
            continue;
        }
        if nearest.as_ref().map_or(true, |(best, _)| gap < *best) {
            nearest = Some((gap, p));
        }
    }
    Ok(nearest.map(|(_, p)| p))
}

/// The resolved slot in session at `now` (with the standard grace window), if any.
pub fn current_slot(conn: &Connection, now: NaiveDateTime) -> EngineResult<Option<SlotResolution>> {
    let Some(p) = period_at(conn, now.time(), PERIOD_GRACE_MINUTES)? else {
        return Ok(None);
    };
    Ok(Some(resolve_slot(conn, now.date(), p.period)?))
}

/// Plain-text rendering of resolved days, one block per date.
pub fn render_text(days: &[DaySchedule]) -> String {
    let mut out = String::new();
    if days.is_empty() {
        out.push_str("(no schedule data for this range)\n");
    }
    for day in days {
        let _ = write!(out, "{}", day.date);
        if let Some(w) = &day.weekday {
            let _ = write!(out, " ({})", w);
        }
        out.push('\n');
        if let Some(note) = &day.note {
            let _ = writeln!(out, "  note: {}", note);
        }
        if day.is_non_instructional {
            let _ = writeln!(out, "  {}", LABEL_NON_INSTRUCTIONAL);
            continue;
        }
        for s in &day.slots {
            if matches!(s.kind, SlotKind::Empty) {
                continue;
            }
            let _ = write!(out, "  P{}", s.period);
            if let Some(start) = &s.start_time {
                let _ = write!(out, " {}", start);
            }
            let _ = write!(out, " {}", s.display_name);
            if let Some(t) = &s.teacher {
                let _ = write!(out, " ({})", t);
            }
            if let Some(r) = &s.room {
                let _ = write!(out, " @ {}", r);
            }
            if s.is_override {
                out.push_str(" [changed]");
            }
            out.push('\n');
        }
    }
    out
}
