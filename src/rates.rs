use crate::error::EngineResult;
use crate::ledger;
use crate::model::format_date;
use crate::reference;
use crate::timetable;
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::Serialize;

/// Alerts fire when on-time plus late attendance falls below this share of held classes.
pub const ALERT_THRESHOLD_PERCENT: f64 = 80.0;

pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

fn percent(part: i64, whole: i64) -> f64 {
    if whole <= 0 {
        return 0.0;
    }
    round_off_1_decimal(part as f64 / whole as f64 * 100.0)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRate {
    pub student_id: String,
    pub subject_id: String,
    pub subject_name: Option<String>,
    pub term: i64,
    pub as_of: String,
    pub rate_percent: f64,
    pub attended_count: i64,
    pub tardy_count: i64,
    /// Recorded absences plus scheduled occurrences with no record at all.
    pub absent_count: i64,
    pub recorded_absent_count: i64,
    pub unrecorded_count: i64,
    pub total_so_far: i64,
    pub total_planned: i64,
}

impl AttendanceRate {
    /// Share of held classes attended at all, late included.
    pub fn alert_percent(&self) -> f64 {
        percent(self.attended_count + self.tardy_count, self.total_so_far)
    }

    pub fn below_alert_threshold(&self) -> bool {
        self.total_so_far > 0 && self.alert_percent() < ALERT_THRESHOLD_PERCENT
    }
}

fn count_plan_days(
    conn: &Connection,
    term: i64,
    weekday_code: i64,
    until: Option<NaiveDate>,
) -> EngineResult<i64> {
    let n = match until {
        Some(d) => conn.query_row(
            "SELECT COUNT(*) FROM calendar_days
             WHERE term = ? AND weekday_code = ? AND date <= ?",
            (term, weekday_code, format_date(d)),
            |r| r.get(0),
        )?,
        None => conn.query_row(
            "SELECT COUNT(*) FROM calendar_days WHERE term = ? AND weekday_code = ?",
            (term, weekday_code),
            |r| r.get(0),
        )?,
    };
    Ok(n)
}

/// Derives a student's rate for one subject from the calendar plan, the master
/// timetable and the ledger. Read-only.
pub fn compute_rate(
    conn: &Connection,
    student_id: &str,
    subject_id: &str,
    term: i64,
    as_of: NaiveDate,
) -> EngineResult<AttendanceRate> {
    let mut total_so_far = 0;
    let mut total_planned = 0;
    for (weekday, periods_per_day) in timetable::subject_weekly_load(conn, subject_id, term)? {
        total_so_far += count_plan_days(conn, term, weekday.code(), Some(as_of))? * periods_per_day;
        total_planned += count_plan_days(conn, term, weekday.code(), None)? * periods_per_day;
    }

    let counts = ledger::status_counts(conn, student_id, subject_id, term)?;
    let recorded = counts.on_time + counts.late + counts.absent;
    let unrecorded = (total_so_far - recorded).max(0);

    Ok(AttendanceRate {
        student_id: student_id.to_string(),
        subject_id: subject_id.to_string(),
        subject_name: reference::get_subject(conn, subject_id)?.map(|s| s.name),
        term,
        as_of: format_date(as_of),
        rate_percent: percent(counts.on_time, total_so_far),
        attended_count: counts.on_time,
        tardy_count: counts.late,
        absent_count: counts.absent + unrecorded,
        recorded_absent_count: counts.absent,
        unrecorded_count: unrecorded,
        total_so_far,
        total_planned,
    })
}

/// One rate per subject on the term's master timetable, ordered by subject name.
pub fn term_summary(
    conn: &Connection,
    student_id: &str,
    term: i64,
    as_of: NaiveDate,
) -> EngineResult<Vec<AttendanceRate>> {
    timetable::term_subject_ids(conn, term)?
        .iter()
        .map(|subject_id| compute_rate(conn, student_id, subject_id, term, as_of))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterRow {
    pub student_name: String,
    #[serde(flatten)]
    pub rate: AttendanceRate,
}

/// One rate row per student for a subject and term, ordered by student name.
pub fn subject_summary(
    conn: &Connection,
    subject_id: &str,
    term: i64,
    as_of: NaiveDate,
) -> EngineResult<Vec<RosterRow>> {
    reference::list_students(conn)?
        .into_iter()
        .map(|student| -> EngineResult<RosterRow> {
            Ok(RosterRow {
                rate: compute_rate(conn, &student.id, subject_id, term, as_of)?,
                student_name: student.name,
            })
        })
        .collect()
}

fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

pub const ROSTER_CSV_HEADER: &str =
    "studentId,name,ratePercent,onTime,late,absent,totalSoFar,totalPlanned";

/// Roster rows as CSV with a header line, absences counted the effective way.
pub fn roster_csv(rows: &[RosterRow]) -> String {
    let mut out = String::from(ROSTER_CSV_HEADER);
    out.push('\n');
    for row in rows {
        let r = &row.rate;
        out.push_str(&format!(
            "{},{},{:.1},{},{},{},{},{}\n",
            csv_quote(&r.student_id),
            csv_quote(&row.student_name),
            r.rate_percent,
            r.attended_count,
            r.tardy_count,
            r.absent_count,
            r.total_so_far,
            r.total_planned,
        ));
    }
    out
}
