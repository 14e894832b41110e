use crate::collab::{IntentClassifier, ReportIntent, ReportKind};
use crate::error::{EngineError, EngineResult};
use crate::model::format_timestamp;
use crate::notify::{AlertJob, AlertSink, Notification};
use crate::reference;
use chrono::NaiveDateTime;
use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

/// Reply sent back to the student when their message could not be interpreted.
pub const DEGRADED_REPLY: &str =
    "Sorry, messages cannot be processed right now. Please contact the school office directly.";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRecord {
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub category: Option<String>,
    pub summary: String,
    pub reported_at: String,
    pub resolved: bool,
}

fn report_notice(student_name: &str, intent: &ReportIntent, recipients: Vec<String>) -> Notification {
    let what = match intent.kind {
        ReportKind::Late => "a late arrival",
        ReportKind::Absent => "an absence",
    };
    let mut body = format!("{} reported {}: {}", student_name, what, intent.summary);
    if let Some(c) = &intent.category {
        body.push_str(&format!(" (category: {})", c));
    }
    Notification {
        recipients,
        subject: format!("New {} report from {}", intent.kind.as_str(), student_name),
        body,
    }
}

/// Stores a late/absence report and, when anyone is listening, notifies the admins.
pub fn submit_report(
    conn: &Connection,
    sink: &dyn AlertSink,
    admin_recipients: Vec<String>,
    student_id: &str,
    intent: &ReportIntent,
    now: NaiveDateTime,
) -> EngineResult<ReportRecord> {
    let student = reference::require_student(conn, student_id)?;
    let summary = intent.summary.trim();
    if summary.is_empty() {
        return Err(EngineError::Invalid("report summary must not be empty".into()));
    }
    let category = intent
        .category
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string());

    let id = Uuid::new_v4().to_string();
    let reported_at = format_timestamp(now);
    conn.execute(
        "INSERT INTO report_records(id, student_id, report_type, category, summary, reported_at, resolved)
         VALUES(?, ?, ?, ?, ?, ?, 0)",
        (&id, student_id, intent.kind.as_str(), &category, summary, &reported_at),
    )?;
    tracing::info!(student_id, kind = intent.kind.as_str(), "report stored");

    if admin_recipients.is_empty() {
        tracing::debug!("no admin recipients; report notice skipped");
    } else {
        sink.submit(AlertJob::Deliver(report_notice(&student.name, intent, admin_recipients)));
    }

    Ok(ReportRecord {
        id,
        student_id: student.id,
        student_name: student.name,
        kind: intent.kind.as_str().to_string(),
        category,
        summary: summary.to_string(),
        reported_at,
        resolved: false,
    })
}

pub fn list_reports(conn: &Connection, unresolved_only: bool) -> EngineResult<Vec<ReportRecord>> {
    let mut stmt = conn.prepare(
        "SELECT r.id, r.student_id, s.name, r.report_type, r.category, r.summary, r.reported_at, r.resolved
         FROM report_records r
         JOIN students s ON s.id = r.student_id
         WHERE (? = 0 OR r.resolved = 0)
         ORDER BY r.reported_at DESC, r.rowid DESC",
    )?;
    let rows = stmt
        .query_map([unresolved_only as i64], |r| {
            Ok(ReportRecord {
                id: r.get(0)?,
                student_id: r.get(1)?,
                student_name: r.get(2)?,
                kind: r.get(3)?,
                category: r.get(4)?,
                summary: r.get(5)?,
                reported_at: r.get(6)?,
                resolved: r.get::<_, i64>(7)? != 0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn resolve_report(conn: &Connection, id: &str) -> EngineResult<()> {
    let n = conn.execute("UPDATE report_records SET resolved = 1 WHERE id = ?", [id])?;
    if n == 0 {
        return Err(EngineError::not_found("report", id));
    }
    Ok(())
}

pub fn unresolved_count(conn: &Connection) -> EngineResult<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM report_records WHERE resolved = 0",
        [],
        |r| r.get(0),
    )?)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Triage {
    pub is_report: bool,
    pub degraded: bool,
    pub report: Option<ReportRecord>,
    pub reply: Option<String>,
}

/// Runs a student's free-text message through the classifier. A recognised
/// late/absence notice is stored as a report; an unavailable classifier yields
/// a degraded reply instead of an error.
pub fn triage_message(
    conn: &Connection,
    classifier: &dyn IntentClassifier,
    sink: &dyn AlertSink,
    admin_recipients: Vec<String>,
    student_id: &str,
    text: &str,
    now: NaiveDateTime,
) -> EngineResult<Triage> {
    reference::require_student(conn, student_id)?;
    match classifier.classify(text) {
        Ok(Some(intent)) => {
            let report = submit_report(conn, sink, admin_recipients, student_id, &intent, now)?;
            Ok(Triage {
                is_report: true,
                degraded: false,
                reply: Some(format!("Your {} report has been received.", intent.kind.as_str())),
                report: Some(report),
            })
        }
        Ok(None) => Ok(Triage {
            is_report: false,
            degraded: false,
            report: None,
            reply: None,
        }),
        Err(e) => {
            tracing::warn!(student_id, error = %e, "intent classifier failed");
            Ok(Triage {
                is_report: false,
                degraded: true,
                report: None,
                reply: Some(DEGRADED_REPLY.to_string()),
            })
        }
    }
}
