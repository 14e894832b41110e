use crate::config;
use crate::db;
use crate::error::EngineResult;
use crate::rates;
use crate::reference;
use anyhow::Context;
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::thread::JoinHandle;

pub const OUTBOX_DIR: &str = "outbox";
pub const OUTBOX_FILE: &str = "notifications.jsonl";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlertJob {
    RateCheck {
        student_id: String,
        subject_id: String,
        as_of: NaiveDate,
    },
    Deliver(Notification),
}

/// Fire-and-forget queue for alert work. Submitting never blocks and never fails
/// the caller.
pub trait AlertSink {
    fn submit(&self, job: AlertJob);
}

/// A sink that drops everything. Used where alerting is not wired up.
pub struct NullSink;

impl AlertSink for NullSink {
    fn submit(&self, job: AlertJob) {
        tracing::debug!(?job, "alert dropped; no dispatcher");
    }
}

/// Outbound edge to whatever actually delivers mail.
pub trait NotificationRelay: Send {
    fn send(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Appends one JSON object per line for an external mail gateway to pick up.
pub struct OutboxRelay {
    path: PathBuf,
}

impl OutboxRelay {
    pub fn new(workspace: &Path) -> Self {
        Self {
            path: outbox_path(workspace),
        }
    }
}

pub fn outbox_path(workspace: &Path) -> PathBuf {
    workspace.join(OUTBOX_DIR).join(OUTBOX_FILE)
}

impl NotificationRelay for OutboxRelay {
    fn send(&self, notification: &Notification) -> anyhow::Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.to_string_lossy()))?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.to_string_lossy()))?;
        let line = serde_json::to_string(notification)?;
        writeln!(file, "{}", line).context("failed to append notification")?;
        Ok(())
    }
}

/// Builds the low-attendance notice for a student and subject, or `None` when the
/// rate is fine, alerts are disabled, or nobody would receive it.
pub fn rate_alert(
    conn: &Connection,
    student_id: &str,
    subject_id: &str,
    as_of: NaiveDate,
    settings: &config::NotificationSettings,
    admin_recipients: Vec<String>,
) -> EngineResult<Option<Notification>> {
    if !settings.enabled {
        return Ok(None);
    }
    let term = reference::term_for_date(conn, as_of)?;
    let rate = rates::compute_rate(conn, student_id, subject_id, term, as_of)?;
    if !rate.below_alert_threshold() {
        return Ok(None);
    }

    let student = reference::require_student(conn, student_id)?;
    let mut recipients = admin_recipients;
    if let Some(g) = student.guardian_email.as_deref().map(str::trim) {
        if !g.is_empty() && !recipients.iter().any(|r| r.eq_ignore_ascii_case(g)) {
            recipients.push(g.to_string());
        }
    }
    if recipients.is_empty() {
        tracing::info!(student_id, subject_id, "attendance alert has no recipients; skipped");
        return Ok(None);
    }

    let subject_name = rate.subject_name.clone().unwrap_or_else(|| subject_id.to_string());
    let body = format!(
        "{} has attended {:.1}% of {} classes held so far in term {} ({} on time, {} late, {} absent of {}).",
        student.name,
        rate.alert_percent(),
        subject_name,
        term,
        rate.attended_count,
        rate.tardy_count,
        rate.absent_count,
        rate.total_so_far,
    );
    Ok(Some(Notification {
        recipients,
        subject: format!("Attendance alert: {} in {}", student.name, subject_name),
        body,
    }))
}

fn run_job(conn: &Connection, relay: &dyn NotificationRelay, job: AlertJob) -> anyhow::Result<()> {
    match job {
        AlertJob::RateCheck {
            student_id,
            subject_id,
            as_of,
        } => {
            let settings = config::load_notifications(conn)?;
            let admins = settings.admin_recipients();
            let notice = rate_alert(conn, &student_id, &subject_id, as_of, &settings, admins)
                .with_context(|| format!("rate check for {} in {}", student_id, subject_id))?;
            if let Some(n) = notice {
                tracing::info!(student_id, subject_id, "sending attendance alert");
                relay.send(&n)?;
            }
            Ok(())
        }
        AlertJob::Deliver(n) => relay.send(&n),
    }
}

/// Background worker that owns its own connection and drains alert jobs.
/// Each job gets exactly one attempt.
pub struct AlertDispatcher {
    tx: Option<Sender<AlertJob>>,
    handle: Option<JoinHandle<()>>,
}

impl AlertDispatcher {
    pub fn spawn(workspace: &Path, relay: Box<dyn NotificationRelay>) -> anyhow::Result<Self> {
        let conn = db::open_db(workspace).context("alert worker connection")?;
        let (tx, rx) = mpsc::channel::<AlertJob>();
        let handle = std::thread::Builder::new()
            .name("rollcall-alerts".into())
            .spawn(move || {
                for job in rx {
                    if let Err(e) = run_job(&conn, relay.as_ref(), job) {
                        tracing::warn!(error = %format!("{e:#}"), "alert job failed");
                    }
                }
                tracing::debug!("alert worker stopped");
            })
            .context("failed to start alert worker")?;
        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
        })
    }
}

impl AlertSink for AlertDispatcher {
    fn submit(&self, job: AlertJob) {
        let Some(tx) = self.tx.as_ref() else {
            return;
        };
        if tx.send(job).is_err() {
            tracing::warn!("alert worker is gone; job dropped");
        }
    }
}

impl Drop for AlertDispatcher {
    fn drop(&mut self) {
        // Closing the channel lets the worker finish queued jobs and exit.
        self.tx.take();
        if let Some(h) = self.handle.take() {
            if h.join().is_err() {
                tracing::warn!("alert worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::insert_record;
    use crate::model::{AttendanceStatus, CalendarDayPlan, Period, Subject, Weekday};
    use crate::timetable;
    use chrono::{Duration, NaiveTime};
    use std::sync::{Arc, Mutex};
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(prefix: &str) -> PathBuf {
        let p = std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    struct Captured(Arc<Mutex<Vec<Notification>>>);

    impl NotificationRelay for Captured {
        fn send(&self, n: &Notification) -> anyhow::Result<()> {
            self.0.lock().expect("lock").push(n.clone());
            Ok(())
        }
    }

    fn monday(n: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 4, 7).unwrap() + Duration::weeks(n)
    }

    /// Four planned Mondays with math in period 1; the student attended once.
    fn seed(conn: &Connection, guardian: Option<&str>) {
        reference::create_student(conn, Some("s1"), "Aoki", guardian).unwrap();
        reference::upsert_subject(
            conn,
            &Subject {
                id: "math".into(),
                name: "Math".into(),
                teacher: None,
                room_id: None,
            },
        )
        .unwrap();
        for (n, s, e) in [(1, "08:50", "10:30"), (2, "12:20", "13:00")] {
            reference::upsert_period(
                conn,
                &Period {
                    period: n,
                    start_time: s.into(),
                    end_time: e.into(),
                    note: None,
                },
            )
            .unwrap();
        }
        for n in 0..4 {
            reference::upsert_calendar_day(
                conn,
                &CalendarDayPlan {
                    date: monday(n),
                    term: 1,
                    weekday_code: 1,
                    note: None,
                },
            )
            .unwrap();
        }
        timetable::set_slot(conn, 1, Weekday::Mon, 1, Some("math"), None).unwrap();
        let at = monday(0).and_time(NaiveTime::from_hms_opt(8, 45, 0).unwrap());
        insert_record(conn, "s1", "math", 1, at, AttendanceStatus::OnTime).unwrap();
    }

    #[test]
    fn low_rate_alert_goes_to_admins_and_guardian() {
        let conn = db::open_in_memory().unwrap();
        seed(&conn, Some("parent@home.test"));
        let settings = config::NotificationSettings::default();
        let n = rate_alert(
            &conn,
            "s1",
            "math",
            monday(3),
            &settings,
            vec!["office@school.test".into()],
        )
        .unwrap()
        .expect("alert expected at 25%");
        assert_eq!(
            n.recipients,
            vec!["office@school.test".to_string(), "parent@home.test".to_string()]
        );
        assert!(n.body.contains("25.0%"));
    }

    #[test]
    fn no_alert_when_disabled_healthy_or_unaddressed() {
        let conn = db::open_in_memory().unwrap();
        seed(&conn, None);
        let disabled = config::NotificationSettings {
            enabled: false,
            admin_recipients: vec!["office@school.test".into()],
        };
        assert!(rate_alert(&conn, "s1", "math", monday(3), &disabled, disabled.admin_recipients.clone())
            .unwrap()
            .is_none());

        let enabled = config::NotificationSettings::default();
        // Only one class held by the first Monday, and it was attended.
        assert!(rate_alert(&conn, "s1", "math", monday(0), &enabled, vec!["a@b.test".into()])
            .unwrap()
            .is_none());
        // Low rate but nobody to tell.
        assert!(rate_alert(&conn, "s1", "math", monday(3), &enabled, Vec::new())
            .unwrap()
            .is_none());
    }

    #[test]
    fn dispatcher_drains_jobs_before_shutdown() {
        let ws = temp_dir("rollcall-notify-dispatch");
        {
            let conn = db::open_db(&ws).unwrap();
            seed(&conn, Some("parent@home.test"));
        }
        let sent = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = AlertDispatcher::spawn(&ws, Box::new(Captured(sent.clone()))).unwrap();
        dispatcher.submit(AlertJob::RateCheck {
            student_id: "s1".into(),
            subject_id: "math".into(),
            as_of: monday(3),
        });
        // Unknown student: logged and dropped, the worker keeps going.
        dispatcher.submit(AlertJob::RateCheck {
            student_id: "ghost".into(),
            subject_id: "math".into(),
            as_of: monday(3),
        });
        dispatcher.submit(AlertJob::Deliver(Notification {
            recipients: vec!["office@school.test".into()],
            subject: "Report".into(),
            body: "late".into(),
        }));
        drop(dispatcher);

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].subject.starts_with("Attendance alert"));
        assert_eq!(sent[1].subject, "Report");
    }

    #[test]
    fn outbox_relay_appends_json_lines() {
        let ws = temp_dir("rollcall-notify-outbox");
        let relay = OutboxRelay::new(&ws);
        for subject in ["one", "two"] {
            relay
                .send(&Notification {
                    recipients: vec!["x@y.test".into()],
                    subject: subject.into(),
                    body: String::new(),
                })
                .unwrap();
        }
        let text = std::fs::read_to_string(outbox_path(&ws)).unwrap();
        let lines: Vec<Notification> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].subject, "two");
    }
}
