use crate::attendance;
use crate::error::EngineResult;
use crate::ledger::{self, InsertOutcome};
use crate::model::AttendanceRecord;
use crate::notify::{AlertJob, AlertSink};
use crate::presence;
use crate::schedule;
use chrono::NaiveDateTime;
use rusqlite::Connection;

/// Turns physical presence into attendance: every student with an open session
/// during the class in session at `now` gets a record if they have none yet.
///
/// Safe to run on every status poll. Records another writer got to first are
/// skipped silently. Returns only the records this run created.
pub fn reconcile(
    conn: &Connection,
    now: NaiveDateTime,
    sink: &dyn AlertSink,
) -> EngineResult<Vec<AttendanceRecord>> {
    let present: Vec<String> = presence::open_sessions(conn)?
        .into_iter()
        .map(|s| s.student_id)
        .collect();
    if present.is_empty() {
        return Ok(Vec::new());
    }

    let Some(slot) = schedule::current_slot(conn, now)? else {
        return Ok(Vec::new());
    };
    let Some(subject_id) = slot.subject_id.as_deref() else {
        return Ok(Vec::new());
    };

    let Some(status) = attendance::classify(conn, slot.period, now)?.status() else {
        tracing::warn!(period = slot.period, "cannot classify current period; reconciliation skipped");
        return Ok(Vec::new());
    };

    let recorded = ledger::recorded_students(conn, subject_id, slot.period, now.date(), &present)?;

    let tx = conn.unchecked_transaction()?;
    let mut created = Vec::new();
    for student_id in present.iter().filter(|s| !recorded.contains(*s)) {
        match ledger::insert_record(&tx, student_id, subject_id, slot.period, now, status)? {
            InsertOutcome::Inserted(r) => created.push(r),
            InsertOutcome::Duplicate => {
                tracing::debug!(student_id = %student_id, "already recorded by a concurrent writer");
            }
        }
    }
    tx.commit()?;

    if !created.is_empty() {
        tracing::info!(
            count = created.len(),
            subject_id,
            period = slot.period,
            "reconciliation recorded attendance"
        );
    }
    for r in &created {
        sink.submit(AlertJob::RateCheck {
            student_id: r.student_id.clone(),
            subject_id: r.subject_id.clone(),
            as_of: now.date(),
        });
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::model::{parse_timestamp, AttendanceStatus, CalendarDayPlan, Period, Subject, Weekday};
    use crate::notify::NullSink;
    use crate::reference;
    use crate::timetable;

    fn ts(s: &str) -> NaiveDateTime {
        parse_timestamp(s).unwrap()
    }

    fn seed(weekday_code: i64) -> Connection {
        let conn = db::open_in_memory().unwrap();
        for (id, name) in [("s1", "Aoki"), ("s2", "Baba"), ("s3", "Chiba")] {
            reference::create_student(&conn, Some(id), name, None).unwrap();
        }
        reference::upsert_subject(
            &conn,
            &Subject {
                id: "math".into(),
                name: "Math".into(),
                teacher: None,
                room_id: None,
            },
        )
        .unwrap();
        for (n, s, e) in [(1, "08:50", "10:30"), (2, "10:40", "12:20")] {
            reference::upsert_period(
                &conn,
                &Period {
                    period: n,
                    start_time: s.into(),
                    end_time: e.into(),
                    note: None,
                },
            )
            .unwrap();
        }
        reference::upsert_calendar_day(
            &conn,
            &CalendarDayPlan {
                date: ts("2025-04-07 00:00").date(),
                term: 1,
                weekday_code,
                note: None,
            },
        )
        .unwrap();
        timetable::set_slot(&conn, 1, Weekday::Mon, 1, Some("math"), None).unwrap();
        conn
    }

    #[test]
    fn second_run_creates_nothing() {
        let conn = seed(1);
        presence::check_in(&conn, "s1", None, ts("2025-04-07 08:40")).unwrap();
        presence::check_in(&conn, "s2", None, ts("2025-04-07 08:55")).unwrap();
        presence::temporary_exit(&conn, "s2", ts("2025-04-07 09:00")).unwrap();

        let first = reconcile(&conn, ts("2025-04-07 09:02"), &NullSink).unwrap();
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|r| r.status == AttendanceStatus::Late));

        let second = reconcile(&conn, ts("2025-04-07 09:03"), &NullSink).unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn only_unrecorded_present_students_are_added() {
        let conn = seed(1);
        presence::check_in(&conn, "s1", None, ts("2025-04-07 08:40")).unwrap();
        presence::check_in(&conn, "s2", None, ts("2025-04-07 08:40")).unwrap();
        ledger::insert_record(&conn, "s1", "math", 1, ts("2025-04-07 08:45"), AttendanceStatus::OnTime)
            .unwrap();

        let created = reconcile(&conn, ts("2025-04-07 08:48"), &NullSink).unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].student_id, "s2");
        assert_eq!(created[0].status, AttendanceStatus::OnTime);
    }

    #[test]
    fn nothing_happens_without_presence_or_class() {
        let conn = seed(1);
        assert!(reconcile(&conn, ts("2025-04-07 09:00"), &NullSink).unwrap().is_empty());

        presence::check_in(&conn, "s3", None, ts("2025-04-07 08:40")).unwrap();
        // Outside every period window.
        assert!(reconcile(&conn, ts("2025-04-07 07:00"), &NullSink).unwrap().is_empty());
        // Period 2 is the labelled last period with no subject.
        assert!(reconcile(&conn, ts("2025-04-07 11:00"), &NullSink).unwrap().is_empty());
    }

    #[test]
    fn early_second_period_is_not_credited_to_the_first() {
        let conn = seed(1);
        reference::upsert_period(
            &conn,
            &Period {
                period: 3,
                start_time: "13:10".into(),
                end_time: "13:50".into(),
                note: None,
            },
        )
        .unwrap();
        reference::upsert_subject(
            &conn,
            &Subject {
                id: "eng".into(),
                name: "English".into(),
                teacher: None,
                room_id: None,
            },
        )
        .unwrap();
        timetable::set_slot(&conn, 1, Weekday::Mon, 2, Some("eng"), None).unwrap();

        presence::check_in(&conn, "s1", None, ts("2025-04-07 10:44")).unwrap();
        let created = reconcile(&conn, ts("2025-04-07 10:45"), &NullSink).unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].subject_id, "eng");
        assert_eq!(created[0].period, 2);
        assert_eq!(created[0].status, AttendanceStatus::Late);
    }

    #[test]
    fn non_instructional_day_records_nothing() {
        let conn = seed(0);
        timetable::upsert_override(
            &conn,
            ts("2025-04-07 00:00").date(),
            1,
            Some("math"),
            None,
            None,
        )
        .unwrap();
        presence::check_in(&conn, "s1", None, ts("2025-04-07 08:40")).unwrap();
        assert!(reconcile(&conn, ts("2025-04-07 09:00"), &NullSink).unwrap().is_empty());
    }
}
