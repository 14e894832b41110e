use crate::error::{EngineError, EngineResult};
use crate::model::{format_date, OverrideSlot, TimetableSlot, Weekday};
use crate::reference;
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};

pub fn get_slot(
    conn: &Connection,
    term: i64,
    weekday: Weekday,
    period: i64,
) -> EngineResult<Option<TimetableSlot>> {
    Ok(conn
        .query_row(
            "SELECT term, weekday, period, subject_id, note
             FROM timetable_slots
             WHERE term = ? AND weekday = ? AND period = ?",
            (term, weekday.name(), period),
            slot_from_row,
        )
        .optional()?)
}

pub fn list_slots(conn: &Connection, term: i64) -> EngineResult<Vec<TimetableSlot>> {
    let mut stmt = conn.prepare(
        "SELECT term, weekday, period, subject_id, note
         FROM timetable_slots
         WHERE term = ?
         ORDER BY CASE weekday
                    WHEN 'Mon' THEN 1 WHEN 'Tue' THEN 2 WHEN 'Wed' THEN 3
                    WHEN 'Thu' THEN 4 WHEN 'Fri' THEN 5 ELSE 9 END,
                  period",
    )?;
    let rows = stmt
        .query_map([term], slot_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn slot_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<TimetableSlot> {
    Ok(TimetableSlot {
        term: r.get(0)?,
        weekday: r.get(1)?,
        period: r.get(2)?,
        subject_id: r.get(3)?,
        note: r.get(4)?,
    })
}

/// Assigns one master slot.
///
/// The last period only ever carries a label, so its subject is dropped and the
/// note kept. Elsewhere an empty subject clears the slot and a subject clears any
/// label.
pub fn set_slot(
    conn: &Connection,
    term: i64,
    weekday: Weekday,
    period: i64,
    subject_id: Option<&str>,
    note: Option<&str>,
) -> EngineResult<()> {
    let subject_id = subject_id.map(str::trim).filter(|s| !s.is_empty());
    let note = note.map(str::trim).filter(|s| !s.is_empty());
    let last = reference::last_period(conn)?;
    let existing = get_slot(conn, term, weekday, period)?;

    if last == Some(period) {
        if existing.is_none() && note.is_none() {
            return Ok(());
        }
        upsert_slot(conn, term, weekday, period, None, note)?;
        return Ok(());
    }

    match subject_id {
        None => {
            conn.execute(
                "DELETE FROM timetable_slots WHERE term = ? AND weekday = ? AND period = ?",
                (term, weekday.name(), period),
            )?;
        }
        Some(sid) => {
            reference::require_subject(conn, sid)?;
            upsert_slot(conn, term, weekday, period, Some(sid), None)?;
        }
    }
    Ok(())
}

fn upsert_slot(
    conn: &Connection,
    term: i64,
    weekday: Weekday,
    period: i64,
    subject_id: Option<&str>,
    note: Option<&str>,
) -> EngineResult<()> {
    conn.execute(
        "INSERT INTO timetable_slots(term, weekday, period, subject_id, note)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(term, weekday, period) DO UPDATE SET
           subject_id = excluded.subject_id,
           note = excluded.note",
        (term, weekday.name(), period, subject_id, note),
    )?;
    Ok(())
}

/// Replaces the restore point with the current master timetable. Returns the row count saved.
pub fn save_default(conn: &Connection) -> EngineResult<usize> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM timetable_defaults", [])?;
    let n = tx.execute(
        "INSERT INTO timetable_defaults(term, weekday, period, subject_id, note)
         SELECT term, weekday, period, subject_id, note FROM timetable_slots",
        [],
    )?;
    tx.commit()?;
    Ok(n)
}

/// Restores the master timetable from the restore point.
///
/// Returns `Ok(None)` and leaves the current timetable alone when no restore point exists.
pub fn restore_default(conn: &Connection) -> EngineResult<Option<usize>> {
    let saved: i64 = conn.query_row("SELECT COUNT(*) FROM timetable_defaults", [], |r| r.get(0))?;
    if saved == 0 {
        return Ok(None);
    }
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM timetable_slots", [])?;
    let n = tx.execute(
        "INSERT INTO timetable_slots(term, weekday, period, subject_id, note)
         SELECT term, weekday, period, subject_id, note FROM timetable_defaults",
        [],
    )?;
    tx.commit()?;
    Ok(Some(n))
}

pub fn get_override(
    conn: &Connection,
    date: NaiveDate,
    period: i64,
) -> EngineResult<Option<OverrideSlot>> {
    Ok(conn
        .query_row(
            "SELECT period, subject_id, room_id, note
             FROM override_slots
             WHERE date = ? AND period = ?",
            (format_date(date), period),
            |r| {
                Ok(OverrideSlot {
                    date,
                    period: r.get(0)?,
                    subject_id: r.get(1)?,
                    room_id: r.get(2)?,
                    note: r.get(3)?,
                })
            },
        )
        .optional()?)
}

/// Writes a daily override. At the last period the override is label-only;
/// a subject without a room takes the subject's default room.
pub fn upsert_override(
    conn: &Connection,
    date: NaiveDate,
    period: i64,
    subject_id: Option<&str>,
    room_id: Option<&str>,
    note: Option<&str>,
) -> EngineResult<OverrideSlot> {
    if period <= 0 {
        return Err(EngineError::Invalid("period must be positive".into()));
    }
    let mut subject_id = subject_id
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string());
    let mut room_id = room_id
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string());
    let note = note
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string());

    if reference::last_period(conn)? == Some(period) {
        subject_id = None;
        room_id = None;
    }
    if let Some(sid) = subject_id.as_deref() {
        let subject = reference::require_subject(conn, sid)?;
        if room_id.is_none() {
            room_id = subject.room_id;
        }
    }

    conn.execute(
        "INSERT INTO override_slots(date, period, subject_id, room_id, note)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(date, period) DO UPDATE SET
           subject_id = excluded.subject_id,
           room_id = excluded.room_id,
           note = excluded.note",
        (format_date(date), period, &subject_id, &room_id, &note),
    )?;
    Ok(OverrideSlot {
        date,
        period,
        subject_id,
        room_id,
        note,
    })
}

pub fn delete_override(conn: &Connection, date: NaiveDate, period: i64) -> EngineResult<bool> {
    let n = conn.execute(
        "DELETE FROM override_slots WHERE date = ? AND period = ?",
        (format_date(date), period),
    )?;
    Ok(n > 0)
}

/// Weekday names and per-day period counts a subject occupies in a term's master timetable.
pub fn subject_weekly_load(
    conn: &Connection,
    subject_id: &str,
    term: i64,
) -> EngineResult<Vec<(Weekday, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT weekday, COUNT(period)
         FROM timetable_slots
         WHERE subject_id = ? AND term = ?
         GROUP BY weekday",
    )?;
    let rows = stmt
        .query_map((subject_id, term), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let mut out = Vec::with_capacity(rows.len());
    for (name, count) in rows {
        match Weekday::parse(&name) {
            Some(w) => out.push((w, count)),
            None => tracing::warn!(weekday = %name, subject_id, term, "ignoring timetable slot with unknown weekday"),
        }
    }
    out.sort_by_key(|(w, _)| w.code());
    Ok(out)
}

/// Distinct subjects assigned anywhere in a term's master timetable.
pub fn term_subject_ids(conn: &Connection, term: i64) -> EngineResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT t.subject_id
         FROM timetable_slots t
         JOIN subjects s ON s.id = t.subject_id
         WHERE t.term = ?
         ORDER BY s.name, t.subject_id",
    )?;
    let rows = stmt
        .query_map([term], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::model::{Period, Subject};

    fn seed(conn: &Connection) {
        for (n, s, e) in [(1, "08:50", "10:30"), (2, "10:40", "12:20"), (3, "13:10", "14:50")] {
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
        reference::upsert_room(conn, "r1", "Lab 1").unwrap();
        reference::upsert_subject(
            conn,
            &Subject {
                id: "math".into(),
                name: "Math".into(),
                teacher: Some("Sato".into()),
                room_id: Some("r1".into()),
            },
        )
        .unwrap();
    }

    #[test]
    fn last_period_slots_keep_only_the_label() {
        let conn = db::open_in_memory().unwrap();
        seed(&conn);
        set_slot(&conn, 1, Weekday::Mon, 3, Some("math"), Some("Homeroom")).unwrap();
        let slot = get_slot(&conn, 1, Weekday::Mon, 3).unwrap().unwrap();
        assert_eq!(slot.subject_id, None);
        assert_eq!(slot.note.as_deref(), Some("Homeroom"));

        set_slot(&conn, 1, Weekday::Tue, 3, None, None).unwrap();
        assert!(get_slot(&conn, 1, Weekday::Tue, 3).unwrap().is_none());
    }

    #[test]
    fn empty_subject_clears_a_regular_slot() {
        let conn = db::open_in_memory().unwrap();
        seed(&conn);
        set_slot(&conn, 1, Weekday::Mon, 1, Some("math"), Some("ignored")).unwrap();
        let slot = get_slot(&conn, 1, Weekday::Mon, 1).unwrap().unwrap();
        assert_eq!(slot.subject_id.as_deref(), Some("math"));
        assert_eq!(slot.note, None);

        set_slot(&conn, 1, Weekday::Mon, 1, Some(""), None).unwrap();
        assert!(get_slot(&conn, 1, Weekday::Mon, 1).unwrap().is_none());
    }

    #[test]
    fn restore_without_snapshot_leaves_timetable_untouched() {
        let conn = db::open_in_memory().unwrap();
        seed(&conn);
        set_slot(&conn, 1, Weekday::Mon, 1, Some("math"), None).unwrap();
        assert_eq!(restore_default(&conn).unwrap(), None);
        assert_eq!(list_slots(&conn, 1).unwrap().len(), 1);

        assert_eq!(save_default(&conn).unwrap(), 1);
        set_slot(&conn, 1, Weekday::Tue, 2, Some("math"), None).unwrap();
        assert_eq!(restore_default(&conn).unwrap(), Some(1));
        let slots = list_slots(&conn, 1).unwrap();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].weekday, "Mon");
    }

    #[test]
    fn override_defaults_room_from_subject() {
        let conn = db::open_in_memory().unwrap();
        seed(&conn);
        let d = NaiveDate::from_ymd_opt(2025, 4, 7).unwrap();
        let o = upsert_override(&conn, d, 2, Some("math"), None, None).unwrap();
        assert_eq!(o.room_id.as_deref(), Some("r1"));
        assert_eq!(get_override(&conn, d, 2).unwrap(), Some(o));
        assert!(delete_override(&conn, d, 2).unwrap());
        assert!(!delete_override(&conn, d, 2).unwrap());
    }

    #[test]
    fn weekly_load_groups_periods_by_weekday() {
        let conn = db::open_in_memory().unwrap();
        seed(&conn);
        set_slot(&conn, 1, Weekday::Wed, 1, Some("math"), None).unwrap();
        set_slot(&conn, 1, Weekday::Mon, 1, Some("math"), None).unwrap();
        set_slot(&conn, 1, Weekday::Mon, 2, Some("math"), None).unwrap();
        set_slot(&conn, 2, Weekday::Fri, 1, Some("math"), None).unwrap();
        let load = subject_weekly_load(&conn, "math", 1).unwrap();
        assert_eq!(load, vec![(Weekday::Mon, 2), (Weekday::Wed, 1)]);
        assert_eq!(term_subject_ids(&conn, 2).unwrap(), vec!["math".to_string()]);
    }
}
