use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use std::path::{Path, PathBuf};

pub const DB_FILE: &str = "rollcall.sqlite3";

pub fn db_path(workspace: &Path) -> PathBuf {
    workspace.join(DB_FILE)
}

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace.to_string_lossy()
        )
    })?;
    let conn = Connection::open(db_path(workspace))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn open_in_memory() -> anyhow::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    init_schema(&conn)?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    // Concurrent writers (the alert worker) wait instead of failing outright.
    conn.busy_timeout(std::time::Duration::from_secs(5))?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            created_at TEXT
        )",
        [],
    )?;
    ensure_students_guardian_email(conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS rooms(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            teacher TEXT,
            room_id TEXT,
            FOREIGN KEY(room_id) REFERENCES rooms(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS periods(
            period INTEGER PRIMARY KEY,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            note TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS calendar_days(
            date TEXT PRIMARY KEY,
            term INTEGER NOT NULL,
            weekday_code INTEGER NOT NULL,
            note TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_calendar_days_term_code ON calendar_days(term, weekday_code)",
        [],
    )?;

    for table in ["timetable_slots", "timetable_defaults"] {
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {}(
                    term INTEGER NOT NULL,
                    weekday TEXT NOT NULL,
                    period INTEGER NOT NULL,
                    subject_id TEXT,
                    note TEXT,
                    PRIMARY KEY(term, weekday, period)
                )",
                table
            ),
            [],
        )?;
    }
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_timetable_slots_subject ON timetable_slots(subject_id, term)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS override_slots(
            date TEXT NOT NULL,
            period INTEGER NOT NULL,
            subject_id TEXT,
            room_id TEXT,
            note TEXT,
            PRIMARY KEY(date, period),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(room_id) REFERENCES rooms(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_records(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            period INTEGER NOT NULL,
            recorded_at TEXT NOT NULL,
            attended_on TEXT NOT NULL,
            status TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE,
            FOREIGN KEY(subject_id) REFERENCES subjects(id) ON DELETE CASCADE,
            UNIQUE(student_id, subject_id, period, attended_on)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_records_student ON attendance_records(student_id, subject_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_records_slot ON attendance_records(subject_id, period, attended_on)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS presence_sessions(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            room_id TEXT,
            entered_at TEXT NOT NULL,
            exited_at TEXT,
            note TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_presence_sessions_open
         ON presence_sessions(student_id) WHERE exited_at IS NULL",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_presence_sessions_student ON presence_sessions(student_id, entered_at)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS report_records(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            report_type TEXT NOT NULL,
            category TEXT,
            summary TEXT NOT NULL,
            reported_at TEXT NOT NULL,
            resolved INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_report_records_resolved ON report_records(resolved, reported_at)",
        [],
    )?;

    Ok(())
}

fn ensure_students_guardian_email(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "guardian_email")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE students ADD COLUMN guardian_email TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(
            serde_json::from_str(&s).with_context(|| format!("corrupt setting {}", key))?,
        )),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn schema_is_idempotent_and_settings_roundtrip() {
        let conn = open_in_memory().expect("open");
        init_schema(&conn).expect("second init");
        assert!(table_has_column(&conn, "students", "guardian_email").unwrap());

        assert_eq!(settings_get_json(&conn, "setup.presence").unwrap(), None);
        settings_set_json(&conn, "setup.presence", &json!({ "mode": "toggle" })).unwrap();
        settings_set_json(&conn, "setup.presence", &json!({ "mode": "fine" })).unwrap();
        assert_eq!(
            settings_get_json(&conn, "setup.presence").unwrap(),
            Some(json!({ "mode": "fine" }))
        );
    }

    #[test]
    fn open_session_index_rejects_second_open_row() {
        let conn = open_in_memory().expect("open");
        conn.execute("INSERT INTO students(id, name) VALUES('s1', 'Aoki')", [])
            .unwrap();
        conn.execute(
            "INSERT INTO presence_sessions(id, student_id, entered_at) VALUES('a', 's1', '2025-04-07 08:40:00')",
            [],
        )
        .unwrap();
        let second = conn.execute(
            "INSERT INTO presence_sessions(id, student_id, entered_at) VALUES('b', 's1', '2025-04-07 08:41:00')",
            [],
        );
        assert!(second.is_err());
    }
}
