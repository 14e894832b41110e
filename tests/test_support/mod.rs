#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
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

pub struct Sidecar {
    pub child: Child,
    pub stdin: ChildStdin,
    pub reader: BufReader<ChildStdout>,
    next_id: u64,
}

pub fn spawn_sidecar() -> Sidecar {
    spawn_sidecar_with_env(&[])
}

pub fn spawn_sidecar_with_env(env: &[(&str, &str)]) -> Sidecar {
    let exe = env!("CARGO_BIN_EXE_rollcalld");
    let mut cmd = Command::new(exe);
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .env_remove("ROLLCALL_ADMIN_EMAIL");
    for (k, v) in env {
        cmd.env(k, v);
    }
    let mut child = cmd.spawn().expect("spawn rollcalld");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    Sidecar {
        child,
        stdin,
        reader: BufReader::new(stdout),
        next_id: 0,
    }
}

impl Sidecar {
    pub fn request(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let payload = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        writeln!(self.stdin, "{}", payload).expect("write request");
        self.stdin.flush().expect("flush request");

        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read response line");
        assert!(!line.trim().is_empty(), "empty response for {}", method);
        let value: serde_json::Value =
            serde_json::from_str(line.trim()).expect("parse response json");
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    pub fn request_ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let value = self.request(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(true),
            "{} failed: {}",
            method,
            value
        );
        value.get("result").cloned().unwrap_or(serde_json::Value::Null)
    }

    /// Sends a request expected to fail and returns its error code.
    pub fn request_err(&mut self, method: &str, params: serde_json::Value) -> String {
        let value = self.request(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string()
    }

    pub fn select_workspace(&mut self, workspace: &std::path::Path) {
        self.request_ok(
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );
    }

    /// Closes stdin and waits for the process, so queued alerts are flushed.
    pub fn shutdown(self) {
        let Sidecar {
            mut child, stdin, ..
        } = self;
        drop(stdin);
        let _ = child.wait();
    }
}

/// A week of term 1 starting Monday 2025-04-07.
///
/// Periods 1-3 teach, period 4 is the labelled last period. Math meets Monday
/// period 1 in Lab 1 and PE meets Monday period 2 and Tuesday period 1 in the gym.
/// Saturday 2025-04-12 is planned as non-instructional.
pub fn seed_school(sc: &mut Sidecar) {
    sc.request_ok("rooms.upsert", json!({ "id": "lab", "name": "Lab 1" }));
    sc.request_ok("rooms.upsert", json!({ "id": "gym", "name": "Gym" }));
    sc.request_ok(
        "subjects.upsert",
        json!({ "id": "math", "name": "Math", "teacher": "T-Math", "roomId": "lab" }),
    );
    sc.request_ok(
        "subjects.upsert",
        json!({ "id": "pe", "name": "PE", "teacher": "T-PE", "roomId": "gym" }),
    );
    for (n, start, end) in [
        (1, "08:50", "10:30"),
        (2, "10:40", "12:20"),
        (3, "13:10", "14:50"),
        (4, "15:00", "15:30"),
    ] {
        sc.request_ok(
            "periods.upsert",
            json!({ "period": n, "startTime": start, "endTime": end }),
        );
    }
    sc.request_ok(
        "calendar.upsertDays",
        json!({
            "days": [
                { "date": "2025-04-07", "term": 1, "weekdayCode": 1 },
                { "date": "2025-04-08", "term": 1, "weekdayCode": 2 },
                { "date": "2025-04-09", "term": 1, "weekdayCode": 3 },
                { "date": "2025-04-10", "term": 1, "weekdayCode": 4 },
                { "date": "2025-04-11", "term": 1, "weekdayCode": 5 },
                { "date": "2025-04-12", "term": 1, "weekdayCode": 0, "note": "Sports day (no classes)" }
            ]
        }),
    );
    sc.request_ok(
        "timetable.set",
        json!({ "term": 1, "weekday": "Mon", "period": 1, "subjectId": "math" }),
    );
    sc.request_ok(
        "timetable.set",
        json!({ "term": 1, "weekday": "Mon", "period": 2, "subjectId": "pe" }),
    );
    sc.request_ok(
        "timetable.set",
        json!({ "term": 1, "weekday": "Tue", "period": 1, "subjectId": "pe" }),
    );
    sc.request_ok(
        "timetable.set",
        json!({ "term": 1, "weekday": "Mon", "period": 4, "note": "Homeroom" }),
    );
    sc.request_ok("students.create", json!({ "id": "s1", "name": "Aoki" }));
    sc.request_ok("students.create", json!({ "id": "s2", "name": "Baba" }));
}

/// Polls until `path` exists and holds at least `lines` lines.
pub fn wait_for_lines(path: &std::path::Path, lines: usize) -> Vec<serde_json::Value> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(text) = std::fs::read_to_string(path) {
            let parsed: Vec<serde_json::Value> = text
                .lines()
                .filter_map(|l| serde_json::from_str(l).ok())
                .collect();
            if parsed.len() >= lines || Instant::now() > deadline {
                return parsed;
            }
        } else if Instant::now() > deadline {
            return Vec::new();
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}
