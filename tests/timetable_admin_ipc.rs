mod test_support;

use serde_json::json;
use test_support::{seed_school, spawn_sidecar, temp_dir};

#[test]
fn default_timetable_save_and_restore() {
    let workspace = temp_dir("rollcall-timetable-default");
    let mut sc = spawn_sidecar();
    sc.select_workspace(&workspace);
    seed_school(&mut sc);

    assert_eq!(sc.request_err("timetable.restoreDefault", json!({})), "no_snapshot");
    // The refused restore leaves the timetable alone.
    let slots = sc.request_ok("timetable.list", json!({ "term": 1 }));
    assert_eq!(slots["slots"].as_array().map(|a| a.len()), Some(4));

    let saved = sc.request_ok("timetable.saveDefault", json!({}));
    assert_eq!(saved["saved"], 4);

    // Clearing a subject deletes the slot.
    sc.request_ok(
        "timetable.set",
        json!({ "term": 1, "weekday": "Mon", "period": 1, "subjectId": "" }),
    );
    let slots = sc.request_ok("timetable.list", json!({ "term": 1 }));
    assert_eq!(slots["slots"].as_array().map(|a| a.len()), Some(3));

    let restored = sc.request_ok("timetable.restoreDefault", json!({}));
    assert_eq!(restored["restored"], 4);
    let slot = sc.request_ok("schedule.slot", json!({ "date": "2025-04-07", "period": 1 }))["slot"].clone();
    assert_eq!(slot["displayName"], "Math");
    sc.shutdown();
}

#[test]
fn last_period_only_takes_labels() {
    let workspace = temp_dir("rollcall-timetable-last-period");
    let mut sc = spawn_sidecar();
    sc.select_workspace(&workspace);
    seed_school(&mut sc);

    let set = sc.request_ok(
        "timetable.set",
        json!({ "term": 1, "weekday": "Tue", "period": 4, "subjectId": "math", "note": "Clubs" }),
    );
    assert!(set["slot"]["subjectId"].is_null());
    assert_eq!(set["slot"]["note"], "Clubs");

    // No note and no existing slot stores nothing.
    let empty = sc.request_ok(
        "timetable.set",
        json!({ "term": 1, "weekday": "Wed", "period": 4 }),
    );
    assert!(empty["slot"].is_null());

    let ov = sc.request_ok(
        "overrides.upsert",
        json!({ "date": "2025-04-09", "period": 4, "subjectId": "pe", "roomId": "gym", "note": "Cleanup" }),
    );
    assert!(ov["override"]["subjectId"].is_null());
    assert!(ov["override"]["roomId"].is_null());
    sc.shutdown();
}

#[test]
fn reference_data_is_validated() {
    let workspace = temp_dir("rollcall-reference-validation");
    let mut sc = spawn_sidecar();
    sc.select_workspace(&workspace);
    seed_school(&mut sc);

    assert_eq!(
        sc.request_err(
            "periods.upsert",
            json!({ "period": 5, "startTime": "16:00", "endTime": "15:00" })
        ),
        "bad_params"
    );
    assert_eq!(
        sc.request_err(
            "timetable.set",
            json!({ "term": 1, "weekday": "Sun", "period": 1, "subjectId": "math" })
        ),
        "bad_params"
    );
    assert_eq!(
        sc.request_err(
            "timetable.set",
            json!({ "term": 1, "weekday": "Mon", "period": 1, "subjectId": "chemistry" })
        ),
        "not_found"
    );
    assert_eq!(
        sc.request_err(
            "subjects.upsert",
            json!({ "name": "Music", "roomId": "auditorium" })
        ),
        "not_found"
    );
    assert_eq!(
        sc.request_err(
            "calendar.upsertDays",
            json!({ "days": [{ "date": "2025-13-01", "term": 1, "weekdayCode": 1 }] })
        ),
        "bad_params"
    );

    let created = sc.request_ok("subjects.upsert", json!({ "name": "Music" }));
    assert!(created["subjectId"].as_str().map(|s| !s.is_empty()).unwrap_or(false));
    let periods = sc.request_ok("periods.list", json!({}));
    assert_eq!(periods["lastPeriod"], 4);
    let students = sc.request_ok("students.list", json!({}));
    assert_eq!(students["students"].as_array().map(|a| a.len()), Some(2));
    sc.shutdown();
}
