use reviewportald::ipc::{handle_request, AppState, Request};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_workspace(prefix: &str) -> PathBuf {
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

fn request(state: &mut AppState, method: &str, params: Value) -> Value {
    handle_request(
        state,
        Request {
            id: "t".to_string(),
            method: method.to_string(),
            params,
        },
    )
}

fn request_ok(state: &mut AppState, method: &str, params: Value) -> Value {
    let resp = request(state, method, params);
    assert_eq!(resp["ok"], true, "{} failed: {}", method, resp);
    resp["result"].clone()
}

fn open_state(prefix: &str) -> AppState {
    let mut state = AppState::new();
    let ws = temp_workspace(prefix);
    let resp = request(
        &mut state,
        "workspace.select",
        json!({ "path": ws.to_string_lossy() }),
    );
    assert_eq!(resp["ok"], true, "{}", resp);
    state
}

fn sid(v: &Value, key: &str) -> String {
    v[key].as_str().expect(key).to_string()
}

struct Campus {
    scope: String,
    f1: String,
    f2: String,
    v1: String,
    v2: String,
    s1: String,
    s2: String,
    s3: String,
}

fn mk_campus(state: &mut AppState) -> Campus {
    let scope = sid(
        &request_ok(state, "scopes.create", json!({ "name": "Batch" })),
        "scopeId",
    );
    let mk_user = |state: &mut AppState, name: &str, role: &str, roll: Option<&str>| {
        let mut p = json!({ "name": name, "role": role });
        if role == "student" {
            p["scopeId"] = json!(scope);
        }
        if let Some(roll) = roll {
            p["rollNo"] = json!(roll);
        }
        sid(&request_ok(state, "users.create", p), "userId")
    };
    let f1 = mk_user(state, "Prof A", "faculty", None);
    let f2 = mk_user(state, "Prof B", "faculty", None);
    let s1 = mk_user(state, "Asha", "student", Some("R1"));
    let s2 = mk_user(state, "Binu", "student", Some("R2"));
    let s3 = mk_user(state, "Chitra", "student", Some("R3"));
    let v1 = sid(
        &request_ok(state, "venues.create", json!({ "name": "Lab 1" })),
        "venueId",
    );
    let v2 = sid(
        &request_ok(state, "venues.create", json!({ "name": "Lab 2" })),
        "venueId",
    );
    Campus {
        scope,
        f1,
        f2,
        v1,
        v2,
        s1,
        s2,
        s3,
    }
}

fn mk_session(state: &mut AppState, c: &Campus, venue: &str, faculty: &str, date: &str, students: &[&str]) -> String {
    sid(
        &request_ok(
            state,
            "sessions.create",
            json!({
                "venueId": venue, "facultyId": faculty, "scopeId": c.scope,
                "date": date, "studentIds": students
            }),
        ),
        "sessionId",
    )
}

fn list_for_date(state: &mut AppState, date: &str) -> Vec<Value> {
    request_ok(state, "sessions.listForDate", json!({ "date": date }))["sessions"]
        .as_array()
        .expect("sessions")
        .clone()
}

#[test]
fn create_books_the_full_working_day() {
    let mut state = open_state("portal-sess-create");
    let c = mk_campus(&mut state);
    let result = request_ok(
        &mut state,
        "sessions.create",
        json!({
            "venueId": c.v1, "facultyId": c.f1, "scopeId": c.scope,
            "date": "2025-06-02", "studentIds": [c.s1, c.s2]
        }),
    );
    assert_eq!(result["startTime"], "2025-06-02T08:45:00");
    assert_eq!(result["endTime"], "2025-06-02T16:20:00");

    let sessions = list_for_date(&mut state, "2025-06-02");
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["studentCount"], 2);
    assert_eq!(sessions[0]["venueName"], "Lab 1");
    assert_eq!(sessions[0]["facultyName"], "Prof A");
}

#[test]
fn create_rejects_non_faculty_and_unknown_venue() {
    let mut state = open_state("portal-sess-reject");
    let c = mk_campus(&mut state);

    let resp = request(
        &mut state,
        "sessions.create",
        json!({
            "venueId": c.v1, "facultyId": c.s1, "scopeId": c.scope,
            "date": "2025-06-02", "studentIds": [c.s2]
        }),
    );
    assert_eq!(resp["ok"], false);
    assert_eq!(resp["error"]["code"], "bad_params");

    let resp = request(
        &mut state,
        "sessions.create",
        json!({
            "venueId": "nope", "facultyId": c.f1, "scopeId": c.scope,
            "date": "2025-06-02", "studentIds": [c.s1]
        }),
    );
    assert_eq!(resp["error"]["code"], "not_found");
    assert_eq!(list_for_date(&mut state, "2025-06-02").len(), 0);
}

#[test]
fn copy_day_replicates_and_reruns_are_idempotent() {
    let mut state = open_state("portal-sess-copy");
    let c = mk_campus(&mut state);
    mk_session(&mut state, &c, &c.v1, &c.f1, "2025-06-02", &[&c.s1]);
    mk_session(&mut state, &c, &c.v2, &c.f2, "2025-06-02", &[&c.s2, &c.s3]);

    let result = request_ok(
        &mut state,
        "sessions.copyDay",
        json!({ "fromDate": "2025-06-02", "toDate": "2025-06-06" }),
    );
    assert_eq!(result["sessionsCopied"], 2);

    let copied = list_for_date(&mut state, "2025-06-06");
    assert_eq!(copied.len(), 2);
    for s in &copied {
        assert_eq!(s["startTime"], "2025-06-06T08:45:00");
        assert_eq!(s["endTime"], "2025-06-06T16:20:00");
    }
    let counts: Vec<i64> = copied
        .iter()
        .map(|s| s["studentCount"].as_i64().expect("count"))
        .collect();
    assert!(counts.contains(&1) && counts.contains(&2));

    // Re-running finds each booking already present and copies nothing.
    let result = request_ok(
        &mut state,
        "sessions.copyDay",
        json!({ "fromDate": "2025-06-02", "toDate": "2025-06-06" }),
    );
    assert_eq!(result["sessionsCopied"], 0);
    assert_eq!(list_for_date(&mut state, "2025-06-06").len(), 2);

    let resp = request(
        &mut state,
        "sessions.copyDay",
        json!({ "fromDate": "2025-06-02", "toDate": "2025-06-02" }),
    );
    assert_eq!(resp["error"]["code"], "bad_params");
}

#[test]
fn swap_venues_touches_only_the_given_date() {
    let mut state = open_state("portal-sess-swap");
    let c = mk_campus(&mut state);
    let a = mk_session(&mut state, &c, &c.v1, &c.f1, "2025-06-02", &[&c.s1]);
    let b = mk_session(&mut state, &c, &c.v2, &c.f2, "2025-06-02", &[&c.s2]);
    let other_day = mk_session(&mut state, &c, &c.v1, &c.f1, "2025-06-03", &[&c.s1]);

    request_ok(
        &mut state,
        "sessions.swapVenues",
        json!({ "venueAId": c.v1, "venueBId": c.v2, "date": "2025-06-02" }),
    );

    let day = list_for_date(&mut state, "2025-06-02");
    let venue_of = |id: &str| -> String {
        day.iter()
            .find(|s| s["id"] == id)
            .map(|s| sid(s, "venueId"))
            .expect("session")
    };
    assert_eq!(venue_of(&a), c.v2);
    assert_eq!(venue_of(&b), c.v1);

    let next_day = list_for_date(&mut state, "2025-06-03");
    assert_eq!(next_day[0]["id"], other_day);
    assert_eq!(next_day[0]["venueId"], c.v1);

    // Swapping a venue with itself is a no-op.
    request_ok(
        &mut state,
        "sessions.swapVenues",
        json!({ "venueAId": c.v1, "venueBId": c.v1, "date": "2025-06-02" }),
    );
    let day = list_for_date(&mut state, "2025-06-02");
    let a_row = day.iter().find(|s| s["id"] == a).expect("session");
    assert_eq!(a_row["venueId"], c.v2);
}

#[test]
fn unscheduled_students_are_the_scope_complement() {
    let mut state = open_state("portal-sess-unsched");
    let c = mk_campus(&mut state);
    mk_session(&mut state, &c, &c.v1, &c.f1, "2025-06-02", &[&c.s1, &c.s2]);

    let result = request_ok(
        &mut state,
        "sessions.unscheduledStudents",
        json!({ "date": "2025-06-02", "scopeId": c.scope }),
    );
    let students = result["students"].as_array().expect("students");
    assert_eq!(students.len(), 1);
    assert_eq!(students[0]["id"], c.s3);
    assert_eq!(students[0]["rollNo"], "R3");

    // A date with no sessions leaves the whole scope unscheduled.
    let result = request_ok(
        &mut state,
        "sessions.unscheduledStudents",
        json!({ "date": "2025-06-09", "scopeId": c.scope }),
    );
    assert_eq!(result["students"].as_array().map(Vec::len), Some(3));
}

#[test]
fn scheduled_students_dedupe_on_earliest_session() {
    let mut state = open_state("portal-sess-sched");
    let c = mk_campus(&mut state);
    // s1 double-booked across both venues on the same day.
    mk_session(&mut state, &c, &c.v1, &c.f1, "2025-06-02", &[&c.s1, &c.s2]);
    mk_session(&mut state, &c, &c.v2, &c.f2, "2025-06-02", &[&c.s1, &c.s3]);

    let result = request_ok(
        &mut state,
        "sessions.scheduledStudents",
        json!({ "date": "2025-06-02" }),
    );
    let students = result["students"].as_array().expect("students");
    assert_eq!(students.len(), 3);
    let s1_rows: Vec<&Value> = students.iter().filter(|s| s["id"] == c.s1).collect();
    assert_eq!(s1_rows.len(), 1);
    assert_eq!(s1_rows[0]["venueName"], "Lab 1");
    assert_eq!(s1_rows[0]["facultyName"], "Prof A");
    assert_eq!(s1_rows[0]["startTime"], "2025-06-02T08:45:00");
}

#[test]
fn edit_replaces_faculty_and_roster_delete_removes_booking() {
    let mut state = open_state("portal-sess-edit");
    let c = mk_campus(&mut state);
    let session = mk_session(&mut state, &c, &c.v1, &c.f1, "2025-06-02", &[&c.s1, &c.s2]);

    request_ok(
        &mut state,
        "sessions.edit",
        json!({ "sessionId": session, "facultyId": c.f2, "studentIds": [c.s3] }),
    );
    let day = list_for_date(&mut state, "2025-06-02");
    assert_eq!(day[0]["facultyId"], c.f2);
    assert_eq!(day[0]["studentCount"], 1);

    let resp = request(&mut state, "sessions.edit", json!({ "sessionId": session }));
    assert_eq!(resp["error"]["code"], "bad_params");

    request_ok(&mut state, "sessions.delete", json!({ "sessionId": session }));
    assert_eq!(list_for_date(&mut state, "2025-06-02").len(), 0);
    let resp = request(&mut state, "sessions.delete", json!({ "sessionId": session }));
    assert_eq!(resp["error"]["code"], "not_found");
}
