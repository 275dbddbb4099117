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

fn mk_scope(state: &mut AppState) -> String {
    sid(
        &request_ok(state, "scopes.create", json!({ "name": "2025 Batch" })),
        "scopeId",
    )
}

fn mk_faculty(state: &mut AppState, name: &str) -> String {
    sid(
        &request_ok(state, "users.create", json!({ "name": name, "role": "faculty" })),
        "userId",
    )
}

fn mk_team_with_project(state: &mut AppState, scope: &str, name: &str) -> (String, String) {
    let team = sid(
        &request_ok(state, "teams.create", json!({ "scopeId": scope, "name": name })),
        "teamId",
    );
    let project = sid(
        &request_ok(
            state,
            "projects.create",
            json!({ "teamId": team, "title": format!("{} project", name) }),
        ),
        "projectId",
    );
    (team, project)
}

fn assignment_count(state: &mut AppState, filter: Value) -> usize {
    request_ok(state, "assignments.list", filter)["assignments"]
        .as_array()
        .expect("assignments")
        .len()
}

#[test]
fn round_robin_distribution_is_near_equal_and_disjoint() {
    let mut state = open_state("portal-rr");
    let scope = mk_scope(&mut state);
    let f1 = mk_faculty(&mut state, "Prof A");
    let f2 = mk_faculty(&mut state, "Prof B");

    let mut projects = Vec::new();
    for i in 0..5 {
        let (_, p) = mk_team_with_project(&mut state, &scope, &format!("Team {}", i));
        projects.push(p);
    }

    let result = request_ok(
        &mut state,
        "assignments.allocate",
        json!({
            "projectIds": projects,
            "facultyIds": [f1, f2],
            "phase": 1,
            "mode": "ONLINE",
            "distributeEvenly": true
        }),
    );
    assert_eq!(result["created"], 5);
    assert_eq!(result["updated"], 0);
    assert_eq!(result["skipped"].as_array().map(Vec::len), Some(0));

    // First faculty in input order takes the remainder: 3 vs 2.
    assert_eq!(assignment_count(&mut state, json!({ "facultyId": f1 })), 3);
    assert_eq!(assignment_count(&mut state, json!({ "facultyId": f2 })), 2);

    // Every project assigned exactly once.
    let all = request_ok(&mut state, "assignments.list", json!({}));
    let mut seen: Vec<String> = all["assignments"]
        .as_array()
        .expect("assignments")
        .iter()
        .map(|a| a["projectId"].as_str().expect("projectId").to_string())
        .collect();
    seen.sort();
    assert_eq!(seen.len(), 5);
    seen.dedup();
    assert_eq!(seen.len(), 5, "a project was assigned twice");
}

#[test]
fn without_distribution_every_pair_is_created() {
    let mut state = open_state("portal-pairs");
    let scope = mk_scope(&mut state);
    let f1 = mk_faculty(&mut state, "Prof A");
    let f2 = mk_faculty(&mut state, "Prof B");
    let (_, p1) = mk_team_with_project(&mut state, &scope, "Alpha");
    let (_, p2) = mk_team_with_project(&mut state, &scope, "Beta");

    let result = request_ok(
        &mut state,
        "assignments.allocate",
        json!({
            "projectIds": [p1, p2],
            "facultyIds": [f1, f2],
            "phase": 1,
            "mode": "OFFLINE"
        }),
    );
    assert_eq!(result["created"], 4);
    assert_eq!(assignment_count(&mut state, json!({})), 4);
}

#[test]
fn reallocating_same_triple_updates_instead_of_duplicating() {
    let mut state = open_state("portal-idem");
    let scope = mk_scope(&mut state);
    let f1 = mk_faculty(&mut state, "Prof A");
    let (_, p1) = mk_team_with_project(&mut state, &scope, "Alpha");

    let first = request_ok(
        &mut state,
        "assignments.allocate",
        json!({
            "projectIds": [p1],
            "facultyIds": [f1],
            "phase": 2,
            "mode": "ONLINE",
            "accessStartsAt": "2025-06-02T09:00:00",
            "durationHours": 2
        }),
    );
    assert_eq!(first["created"], 1);

    let second = request_ok(
        &mut state,
        "assignments.allocate",
        json!({
            "projectIds": [p1],
            "facultyIds": [f1],
            "phase": 2,
            "mode": "OFFLINE",
            "accessStartsAt": "2025-06-02T09:00:00",
            "durationHours": 4
        }),
    );
    assert_eq!(second["created"], 0);
    assert_eq!(second["updated"], 1);

    let all = request_ok(&mut state, "assignments.list", json!({ "projectId": p1 }));
    let rows = all["assignments"].as_array().expect("assignments");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["mode"], "OFFLINE");
    assert_eq!(rows[0]["accessExpiresAt"], "2025-06-02T13:00:00");
}

#[test]
fn zero_duration_means_permanent_access() {
    let mut state = open_state("portal-perm");
    let scope = mk_scope(&mut state);
    let f1 = mk_faculty(&mut state, "Prof A");
    let (_, p1) = mk_team_with_project(&mut state, &scope, "Alpha");

    request_ok(
        &mut state,
        "assignments.allocate",
        json!({
            "projectIds": [p1],
            "facultyIds": [f1],
            "phase": 1,
            "mode": "ONLINE",
            "durationHours": 0
        }),
    );
    let all = request_ok(&mut state, "assignments.list", json!({ "projectId": p1 }));
    assert!(all["assignments"][0]["accessExpiresAt"].is_null());
}

#[test]
fn validation_rejects_before_any_write() {
    let mut state = open_state("portal-valid");
    let scope = mk_scope(&mut state);
    let f1 = mk_faculty(&mut state, "Prof A");
    let (_, p1) = mk_team_with_project(&mut state, &scope, "Alpha");

    // No targets at all.
    let resp = request(
        &mut state,
        "assignments.allocate",
        json!({ "facultyIds": [f1], "phase": 1, "mode": "ONLINE" }),
    );
    assert_eq!(resp["ok"], false);
    assert_eq!(resp["error"]["code"], "bad_params");

    // Neither explicit faculty nor venue inference.
    let resp = request(
        &mut state,
        "assignments.allocate",
        json!({ "projectIds": [p1], "phase": 1, "mode": "ONLINE" }),
    );
    assert_eq!(resp["error"]["code"], "bad_params");

    // Both at once.
    let resp = request(
        &mut state,
        "assignments.allocate",
        json!({
            "projectIds": [p1],
            "facultyIds": [f1],
            "inferFromVenue": true,
            "phase": 1,
            "mode": "ONLINE"
        }),
    );
    assert_eq!(resp["error"]["code"], "bad_params");

    // Unknown explicit project id is a hard error.
    let resp = request(
        &mut state,
        "assignments.allocate",
        json!({
            "projectIds": ["nope"],
            "facultyIds": [f1],
            "phase": 1,
            "mode": "ONLINE"
        }),
    );
    assert_eq!(resp["error"]["code"], "not_found");

    assert_eq!(assignment_count(&mut state, json!({})), 0);
}

#[test]
fn roll_number_targets_skip_unresolvable_entries() {
    let mut state = open_state("portal-rolls");
    let scope = mk_scope(&mut state);
    let f1 = mk_faculty(&mut state, "Prof A");

    // R1 resolves to a team with a project.
    let s1 = sid(
        &request_ok(
            &mut state,
            "users.create",
            json!({ "name": "Asha", "role": "student", "rollNo": "R1", "scopeId": scope }),
        ),
        "userId",
    );
    let (t1, p1) = mk_team_with_project(&mut state, &scope, "Alpha");
    request_ok(
        &mut state,
        "teams.addMember",
        json!({ "teamId": t1, "userId": s1, "isLeader": true }),
    );

    // R2's team has no project.
    let s2 = sid(
        &request_ok(
            &mut state,
            "users.create",
            json!({ "name": "Binu", "role": "student", "rollNo": "R2", "scopeId": scope }),
        ),
        "userId",
    );
    let t2 = sid(
        &request_ok(
            &mut state,
            "teams.create",
            json!({ "scopeId": scope, "name": "Beta" }),
        ),
        "teamId",
    );
    request_ok(
        &mut state,
        "teams.addMember",
        json!({ "teamId": t2, "userId": s2 }),
    );

    let result = request_ok(
        &mut state,
        "assignments.allocate",
        json!({
            "rollNumbers": ["R1", "R2", "R404"],
            "facultyIds": [f1],
            "phase": 1,
            "mode": "OFFLINE"
        }),
    );
    assert_eq!(result["created"], 1);
    let skipped = result["skipped"].as_array().expect("skipped");
    assert_eq!(skipped.len(), 2);
    let reasons: Vec<&str> = skipped
        .iter()
        .map(|s| s["reason"].as_str().expect("reason"))
        .collect();
    assert!(reasons.contains(&"team has no project"));
    assert!(reasons.contains(&"unknown roll number"));

    assert_eq!(assignment_count(&mut state, json!({ "projectId": p1 })), 1);
}
