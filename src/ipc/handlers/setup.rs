//! Admin CRUD for the entities the scheduling core operates on. Thin by
//! design; the interesting logic lives in the allocator, the session
//! scheduler and the nightly job.

use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use crate::ipc::helpers::{
    dispatch, get_opt_bool, get_opt_f64, get_opt_str, get_opt_u64, get_required_str, now_local,
    parse_datetime_param, row_exists, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{ReviewStatus, TeamStatus};
use crate::timewindow::format_ts;

fn scopes_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }
    let phases = get_opt_u64(params, "numberOfPhases").unwrap_or(3);
    if phases == 0 {
        return Err(HandlerErr::bad_params("numberOfPhases must be at least 1"));
    }
    let timer_total_hours = get_opt_f64(params, "timerTotalHours");

    let scope_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO scopes(id, name, number_of_phases, timer_total_hours) VALUES(?, ?, ?, ?)",
        (&scope_id, &name, phases as i64, timer_total_hours),
    )
    .map_err(|e| HandlerErr::db_update(e, "scopes"))?;
    Ok(json!({ "scopeId": scope_id, "name": name }))
}

fn venues_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }
    let location = get_opt_str(params, "location");
    let capacity = get_opt_u64(params, "capacity").map(|v| v as i64);

    let venue_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO venues(id, name, location, capacity) VALUES(?, ?, ?, ?)",
        (&venue_id, &name, &location, &capacity),
    )
    .map_err(|e| HandlerErr::db_update(e, "venues"))?;
    Ok(json!({ "venueId": venue_id, "name": name }))
}

fn users_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }
    let role = get_required_str(params, "role")?;
    if role != "student" && role != "faculty" {
        return Err(HandlerErr::bad_params("role must be student or faculty"));
    }
    let roll_no = get_opt_str(params, "rollNo");
    let scope_id = get_opt_str(params, "scopeId");

    if let Some(scope_id) = &scope_id {
        if !row_exists(conn, "SELECT 1 FROM scopes WHERE id = ?", scope_id)? {
            return Err(HandlerErr::not_found("scope not found"));
        }
    }
    if let Some(roll) = &roll_no {
        let taken: Option<i64> = conn
            .query_row("SELECT 1 FROM users WHERE roll_no = ?", [roll], |r| r.get(0))
            .optional()
            .map_err(HandlerErr::db_query)?;
        if taken.is_some() {
            return Err(HandlerErr::bad_params("roll number already in use"));
        }
    }

    let user_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO users(id, name, roll_no, role, scope_id) VALUES(?, ?, ?, ?, ?)",
        (&user_id, &name, &roll_no, &role, &scope_id),
    )
    .map_err(|e| HandlerErr::db_update(e, "users"))?;
    Ok(json!({ "userId": user_id }))
}

fn teams_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let scope_id = get_required_str(params, "scopeId")?;
    let name = get_required_str(params, "name")?.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }
    if !row_exists(conn, "SELECT 1 FROM scopes WHERE id = ?", &scope_id)? {
        return Err(HandlerErr::not_found("scope not found"));
    }

    let team_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO teams(id, scope_id, name, status) VALUES(?, ?, ?, ?)",
        (&team_id, &scope_id, &name, TeamStatus::Pending.as_str()),
    )
    .map_err(|e| HandlerErr::db_update(e, "teams"))?;
    Ok(json!({ "teamId": team_id, "status": TeamStatus::Pending.as_str() }))
}

fn teams_add_member(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let team_id = get_required_str(params, "teamId")?;
    let user_id = get_required_str(params, "userId")?;
    let approved = get_opt_bool(params, "approved").unwrap_or(true);
    let is_leader = get_opt_bool(params, "isLeader").unwrap_or(false);

    if !row_exists(conn, "SELECT 1 FROM teams WHERE id = ?", &team_id)? {
        return Err(HandlerErr::not_found("team not found"));
    }
    if !row_exists(conn, "SELECT 1 FROM users WHERE id = ?", &user_id)? {
        return Err(HandlerErr::not_found("user not found"));
    }

    // At most one approved leader per team.
    if is_leader && approved {
        let existing: Option<String> = conn
            .query_row(
                "SELECT user_id FROM team_members
                 WHERE team_id = ? AND is_leader = 1 AND approved = 1 AND user_id <> ?",
                (&team_id, &user_id),
                |r| r.get(0),
            )
            .optional()
            .map_err(HandlerErr::db_query)?;
        if existing.is_some() {
            return Err(HandlerErr::bad_params("team already has an approved leader"));
        }
    }

    conn.execute(
        "INSERT INTO team_members(team_id, user_id, approved, is_leader)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(team_id, user_id) DO UPDATE SET
           approved = excluded.approved,
           is_leader = excluded.is_leader",
        (&team_id, &user_id, approved as i64, is_leader as i64),
    )
    .map_err(|e| HandlerErr::db_update(e, "team_members"))?;
    Ok(json!({ "teamId": team_id, "userId": user_id }))
}

fn teams_set_status(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let team_id = get_required_str(params, "teamId")?;
    let status_str = get_required_str(params, "status")?;
    let Some(to) = TeamStatus::parse(&status_str) else {
        return Err(HandlerErr::bad_params(format!("unknown team status: {}", status_str)));
    };

    let current_str: Option<String> = conn
        .query_row("SELECT status FROM teams WHERE id = ?", [&team_id], |r| r.get(0))
        .optional()
        .map_err(HandlerErr::db_query)?;
    let Some(current_str) = current_str else {
        return Err(HandlerErr::not_found("team not found"));
    };
    let Some(current) = TeamStatus::parse(&current_str) else {
        return Err(HandlerErr::bad_params(format!(
            "team has unrecognized stored status: {}",
            current_str
        )));
    };
    if !current.can_transition(to) {
        return Err(HandlerErr::invalid_transition(format!(
            "{} -> {} is not a valid team transition",
            current.as_str(),
            to.as_str()
        )));
    }

    conn.execute(
        "UPDATE teams SET status = ? WHERE id = ?",
        (to.as_str(), &team_id),
    )
    .map_err(|e| HandlerErr::db_update(e, "teams"))?;
    Ok(json!({ "teamId": team_id, "status": to.as_str() }))
}

fn projects_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let team_id = get_required_str(params, "teamId")?;
    let title = get_required_str(params, "title")?.trim().to_string();
    if title.is_empty() {
        return Err(HandlerErr::bad_params("title must not be empty"));
    }
    let category = get_opt_str(params, "category");
    let max_team_size = get_opt_u64(params, "maxTeamSize").map(|v| v as i64);

    if !row_exists(conn, "SELECT 1 FROM teams WHERE id = ?", &team_id)? {
        return Err(HandlerErr::not_found("team not found"));
    }
    if row_exists(conn, "SELECT 1 FROM projects WHERE team_id = ?", &team_id)? {
        return Err(HandlerErr::bad_params("team already has a project"));
    }

    let project_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO projects(id, team_id, title, category, max_team_size) VALUES(?, ?, ?, ?, ?)",
        (&project_id, &team_id, &title, &category, &max_team_size),
    )
    .map_err(|e| HandlerErr::db_update(e, "projects"))?;
    Ok(json!({ "projectId": project_id }))
}

fn projects_request(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let team_id = get_required_str(params, "teamId")?;
    let title = get_required_str(params, "title")?.trim().to_string();
    if title.is_empty() {
        return Err(HandlerErr::bad_params("title must not be empty"));
    }
    if !row_exists(conn, "SELECT 1 FROM teams WHERE id = ?", &team_id)? {
        return Err(HandlerErr::not_found("team not found"));
    }

    let request_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO project_requests(id, team_id, title, status) VALUES(?, ?, ?, 'PENDING')",
        (&request_id, &team_id, &title),
    )
    .map_err(|e| HandlerErr::db_update(e, "project_requests"))?;
    Ok(json!({ "requestId": request_id }))
}

fn reviews_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let team_id = get_required_str(params, "teamId")?;
    let phase = get_opt_u64(params, "phase")
        .ok_or_else(|| HandlerErr::bad_params("missing phase"))? as i64;
    if phase < 1 {
        return Err(HandlerErr::bad_params("phase must be at least 1"));
    }
    let scheduled_at_raw = get_required_str(params, "scheduledAt")?;
    let scheduled_at = parse_datetime_param(&scheduled_at_raw, "scheduledAt")?;
    let faculty_id = get_opt_str(params, "facultyId");

    let phase_count: Option<i64> = conn
        .query_row(
            "SELECT s.number_of_phases FROM teams t JOIN scopes s ON s.id = t.scope_id WHERE t.id = ?",
            [&team_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    let Some(phase_count) = phase_count else {
        return Err(HandlerErr::not_found("team not found"));
    };
    if phase > phase_count {
        return Err(HandlerErr::bad_params(format!(
            "phase {} exceeds scope's {} phases",
            phase, phase_count
        )));
    }
    if let Some(fid) = &faculty_id {
        let role: Option<String> = conn
            .query_row("SELECT role FROM users WHERE id = ?", [fid], |r| r.get(0))
            .optional()
            .map_err(HandlerErr::db_query)?;
        match role.as_deref() {
            Some("faculty") => {}
            Some(_) => return Err(HandlerErr::bad_params("facultyId must reference a faculty user")),
            None => return Err(HandlerErr::not_found("faculty not found")),
        }
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    // One active review per (team, phase); older rows stay as audit trail.
    tx.execute(
        "UPDATE reviews SET superseded = 1 WHERE team_id = ? AND review_phase = ? AND superseded = 0",
        (&team_id, &phase),
    )
    .map_err(|e| HandlerErr::db_update(e, "reviews"))?;

    let review_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO reviews(id, team_id, review_phase, status, faculty_id, scheduled_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &review_id,
            &team_id,
            &phase,
            ReviewStatus::Pending.as_str(),
            &faculty_id,
            &format_ts(scheduled_at),
        ),
    )
    .map_err(|e| HandlerErr::db_update(e, "reviews"))?;
    tx.commit().map_err(HandlerErr::db_commit)?;

    Ok(json!({ "reviewId": review_id, "status": ReviewStatus::Pending.as_str() }))
}

fn reviews_submit_marks(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let review_id = get_required_str(params, "reviewId")?;
    let complete = get_opt_bool(params, "complete").unwrap_or(true);
    let Some(entries) = params.get("marks").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing marks"));
    };

    let review: Option<(String, String)> = conn
        .query_row(
            "SELECT team_id, status FROM reviews WHERE id = ? AND superseded = 0",
            [&review_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    let Some((team_id, status_str)) = review else {
        return Err(HandlerErr::not_found("review not found"));
    };
    let Some(current) = ReviewStatus::parse(&status_str) else {
        return Err(HandlerErr::bad_params(format!(
            "review has unrecognized stored status: {}",
            status_str
        )));
    };
    if complete && !current.can_transition(ReviewStatus::Completed) {
        return Err(HandlerErr::invalid_transition(format!(
            "{} -> COMPLETED is not a valid review transition",
            current.as_str()
        )));
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    let mut recorded = 0usize;
    for entry in entries {
        let Some(user_id) = entry.get("userId").and_then(|v| v.as_str()) else {
            return Err(HandlerErr::bad_params("marks entries need userId"));
        };
        let member: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM team_members WHERE team_id = ? AND user_id = ?",
                (&team_id, &user_id),
                |r| r.get(0),
            )
            .optional()
            .map_err(HandlerErr::db_query)?;
        if member.is_none() {
            return Err(HandlerErr::not_found(format!("{} is not a member of the team", user_id)));
        }
        let is_absent = entry.get("isAbsent").and_then(|v| v.as_bool()).unwrap_or(false);

        // Typed criterion breakdown; the total is a real column, not a
        // sentinel key inside the criterion map.
        let mut criteria: Vec<(String, f64, f64)> = Vec::new();
        if let Some(scores) = entry.get("criterionScores").and_then(|v| v.as_array()) {
            for c in scores {
                let (Some(name), Some(score), Some(max)) = (
                    c.get("criterion").and_then(|v| v.as_str()),
                    c.get("score").and_then(|v| v.as_f64()),
                    c.get("max").and_then(|v| v.as_f64()),
                ) else {
                    return Err(HandlerErr::bad_params(
                        "criterionScores entries need criterion, score, max",
                    ));
                };
                criteria.push((name.to_string(), score, max));
            }
        }
        let total = if is_absent {
            0.0
        } else {
            entry
                .get("total")
                .and_then(|v| v.as_f64())
                .unwrap_or_else(|| criteria.iter().map(|(_, s, _)| s).sum())
        };

        tx.execute(
            "INSERT INTO review_marks(id, review_id, user_id, total, is_absent)
             VALUES(?, ?, ?, ?, ?)
             ON CONFLICT(review_id, user_id) DO UPDATE SET
               total = excluded.total,
               is_absent = excluded.is_absent",
            (
                &Uuid::new_v4().to_string(),
                &review_id,
                &user_id,
                total,
                is_absent as i64,
            ),
        )
        .map_err(|e| HandlerErr::db_update(e, "review_marks"))?;
        let mark_id: String = tx
            .query_row(
                "SELECT id FROM review_marks WHERE review_id = ? AND user_id = ?",
                (&review_id, &user_id),
                |r| r.get(0),
            )
            .map_err(HandlerErr::db_query)?;
        tx.execute(
            "DELETE FROM review_mark_criteria WHERE review_mark_id = ?",
            [&mark_id],
        )
        .map_err(|e| HandlerErr::db_update(e, "review_mark_criteria"))?;
        for (criterion, score, max) in &criteria {
            tx.execute(
                "INSERT INTO review_mark_criteria(review_mark_id, criterion, score, max_score)
                 VALUES(?, ?, ?, ?)",
                (&mark_id, criterion, score, max),
            )
            .map_err(|e| HandlerErr::db_update(e, "review_mark_criteria"))?;
        }
        recorded += 1;
    }

    let final_status = if complete {
        tx.execute(
            "UPDATE reviews SET status = ?, completed_at = ? WHERE id = ?",
            (
                ReviewStatus::Completed.as_str(),
                &format_ts(now_local()),
                &review_id,
            ),
        )
        .map_err(|e| HandlerErr::db_update(e, "reviews"))?;
        ReviewStatus::Completed
    } else {
        current
    };
    tx.commit().map_err(HandlerErr::db_commit)?;

    Ok(json!({
        "reviewId": review_id,
        "marksRecorded": recorded,
        "status": final_status.as_str()
    }))
}

fn reviews_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let team_id = get_opt_str(params, "teamId");
    let mut sql = String::from(
        "SELECT id, team_id, review_phase, status, faculty_id, scheduled_at, completed_at, superseded
         FROM reviews WHERE 1 = 1",
    );
    let mut binds: Vec<rusqlite::types::Value> = Vec::new();
    if let Some(team_id) = team_id {
        sql.push_str(" AND team_id = ?");
        binds.push(rusqlite::types::Value::Text(team_id));
    }
    sql.push_str(" ORDER BY scheduled_at, id");

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
    let reviews = stmt
        .query_map(rusqlite::params_from_iter(binds), |r| {
            let id: String = r.get(0)?;
            let team_id: String = r.get(1)?;
            let phase: i64 = r.get(2)?;
            let status: String = r.get(3)?;
            let faculty_id: Option<String> = r.get(4)?;
            let scheduled_at: String = r.get(5)?;
            let completed_at: Option<String> = r.get(6)?;
            let superseded: i64 = r.get(7)?;
            Ok(json!({
                "id": id,
                "teamId": team_id,
                "phase": phase,
                "status": status,
                "facultyId": faculty_id,
                "scheduledAt": scheduled_at,
                "completedAt": completed_at,
                "superseded": superseded != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(json!({ "reviews": reviews }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "scopes.create" => Some(dispatch(state, req, scopes_create)),
        "venues.create" => Some(dispatch(state, req, venues_create)),
        "users.create" => Some(dispatch(state, req, users_create)),
        "teams.create" => Some(dispatch(state, req, teams_create)),
        "teams.addMember" => Some(dispatch(state, req, teams_add_member)),
        "teams.setStatus" => Some(dispatch(state, req, teams_set_status)),
        "projects.create" => Some(dispatch(state, req, projects_create)),
        "projects.request" => Some(dispatch(state, req, projects_request)),
        "reviews.create" => Some(dispatch(state, req, reviews_create)),
        "reviews.submitMarks" => Some(dispatch(state, req, reviews_submit_marks)),
        "reviews.list" => Some(dispatch(state, req, reviews_list)),
        _ => None,
    }
}
