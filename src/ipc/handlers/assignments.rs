//! Faculty assignment allocator: direct and round-robin distribution,
//! venue-based faculty inference, bulk access-window maintenance, and
//! the Sunday-expiry remediation sweep.

use chrono::Duration;
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashSet;
use uuid::Uuid;

use crate::ipc::helpers::{
    dispatch, get_opt_bool, get_opt_f64, get_opt_str, get_opt_str_array, get_opt_u64,
    get_required_str, get_required_str_array, now_local, parse_date_param, parse_datetime_param,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::model::AssignmentMode;
use crate::timewindow::{self, format_ts};

/// Round-robin partition: item `i` (input order) lands in bucket
/// `i mod k`, so counts differ by at most one and earlier buckets
/// receive the remainder.
fn round_robin_partition(n_items: usize, k: usize) -> Vec<Vec<usize>> {
    let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); k];
    if k == 0 {
        return buckets;
    }
    for i in 0..n_items {
        buckets[i % k].push(i);
    }
    buckets
}

struct Target {
    label: String,
    team_id: String,
    project_id: String,
}

/// Explicit project ids must exist (hard error); roll numbers are bulk
/// paste input and unresolvable entries go to the skip list instead.
fn resolve_targets(
    conn: &Connection,
    project_ids: &[String],
    roll_numbers: &[String],
    skipped: &mut Vec<serde_json::Value>,
) -> Result<Vec<Target>, HandlerErr> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut targets: Vec<Target> = Vec::new();

    for pid in project_ids {
        let team_id: Option<String> = conn
            .query_row("SELECT team_id FROM projects WHERE id = ?", [pid], |r| r.get(0))
            .optional()
            .map_err(HandlerErr::db_query)?;
        let Some(team_id) = team_id else {
            return Err(HandlerErr::not_found(format!("project {} not found", pid)));
        };
        if seen.insert(pid.clone()) {
            targets.push(Target {
                label: pid.clone(),
                team_id,
                project_id: pid.clone(),
            });
        }
    }

    for roll in roll_numbers {
        let user_id: Option<String> = conn
            .query_row("SELECT id FROM users WHERE roll_no = ?", [roll], |r| r.get(0))
            .optional()
            .map_err(HandlerErr::db_query)?;
        let Some(user_id) = user_id else {
            skipped.push(json!({ "target": roll, "reason": "unknown roll number" }));
            continue;
        };
        let team_id: Option<String> = conn
            .query_row(
                "SELECT team_id FROM team_members WHERE user_id = ? ORDER BY team_id LIMIT 1",
                [&user_id],
                |r| r.get(0),
            )
            .optional()
            .map_err(HandlerErr::db_query)?;
        let Some(team_id) = team_id else {
            skipped.push(json!({ "target": roll, "reason": "student has no team" }));
            continue;
        };
        let project_id: Option<String> = conn
            .query_row("SELECT id FROM projects WHERE team_id = ?", [&team_id], |r| r.get(0))
            .optional()
            .map_err(HandlerErr::db_query)?;
        let Some(project_id) = project_id else {
            skipped.push(json!({ "target": roll, "reason": "team has no project" }));
            continue;
        };
        if seen.insert(project_id.clone()) {
            targets.push(Target {
                label: roll.clone(),
                team_id,
                project_id,
            });
        }
    }

    Ok(targets)
}

/// Earliest lab session whose student set intersects the team's members,
/// constrained to the optional scope and date range, else upcoming from
/// `after`. Tie-break on session id for determinism.
fn infer_session_faculty(
    conn: &Connection,
    team_id: &str,
    scope_id: Option<&str>,
    range: Option<(&str, &str)>,
    after: &str,
) -> Result<Option<String>, HandlerErr> {
    let mut sql = String::from(
        "SELECT s.faculty_id
         FROM lab_sessions s
         JOIN lab_session_students ls ON ls.session_id = s.id
         JOIN team_members tm ON tm.user_id = ls.student_id
         WHERE tm.team_id = ?",
    );
    let mut binds: Vec<Value> = vec![Value::Text(team_id.to_string())];
    match range {
        Some((lo, hi)) => {
            sql.push_str(" AND s.start_time >= ? AND s.start_time <= ?");
            binds.push(Value::Text(format!("{}T00:00:00", lo)));
            binds.push(Value::Text(format!("{}T23:59:59", hi)));
        }
        None => {
            sql.push_str(" AND s.start_time >= ?");
            binds.push(Value::Text(after.to_string()));
        }
    }
    if let Some(scope_id) = scope_id {
        sql.push_str(" AND s.scope_id = ?");
        binds.push(Value::Text(scope_id.to_string()));
    }
    sql.push_str(" ORDER BY s.start_time, s.id LIMIT 1");

    conn.query_row(&sql, params_from_iter(binds), |r| r.get(0))
        .optional()
        .map_err(HandlerErr::db_query)
}

fn allocate(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let project_ids = get_opt_str_array(params, "projectIds")?.unwrap_or_default();
    let roll_numbers = get_opt_str_array(params, "rollNumbers")?.unwrap_or_default();
    if project_ids.is_empty() && roll_numbers.is_empty() {
        return Err(HandlerErr::bad_params("no projects or roll numbers selected"));
    }

    let faculty_ids = get_opt_str_array(params, "facultyIds")?.unwrap_or_default();
    let infer_from_venue = get_opt_bool(params, "inferFromVenue").unwrap_or(false);
    if infer_from_venue == !faculty_ids.is_empty() {
        return Err(HandlerErr::bad_params(
            "select faculty explicitly or set inferFromVenue, not both or neither",
        ));
    }

    let phase = get_opt_u64(params, "phase")
        .ok_or_else(|| HandlerErr::bad_params("missing phase"))? as i64;
    if phase < 1 {
        return Err(HandlerErr::bad_params("phase must be at least 1"));
    }
    let mode_str = get_required_str(params, "mode")?;
    let Some(mode) = AssignmentMode::parse(&mode_str) else {
        return Err(HandlerErr::bad_params("mode must be ONLINE or OFFLINE"));
    };
    let access_starts_at = match get_opt_str(params, "accessStartsAt") {
        Some(raw) => parse_datetime_param(&raw, "accessStartsAt")?,
        None => now_local(),
    };
    let duration_hours = get_opt_f64(params, "durationHours").unwrap_or(0.0);
    if duration_hours < 0.0 {
        return Err(HandlerErr::bad_params("durationHours must not be negative"));
    }
    let distribute_evenly = get_opt_bool(params, "distributeEvenly").unwrap_or(false);
    let scope_id = get_opt_str(params, "scopeId");
    let from_date = get_opt_str(params, "fromDate");
    let to_date = get_opt_str(params, "toDate");
    if let Some(d) = &from_date {
        parse_date_param(d, "fromDate")?;
    }
    if let Some(d) = &to_date {
        parse_date_param(d, "toDate")?;
    }
    if from_date.is_some() != to_date.is_some() {
        return Err(HandlerErr::bad_params("fromDate and toDate go together"));
    }

    for fid in &faculty_ids {
        let role: Option<String> = conn
            .query_row("SELECT role FROM users WHERE id = ?", [fid], |r| r.get(0))
            .optional()
            .map_err(HandlerErr::db_query)?;
        match role.as_deref() {
            Some("faculty") => {}
            Some(_) => {
                return Err(HandlerErr::bad_params(format!("{} is not a faculty user", fid)))
            }
            None => return Err(HandlerErr::not_found(format!("faculty {} not found", fid))),
        }
    }

    let mut skipped: Vec<serde_json::Value> = Vec::new();
    let targets = resolve_targets(conn, &project_ids, &roll_numbers, &mut skipped)?;

    let starts_str = format_ts(access_starts_at);
    let expires_str: Option<String> = if duration_hours > 0.0 {
        let expires = access_starts_at + Duration::seconds((duration_hours * 3600.0) as i64);
        Some(format_ts(expires))
    } else {
        None
    };

    // (project, faculty) pairs to upsert.
    let mut pairs: Vec<(String, String, String)> = Vec::new();
    if infer_from_venue {
        let range = match (&from_date, &to_date) {
            (Some(lo), Some(hi)) => Some((lo.as_str(), hi.as_str())),
            _ => None,
        };
        for t in &targets {
            match infer_session_faculty(conn, &t.team_id, scope_id.as_deref(), range, &starts_str)? {
                Some(faculty_id) => pairs.push((t.label.clone(), t.project_id.clone(), faculty_id)),
                None => skipped.push(json!({
                    "target": t.label,
                    "reason": "no scheduled lab session"
                })),
            }
        }
    } else if distribute_evenly {
        let buckets = round_robin_partition(targets.len(), faculty_ids.len());
        for (f_idx, bucket) in buckets.iter().enumerate() {
            for &t_idx in bucket {
                let t = &targets[t_idx];
                pairs.push((t.label.clone(), t.project_id.clone(), faculty_ids[f_idx].clone()));
            }
        }
    } else {
        for t in &targets {
            for fid in &faculty_ids {
                pairs.push((t.label.clone(), t.project_id.clone(), fid.clone()));
            }
        }
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    let mut created = 0usize;
    let mut updated = 0usize;
    for (label, project_id, faculty_id) in &pairs {
        match upsert_assignment(
            &tx,
            project_id,
            faculty_id,
            phase,
            mode,
            &starts_str,
            expires_str.as_deref(),
        ) {
            Ok(true) => created += 1,
            Ok(false) => updated += 1,
            Err(e) => {
                // Isolate the failing item; the rest of the batch proceeds.
                skipped.push(json!({ "target": label, "reason": e.to_string() }));
            }
        }
    }
    tx.commit().map_err(HandlerErr::db_commit)?;

    Ok(json!({ "created": created, "updated": updated, "skipped": skipped }))
}

/// Returns true on insert, false when an existing (project, faculty,
/// phase) row had its access window rewritten. The UNIQUE constraint on
/// the triple backstops this read-then-write against concurrent writers.
fn upsert_assignment(
    conn: &Connection,
    project_id: &str,
    faculty_id: &str,
    phase: i64,
    mode: AssignmentMode,
    starts: &str,
    expires: Option<&str>,
) -> rusqlite::Result<bool> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM review_assignments
             WHERE project_id = ? AND faculty_id = ? AND review_phase = ?",
            (&project_id, &faculty_id, &phase),
            |r| r.get(0),
        )
        .optional()?;
    match existing {
        Some(id) => {
            conn.execute(
                "UPDATE review_assignments
                 SET mode = ?, access_starts_at = ?, access_expires_at = ?
                 WHERE id = ?",
                (mode.as_str(), starts, expires, &id),
            )?;
            Ok(false)
        }
        None => {
            conn.execute(
                "INSERT INTO review_assignments(
                    id, project_id, faculty_id, review_phase, mode, access_starts_at, access_expires_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?)",
                (
                    &Uuid::new_v4().to_string(),
                    &project_id,
                    &faculty_id,
                    &phase,
                    mode.as_str(),
                    starts,
                    expires,
                ),
            )?;
            Ok(true)
        }
    }
}

fn bulk_unassign(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let ids = get_required_str_array(params, "assignmentIds")?;
    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    let mut deleted = 0usize;
    for id in &ids {
        deleted += tx
            .execute("DELETE FROM review_assignments WHERE id = ?", [id])
            .map_err(|e| HandlerErr::db_update(e, "review_assignments"))?;
    }
    tx.commit().map_err(HandlerErr::db_commit)?;
    Ok(json!({ "deletedCount": deleted }))
}

fn bulk_update_access(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let ids = get_required_str_array(params, "assignmentIds")?;
    let duration_hours = get_opt_f64(params, "durationHours").unwrap_or(0.0);
    if duration_hours < 0.0 {
        return Err(HandlerErr::bad_params("durationHours must not be negative"));
    }
    let expires: Option<String> = if duration_hours > 0.0 {
        Some(format_ts(
            now_local() + Duration::seconds((duration_hours * 3600.0) as i64),
        ))
    } else {
        None
    };

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    let mut updated = 0usize;
    for id in &ids {
        updated += tx
            .execute(
                "UPDATE review_assignments SET access_expires_at = ? WHERE id = ?",
                (&expires, id),
            )
            .map_err(|e| HandlerErr::db_update(e, "review_assignments"))?;
    }
    tx.commit().map_err(HandlerErr::db_commit)?;
    Ok(json!({ "updatedCount": updated }))
}

/// Remediation sweep for access windows that expire on a Sunday and
/// would silently cut access during a non-working day.
fn fix_sunday_expiries(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let _ = params;
    let mut stmt = conn
        .prepare("SELECT id, access_expires_at FROM review_assignments WHERE access_expires_at IS NOT NULL")
        .map_err(HandlerErr::db_query)?;
    let rows = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    let mut corrected = 0usize;
    for (id, raw) in rows {
        let Some(expires) = timewindow::parse_ts(&raw) else {
            continue;
        };
        if let Some(fixed) = timewindow::correct_sunday_expiry(expires) {
            tx.execute(
                "UPDATE review_assignments SET access_expires_at = ? WHERE id = ?",
                (&format_ts(fixed), &id),
            )
            .map_err(|e| HandlerErr::db_update(e, "review_assignments"))?;
            corrected += 1;
        }
    }
    tx.commit().map_err(HandlerErr::db_commit)?;
    Ok(json!({ "correctedCount": corrected }))
}

fn list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut sql = String::from(
        "SELECT a.id, a.project_id, p.title, a.faculty_id, u.name, a.review_phase,
                a.mode, a.access_starts_at, a.access_expires_at
         FROM review_assignments a
         JOIN projects p ON p.id = a.project_id
         JOIN users u ON u.id = a.faculty_id
         WHERE 1 = 1",
    );
    let mut binds: Vec<Value> = Vec::new();
    if let Some(project_id) = get_opt_str(params, "projectId") {
        sql.push_str(" AND a.project_id = ?");
        binds.push(Value::Text(project_id));
    }
    if let Some(faculty_id) = get_opt_str(params, "facultyId") {
        sql.push_str(" AND a.faculty_id = ?");
        binds.push(Value::Text(faculty_id));
    }
    if let Some(phase) = get_opt_u64(params, "phase") {
        sql.push_str(" AND a.review_phase = ?");
        binds.push(Value::Integer(phase as i64));
    }
    sql.push_str(" ORDER BY a.access_starts_at, a.id");

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
    let assignments = stmt
        .query_map(params_from_iter(binds), |r| {
            let id: String = r.get(0)?;
            let project_id: String = r.get(1)?;
            let project_title: String = r.get(2)?;
            let faculty_id: String = r.get(3)?;
            let faculty_name: String = r.get(4)?;
            let phase: i64 = r.get(5)?;
            let mode: String = r.get(6)?;
            let starts: String = r.get(7)?;
            let expires: Option<String> = r.get(8)?;
            Ok(json!({
                "id": id,
                "projectId": project_id,
                "projectTitle": project_title,
                "facultyId": faculty_id,
                "facultyName": faculty_name,
                "phase": phase,
                "mode": mode,
                "accessStartsAt": starts,
                "accessExpiresAt": expires
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(json!({ "assignments": assignments }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "assignments.allocate" => Some(dispatch(state, req, allocate)),
        "assignments.bulkUnassign" => Some(dispatch(state, req, bulk_unassign)),
        "assignments.bulkUpdateAccess" => Some(dispatch(state, req, bulk_update_access)),
        "assignments.fixSundayExpiries" => Some(dispatch(state, req, fix_sunday_expiries)),
        "assignments.list" => Some(dispatch(state, req, list)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::round_robin_partition;

    #[test]
    fn partition_counts_differ_by_at_most_one() {
        for (n, k) in [(10, 3), (9, 3), (7, 4), (1, 5), (0, 2)] {
            let buckets = round_robin_partition(n, k);
            assert_eq!(buckets.len(), k);
            let total: usize = buckets.iter().map(Vec::len).sum();
            assert_eq!(total, n);
            let max = buckets.iter().map(Vec::len).max().unwrap_or(0);
            let min = buckets.iter().map(Vec::len).min().unwrap_or(0);
            assert!(max - min <= 1, "n={} k={}", n, k);
            assert_eq!(max, n.div_ceil(k));
        }
    }

    #[test]
    fn partition_is_a_disjoint_cover() {
        let buckets = round_robin_partition(10, 3);
        let mut seen: Vec<usize> = buckets.into_iter().flatten().collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn remainder_goes_to_earlier_buckets_in_order() {
        let buckets = round_robin_partition(7, 3);
        assert_eq!(buckets[0], vec![0, 3, 6]);
        assert_eq!(buckets[1], vec![1, 4]);
        assert_eq!(buckets[2], vec![2, 5]);
    }
}
