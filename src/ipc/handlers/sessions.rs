//! Venue session scheduling: create/edit/delete, day copy, venue swap,
//! and the per-date scheduled/unscheduled student queries. Sessions
//! occupy the fixed full-day working window on their date.

use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashSet;
use uuid::Uuid;

use crate::config::PortalConfig;
use crate::ipc::helpers::{
    dispatch, dispatch_cfg, get_opt_str, get_required_str, get_required_str_array,
    parse_date_param, row_exists, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::timewindow::{self, format_ts};

fn require_faculty(conn: &Connection, user_id: &str) -> Result<(), HandlerErr> {
    let role: Option<String> = conn
        .query_row("SELECT role FROM users WHERE id = ?", [user_id], |r| r.get(0))
        .optional()
        .map_err(HandlerErr::db_query)?;
    match role.as_deref() {
        Some("faculty") => Ok(()),
        Some(_) => Err(HandlerErr::bad_params(format!("{} is not a faculty user", user_id))),
        None => Err(HandlerErr::not_found(format!("faculty {} not found", user_id))),
    }
}

fn require_students(conn: &Connection, student_ids: &[String]) -> Result<(), HandlerErr> {
    for sid in student_ids {
        let role: Option<String> = conn
            .query_row("SELECT role FROM users WHERE id = ?", [sid], |r| r.get(0))
            .optional()
            .map_err(HandlerErr::db_query)?;
        match role.as_deref() {
            Some("student") => {}
            Some(_) => {
                return Err(HandlerErr::bad_params(format!("{} is not a student user", sid)))
            }
            None => return Err(HandlerErr::not_found(format!("student {} not found", sid))),
        }
    }
    Ok(())
}

fn sessions_create(
    conn: &Connection,
    cfg: &PortalConfig,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let venue_id = get_required_str(params, "venueId")?;
    let faculty_id = get_required_str(params, "facultyId")?;
    let scope_id = get_required_str(params, "scopeId")?;
    let date_raw = get_required_str(params, "date")?;
    let date = parse_date_param(&date_raw, "date")?;
    let student_ids = get_required_str_array(params, "studentIds")?;

    if !row_exists(conn, "SELECT 1 FROM venues WHERE id = ?", &venue_id)? {
        return Err(HandlerErr::not_found("venue not found"));
    }
    require_faculty(conn, &faculty_id)?;
    if !row_exists(conn, "SELECT 1 FROM scopes WHERE id = ?", &scope_id)? {
        return Err(HandlerErr::not_found("scope not found"));
    }
    require_students(conn, &student_ids)?;

    // The current model books the whole working day; per-period slots
    // are not a thing yet.
    let start = format_ts(date.and_time(cfg.work_start_time()));
    let end = format_ts(date.and_time(cfg.work_end_time()));

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    let session_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO lab_sessions(id, venue_id, faculty_id, scope_id, start_time, end_time)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&session_id, &venue_id, &faculty_id, &scope_id, &start, &end),
    )
    .map_err(|e| HandlerErr::db_update(e, "lab_sessions"))?;
    for sid in &student_ids {
        tx.execute(
            "INSERT OR IGNORE INTO lab_session_students(session_id, student_id) VALUES(?, ?)",
            (&session_id, sid),
        )
        .map_err(|e| HandlerErr::db_update(e, "lab_session_students"))?;
    }
    tx.commit().map_err(HandlerErr::db_commit)?;

    Ok(json!({ "sessionId": session_id, "startTime": start, "endTime": end }))
}

/// Replaces the faculty and/or student set. Venue and window are fixed at
/// creation; rebooking a different venue or date is delete + create.
fn sessions_edit(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let session_id = get_required_str(params, "sessionId")?;
    if !row_exists(conn, "SELECT 1 FROM lab_sessions WHERE id = ?", &session_id)? {
        return Err(HandlerErr::not_found("session not found"));
    }
    let faculty_id = get_opt_str(params, "facultyId");
    let student_ids = crate::ipc::helpers::get_opt_str_array(params, "studentIds")?;
    if faculty_id.is_none() && student_ids.is_none() {
        return Err(HandlerErr::bad_params("nothing to edit"));
    }
    if let Some(fid) = &faculty_id {
        require_faculty(conn, fid)?;
    }
    if let Some(sids) = &student_ids {
        require_students(conn, sids)?;
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    if let Some(fid) = &faculty_id {
        tx.execute(
            "UPDATE lab_sessions SET faculty_id = ? WHERE id = ?",
            (fid, &session_id),
        )
        .map_err(|e| HandlerErr::db_update(e, "lab_sessions"))?;
    }
    if let Some(sids) = &student_ids {
        tx.execute(
            "DELETE FROM lab_session_students WHERE session_id = ?",
            [&session_id],
        )
        .map_err(|e| HandlerErr::db_update(e, "lab_session_students"))?;
        for sid in sids {
            tx.execute(
                "INSERT OR IGNORE INTO lab_session_students(session_id, student_id) VALUES(?, ?)",
                (&session_id, sid),
            )
            .map_err(|e| HandlerErr::db_update(e, "lab_session_students"))?;
        }
    }
    tx.commit().map_err(HandlerErr::db_commit)?;
    Ok(json!({ "sessionId": session_id }))
}

fn sessions_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let session_id = get_required_str(params, "sessionId")?;
    if !row_exists(conn, "SELECT 1 FROM lab_sessions WHERE id = ?", &session_id)? {
        return Err(HandlerErr::not_found("session not found"));
    }
    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    // No cascade into reviews or assignments; those survive the booking.
    tx.execute(
        "DELETE FROM lab_session_students WHERE session_id = ?",
        [&session_id],
    )
    .map_err(|e| HandlerErr::db_update(e, "lab_session_students"))?;
    tx.execute("DELETE FROM lab_sessions WHERE id = ?", [&session_id])
        .map_err(|e| HandlerErr::db_update(e, "lab_sessions"))?;
    tx.commit().map_err(HandlerErr::db_commit)?;
    Ok(json!({ "deleted": true }))
}

struct SessionRow {
    id: String,
    venue_id: String,
    faculty_id: String,
    scope_id: String,
    start_time: String,
    end_time: String,
}

fn sessions_on_date(
    conn: &Connection,
    date: &str,
    scope_id: Option<&str>,
) -> Result<Vec<SessionRow>, HandlerErr> {
    let mut sql = String::from(
        "SELECT id, venue_id, faculty_id, scope_id, start_time, end_time
         FROM lab_sessions
         WHERE substr(start_time, 1, 10) = ?",
    );
    let mut binds: Vec<Value> = vec![Value::Text(date.to_string())];
    if let Some(scope_id) = scope_id {
        sql.push_str(" AND scope_id = ?");
        binds.push(Value::Text(scope_id.to_string()));
    }
    sql.push_str(" ORDER BY start_time, id");

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
    stmt.query_map(params_from_iter(binds), |r| {
        Ok(SessionRow {
            id: r.get(0)?,
            venue_id: r.get(1)?,
            faculty_id: r.get(2)?,
            scope_id: r.get(3)?,
            start_time: r.get(4)?,
            end_time: r.get(5)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db_query)
}

/// Replicates a day's bookings onto another date, re-anchored to the
/// target date's same time-of-day window. A target-day session with the
/// same venue, faculty and scope counts as an exact duplicate and is
/// skipped, so re-running the copy is additive-idempotent.
fn sessions_copy_day(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let from_raw = get_required_str(params, "fromDate")?;
    let to_raw = get_required_str(params, "toDate")?;
    let from_date = parse_date_param(&from_raw, "fromDate")?;
    let to_date = parse_date_param(&to_raw, "toDate")?;
    let scope_id = get_opt_str(params, "scopeId");
    if let Some(sid) = &scope_id {
        if !row_exists(conn, "SELECT 1 FROM scopes WHERE id = ?", sid)? {
            return Err(HandlerErr::not_found("scope not found"));
        }
    }
    let from_key = from_date.format("%Y-%m-%d").to_string();
    let to_key = to_date.format("%Y-%m-%d").to_string();
    if from_key == to_key {
        return Err(HandlerErr::bad_params("fromDate and toDate must differ"));
    }

    let sources = sessions_on_date(conn, &from_key, scope_id.as_deref())?;

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    let mut copied = 0usize;
    for src in &sources {
        let duplicate: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM lab_sessions
                 WHERE venue_id = ? AND faculty_id = ? AND scope_id = ?
                   AND substr(start_time, 1, 10) = ?",
                (&src.venue_id, &src.faculty_id, &src.scope_id, &to_key),
                |r| r.get(0),
            )
            .optional()
            .map_err(HandlerErr::db_query)?;
        if duplicate.is_some() {
            continue;
        }

        let (Some(src_start), Some(src_end)) = (
            timewindow::parse_ts(&src.start_time),
            timewindow::parse_ts(&src.end_time),
        ) else {
            continue;
        };
        let new_start = format_ts(to_date.and_time(src_start.time()));
        let new_end = format_ts(to_date.and_time(src_end.time()));

        let new_id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO lab_sessions(id, venue_id, faculty_id, scope_id, start_time, end_time)
             VALUES(?, ?, ?, ?, ?, ?)",
            (
                &new_id,
                &src.venue_id,
                &src.faculty_id,
                &src.scope_id,
                &new_start,
                &new_end,
            ),
        )
        .map_err(|e| HandlerErr::db_update(e, "lab_sessions"))?;
        tx.execute(
            "INSERT INTO lab_session_students(session_id, student_id)
             SELECT ?, student_id FROM lab_session_students WHERE session_id = ?",
            (&new_id, &src.id),
        )
        .map_err(|e| HandlerErr::db_update(e, "lab_session_students"))?;
        copied += 1;
    }
    tx.commit().map_err(HandlerErr::db_commit)?;

    Ok(json!({ "sessionsCopied": copied }))
}

/// Exchanges two venues' bookings for one date; other dates untouched.
fn sessions_swap_venues(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let venue_a = get_required_str(params, "venueAId")?;
    let venue_b = get_required_str(params, "venueBId")?;
    let date_raw = get_required_str(params, "date")?;
    let date = parse_date_param(&date_raw, "date")?;
    for vid in [&venue_a, &venue_b] {
        if !row_exists(conn, "SELECT 1 FROM venues WHERE id = ?", vid)? {
            return Err(HandlerErr::not_found(format!("venue {} not found", vid)));
        }
    }
    if venue_a == venue_b {
        return Ok(json!({ "swapped": true }));
    }
    let date_key = date.format("%Y-%m-%d").to_string();

    let ids_for = |venue: &str| -> Result<Vec<String>, HandlerErr> {
        let mut stmt = conn
            .prepare(
                "SELECT id FROM lab_sessions
                 WHERE venue_id = ? AND substr(start_time, 1, 10) = ?",
            )
            .map_err(HandlerErr::db_query)?;
        stmt.query_map((venue, &date_key), |r| r.get::<_, String>(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::db_query)
    };
    let a_ids = ids_for(&venue_a)?;
    let b_ids = ids_for(&venue_b)?;

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    for id in &a_ids {
        tx.execute(
            "UPDATE lab_sessions SET venue_id = ? WHERE id = ?",
            (&venue_b, id),
        )
        .map_err(|e| HandlerErr::db_update(e, "lab_sessions"))?;
    }
    for id in &b_ids {
        tx.execute(
            "UPDATE lab_sessions SET venue_id = ? WHERE id = ?",
            (&venue_a, id),
        )
        .map_err(|e| HandlerErr::db_update(e, "lab_sessions"))?;
    }
    tx.commit().map_err(HandlerErr::db_commit)?;

    Ok(json!({ "swapped": true }))
}

fn sessions_unscheduled_students(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let date_raw = get_required_str(params, "date")?;
    let date = parse_date_param(&date_raw, "date")?;
    let scope_id = get_required_str(params, "scopeId")?;
    if !row_exists(conn, "SELECT 1 FROM scopes WHERE id = ?", &scope_id)? {
        return Err(HandlerErr::not_found("scope not found"));
    }
    let date_key = date.format("%Y-%m-%d").to_string();

    let mut stmt = conn
        .prepare(
            "SELECT u.id, u.name, u.roll_no
             FROM users u
             WHERE u.scope_id = ? AND u.role = 'student'
               AND u.id NOT IN (
                 SELECT ls.student_id
                 FROM lab_session_students ls
                 JOIN lab_sessions s ON s.id = ls.session_id
                 WHERE substr(s.start_time, 1, 10) = ?)
             ORDER BY u.name, u.id",
        )
        .map_err(HandlerErr::db_query)?;
    let students = stmt
        .query_map((&scope_id, &date_key), |r| {
            let id: String = r.get(0)?;
            let name: String = r.get(1)?;
            let roll_no: Option<String> = r.get(2)?;
            Ok(json!({ "id": id, "name": name, "rollNo": roll_no }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(json!({ "students": students }))
}

/// De-duplicated union of students across the date's sessions. Sessions
/// are walked in (start, id) order and the first occurrence wins, so a
/// student double-booked across venues reports their earliest slot.
fn sessions_scheduled_students(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let date_raw = get_required_str(params, "date")?;
    let date = parse_date_param(&date_raw, "date")?;
    let scope_id = get_opt_str(params, "scopeId");
    let date_key = date.format("%Y-%m-%d").to_string();

    let sessions = sessions_on_date(conn, &date_key, scope_id.as_deref())?;
    let mut seen: HashSet<String> = HashSet::new();
    let mut students: Vec<serde_json::Value> = Vec::new();

    for session in &sessions {
        let venue_name: Option<String> = conn
            .query_row("SELECT name FROM venues WHERE id = ?", [&session.venue_id], |r| r.get(0))
            .optional()
            .map_err(HandlerErr::db_query)?;
        let faculty_name: Option<String> = conn
            .query_row("SELECT name FROM users WHERE id = ?", [&session.faculty_id], |r| r.get(0))
            .optional()
            .map_err(HandlerErr::db_query)?;

        let mut stmt = conn
            .prepare(
                "SELECT u.id, u.name, u.roll_no
                 FROM lab_session_students ls
                 JOIN users u ON u.id = ls.student_id
                 WHERE ls.session_id = ?
                 ORDER BY u.name, u.id",
            )
            .map_err(HandlerErr::db_query)?;
        let rows = stmt
            .query_map([&session.id], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, Option<String>>(2)?,
                ))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::db_query)?;

        for (student_id, name, roll_no) in rows {
            if !seen.insert(student_id.clone()) {
                continue;
            }
            students.push(json!({
                "id": student_id,
                "name": name,
                "rollNo": roll_no,
                "venueId": session.venue_id,
                "venueName": venue_name,
                "facultyId": session.faculty_id,
                "facultyName": faculty_name,
                "startTime": session.start_time,
                "endTime": session.end_time
            }));
        }
    }

    Ok(json!({ "students": students }))
}

fn sessions_list_for_date(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let date_raw = get_required_str(params, "date")?;
    let date = parse_date_param(&date_raw, "date")?;
    let scope_id = get_opt_str(params, "scopeId");
    let date_key = date.format("%Y-%m-%d").to_string();

    let mut sql = String::from(
        "SELECT s.id, s.venue_id, v.name, s.faculty_id, u.name, s.scope_id,
                s.start_time, s.end_time,
                (SELECT COUNT(*) FROM lab_session_students ls WHERE ls.session_id = s.id)
         FROM lab_sessions s
         JOIN venues v ON v.id = s.venue_id
         JOIN users u ON u.id = s.faculty_id
         WHERE substr(s.start_time, 1, 10) = ?",
    );
    let mut binds: Vec<Value> = vec![Value::Text(date_key)];
    if let Some(sid) = scope_id {
        sql.push_str(" AND s.scope_id = ?");
        binds.push(Value::Text(sid));
    }
    sql.push_str(" ORDER BY s.start_time, s.id");

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
    let sessions = stmt
        .query_map(params_from_iter(binds), |r| {
            let id: String = r.get(0)?;
            let venue_id: String = r.get(1)?;
            let venue_name: String = r.get(2)?;
            let faculty_id: String = r.get(3)?;
            let faculty_name: String = r.get(4)?;
            let scope_id: String = r.get(5)?;
            let start_time: String = r.get(6)?;
            let end_time: String = r.get(7)?;
            let student_count: i64 = r.get(8)?;
            Ok(json!({
                "id": id,
                "venueId": venue_id,
                "venueName": venue_name,
                "facultyId": faculty_id,
                "facultyName": faculty_name,
                "scopeId": scope_id,
                "startTime": start_time,
                "endTime": end_time,
                "studentCount": student_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(json!({ "sessions": sessions }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sessions.create" => Some(dispatch_cfg(state, req, sessions_create)),
        "sessions.edit" => Some(dispatch(state, req, sessions_edit)),
        "sessions.delete" => Some(dispatch(state, req, sessions_delete)),
        "sessions.copyDay" => Some(dispatch(state, req, sessions_copy_day)),
        "sessions.swapVenues" => Some(dispatch(state, req, sessions_swap_venues)),
        "sessions.unscheduledStudents" => Some(dispatch(state, req, sessions_unscheduled_students)),
        "sessions.scheduledStudents" => Some(dispatch(state, req, sessions_scheduled_students)),
        "sessions.listForDate" => Some(dispatch(state, req, sessions_list_for_date)),
        _ => None,
    }
}
