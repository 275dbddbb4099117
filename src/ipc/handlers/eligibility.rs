use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::json;

use crate::ipc::helpers::{dispatch, get_opt_str, get_opt_u64, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::TeamStatus;

/// Teams that qualify for a review phase: in the scope, holding a project
/// (or at least a pending project request), and without a completed
/// review at that phase. A missing or unknown scope yields an empty list
/// rather than an error so the admin UI can render a blank table; a
/// phase beyond the scope's configured count is a caller mistake and is
/// rejected, same as review creation.
fn eligible_teams(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let phase = get_opt_u64(params, "phase")
        .ok_or_else(|| HandlerErr::bad_params("missing phase"))? as i64;
    if phase < 1 {
        return Err(HandlerErr::bad_params("phase must be at least 1"));
    }

    let Some(scope_id) = get_opt_str(params, "scopeId") else {
        return Ok(json!({ "teams": [] }));
    };
    let phase_count: Option<i64> = conn
        .query_row(
            "SELECT number_of_phases FROM scopes WHERE id = ?",
            [&scope_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    let Some(phase_count) = phase_count else {
        return Ok(json!({ "teams": [] }));
    };
    if phase > phase_count {
        return Err(HandlerErr::bad_params(format!(
            "phase {} exceeds scope's {} phases",
            phase, phase_count
        )));
    }

    let mut sql = String::from(
        "SELECT t.id, t.name, t.status, p.id, p.title,
                (SELECT COUNT(*) FROM team_members tm WHERE tm.team_id = t.id AND tm.approved = 1)
         FROM teams t
         LEFT JOIN projects p ON p.team_id = t.id
         WHERE t.scope_id = ?
           AND (p.id IS NOT NULL OR EXISTS(
                 SELECT 1 FROM project_requests pr
                 WHERE pr.team_id = t.id AND pr.status = 'PENDING'))
           AND NOT EXISTS(
                 SELECT 1 FROM reviews r
                 WHERE r.team_id = t.id AND r.review_phase = ?
                   AND r.status = 'COMPLETED' AND r.superseded = 0)",
    );
    let mut binds: Vec<Value> = vec![Value::Text(scope_id), Value::Integer(phase)];

    if let Some(status) = get_opt_str(params, "status") {
        let Some(status) = TeamStatus::parse(&status) else {
            return Err(HandlerErr::bad_params(format!("unknown team status: {}", status)));
        };
        sql.push_str(" AND t.status = ?");
        binds.push(Value::Text(status.as_str().to_string()));
    }

    if let Some(search) = get_opt_str(params, "search") {
        let needle = search.trim().to_lowercase();
        if !needle.is_empty() {
            let pattern = format!("%{}%", needle);
            sql.push_str(
                " AND (EXISTS(
                     SELECT 1 FROM team_members tm
                     JOIN users u ON u.id = tm.user_id
                     WHERE tm.team_id = t.id
                       AND (lower(u.name) LIKE ? OR lower(coalesce(u.roll_no, '')) LIKE ?))
                   OR lower(coalesce(p.title, '')) LIKE ?)",
            );
            binds.push(Value::Text(pattern.clone()));
            binds.push(Value::Text(pattern.clone()));
            binds.push(Value::Text(pattern));
        }
    }

    sql.push_str(" ORDER BY t.name, t.id");

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
    let teams = stmt
        .query_map(params_from_iter(binds), |r| {
            let id: String = r.get(0)?;
            let name: String = r.get(1)?;
            let status: String = r.get(2)?;
            let project_id: Option<String> = r.get(3)?;
            let project_title: Option<String> = r.get(4)?;
            let member_count: i64 = r.get(5)?;
            Ok(json!({
                "id": id,
                "name": name,
                "status": status,
                "projectId": project_id,
                "projectTitle": project_title,
                "approvedMemberCount": member_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(json!({ "teams": teams }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reviews.eligibleTeams" => Some(dispatch(state, req, eligible_teams)),
        _ => None,
    }
}
