//! Scope countdown timers. The clock only burns during college working
//! hours, so elapsed time is always measured with the working-window
//! calculator rather than raw wall time.

use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use crate::config::PortalConfig;
use crate::ipc::helpers::{
    dispatch_cfg, get_opt_f64, get_opt_str, get_required_str, now_local, parse_datetime_param,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::timewindow::{self, format_ts, WorkWindow};

/// Timer arithmetic is pure in `now`; accepting it as a param keeps the
/// burn calculation replayable at any instant (same convention as
/// `scheduler.runTick`).
fn now_param(params: &serde_json::Value) -> Result<chrono::NaiveDateTime, HandlerErr> {
    match get_opt_str(params, "now") {
        Some(raw) => parse_datetime_param(&raw, "now"),
        None => Ok(now_local()),
    }
}

struct TimerRow {
    total_hours: Option<f64>,
    is_running: bool,
    remaining_seconds: Option<i64>,
    last_updated: Option<String>,
}

fn load_timer(conn: &Connection, scope_id: &str) -> Result<TimerRow, HandlerErr> {
    let row: Option<TimerRow> = conn
        .query_row(
            "SELECT timer_total_hours, is_timer_running, current_remaining_seconds, timer_last_updated
             FROM scopes WHERE id = ?",
            [scope_id],
            |r| {
                Ok(TimerRow {
                    total_hours: r.get(0)?,
                    is_running: r.get::<_, i64>(1)? != 0,
                    remaining_seconds: r.get(2)?,
                    last_updated: r.get(3)?,
                })
            },
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    row.ok_or_else(|| HandlerErr::not_found("scope not found"))
}

/// Remaining seconds as of `now` for a running timer.
fn remaining_now(timer: &TimerRow, window: &WorkWindow, now: chrono::NaiveDateTime) -> i64 {
    let stored = timer.remaining_seconds.unwrap_or(0);
    if !timer.is_running {
        return stored.max(0);
    }
    let elapsed = timer
        .last_updated
        .as_deref()
        .and_then(timewindow::parse_ts)
        .map(|last| timewindow::college_seconds_between(window, last, now))
        .unwrap_or(0);
    (stored - elapsed).max(0)
}

fn timer_start(
    conn: &Connection,
    cfg: &PortalConfig,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let scope_id = get_required_str(params, "scopeId")?;
    let total_hours = get_opt_f64(params, "totalHours");
    if let Some(h) = total_hours {
        if h <= 0.0 {
            return Err(HandlerErr::bad_params("totalHours must be positive"));
        }
    }
    let timer = load_timer(conn, &scope_id)?;
    let window = WorkWindow::from_config(cfg);
    let now = now_param(params)?;

    let remaining = if let Some(h) = total_hours {
        (h * 3600.0) as i64
    } else if timer.is_running {
        // Already running; just resync the snapshot.
        remaining_now(&timer, &window, now)
    } else if let Some(stored) = timer.remaining_seconds.filter(|s| *s > 0) {
        stored
    } else if let Some(h) = timer.total_hours {
        (h * 3600.0) as i64
    } else {
        return Err(HandlerErr::bad_params("no timer duration configured for scope"));
    };

    conn.execute(
        "UPDATE scopes SET
           is_timer_running = 1,
           current_remaining_seconds = ?,
           timer_last_updated = ?,
           timer_total_hours = coalesce(?, timer_total_hours)
         WHERE id = ?",
        (remaining, &format_ts(now), total_hours, &scope_id),
    )
    .map_err(|e| HandlerErr::db_update(e, "scopes"))?;

    Ok(json!({ "scopeId": scope_id, "isRunning": true, "remainingSeconds": remaining }))
}

fn timer_pause(
    conn: &Connection,
    cfg: &PortalConfig,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let scope_id = get_required_str(params, "scopeId")?;
    let timer = load_timer(conn, &scope_id)?;
    let window = WorkWindow::from_config(cfg);
    let now = now_param(params)?;
    let remaining = remaining_now(&timer, &window, now);

    if timer.is_running {
        conn.execute(
            "UPDATE scopes SET
               is_timer_running = 0,
               current_remaining_seconds = ?,
               timer_last_updated = ?
             WHERE id = ?",
            (remaining, &format_ts(now), &scope_id),
        )
        .map_err(|e| HandlerErr::db_update(e, "scopes"))?;
    }

    Ok(json!({ "scopeId": scope_id, "isRunning": false, "remainingSeconds": remaining }))
}

fn timer_status(
    conn: &Connection,
    cfg: &PortalConfig,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let scope_id = get_required_str(params, "scopeId")?;
    let timer = load_timer(conn, &scope_id)?;
    let window = WorkWindow::from_config(cfg);
    let now = now_param(params)?;
    let remaining = remaining_now(&timer, &window, now);

    if timer.is_running {
        // Fold the burn into the stored snapshot so long-running scopes
        // survive a daemon restart without losing elapsed time.
        conn.execute(
            "UPDATE scopes SET current_remaining_seconds = ?, timer_last_updated = ? WHERE id = ?",
            (remaining, &format_ts(now), &scope_id),
        )
        .map_err(|e| HandlerErr::db_update(e, "scopes"))?;
    }

    Ok(json!({
        "scopeId": scope_id,
        "isRunning": timer.is_running,
        "remainingSeconds": remaining,
        "totalHours": timer.total_hours
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "scopes.timerStart" => Some(dispatch_cfg(state, req, timer_start)),
        "scopes.timerPause" => Some(dispatch_cfg(state, req, timer_pause)),
        "scopes.timerStatus" => Some(dispatch_cfg(state, req, timer_status)),
        _ => None,
    }
}
