//! Diagnostic surface for the nightly reassignment job: run one tick on
//! demand, optionally replaying it at an injected instant. The scheduled
//! run itself lives on the background thread and has no IPC surface.

use rusqlite::Connection;
use serde_json::json;

use crate::config::PortalConfig;
use crate::ipc::helpers::{dispatch_cfg, get_opt_str, now_local, parse_datetime_param, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::scheduler;

fn run_tick(
    conn: &Connection,
    cfg: &PortalConfig,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let now = match get_opt_str(params, "now") {
        Some(raw) => parse_datetime_param(&raw, "now")?,
        None => now_local(),
    };

    let report = scheduler::run_reassignment_tick(conn, now, cfg).map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    })?;

    Ok(json!({
        "examined": report.examined,
        "stale": report.stale,
        "reassigned": report.reassigned,
        "flagged": report.flagged,
        "failed": report.failed
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "scheduler.runTick" => Some(dispatch_cfg(state, req, run_tick)),
        _ => None,
    }
}
