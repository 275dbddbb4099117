//! Nightly stale-review reassignment job.
//!
//! Runs once per day at the configured trigger time. A PENDING review
//! whose scheduled time is more than the staleness threshold in the past
//! is moved to the team's next upcoming lab session: the review takes the
//! session's faculty and start time, and a review assignment is ensured
//! for that faculty. Reviews with no upcoming session stay PENDING and
//! are only flagged in the log for manual intervention.

use chrono::{Duration, NaiveDateTime};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::PortalConfig;
use crate::db;
use crate::timewindow::{self, format_ts};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    pub examined: usize,
    pub stale: usize,
    pub reassigned: usize,
    pub flagged: usize,
    pub failed: usize,
}

struct PendingReview {
    id: String,
    team_id: String,
    review_phase: i64,
    scheduled_at: String,
    project_id: Option<String>,
}

/// One scheduling tick. `now` is injected so diagnostics and tests can
/// replay a tick at any instant. A failure on one review is logged and
/// counted; the remaining reviews are still processed.
pub fn run_reassignment_tick(
    conn: &Connection,
    now: NaiveDateTime,
    cfg: &PortalConfig,
) -> anyhow::Result<TickReport> {
    let mut stmt = conn.prepare(
        "SELECT r.id, r.team_id, r.review_phase, r.scheduled_at, p.id
         FROM reviews r
         LEFT JOIN projects p ON p.team_id = r.team_id
         WHERE r.status = 'PENDING' AND r.superseded = 0
         ORDER BY r.scheduled_at, r.id",
    )?;
    let pending = stmt
        .query_map([], |r| {
            Ok(PendingReview {
                id: r.get(0)?,
                team_id: r.get(1)?,
                review_phase: r.get(2)?,
                scheduled_at: r.get(3)?,
                project_id: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut report = TickReport {
        examined: pending.len(),
        ..TickReport::default()
    };
    let threshold = Duration::hours(cfg.staleness_hours);

    for review in &pending {
        let Some(scheduled_at) = timewindow::parse_ts(&review.scheduled_at) else {
            warn!(review = %review.id, value = %review.scheduled_at, "unparseable scheduled time");
            report.failed += 1;
            continue;
        };
        if now - scheduled_at <= threshold {
            // Not stale yet; expected steady state.
            continue;
        }
        report.stale += 1;

        match reassign_stale_review(conn, review, now) {
            Ok(Some((faculty_id, start_time))) => {
                info!(
                    review = %review.id,
                    team = %review.team_id,
                    faculty = %faculty_id,
                    scheduled_at = %start_time,
                    "stale review reassigned"
                );
                report.reassigned += 1;
            }
            Ok(None) => {
                warn!(
                    review = %review.id,
                    team = %review.team_id,
                    "stale review has no upcoming lab session; manual intervention needed"
                );
                report.flagged += 1;
            }
            Err(e) => {
                error!(review = %review.id, error = %e, "stale review reassignment failed");
                report.failed += 1;
            }
        }
    }

    Ok(report)
}

/// Returns the (faculty, start time) the review was moved to, or `None`
/// when the team has no upcoming session.
fn reassign_stale_review(
    conn: &Connection,
    review: &PendingReview,
    now: NaiveDateTime,
) -> rusqlite::Result<Option<(String, String)>> {
    let now_str = format_ts(now);
    let session: Option<(String, String)> = conn
        .query_row(
            "SELECT s.faculty_id, s.start_time
             FROM lab_sessions s
             JOIN lab_session_students ls ON ls.session_id = s.id
             JOIN team_members tm ON tm.user_id = ls.student_id
             WHERE tm.team_id = ? AND s.start_time > ?
             ORDER BY s.start_time, s.id
             LIMIT 1",
            (&review.team_id, &now_str),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;

    let Some((faculty_id, start_time)) = session else {
        return Ok(None);
    };

    conn.execute(
        "UPDATE reviews SET faculty_id = ?, scheduled_at = ? WHERE id = ?",
        (&faculty_id, &start_time, &review.id),
    )?;

    match &review.project_id {
        Some(project_id) => {
            ensure_assignment(conn, project_id, &faculty_id, review.review_phase, &start_time)?;
        }
        None => {
            warn!(
                review = %review.id,
                team = %review.team_id,
                "team has no project; review assignment not ensured"
            );
        }
    }

    Ok(Some((faculty_id, start_time)))
}

/// Creates an OFFLINE, permanent-access assignment for the triple when
/// none exists. An existing assignment is never touched so broader
/// access is not shortened.
fn ensure_assignment(
    conn: &Connection,
    project_id: &str,
    faculty_id: &str,
    review_phase: i64,
    access_starts_at: &str,
) -> rusqlite::Result<()> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM review_assignments
             WHERE project_id = ? AND faculty_id = ? AND review_phase = ?",
            (&project_id, &faculty_id, &review_phase),
            |r| r.get(0),
        )
        .optional()?;
    if existing.is_some() {
        return Ok(());
    }

    conn.execute(
        "INSERT INTO review_assignments(
            id, project_id, faculty_id, review_phase, mode, access_starts_at, access_expires_at)
         VALUES(?, ?, ?, ?, 'OFFLINE', ?, NULL)",
        (
            &Uuid::new_v4().to_string(),
            &project_id,
            &faculty_id,
            &review_phase,
            &access_starts_at,
        ),
    )?;
    Ok(())
}

/// Where the nightly job runs: the active workspace and its config.
/// `workspace.select` rewrites this in place so the single timer thread
/// follows workspace switches instead of ticking against the first one
/// forever.
#[derive(Clone)]
pub struct NightlyTarget {
    pub workspace: PathBuf,
    pub config: PortalConfig,
}

pub type SharedNightlyTarget = Arc<Mutex<Option<NightlyTarget>>>;

fn current_target(target: &SharedNightlyTarget) -> Option<NightlyTarget> {
    match target.lock() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// Arms the daily timer thread. The thread owns its own connection per
/// tick so it never contends with the IPC loop's handle, and it never
/// panics the host process. The target is re-read on every tick.
pub fn spawn_nightly(target: SharedNightlyTarget) {
    let spawned = std::thread::Builder::new()
        .name("nightly-reassignment".to_string())
        .spawn(move || loop {
            let trigger = current_target(&target)
                .map(|t| t.config.nightly_trigger_time())
                .unwrap_or_else(|| PortalConfig::default().nightly_trigger_time());
            let now = chrono::Local::now().naive_local();
            let next = timewindow::next_trigger_after(now, trigger);
            info!(next_run = %format_ts(next), "nightly reassignment scheduled");
            let wait = (next - now)
                .to_std()
                .unwrap_or(std::time::Duration::from_secs(60));
            std::thread::sleep(wait);

            // The workspace may have been switched while we slept.
            let Some(tick_target) = current_target(&target) else {
                continue;
            };
            match db::open_db(&tick_target.workspace) {
                Ok(conn) => {
                    let tick_now = chrono::Local::now().naive_local();
                    match run_reassignment_tick(&conn, tick_now, &tick_target.config) {
                        Ok(report) => info!(?report, "nightly reassignment tick finished"),
                        Err(e) => error!(error = %e, "nightly reassignment tick failed"),
                    }
                }
                Err(e) => error!(error = %e, "nightly job could not open workspace db"),
            }
        });
    if let Err(e) = spawned {
        error!(error = %e, "could not start nightly reassignment thread");
    }
}
