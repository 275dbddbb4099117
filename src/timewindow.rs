use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime, Weekday};

use crate::config::PortalConfig;

/// Storage format for every timestamp column. Local-naive, and
/// lexicographic order matches chronological order, so TEXT comparisons
/// in SQL are safe.
pub const TIMESTAMP_FMT: &str = "%Y-%m-%dT%H:%M:%S";

pub fn format_ts(dt: NaiveDateTime) -> String {
    dt.format(TIMESTAMP_FMT).to_string()
}

pub fn parse_ts(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s.trim(), TIMESTAMP_FMT).ok()
}

/// The daily college working window. Sundays are always excluded; the
/// window itself comes from [`PortalConfig`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl WorkWindow {
    pub fn from_config(cfg: &PortalConfig) -> WorkWindow {
        WorkWindow {
            start: cfg.work_start_time(),
            end: cfg.work_end_time(),
        }
    }
}

/// Seconds of `[start, end)` that fall inside the working window on
/// working days (Mon-Sat). Walks day by day, clamping each day's window
/// to the overlap with the requested interval. Returns 0 when
/// `start >= end`; never negative.
pub fn college_seconds_between(window: &WorkWindow, start: NaiveDateTime, end: NaiveDateTime) -> i64 {
    if start >= end {
        return 0;
    }
    let mut total: i64 = 0;
    let mut day = start.date();
    while day <= end.date() {
        if day.weekday() != Weekday::Sun {
            let day_open = day.and_time(window.start);
            let day_close = day.and_time(window.end);
            let lo = if start > day_open { start } else { day_open };
            let hi = if end < day_close { end } else { day_close };
            if lo < hi {
                total += (hi - lo).num_seconds();
            }
        }
        day = match day.succ_opt() {
            Some(d) => d,
            None => break,
        };
    }
    total
}

/// True when `at` is a working instant: not a Sunday and the time-of-day
/// lies in `[window.start, window.end)`.
pub fn is_college_working_hour(window: &WorkWindow, at: NaiveDateTime) -> bool {
    at.weekday() != Weekday::Sun && at.time() >= window.start && at.time() < window.end
}

/// Access windows must never expire on a Sunday; an expiry that lands
/// there silently cuts access during a non-working day. Returns the
/// repaired timestamp (exactly 24h later, Monday same time-of-day) when
/// the input falls on a Sunday, `None` otherwise.
pub fn correct_sunday_expiry(expires_at: NaiveDateTime) -> Option<NaiveDateTime> {
    if expires_at.weekday() == Weekday::Sun {
        Some(expires_at + Duration::hours(24))
    } else {
        None
    }
}

/// Next daily occurrence of `trigger` strictly after `now`.
pub fn next_trigger_after(now: NaiveDateTime, trigger: NaiveTime) -> NaiveDateTime {
    let today = now.date().and_time(trigger);
    if today > now {
        today
    } else {
        match now.date().succ_opt() {
            Some(d) => d.and_time(trigger),
            None => today,
        }
    }
}
