use chrono::NaiveTime;
use serde::Deserialize;
use std::path::Path;

/// Portal-wide scheduling constants. Defaults mirror the college timetable;
/// a workspace may override them via `portal.json` in the workspace root.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PortalConfig {
    /// Start of the college working window, "HH:MM".
    pub work_start: String,
    /// End of the college working window, "HH:MM".
    pub work_end: String,
    /// A PENDING review whose scheduled time is older than this is stale.
    pub staleness_hours: i64,
    /// Wall-clock time the nightly reassignment job fires, "HH:MM".
    pub nightly_trigger: String,
}

impl Default for PortalConfig {
    fn default() -> Self {
        PortalConfig {
            work_start: "08:45".to_string(),
            work_end: "16:20".to_string(),
            staleness_hours: 16,
            nightly_trigger: "00:00".to_string(),
        }
    }
}

impl PortalConfig {
    /// Loads `<workspace>/portal.json` if present, otherwise defaults.
    /// A malformed file is logged and ignored rather than blocking startup.
    pub fn load(workspace: &Path) -> PortalConfig {
        let path = workspace.join("portal.json");
        let Ok(raw) = std::fs::read_to_string(&path) else {
            return PortalConfig::default();
        };
        match serde_json::from_str(&raw) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring malformed portal.json");
                PortalConfig::default()
            }
        }
    }

    pub fn work_start_time(&self) -> NaiveTime {
        parse_hm(&self.work_start, 8, 45)
    }

    pub fn work_end_time(&self) -> NaiveTime {
        parse_hm(&self.work_end, 16, 20)
    }

    pub fn nightly_trigger_time(&self) -> NaiveTime {
        parse_hm(&self.nightly_trigger, 0, 0)
    }
}

fn parse_hm(s: &str, fallback_h: u32, fallback_m: u32) -> NaiveTime {
    NaiveTime::parse_from_str(s.trim(), "%H:%M").unwrap_or_else(|_| {
        NaiveTime::from_hms_opt(fallback_h, fallback_m, 0).unwrap_or(NaiveTime::MIN)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_college_timetable() {
        let cfg = PortalConfig::default();
        assert_eq!(cfg.work_start_time(), NaiveTime::from_hms_opt(8, 45, 0).unwrap());
        assert_eq!(cfg.work_end_time(), NaiveTime::from_hms_opt(16, 20, 0).unwrap());
        assert_eq!(cfg.staleness_hours, 16);
        assert_eq!(cfg.nightly_trigger_time(), NaiveTime::from_hms_opt(0, 0, 0).unwrap());
    }

    #[test]
    fn bad_time_string_falls_back() {
        let cfg = PortalConfig {
            work_start: "late-ish".to_string(),
            ..PortalConfig::default()
        };
        assert_eq!(cfg.work_start_time(), NaiveTime::from_hms_opt(8, 45, 0).unwrap());
    }
}
