use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use serde::Deserialize;

use crate::config::PortalConfig;
use crate::scheduler::SharedNightlyTarget;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub config: PortalConfig,
    /// Shared with the nightly thread; rewritten on workspace switch.
    pub nightly_target: SharedNightlyTarget,
    pub nightly_started: bool,
}

impl AppState {
    pub fn new() -> AppState {
        AppState {
            workspace: None,
            db: None,
            config: PortalConfig::default(),
            nightly_target: Arc::new(Mutex::new(None)),
            nightly_started: false,
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        AppState::new()
    }
}
