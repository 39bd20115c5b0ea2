//! Global application settings document.

use serde::{Deserialize, Serialize};

/// Settings stored at `app_settings/global`, readable by guests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Emit per-step auth timing traces.
    pub trace_auth_process: bool,
    pub maintenance_mode: bool,
    /// Oldest client version still allowed to talk to the backend.
    pub min_supported_version: Option<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            trace_auth_process: true,
            maintenance_mode: false,
            min_supported_version: None,
        }
    }
}
