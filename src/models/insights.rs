//! Daily business insights shown in the drawer.

use serde::{Deserialize, Serialize};

/// Per-business insight feed stored at `insights/{uid}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DailyInsights {
    pub items: Vec<InsightItem>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InsightItem {
    pub label: String,
    pub value: String,
    /// "up" | "down" | "stable"
    pub trend: String,
    pub details: String,
}
