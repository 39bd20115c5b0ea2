// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the session core.

pub mod identity;
pub mod insights;
pub mod merge;
pub mod settings;
pub mod user;

pub use identity::Identity;
pub use insights::{DailyInsights, InsightItem};
pub use merge::{deep_merge, merged};
pub use settings::AppSettings;
pub use user::{AuthData, Prefs, ProfileData, ProfileSection, UserProfile};
