//! Persisted client flags: login method, onboarding progress, drawer
//! preference.

use crate::storage::{keys, KeyValueStore, StorageTiers};
use std::fmt;

/// How the user started signing in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginMethod {
    Popup,
    Redirect,
}

impl LoginMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginMethod::Popup => "popup",
            LoginMethod::Redirect => "redirect",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "popup" => Some(LoginMethod::Popup),
            "redirect" => Some(LoginMethod::Redirect),
            _ => None,
        }
    }
}

impl fmt::Display for LoginMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record the login method in both tiers.
///
/// Redirect flows can lose the session tier on some browsers, so the durable
/// copy is the fallback. Failures are logged, never returned.
pub fn set_login_method(tiers: &StorageTiers, method: LoginMethod) {
    for (tier, store) in [("session", &tiers.session), ("durable", &tiers.durable)] {
        if let Err(e) = store.set(keys::LOGIN_METHOD, method.as_str()) {
            tracing::warn!(tier, error = %e, "Unable to store login method");
        }
    }
}

/// Read the login method (session tier first) and remove it from both tiers.
pub fn take_login_method(tiers: &StorageTiers) -> Option<LoginMethod> {
    let raw = tiers
        .session
        .get(keys::LOGIN_METHOD)
        .or_else(|| tiers.durable.get(keys::LOGIN_METHOD))?;
    clear_login_method(tiers);
    LoginMethod::parse(&raw)
}

/// Remove the login method from both tiers.
pub fn clear_login_method(tiers: &StorageTiers) {
    for store in [&tiers.session, &tiers.durable] {
        if let Err(e) = store.remove(keys::LOGIN_METHOD) {
            tracing::warn!(error = %e, "Unable to clear login method");
        }
    }
}

/// Whether a redirect sign-in is in flight (the page is about to leave).
pub fn redirect_login_pending(durable: &dyn KeyValueStore) -> bool {
    durable.get(keys::LOGIN_METHOD).as_deref() == Some(LoginMethod::Redirect.as_str())
}

/// Onboarding progress persisted on the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OnboardingFlags {
    pub onboarding_completed: bool,
    pub survey_completed: bool,
}

impl OnboardingFlags {
    pub fn read(durable: &dyn KeyValueStore) -> Self {
        Self {
            onboarding_completed: is_yes(durable, keys::ONBOARDING_COMPLETED),
            survey_completed: is_yes(durable, keys::SURVEY_COMPLETED),
        }
    }
}

fn is_yes(store: &dyn KeyValueStore, key: &str) -> bool {
    store.get(key).as_deref() == Some("yes")
}

pub fn mark_onboarding_completed(durable: &dyn KeyValueStore) -> crate::error::Result<()> {
    durable.set(keys::ONBOARDING_COMPLETED, "yes")
}

pub fn mark_survey_completed(durable: &dyn KeyValueStore) -> crate::error::Result<()> {
    durable.set(keys::SURVEY_COMPLETED, "yes")
}

/// Drawer swipe direction stored on the device, if any.
pub fn stored_drawer_swipe_rtl(durable: &dyn KeyValueStore) -> Option<bool> {
    match durable.get(keys::DRAWER_SWIPE_RTL)?.as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}
