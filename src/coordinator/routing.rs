// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Post-auth routing decision.

use crate::storage::OnboardingFlags;

pub const ROOT: &str = "/";
pub const HOME: &str = "/home";
pub const SIGN_IN: &str = "/login";
pub const ONBOARDING: &str = "/onboarding";
pub const SURVEY: &str = "/bubbles-survey";

/// Routes reachable without a signed-in user (prefix match).
pub const PUBLIC_PATHS: [&str; 3] = [SIGN_IN, ONBOARDING, SURVEY];

pub fn is_public(path: &str) -> bool {
    PUBLIC_PATHS.iter().any(|p| path.starts_with(p))
}

/// Where to redirect from `path`, if anywhere.
///
/// Checks run in priority order and the first match wins: sign-in for
/// guests off public routes, then onboarding, then the survey, then home for
/// signed-in users sitting on the entry or sign-in route. A pending step
/// keeps the user on its own route.
pub fn decide(signed_in: bool, path: &str, flags: OnboardingFlags) -> Option<&'static str> {
    if !signed_in && !is_public(path) {
        return Some(SIGN_IN);
    }
    if !flags.onboarding_completed {
        return (path != ONBOARDING).then_some(ONBOARDING);
    }
    if !flags.survey_completed {
        return (path != SURVEY).then_some(SURVEY);
    }
    if signed_in && (path == ROOT || path == SIGN_IN) {
        return Some(HOME);
    }
    None
}
