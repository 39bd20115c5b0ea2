// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Client configuration loaded from environment variables.
//!
//! Timing knobs that the web client hardcoded (backoff, resubscribe delay,
//! reload delay) live here so tests and deployments can tune them.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Cache generation embedded at build time. Bump only when the local data
/// layout changes and every client must wipe its persisted state once.
pub const APP_CACHE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Retry policy for starting store listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts before the last-resort backend termination.
    pub max_retries: u32,
    /// Backoff after the first conflict; doubles on every further conflict.
    pub base_delay: Duration,
    /// Upper bound for a single backoff sleep.
    pub max_delay: Duration,
    /// Pause between backend termination and the final attempt.
    pub recovery_pause: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(300),
            max_delay: Duration::from_secs(30),
            recovery_pause: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Backoff to apply after the given (1-based) failed attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Cache generation this build expects.
    pub cache_version: String,
    /// GCP project ID (also used to recognize app-owned local databases)
    pub gcp_project_id: String,
    /// Endpoint serving public data for guest mode
    pub public_data_url: String,
    /// Directory for durable local state of the native runner
    pub data_dir: PathBuf,
    /// Email whose first-login profile is named "developer"
    pub developer_email: Option<String>,
    pub retry: RetryPolicy,
    /// Wait after unsubscribing before opening a replacement listener.
    pub resubscribe_delay: Duration,
    /// Delay before the post-clear reload.
    pub reload_delay: Duration,
    /// How long the "updating" session flag survives a completed clear.
    pub transition_flag_ttl: Duration,
    /// Poll interval of the Firestore snapshot feed.
    pub poll_interval: Duration,
}

impl Default for Config {
    /// Default config for testing only.
    fn default() -> Self {
        Self {
            cache_version: APP_CACHE_VERSION.to_string(),
            gcp_project_id: "test-project".to_string(),
            public_data_url: "http://127.0.0.1:5001/test-project/us-central1/getPublicData"
                .to_string(),
            data_dir: PathBuf::from(".smart-boss"),
            developer_email: None,
            retry: RetryPolicy::default(),
            resubscribe_delay: Duration::from_millis(300),
            reload_delay: Duration::from_millis(250),
            transition_flag_ttl: Duration::from_secs(2),
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let gcp_project_id =
            env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string());
        let defaults = RetryPolicy::default();

        Ok(Self {
            cache_version: env::var("APP_CACHE_VERSION")
                .unwrap_or_else(|_| APP_CACHE_VERSION.to_string()),
            public_data_url: env::var("PUBLIC_DATA_URL").unwrap_or_else(|_| {
                format!(
                    "http://127.0.0.1:5001/{}/us-central1/getPublicData",
                    gcp_project_id
                )
            }),
            data_dir: env::var("SMART_BOSS_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".smart-boss")),
            developer_email: env::var("DEV_LOCALHOST_USER_EMAIL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            retry: RetryPolicy {
                max_retries: parse_var("LISTEN_MAX_RETRIES", defaults.max_retries)?,
                base_delay: Duration::from_millis(parse_var("LISTEN_BACKOFF_MS", 300)?),
                max_delay: Duration::from_millis(parse_var("LISTEN_BACKOFF_CAP_MS", 30_000)?),
                recovery_pause: defaults.recovery_pause,
            },
            poll_interval: Duration::from_millis(parse_var("FIRESTORE_POLL_MS", 1_000)?),
            gcp_project_id,
            ..Self::default()
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}
