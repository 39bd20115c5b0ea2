// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Logging setup and auth-flow timing traces.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize structured JSON logging.
///
/// `RUST_LOG` overrides the default `smart_boss_session=debug,info` filter.
/// Calling this twice is harmless; the second call is ignored.
pub fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("smart_boss_session=debug,info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(format)
        .try_init();
}

/// Step timer for the auth flow.
///
/// Each step logs the milliseconds elapsed since the previous one, which is
/// how slow redirect resolution or listener attachment shows up in logs.
/// Disabled through the `trace_auth_process` app setting.
#[derive(Debug)]
pub struct AuthTimer {
    last: Mutex<Instant>,
    enabled: AtomicBool,
}

impl Default for AuthTimer {
    fn default() -> Self {
        Self {
            last: Mutex::new(Instant::now()),
            enabled: AtomicBool::new(true),
        }
    }
}

impl AuthTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Record a step. With `reset` the clock restarts at this step.
    ///
    /// Returns the elapsed time, or `None` when tracing is disabled.
    pub fn step(&self, step: &str, reset: bool) -> Option<std::time::Duration> {
        if !self.is_enabled() {
            return None;
        }

        let now = Instant::now();
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if reset {
            *last = now;
        }
        let elapsed = now.duration_since(*last);
        *last = now;

        tracing::debug!(
            step,
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "[AUTH TIMING]"
        );
        Some(elapsed)
    }
}
