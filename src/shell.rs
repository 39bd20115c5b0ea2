// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Host window and router seams.
//!
//! The rendering host owns page lifecycle and routing. The core asks it to
//! reload, to run cleanups before unload, and to replace the current route.

use crate::error::{AppError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Page lifecycle of the host.
pub trait AppShell: Send + Sync {
    /// Run `cleanup` when the page is about to unload.
    fn on_before_unload(&self, cleanup: Box<dyn FnOnce() + Send>);

    /// Full page reload.
    fn reload(&self) -> Result<()>;

    /// Hard navigation to `url`, used when a reload is not possible.
    fn hard_navigate(&self, url: &str);
}

/// Client-side router.
pub trait Navigator: Send + Sync {
    fn current_path(&self) -> String;

    /// Navigate to `path`, replacing the current history entry.
    fn replace(&self, path: &str);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shell for headless hosts: a reload runs the unload cleanups and is
/// counted.
#[derive(Default)]
pub struct HeadlessShell {
    cleanups: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
    reloads: Mutex<u32>,
    navigations: Mutex<Vec<String>>,
    fail_reload: AtomicBool,
}

impl HeadlessShell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `reload` fail, as when the host refuses to unload.
    pub fn set_fail_reload(&self, fail: bool) {
        self.fail_reload.store(fail, Ordering::SeqCst);
    }

    pub fn reload_count(&self) -> u32 {
        *lock(&self.reloads)
    }

    pub fn hard_navigations(&self) -> Vec<String> {
        lock(&self.navigations).clone()
    }

    pub fn pending_cleanups(&self) -> usize {
        lock(&self.cleanups).len()
    }
}

impl AppShell for HeadlessShell {
    fn on_before_unload(&self, cleanup: Box<dyn FnOnce() + Send>) {
        lock(&self.cleanups).push(cleanup);
    }

    fn reload(&self) -> Result<()> {
        if self.fail_reload.load(Ordering::SeqCst) {
            return Err(AppError::Internal(anyhow::anyhow!("reload blocked by host")));
        }
        let cleanups: Vec<_> = lock(&self.cleanups).drain(..).collect();
        for cleanup in cleanups {
            cleanup();
        }
        *lock(&self.reloads) += 1;
        tracing::info!("Page reload");
        Ok(())
    }

    fn hard_navigate(&self, url: &str) {
        tracing::info!(url, "Hard navigation");
        lock(&self.navigations).push(url.to_string());
    }
}

/// Router keeping the current path and the navigation history in memory.
pub struct MemoryNavigator {
    current: Mutex<String>,
    history: Mutex<Vec<String>>,
}

impl MemoryNavigator {
    pub fn new(initial: &str) -> Self {
        Self {
            current: Mutex::new(initial.to_string()),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Simulate the user navigating (not a redirect by the core).
    pub fn visit(&self, path: &str) {
        *lock(&self.current) = path.to_string();
    }

    /// Paths the core redirected to, in order.
    pub fn redirects(&self) -> Vec<String> {
        lock(&self.history).clone()
    }
}

impl Navigator for MemoryNavigator {
    fn current_path(&self) -> String {
        lock(&self.current).clone()
    }

    fn replace(&self, path: &str) {
        tracing::debug!(path, "Route replaced");
        *lock(&self.current) = path.to_string();
        lock(&self.history).push(path.to_string());
    }
}
