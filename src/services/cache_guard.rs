// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Cache generation guard.
//!
//! When the build's cache generation differs from the one persisted on this
//! device, all locally persisted app data is wiped once and the page is
//! reloaded. Two guards keep this from looping: an in-flight flag on the
//! guard itself, and a session-tier transition flag that survives the
//! reload for a short while.

use crate::config::Config;
use crate::db::DocumentBackend;
use crate::shell::AppShell;
use crate::storage::{flags, keys, CacheStorage, KeyValueStore, LocalDatabases, StorageTiers};
use futures_util::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// State reported to the host while the guard runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// A wipe is in progress; the host should block the UI.
    Updating,
}

impl CacheState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheState::Updating => "updating",
        }
    }
}

/// Local database names owned by the auth provider. Never deleted, so a
/// wipe does not sign the user out.
const AUTH_DATABASE_PREFIXES: [&str; 2] = ["firebaseLocalStorage", "firebase-heartbeat"];

/// Whether a local database holds app data that a wipe must remove.
pub fn is_app_owned_database(name: &str, project_id: &str) -> bool {
    if AUTH_DATABASE_PREFIXES.iter().any(|p| name.starts_with(p)) {
        return false;
    }
    name.starts_with("firestore/") || (!project_id.is_empty() && name.contains(project_id))
}

/// Cache generation guard.
pub struct CacheGuard {
    cache_version: String,
    project_id: String,
    reload_delay: Duration,
    transition_flag_ttl: Duration,
    tiers: StorageTiers,
    backend: Arc<dyn DocumentBackend>,
    databases: Arc<dyn LocalDatabases>,
    caches: Arc<dyn CacheStorage>,
    shell: Arc<dyn AppShell>,
    clearing: AtomicBool,
}

impl CacheGuard {
    pub fn new(
        config: &Config,
        tiers: StorageTiers,
        backend: Arc<dyn DocumentBackend>,
        databases: Arc<dyn LocalDatabases>,
        caches: Arc<dyn CacheStorage>,
        shell: Arc<dyn AppShell>,
    ) -> Self {
        Self {
            cache_version: config.cache_version.clone(),
            project_id: config.gcp_project_id.clone(),
            reload_delay: config.reload_delay,
            transition_flag_ttl: config.transition_flag_ttl,
            tiers,
            backend,
            databases,
            caches,
            shell,
            clearing: AtomicBool::new(false),
        }
    }

    /// Wipe local state if the cache generation changed.
    ///
    /// Returns `true` when a wipe and reload were initiated (or a reload for
    /// one is already under way); the caller should then stop and wait for
    /// the reload. With a redirect sign-in pending the wipe still runs but
    /// no reload is scheduled, and the result is `false` so the caller goes
    /// on to resolve the sign-in. `on_state_change` is called at most once,
    /// before any data is removed.
    pub async fn check_and_clear<F>(&self, on_state_change: F) -> bool
    where
        F: FnOnce(CacheState) + Send,
    {
        let saved = self.tiers.durable.get(keys::APP_CACHE_VERSION);
        if saved.as_deref() == Some(self.cache_version.as_str()) {
            return false;
        }

        if self.clearing.load(Ordering::SeqCst) {
            tracing::warn!("Cache clear already running, skipping");
            return false;
        }

        if self.tiers.session.get(keys::UPDATING_CACHE_VERSION).as_deref() == Some("true") {
            tracing::warn!("Already updating, skipping refresh cycle");
            return true;
        }

        if self
            .clearing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        tracing::info!(
            saved = ?saved,
            current = %self.cache_version,
            "Detected new cache version, clearing cache"
        );

        if let Err(e) = self.tiers.session.set(keys::UPDATING_CACHE_VERSION, "true") {
            tracing::warn!(error = %e, "Could not set transition flag");
        }
        on_state_change(CacheState::Updating);

        self.terminate_backend().await;
        self.delete_app_databases().await;
        self.delete_caches().await;

        match self.tiers.durable.set(keys::APP_CACHE_VERSION, &self.cache_version) {
            Ok(()) => tracing::info!(version = %self.cache_version, "App cache version active and clean"),
            Err(e) => tracing::warn!(error = %e, "Could not save app_cache_version"),
        }

        let reloading = !flags::redirect_login_pending(self.tiers.durable.as_ref());
        if reloading {
            self.schedule_reload();
        } else {
            tracing::info!("Redirect sign-in pending, not reloading");
        }

        self.clearing.store(false, Ordering::SeqCst);
        self.schedule_flag_expiry();
        reloading
    }

    async fn terminate_backend(&self) {
        match self.backend.terminate().await {
            Ok(()) => tracing::info!("Backend terminated"),
            Err(e) => tracing::warn!(error = %e, "Backend not initialized or already terminated"),
        }
    }

    async fn delete_app_databases(&self) {
        let names = match self.databases.database_names().await {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!(error = %e, "Local database cleanup skipped");
                return;
            }
        };

        let owned: Vec<&String> = names
            .iter()
            .filter(|name| is_app_owned_database(name, &self.project_id))
            .collect();
        let results = join_all(owned.iter().map(|name| self.databases.delete_database(name))).await;

        for (name, result) in owned.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!(database = %name, error = %e, "Local database delete failed");
            }
        }
        tracing::info!(deleted = owned.len(), "Cleaned local databases");
    }

    async fn delete_caches(&self) {
        let names = match self.caches.keys().await {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!(error = %e, "Cache cleanup skipped");
                return;
            }
        };

        let results = join_all(names.iter().map(|name| self.caches.delete(name))).await;
        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            tracing::warn!(failed, "Some caches could not be deleted");
        }
        tracing::info!(count = names.len(), "Named caches cleared");
    }

    fn schedule_reload(&self) {
        let shell = self.shell.clone();
        let session = self.tiers.session.clone();
        let delay = self.reload_delay;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            shell.on_before_unload(Box::new(move || clear_transition_flag(session.as_ref())));
            if let Err(e) = shell.reload() {
                tracing::warn!(error = %e, "Reload failed, redirecting to root");
                shell.hard_navigate("/");
            }
        });
    }

    fn schedule_flag_expiry(&self) {
        let session = self.tiers.session.clone();
        let ttl = self.transition_flag_ttl;

        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            clear_transition_flag(session.as_ref());
        });
    }
}

fn clear_transition_flag(session: &dyn KeyValueStore) {
    if let Err(e) = session.remove(keys::UPDATING_CACHE_VERSION) {
        tracing::warn!(error = %e, "Could not remove transition flag");
    }
}
