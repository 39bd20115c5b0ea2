// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Starts and stops every feature store as one unit.
//!
//! Signed-in sessions get live listeners (global stores always, per-user
//! stores only with a uid). Guests get a one-shot public-data load instead.
//! Both modes are guarded so repeated or concurrent calls collapse into one.

use crate::config::{Config, RetryPolicy};
use crate::db::DocumentBackend;
use crate::models::{AppSettings, DailyInsights};
use crate::services::feature_store::{DocumentStore, FeatureStore, StoreScope};
use crate::services::public_data::PublicDataSource;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Result of [`StoreOrchestrator::init_stores`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitOutcome {
    /// Listeners were started; `failed` names stores that could not attach.
    Started { failed: Vec<&'static str> },
    /// Stores were already initialized; nothing was done.
    AlreadyInitialized,
}

/// Store orchestrator.
pub struct StoreOrchestrator {
    backend: Arc<dyn DocumentBackend>,
    public_data: Arc<dyn PublicDataSource>,
    retry: RetryPolicy,
    settings: Arc<DocumentStore<AppSettings>>,
    insights: Arc<DocumentStore<DailyInsights>>,
    stores: Vec<Arc<dyn FeatureStore>>,
    initialized: AtomicBool,
    guest_initialized: AtomicBool,
    active_uid: RwLock<Option<String>>,
}

impl StoreOrchestrator {
    pub fn new(
        config: &Config,
        backend: Arc<dyn DocumentBackend>,
        public_data: Arc<dyn PublicDataSource>,
    ) -> Self {
        let settings = Arc::new(DocumentStore::app_settings(config, backend.clone()));
        let insights = Arc::new(DocumentStore::insights(config, backend.clone()));
        let stores = vec![
            settings.clone() as Arc<dyn FeatureStore>,
            insights.clone() as Arc<dyn FeatureStore>,
        ];

        Self {
            backend,
            public_data,
            retry: config.retry.clone(),
            settings,
            insights,
            stores,
            initialized: AtomicBool::new(false),
            guest_initialized: AtomicBool::new(false),
            active_uid: RwLock::new(None),
        }
    }

    pub fn settings(&self) -> &Arc<DocumentStore<AppSettings>> {
        &self.settings
    }

    pub fn insights(&self) -> &Arc<DocumentStore<DailyInsights>> {
        &self.insights
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn is_guest(&self) -> bool {
        self.guest_initialized.load(Ordering::SeqCst)
    }

    /// User the running listeners belong to.
    pub fn active_uid(&self) -> Option<String> {
        self.active_uid
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_active_uid(&self, uid: Option<&str>) {
        *self.active_uid.write().unwrap_or_else(PoisonError::into_inner) = uid.map(str::to_string);
    }

    /// Start every store's listener.
    ///
    /// Only the first call after construction or `stop_stores` does
    /// anything. Store failures are reported in the outcome, never raised.
    pub async fn init_stores(&self, uid: Option<&str>) -> InitOutcome {
        if self
            .initialized
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!("initStores called but listeners already active, skipping");
            return InitOutcome::AlreadyInitialized;
        }

        tracing::info!(uid = ?uid, "Initializing store listeners");
        self.set_active_uid(uid);

        if self.guest_initialized.swap(false, Ordering::SeqCst) {
            tracing::info!("Dropping guest data before starting listeners");
            for store in &self.stores {
                store.reset();
            }
        }

        let mut failed = Vec::new();
        for store in &self.stores {
            if store.scope() == StoreScope::PerUser && uid.is_none() {
                continue;
            }
            if !self.listen_with_retry(store.as_ref(), uid).await {
                failed.push(store.name());
            }
        }

        // A last-resort terminate also ended the feeds of stores started
        // before it.
        for store in &self.stores {
            if store.scope() == StoreScope::PerUser && uid.is_none() {
                continue;
            }
            if failed.contains(&store.name()) || store.is_listening() {
                continue;
            }
            tracing::warn!(store = store.name(), "Listener lost during startup, reattaching");
            if let Err(e) = store.listen(uid).await {
                tracing::error!(store = store.name(), error = %e, "Reattach failed");
                failed.push(store.name());
            }
        }

        if failed.is_empty() {
            tracing::info!("All listeners started");
        } else {
            tracing::error!(failed = ?failed, "Some listeners failed to start");
        }
        InitOutcome::Started { failed }
    }

    /// Start one store's listener, retrying conflicts with backoff.
    ///
    /// When attempts run out (or a non-conflict error occurs) the backend
    /// connection is terminated and one last attempt is made.
    pub async fn listen_with_retry(&self, store: &dyn FeatureStore, uid: Option<&str>) -> bool {
        let label = store.name();
        let max_retries = self.retry.max_retries;

        for attempt in 1..=max_retries {
            match store.listen(uid).await {
                Ok(()) => {
                    tracing::info!(store = label, attempt, "Listener started");
                    return true;
                }
                Err(e) if e.is_already_exists() => {
                    let delay = self.retry.backoff(attempt);
                    tracing::warn!(
                        store = label,
                        attempt,
                        max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Listener conflict, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(store = label, error = %e, "Listener failed");
                    break;
                }
            }
        }

        store.stop();
        tracing::warn!(store = label, "Terminating backend to recover session");
        if let Err(e) = self.backend.terminate().await {
            tracing::warn!(store = label, error = %e, "Backend terminate failed");
        }
        tokio::time::sleep(self.retry.recovery_pause).await;

        match store.listen(uid).await {
            Ok(()) => {
                tracing::info!(store = label, "Listener recovered after terminate");
                true
            }
            Err(e) => {
                tracing::error!(store = label, error = %e, "Listener failed after terminate");
                false
            }
        }
    }

    /// Fill global stores from public data, without listeners.
    ///
    /// Idempotent. Returns `false` when the fetch failed; the guard is
    /// released so a later call can try again.
    pub async fn init_stores_guest(&self) -> bool {
        if self
            .guest_initialized
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!("initStoresGuest called but guest data already loaded, skipping");
            return true;
        }

        tracing::info!("Initializing guest mode stores");
        let data = match self.public_data.fetch().await {
            Ok(data) => data,
            Err(e) => {
                self.guest_initialized.store(false, Ordering::SeqCst);
                tracing::error!(error = %e, "Failed to initialize guest stores");
                return false;
            }
        };

        for store in &self.stores {
            if store.scope() != StoreScope::Global {
                continue;
            }
            match store.load_guest(&data) {
                Ok(()) => tracing::debug!(store = store.name(), "Guest data loaded"),
                Err(e) => tracing::error!(store = store.name(), error = %e, "Failed to load guest data"),
            }
        }
        tracing::info!("Guest mode stores initialized");
        true
    }

    /// Stop every listener and reset every store. Never fails.
    pub fn stop_stores(&self) {
        tracing::info!("Stopping all store listeners");
        for store in &self.stores {
            store.reset();
        }
        self.initialized.store(false, Ordering::SeqCst);
        self.guest_initialized.store(false, Ordering::SeqCst);
        self.set_active_uid(None);
        tracing::info!("All listeners stopped and states reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::SubscribeFault;
    use crate::db::{BackendEvent, DocumentPath, MemoryBackend};
    use crate::services::public_data::{PublicData, StaticPublicData};
    use serde_json::json;
    use std::time::Duration;

    fn orchestrator(public: StaticPublicData) -> (MemoryBackend, StoreOrchestrator) {
        let memory = MemoryBackend::new();
        let orch = StoreOrchestrator::new(
            &Config::default(),
            Arc::new(memory.clone()),
            Arc::new(public),
        );
        (memory, orch)
    }

    fn terminations(memory: &MemoryBackend) -> usize {
        memory.count_events(|e| matches!(e, BackendEvent::Terminated))
    }

    #[tokio::test(start_paused = true)]
    async fn signed_in_init_starts_global_and_user_stores() {
        let (memory, orch) = orchestrator(StaticPublicData::empty());

        let outcome = orch.init_stores(Some("u1")).await;

        assert_eq!(outcome, InitOutcome::Started { failed: vec![] });
        assert!(orch.settings().is_listening());
        assert!(orch.insights().is_listening());
        assert_eq!(memory.total_listeners(), 2);
        assert_eq!(orch.active_uid().as_deref(), Some("u1"));
    }

    #[tokio::test(start_paused = true)]
    async fn anonymous_init_skips_per_user_stores() {
        let (memory, orch) = orchestrator(StaticPublicData::empty());

        orch.init_stores(None).await;

        assert!(orch.settings().is_listening());
        assert!(!orch.insights().is_listening());
        assert_eq!(memory.total_listeners(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn conflicts_back_off_exponentially() {
        let (memory, orch) = orchestrator(StaticPublicData::empty());
        memory.push_subscribe_fault(SubscribeFault::AlreadyExists);
        memory.push_subscribe_fault(SubscribeFault::AlreadyExists);

        let started = tokio::time::Instant::now();
        assert!(orch.listen_with_retry(orch.settings().as_ref(), None).await);

        assert!(started.elapsed() >= Duration::from_millis(300 + 600));
        assert_eq!(terminations(&memory), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_terminate_then_try_once_more() {
        let (memory, orch) = orchestrator(StaticPublicData::empty());
        for _ in 0..3 {
            memory.push_subscribe_fault(SubscribeFault::AlreadyExists);
        }

        assert!(orch.listen_with_retry(orch.settings().as_ref(), None).await);
        assert_eq!(terminations(&memory), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn other_errors_skip_remaining_attempts() {
        let (memory, orch) = orchestrator(StaticPublicData::empty());
        memory.push_subscribe_fault(SubscribeFault::Other("permission-denied".to_string()));
        memory.push_subscribe_fault(SubscribeFault::Other("permission-denied".to_string()));

        assert!(!orch.listen_with_retry(orch.settings().as_ref(), None).await);
        assert_eq!(terminations(&memory), 1);
        assert_eq!(
            memory.count_events(|e| matches!(e, BackendEvent::Subscribed { .. })),
            0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn terminate_during_startup_reattaches_earlier_stores() {
        let (memory, orch) = orchestrator(StaticPublicData::empty());
        memory.fail_next_subscribe_to(
            &DocumentPath::new("insights", "u1"),
            SubscribeFault::Other("unavailable".to_string()),
        );

        let outcome = orch.init_stores(Some("u1")).await;

        assert_eq!(outcome, InitOutcome::Started { failed: vec![] });
        assert_eq!(terminations(&memory), 1);
        assert!(orch.settings().is_listening());
        assert!(orch.insights().is_listening());
        assert_eq!(memory.total_listeners(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn guest_mode_loads_public_data_once() {
        let data = PublicData::default().with_entry("app_settings", json!({"maintenance_mode": true}));
        let (memory, orch) = orchestrator(StaticPublicData::new(data));

        assert!(orch.init_stores_guest().await);
        assert!(orch.init_stores_guest().await);

        assert!(orch.settings().current().unwrap().maintenance_mode);
        assert!(orch.insights().current().is_none());
        assert_eq!(memory.total_listeners(), 0);
        assert!(orch.is_guest());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_guest_fetch_releases_guard() {
        let (_, orch) = orchestrator(StaticPublicData::unavailable());

        assert!(!orch.init_stores_guest().await);
        assert!(!orch.is_guest());
    }

    #[tokio::test(start_paused = true)]
    async fn sign_in_after_guest_mode_drops_guest_data() {
        let data = PublicData::default().with_entry("app_settings", json!({"maintenance_mode": true}));
        let (_, orch) = orchestrator(StaticPublicData::new(data));
        orch.init_stores_guest().await;

        orch.init_stores(Some("u1")).await;

        assert!(!orch.is_guest());
        assert!(!orch.settings().current().unwrap().maintenance_mode);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_resets_everything() {
        let (memory, orch) = orchestrator(StaticPublicData::empty());
        orch.init_stores(Some("u1")).await;

        orch.stop_stores();
        orch.stop_stores();

        assert!(!orch.is_initialized());
        assert!(orch.active_uid().is_none());
        assert!(orch.settings().current().is_none());
        assert_eq!(memory.total_listeners(), 0);
    }
}
