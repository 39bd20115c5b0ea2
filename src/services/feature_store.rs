// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Feature data stores started by the orchestrator.
//!
//! Each store mirrors one document through the listener registry, or takes
//! its value from public data in guest mode.

use crate::config::Config;
use crate::db::{collections, DocumentBackend, DocumentPath, DocumentSnapshot};
use crate::error::{AppError, Result};
use crate::models::{AppSettings, DailyInsights};
use crate::services::listener::{safe_listen, ErrorHandler, ListenOptions, ListenerSlot, SnapshotHandler};
use crate::services::public_data::PublicData;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::{Arc, PoisonError, RwLock};

/// Whether a store needs a signed-in user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreScope {
    Global,
    PerUser,
}

/// A store the orchestrator can start, stop and fill for guests.
#[async_trait]
pub trait FeatureStore: Send + Sync {
    fn name(&self) -> &'static str;

    fn scope(&self) -> StoreScope;

    /// Attach the store's listener. Resolves once the first snapshot landed.
    async fn listen(&self, uid: Option<&str>) -> Result<()>;

    /// Whether the store's listener is delivering snapshots.
    fn is_listening(&self) -> bool;

    /// Detach the listener, keeping the last value.
    fn stop(&self);

    /// Detach the listener and drop the value.
    fn reset(&self);

    /// Take the store's entry from guest-mode public data.
    fn load_guest(&self, data: &PublicData) -> Result<()>;
}

/// Store mirroring a single typed document.
pub struct DocumentStore<T> {
    name: &'static str,
    scope: StoreScope,
    collection: &'static str,
    /// Document ID for global stores; per-user stores use the uid.
    global_id: &'static str,
    backend: Arc<dyn DocumentBackend>,
    slot: Arc<ListenerSlot>,
    value: Arc<RwLock<Option<T>>>,
    options: ListenOptions,
}

impl DocumentStore<AppSettings> {
    /// Global settings at `app_settings/global`.
    pub fn app_settings(config: &Config, backend: Arc<dyn DocumentBackend>) -> Self {
        Self::global("app_settings", collections::APP_SETTINGS, "global", config, backend)
    }
}

impl DocumentStore<DailyInsights> {
    /// Daily insights of the signed-in business at `insights/{uid}`.
    pub fn insights(config: &Config, backend: Arc<dyn DocumentBackend>) -> Self {
        Self::per_user("insights", collections::INSIGHTS, config, backend)
    }
}

impl<T> DocumentStore<T>
where
    T: DeserializeOwned + Default + Clone + Send + Sync + 'static,
{
    pub fn global(
        name: &'static str,
        collection: &'static str,
        id: &'static str,
        config: &Config,
        backend: Arc<dyn DocumentBackend>,
    ) -> Self {
        Self::build(name, StoreScope::Global, collection, id, config, backend)
    }

    pub fn per_user(
        name: &'static str,
        collection: &'static str,
        config: &Config,
        backend: Arc<dyn DocumentBackend>,
    ) -> Self {
        Self::build(name, StoreScope::PerUser, collection, "", config, backend)
    }

    fn build(
        name: &'static str,
        scope: StoreScope,
        collection: &'static str,
        global_id: &'static str,
        config: &Config,
        backend: Arc<dyn DocumentBackend>,
    ) -> Self {
        Self {
            name,
            scope,
            collection,
            global_id,
            backend,
            slot: Arc::new(ListenerSlot::new()),
            value: Arc::new(RwLock::new(None)),
            options: ListenOptions::new(name, config.resubscribe_delay),
        }
    }

    /// Last value seen, `None` before the first snapshot or after a reset.
    pub fn current(&self) -> Option<T> {
        self.value
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_listening(&self) -> bool {
        self.slot.is_listening()
    }

    fn set(&self, value: Option<T>) {
        *self.value.write().unwrap_or_else(PoisonError::into_inner) = value;
    }

    fn path(&self, uid: Option<&str>) -> Result<DocumentPath> {
        match self.scope {
            StoreScope::Global => Ok(DocumentPath::new(self.collection, self.global_id)),
            StoreScope::PerUser => uid
                .map(|uid| DocumentPath::new(self.collection, uid))
                .ok_or(AppError::NotInitialized(self.name)),
        }
    }

    fn snapshot_handler(&self) -> SnapshotHandler {
        let value = self.value.clone();
        let name = self.name;
        Arc::new(move |snapshot: DocumentSnapshot| {
            let value = value.clone();
            Box::pin(async move {
                // A missing document reads as the defaults.
                let next = match snapshot.data {
                    Some(data) => serde_json::from_value::<T>(data)?,
                    None => T::default(),
                };
                *value.write().unwrap_or_else(PoisonError::into_inner) = Some(next);
                tracing::debug!(store = name, "Snapshot applied");
                Ok(())
            })
        })
    }
}

#[async_trait]
impl<T> FeatureStore for DocumentStore<T>
where
    T: DeserializeOwned + Default + Clone + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn scope(&self) -> StoreScope {
        self.scope
    }

    async fn listen(&self, uid: Option<&str>) -> Result<()> {
        let path = self.path(uid)?;
        let name = self.name;
        let on_error: ErrorHandler = Arc::new(move |e| {
            tracing::error!(store = name, error = %e, "Store listener error");
        });
        safe_listen(
            &self.slot,
            &self.backend,
            || path,
            self.snapshot_handler(),
            Some(on_error),
            &self.options,
        )
        .await
    }

    fn is_listening(&self) -> bool {
        self.slot.is_listening()
    }

    fn stop(&self) {
        self.slot.stop();
    }

    fn reset(&self) {
        self.slot.stop();
        self.set(None);
    }

    fn load_guest(&self, data: &PublicData) -> Result<()> {
        let next = match data.get(self.name) {
            Some(value) => serde_json::from_value::<T>(value.clone())?,
            None => T::default(),
        };
        self.set(Some(next));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryBackend;
    use serde_json::json;
    use std::time::Duration;

    fn backend() -> (MemoryBackend, Arc<dyn DocumentBackend>) {
        let memory = MemoryBackend::new();
        (memory.clone(), Arc::new(memory))
    }

    #[tokio::test(start_paused = true)]
    async fn global_store_reads_settings_document() {
        let (memory, backend) = backend();
        memory.put_remote(
            &DocumentPath::new("app_settings", "global"),
            json!({"trace_auth_process": false}),
        );
        let store = DocumentStore::app_settings(&Config::default(), backend);

        store.listen(None).await.unwrap();

        let settings = store.current().unwrap();
        assert!(!settings.trace_auth_process);
        assert!(!settings.maintenance_mode);
        assert!(store.is_listening());
    }

    #[tokio::test(start_paused = true)]
    async fn per_user_store_requires_uid() {
        let (_, backend) = backend();
        let store = DocumentStore::insights(&Config::default(), backend);

        let err = store.listen(None).await.unwrap_err();
        assert!(matches!(err, AppError::NotInitialized("insights")));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_stops_listener_and_drops_value() {
        let (memory, backend) = backend();
        let store = DocumentStore::insights(&Config::default(), backend);
        store.listen(Some("u1")).await.unwrap();
        assert_eq!(store.current(), Some(DailyInsights::default()));

        store.reset();

        assert!(store.current().is_none());
        assert!(!store.is_listening());
        assert_eq!(memory.total_listeners(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_keeps_last_value() {
        let (memory, backend) = backend();
        memory.put_remote(
            &DocumentPath::new("app_settings", "global"),
            json!({"maintenance_mode": true}),
        );
        let store = DocumentStore::app_settings(&Config::default(), backend);
        store.listen(None).await.unwrap();

        FeatureStore::stop(&store);

        assert!(!FeatureStore::is_listening(&store));
        assert!(store.current().unwrap().maintenance_mode);
        assert_eq!(memory.total_listeners(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deleted_document_reads_as_defaults() {
        let (memory, backend) = backend();
        let path = DocumentPath::new("insights", "u1");
        memory.put_remote(&path, json!({"updated_at": "2026-10-01T06:00:00Z"}));
        let store = DocumentStore::insights(&Config::default(), backend);
        store.listen(Some("u1")).await.unwrap();
        assert!(store.current().unwrap().updated_at.is_some());

        memory.delete_remote(&path);
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(store.current(), Some(DailyInsights::default()));
        assert!(store.is_listening());
    }

    #[test]
    fn guest_data_fills_store_or_defaults() {
        let (_, backend) = backend();
        let store = DocumentStore::app_settings(&Config::default(), backend);

        store
            .load_guest(&PublicData::default().with_entry("app_settings", json!({"maintenance_mode": true})))
            .unwrap();
        assert!(store.current().unwrap().maintenance_mode);

        store.load_guest(&PublicData::default()).unwrap();
        assert_eq!(store.current(), Some(AppSettings::default()));
    }
}
