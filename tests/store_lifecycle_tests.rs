// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Listener and store lifecycle properties, checked against the in-memory
//! backend.

mod common;

use common::{settle, stored_profile};
use serde_json::json;
use smart_boss_session::config::Config;
use smart_boss_session::db::memory::SubscribeFault;
use smart_boss_session::db::{BackendEvent, DocumentBackend, DocumentPath, MemoryBackend};
use smart_boss_session::models::Identity;
use smart_boss_session::services::listener::SnapshotHandler;
use smart_boss_session::services::{
    safe_listen, InitOutcome, ListenOptions, ListenerSlot, SessionPhase, StaticPublicData,
    StoreOrchestrator, UserSessionStore,
};
use smart_boss_session::storage::{keys, KeyValueStore, MemoryStore};
use std::sync::Arc;
use std::time::Duration;

fn orchestrator(memory: &MemoryBackend) -> StoreOrchestrator {
    StoreOrchestrator::new(
        &Config::default(),
        Arc::new(memory.clone()),
        Arc::new(StaticPublicData::empty()),
    )
}

fn user_store(memory: &MemoryBackend, durable: Arc<MemoryStore>) -> UserSessionStore {
    UserSessionStore::new(&Config::default(), Arc::new(memory.clone()), durable)
}

#[tokio::test(start_paused = true)]
async fn test_repeated_init_stores_keeps_one_listener_per_store() {
    let memory = MemoryBackend::new();
    let orch = orchestrator(&memory);

    let first = orch.init_stores(Some("u1")).await;
    let second = orch.init_stores(Some("u1")).await;
    let third = orch.init_stores(None).await;

    assert_eq!(first, InitOutcome::Started { failed: vec![] });
    assert_eq!(second, InitOutcome::AlreadyInitialized);
    assert_eq!(third, InitOutcome::AlreadyInitialized);
    assert_eq!(memory.total_listeners(), 2);
    assert_eq!(
        memory.count_events(|e| matches!(e, BackendEvent::Subscribed { .. })),
        2
    );
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_init_stores_collapses_into_one() {
    let memory = MemoryBackend::new();
    let orch = orchestrator(&memory);

    let (a, b) = tokio::join!(orch.init_stores(Some("u1")), orch.init_stores(Some("u1")));

    let started = [&a, &b]
        .iter()
        .filter(|o| matches!(o, InitOutcome::Started { .. }))
        .count();
    assert_eq!(started, 1);
    assert_eq!(memory.total_listeners(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_session_init_for_same_user_attaches_once() {
    let memory = MemoryBackend::new();
    memory.put_remote(&DocumentPath::user("u1"), stored_profile("u1"));
    let store = user_store(&memory, Arc::new(MemoryStore::new()));
    let identity = Identity::new("u1");

    let (a, b) = tokio::join!(store.init_user(&identity), store.init_user(&identity));
    assert!(a && b);
    assert!(store.init_user(&identity).await);

    assert_eq!(store.phase(), SessionPhase::Live);
    assert_eq!(memory.active_listeners(&DocumentPath::user("u1")), 1);
    assert_eq!(
        memory.count_events(|e| matches!(e, BackendEvent::Subscribed { .. })),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_replacement_unsubscribes_before_subscribing() {
    let memory = MemoryBackend::new();
    let backend: Arc<dyn DocumentBackend> = Arc::new(memory.clone());
    let slot = Arc::new(ListenerSlot::without_liveness());
    let options = ListenOptions::new("test", Duration::from_millis(300));
    let handler: SnapshotHandler = Arc::new(|_| Box::pin(async { Ok(()) }));
    let first = DocumentPath::new("insights", "a");
    let second = DocumentPath::new("insights", "b");

    safe_listen(&slot, &backend, || first.clone(), handler.clone(), None, &options)
        .await
        .unwrap();
    safe_listen(&slot, &backend, || second.clone(), handler, None, &options)
        .await
        .unwrap();

    let events = memory.events();
    let unsubscribed = events
        .iter()
        .position(|e| *e == BackendEvent::Unsubscribed { id: 1 })
        .unwrap();
    let resubscribed = events
        .iter()
        .position(|e| {
            *e == BackendEvent::Subscribed {
                id: 2,
                path: second.clone(),
            }
        })
        .unwrap();
    assert!(unsubscribed < resubscribed);
    assert_eq!(memory.active_listeners(&first), 0);
    assert_eq!(memory.active_listeners(&second), 1);
}

#[tokio::test(start_paused = true)]
async fn test_conflicts_within_budget_recover_without_terminate() {
    let memory = MemoryBackend::new();
    memory.push_subscribe_fault(SubscribeFault::AlreadyExists);
    memory.push_subscribe_fault(SubscribeFault::AlreadyExists);
    let orch = orchestrator(&memory);

    let started = tokio::time::Instant::now();
    let outcome = orch.init_stores(Some("u1")).await;

    assert_eq!(outcome, InitOutcome::Started { failed: vec![] });
    // 300ms after the first conflict, 600ms after the second.
    assert!(started.elapsed() >= Duration::from_millis(900));
    assert_eq!(
        memory.count_events(|e| matches!(e, BackendEvent::Terminated)),
        0
    );
    assert!(orch.settings().is_listening());
    assert!(orch.insights().is_listening());
}

#[tokio::test(start_paused = true)]
async fn test_late_snapshot_of_previous_user_is_ignored() {
    let memory = MemoryBackend::new();
    memory.put_remote(&DocumentPath::user("u1"), stored_profile("u1"));
    memory.put_remote(&DocumentPath::user("u2"), stored_profile("u2"));
    let store = user_store(&memory, Arc::new(MemoryStore::new()));

    store.init_user(&Identity::new("u1")).await;
    store.init_user(&Identity::new("u2")).await;

    let mut changed = stored_profile("u1");
    changed["data"]["business_name"] = json!("Stale Corp");
    memory.put_remote(&DocumentPath::user("u1"), changed);
    settle().await;

    let profile = store.profile().unwrap();
    assert_eq!(profile.uid(), Some("u2"));
    assert_eq!(profile.data.business_name, "Levi Bakery");
}

#[tokio::test(start_paused = true)]
async fn test_partial_document_reads_as_complete_profile() {
    let memory = MemoryBackend::new();
    memory.put_remote(
        &DocumentPath::user("u1"),
        json!({"auth_data": {"uid": "u1"}, "prefs": {"theme_preference": "dark"}}),
    );
    let store = user_store(&memory, Arc::new(MemoryStore::new()));

    assert!(store.init_user(&Identity::new("u1")).await);

    let profile = store.profile().unwrap();
    assert_eq!(profile.prefs.theme_preference, "dark");
    assert_eq!(profile.prefs.preferred_language, "he");
    assert!(profile.prefs.drawer_swipe_rtl);
    assert_eq!(profile.data.role, "owner");
    assert_eq!(profile.data.country, "Israel");
}

#[tokio::test(start_paused = true)]
async fn test_null_fields_do_not_block_session_init() {
    let memory = MemoryBackend::new();
    let mut doc = stored_profile("u1");
    doc["data"]["phone"] = json!(null);
    doc["prefs"]["preferred_language"] = json!(null);
    memory.put_remote(&DocumentPath::user("u1"), doc);
    let store = user_store(&memory, Arc::new(MemoryStore::new()));

    assert!(store.init_user(&Identity::new("u1")).await);

    let profile = store.profile().unwrap();
    assert_eq!(profile.data.phone, "");
    assert_eq!(profile.prefs.preferred_language, "he");
    assert_eq!(profile.data.business_name, "Levi Bakery");
}

#[tokio::test(start_paused = true)]
async fn test_session_reattaches_after_backend_terminate() {
    let memory = MemoryBackend::new();
    memory.put_remote(&DocumentPath::user("u1"), stored_profile("u1"));
    let store = user_store(&memory, Arc::new(MemoryStore::new()));
    let orch = orchestrator(&memory);
    let identity = Identity::new("u1");
    assert!(store.init_user(&identity).await);

    // Non-conflict failure: the orchestrator terminates the backend.
    memory.push_subscribe_fault(SubscribeFault::Other("unavailable".to_string()));
    orch.init_stores(Some("u1")).await;
    settle().await;

    assert!(!store.is_listening());
    assert_eq!(memory.active_listeners(&DocumentPath::user("u1")), 0);

    assert!(store.init_user(&identity).await);
    assert!(store.is_listening());
    assert_eq!(memory.active_listeners(&DocumentPath::user("u1")), 1);

    let mut changed = stored_profile("u1");
    changed["data"]["business_name"] = json!("Bakery B");
    memory.put_remote(&DocumentPath::user("u1"), changed);
    settle().await;

    assert_eq!(store.phase(), SessionPhase::Live);
    assert_eq!(store.profile().unwrap().data.business_name, "Bakery B");
}

#[tokio::test(start_paused = true)]
async fn test_drawer_preference_survives_sign_out() {
    let memory = MemoryBackend::new();
    memory.put_remote(&DocumentPath::user("u1"), stored_profile("u1"));
    let durable = Arc::new(MemoryStore::new());
    let store = user_store(&memory, durable.clone());

    store.init_user(&Identity::new("u1")).await;
    assert!(store.update_prefs(json!({"drawer_swipe_rtl": false})).await);
    store.clear();

    assert_eq!(durable.get(keys::DRAWER_SWIPE_RTL).as_deref(), Some("false"));
    assert!(!store.drawer_swipe_rtl());
    assert_eq!(memory.total_listeners(), 0);
}
