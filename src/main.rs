// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Smart Boss session runner
//!
//! Runs the session core headless: cache check, auth resolution and store
//! listeners against Firestore, with durable state under the data
//! directory. Useful to exercise the lifecycle outside the web shell.

use smart_boss_session::{
    auth::LocalAuthProvider,
    config::Config,
    db::{DocumentBackend, FirestoreDb, MemoryBackend},
    models::Identity,
    services::HttpPublicDataSource,
    shell::{HeadlessShell, MemoryNavigator, Navigator},
    storage::{DirCacheStorage, DirLocalDatabases, FileStore, MemoryStore, StorageTiers},
    telemetry::init_logging,
    AuthFlowCoordinator, CoordinatorPhase, SessionContext,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    // Load configuration from environment
    let config = Config::from_env()?;
    tracing::info!(
        project = %config.gcp_project_id,
        cache_version = %config.cache_version,
        "Starting Smart Boss session runner"
    );

    let tiers = StorageTiers::new(
        Arc::new(MemoryStore::new()),
        Arc::new(FileStore::open(config.data_dir.join("local.json"))?),
    );

    let backend: Arc<dyn DocumentBackend> =
        match FirestoreDb::new(&config.gcp_project_id, config.poll_interval).await {
            Ok(db) => Arc::new(db),
            Err(e) => {
                tracing::warn!(error = %e, "Firestore unavailable, using in-memory backend");
                Arc::new(MemoryBackend::new())
            }
        };

    let auth = match std::env::var("SMART_BOSS_UID") {
        Ok(uid) if !uid.trim().is_empty() => {
            let mut identity = Identity::new(uid.trim());
            if let Ok(email) = std::env::var("SMART_BOSS_EMAIL") {
                identity = identity.with_email(email);
            }
            LocalAuthProvider::signed_in(identity)
        }
        _ => LocalAuthProvider::new(),
    };

    let start_path = std::env::var("SMART_BOSS_START_PATH").unwrap_or_else(|_| "/".to_string());
    let navigator = Arc::new(MemoryNavigator::new(&start_path));

    let coordinator = AuthFlowCoordinator::new(SessionContext {
        tiers,
        backend,
        auth: Arc::new(auth),
        databases: Arc::new(DirLocalDatabases::new(config.data_dir.join("databases"))),
        caches: Arc::new(DirCacheStorage::new(config.data_dir.join("caches"))),
        public_data: Arc::new(HttpPublicDataSource::new(config.public_data_url.clone())),
        shell: Arc::new(HeadlessShell::new()),
        navigator: navigator.clone(),
        config,
    });

    let mut phase = coordinator.subscribe_phase();
    coordinator.start().await;

    tokio::select! {
        changed = phase.wait_for(|p| matches!(p, CoordinatorPhase::Ready | CoordinatorPhase::Updating)) => {
            if let Ok(p) = changed {
                tracing::info!(phase = ?*p, route = %navigator.current_path(), "Session settled");
            }
        }
        _ = tokio::signal::ctrl_c() => {}
    }

    if coordinator.phase() == CoordinatorPhase::Ready {
        tracing::info!("Listening for changes, press Ctrl-C to exit");
        tokio::signal::ctrl_c().await?;
    }

    coordinator.shutdown();
    coordinator.orchestrator().stop_stores();
    coordinator.user_store().clear();
    tracing::info!("Session runner stopped");
    Ok(())
}
