// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use serde_json::{json, Value};
use smart_boss_session::auth::LocalAuthProvider;
use smart_boss_session::config::Config;
use smart_boss_session::db::{DocumentBackend, DocumentPath, FirestoreDb, MemoryBackend};
use smart_boss_session::services::{PublicData, StaticPublicData};
use smart_boss_session::shell::{HeadlessShell, MemoryNavigator};
use smart_boss_session::storage::{flags, keys, MemoryCaches, MemoryDatabases, StorageTiers};
use smart_boss_session::{AuthFlowCoordinator, SessionContext};
use std::sync::Arc;
use std::time::Duration;

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project", Duration::from_millis(100))
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// Let spawned listener pumps and timers run until the runtime is idle.
///
/// Only meaningful under `start_paused = true`, where the clock advances
/// once nothing else can make progress.
#[allow(dead_code)]
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// A complete profile document as the backend would hold it.
#[allow(dead_code)]
pub fn stored_profile(uid: &str) -> Value {
    json!({
        "auth_data": {"uid": uid, "email": format!("{}@example.com", uid)},
        "prefs": {"preferred_language": "en"},
        "data": {"full_name": "Dana Levi", "business_name": "Levi Bakery"}
    })
}

/// In-memory collaborators for one simulated app load.
#[allow(dead_code)]
pub struct Harness {
    pub config: Config,
    pub tiers: StorageTiers,
    pub backend: MemoryBackend,
    pub auth: LocalAuthProvider,
    pub databases: Arc<MemoryDatabases>,
    pub caches: Arc<MemoryCaches>,
    pub shell: Arc<HeadlessShell>,
    pub navigator: Arc<MemoryNavigator>,
    pub public_data: PublicData,
}

#[allow(dead_code)]
impl Harness {
    /// Fresh device: no cache marker, no flags, at `/`.
    pub fn new(build_version: &str) -> Self {
        Self {
            config: Config {
                cache_version: build_version.to_string(),
                gcp_project_id: "smart-boss-test".to_string(),
                ..Config::default()
            },
            tiers: StorageTiers::in_memory(),
            backend: MemoryBackend::new(),
            auth: LocalAuthProvider::new(),
            databases: Arc::new(MemoryDatabases::with_names([
                "firestore/[DEFAULT]/smart-boss-test/main",
                "firebaseLocalStorageDb",
            ])),
            caches: Arc::new(MemoryCaches::with_names(["workbox-precache-v2"])),
            shell: Arc::new(HeadlessShell::new()),
            navigator: Arc::new(MemoryNavigator::new("/")),
            public_data: PublicData::default()
                .with_entry("app_settings", json!({"maintenance_mode": true})),
        }
    }

    /// Returning device: cache marker matches the build, onboarding and
    /// survey done.
    pub fn returning(build_version: &str) -> Self {
        let harness = Self::new(build_version);
        harness
            .tiers
            .durable
            .set(keys::APP_CACHE_VERSION, build_version)
            .unwrap();
        flags::mark_onboarding_completed(harness.tiers.durable.as_ref()).unwrap();
        flags::mark_survey_completed(harness.tiers.durable.as_ref()).unwrap();
        harness
    }

    pub fn at(mut self, path: &str) -> Self {
        self.navigator = Arc::new(MemoryNavigator::new(path));
        self
    }

    pub fn with_auth(mut self, auth: LocalAuthProvider) -> Self {
        self.auth = auth;
        self
    }

    pub fn backend(&self) -> Arc<dyn DocumentBackend> {
        Arc::new(self.backend.clone())
    }

    pub fn put_profile(&self, uid: &str) {
        self.backend
            .put_remote(&DocumentPath::user(uid), stored_profile(uid));
    }

    pub fn coordinator(&self) -> Arc<AuthFlowCoordinator> {
        AuthFlowCoordinator::new(SessionContext {
            config: self.config.clone(),
            tiers: self.tiers.clone(),
            backend: self.backend(),
            auth: Arc::new(self.auth.clone()),
            databases: self.databases.clone(),
            caches: self.caches.clone(),
            public_data: Arc::new(StaticPublicData::new(self.public_data.clone())),
            shell: self.shell.clone(),
            navigator: self.navigator.clone(),
        })
    }
}
