// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Local persisted state: two key-value tiers plus the local database and
//! named cache stores the cache guard wipes.

pub mod flags;
pub mod local;
pub mod memory;
pub mod file;

pub use file::FileStore;
pub use flags::{LoginMethod, OnboardingFlags};
pub use local::{CacheStorage, DirCacheStorage, DirLocalDatabases, LocalDatabases, MemoryCaches, MemoryDatabases};
pub use memory::MemoryStore;

use crate::error::Result;
use std::sync::Arc;

/// Keys used in the key-value tiers.
pub mod keys {
    /// Durable: cache generation last wiped for.
    pub const APP_CACHE_VERSION: &str = "app_cache_version";
    /// Session: set while a cache wipe + reload is in progress.
    pub const UPDATING_CACHE_VERSION: &str = "updating_cache_version";
    /// Both tiers: sign-in method chosen before leaving for the provider.
    pub const LOGIN_METHOD: &str = "loginMethod";
    /// Durable: "yes" once onboarding was completed.
    pub const ONBOARDING_COMPLETED: &str = "onboardingCompleted";
    /// Durable: "yes" once the bubble survey was completed.
    pub const SURVEY_COMPLETED: &str = "bubblesSurveyCompleted";
    /// Durable: drawer swipe direction when no profile is loaded.
    pub const DRAWER_SWIPE_RTL: &str = "drawerSwipeRTL";
}

/// Plain string key-value storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// The session-scoped and durable storage tiers.
#[derive(Clone)]
pub struct StorageTiers {
    pub session: Arc<dyn KeyValueStore>,
    pub durable: Arc<dyn KeyValueStore>,
}

impl StorageTiers {
    pub fn new(session: Arc<dyn KeyValueStore>, durable: Arc<dyn KeyValueStore>) -> Self {
        Self { session, durable }
    }

    /// Both tiers in memory.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
    }
}
