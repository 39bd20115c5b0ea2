// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - session and store lifecycle.

pub mod cache_guard;
pub mod feature_store;
pub mod listener;
pub mod orchestrator;
pub mod public_data;
pub mod user_store;

pub use cache_guard::{CacheGuard, CacheState};
pub use feature_store::{DocumentStore, FeatureStore, StoreScope};
pub use listener::{safe_listen, ListenOptions, ListenerSlot};
pub use orchestrator::{InitOutcome, StoreOrchestrator};
pub use public_data::{HttpPublicDataSource, PublicData, PublicDataSource, StaticPublicData};
pub use user_store::{SessionPhase, UserSessionStore};
