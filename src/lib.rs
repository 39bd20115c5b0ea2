// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Smart Boss session core: cache invalidation, auth resolution, live
//! data-store lifecycle and post-auth routing for the Smart Boss client.
//!
//! The host (web shell, native runner, tests) provides the collaborators in
//! a [`SessionContext`] and drives an [`AuthFlowCoordinator`].

pub mod auth;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod shell;
pub mod storage;
pub mod telemetry;
pub mod time_utils;

pub use coordinator::{AuthFlowCoordinator, CoordinatorPhase};

use auth::AuthProvider;
use config::Config;
use db::DocumentBackend;
use services::PublicDataSource;
use shell::{AppShell, Navigator};
use std::sync::Arc;
use storage::{CacheStorage, LocalDatabases, StorageTiers};

/// Collaborators of one app load.
pub struct SessionContext {
    pub config: Config,
    pub tiers: StorageTiers,
    pub backend: Arc<dyn DocumentBackend>,
    pub auth: Arc<dyn AuthProvider>,
    pub databases: Arc<dyn LocalDatabases>,
    pub caches: Arc<dyn CacheStorage>,
    pub public_data: Arc<dyn PublicDataSource>,
    pub shell: Arc<dyn AppShell>,
    pub navigator: Arc<dyn Navigator>,
}
