// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Auth flow coordinator.
//!
//! One instance per app load ("mount"). Sequences the cache guard, redirect
//! resolution, the fallback auth-state listener and post-auth routing:
//!
//! ```text
//! CacheChecking --refreshing--> Updating (absorbing)
//!       |
//!       v
//! AuthResolving --redirect identity / auth event / failure--> Ready
//! ```
//!
//! Whatever goes wrong while resolving auth, the coordinator ends in `Ready`
//! (in guest mode if need be), so the host never stays on a loading screen.

pub mod routing;

use crate::auth::{AuthProvider, AuthSubscription, ProviderConfig};
use crate::db::SubscriptionHandle;
use crate::models::Identity;
use crate::services::{CacheGuard, InitOutcome, SessionPhase, StoreOrchestrator, UserSessionStore};
use crate::shell::{AppShell, Navigator};
use crate::storage::{flags, LoginMethod, OnboardingFlags, StorageTiers};
use crate::telemetry::AuthTimer;
use crate::time_utils::now_rfc3339;
use crate::SessionContext;
use futures_util::FutureExt;
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Delay before the recovery reload after a failed sign-out.
const LOGOUT_RELOAD_DELAY: Duration = Duration::from_millis(500);

/// Translation key shown for any sign-in failure.
pub const LOGIN_ERROR_GENERIC: &str = "loginErrorGeneric";

/// Coordinator state, published to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorPhase {
    CacheChecking,
    /// Local data is being wiped and a reload is scheduled.
    Updating,
    AuthResolving,
    Ready,
}

/// Sign-in failure, carrying the message key the host should display.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("sign-in failed ({message_key})")]
pub struct LoginError {
    pub message_key: &'static str,
}

impl LoginError {
    fn generic() -> Self {
        Self {
            message_key: LOGIN_ERROR_GENERIC,
        }
    }
}

/// The fallback auth-state listener and the task consuming its events.
struct AuthListener {
    handle: SubscriptionHandle,
    task: JoinHandle<()>,
}

impl AuthListener {
    fn stop(self) {
        self.handle.cancel();
        self.task.abort();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Auth flow coordinator.
pub struct AuthFlowCoordinator {
    tiers: StorageTiers,
    auth: Arc<dyn AuthProvider>,
    shell: Arc<dyn AppShell>,
    navigator: Arc<dyn Navigator>,
    cache_guard: CacheGuard,
    user_store: Arc<UserSessionStore>,
    orchestrator: Arc<StoreOrchestrator>,
    timer: AuthTimer,
    phase: watch::Sender<CoordinatorPhase>,
    /// Set once a redirect sign-in was finalized in this mount; the fallback
    /// listener then skips its signed-in branch.
    redirect_handled: AtomicBool,
    identity: RwLock<Option<Identity>>,
    auth_listener: Mutex<Option<AuthListener>>,
}

impl AuthFlowCoordinator {
    pub fn new(ctx: SessionContext) -> Arc<Self> {
        let SessionContext {
            config,
            tiers,
            backend,
            auth,
            databases,
            caches,
            public_data,
            shell,
            navigator,
        } = ctx;

        let cache_guard = CacheGuard::new(
            &config,
            tiers.clone(),
            backend.clone(),
            databases,
            caches,
            shell.clone(),
        );
        let user_store = Arc::new(UserSessionStore::new(
            &config,
            backend.clone(),
            tiers.durable.clone(),
        ));
        let orchestrator = Arc::new(StoreOrchestrator::new(&config, backend, public_data));
        let (phase, _) = watch::channel(CoordinatorPhase::CacheChecking);

        Arc::new(Self {
            tiers,
            auth,
            shell,
            navigator,
            cache_guard,
            user_store,
            orchestrator,
            timer: AuthTimer::new(),
            phase,
            redirect_handled: AtomicBool::new(false),
            identity: RwLock::new(None),
            auth_listener: Mutex::new(None),
        })
    }

    pub fn phase(&self) -> CoordinatorPhase {
        *self.phase.borrow()
    }

    /// Watch phase changes.
    pub fn subscribe_phase(&self) -> watch::Receiver<CoordinatorPhase> {
        self.phase.subscribe()
    }

    /// Identity the session currently belongs to.
    pub fn identity(&self) -> Option<Identity> {
        self.identity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn user_store(&self) -> &Arc<UserSessionStore> {
        &self.user_store
    }

    pub fn orchestrator(&self) -> &Arc<StoreOrchestrator> {
        &self.orchestrator
    }

    pub fn redirect_handled(&self) -> bool {
        self.redirect_handled.load(Ordering::SeqCst)
    }

    pub fn is_listening(&self) -> bool {
        lock(&self.auth_listener).is_some()
    }

    fn set_phase(&self, phase: CoordinatorPhase) {
        let previous = self.phase.send_replace(phase);
        if previous != phase {
            tracing::debug!(from = ?previous, to = ?phase, "Coordinator phase");
        }
    }

    fn set_identity(&self, identity: Option<Identity>) {
        *self.identity.write().unwrap_or_else(PoisonError::into_inner) = identity;
    }

    /// Run the per-load sequence. Returns once the phase is `Updating` or
    /// `Ready`, or once the fallback listener is attached (its first event
    /// then moves the phase to `Ready`).
    pub async fn start(self: &Arc<Self>) {
        self.timer.step("App: startAuthFlow", true);
        self.set_phase(CoordinatorPhase::CacheChecking);

        let refreshing = self
            .cache_guard
            .check_and_clear(|_| self.set_phase(CoordinatorPhase::Updating))
            .await;
        if refreshing {
            self.set_phase(CoordinatorPhase::Updating);
            self.timer.step("App: version change detected, refreshing", true);
            return;
        }

        self.set_phase(CoordinatorPhase::AuthResolving);

        match self.auth.get_redirect_result().await {
            Ok(Some(identity)) => {
                let resolved = AssertUnwindSafe(self.finish_redirect_sign_in(identity))
                    .catch_unwind()
                    .await;
                if resolved.is_err() {
                    tracing::error!("Redirect sign-in handling panicked");
                    self.fall_back_to_guest().await;
                }
                // Later sign-outs still have to reach the stores.
                self.attach_auth_listener();
            }
            Ok(None) => self.attach_auth_listener(),
            Err(e) => {
                tracing::error!(error = %e, "startAuthFlow error");
                self.fall_back_to_guest().await;
            }
        }
    }

    async fn finish_redirect_sign_in(&self, identity: Identity) {
        self.timer
            .step(&format!("App: redirect user {}", identity.uid), true);
        self.redirect_handled.store(true, Ordering::SeqCst);
        self.set_identity(Some(identity.clone()));

        self.user_store.init_user(&identity).await;
        self.start_stores(&identity).await;
        self.record_login(&identity).await;

        self.set_phase(CoordinatorPhase::Ready);
        self.evaluate_routing();
    }

    /// Store how and when the user signed in. Best-effort.
    async fn record_login(&self, identity: &Identity) {
        let method = flags::take_login_method(&self.tiers).unwrap_or(LoginMethod::Redirect);
        let stored = self
            .user_store
            .update_prefs(json!({
                "last_login_method": method.as_str(),
                "last_login_time": now_rfc3339(),
            }))
            .await;
        if stored {
            tracing::info!(uid = %identity.uid, method = %method, "Stored login method");
        } else {
            tracing::warn!(uid = %identity.uid, "Profile not ready, login method not stored");
        }
    }

    fn attach_auth_listener(self: &Arc<Self>) {
        let AuthSubscription { mut events, handle } = self.auth.on_auth_state_changed();
        let coordinator: Weak<Self> = Arc::downgrade(self);

        let task = tokio::spawn(async move {
            while let Some(state) = events.recv().await {
                let Some(coordinator) = coordinator.upgrade() else {
                    break;
                };
                coordinator.on_auth_state_changed(state).await;
            }
        });

        let previous = lock(&self.auth_listener).replace(AuthListener { handle, task });
        if let Some(previous) = previous {
            previous.stop();
        }
    }

    async fn on_auth_state_changed(&self, state: Option<Identity>) {
        let handled = AssertUnwindSafe(self.apply_auth_state(state))
            .catch_unwind()
            .await;
        if handled.is_err() {
            tracing::error!("onAuthStateChanged handler panicked");
            self.fall_back_to_guest().await;
        }
    }

    async fn apply_auth_state(&self, state: Option<Identity>) {
        let Some(identity) = state else {
            self.timer.step("onAuthStateChanged: signed out", true);
            // A later sign-in in this mount is a new session.
            self.redirect_handled.store(false, Ordering::SeqCst);
            self.fall_back_to_guest().await;
            return;
        };

        if self.redirect_handled() {
            tracing::debug!(uid = %identity.uid, "Redirect already handled, skipping listener init");
            self.set_identity(Some(identity));
            return;
        }

        self.timer
            .step(&format!("onAuthStateChanged: signed in {}", identity.uid), true);
        self.set_identity(Some(identity.clone()));
        self.user_store.init_user(&identity).await;
        self.start_stores(&identity).await;

        self.set_phase(CoordinatorPhase::Ready);
        self.evaluate_routing();
    }

    async fn start_stores(&self, identity: &Identity) {
        let uid = identity.uid.as_str();
        if let Some(active) = self.orchestrator.active_uid() {
            if active != uid {
                tracing::info!(previous = %active, uid, "Stores belong to another user, restarting");
                self.orchestrator.stop_stores();
            }
        }

        match self.orchestrator.init_stores(Some(uid)).await {
            InitOutcome::Started { failed } if !failed.is_empty() => {
                tracing::warn!(failed = ?failed, "Continuing without some stores");
            }
            InitOutcome::Started { .. } => {}
            InitOutcome::AlreadyInitialized => tracing::debug!(uid, "Stores already running"),
        }

        // A backend terminate during store startup also ends the profile feed.
        if self.user_store.phase() == SessionPhase::Live && !self.user_store.is_listening() {
            self.user_store.init_user(identity).await;
        }

        if let Some(settings) = self.orchestrator.settings().current() {
            self.timer.set_enabled(settings.trace_auth_process);
        }
        self.timer.step("initStores complete", false);
    }

    /// Signed-out state: no profile, no listeners, public data only.
    async fn fall_back_to_guest(&self) {
        self.set_identity(None);
        self.user_store.clear();
        self.orchestrator.stop_stores();
        if !self.orchestrator.init_stores_guest().await {
            tracing::warn!("Guest data unavailable, continuing with defaults");
        }
        self.set_phase(CoordinatorPhase::Ready);
        self.evaluate_routing();
    }

    /// Apply post-auth routing to the current route.
    ///
    /// Does nothing before `Ready`. Returns the redirect target, if any.
    pub fn evaluate_routing(&self) -> Option<&'static str> {
        if self.phase() != CoordinatorPhase::Ready {
            return None;
        }

        let path = self.navigator.current_path();
        let flags = OnboardingFlags::read(self.tiers.durable.as_ref());
        let target = routing::decide(self.identity().is_some(), &path, flags)?;

        tracing::info!(from = %path, to = target, "Post-auth redirect");
        self.navigator.replace(target);
        Some(target)
    }

    /// Hosts call this after every navigation.
    pub fn on_route_changed(&self) -> Option<&'static str> {
        self.evaluate_routing()
    }

    /// Leave for the provider's sign-in page.
    ///
    /// The login method is recorded first so the next load can tell a
    /// returning redirect apart from a plain visit.
    pub async fn sign_in_with_redirect(&self, provider: &ProviderConfig) -> Result<(), LoginError> {
        flags::set_login_method(&self.tiers, LoginMethod::Redirect);
        self.auth.sign_in_with_redirect(provider).await.map_err(|e| {
            tracing::error!(provider = %provider.provider_id, error = %e, "Sign-in failed");
            LoginError::generic()
        })
    }

    /// Sign out and clear the session.
    ///
    /// Unless `silent`, navigates home on success and schedules a recovery
    /// reload on failure.
    pub async fn logout(&self, silent: bool) -> bool {
        flags::clear_login_method(&self.tiers);

        match self.auth.sign_out().await {
            Ok(()) => {
                self.user_store.clear();
                tracing::info!("User signed out");
                if !silent {
                    self.navigator.replace(routing::HOME);
                }
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Sign-out failed");
                if !silent {
                    let shell = self.shell.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(LOGOUT_RELOAD_DELAY).await;
                        if let Err(e) = shell.reload() {
                            tracing::warn!(error = %e, "Reload failed, navigating home");
                            shell.hard_navigate(routing::HOME);
                        }
                    });
                }
                false
            }
        }
    }

    /// Detach the fallback auth listener. Safe to call more than once.
    pub fn shutdown(&self) {
        let listener = lock(&self.auth_listener).take();
        if let Some(listener) = listener {
            listener.stop();
            tracing::debug!("Auth listener detached");
        }
    }
}

impl Drop for AuthFlowCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
