//! In-process auth provider.
//!
//! Holds the current identity and a pending redirect result, and fans state
//! changes out to every listener. Used by the native runner (identity from
//! the environment) and by tests (scripted sign-in and sign-out).

use crate::auth::{AuthProvider, AuthSubscription, ProviderConfig};
use crate::db::SubscriptionHandle;
use crate::error::{AppError, Result};
use crate::models::Identity;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

#[derive(Default)]
struct Inner {
    current: Mutex<Option<Identity>>,
    pending_redirect: Mutex<Option<Identity>>,
    listeners: DashMap<u64, mpsc::UnboundedSender<Option<Identity>>>,
    next_id: AtomicU64,
    fail_redirect: AtomicBool,
    fail_sign_out: AtomicBool,
    fail_sign_in: AtomicBool,
    redirect_requests: Mutex<Vec<ProviderConfig>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Default)]
pub struct LocalAuthProvider {
    inner: Arc<Inner>,
}

impl LocalAuthProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider with a persisted session for `identity`.
    pub fn signed_in(identity: Identity) -> Self {
        let provider = Self::new();
        *lock(&provider.inner.current) = Some(identity);
        provider
    }

    /// Queue an identity returned by the next `get_redirect_result`.
    pub fn set_redirect_result(&self, identity: Identity) {
        *lock(&self.inner.pending_redirect) = Some(identity.clone());
        *lock(&self.inner.current) = Some(identity);
    }

    /// Make `get_redirect_result` fail.
    pub fn set_fail_redirect(&self, fail: bool) {
        self.inner.fail_redirect.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_sign_out(&self, fail: bool) {
        self.inner.fail_sign_out.store(fail, Ordering::SeqCst);
    }

    /// Make `sign_in_with_redirect` fail.
    pub fn set_fail_sign_in(&self, fail: bool) {
        self.inner.fail_sign_in.store(fail, Ordering::SeqCst);
    }

    /// Change the signed-in identity and notify listeners.
    pub fn set_identity(&self, identity: Option<Identity>) {
        *lock(&self.inner.current) = identity.clone();
        self.inner
            .listeners
            .retain(|_, tx| tx.send(identity.clone()).is_ok());
    }

    pub fn current(&self) -> Option<Identity> {
        lock(&self.inner.current).clone()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Providers passed to `sign_in_with_redirect`, in order.
    pub fn redirect_requests(&self) -> Vec<ProviderConfig> {
        lock(&self.inner.redirect_requests).clone()
    }
}

#[async_trait]
impl AuthProvider for LocalAuthProvider {
    async fn get_redirect_result(&self) -> Result<Option<Identity>> {
        if self.inner.fail_redirect.load(Ordering::SeqCst) {
            return Err(AppError::Auth("auth/network-request-failed".to_string()));
        }
        Ok(lock(&self.inner.pending_redirect).take())
    }

    fn on_auth_state_changed(&self) -> AuthSubscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(self.current());
        self.inner.listeners.insert(id, tx);

        let inner = Arc::downgrade(&self.inner);
        let handle = SubscriptionHandle::new(id, move || {
            if let Some(inner) = inner.upgrade() {
                inner.listeners.remove(&id);
            }
        });
        AuthSubscription { events: rx, handle }
    }

    async fn sign_out(&self) -> Result<()> {
        if self.inner.fail_sign_out.load(Ordering::SeqCst) {
            return Err(AppError::Auth("auth/internal-error".to_string()));
        }
        self.set_identity(None);
        Ok(())
    }

    async fn sign_in_with_redirect(&self, provider: &ProviderConfig) -> Result<()> {
        if self.inner.fail_sign_in.load(Ordering::SeqCst) {
            return Err(AppError::Auth("auth/popup-blocked".to_string()));
        }
        tracing::info!(provider = %provider.provider_id, "Redirect sign-in requested");
        lock(&self.inner.redirect_requests).push(provider.clone());
        Ok(())
    }
}
