// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Authentication provider port.
//!
//! The provider owns sign-in, session persistence and identity. The core
//! only asks it for a pending redirect result, listens to its state changes
//! and asks it to sign in or out.

pub mod local;

pub use local::LocalAuthProvider;

use crate::db::SubscriptionHandle;
use crate::error::Result;
use crate::models::Identity;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Sign-in provider configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Provider ID, e.g. "google.com" or "apple.com"
    pub provider_id: String,
    pub scopes: Vec<String>,
    pub custom_parameters: Vec<(String, String)>,
}

impl ProviderConfig {
    /// Google sign-in that always shows the account picker.
    pub fn google() -> Self {
        Self {
            provider_id: "google.com".to_string(),
            scopes: Vec::new(),
            custom_parameters: vec![("prompt".to_string(), "select_account".to_string())],
        }
    }

    /// Apple sign-in asking for email and name.
    pub fn apple() -> Self {
        Self {
            provider_id: "apple.com".to_string(),
            scopes: vec!["email".to_string(), "name".to_string()],
            custom_parameters: Vec::new(),
        }
    }
}

/// Stream of auth state changes: `Some` when signed in, `None` when signed out.
#[derive(Debug)]
pub struct AuthSubscription {
    pub events: mpsc::UnboundedReceiver<Option<Identity>>,
    pub handle: SubscriptionHandle,
}

/// External authentication provider.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Result of a sign-in redirect that brought the user back, if any.
    async fn get_redirect_result(&self) -> Result<Option<Identity>>;

    /// Subscribe to auth state changes. The current state is delivered first.
    fn on_auth_state_changed(&self) -> AuthSubscription;

    async fn sign_out(&self) -> Result<()>;

    /// Leave the app for the provider's sign-in page.
    async fn sign_in_with_redirect(&self, provider: &ProviderConfig) -> Result<()>;
}
