// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Live profile of the signed-in user.
//!
//! The store keeps exactly one listener on `users/{uid}`. The first snapshot
//! of a missing document creates it; later snapshots replace the in-memory
//! profile after merging them over the template, so readers always see a
//! structurally complete [`UserProfile`].

use crate::config::Config;
use crate::db::{DocumentBackend, DocumentPath, DocumentSnapshot};
use crate::error::Result;
use crate::models::{deep_merge, Identity, ProfileSection, UserProfile};
use crate::services::listener::{safe_listen, ListenOptions, ListenerSlot, SnapshotHandler};
use crate::storage::{flags, keys, KeyValueStore};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Lifecycle of the session store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Empty,
    Initializing,
    Live,
}

#[derive(Debug)]
struct SessionState {
    phase: SessionPhase,
    uid: Option<String>,
    profile: Option<UserProfile>,
    /// Bumped by every init and clear; snapshots of an older epoch are
    /// dropped.
    epoch: u64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Empty,
            uid: None,
            profile: None,
            epoch: 0,
        }
    }
}

/// User session store.
pub struct UserSessionStore {
    backend: Arc<dyn DocumentBackend>,
    durable: Arc<dyn KeyValueStore>,
    slot: Arc<ListenerSlot>,
    state: Arc<RwLock<SessionState>>,
    /// Serializes `init_user` so concurrent calls for one uid attach once.
    init_lock: tokio::sync::Mutex<()>,
    options: ListenOptions,
    developer_email: Option<String>,
}

impl UserSessionStore {
    pub fn new(
        config: &Config,
        backend: Arc<dyn DocumentBackend>,
        durable: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            backend,
            durable,
            slot: Arc::new(ListenerSlot::without_liveness()),
            state: Arc::new(RwLock::new(SessionState::default())),
            init_lock: tokio::sync::Mutex::new(()),
            options: ListenOptions::new("UserStore", config.resubscribe_delay),
            developer_email: config.developer_email.clone(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn phase(&self) -> SessionPhase {
        self.read().phase
    }

    /// Owner of the session, set from the start of `init_user`.
    pub fn uid(&self) -> Option<String> {
        self.read().uid.clone()
    }

    /// Whether the profile listener is still delivering snapshots.
    pub fn is_listening(&self) -> bool {
        self.slot.is_listening()
    }

    /// Current profile, `None` until the first complete snapshot.
    pub fn profile(&self) -> Option<UserProfile> {
        self.read().profile.clone()
    }

    /// Attach the profile listener for `identity`.
    ///
    /// Returns `true` once the listener delivered its first snapshot. Never
    /// fails: attach errors leave the store empty and return `false`, and
    /// the app continues without a profile.
    pub async fn init_user(&self, identity: &Identity) -> bool {
        let _init = self.init_lock.lock().await;

        let epoch = {
            let mut state = self.write();
            let same_user = state.uid.as_deref() == Some(identity.uid.as_str());
            if same_user && state.phase == SessionPhase::Live {
                if self.slot.is_listening() {
                    tracing::debug!(uid = %identity.uid, "UserStore already live, skipping init");
                    return true;
                }
                tracing::warn!(uid = %identity.uid, "UserStore feed ended, reattaching");
            }
            state.epoch += 1;
            state.phase = SessionPhase::Initializing;
            state.uid = Some(identity.uid.clone());
            // A reattach for the same user keeps the last profile readable.
            if !same_user {
                state.profile = None;
            }
            state.epoch
        };

        tracing::info!(uid = %identity.uid, email = ?identity.email, "UserStore: initUser");

        // Account switch: the previous user's listener goes first.
        self.slot.stop();

        let handler = self.snapshot_handler(identity, epoch);
        let path = DocumentPath::user(&identity.uid);
        let result = safe_listen(
            &self.slot,
            &self.backend,
            || path,
            handler,
            None,
            &self.options,
        )
        .await;

        match result {
            Ok(()) => {
                let mut state = self.write();
                if state.epoch != epoch {
                    return false;
                }
                state.phase = SessionPhase::Live;
                tracing::info!(uid = %identity.uid, "initUser complete (listener active)");
                true
            }
            Err(e) => {
                tracing::warn!(uid = %identity.uid, error = %e, "initUser failed, continuing without profile");
                self.slot.stop();
                let mut state = self.write();
                if state.epoch == epoch {
                    *state = SessionState {
                        epoch,
                        ..SessionState::default()
                    };
                }
                false
            }
        }
    }

    fn snapshot_handler(&self, identity: &Identity, epoch: u64) -> SnapshotHandler {
        let backend = self.backend.clone();
        let state = self.state.clone();
        let identity = identity.clone();
        let developer_email = self.developer_email.clone();
        let first = Arc::new(AtomicBool::new(true));

        Arc::new(move |snapshot: DocumentSnapshot| {
            let backend = backend.clone();
            let state = state.clone();
            let identity = identity.clone();
            let developer_email = developer_email.clone();
            let first_snapshot = first.swap(false, Ordering::SeqCst);
            Box::pin(async move {
                apply_snapshot(
                    backend.as_ref(),
                    &state,
                    epoch,
                    &identity,
                    developer_email.as_deref(),
                    first_snapshot,
                    snapshot,
                )
                .await
            })
        })
    }

    /// Stop the listener and forget the profile. Safe to call at any time.
    pub fn clear(&self) {
        self.slot.stop();
        let mut state = self.write();
        let epoch = state.epoch + 1;
        *state = SessionState {
            epoch,
            ..SessionState::default()
        };
        tracing::info!("UserStore cleared (listener stopped)");
    }

    /// Merge `updates` into one profile section, remotely and in memory.
    ///
    /// Memory changes only after the backend accepted the write. Returns
    /// `false` without a profile or when the write fails.
    pub async fn update_section(&self, section: ProfileSection, updates: Value) -> bool {
        if !updates.is_object() {
            tracing::warn!(%section, "updateSection expects an object");
            return false;
        }

        let (uid, mut next) = {
            let state = self.read();
            let Some((uid, profile)) = state
                .profile
                .as_ref()
                .and_then(|p| p.uid().map(|uid| (uid.to_string(), p)))
            else {
                tracing::warn!(%section, "updateSection called before user initialized");
                return false;
            };
            (uid, profile.section(section))
        };
        deep_merge(&mut next, &updates);

        let path = DocumentPath::user(&uid);
        let doc = json!({ section.as_str(): next.clone() });
        if let Err(e) = self.backend.set_doc(&path, doc, true).await {
            tracing::error!(%section, error = %e, "updateSection failed");
            return false;
        }

        let mut state = self.write();
        match state.profile.as_mut() {
            Some(profile) if profile.uid() == Some(uid.as_str()) => {
                if let Err(e) = profile.set_section(section, &next) {
                    tracing::warn!(%section, error = %e, "Unable to apply update locally");
                }
            }
            _ => tracing::debug!(%section, "Profile changed during update, skipping local apply"),
        }
        true
    }

    pub async fn update_data(&self, updates: Value) -> bool {
        self.update_section(ProfileSection::Data, updates).await
    }

    /// Update preferences. The drawer direction is mirrored to durable
    /// storage so it applies before the profile loads next time.
    pub async fn update_prefs(&self, updates: Value) -> bool {
        let drawer = updates.get("drawer_swipe_rtl").and_then(Value::as_bool);
        let ok = self.update_section(ProfileSection::Prefs, updates).await;
        if let (true, Some(rtl)) = (ok, drawer) {
            let raw = if rtl { "true" } else { "false" };
            if let Err(e) = self.durable.set(keys::DRAWER_SWIPE_RTL, raw) {
                tracing::warn!(error = %e, "Unable to persist drawer direction");
            }
        }
        ok
    }

    /// Drawer swipe direction: profile preference, else the durable copy,
    /// else right to left.
    pub fn drawer_swipe_rtl(&self) -> bool {
        if let Some(profile) = self.read().profile.as_ref() {
            return profile.prefs.drawer_swipe_rtl;
        }
        flags::stored_drawer_swipe_rtl(self.durable.as_ref()).unwrap_or(true)
    }
}

async fn apply_snapshot(
    backend: &dyn DocumentBackend,
    state: &RwLock<SessionState>,
    epoch: u64,
    identity: &Identity,
    developer_email: Option<&str>,
    first_snapshot: bool,
    snapshot: DocumentSnapshot,
) -> Result<()> {
    let Some(data) = snapshot.data else {
        if first_snapshot {
            let doc = UserProfile::new_document(identity, &backend.server_timestamp(), developer_email);
            backend.set_doc(&snapshot.path, doc, false).await?;
            // The backend echoes the new document to this listener.
            tracing::info!(uid = %identity.uid, "UserStore: created user document");
        } else {
            tracing::warn!(uid = %identity.uid, "UserStore: snapshot missing, keeping previous state");
        }
        return Ok(());
    };

    if data.pointer("/auth_data/uid").and_then(Value::as_str).is_none() {
        tracing::warn!(uid = %identity.uid, "UserStore: ignoring incomplete snapshot");
        return Ok(());
    }

    let profile = UserProfile::from_remote(&data)?;
    let mut state = state.write().unwrap_or_else(PoisonError::into_inner);
    if state.epoch == epoch {
        state.profile = Some(profile);
    }
    Ok(())
}
