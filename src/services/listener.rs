// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Listener registry: at most one live document subscription per store.
//!
//! Every store owns a [`ListenerSlot`]. [`safe_listen`] replaces whatever the
//! slot holds (unsubscribe, wait, resubscribe) and returns once the new
//! listener has delivered its first snapshot, so callers can await a
//! confirmed listener rather than a requested one.

use crate::db::{DocumentBackend, DocumentPath, DocumentSnapshot, Subscription, SubscriptionHandle};
use crate::error::{AppError, Result};
use futures_util::future::BoxFuture;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Snapshot callback. An error before the first confirmed snapshot fails the
/// attach; later errors are logged.
pub type SnapshotHandler =
    Arc<dyn Fn(DocumentSnapshot) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Called with subscription errors before the registration is reset.
pub type ErrorHandler = Arc<dyn Fn(&AppError) + Send + Sync>;

/// Options for [`safe_listen`].
#[derive(Debug, Clone)]
pub struct ListenOptions {
    /// Store name used in log lines.
    pub log_prefix: &'static str,
    /// Wait after unsubscribing the previous listener, giving the backend
    /// time to release the old target before the same one is opened again.
    pub resubscribe_delay: Duration,
}

impl ListenOptions {
    pub fn new(log_prefix: &'static str, resubscribe_delay: Duration) -> Self {
        Self {
            log_prefix,
            resubscribe_delay,
        }
    }
}

#[derive(Debug, Default)]
struct SlotState {
    handle: Option<SubscriptionHandle>,
    listening: bool,
    /// Bumped whenever a registration starts or is torn down. Pumps only
    /// touch the slot while their generation is current.
    generation: u64,
}

/// Listener registration of one store.
#[derive(Debug)]
pub struct ListenerSlot {
    tracks_liveness: bool,
    state: Mutex<SlotState>,
}

impl Default for ListenerSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl ListenerSlot {
    /// Slot that refuses to attach a second listener while one is live.
    pub fn new() -> Self {
        Self {
            tracks_liveness: true,
            state: Mutex::new(SlotState::default()),
        }
    }

    /// Slot whose owner always replaces the listener (e.g. on account
    /// switch) and tears it down itself before attaching.
    pub fn without_liveness() -> Self {
        Self {
            tracks_liveness: false,
            state: Mutex::new(SlotState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_listening(&self) -> bool {
        self.lock().listening
    }

    pub fn has_handle(&self) -> bool {
        self.lock().handle.is_some()
    }

    /// Cancel the current listener, if any, and reset the registration.
    ///
    /// Returns whether a listener was cancelled. Never fails.
    pub fn stop(&self) -> bool {
        let handle = {
            let mut state = self.lock();
            state.generation += 1;
            state.listening = false;
            state.handle.take()
        };
        match handle {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    fn take_handle(&self) -> Option<SubscriptionHandle> {
        self.lock().handle.take()
    }

    fn begin(&self) -> u64 {
        let mut state = self.lock();
        state.generation += 1;
        state.listening = false;
        state.generation
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock().generation == generation
    }

    /// Record a confirmed listener. A stale generation cancels the handle.
    fn confirm(&self, generation: u64, handle: SubscriptionHandle) -> bool {
        let stale = {
            let mut state = self.lock();
            if state.generation == generation {
                state.listening = true;
                state.handle = Some(handle);
                None
            } else {
                Some(handle)
            }
        };
        match stale {
            Some(handle) => {
                handle.cancel();
                false
            }
            None => true,
        }
    }

    /// Clear the registration if it still belongs to `generation`.
    fn reset_if(&self, generation: u64) {
        let handle = {
            let mut state = self.lock();
            if state.generation != generation {
                return;
            }
            state.listening = false;
            state.handle.take()
        };
        if let Some(handle) = handle {
            handle.cancel();
        }
    }
}

/// Attach a document listener to `slot`.
///
/// Resolves after the first snapshot was handled successfully. Rejects on a
/// subscription error, on a handler error before that point, or when the
/// stream ends before delivering anything; in every rejection the slot is
/// left without handle and not listening.
pub async fn safe_listen<F>(
    slot: &Arc<ListenerSlot>,
    backend: &Arc<dyn DocumentBackend>,
    build_path: F,
    on_snapshot: SnapshotHandler,
    on_error: Option<ErrorHandler>,
    options: &ListenOptions,
) -> Result<()>
where
    F: FnOnce() -> DocumentPath,
{
    let prefix = options.log_prefix;

    if slot.tracks_liveness && slot.is_listening() {
        tracing::warn!(store = prefix, "Listener already active, skipping");
        return Ok(());
    }

    if let Some(previous) = slot.take_handle() {
        previous.cancel();
        tokio::time::sleep(options.resubscribe_delay).await;
        tracing::debug!(store = prefix, "Previous listener unsubscribed");
    }

    let generation = slot.begin();
    let path = build_path();

    let Subscription { events, handle } = match backend.subscribe(&path).await {
        Ok(subscription) => subscription,
        Err(e) => {
            tracing::error!(store = prefix, path = %path, error = %e, "Subscribe failed");
            if let Some(on_error) = &on_error {
                on_error(&e);
            }
            slot.reset_if(generation);
            return Err(e);
        }
    };

    let (ready_tx, ready_rx) = oneshot::channel();
    tokio::spawn(pump(
        slot.clone(),
        generation,
        events,
        handle,
        on_snapshot,
        on_error,
        ready_tx,
        prefix,
    ));

    let result = match ready_rx.await {
        Ok(result) => result,
        Err(_) => Err(AppError::Listener(format!(
            "{}: subscription to {} closed before first snapshot",
            prefix, path
        ))),
    };

    if let Err(e) = &result {
        tracing::error!(store = prefix, path = %path, error = %e, "Listen failed");
        slot.reset_if(generation);
    } else {
        tracing::debug!(store = prefix, path = %path, "Listener attached");
    }
    result
}

/// Drive one subscription until it ends, is replaced, or errors.
#[allow(clippy::too_many_arguments)]
async fn pump(
    slot: Arc<ListenerSlot>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<Result<DocumentSnapshot>>,
    handle: SubscriptionHandle,
    on_snapshot: SnapshotHandler,
    on_error: Option<ErrorHandler>,
    ready_tx: oneshot::Sender<Result<()>>,
    prefix: &'static str,
) {
    let mut ready = Some(ready_tx);
    let mut handle = Some(handle);

    while let Some(event) = events.recv().await {
        if !slot.is_current(generation) {
            if let Some(tx) = ready.take() {
                let _ = tx.send(Err(AppError::Listener(format!(
                    "{}: listener replaced before first snapshot",
                    prefix
                ))));
            }
            return;
        }

        match event {
            Ok(snapshot) => match on_snapshot(snapshot).await {
                Ok(()) => {
                    if let Some(tx) = ready.take() {
                        let confirmed = handle
                            .take()
                            .map(|h| slot.confirm(generation, h))
                            .unwrap_or(false);
                        let _ = tx.send(if confirmed {
                            Ok(())
                        } else {
                            Err(AppError::Listener(format!(
                                "{}: listener replaced before first snapshot",
                                prefix
                            )))
                        });
                        if !confirmed {
                            return;
                        }
                    }
                }
                Err(e) => match ready.take() {
                    Some(tx) => {
                        slot.reset_if(generation);
                        let _ = tx.send(Err(e));
                        return;
                    }
                    None => {
                        tracing::warn!(store = prefix, error = %e, "Snapshot handler failed");
                    }
                },
            },
            Err(e) => {
                tracing::error!(store = prefix, error = %e, "onSnapshot failed");
                if let Some(on_error) = &on_error {
                    on_error(&e);
                }
                slot.reset_if(generation);
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Err(e));
                }
                return;
            }
        }
    }

    // Stream ended without our doing (e.g. backend terminated): the slot
    // must not keep claiming a live listener.
    if ready.is_none() {
        tracing::debug!(store = prefix, "Listener stream ended");
        slot.reset_if(generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{BackendEvent, MemoryBackend};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn options() -> ListenOptions {
        ListenOptions::new("test", Duration::from_millis(300))
    }

    fn counting_handler(count: Arc<AtomicUsize>) -> SnapshotHandler {
        Arc::new(move |_snapshot| {
            count.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        })
    }

    fn setup() -> (MemoryBackend, Arc<dyn DocumentBackend>, Arc<ListenerSlot>) {
        let memory = MemoryBackend::new();
        let backend: Arc<dyn DocumentBackend> = Arc::new(memory.clone());
        (memory, backend, Arc::new(ListenerSlot::new()))
    }

    #[tokio::test(start_paused = true)]
    async fn attach_resolves_after_first_snapshot() {
        let (memory, backend, slot) = setup();
        let count = Arc::new(AtomicUsize::new(0));
        let path = DocumentPath::new("app_settings", "global");

        safe_listen(&slot, &backend, || path.clone(), counting_handler(count.clone()), None, &options())
            .await
            .unwrap();

        assert!(slot.is_listening());
        assert!(slot.has_handle());
        assert_eq!(count.load(Ordering::SeqCst), 1);

        memory.put_remote(&path, json!({"maintenance_mode": true}));
        tokio::task::yield_now().await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn live_slot_skips_duplicate_attach() {
        let (memory, backend, slot) = setup();
        let count = Arc::new(AtomicUsize::new(0));
        let path = DocumentPath::new("app_settings", "global");

        for _ in 0..2 {
            safe_listen(&slot, &backend, || path.clone(), counting_handler(count.clone()), None, &options())
                .await
                .unwrap();
        }

        assert_eq!(memory.active_listeners(&path), 1);
        assert_eq!(
            memory.count_events(|e| matches!(e, BackendEvent::Subscribed { .. })),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn replacement_unsubscribes_waits_then_resubscribes() {
        let (memory, backend, _) = setup();
        let slot = Arc::new(ListenerSlot::without_liveness());
        let count = Arc::new(AtomicUsize::new(0));
        let path = DocumentPath::user("u1");

        safe_listen(&slot, &backend, || path.clone(), counting_handler(count.clone()), None, &options())
            .await
            .unwrap();

        let started = tokio::time::Instant::now();
        safe_listen(&slot, &backend, || path.clone(), counting_handler(count.clone()), None, &options())
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(300));

        let events = memory.events();
        assert_eq!(
            events,
            vec![
                BackendEvent::Subscribed { id: 1, path: path.clone() },
                BackendEvent::Unsubscribed { id: 1 },
                BackendEvent::Subscribed { id: 2, path: path.clone() },
            ]
        );
        assert_eq!(memory.active_listeners(&path), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_error_rejects_and_calls_error_handler() {
        let (memory, backend, slot) = setup();
        memory.push_subscribe_fault(crate::db::memory::SubscribeFault::AlreadyExists);
        let errors = Arc::new(AtomicUsize::new(0));
        let seen = errors.clone();
        let on_error: ErrorHandler = Arc::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let err = safe_listen(
            &slot,
            &backend,
            || DocumentPath::user("u1"),
            counting_handler(Arc::new(AtomicUsize::new(0))),
            Some(on_error),
            &options(),
        )
        .await
        .unwrap_err();

        assert!(err.is_already_exists());
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert!(!slot.is_listening());
        assert!(!slot.has_handle());
    }

    #[tokio::test(start_paused = true)]
    async fn handler_error_before_confirmation_resets_slot() {
        let (memory, backend, slot) = setup();
        let path = DocumentPath::user("u1");
        let failing: SnapshotHandler = Arc::new(|_| {
            Box::pin(async { Err(AppError::Listener("bad snapshot".to_string())) })
        });

        let result = safe_listen(&slot, &backend, || path.clone(), failing, None, &options()).await;

        assert!(result.is_err());
        assert!(!slot.is_listening());
        assert!(!slot.has_handle());
        tokio::task::yield_now().await;
        assert_eq!(memory.active_listeners(&path), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn listener_error_after_confirmation_resets_slot() {
        let (memory, backend, slot) = setup();
        let path = DocumentPath::user("u1");
        let errors = Arc::new(AtomicUsize::new(0));
        let seen = errors.clone();
        let on_error: ErrorHandler = Arc::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        safe_listen(
            &slot,
            &backend,
            || path.clone(),
            counting_handler(Arc::new(AtomicUsize::new(0))),
            Some(on_error),
            &options(),
        )
        .await
        .unwrap();

        memory.emit_error(&path, "permission-denied");
        tokio::task::yield_now().await;

        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert!(!slot.is_listening());
        assert!(!slot.has_handle());
        assert_eq!(memory.active_listeners(&path), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn terminated_stream_clears_liveness() {
        let (memory, backend, slot) = setup();
        let path = DocumentPath::user("u1");
        safe_listen(
            &slot,
            &backend,
            || path.clone(),
            counting_handler(Arc::new(AtomicUsize::new(0))),
            None,
            &options(),
        )
        .await
        .unwrap();

        memory.terminate().await.unwrap();
        tokio::task::yield_now().await;
        assert!(!slot.is_listening());
    }

    #[test]
    fn stop_without_listener_is_a_noop() {
        let slot = ListenerSlot::new();
        assert!(!slot.stop());
        assert!(!slot.is_listening());
    }
}
