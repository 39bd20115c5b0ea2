// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process document backend.
//!
//! Behaves like the real backend from the client's point of view: every
//! subscription starts with the current document state and every write is
//! echoed to subscribers of the same path. Used by tests and by the offline
//! runner. Faults can be queued to exercise retry and degrade paths.

use crate::db::{DocumentBackend, DocumentPath, DocumentSnapshot, Subscription, SubscriptionHandle};
use crate::error::{AppError, Result};
use crate::models::deep_merge;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// Observable backend call, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    Subscribed { id: u64, path: DocumentPath },
    Unsubscribed { id: u64 },
    Written { path: DocumentPath, merge: bool },
    Terminated,
}

/// Fault returned by the next `subscribe` call.
#[derive(Debug, Clone)]
pub enum SubscribeFault {
    AlreadyExists,
    Other(String),
}

struct Subscriber {
    path: DocumentPath,
    tx: mpsc::UnboundedSender<crate::db::SnapshotEvent>,
}

#[derive(Default)]
struct Inner {
    docs: DashMap<DocumentPath, Value>,
    subscribers: DashMap<u64, Subscriber>,
    next_id: AtomicU64,
    subscribe_faults: Mutex<VecDeque<SubscribeFault>>,
    path_faults: DashMap<DocumentPath, SubscribeFault>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    fail_terminate: AtomicBool,
    events: Mutex<Vec<BackendEvent>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Inner {
    fn record(&self, event: BackendEvent) {
        lock(&self.events).push(event);
    }

    fn broadcast(&self, path: &DocumentPath) {
        let snapshot = DocumentSnapshot {
            path: path.clone(),
            data: self.docs.get(path).map(|d| d.value().clone()),
        };
        for sub in self.subscribers.iter() {
            if &sub.path == path {
                // A closed receiver only means the listener is gone.
                let _ = sub.tx.send(Ok(snapshot.clone()));
            }
        }
    }
}

/// In-memory [`DocumentBackend`].
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a document as if another client wrote it, notifying listeners.
    pub fn put_remote(&self, path: &DocumentPath, data: Value) {
        self.inner.docs.insert(path.clone(), data);
        self.inner.broadcast(path);
    }

    /// Delete a document remotely, notifying listeners.
    pub fn delete_remote(&self, path: &DocumentPath) {
        self.inner.docs.remove(path);
        self.inner.broadcast(path);
    }

    /// Current stored document.
    pub fn document(&self, path: &DocumentPath) -> Option<Value> {
        self.inner.docs.get(path).map(|d| d.value().clone())
    }

    /// Make the next `subscribe` call fail with `fault`. Faults queue up.
    pub fn push_subscribe_fault(&self, fault: SubscribeFault) {
        lock(&self.inner.subscribe_faults).push_back(fault);
    }

    /// Make the next `subscribe` call on `path` fail with `fault`.
    pub fn fail_next_subscribe_to(&self, path: &DocumentPath, fault: SubscribeFault) {
        self.inner.path_faults.insert(path.clone(), fault);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.inner.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_terminate(&self, fail: bool) {
        self.inner.fail_terminate.store(fail, Ordering::SeqCst);
    }

    /// Deliver a listener error to every subscriber of `path`.
    pub fn emit_error(&self, path: &DocumentPath, message: &str) {
        for sub in self.inner.subscribers.iter() {
            if &sub.path == path {
                let _ = sub.tx.send(Err(AppError::Listener(message.to_string())));
            }
        }
    }

    /// Number of open subscriptions on `path`.
    pub fn active_listeners(&self, path: &DocumentPath) -> usize {
        self.inner
            .subscribers
            .iter()
            .filter(|s| &s.path == path)
            .count()
    }

    /// Number of open subscriptions on any path.
    pub fn total_listeners(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// Every backend call made so far, in order.
    pub fn events(&self) -> Vec<BackendEvent> {
        lock(&self.inner.events).clone()
    }

    pub fn count_events(&self, pred: impl Fn(&BackendEvent) -> bool) -> usize {
        lock(&self.inner.events).iter().filter(|e| pred(e)).count()
    }
}

#[async_trait]
impl DocumentBackend for MemoryBackend {
    async fn subscribe(&self, path: &DocumentPath) -> Result<Subscription> {
        let fault = self
            .inner
            .path_faults
            .remove(path)
            .map(|(_, fault)| fault)
            .or_else(|| lock(&self.inner.subscribe_faults).pop_front());
        if let Some(fault) = fault {
            return Err(match fault {
                SubscribeFault::AlreadyExists => {
                    AppError::AlreadyExists(format!("listener for {} already exists", path))
                }
                SubscribeFault::Other(msg) => AppError::Backend(msg),
            });
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::unbounded_channel();

        let initial = DocumentSnapshot {
            path: path.clone(),
            data: self.document(path),
        };
        let _ = tx.send(Ok(initial));

        self.inner.subscribers.insert(
            id,
            Subscriber {
                path: path.clone(),
                tx,
            },
        );
        self.inner.record(BackendEvent::Subscribed {
            id,
            path: path.clone(),
        });

        let inner = Arc::downgrade(&self.inner);
        let handle = SubscriptionHandle::new(id, move || {
            if let Some(inner) = inner.upgrade() {
                if inner.subscribers.remove(&id).is_some() {
                    inner.record(BackendEvent::Unsubscribed { id });
                }
            }
        });

        Ok(Subscription { events: rx, handle })
    }

    async fn get_doc(&self, path: &DocumentPath) -> Result<Option<Value>> {
        if self.inner.fail_reads.load(Ordering::SeqCst) {
            return Err(AppError::Backend(format!("read of {} failed", path)));
        }
        Ok(self.document(path))
    }

    async fn set_doc(&self, path: &DocumentPath, data: Value, merge: bool) -> Result<()> {
        if self.inner.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::Backend(format!("write to {} failed", path)));
        }

        {
            let mut entry = self
                .inner
                .docs
                .entry(path.clone())
                .or_insert_with(|| Value::Object(Default::default()));
            if merge {
                deep_merge(entry.value_mut(), &data);
            } else {
                *entry.value_mut() = data;
            }
        }

        self.inner.record(BackendEvent::Written {
            path: path.clone(),
            merge,
        });
        self.inner.broadcast(path);
        Ok(())
    }

    async fn terminate(&self) -> Result<()> {
        self.inner.record(BackendEvent::Terminated);
        if self.inner.fail_terminate.load(Ordering::SeqCst) {
            return Err(AppError::Backend("terminate failed".to_string()));
        }
        // Dropping the senders ends every open stream.
        self.inner.subscribers.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscription_starts_with_current_state() {
        let backend = MemoryBackend::new();
        let path = DocumentPath::user("u1");

        let mut sub = backend.subscribe(&path).await.unwrap();
        let first = sub.events.recv().await.unwrap().unwrap();
        assert!(!first.exists());

        backend.set_doc(&path, json!({"a": 1}), false).await.unwrap();
        let echo = sub.events.recv().await.unwrap().unwrap();
        assert_eq!(echo.data(), Some(&json!({"a": 1})));

        backend.delete_remote(&path);
        let gone = sub.events.recv().await.unwrap().unwrap();
        assert!(!gone.exists());
        assert_eq!(backend.document(&path), None);
    }

    #[tokio::test]
    async fn failing_reads_leave_documents_in_place() {
        let backend = MemoryBackend::new();
        let path = DocumentPath::user("u1");
        backend.put_remote(&path, json!({"a": 1}));

        backend.set_fail_reads(true);
        assert!(backend.get_doc(&path).await.is_err());

        backend.set_fail_reads(false);
        assert_eq!(backend.get_doc(&path).await.unwrap(), Some(json!({"a": 1})));
    }

    #[tokio::test]
    async fn merge_write_keeps_other_fields() {
        let backend = MemoryBackend::new();
        let path = DocumentPath::user("u1");
        backend.put_remote(&path, json!({"prefs": {"a": 1, "b": 2}, "data": {}}));

        backend
            .set_doc(&path, json!({"prefs": {"b": 3}}), true)
            .await
            .unwrap();

        assert_eq!(
            backend.document(&path),
            Some(json!({"prefs": {"a": 1, "b": 3}, "data": {}}))
        );
    }

    #[tokio::test]
    async fn cancel_and_drop_unsubscribe_once() {
        let backend = MemoryBackend::new();
        let path = DocumentPath::user("u1");

        let sub = backend.subscribe(&path).await.unwrap();
        assert_eq!(backend.active_listeners(&path), 1);
        sub.handle.cancel();
        assert_eq!(backend.active_listeners(&path), 0);

        let sub = backend.subscribe(&path).await.unwrap();
        drop(sub);
        assert_eq!(backend.active_listeners(&path), 0);
        assert_eq!(
            backend.count_events(|e| matches!(e, BackendEvent::Unsubscribed { .. })),
            2
        );
    }

    #[tokio::test]
    async fn queued_faults_fail_in_order() {
        let backend = MemoryBackend::new();
        backend.push_subscribe_fault(SubscribeFault::AlreadyExists);
        let path = DocumentPath::user("u1");

        let err = backend.subscribe(&path).await.unwrap_err();
        assert!(err.is_already_exists());
        assert!(backend.subscribe(&path).await.is_ok());
    }

    #[tokio::test]
    async fn path_fault_skips_other_paths() {
        let backend = MemoryBackend::new();
        let settings = DocumentPath::new("app_settings", "global");
        backend.fail_next_subscribe_to(&settings, SubscribeFault::Other("offline".into()));

        assert!(backend.subscribe(&DocumentPath::user("u1")).await.is_ok());
        assert!(backend.subscribe(&settings).await.is_err());
        assert!(backend.subscribe(&settings).await.is_ok());
    }

    #[tokio::test]
    async fn terminate_closes_streams() {
        let backend = MemoryBackend::new();
        let path = DocumentPath::user("u1");
        let mut sub = backend.subscribe(&path).await.unwrap();
        let _ = sub.events.recv().await;

        backend.terminate().await.unwrap();
        assert!(sub.events.recv().await.is_none());
        assert_eq!(backend.total_listeners(), 0);
    }
}
