//! Document backend (Firestore) port and adapters.
//!
//! Snapshot subscriptions are explicit handles: a [`Subscription`] carries
//! the event stream plus a [`SubscriptionHandle`] that unsubscribes when
//! cancelled or dropped.

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreDb;
pub use memory::{BackendEvent, MemoryBackend};

use crate::error::Result;
use crate::time_utils::format_utc_rfc3339;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use tokio::sync::mpsc;

/// Collection names as constants.
pub mod collections {
    pub const USERS: &str = "users";
    pub const APP_SETTINGS: &str = "app_settings";
    pub const INSIGHTS: &str = "insights";
}

/// Location of a single document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentPath {
    pub collection: String,
    pub id: String,
}

impl DocumentPath {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }

    pub fn user(uid: &str) -> Self {
        Self::new(collections::USERS, uid)
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// One emission of a document listener.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    pub path: DocumentPath,
    /// `None` when the document does not exist.
    pub data: Option<Value>,
}

impl DocumentSnapshot {
    pub fn exists(&self) -> bool {
        self.data.is_some()
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }
}

/// Item of a subscription stream. An `Err` ends the subscription.
pub type SnapshotEvent = Result<DocumentSnapshot>;

/// Unsubscribe handle of a live subscription.
///
/// Cancelling is idempotent; dropping the handle cancels as well.
pub struct SubscriptionHandle {
    id: u64,
    on_cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl SubscriptionHandle {
    pub fn new(id: u64, on_cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            id,
            on_cancel: Some(Box::new(on_cancel)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Unsubscribe from the backend.
    pub fn cancel(mut self) {
        self.run_cancel();
    }

    fn run_cancel(&mut self) {
        if let Some(on_cancel) = self.on_cancel.take() {
            on_cancel();
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.run_cancel();
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("active", &self.on_cancel.is_some())
            .finish()
    }
}

/// A live document subscription.
#[derive(Debug)]
pub struct Subscription {
    pub events: mpsc::UnboundedReceiver<SnapshotEvent>,
    pub handle: SubscriptionHandle,
}

/// Real-time document backend.
#[async_trait]
pub trait DocumentBackend: Send + Sync {
    /// Open a live subscription. The first event reports the current state of
    /// the document, later events report changes.
    async fn subscribe(&self, path: &DocumentPath) -> Result<Subscription>;

    /// One-shot read.
    async fn get_doc(&self, path: &DocumentPath) -> Result<Option<Value>>;

    /// Write a document; with `merge` the data is merged into what exists.
    async fn set_doc(&self, path: &DocumentPath, data: Value, merge: bool) -> Result<()>;

    /// Drop the backend connection. Open subscriptions end; the next call
    /// reconnects.
    async fn terminate(&self) -> Result<()>;

    /// Timestamp stamped on documents created by the client.
    fn server_timestamp(&self) -> String {
        format_utc_rfc3339(chrono::Utc::now())
    }
}
