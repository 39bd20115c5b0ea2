// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore client wrapper implementing [`DocumentBackend`].
//!
//! Provides:
//! - Document reads and (merge) writes through the fluent API
//! - A snapshot feed per document, driven by polling at `poll_interval`
//! - `terminate()`, which drops the client and ends every feed; the next
//!   operation reconnects

use crate::db::{DocumentBackend, DocumentPath, DocumentSnapshot, Subscription, SubscriptionHandle};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, RwLock};

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    inner: Arc<Inner>,
}

struct Inner {
    project_id: String,
    poll_interval: Duration,
    /// `None` after `terminate()` or in offline mode.
    client: RwLock<Option<firestore::FirestoreDb>>,
    offline: bool,
    /// Bumped on every terminate; feeds started under an older epoch stop.
    epoch: watch::Sender<u64>,
    next_id: AtomicU64,
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str, poll_interval: Duration) -> Result<Self> {
        let client = connect(project_id).await?;
        Ok(Self::from_parts(project_id, poll_interval, Some(client), false))
    }

    /// Create a mock Firestore client for testing (offline mode).
    ///
    /// All database operations will return an error if called.
    pub fn new_mock() -> Self {
        Self::from_parts("offline", Duration::from_secs(1), None, true)
    }

    fn from_parts(
        project_id: &str,
        poll_interval: Duration,
        client: Option<firestore::FirestoreDb>,
        offline: bool,
    ) -> Self {
        let (epoch, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                project_id: project_id.to_string(),
                poll_interval,
                client: RwLock::new(client),
                offline,
                epoch,
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Helper to get the client, reconnecting after a terminate.
    async fn get_client(&self) -> Result<firestore::FirestoreDb> {
        if let Some(client) = self.inner.client.read().await.as_ref() {
            return Ok(client.clone());
        }
        if self.inner.offline {
            return Err(AppError::Backend(
                "Database not connected (offline mode)".to_string(),
            ));
        }

        let mut slot = self.inner.client.write().await;
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }
        let client = connect(&self.inner.project_id).await?;
        *slot = Some(client.clone());
        Ok(client)
    }

    async fn read(&self, path: &DocumentPath) -> Result<Option<Value>> {
        self.get_client()
            .await?
            .fluent()
            .select()
            .by_id_in(&path.collection)
            .obj()
            .one(&path.id)
            .await
            .map_err(|e| classify(e.to_string()))
    }
}

/// Map a Firestore error message onto the error taxonomy.
fn classify(message: String) -> AppError {
    let lower = message.to_lowercase();
    if lower.contains("already-exists") || lower.contains("already exists") {
        AppError::AlreadyExists(message)
    } else {
        AppError::Backend(message)
    }
}

async fn connect(project_id: &str) -> Result<firestore::FirestoreDb> {
    // If the emulator environment variable is set, use unauthenticated connection
    // to avoid local credential warnings and leakage.
    if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
        return connect_emulator(project_id).await;
    }

    let client = firestore::FirestoreDb::new(project_id)
        .await
        .map_err(|e| AppError::Backend(format!("Failed to connect to Firestore: {}", e)))?;

    tracing::info!(project = project_id, "Connected to Firestore");
    Ok(client)
}

/// Create a Firestore client for the emulator with unauthenticated access.
async fn connect_emulator(project_id: &str) -> Result<firestore::FirestoreDb> {
    tracing::info!("Using unauthenticated connection for Firestore Emulator");

    let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
        Ok(gcloud_sdk::Token {
            token_type: "Bearer".to_string(),
            token: gcloud_sdk::SecretValue::new(
                "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                    .to_string()
                    .into(),
            ),
            expiry: chrono::Utc::now() + chrono::Duration::hours(1),
        })
    });

    let options = firestore::FirestoreDbOptions::new(project_id.to_string());

    let client = firestore::FirestoreDb::with_options_token_source(
        options,
        gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
        gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
    )
    .await
    .map_err(|e| AppError::Backend(format!("Failed to connect to Firestore Emulator: {}", e)))?;

    tracing::info!(
        project = project_id,
        "Connected to Firestore (Emulator/Unauthenticated)"
    );
    Ok(client)
}

#[async_trait]
impl DocumentBackend for FirestoreDb {
    async fn subscribe(&self, path: &DocumentPath) -> Result<Subscription> {
        // Fail fast so the caller's retry policy sees connection problems.
        self.get_client().await?;

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        let mut epoch = self.inner.epoch.subscribe();

        let db = self.clone();
        let doc_path = path.clone();
        let interval = self.inner.poll_interval;

        tokio::spawn(async move {
            let mut last: Option<Option<Value>> = None;
            loop {
                match db.read(&doc_path).await {
                    Ok(data) => {
                        if last.as_ref() != Some(&data) {
                            let snapshot = DocumentSnapshot {
                                path: doc_path.clone(),
                                data: data.clone(),
                            };
                            if tx.send(Ok(snapshot)).is_err() {
                                break;
                            }
                            last = Some(data);
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        break;
                    }
                }

                tokio::select! {
                    _ = &mut cancel_rx => break,
                    _ = epoch.changed() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            tracing::debug!(path = %doc_path, id, "Snapshot feed stopped");
        });

        let handle = SubscriptionHandle::new(id, move || {
            let _ = cancel_tx.send(());
        });
        Ok(Subscription { events: rx, handle })
    }

    async fn get_doc(&self, path: &DocumentPath) -> Result<Option<Value>> {
        self.read(path).await
    }

    async fn set_doc(&self, path: &DocumentPath, data: Value, merge: bool) -> Result<()> {
        let client = self.get_client().await?;

        let _: () = if merge {
            // Only the top-level sections present in `data` are replaced;
            // callers send fully merged sections.
            let fields: Vec<String> = data
                .as_object()
                .map(|m| m.keys().cloned().collect())
                .unwrap_or_default();
            client
                .fluent()
                .update()
                .fields(fields)
                .in_col(&path.collection)
                .document_id(&path.id)
                .object(&data)
                .execute()
                .await
                .map_err(|e| classify(e.to_string()))?
        } else {
            client
                .fluent()
                .update()
                .in_col(&path.collection)
                .document_id(&path.id)
                .object(&data)
                .execute()
                .await
                .map_err(|e| classify(e.to_string()))?
        };
        Ok(())
    }

    async fn terminate(&self) -> Result<()> {
        let previous = self.inner.client.write().await.take();
        self.inner.epoch.send_modify(|e| *e += 1);
        tracing::info!(
            project = %self.inner.project_id,
            was_connected = previous.is_some(),
            "Firestore connection terminated"
        );
        Ok(())
    }
}
