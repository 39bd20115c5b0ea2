// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Error types shared by the session core and its collaborators.

/// Error type for backend, storage and auth collaborator failures.
///
/// None of these reach the host unhandled: the stores and the coordinator
/// translate them into `bool` results, outcome enums or guest fallback.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// The backend refused a subscription because an identical one is still
    /// registered server-side. Retried with backoff.
    #[error("Listener already exists: {0}")]
    AlreadyExists(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Listener error: {0}")]
    Listener(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Auth provider error: {0}")]
    Auth(String),

    #[error("Store not initialized: {0}")]
    NotInitialized(&'static str),

    #[error("Public data error: {0}")]
    PublicData(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Whether this error belongs to the transient "already exists" class.
    ///
    /// Backends do not always surface a dedicated code, so messages carrying
    /// the conflict marker are classified the same way.
    pub fn is_already_exists(&self) -> bool {
        match self {
            AppError::AlreadyExists(_) => true,
            AppError::Backend(msg) | AppError::Listener(msg) => {
                let msg = msg.to_lowercase();
                msg.contains("already-exists") || msg.contains("already exists")
            }
            _ => false,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(anyhow::anyhow!("JSON error: {}", err))
    }
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, AppError>;
