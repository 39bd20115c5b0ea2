// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Local structured databases and named caches.
//!
//! Only the cache guard touches these: it enumerates what exists and drops
//! what belongs to the app. The directory-backed variants map each database
//! (or cache) to an entry under a root directory.

use crate::error::{AppError, Result};
use async_trait::async_trait;
use dashmap::DashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Enumeration and deletion of local databases.
#[async_trait]
pub trait LocalDatabases: Send + Sync {
    async fn database_names(&self) -> Result<Vec<String>>;
    async fn delete_database(&self, name: &str) -> Result<()>;
}

/// Enumeration and deletion of named caches.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    async fn keys(&self) -> Result<Vec<String>>;
    async fn delete(&self, name: &str) -> Result<bool>;
}

/// In-memory database registry.
#[derive(Debug, Default)]
pub struct MemoryDatabases {
    names: DashSet<String>,
    fail_listing: AtomicBool,
}

impl MemoryDatabases {
    pub fn with_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set = DashSet::new();
        for name in names {
            set.insert(name.into());
        }
        Self {
            names: set,
            fail_listing: AtomicBool::new(false),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn set_fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl LocalDatabases for MemoryDatabases {
    async fn database_names(&self) -> Result<Vec<String>> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(AppError::Storage("database enumeration unsupported".to_string()));
        }
        let mut names: Vec<String> = self.names.iter().map(|n| n.key().clone()).collect();
        names.sort();
        Ok(names)
    }

    async fn delete_database(&self, name: &str) -> Result<()> {
        self.names.remove(name);
        Ok(())
    }
}

/// In-memory cache registry.
#[derive(Debug, Default)]
pub struct MemoryCaches {
    names: DashSet<String>,
}

impl MemoryCaches {
    pub fn with_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set = DashSet::new();
        for name in names {
            set.insert(name.into());
        }
        Self { names: set }
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[async_trait]
impl CacheStorage for MemoryCaches {
    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.names.iter().map(|n| n.key().clone()).collect())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        Ok(self.names.remove(name).is_some())
    }
}

/// Databases stored as subdirectories of `root`.
#[derive(Debug, Clone)]
pub struct DirLocalDatabases {
    root: PathBuf,
}

impl DirLocalDatabases {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

async fn list_entries(root: &Path, dirs: bool) -> Result<Vec<String>> {
    let mut out = Vec::new();
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(AppError::Storage(format!("{}: {}", root.display(), e))),
    };
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| AppError::Storage(e.to_string()))?
    {
        let is_dir = entry
            .file_type()
            .await
            .map(|t| t.is_dir())
            .unwrap_or(false);
        if is_dir == dirs {
            if let Some(name) = entry.file_name().to_str() {
                out.push(name.to_string());
            }
        }
    }
    out.sort();
    Ok(out)
}

#[async_trait]
impl LocalDatabases for DirLocalDatabases {
    async fn database_names(&self) -> Result<Vec<String>> {
        list_entries(&self.root, true).await
    }

    async fn delete_database(&self, name: &str) -> Result<()> {
        let path = self.root.join(name);
        tokio::fs::remove_dir_all(&path)
            .await
            .map_err(|e| AppError::Storage(format!("{}: {}", path.display(), e)))
    }
}

/// Caches stored as files in `root`.
#[derive(Debug, Clone)]
pub struct DirCacheStorage {
    root: PathBuf,
}

impl DirCacheStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl CacheStorage for DirCacheStorage {
    async fn keys(&self) -> Result<Vec<String>> {
        list_entries(&self.root, false).await
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        match tokio::fs::remove_file(self.root.join(name)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AppError::Storage(e.to_string())),
        }
    }
}
