// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Durable key-value tier backed by a JSON file.
//!
//! Entries are cached in memory and the whole map is rewritten on every
//! mutation. The map is small (a handful of flags), so this stays cheap.

use crate::error::{AppError, Result};
use crate::storage::KeyValueStore;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: DashMap<String, String>,
}

impl FileStore {
    /// Open (or create on first write) the store at `path`.
    ///
    /// A missing file is an empty store; an unreadable one is an error.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = DashMap::new();

        match std::fs::read_to_string(&path) {
            Ok(raw) => {
                let map: BTreeMap<String, String> = serde_json::from_str(&raw)
                    .map_err(|e| AppError::Storage(format!("{}: {}", path.display(), e)))?;
                for (k, v) in map {
                    entries.insert(k, v);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(AppError::Storage(format!("{}: {}", path.display(), e))),
        }

        Ok(Self { path, entries })
    }

    fn persist(&self) -> Result<()> {
        let map: BTreeMap<String, String> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let raw = serde_json::to_string_pretty(&map)?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AppError::Storage(format!("{}: {}", parent.display(), e)))?;
        }
        std::fs::write(&self.path, raw)
            .map_err(|e| AppError::Storage(format!("{}: {}", self.path.display(), e)))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|v| v.value().clone())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        self.persist()
    }

    fn remove(&self, key: &str) -> Result<()> {
        if self.entries.remove(key).is_some() {
            self.persist()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/local.json");

        let store = FileStore::open(&path).unwrap();
        store.set("app_cache_version", "1.0.1").unwrap();
        store.set("loginMethod", "redirect").unwrap();
        store.remove("loginMethod").unwrap();

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get("app_cache_version").as_deref(), Some("1.0.1"));
        assert_eq!(reopened.get("loginMethod"), None);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(FileStore::open(&path), Err(AppError::Storage(_))));
    }
}
