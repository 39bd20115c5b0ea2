// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Public data for guest mode.
//!
//! Guests get no listeners. Instead the public-data endpoint is fetched once
//! and each store takes its entry from the response.

use crate::error::{AppError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

/// Public data keyed by store name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublicData {
    entries: BTreeMap<String, Value>,
}

impl PublicData {
    /// Build from the endpoint's JSON object.
    ///
    /// The endpoint names entries in camelCase (`appSettings`); they are
    /// stored under the snake_case store names.
    pub fn from_json(value: Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(AppError::PublicData(
                "expected a JSON object keyed by store name".to_string(),
            ));
        };
        let entries = map
            .into_iter()
            .map(|(key, value)| (to_snake_case(&key), value))
            .collect();
        Ok(Self { entries })
    }

    pub fn with_entry(mut self, store: &str, value: Value) -> Self {
        self.entries.insert(store.to_string(), value);
        self
    }

    pub fn get(&self, store: &str) -> Option<&Value> {
        self.entries.get(store)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn to_snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for c in key.chars() {
        if c.is_ascii_uppercase() {
            out.push('_');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Source of guest-mode data.
#[async_trait]
pub trait PublicDataSource: Send + Sync {
    async fn fetch(&self) -> Result<PublicData>;
}

/// Fetches public data from the HTTP endpoint.
#[derive(Clone)]
pub struct HttpPublicDataSource {
    http: reqwest::Client,
    url: String,
}

impl HttpPublicDataSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl PublicDataSource for HttpPublicDataSource {
    async fn fetch(&self) -> Result<PublicData> {
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| AppError::PublicData(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::PublicData(format!(
                "Failed to fetch guest data: HTTP {}: {}",
                status, body
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AppError::PublicData(format!("JSON parse error: {}", e)))?;
        PublicData::from_json(body)
    }
}

/// Fixed public data, for tests and offline runs.
#[derive(Debug, Clone, Default)]
pub struct StaticPublicData {
    data: Option<PublicData>,
}

impl StaticPublicData {
    pub fn new(data: PublicData) -> Self {
        Self { data: Some(data) }
    }

    /// Source whose fetch always fails.
    pub fn unavailable() -> Self {
        Self { data: None }
    }

    /// No entries; guest stores fall back to their defaults.
    pub fn empty() -> Self {
        Self::new(PublicData::default())
    }
}

#[async_trait]
impl PublicDataSource for StaticPublicData {
    async fn fetch(&self) -> Result<PublicData> {
        self.data
            .clone()
            .ok_or_else(|| AppError::PublicData("public data unavailable".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn camel_case_keys_map_to_store_names() {
        let data = PublicData::from_json(json!({
            "appSettings": {"maintenance_mode": true},
            "insights": {"items": []}
        }))
        .unwrap();

        assert_eq!(data.len(), 2);
        assert_eq!(data.get("app_settings").unwrap()["maintenance_mode"], true);
        assert!(data.get("insights").is_some());
    }

    #[test]
    fn non_object_body_is_rejected() {
        assert!(PublicData::from_json(json!([1, 2])).is_err());
    }

    #[tokio::test]
    async fn unavailable_source_fails() {
        assert!(StaticPublicData::unavailable().fetch().await.is_err());
        assert!(StaticPublicData::empty().fetch().await.unwrap().is_empty());
    }
}
