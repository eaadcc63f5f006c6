//! Read-side contract of the backing blob store, plus an in-memory store.

use crate::models::object::{HttpMetadata, ObjectMetadata, StoredObject};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::{StreamExt, stream};
use std::{collections::HashMap, io, sync::Arc};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of one readiness probe against a store.
#[derive(Debug, Clone)]
pub struct HealthCheck {
    pub name: &'static str,
    pub error: Option<String>,
}

impl HealthCheck {
    pub fn ok(name: &'static str) -> Self {
        Self { name, error: None }
    }

    pub fn failed(name: &'static str, error: impl Into<String>) -> Self {
        Self {
            name,
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Key → blob lookup used by the gateway.
///
/// `Ok(None)` means the object does not exist; `Err` is reserved for
/// failures of the store itself so callers can tell the two apart.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<StoredObject>>;

    /// Readiness probes for `/readyz`. Stores with nothing to probe report none.
    async fn health_checks(&self) -> Vec<HealthCheck> {
        Vec::new()
    }
}

#[derive(Clone)]
struct MemoryEntry {
    metadata: ObjectMetadata,
    payload: Bytes,
}

/// Store keeping every object in memory. Cheap to clone; clones share contents.
#[derive(Clone, Default)]
pub struct MemoryStore {
    objects: Arc<RwLock<HashMap<String, MemoryEntry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an object, computing its MD5 entity tag.
    pub async fn put(
        &self,
        key: impl Into<String>,
        payload: impl Into<Bytes>,
        http: HttpMetadata,
    ) -> ObjectMetadata {
        let key = key.into();
        let payload = payload.into();
        let metadata = ObjectMetadata {
            key: key.clone(),
            size_bytes: payload.len() as i64,
            etag: format!("{:x}", md5::compute(&payload)),
            last_modified: Utc::now(),
            http,
        };

        self.objects.write().await.insert(
            key,
            MemoryEntry {
                metadata: metadata.clone(),
                payload,
            },
        );
        metadata
    }

    pub async fn remove(&self, key: &str) -> bool {
        self.objects.write().await.remove(key).is_some()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<StoredObject>> {
        let objects = self.objects.read().await;
        Ok(objects.get(key).map(|entry| StoredObject {
            metadata: entry.metadata.clone(),
            body: stream::once(futures::future::ready(Ok(entry.payload.clone()))).boxed(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn put_then_get_returns_payload_and_md5_etag() {
        let store = MemoryStore::new();
        let meta = store
            .put(
                "games/abc/index.html",
                "<html></html>",
                HttpMetadata {
                    content_type: Some("text/html".into()),
                    ..Default::default()
                },
            )
            .await;
        assert_eq!(meta.etag, format!("{:x}", md5::compute(b"<html></html>")));
        assert_eq!(meta.size_bytes, 13);

        let object = store
            .get("games/abc/index.html")
            .await
            .unwrap()
            .expect("object should exist");
        assert_eq!(object.metadata, meta);
        let chunks: Vec<Bytes> = object.body.try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"<html></html>");
    }

    #[tokio::test]
    async fn missing_and_removed_keys_are_absent() {
        let store = MemoryStore::new();
        assert!(store.get("missing/key").await.unwrap().is_none());

        store.put("a", "x", HttpMetadata::default()).await;
        assert!(store.remove("a").await);
        assert!(store.get("a").await.unwrap().is_none());
        assert!(!store.remove("a").await);
    }
}
