//! Access gateway: decides whether a request may read one object and, if
//! so, fetches it from the backing store.
//!
//! Checks run strictly in this order and the first failure ends the request:
//! key extraction, bearer header presence, token verification, object
//! lookup. Neither collaborator is touched before the checks ahead of it
//! have passed, so unauthenticated callers cannot probe which keys exist.

use crate::{
    models::object::StoredObject,
    services::{
        object_store::{ObjectStore, StoreError},
        token_service::{TokenError, TokenVerifier},
    },
};
use axum::http::{HeaderMap, header};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

const BEARER_PREFIX: &str = "Bearer ";

#[derive(Debug, Error)]
pub enum GatewayError {
    /// The path names no object (`/`).
    #[error("empty object key")]
    EmptyKey,
    #[error("missing or invalid authorization header")]
    MissingCredentials,
    #[error("token rejected: {0}")]
    Forbidden(#[from] TokenError),
    #[error("object `{0}` not found")]
    ObjectNotFound(String),
    #[error("store lookup for `{key}` failed: {source}")]
    Store {
        key: String,
        #[source]
        source: StoreError,
    },
}

#[derive(Clone)]
pub struct AccessGateway {
    store: Arc<dyn ObjectStore>,
    verifier: Arc<dyn TokenVerifier>,
}

impl AccessGateway {
    pub fn new(store: Arc<dyn ObjectStore>, verifier: Arc<dyn TokenVerifier>) -> Self {
        Self { store, verifier }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Authorize a read of the object named by `path` and open it.
    pub async fn open(&self, path: &str, headers: &HeaderMap) -> Result<StoredObject, GatewayError> {
        let key = object_key(path).ok_or(GatewayError::EmptyKey)?;

        let token = bearer_token(headers).ok_or_else(|| {
            debug!(key, "missing or malformed authorization header");
            GatewayError::MissingCredentials
        })?;

        if let Err(reason) = self.verifier.verify(token).await {
            warn!(key, %reason, "bearer token rejected");
            return Err(GatewayError::Forbidden(reason));
        }

        match self.store.get(key).await {
            Ok(Some(object)) => {
                debug!(key, size = object.metadata.size_bytes, "serving object");
                Ok(object)
            }
            Ok(None) => {
                debug!(key, "object not found");
                Err(GatewayError::ObjectNotFound(key.to_string()))
            }
            Err(source) => {
                error!(key, error = %source, "store lookup failed");
                Err(GatewayError::Store {
                    key: key.to_string(),
                    source,
                })
            }
        }
    }
}

/// The request path without its leading `/`; `None` when nothing is left.
pub fn object_key(path: &str) -> Option<&str> {
    let key = path.strip_prefix('/').unwrap_or(path);
    (!key.is_empty()).then_some(key)
}

/// The token of an `Authorization: Bearer <token>` header. The scheme is
/// matched case-sensitively with exactly one space; the token may be empty.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix(BEARER_PREFIX))
}
