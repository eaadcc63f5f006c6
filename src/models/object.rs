//! Represents a game asset held by a backing store, as seen by the gateway.

use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::{fmt, io};
use uuid::Uuid;

/// Readable byte stream of an object's payload.
pub type ObjectBody = BoxStream<'static, io::Result<Bytes>>;

/// HTTP-facing metadata recorded alongside an object when it was stored.
///
/// These are replayed verbatim on the response; the gateway never derives
/// them from the payload.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct HttpMetadata {
    pub content_type: Option<String>,
    pub content_language: Option<String>,
    pub content_disposition: Option<String>,
    pub content_encoding: Option<String>,
    pub cache_control: Option<String>,
}

/// Metadata of a single stored object, independent of where it lives.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ObjectMetadata {
    /// Object key (path-like identifier, e.g. `games/abc/index.html`).
    pub key: String,

    /// Size of the payload in bytes.
    pub size_bytes: i64,

    /// Unquoted entity tag (hex MD5 of the payload for the bundled stores).
    pub etag: String,

    /// When this object was last written.
    pub last_modified: DateTime<Utc>,

    pub http: HttpMetadata,
}

impl ObjectMetadata {
    /// The entity tag in its quoted HTTP form.
    pub fn http_etag(&self) -> String {
        format!("\"{}\"", self.etag)
    }

    /// Write the object's metadata into response headers.
    ///
    /// `content-type` falls back to `application/octet-stream`; the other
    /// HTTP metadata is only written when recorded. Values that are not
    /// valid header text are skipped rather than failing the response.
    pub fn write_http_metadata(&self, headers: &mut HeaderMap) {
        let content_type = self
            .http
            .content_type
            .as_deref()
            .and_then(|v| HeaderValue::from_str(v).ok())
            .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
        headers.insert(header::CONTENT_TYPE, content_type);

        let optional: [(HeaderName, &Option<String>); 4] = [
            (header::CONTENT_LANGUAGE, &self.http.content_language),
            (header::CONTENT_DISPOSITION, &self.http.content_disposition),
            (header::CONTENT_ENCODING, &self.http.content_encoding),
            (header::CACHE_CONTROL, &self.http.cache_control),
        ];
        for (name, value) in optional {
            if let Some(value) = value.as_deref().and_then(|v| HeaderValue::from_str(v).ok()) {
                headers.insert(name, value);
            }
        }

        if let Ok(value) = HeaderValue::from_str(&self.http_etag()) {
            headers.insert(header::ETAG, value);
        }

        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(self.size_bytes.max(0)));

        // RFC 7231 IMF-fixdate
        let last_modified = self
            .last_modified
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string();
        if let Ok(value) = HeaderValue::from_str(&last_modified) {
            headers.insert(header::LAST_MODIFIED, value);
        }
    }
}

/// An object returned by a store lookup: metadata plus a payload stream.
pub struct StoredObject {
    pub metadata: ObjectMetadata,
    pub body: ObjectBody,
}

impl fmt::Debug for StoredObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredObject")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Row of the `objects` table used by the disk-backed store.
#[derive(Clone, FromRow, Debug)]
pub struct ObjectRecord {
    /// Internal UUID for DB indexing.
    pub id: Uuid,
    pub key: String,
    /// Names the payload file of the current write; changes on every overwrite.
    pub version_id: Uuid,
    pub content_type: Option<String>,
    pub content_language: Option<String>,
    pub content_disposition: Option<String>,
    pub content_encoding: Option<String>,
    pub cache_control: Option<String>,
    pub size_bytes: i64,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
    /// Whether the object is marked as deleted (soft delete).
    pub is_deleted: bool,
}

impl From<ObjectRecord> for ObjectMetadata {
    fn from(record: ObjectRecord) -> Self {
        Self {
            key: record.key,
            size_bytes: record.size_bytes,
            etag: record.etag,
            last_modified: record.last_modified,
            http: HttpMetadata {
                content_type: record.content_type,
                content_language: record.content_language,
                content_disposition: record.content_disposition,
                content_encoding: record.content_encoding,
                cache_control: record.cache_control,
            },
        }
    }
}
