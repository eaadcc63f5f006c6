//! src/services/storage_service.rs
//!
//! DiskStore: the local backing store for game assets. Metadata lives in
//! SQLite, payloads live on disk sharded beneath
//! `base_path/{shard}/{shard}/{version_id}`. Every write gets a fresh
//! `version_id`, so a row only ever points at the payload it describes.
//! The gateway only reads through [`ObjectStore`]; `put_object_stream`
//! exists for operators seeding the store.

use crate::{
    models::object::{HttpMetadata, ObjectMetadata, ObjectRecord, StoredObject},
    services::object_store::{HealthCheck, ObjectStore, StoreError, StoreResult},
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use sqlx::SqlitePool;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

const MAX_OBJECT_KEY_LEN: usize = 1024;
const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");
const RECORD_COLUMNS: &str = "id, key, version_id, content_type, content_language, \
     content_disposition, content_encoding, cache_control, size_bytes, etag, last_modified, is_deleted";

#[derive(Clone)]
pub struct DiskStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

impl DiskStore {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Apply the embedded schema. Safe to run repeatedly.
    pub async fn migrate(&self) -> StoreResult<usize> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        for stmt in &statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(*stmt).execute(&*self.db).await?;
        }
        Ok(statements.len())
    }

    /// Rejects keys that are not storable.
    fn ensure_key_safe(key: &str) -> StoreResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(StoreError::InvalidObjectKey);
        }
        if key.starts_with('/') || key.contains("..") {
            return Err(StoreError::InvalidObjectKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(StoreError::InvalidObjectKey);
        }
        Ok(())
    }

    /// Two-level shard directories from MD5(key), as lowercase hex (00–ff).
    fn object_shards(key: &str) -> (String, String) {
        let digest = md5::compute(key);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Payload file of one write of `key`.
    fn version_path(&self, key: &str, version_id: Uuid) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(key);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(version_id.hyphenated().to_string());
        path
    }

    async fn fetch_object(&self, key: &str) -> StoreResult<Option<ObjectRecord>> {
        let record = sqlx::query_as::<_, ObjectRecord>(&format!(
            "SELECT {} FROM objects WHERE key = ? AND is_deleted = 0",
            RECORD_COLUMNS
        ))
        .bind(key)
        .fetch_optional(&*self.db)
        .await?;
        Ok(record)
    }

    /// Open the payload `record` points at.
    ///
    /// An overwrite landing between reading the row and opening the file
    /// removes that payload; the row is then read once more and the newer
    /// version served instead.
    async fn open_record(&self, key: &str, record: ObjectRecord) -> StoreResult<Option<StoredObject>> {
        if let Some(file) = self.open_payload(key, record.version_id).await? {
            return Ok(Some(stored_object(record, file)));
        }

        let Some(latest) = self.fetch_object(key).await? else {
            return Ok(None);
        };
        if latest.version_id == record.version_id {
            debug!(key, version_id = %record.version_id, "metadata present but payload missing");
            return Ok(None);
        }
        Ok(self
            .open_payload(key, latest.version_id)
            .await?
            .map(|file| stored_object(latest, file)))
    }

    async fn open_payload(&self, key: &str, version_id: Uuid) -> StoreResult<Option<File>> {
        match File::open(self.version_path(key, version_id)).await {
            Ok(file) => Ok(Some(file)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    /// Stream an object payload to disk and upsert its metadata row.
    ///
    /// Bytes go to a temporary file first while MD5 and size are computed;
    /// the file is fsynced and renamed to its own version path, then the row
    /// is switched to it. The previous version's file is removed last.
    pub async fn put_object_stream<S>(
        &self,
        key: &str,
        http: HttpMetadata,
        stream: S,
    ) -> StoreResult<ObjectMetadata>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        Self::ensure_key_safe(key)?;

        let version_id = Uuid::new_v4();
        let file_path = self.version_path(key, version_id);
        let parent = file_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| StoreError::Io(io::Error::other("object path missing parent directory")))?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = self.base_path.join(format!(".tmp-{}", version_id));

        let (size_bytes, etag) = match write_payload(&tmp_path, stream).await {
            Ok(written) => written,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::Io(err));
            }
        };
        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }

        match self
            .upsert_record(key, version_id, http, size_bytes, etag)
            .await
        {
            Ok((metadata, previous)) => {
                if let Some(previous) = previous.filter(|p| *p != version_id) {
                    let old_path = self.version_path(key, previous);
                    match fs::remove_file(&old_path).await {
                        Ok(_) => debug!("removed superseded payload {}", old_path.display()),
                        Err(err) => debug!("could not remove {}: {}", old_path.display(), err),
                    }
                }
                Ok(metadata)
            }
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(err)
            }
        }
    }

    /// Point the row for `key` at `version_id`, returning the new metadata
    /// and the version it replaced.
    async fn upsert_record(
        &self,
        key: &str,
        version_id: Uuid,
        http: HttpMetadata,
        size_bytes: i64,
        etag: String,
    ) -> StoreResult<(ObjectMetadata, Option<Uuid>)> {
        let mut tx = self.db.begin().await?;

        let previous = sqlx::query_scalar::<_, Uuid>("SELECT version_id FROM objects WHERE key = ?")
            .bind(key)
            .fetch_optional(&mut *tx)
            .await?;

        let record = sqlx::query_as::<_, ObjectRecord>(&format!(
            r#"
            INSERT INTO objects (
                id, key, version_id, content_type, content_language, content_disposition,
                content_encoding, cache_control, size_bytes, etag, last_modified, is_deleted
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
            ON CONFLICT(key) DO UPDATE SET
                version_id = excluded.version_id,
                content_type = excluded.content_type,
                content_language = excluded.content_language,
                content_disposition = excluded.content_disposition,
                content_encoding = excluded.content_encoding,
                cache_control = excluded.cache_control,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified,
                is_deleted = 0
            RETURNING {}
            "#,
            RECORD_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(key)
        .bind(version_id)
        .bind(http.content_type)
        .bind(http.content_language)
        .bind(http.content_disposition)
        .bind(http.content_encoding)
        .bind(http.cache_control)
        .bind(size_bytes)
        .bind(&etag)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((record.into(), previous))
    }

    async fn probe_sqlite(&self) -> HealthCheck {
        match sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await
        {
            Ok(1) => HealthCheck::ok("sqlite"),
            Ok(v) => HealthCheck::failed("sqlite", format!("unexpected result: {}", v)),
            Err(e) => HealthCheck::failed("sqlite", format!("error: {}", e)),
        }
    }

    /// Write, read back and delete a scratch file under `base_path`.
    async fn probe_disk(&self) -> HealthCheck {
        let tmp_path = self.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
        if let Err(e) = fs::write(&tmp_path, b"readyz").await {
            return HealthCheck::failed("disk", format!("could not write tmp file: {}", e));
        }

        let read = fs::read(&tmp_path).await;
        let removed = fs::remove_file(&tmp_path).await;
        match (read, removed) {
            (Ok(bytes), _) if bytes != b"readyz" => {
                HealthCheck::failed("disk", "file content mismatch")
            }
            (Ok(_), Ok(())) => HealthCheck::ok("disk"),
            // payload readable, cleanup failed: still ready
            (Ok(_), Err(e)) => {
                debug!("could not remove readiness probe file: {}", e);
                HealthCheck::ok("disk")
            }
            (Err(e), _) => HealthCheck::failed("disk", format!("could not read tmp file: {}", e)),
        }
    }
}

#[async_trait]
impl ObjectStore for DiskStore {
    /// Unsafe keys, missing rows and rows whose payload file is gone are
    /// all reported as absent.
    async fn get(&self, key: &str) -> StoreResult<Option<StoredObject>> {
        if Self::ensure_key_safe(key).is_err() {
            debug!(key, "rejecting unsafe object key");
            return Ok(None);
        }

        match self.fetch_object(key).await? {
            Some(record) => self.open_record(key, record).await,
            None => Ok(None),
        }
    }

    async fn health_checks(&self) -> Vec<HealthCheck> {
        vec![self.probe_sqlite().await, self.probe_disk().await]
    }
}

fn stored_object(record: ObjectRecord, file: File) -> StoredObject {
    StoredObject {
        metadata: record.into(),
        body: ReaderStream::new(file).boxed(),
    }
}

/// Copy `stream` into a new file at `path`, returning size and hex MD5.
async fn write_payload<S>(path: &Path, stream: S) -> io::Result<(i64, String)>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    let mut file = File::create(path).await?;
    let mut size_bytes: i64 = 0;
    let mut digest = Context::new();

    pin_mut!(stream);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        size_bytes += chunk.len() as i64;
        digest.consume(&chunk);
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.sync_all().await?;

    Ok((size_bytes, format!("{:x}", digest.compute())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{TryStreamExt, stream};
    use sqlx::sqlite::SqlitePoolOptions;
    use tempfile::TempDir;

    async fn disk_store() -> (DiskStore, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = DiskStore::new(Arc::new(pool), dir.path());
        store.migrate().await.unwrap();
        (store, dir)
    }

    fn chunks(parts: &[&'static str]) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p.as_bytes())))
                .collect::<Vec<_>>(),
        )
    }

    async fn read_all(object: StoredObject) -> Vec<u8> {
        let parts: Vec<Bytes> = object.body.try_collect().await.unwrap();
        parts.concat()
    }

    #[tokio::test]
    async fn stores_and_streams_object_with_metadata() {
        let (store, _dir) = disk_store().await;
        let http = HttpMetadata {
            content_type: Some("text/html".into()),
            cache_control: Some("no-cache".into()),
            ..Default::default()
        };
        let meta = store
            .put_object_stream("games/abc/index.html", http.clone(), chunks(&["<html>", "</html>"]))
            .await
            .unwrap();
        assert_eq!(meta.size_bytes, 13);
        assert_eq!(meta.etag, format!("{:x}", md5::compute(b"<html></html>")));

        let object = store.get("games/abc/index.html").await.unwrap().unwrap();
        assert_eq!(object.metadata.http, http);
        assert_eq!(object.metadata.etag, meta.etag);
        assert_eq!(read_all(object).await, b"<html></html>");
    }

    #[tokio::test]
    async fn overwrite_replaces_payload_and_etag() {
        let (store, _dir) = disk_store().await;
        let first = store
            .put_object_stream("a/b.bin", HttpMetadata::default(), chunks(&["one"]))
            .await
            .unwrap();
        let second = store
            .put_object_stream("a/b.bin", HttpMetadata::default(), chunks(&["two!"]))
            .await
            .unwrap();
        assert_ne!(first.etag, second.etag);

        let object = store.get("a/b.bin").await.unwrap().unwrap();
        assert_eq!(object.metadata.size_bytes, 4);
        assert_eq!(read_all(object).await, b"two!");
    }

    #[tokio::test]
    async fn missing_and_unsafe_keys_are_absent() {
        let (store, _dir) = disk_store().await;
        assert!(store.get("missing/key").await.unwrap().is_none());
        assert!(store.get("../etc/passwd").await.unwrap().is_none());
        assert!(store.get("/abs").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unsafe_keys_are_rejected_on_write() {
        let (store, _dir) = disk_store().await;
        let err = store
            .put_object_stream("../escape", HttpMetadata::default(), chunks(&["x"]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidObjectKey));
    }

    #[tokio::test]
    async fn soft_deleted_rows_are_absent() {
        let (store, _dir) = disk_store().await;
        store
            .put_object_stream("gone.txt", HttpMetadata::default(), chunks(&["x"]))
            .await
            .unwrap();
        sqlx::query("UPDATE objects SET is_deleted = 1 WHERE key = ?")
            .bind("gone.txt")
            .execute(&*store.db)
            .await
            .unwrap();
        assert!(store.get("gone.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_payload_file_is_absent() {
        let (store, _dir) = disk_store().await;
        store
            .put_object_stream("orphan.txt", HttpMetadata::default(), chunks(&["x"]))
            .await
            .unwrap();
        let record = store.fetch_object("orphan.txt").await.unwrap().unwrap();
        fs::remove_file(store.version_path("orphan.txt", record.version_id))
            .await
            .unwrap();
        assert!(store.get("orphan.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reader_opened_before_overwrite_keeps_matching_metadata() {
        let (store, _dir) = disk_store().await;
        store
            .put_object_stream("a/b.bin", HttpMetadata::default(), chunks(&["one"]))
            .await
            .unwrap();
        let before = store.get("a/b.bin").await.unwrap().unwrap();

        store
            .put_object_stream("a/b.bin", HttpMetadata::default(), chunks(&["two!"]))
            .await
            .unwrap();
        let after = store.get("a/b.bin").await.unwrap().unwrap();

        assert_eq!(before.metadata.size_bytes, 3);
        assert_eq!(before.metadata.etag, format!("{:x}", md5::compute(b"one")));
        assert_eq!(read_all(before).await, b"one");

        assert_eq!(after.metadata.size_bytes, 4);
        assert_eq!(after.metadata.etag, format!("{:x}", md5::compute(b"two!")));
        assert_eq!(read_all(after).await, b"two!");
    }

    #[tokio::test]
    async fn payload_not_yet_committed_is_not_served() {
        let (store, _dir) = disk_store().await;
        store
            .put_object_stream("a/b.bin", HttpMetadata::default(), chunks(&["one"]))
            .await
            .unwrap();

        // A concurrent writer has renamed its payload into place but not
        // yet switched the row over.
        let pending = store.version_path("a/b.bin", Uuid::new_v4());
        write_payload(&pending, chunks(&["two!"])).await.unwrap();

        let object = store.get("a/b.bin").await.unwrap().unwrap();
        assert_eq!(object.metadata.size_bytes, 3);
        assert_eq!(object.metadata.etag, format!("{:x}", md5::compute(b"one")));
        assert_eq!(read_all(object).await, b"one");
    }

    #[tokio::test]
    async fn overwrite_removes_superseded_payload() {
        let (store, _dir) = disk_store().await;
        store
            .put_object_stream("a/b.bin", HttpMetadata::default(), chunks(&["one"]))
            .await
            .unwrap();
        let first = store.fetch_object("a/b.bin").await.unwrap().unwrap();

        store
            .put_object_stream("a/b.bin", HttpMetadata::default(), chunks(&["two!"]))
            .await
            .unwrap();
        let second = store.fetch_object("a/b.bin").await.unwrap().unwrap();

        assert_ne!(first.version_id, second.version_id);
        assert!(!store.version_path("a/b.bin", first.version_id).exists());
        assert!(store.version_path("a/b.bin", second.version_id).exists());
    }

    #[tokio::test]
    async fn stale_record_resolves_to_current_version() {
        let (store, _dir) = disk_store().await;
        store
            .put_object_stream("a/b.bin", HttpMetadata::default(), chunks(&["one"]))
            .await
            .unwrap();
        let stale = store.fetch_object("a/b.bin").await.unwrap().unwrap();

        // overwrite lands between the row read and the file open
        store
            .put_object_stream("a/b.bin", HttpMetadata::default(), chunks(&["two!"]))
            .await
            .unwrap();

        let object = store.open_record("a/b.bin", stale).await.unwrap().unwrap();
        assert_eq!(object.metadata.size_bytes, 4);
        assert_eq!(object.metadata.etag, format!("{:x}", md5::compute(b"two!")));
        assert_eq!(read_all(object).await, b"two!");
    }

    #[tokio::test]
    async fn failed_upload_leaves_no_object() {
        let (store, _dir) = disk_store().await;
        let failing = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::new(ErrorKind::BrokenPipe, "client went away")),
        ]);
        let err = store
            .put_object_stream("broken.bin", HttpMetadata::default(), failing)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
        assert!(store.get("broken.bin").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn health_checks_pass_on_working_store() {
        let (store, _dir) = disk_store().await;
        let checks = store.health_checks().await;
        assert_eq!(checks.len(), 2);
        assert!(checks.iter().all(HealthCheck::is_ok), "{:?}", checks);
    }

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let (store, _dir) = disk_store().await;
        assert_eq!(store.migrate().await.unwrap(), 2);
    }
}
