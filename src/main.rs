use anyhow::{Context, Result};
use asset_gateway::{
    config::{AppConfig, Command},
    models::object::HttpMetadata,
    routes::routes::{AppState, routes},
    services::{
        gateway_service::AccessGateway, storage_service::DiskStore, token_service::JwtVerifier,
    },
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + command ---
    let (cfg, command) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting asset-gateway ({:?}) with config: {}", command, cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    let store = open_store(&cfg).await?;

    match command {
        // open_store already applied the schema
        Command::Migrate => {
            tracing::info!("Database migration complete.");
            Ok(())
        }
        Command::Put {
            key,
            file,
            content_type,
            cache_control,
        } => {
            let source = tokio::fs::File::open(&file)
                .await
                .with_context(|| format!("opening {}", file.display()))?;
            let http = HttpMetadata {
                content_type,
                cache_control,
                ..Default::default()
            };
            let meta = store
                .put_object_stream(&key, http, ReaderStream::new(source))
                .await?;
            tracing::info!(
                "Stored {} ({} bytes, etag {})",
                meta.key,
                meta.size_bytes,
                meta.etag
            );
            Ok(())
        }
        Command::Serve => serve(&cfg, store).await,
    }
}

/// Open the SQLite pool and apply the schema, creating the database file
/// and its directory if they are missing.
async fn open_store(cfg: &AppConfig) -> Result<DiskStore> {
    let db_url = &cfg.database_url;
    tracing::debug!("Connecting using raw URL => {}", db_url);

    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let options = SqliteConnectOptions::from_str(db_url)
        .with_context(|| format!("parsing database URL `{}`", db_url))?
        .create_if_missing(true);
    let db = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("connecting to {}", db_url))?;

    let store = DiskStore::new(Arc::new(db), cfg.storage_dir.clone());
    store.migrate().await.context("applying metadata schema")?;
    Ok(store)
}

async fn serve(cfg: &AppConfig, store: DiskStore) -> Result<()> {
    // --- Initialize gateway ---
    let verifier = JwtVerifier::new(
        cfg.require_jwt_secret()?,
        cfg.jwt_algorithm,
        cfg.jwt_leeway_secs,
        cfg.require_exp,
    );
    let gateway = AccessGateway::new(Arc::new(store), Arc::new(verifier));
    let app = routes(AppState { gateway });

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
