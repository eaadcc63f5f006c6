use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use jsonwebtoken::Algorithm;
use std::{env, path::PathBuf, str::FromStr};

use crate::services::token_service::{HMAC_ALGORITHMS, MAX_JWT_LEEWAY_SECS};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub jwt_secret: Option<String>,
    pub jwt_algorithm: Algorithm,
    pub jwt_leeway_secs: u64,
    pub require_exp: bool,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Token-gated read gateway for game assets")]
pub struct Args {
    /// Host to bind to (overrides ASSET_GATEWAY_HOST)
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Port to bind to (overrides ASSET_GATEWAY_PORT)
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Directory where object payloads are stored (overrides ASSET_GATEWAY_STORAGE_DIR)
    #[arg(long, global = true)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides ASSET_GATEWAY_DATABASE_URL)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Shared JWT signing secret (overrides ASSET_GATEWAY_JWT_SECRET)
    #[arg(long, global = true)]
    pub jwt_secret: Option<String>,

    /// HS256, HS384 or HS512 (overrides ASSET_GATEWAY_JWT_ALGORITHM)
    #[arg(long, global = true)]
    pub jwt_algorithm: Option<String>,

    /// Clock skew tolerated on exp/nbf (overrides ASSET_GATEWAY_JWT_LEEWAY_SECS)
    #[arg(long, global = true)]
    pub jwt_leeway_secs: Option<u64>,

    /// Refuse tokens without an exp claim (overrides ASSET_GATEWAY_REQUIRE_EXP)
    #[arg(long, global = true)]
    pub require_exp: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Serve objects over HTTP (default)
    Serve,
    /// Apply the metadata schema and exit
    Migrate,
    /// Copy a local file into the store under KEY
    Put {
        #[arg(value_parser = parse_object_key)]
        key: String,
        file: PathBuf,
        #[arg(long)]
        content_type: Option<String>,
        #[arg(long)]
        cache_control: Option<String>,
    },
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the command to run.
    pub fn from_env_and_args() -> Result<(Self, Command)> {
        let mut args = Args::parse();
        let command = args.command.take().unwrap_or(Command::Serve);
        let cfg = Self::from_sources(args, |name| env::var(name))?;
        Ok((cfg, command))
    }

    /// Merge CLI args over values from `lookup` over defaults.
    pub fn from_sources<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let var = |name: &str| -> Result<Option<String>> {
            match lookup(name) {
                Ok(value) => Ok(Some(value)),
                Err(env::VarError::NotPresent) => Ok(None),
                Err(err) => Err(err).with_context(|| format!("reading {}", name)),
            }
        };
        let parsed = |name: &str| -> Result<Option<u64>> {
            var(name)?
                .map(|value| {
                    value
                        .parse::<u64>()
                        .with_context(|| format!("parsing {} value `{}`", name, value))
                })
                .transpose()
        };

        // --- Environment fallback ---
        let env_host = var("ASSET_GATEWAY_HOST")?.unwrap_or_else(|| "0.0.0.0".into());
        let env_port = match var("ASSET_GATEWAY_PORT")? {
            Some(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing ASSET_GATEWAY_PORT value `{}`", value))?,
            None => 8787,
        };
        let env_storage =
            var("ASSET_GATEWAY_STORAGE_DIR")?.unwrap_or_else(|| "./data/objects".into());
        let env_db = var("ASSET_GATEWAY_DATABASE_URL")?
            .unwrap_or_else(|| "sqlite://./data/meta/assets.db".into());
        let env_leeway = parsed("ASSET_GATEWAY_JWT_LEEWAY_SECS")?.unwrap_or(0);
        let env_require_exp = match var("ASSET_GATEWAY_REQUIRE_EXP")? {
            Some(value) => parse_bool(&value)
                .with_context(|| format!("parsing ASSET_GATEWAY_REQUIRE_EXP value `{}`", value))?,
            None => false,
        };

        let algorithm_name = args
            .jwt_algorithm
            .or(var("ASSET_GATEWAY_JWT_ALGORITHM")?)
            .unwrap_or_else(|| "HS256".into());

        let jwt_leeway_secs = args.jwt_leeway_secs.unwrap_or(env_leeway);
        if jwt_leeway_secs > MAX_JWT_LEEWAY_SECS {
            bail!(
                "JWT leeway of {}s exceeds the maximum of {}s",
                jwt_leeway_secs,
                MAX_JWT_LEEWAY_SECS
            );
        }

        // --- Merge ---
        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            jwt_secret: args
                .jwt_secret
                .or(var("ASSET_GATEWAY_JWT_SECRET")?)
                .filter(|s| !s.is_empty()),
            jwt_algorithm: parse_hmac_algorithm(&algorithm_name)?,
            jwt_leeway_secs,
            require_exp: args.require_exp || env_require_exp,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The signing secret, which serving cannot do without.
    pub fn require_jwt_secret(&self) -> Result<&str> {
        self.jwt_secret
            .as_deref()
            .context("no JWT secret configured (set ASSET_GATEWAY_JWT_SECRET or --jwt-secret)")
    }
}

fn parse_hmac_algorithm(name: &str) -> Result<Algorithm> {
    let algorithm = Algorithm::from_str(name.trim())
        .with_context(|| format!("unknown JWT algorithm `{}`", name))?;
    if !HMAC_ALGORITHMS.contains(&algorithm) {
        bail!("JWT algorithm `{}` is not an HMAC algorithm", name);
    }
    Ok(algorithm)
}

/// Accept only keys the gateway can serve back: the request path is used
/// without percent-decoding, so every byte must be a literal URL path
/// character (RFC 3986 `pchar` or `/`).
pub fn parse_object_key(key: &str) -> Result<String> {
    if key.is_empty() || key.starts_with('/') {
        bail!("object key must be non-empty and must not start with `/`");
    }
    if let Some(bad) = key.chars().find(|c| !is_path_char(*c)) {
        bail!("object key `{}` contains `{}`, which cannot appear in a URL path", key, bad.escape_default());
    }
    Ok(key.to_string())
}

fn is_path_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "-._~!$&'()*+,;=:@/%".contains(c)
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => bail!("expected a boolean, got `{}`", other),
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "addr={} storage_dir={} database_url={} jwt_algorithm={:?} jwt_leeway_secs={} require_exp={} jwt_secret={}",
            self.addr(),
            self.storage_dir,
            self.database_url,
            self.jwt_algorithm,
            self.jwt_leeway_secs,
            self.require_exp,
            if self.jwt_secret.is_some() { "<set>" } else { "<unset>" },
        )
    }
}
