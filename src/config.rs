use crate::services::chunk_store::DEFAULT_CHUNK_SIZE;
use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, str::FromStr};

const DEFAULT_MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub chunk_size: usize,
    pub max_upload_bytes: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Chunked binary object store")]
pub struct Args {
    /// Host to bind to (overrides BLOBVAULT_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides BLOBVAULT_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides BLOBVAULT_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Bytes per stored chunk (overrides BLOBVAULT_CHUNK_SIZE)
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Largest accepted upload request body (overrides BLOBVAULT_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::merge(args)?, migrate))
    }

    /// CLI values win over environment values, which win over defaults.
    pub fn merge(args: Args) -> Result<Self> {
        let env_host = env::var("BLOBVAULT_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_number("BLOBVAULT_PORT", 3000u16)?;
        let env_db = env::var("BLOBVAULT_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/blobvault.db".into());
        let env_chunk = env_number("BLOBVAULT_CHUNK_SIZE", DEFAULT_CHUNK_SIZE)?;
        let env_max_upload = env_number("BLOBVAULT_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?;

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            chunk_size: args.chunk_size.unwrap_or(env_chunk),
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max_upload),
        };

        if cfg.chunk_size == 0 {
            bail!("chunk size must be at least one byte");
        }

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_number<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}
