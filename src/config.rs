use anyhow::{Context, Result, ensure};
use clap::Parser;
use std::{env, fmt::Display, str::FromStr};

const MIB: u64 = 1024 * 1024;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub public_base: String,
    pub max_file_size: u64,
    pub max_files: usize,
    pub image_max_file_size: u64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Date-bucketed file upload service")]
pub struct Args {
    /// Host to bind to (overrides UPLOAD_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides UPLOAD_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Root directory for uploaded files (overrides UPLOAD_STORE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// URL path stored files are served under (overrides UPLOAD_STORE_PUBLIC_BASE)
    #[arg(long)]
    pub public_base: Option<String>,

    /// Per-file limit in bytes for general uploads (overrides UPLOAD_STORE_MAX_FILE_SIZE)
    #[arg(long)]
    pub max_file_size: Option<u64>,

    /// Files per request on the multi-file endpoint (overrides UPLOAD_STORE_MAX_FILES)
    #[arg(long)]
    pub max_files: Option<usize>,

    /// Per-file limit in bytes for image uploads (overrides UPLOAD_STORE_IMAGE_MAX_FILE_SIZE)
    #[arg(long)]
    pub image_max_file_size: Option<u64>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("UPLOAD_STORE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_or("UPLOAD_STORE_PORT", 3000)?;
        let env_storage =
            env::var("UPLOAD_STORE_STORAGE_DIR").unwrap_or_else(|_| "./uploads".into());
        let env_public_base =
            env::var("UPLOAD_STORE_PUBLIC_BASE").unwrap_or_else(|_| "/uploads".into());
        let env_max_file_size = env_or("UPLOAD_STORE_MAX_FILE_SIZE", 10 * MIB)?;
        let env_max_files = env_or("UPLOAD_STORE_MAX_FILES", 5)?;
        let env_image_max = env_or("UPLOAD_STORE_IMAGE_MAX_FILE_SIZE", 5 * MIB)?;

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            public_base: args.public_base.unwrap_or(env_public_base),
            max_file_size: args.max_file_size.unwrap_or(env_max_file_size),
            max_files: args.max_files.unwrap_or(env_max_files),
            image_max_file_size: args.image_max_file_size.unwrap_or(env_image_max),
        };
        cfg.validate()?;

        Ok(cfg)
    }

    /// Reference limits rooted at `storage_dir`, without reading the environment.
    #[cfg(test)]
    pub fn for_storage_dir(storage_dir: impl Into<String>) -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            storage_dir: storage_dir.into(),
            public_base: "/uploads".into(),
            max_file_size: 10 * MIB,
            max_files: 5,
            image_max_file_size: 5 * MIB,
        }
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            self.public_base.starts_with('/'),
            "public base `{}` must start with `/`",
            self.public_base
        );
        ensure!(self.max_files > 0, "max files must be at least 1");
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read and parse `key`, falling back to `default` when it is unset.
fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("{err}"))
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}
