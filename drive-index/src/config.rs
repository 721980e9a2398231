use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::interchange::{InterchangeError, read_json};
use crate::store::{StoreError, default_db_path};

pub const DEFAULT_SEEDS_FILE: &str = "auto_main_folders.txt";
pub const DEFAULT_SCAN_FILE: &str = "auto_scan.json";
pub const DEFAULT_LOG_FILE: &str = "logs/drive-index.log";
pub const DEFAULT_LOG_FILTER: &str = "info";
const DEFAULT_SCAN_INTERVAL_SECS: u64 = 86_400;
const DEFAULT_MAX_WORKERS: u64 = 10;
const DEFAULT_FLUSH_EVERY: u64 = 10_000_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no access token: set DRIVE_INDEX_TOKEN or DRIVE_INDEX_TOKEN_FILE")]
    MissingToken,
    #[error("token file {0} has no `token` field")]
    EmptyTokenFile(PathBuf),
    #[error("cannot read token file: {0}")]
    TokenFile(#[from] InterchangeError),
    #[error("cannot locate the database: {0}")]
    Database(#[from] StoreError),
}

/// Runtime settings read from `DRIVE_INDEX_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database_path: PathBuf,
    pub token: Option<String>,
    pub token_file: Option<PathBuf>,
    pub api_base: Option<String>,
    pub seeds_file: PathBuf,
    pub scan_file: PathBuf,
    pub scan_interval: Duration,
    pub max_workers: usize,
    pub flush_every: usize,
    pub search_parent: bool,
    pub log_filter: String,
    pub log_file: PathBuf,
}

#[derive(Deserialize)]
struct TokenFile {
    token: Option<String>,
    access_token: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let home = dirs::home_dir();
        let path = |name: &str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .map(|value| expand_with_home(&value, home.as_deref()))
        };

        let database_path = match path("DRIVE_INDEX_DATABASE") {
            Some(path) => path,
            None => default_db_path()?,
        };

        Ok(Self {
            database_path,
            token: lookup("DRIVE_INDEX_TOKEN").filter(|value| !value.trim().is_empty()),
            token_file: path("DRIVE_INDEX_TOKEN_FILE"),
            api_base: lookup("DRIVE_INDEX_API_BASE").filter(|value| !value.trim().is_empty()),
            seeds_file: path("DRIVE_INDEX_SEEDS_FILE")
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SEEDS_FILE)),
            scan_file: path("DRIVE_INDEX_SCAN_FILE")
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SCAN_FILE)),
            scan_interval: Duration::from_secs(read_u64(
                &lookup,
                "DRIVE_INDEX_SCAN_INTERVAL_SECS",
                DEFAULT_SCAN_INTERVAL_SECS,
            )),
            max_workers: read_u64(&lookup, "DRIVE_INDEX_MAX_WORKERS", DEFAULT_MAX_WORKERS) as usize,
            flush_every: read_u64(&lookup, "DRIVE_INDEX_FLUSH_EVERY", DEFAULT_FLUSH_EVERY) as usize,
            search_parent: read_bool(&lookup, "DRIVE_INDEX_SEARCH_PARENT", true),
            log_filter: lookup("DRIVE_INDEX_LOG")
                .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
            log_file: path("DRIVE_INDEX_LOG_FILE").unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE)),
        })
    }

    /// The bearer token, taken from the environment first and the token file second.
    pub async fn access_token(&self) -> Result<String, ConfigError> {
        if let Some(token) = &self.token {
            return Ok(token.trim().to_string());
        }
        let Some(path) = &self.token_file else {
            return Err(ConfigError::MissingToken);
        };
        read_token_file(path).await
    }
}

async fn read_token_file(path: &Path) -> Result<String, ConfigError> {
    let file: TokenFile = read_json(path).await?;
    file.token
        .or(file.access_token)
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ConfigError::EmptyTokenFile(path.to_path_buf()))
}

fn expand_with_home(value: &str, home: Option<&Path>) -> PathBuf {
    match home {
        Some(home) if value == "~" => home.to_path_buf(),
        Some(home) => match value.strip_prefix("~/") {
            Some(rest) => home.join(rest),
            None => PathBuf::from(value),
        },
        None => PathBuf::from(value),
    }
}

fn read_u64(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: u64) -> u64 {
    lookup(name)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn read_bool(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: bool) -> bool {
    lookup(name)
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}
