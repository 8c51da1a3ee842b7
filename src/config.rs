use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::archive::paths::DEFAULT_PUBLIC_PREFIX;
use crate::archive::reader::DEFAULT_MAX_UNCOMPRESSED_BYTES;

pub const DB_PATH_ENV: &str = "WAYMARK_DB_PATH";
pub const UPLOAD_ROOT_ENV: &str = "WAYMARK_UPLOAD_ROOT";
pub const PUBLIC_PREFIX_ENV: &str = "WAYMARK_PUBLIC_PREFIX";
pub const MAX_ARCHIVE_BYTES_ENV: &str = "WAYMARK_MAX_ARCHIVE_BYTES";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaymarkConfig {
    pub db_path: PathBuf,
    pub upload_root: PathBuf,
    pub public_prefix: String,
    pub max_archive_bytes: u64,
}

impl Default for WaymarkConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("waymark.sqlite3"),
            upload_root: PathBuf::from("uploads"),
            public_prefix: DEFAULT_PUBLIC_PREFIX.to_string(),
            max_archive_bytes: DEFAULT_MAX_UNCOMPRESSED_BYTES,
        }
    }
}

impl WaymarkConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        let value = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(path) = value(DB_PATH_ENV) {
            config.db_path = PathBuf::from(path);
        }
        if let Some(root) = value(UPLOAD_ROOT_ENV) {
            config.upload_root = PathBuf::from(root);
        }
        if let Some(prefix) = value(PUBLIC_PREFIX_ENV) {
            config.public_prefix = normalize_prefix(&prefix);
        }
        if let Some(raw) = value(MAX_ARCHIVE_BYTES_ENV) {
            config.max_archive_bytes = raw
                .parse()
                .with_context(|| format!("{MAX_ARCHIVE_BYTES_ENV} must be a byte count, got {raw:?}"))?;
        }
        Ok(config)
    }
}

/// Public prefixes always start and end with `/`.
pub fn normalize_prefix(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}/")
    }
}
