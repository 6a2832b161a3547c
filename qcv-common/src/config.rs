//! Configuration loading for the review core

use crate::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Compiled defaults matching the test deployment of the metadata gateway
const DEFAULT_API_HOST: &str = "api.allenneuraldynamics-test.org";
const DEFAULT_DATABASE: &str = "metadata_index";
const DEFAULT_COLLECTION: &str = "data_assets";

/// Default time-to-live for cached media handles
const DEFAULT_MEDIA_TTL_SECS: u64 = 60 * 60;

/// Review core configuration
///
/// Carries the document-database endpoint and the media cache policy. The
/// TTL is explicit configuration rather than a hidden process-wide cache.
#[derive(Debug, Clone)]
pub struct ReviewConfig {
    pub api_host: String,
    pub database: String,
    pub collection: String,
    /// How long a resolved media handle stays valid before it is rebuilt
    pub media_ttl: Duration,
    /// Guest sessions may edit locally but never commit
    pub read_only: bool,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        ReviewConfig {
            api_host: DEFAULT_API_HOST.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            collection: DEFAULT_COLLECTION.to_string(),
            media_ttl: Duration::from_secs(DEFAULT_MEDIA_TTL_SECS),
            read_only: false,
        }
    }
}

impl ReviewConfig {
    /// Load configuration following the priority order:
    /// 1. Explicit arguments (highest priority)
    /// 2. Environment variables (QCV_API_HOST, QCV_DATABASE, QCV_COLLECTION)
    /// 3. TOML config file
    /// 4. Compiled defaults (fallback)
    pub fn resolve(api_host: Option<&str>, read_only: bool) -> Self {
        let file = load_config_file()
            .and_then(|path| {
                std::fs::read_to_string(&path)
                    .map_err(Error::from)
                    .and_then(|s| {
                        toml::from_str::<toml::Value>(&s)
                            .map_err(|e| Error::Config(format!("Bad config file: {}", e)))
                    })
            })
            .ok();

        let from_file = |key: &str| -> Option<String> {
            file.as_ref()
                .and_then(|v| v.get(key))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        };

        let api_host = api_host
            .map(|s| s.to_string())
            .or_else(|| std::env::var("QCV_API_HOST").ok())
            .or_else(|| from_file("api_host"))
            .unwrap_or_else(|| DEFAULT_API_HOST.to_string());

        let database = std::env::var("QCV_DATABASE")
            .ok()
            .or_else(|| from_file("database"))
            .unwrap_or_else(|| DEFAULT_DATABASE.to_string());

        let collection = std::env::var("QCV_COLLECTION")
            .ok()
            .or_else(|| from_file("collection"))
            .unwrap_or_else(|| DEFAULT_COLLECTION.to_string());

        let media_ttl = file
            .as_ref()
            .and_then(|v| v.get("media_ttl_secs"))
            .and_then(|v| v.as_integer())
            .map(|secs| Duration::from_secs(secs.max(0) as u64))
            .unwrap_or(Duration::from_secs(DEFAULT_MEDIA_TTL_SECS));

        ReviewConfig {
            api_host,
            database,
            collection,
            media_ttl,
            read_only,
        }
    }
}

/// Find the platform config file, if one exists
fn load_config_file() -> Result<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("qcview").join("config.toml"));

    if let Some(path) = user_config {
        if path.exists() {
            return Ok(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/qcview/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }
    }

    Err(Error::Config("No config file found".to_string()))
}
