use ada_orchestrator::{Catalog, ExpiryRule, LifecycleOptions, TransferSettings};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml_ng::Error,
    },
}

/// Service configuration.
///
/// Every field defaults from its environment variable; a YAML file named by
/// `ADA_API_CONFIG` may override any of them and also carries the expiry
/// rules and the provider/template/data source catalog.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_janitor_interval")]
    pub janitor_interval_secs: u64,

    #[serde(default = "default_source_user")]
    pub transfer_source_user: String,

    #[serde(default = "default_dest_user")]
    pub transfer_dest_user: String,

    #[serde(default = "default_dest_dir")]
    pub transfer_dest_dir: String,

    #[serde(default = "default_reconcile_deleting")]
    pub reconcile_deleting: bool,

    #[serde(default)]
    pub expiry: Vec<ExpiryRule>,

    /// Only report expired machines instead of destroying them.
    #[serde(default)]
    pub expiry_dry_run: bool,

    #[serde(default)]
    pub catalog: Catalog,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn default_bind_addr() -> String {
    env_or("ADA_API_BIND", "0.0.0.0:3121")
}

fn default_db_path() -> PathBuf {
    if let Ok(path) = std::env::var("ADA_API_DB_PATH") {
        return PathBuf::from(path);
    }

    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".ada").join("api").join("ada.db")
}

fn default_janitor_interval() -> u64 {
    std::env::var("ADA_API_JANITOR_INTERVAL")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(3600) // 1 hour
}

fn default_source_user() -> String {
    env_or("ADA_TRANSFER_SOURCE_USER", "root")
}

fn default_dest_user() -> String {
    env_or("ADA_TRANSFER_DEST_USER", "ubuntu")
}

fn default_dest_dir() -> String {
    env_or("ADA_TRANSFER_DEST_DIR", "")
}

fn default_reconcile_deleting() -> bool {
    std::env::var("ADA_RECONCILE_DELETING")
        .map(|v| !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "no"))
        .unwrap_or(true)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            db_path: default_db_path(),
            janitor_interval_secs: default_janitor_interval(),
            transfer_source_user: default_source_user(),
            transfer_dest_user: default_dest_user(),
            transfer_dest_dir: default_dest_dir(),
            reconcile_deleting: default_reconcile_deleting(),
            expiry: Vec::new(),
            expiry_dry_run: false,
            catalog: Catalog::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Environment defaults, overlaid by `ADA_API_CONFIG` when set.
    pub fn load() -> Result<Self, ConfigError> {
        match std::env::var_os("ADA_API_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path)),
            None => Ok(Self::from_env()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml(contents: &str) -> Result<Self, serde_yaml_ng::Error> {
        // An empty document parses as unit rather than as an empty mapping.
        if contents.trim().is_empty() {
            return Ok(Self::from_env());
        }
        serde_yaml_ng::from_str(contents)
    }

    pub fn transfer_settings(&self) -> TransferSettings {
        TransferSettings {
            source_user: self.transfer_source_user.clone(),
            dest_user: self.transfer_dest_user.clone(),
            dest_dir: self.transfer_dest_dir.clone(),
        }
    }

    pub fn lifecycle_options(&self) -> LifecycleOptions {
        LifecycleOptions {
            redispatch_deleting: self.reconcile_deleting,
            ..LifecycleOptions::default()
        }
    }
}
