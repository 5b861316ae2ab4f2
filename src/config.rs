//! Settings for a cart session, loaded from YAML.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::sync::DEFAULT_MAX_PASSES;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CartConfig {
    pub storage: StorageConfig,
    pub sync: SyncConfig,
    pub logging: LoggingConfig,
}

/// Where per-user cart databases live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// Database files are named `{file_prefix}{user_id}.db`.
    pub file_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Reconcile right after a session is opened.
    pub sync_on_open: bool,
    /// Reconcile after every local cart change while online.
    pub sync_on_mutation: bool,
    /// Upper bound on coalesced passes per reconciliation call.
    pub max_passes: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `trace`, `debug`, `info`, `warn` or `error`.
    pub level: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("cart-sync"),
            file_prefix: "cart_".to_string(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_on_open: true,
            sync_on_mutation: true,
            max_passes: DEFAULT_MAX_PASSES,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl CartConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Try to load from `path`; fall back to [`CartConfig::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Database file for `user_id`.
    pub fn database_path(&self, user_id: &str) -> PathBuf {
        self.storage
            .data_dir
            .join(format!("{}{}.db", self.storage.file_prefix, user_id))
    }
}

/// A single problem found by [`CartConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the field, e.g. `"sync.max_passes"`.
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl CartConfig {
    /// All problems found; empty means valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.storage.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "storage.data_dir".into(),
                message: "must not be empty".into(),
            });
        }
        if self
            .storage
            .file_prefix
            .contains(|c: char| c == '/' || c == '\\')
        {
            errors.push(ValidationError {
                field: "storage.file_prefix".into(),
                message: "must not contain path separators".into(),
            });
        }

        if self.sync.max_passes == 0 {
            errors.push(ValidationError {
                field: "sync.max_passes".into(),
                message: "must be greater than 0".into(),
            });
        }

        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        errors
    }
}
