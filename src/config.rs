//! Kernel configuration, loadable from TOML.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::paths::LtmPaths;
use crate::storage::StoreMode;
use crate::store::CommitPolicy;

/// Which redb backend holds long-term memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseMode {
    /// Lives as long as the kernel.
    #[default]
    Memory,
    /// On-disk file at [`LtmConfig::database_path`].
    File,
}

/// Configuration for the long-term memory kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LtmConfig {
    /// When false, commands are ignored.
    pub enabled: bool,
    pub database: DatabaseMode,
    /// Database file in `file` mode. Defaults to the XDG data directory.
    pub path: Option<PathBuf>,
    /// Keep one transaction open and commit only on flush or close.
    pub lazy_commit: bool,
    /// Mode used for `^store` commands.
    pub store_mode: StoreMode,
}

impl Default for LtmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            database: DatabaseMode::Memory,
            path: None,
            lazy_commit: true,
            store_mode: StoreMode::Single,
        }
    }
}

impl LtmConfig {
    /// A file-backed config at `path`.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            database: DatabaseMode::File,
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })
    }

    /// Read and parse a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml_str(&text)
    }

    /// Database file location in `file` mode.
    ///
    /// Falls back to `ltm.redb` in the working directory when no path is
    /// configured and the XDG directories cannot be resolved.
    pub fn database_path(&self) -> PathBuf {
        match &self.path {
            Some(p) => p.clone(),
            None => LtmPaths::resolve()
                .map(|p| p.database_file())
                .unwrap_or_else(|_| PathBuf::from("ltm.redb")),
        }
    }

    pub fn commit_policy(&self) -> CommitPolicy {
        if self.lazy_commit {
            CommitPolicy::Lazy
        } else {
            CommitPolicy::Eager
        }
    }
}
