//! XDG-compliant path resolution for ltm-kernel.
//!
//! The default database lives under `$XDG_DATA_HOME/ltm-kernel/` and the
//! optional config file under `$XDG_CONFIG_HOME/ltm-kernel/`.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Errors from path resolution.
#[derive(Debug, Error, Diagnostic)]
pub enum PathError {
    #[error("cannot determine home directory")]
    #[diagnostic(
        code(ltm::paths::no_home),
        help("Set the HOME environment variable or pass an explicit --db path.")
    )]
    NoHome,

    #[error("failed to create directory: {path}")]
    #[diagnostic(
        code(ltm::paths::create_dir),
        help("Check that the parent directory exists and you have write permissions.")
    )]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type PathResult<T> = std::result::Result<T, PathError>;

const APP_DIR: &str = "ltm-kernel";

/// Global directories for ltm-kernel.
#[derive(Debug, Clone)]
pub struct LtmPaths {
    /// `$XDG_CONFIG_HOME/ltm-kernel/`
    pub config_dir: PathBuf,
    /// `$XDG_DATA_HOME/ltm-kernel/`
    pub data_dir: PathBuf,
}

impl LtmPaths {
    /// Resolve XDG directories from environment variables with standard fallbacks.
    pub fn resolve() -> PathResult<Self> {
        let home = std::env::var("HOME")
            .map(PathBuf::from)
            .map_err(|_| PathError::NoHome)?;

        let config_dir = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join(".config"))
            .join(APP_DIR);

        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join(".local/share"))
            .join(APP_DIR);

        Ok(Self {
            config_dir,
            data_dir,
        })
    }

    /// Create the base directories. Idempotent.
    pub fn ensure_dirs(&self) -> PathResult<()> {
        for dir in [&self.config_dir, &self.data_dir] {
            std::fs::create_dir_all(dir).map_err(|e| PathError::CreateDir {
                path: dir.display().to_string(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// `config_dir/config.toml`
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    /// `data_dir/ltm.redb`
    pub fn database_file(&self) -> PathBuf {
        self.data_dir.join("ltm.redb")
    }
}
