//! Opening the redb database behind long-term memory.
//!
//! The database is either an on-disk file (ACID, survives restarts) or an
//! in-memory backend that lives as long as the handle.

use std::path::Path;

use redb::backends::InMemoryBackend;
use redb::Database;

use crate::config::{DatabaseMode, LtmConfig};
use crate::error::StoreError;
use crate::store::StoreResult;

/// Open the database described by `config`.
pub fn open(config: &LtmConfig) -> StoreResult<Database> {
    match config.database {
        DatabaseMode::Memory => open_in_memory(),
        DatabaseMode::File => open_file(&config.database_path()),
    }
}

/// Open or create a database file, creating parent directories as needed.
pub fn open_file(path: &Path) -> StoreResult<Database> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| StoreError::Io { source: e })?;
    }
    let db = Database::create(path).map_err(|e| StoreError::Redb {
        op: "open",
        message: format!("failed to open redb at {}: {e}", path.display()),
    })?;
    tracing::debug!(path = %path.display(), "opened long-term memory file");
    Ok(db)
}

/// Create a fresh database that lives only in memory.
pub fn open_in_memory() -> StoreResult<Database> {
    Database::builder()
        .create_with_backend(InMemoryBackend::new())
        .map_err(StoreError::redb("open in-memory"))
}

/// Delete the database file for `config`. No-op in memory mode.
pub fn wipe(config: &LtmConfig) -> StoreResult<()> {
    if config.database == DatabaseMode::Memory {
        return Ok(());
    }
    let path = config.database_path();
    match std::fs::remove_file(&path) {
        Ok(()) => {
            tracing::info!(path = %path.display(), "removed long-term memory file");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::Io { source: e }),
    }
}
