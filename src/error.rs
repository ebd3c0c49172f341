//! Rich diagnostic error types for the long-term memory kernel.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes and help text. [`LtmError`] wraps them all so a caller
//! can propagate with `?` and still render the full diagnostic.

use miette::Diagnostic;
use thiserror::Error;

use crate::chunks::ChunkError;
use crate::paths::PathError;

/// Top-level error type for the kernel.
#[derive(Debug, Error, Diagnostic)]
pub enum LtmError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Chunk(#[from] ChunkError),
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

/// Failures of the backing store. Any of these is fatal to the kernel for the
/// rest of the session (see [`crate::engine::Ltm::reset`]).
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("I/O error: {source}")]
    #[diagnostic(
        code(ltm::store::io),
        help(
            "A filesystem operation failed. Check that the database directory exists, \
             has correct permissions, and that the disk is not full."
        )
    )]
    Io {
        #[source]
        source: std::io::Error,
    },

    #[error("redb error during {op}: {message}")]
    #[diagnostic(
        code(ltm::store::redb),
        help(
            "The embedded database reported an error. \
             If the database file is corrupt, reinitialize it with `ltm init --force`."
        )
    )]
    Redb { op: &'static str, message: String },

    #[error("serialization error: {message}")]
    #[diagnostic(
        code(ltm::store::serde),
        help(
            "A hashed constant could not be encoded or decoded. \
             The database was probably written by an incompatible version."
        )
    )]
    Serialization { message: String },

    #[error("dangling reference: {what} {id} is not in the store")]
    #[diagnostic(
        code(ltm::store::dangling),
        help("The store is internally inconsistent. Reinitialize it with `ltm init --force`.")
    )]
    Dangling { what: &'static str, id: u64 },

    #[error("long-term memory is disabled after an earlier store failure")]
    #[diagnostic(
        code(ltm::store::inert),
        help("Reset the agent (`Ltm::reset`) to re-open the store and clear the failure.")
    )]
    Inert,
}

impl StoreError {
    /// Build a closure mapping any displayable redb error into [`StoreError::Redb`].
    pub(crate) fn redb<E: std::fmt::Display>(op: &'static str) -> impl FnOnce(E) -> Self {
        move |e| StoreError::Redb {
            op,
            message: e.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Command errors
// ---------------------------------------------------------------------------

/// Reasons a command region is rejected as `bad-cmd`.
#[derive(Debug, Error, Diagnostic, PartialEq, Eq)]
pub enum CommandError {
    #[error("unrecognized command attribute ^{attr}")]
    #[diagnostic(
        code(ltm::command::unknown_attr),
        help("Valid command attributes are ^retrieve, ^query, ^negquery, ^prohibit and ^store.")
    )]
    UnknownAttribute { attr: String },

    #[error("^{attr} may appear at most once per command")]
    #[diagnostic(code(ltm::command::duplicate))]
    Duplicate { attr: &'static str },

    #[error("^{attr} must point at {expected}")]
    #[diagnostic(
        code(ltm::command::wrong_kind),
        help("^retrieve and ^prohibit need identifiers with a persistent id; ^query and ^store need identifiers.")
    )]
    WrongKind {
        attr: &'static str,
        expected: &'static str,
    },

    #[error("conflicting commands: {message}")]
    #[diagnostic(
        code(ltm::command::conflict),
        help("A command may retrieve, query or store, but only one of them at a time.")
    )]
    Conflict { message: String },
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    #[diagnostic(
        code(ltm::config::read),
        help("Check that the file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {message}")]
    #[diagnostic(
        code(ltm::config::parse),
        help("Accepted keys are enabled, database (memory | file), path, lazy_commit and store_mode (single | recursive).")
    )]
    Parse { message: String },
}

/// Convenience alias for functions returning kernel results.
pub type LtmResult<T> = std::result::Result<T, LtmError>;
