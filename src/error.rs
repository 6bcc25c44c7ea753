//! Error types for coffer.
//!
//! This module defines all error types used throughout coffer, using a
//! combination of `thiserror` for ergonomic error definitions and `miette`
//! for rich diagnostic output.
//!
//! # Error Handling Strategy
//!
//! - All errors derive from [`CofferError`]
//! - Per-file problems are reported and accumulated into an exit-1 status by
//!   the command layer; structural problems are raised as errors and render
//!   as a fatal (-1) diagnostic at the top level
//! - [`CofferError::Cancelled`] is a first-class variant used to unwind from
//!   a refused conflict prompt, not a panic

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Error types that can occur in coffer operations.
#[derive(Error, Debug, Diagnostic)]
pub enum CofferError {
    /// A file, database entry or commit was not found.
    ///
    /// Raised by filesystem lookups, `meta_get`, `commit_get` and the
    /// recursive walks when nothing matches the requested name.
    #[error("Not found: {0}")]
    #[diagnostic(code(coffer::not_found))]
    NotFound(String),

    /// An attempted create or move would clobber an existing file.
    #[error("Target exists: {0}")]
    #[diagnostic(code(coffer::exists))]
    Exists(String),

    /// A filesystem entry is neither a regular file nor a directory.
    #[error("Unsupported file type: {0}")]
    #[diagnostic(
        code(coffer::unsupported_type),
        help("coffer only tracks regular files and directories.")
    )]
    UnsupportedType(String),

    /// Computed digest of a received or written stream does not match the
    /// expected digest.
    #[error("Checksum mismatch on '{filename}' (computed: {computed}, expected: {expected})")]
    #[diagnostic(code(coffer::checksum_error))]
    Checksum {
        /// Repository-relative name of the offending file
        filename: String,
        /// Digest computed from the actual bytes
        computed: String,
        /// Digest the metadata claimed
        expected: String,
    },

    /// A second staging operation was attempted on a filename that already
    /// has one pending.
    #[error("Staging overwrite on '{0}'")]
    #[diagnostic(
        code(coffer::staging_conflict),
        help("Commit or revert the pending operation first.")
    )]
    StagingConflict(String),

    /// Logic-impossible database state, e.g. a shared last commit with
    /// differing checksums.
    #[error("Database corruption: {0}")]
    #[diagnostic(code(coffer::corruption))]
    Corruption(String),

    /// The user aborted at a conflict prompt, or a peer refused the sync.
    #[error("Cancelled: {0}")]
    #[diagnostic(code(coffer::cancelled))]
    Cancelled(String),

    /// A sync would overwrite a file that is neither tracked with its prior
    /// content nor a known in-flight resumable write.
    #[error("File '{0}' exists as untracked file. It would be overwritten. Bailing out.")]
    #[diagnostic(
        code(coffer::would_overwrite),
        help("Add or remove the file in the target repository, then retry the sync.")
    )]
    WouldOverwrite(String),

    /// The transport to the peer closed unexpectedly.
    #[error("Connection closed")]
    #[diagnostic(code(coffer::connection_closed))]
    ConnectionClosed,

    /// The wire peer answered a request with an error status.
    #[error("Error on remote '{0}'")]
    #[diagnostic(code(coffer::server_error))]
    ServerError(String),

    /// Malformed frame, unknown command or invalid URL on the wire.
    #[error("Protocol error: {0}")]
    #[diagnostic(code(coffer::protocol))]
    Protocol(String),

    /// No repository was found at or above the working directory.
    #[error("Cannot find repository, root reached")]
    #[diagnostic(
        code(coffer::repo_not_found),
        help("Run 'coffer init <name>' to create a repository here.")
    )]
    RepoNotFound,

    /// The repository is flagged as mid-sync and the command does not
    /// tolerate that state.
    #[error("Repository is in sync mode")]
    #[diagnostic(
        code(coffer::sync_in_progress),
        help("A previous sync was interrupted. Run 'coffer sync <url>' again to complete it.")
    )]
    SyncInProgress,

    /// Invalid command usage detected before dispatch, e.g. an `add_from`
    /// argument that resolves inside the repository.
    #[error("{0}")]
    #[diagnostic(code(coffer::usage))]
    Usage(String),

    /// A path is not valid UTF-8 or cannot be expressed relative to the
    /// repository root.
    #[error("Invalid path: {0}")]
    #[diagnostic(code(coffer::invalid_path))]
    InvalidPath(String),

    /// File system I/O error.
    #[error("I/O error accessing '{path}'")]
    #[diagnostic(code(coffer::io_error))]
    Io {
        /// The path that caused the I/O error
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// JSON (de)serialization failure on the database or a wire frame.
    #[error("JSON error: {0}")]
    #[diagnostic(code(coffer::json))]
    Json(#[from] serde_json::Error),
}

impl CofferError {
    /// Wrap an `io::Error` with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True for the not-found variant; used where a missing file is an
    /// expected, recoverable outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Type alias for Results in this crate.
pub type Result<T> = std::result::Result<T, CofferError>;
