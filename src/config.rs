//! Build-time constants shared across the crate.

/// Name of the reserved metadata directory under a repository root.
///
/// Everything below this directory is excluded from tracking; it holds the
/// database file and the trash staging subtree.
pub const ARCHIVE_DIR: &str = ".coffer";

/// Trash staging subtree, relative to the repository root.
///
/// In-flight writes and pending deletions live here until a commit or sync
/// completes; an interrupted transfer never leaves a half-written file at
/// its final path.
pub const TRASH_DIR: &str = ".coffer/trash";

/// File name of the persisted database, relative to [`ARCHIVE_DIR`].
pub const DATABASE_FILE: &str = "database.json";

/// Block size for streaming file I/O and wire data frames.
pub const DATA_BLOCK_SIZE: usize = 1 << 20;

/// chrono format string for the `add_from` date bucketing (`<YYYY-MM>/`).
pub const ADD_FROM_DATE_FORMAT: &str = "%Y-%m";

/// Protocol version announced in the wire handshake.
pub const WIRE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Path separator used in repository-relative filenames, on every platform.
pub const PATH_SEPARATOR: char = '/';
