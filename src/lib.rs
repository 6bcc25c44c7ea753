//! # coffer
//!
//! A content-tracking archive manager: coffer records the state of an
//! on-disk tree (MD5 checksums, modification times, commit history),
//! stages add/delete mutations locally, commits them into an append-only
//! history, and synchronises the tracked state bidirectionally with a peer
//! repository over a local or ssh transport.
//!
//! ## Key properties
//!
//! - **At-most-once transfers**: the sync planner detects renames and local
//!   duplicates, so moved or copied content never crosses the wire again
//! - **Crash-safe by construction**: incoming files are staged under a
//!   trash directory and renamed into place only after checksum
//!   verification; databases are flagged mid-sync so an interrupted run is
//!   resumed, never silently inconsistent
//! - **No silent data loss**: every write that would clobber untracked data
//!   aborts before touching the file
//!
//! ## Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`cli`]: command-line interface definitions using clap
//! - [`commands`]: the dispatcher and all subcommand implementations
//! - [`database`]: the persisted metadata store (meta map, staging set,
//!   commit history) with atomic JSON saves
//! - [`worktree`]: the filesystem view with trash-staged two-phase writes
//! - [`sync`]: the sync planner, conflict resolution and overwrite guard
//! - [`remote`]: the peer abstraction with local-filesystem and wire
//!   implementations, the framed wire protocol, and the duplex transport
//! - [`error`]: error types with thiserror + miette
//!
//! ## Library usage
//!
//! While coffer is primarily a CLI tool, commands can be driven
//! programmatically, which is also how the integration tests run:
//!
//! ```no_run
//! use coffer::cli::{Cli, Commands};
//! use coffer::commands;
//!
//! let cli = Cli::builder()
//!     .command(Commands::Status)
//!     .build()?;
//! let exit_code = commands::execute(&cli)?;
//! # Ok::<(), coffer::error::CofferError>(())
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod database;
pub mod error;
pub mod hashing;
pub mod logging;
pub mod remote;
pub mod sync;
pub mod worktree;
