//! Implementation of coffer subcommands.
//!
//! [`execute_with_dir`] is the dispatcher: it discovers the repository
//! root, opens the database, gates commands against a sync-in-progress
//! status and resolves path arguments according to their role before
//! handing off to the individual command modules. Commands return the
//! process exit code (`0` clean, `1` per-file trouble); structural problems
//! surface as errors and exit `-1` at the top level.

use std::path::{Path, PathBuf};

use crate::cli::{Cli, Commands};
use crate::config::ARCHIVE_DIR;
use crate::database::{CHECKSUM_REVERTED, Database, DatabaseStatus};
use crate::error::{CofferError, Result};
use crate::logging::Logger;
use crate::sync::{ConflictResolver, TerminalResolver};
use crate::worktree::WorkTree;

pub mod add;
pub mod add_from;
pub mod commit;
pub mod find_dups;
pub mod init;
pub mod log;
pub mod revert;
pub mod rm;
pub mod server;
pub mod status;
pub mod sync;
pub mod verify;


/// Execute a command based on the parsed CLI arguments.
pub fn execute(cli: &Cli) -> Result<i32> {
    execute_with_dir(cli, None)
}

/// Execute a command with an explicit working directory; conflicts are
/// resolved interactively.
pub fn execute_with_dir(cli: &Cli, working_dir: Option<&Path>) -> Result<i32> {
    let logger = make_logger(cli);
    let mut resolver = TerminalResolver::new(logger);
    execute_with_resolver(cli, working_dir, &mut resolver)
}

/// Execute a command with an injected conflict resolver; used by tests to
/// script sync conflict answers.
pub fn execute_with_resolver(
    cli: &Cli,
    working_dir: Option<&Path>,
    resolver: &mut dyn ConflictResolver,
) -> Result<i32> {
    let logger = make_logger(cli);

    let current_dir = match working_dir {
        Some(dir) => dir.to_path_buf(),
        None => std::env::current_dir().map_err(|e| CofferError::io(PathBuf::from("."), e))?,
    };

    // Commands that never touch the repository of the working directory.
    if let Commands::ServerMode { path } = cli.command() {
        return server::server_mode(path, &logger);
    }

    let mut tree = WorkTree::open(&current_dir)?;
    let repo_found = tree.ascend_until(ARCHIVE_DIR, None).is_ok();

    if let Commands::Init { name } = cli.command() {
        return init::init(repo_found, &current_dir, name, &logger);
    }
    if !repo_found {
        return Err(CofferError::RepoNotFound);
    }

    let mut db = Database::open_from_path(&tree.root().join(ARCHIVE_DIR))?;

    // A repository mid-sync refuses everything that could mutate it,
    // except the commands needed to inspect and finish the sync.
    let dirty_sync_ok = matches!(
        cli.command(),
        Commands::Status | Commands::Log { .. } | Commands::Sync { .. }
    );
    if db.get_status() == DatabaseStatus::Sync && !dirty_sync_ok {
        return Err(CofferError::SyncInProgress);
    }

    match cli.command() {
        Commands::Add { filenames } => {
            let filenames = resolve_paths(&tree, filenames, PathRole::MustExist)?;
            add::add(&mut db, &tree, &logger, &filenames)
        }
        Commands::AddFrom { filename } => {
            // The import source must live outside the repository.
            if tree.make_relative(filename, false).is_ok() {
                return Err(CofferError::Usage(format!(
                    "Path '{filename}' is inside the repository. add_from imports external directories."
                )));
            }
            add_from::add_from(&mut db, &tree, &logger, filename)
        }
        Commands::Rm { filenames } => {
            let filenames = resolve_paths(&tree, filenames, PathRole::MayBeMissing)?;
            rm::rm(&mut db, &tree, &logger, &filenames)
        }
        Commands::Revert { filenames } => {
            let filenames = resolve_paths(&tree, filenames, PathRole::MayBeMissing)?;
            revert::revert(&mut db, &tree, &logger, &filenames)
        }
        Commands::Commit { msg, auto } => commit::commit(&mut db, &tree, &logger, msg, *auto),
        Commands::Status => status::status(&db, &tree, &logger),
        Commands::Verify { filenames } => verify::verify(&db, &tree, &logger, filenames),
        Commands::Log { filenames, count } => log::log(&db, &logger, filenames, *count),
        Commands::FindDups => find_dups::find_dups(&db, &tree, &logger),
        Commands::Sync { url, ssh_command } => {
            sync::sync(db, tree, &logger, url, ssh_command, resolver)
        }
        Commands::Init { .. } | Commands::ServerMode { .. } => unreachable!("handled above"),
    }
}

fn make_logger(cli: &Cli) -> Logger {
    let quiet = cli.global_opts().quiet();
    let verbose = if quiet { 0 } else { cli.global_opts().verbose() };
    Logger::new(verbose, quiet)
}

/// Role of a path argument during the resolution pre-pass.
enum PathRole {
    /// The path must exist; resolution canonicalises symlinks.
    MustExist,
    /// A missing path falls back to lexical resolution (e.g. `rm` of a file
    /// that is already gone from disk).
    MayBeMissing,
}

fn resolve_paths(tree: &WorkTree, raw: &[String], role: PathRole) -> Result<Vec<String>> {
    raw.iter()
        .map(|path| match tree.make_relative(path, false) {
            Ok(relative) => Ok(relative),
            Err(e) if matches!(role, PathRole::MayBeMissing) && e.is_not_found() => {
                tree.make_relative(path, true)
            }
            Err(e) => Err(e),
        })
        .collect()
}

/// True when the filename already carries a staged operation, counting a
/// revert marker in the metadata as staged.
pub(crate) fn staging_exists(db: &Database, filename: &str) -> bool {
    if db.staging_get(filename).is_ok() {
        return true;
    }
    matches!(db.meta_get(filename), Ok(meta) if meta.checksum == CHECKSUM_REVERTED)
}
