//! Sync command implementation.
//!
//! Orchestrates one synchronisation session: sanity checks on the local
//! repository, peer open by URL, planning, and the crash-safety protocol
//! around execution (both databases flagged `sync` before the first file
//! operation and cleared only after both sides completed).

use crate::database::{CHECKSUM_NONE, Database, DatabaseStatus};
use crate::error::Result;
use crate::logging::Logger;
use crate::remote::localfs::RemoteLocalFs;
use crate::remote::{Remote, remote_open};
use crate::sync::{ConflictResolver, execute_sync, plan_sync};
use crate::worktree::WorkTree;

/// Synchronise this repository with the peer at `url`.
pub fn sync(
    db: Database,
    tree: WorkTree,
    log: &Logger,
    url: &str,
    ssh_command: &str,
    resolver: &mut dyn ConflictResolver,
) -> Result<i32> {
    let url = if url.contains("://") {
        url.to_string()
    } else {
        format!("file://{url}")
    };

    if fast_check_for_mods(&db, &tree, log)? > 0 {
        log.error("File(s) modified. Commit changes first.");
        return Err(crate::error::CofferError::Cancelled(
            "file(s) modified, commit changes first".to_string(),
        ));
    }

    let mut local = RemoteLocalFs::from_parts("Local", db, tree)?;
    let mut other = remote_open(&url, "Other", ssh_command, *log)?;

    log.info("Checking and pushing updates .. ");
    plan_sync(&mut local, other.as_mut(), resolver, log)?;

    if local.table_done() && other.table_done() {
        log.info("Everything up to date.. ");
        other.close()?;
        return Ok(0);
    }

    // Crash-safety: both sides are flagged mid-sync before the first file
    // moves; an interruption leaves the flag set and the next invocation
    // resumes by re-running sync.
    store_status(&mut local, DatabaseStatus::Sync)?;
    store_status(other.as_mut(), DatabaseStatus::Sync)?;

    log.info("Transferring & syncing files .. ");
    execute_sync(&mut local, other.as_mut(), log)?;
    execute_sync(other.as_mut(), &mut local, log)?;

    store_status(&mut local, DatabaseStatus::Ok)?;
    store_status(other.as_mut(), DatabaseStatus::Ok)?;
    other.close()?;

    log.info("Sync completed! ");
    Ok(0)
}

fn store_status(remote: &mut dyn Remote, status: DatabaseStatus) -> Result<()> {
    remote.database().set_status(status);
    remote.database_save()
}

/// Modtime scan for uncommitted changes to normal tracked files. Deleted
/// files are reported but do not block the sync.
pub(crate) fn fast_check_for_mods(
    db: &Database,
    tree: &WorkTree,
    log: &Logger,
) -> Result<usize> {
    let mut errors = 0usize;
    for meta in db.meta_list(None) {
        if !meta.checksum_normal() && meta.checksum != CHECKSUM_NONE {
            continue;
        }
        match tree.modtime(&meta.filename) {
            Err(e) if e.is_not_found() => {
                log.error(format!("File '{}' is deleted", meta.filename));
            }
            Err(e) => return Err(e),
            Ok(fs_modtime) => {
                if fs_modtime != meta.modtime {
                    log.error(format!("File '{}' has modifications", meta.filename));
                    errors += 1;
                }
            }
        }
    }
    Ok(errors)
}
