//! Revert command implementation.

use std::collections::BTreeSet;

use crate::database::{CHECKSUM_NONE, CHECKSUM_REVERTED, Database, Meta, OpKind};
use crate::error::{CofferError, Result};
use crate::logging::Logger;
use crate::worktree::WorkTree;

/// Revert staged operations and local modifications, where possible.
///
/// Two phases: first every staged operation touching the selection is
/// undone (staged deletes are restored from the trash), then selected
/// files without a staged operation are checked for disk/database drift.
/// Files that cannot be restored locally get the revert marker toggled and
/// are restored by the next sync. An empty selection means everything
/// staged.
pub fn revert(
    db: &mut Database,
    tree: &WorkTree,
    log: &Logger,
    filenames: &[String],
) -> Result<i32> {
    let mut filenames_set: BTreeSet<String> = BTreeSet::new();
    for abstract_filename in filenames {
        for meta in db.recursive_walk_files(abstract_filename, true)? {
            filenames_set.insert(meta.filename);
        }
    }

    let mut to_revert: Vec<String> = Vec::new();
    let mut filenames_done: BTreeSet<String> = BTreeSet::new();

    for op in db.staging_list()? {
        if !filenames_set.is_empty() && !filenames_set.contains(&op.filename) {
            continue;
        }
        match op.kind {
            OpKind::Add => {
                if revert_if_modified(db, tree, log, &op.filename)? {
                    to_revert.push(op.filename.clone());
                }
            }
            OpKind::Del => match tree.trash_revert(&op.filename) {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    log.info(format!(
                        "File {} manually removed, marked to be reverted -> sync required",
                        op.filename
                    ));
                    to_revert.push(op.filename.clone());
                }
                Err(e) => return Err(e),
            },
            other => {
                return Err(CofferError::Corruption(format!(
                    "unexpected staged operation '{other}' on '{}'",
                    op.filename
                )));
            }
        }
        filenames_done.insert(op.filename);
    }

    // Selected files with no staged operation: leave intact ones alone,
    // mark modified or missing ones for revert.
    for filename in filenames_set.difference(&filenames_done) {
        if revert_if_modified(db, tree, log, filename)? {
            to_revert.push(filename.clone());
        }
    }

    db.staging_clear();

    for filename in &to_revert {
        let mut meta = db.meta_get(filename)?;
        meta.checksum = if meta.checksum == CHECKSUM_REVERTED {
            CHECKSUM_NONE.to_string()
        } else {
            CHECKSUM_REVERTED.to_string()
        };
        db.meta_set(&meta);
    }

    db.save()?;
    Ok(0)
}

/// Decide whether a file needs the revert marker: true when it already
/// carries one (to clear it), or when disk and database disagree.
fn revert_if_modified(
    db: &Database,
    tree: &WorkTree,
    log: &Logger,
    filename: &str,
) -> Result<bool> {
    let meta_db = match db.meta_get(filename) {
        Ok(meta) => meta,
        Err(e) if e.is_not_found() => return Ok(false),
        Err(e) => return Err(e),
    };

    if meta_db.checksum == CHECKSUM_REVERTED {
        log.info(format!(
            "File {} was marked for revert -> clearing the marking",
            meta_db.filename
        ));
        return Ok(true);
    }

    let mut meta_fs = Meta::new(&meta_db.filename);
    match tree.meta_update(&mut meta_fs) {
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e),
        Ok(_) => {
            if meta_db.fs_equal(&meta_fs) {
                log.info(format!("File {} fs/db equal, skip", meta_db.filename));
                return Ok(false);
            }
        }
    }
    log.info(format!(
        "File {} marked to be reverted -> sync required",
        meta_db.filename
    ));
    Ok(true)
}
