//! Commit command implementation.

use crate::database::{
    CHECKSUM_NONE, CHECKSUM_REMOVED, CHECKSUM_REVERTED, Commit, Database, Meta, OpKind, Operation,
};
use crate::error::{CofferError, Result};
use crate::logging::Logger;
use crate::worktree::WorkTree;

/// Materialise the staging set into a commit.
///
/// With `auto`, tracked files are scanned first: missing ones are staged
/// for deletion, files with modified timestamps (or an empty checksum) for
/// addition. Staged adds of unchanged files are dropped; adds of tracked
/// files become `mod` operations; re-adds of tombstoned files stay `add`.
/// Staging and trash are cleared; an empty commit is not recorded.
pub fn commit(
    db: &mut Database,
    tree: &WorkTree,
    log: &Logger,
    message: &str,
    auto: bool,
) -> Result<i32> {
    let mut commit = Commit::new(message);

    if auto {
        scan_for_auto(db, tree)?;
    }

    for mut op in db.staging_list()? {
        match op.kind {
            OpKind::Add => match db.meta_get(&op.filename) {
                Ok(mut meta) => {
                    let checksum_orig = meta.checksum.clone();
                    let fs_modtime = tree.modtime(&op.filename)?;
                    if meta.modtime == fs_modtime && checksum_orig != CHECKSUM_REMOVED {
                        // Unchanged; nothing to record for this file.
                        continue;
                    }
                    tree.meta_update(&mut meta)?;
                    if checksum_orig != CHECKSUM_REMOVED {
                        op.kind = OpKind::Modify;
                    }
                    log.info(format!(
                        "Added {} with checksum {}",
                        meta.filename, meta.checksum
                    ));
                    meta.add_commit(&commit);
                    db.meta_set(&meta);
                }
                Err(e) if e.is_not_found() => {
                    let mut meta = Meta::new(&op.filename);
                    tree.meta_update(&mut meta)?;
                    log.info(format!(
                        "Added {} with checksum {}",
                        meta.filename, meta.checksum
                    ));
                    meta.add_commit(&commit);
                    db.meta_set(&meta);
                }
                Err(e) => return Err(e),
            },
            OpKind::Del => {
                let mut meta = db.meta_get(&op.filename)?;
                meta.checksum = CHECKSUM_REMOVED.to_string();
                meta.modtime = now_seconds();
                meta.add_commit(&commit);
                log.info(format!("Deleted {}", meta.filename));
                db.meta_set(&meta);
            }
            other => {
                return Err(CofferError::Corruption(format!(
                    "unexpected staged operation '{other}' on '{}'",
                    op.filename
                )));
            }
        }
        commit.operation_append(&op);
    }

    db.staging_clear();
    tree.trash_clear()?;

    if commit.operation_count() == 0 {
        log.info("No operations to be done.");
    } else {
        log.info(format!("{} changes commited ok.", commit.operation_count()));
        db.commit_add(&commit);
    }

    db.save()?;
    Ok(0)
}

/// Stage deletions for missing tracked files and additions for files whose
/// modification time drifted. Tombstones, revert markers and filenames that
/// already carry a staged operation are skipped.
fn scan_for_auto(db: &mut Database, tree: &WorkTree) -> Result<()> {
    for meta in db.meta_list(None) {
        if meta.checksum == CHECKSUM_REMOVED || meta.checksum == CHECKSUM_REVERTED {
            continue;
        }
        if db.staging_get(&meta.filename).is_ok() {
            continue;
        }
        match tree.modtime(&meta.filename) {
            Err(e) if e.is_not_found() => {
                db.staging_add(Operation::new(&meta.filename, OpKind::Del))?;
            }
            Err(e) => return Err(e),
            Ok(fs_modtime) => {
                if fs_modtime != meta.modtime || meta.checksum == CHECKSUM_NONE {
                    db.staging_add(Operation::new(&meta.filename, OpKind::Add))?;
                }
            }
        }
    }
    Ok(())
}

fn now_seconds() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
