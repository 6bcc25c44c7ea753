//! Rm command implementation.

use std::collections::BTreeSet;

use crate::database::{Database, OpKind, Operation};
use crate::error::Result;
use crate::logging::Logger;
use crate::worktree::WorkTree;

use super::staging_exists;

/// Stage files or directory trees for deletion.
///
/// Expansion walks the database, so files already missing from disk are
/// still removable. The physical file is parked in the trash until commit;
/// emptied directories are pruned right away.
pub fn rm(db: &mut Database, tree: &WorkTree, log: &Logger, filenames: &[String]) -> Result<i32> {
    let mut paths_affected: BTreeSet<String> = BTreeSet::new();
    let mut had_trouble = 0;

    for abstract_filename in filenames {
        for meta in db.recursive_walk_files(abstract_filename, true)? {
            if staging_exists(db, &meta.filename) {
                log.error(format!(
                    "Removing '{}' failed: Operation already pending",
                    meta.filename
                ));
                had_trouble = 1;
                continue;
            }

            db.staging_add(Operation::new(&meta.filename, OpKind::Del))?;
            tree.trash_add(&meta.filename, true)?;
            paths_affected.insert(WorkTree::parent_of(&meta.filename));
        }
    }

    tree.remove_empty_dirs(&paths_affected)?;
    db.save()?;
    Ok(had_trouble)
}
