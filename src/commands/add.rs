//! Add command implementation.

use crate::database::{Database, OpKind, Operation};
use crate::error::Result;
use crate::logging::Logger;
use crate::worktree::WorkTree;

use super::staging_exists;

/// Stage files or directory trees for addition.
///
/// A file with a pending operation (or a revert marker) is reported and
/// skipped; the command continues and exits 1.
pub fn add(db: &mut Database, tree: &WorkTree, log: &Logger, filenames: &[String]) -> Result<i32> {
    let mut had_trouble = 0;
    for abstract_filename in filenames {
        for real_filename in tree.recursive_walk_files(abstract_filename)? {
            if staging_exists(db, &real_filename) {
                had_trouble = 1;
                log.error(format!(
                    "Adding '{real_filename}' failed: Operation already pending"
                ));
                continue;
            }
            db.staging_add(Operation::new(real_filename, OpKind::Add))?;
        }
    }
    db.save()?;
    Ok(had_trouble)
}
