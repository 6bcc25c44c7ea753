//! Verify command implementation.

use crate::database::{Database, Meta};
use crate::error::Result;
use crate::logging::Logger;
use crate::worktree::WorkTree;

/// Full checksum and modtime verification of selected (or all) files.
pub fn verify(db: &Database, tree: &WorkTree, log: &Logger, filenames: &[String]) -> Result<i32> {
    let metas: Vec<Meta> = if filenames.is_empty() {
        db.meta_list(None)
    } else {
        let mut selected = Vec::new();
        for abstract_filename in filenames {
            selected.extend(db.recursive_walk_files(abstract_filename, true)?);
        }
        selected
    };

    let mut errors = 0usize;
    let mut n_files = 0usize;
    for meta_db in metas {
        n_files += 1;
        errors += verify_single(&meta_db, tree, log)?;
    }

    if errors == 0 {
        log.info(format!("Ok: {n_files} files verified ok."));
        Ok(0)
    } else {
        log.info(format!("Check done: {errors} errors detected."));
        Ok(1)
    }
}

fn verify_single(meta_db: &Meta, tree: &WorkTree, log: &Logger) -> Result<usize> {
    if !meta_db.checksum_normal() {
        return Ok(0);
    }

    let mut meta_fs = Meta::new(&meta_db.filename);
    match tree.meta_update(&mut meta_fs) {
        Err(e) if e.is_not_found() => {
            log.error(format!("File '{}' missing", meta_fs.filename));
            return Ok(1);
        }
        Err(e) => return Err(e),
        Ok(_) => {}
    }

    if meta_fs.checksum != meta_db.checksum {
        log.error(format!(
            "File '{}' attribute 'checksum' differs on fs: '{}' vs on db: '{}'",
            meta_db.filename, meta_fs.checksum, meta_db.checksum
        ));
        return Ok(1);
    }
    if meta_fs.modtime != meta_db.modtime {
        log.error(format!(
            "File '{}' attribute 'modtime' differs on fs: '{}' vs on db: '{}'",
            meta_db.filename, meta_fs.modtime, meta_db.modtime
        ));
        return Ok(1);
    }

    log.verbose(
        1,
        format!(
            "File '{}' verified ok (md5:{}).",
            meta_db.filename, meta_db.checksum
        ),
    );
    Ok(0)
}
