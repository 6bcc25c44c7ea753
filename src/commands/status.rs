//! Status command implementation.

use std::collections::{BTreeMap, BTreeSet};

use crate::database::{CHECKSUM_REMOVED, CHECKSUM_REVERTED, Database};
use crate::error::Result;
use crate::logging::Logger;
use crate::worktree::WorkTree;

use super::staging_exists;

/// Fast (modtime-based) comparison of disk and database, scoped to the
/// invocation directory.
///
/// Reports pending staging operations, untracked files (`#UNT`), modified
/// files (`#MOD`), deleted tracked files (`#DEL`) and files awaiting revert
/// (`#REV`). Exits 1 when anything is reported.
pub fn status(db: &Database, tree: &WorkTree, log: &Logger) -> Result<i32> {
    let mut files_fs_no_db: Vec<String> = Vec::new();
    let mut files_fs_mod: Vec<String> = Vec::new();
    let mut files_no_fs_db: Vec<String> = Vec::new();
    let mut files_db_revert: Vec<String> = Vec::new();

    let print_files = |title: &str, files: &[String], tag: &str| -> usize {
        if !files.is_empty() {
            log.info(title);
            for filename in files {
                log.info(format!("#{tag}: {filename}"));
            }
        }
        files.len()
    };

    let mut staging: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for op in db.staging_list()? {
        staging.entry(op.kind.to_string()).or_default().push(op.filename);
    }
    for (kind, files) in &staging {
        print_files(
            &format!("Pending '{kind}' operations:"),
            files,
            &kind.to_uppercase(),
        );
    }

    let relative_current = tree.make_relative(".", false)?;

    let mut n_files = 0usize;
    let mut checked_files: BTreeSet<String> = BTreeSet::new();
    for real_filename in tree.recursive_walk_files(&relative_current)? {
        n_files += 1;
        checked_files.insert(real_filename.clone());
        match db.meta_get(&real_filename) {
            Ok(meta) => {
                if meta.checksum == CHECKSUM_REMOVED {
                    // A file re-appeared on top of its tombstone; untracked
                    // unless it was staged again.
                    if !staging_exists(db, &real_filename) {
                        files_fs_no_db.push(real_filename);
                    }
                    continue;
                }
                if meta.checksum == CHECKSUM_REVERTED {
                    continue;
                }
                if tree.modtime(&real_filename)? != meta.modtime {
                    files_fs_mod.push(real_filename);
                }
            }
            Err(e) if e.is_not_found() => {
                if !staging_exists(db, &real_filename) {
                    files_fs_no_db.push(real_filename);
                }
            }
            Err(e) => return Err(e),
        }
    }

    // Tracked files that are gone from the disk.
    for meta in db.meta_list(Some(&relative_current)) {
        if meta.checksum == CHECKSUM_REVERTED {
            files_db_revert.push(meta.filename.clone());
        }
        if staging_exists(db, &meta.filename)
            || checked_files.contains(&meta.filename)
            || !meta.checksum_normal()
        {
            continue;
        }
        files_no_fs_db.push(meta.filename);
    }

    let mut n_errors = 0;
    n_errors += print_files("Untracked files:", &files_fs_no_db, "UNT");
    n_errors += print_files("Modified files:", &files_fs_mod, "MOD");
    n_errors += print_files("Deleted files:", &files_no_fs_db, "DEL");
    n_errors += print_files("To be reverted files:", &files_db_revert, "REV");

    if n_errors == 0 {
        log.info(format!("{n_files} Files - all good."));
        return Ok(0);
    }
    Ok(1)
}
