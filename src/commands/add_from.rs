//! Add-from command implementation.

use std::path::Path;

use crate::config::ADD_FROM_DATE_FORMAT;
use crate::database::{Database, Meta, OpKind, Operation};
use crate::error::Result;
use crate::logging::Logger;
use crate::worktree::WorkTree;

/// Import files from an external directory, bucketed by modification date.
///
/// Targets land at `<YYYY-MM>/<basename>` relative to the invocation
/// directory. An identical existing target skips the import and deletes the
/// source; a clashing different target gets a `-NNN` suffix. The database
/// is saved after every imported file so an interrupted import loses
/// nothing.
pub fn add_from(db: &mut Database, tree: &WorkTree, log: &Logger, filename: &str) -> Result<i32> {
    let fs_other = WorkTree::open(Path::new(filename))?;

    for real_filename in fs_other.recursive_walk_files("")? {
        let modtime = fs_other.modtime(&real_filename)?;
        let time_prefix = chrono::DateTime::from_timestamp(modtime, 0)
            .map(|dt| dt.format(ADD_FROM_DATE_FORMAT).to_string())
            .unwrap_or_else(|| modtime.to_string());
        let basename = real_filename
            .rsplit('/')
            .next()
            .unwrap_or(real_filename.as_str());
        let target_file = tree.make_relative(&format!("{time_prefix}/{basename}"), true)?;

        let mut meta_old = Meta::new(real_filename.clone());
        fs_other.meta_update(&mut meta_old)?;

        let mut target_noclash = target_file.clone();
        if tree.file_exists(&target_noclash) {
            let mut meta_new = Meta::new(&target_noclash);
            tree.meta_update(&mut meta_new)?;
            if meta_old.fs_equal(&meta_new) {
                log.info(format!(
                    "Files '{}' and '{}' identical, skipping",
                    meta_old.filename, meta_new.filename
                ));
                fs_other.file_del(&real_filename, false)?;
                continue;
            }
            let mut suffix = 0u32;
            while tree.file_exists(&target_noclash) {
                target_noclash = format!("{target_file}-{suffix:03}");
                suffix += 1;
            }
        }

        let mut stream = fs_other.file_read(&real_filename)?;
        let mut meta_new = meta_old.clone();
        meta_new.filename = target_noclash;
        tree.file_create(&meta_new, &mut stream)?;
        db.staging_add(Operation::new(&meta_new.filename, OpKind::Add))?;
        db.save()?;
        log.info(format!("{} -> {}", meta_old.filename, meta_new.filename));
    }
    Ok(0)
}
