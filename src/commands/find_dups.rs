//! Find-dups command implementation.

use std::collections::{BTreeMap, HashMap};

use crate::database::Database;
use crate::error::Result;
use crate::logging::Logger;
use crate::worktree::WorkTree;

/// Group tracked files sharing a normal checksum, scoped to the invocation
/// directory. Exits 1 when duplicates exist.
pub fn find_dups(db: &Database, tree: &WorkTree, log: &Logger) -> Result<i32> {
    let relative_current = tree.make_relative(".", false)?;

    // Most checksums are unique; keep only the first filename around and
    // build a group lazily when a second one shows up.
    let mut first_seen: HashMap<String, String> = HashMap::new();
    let mut duplicates: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for meta in db.meta_list(Some(&relative_current)) {
        if !meta.checksum_normal() {
            continue;
        }
        match first_seen.get(&meta.checksum) {
            Some(first) => {
                duplicates
                    .entry(meta.checksum.clone())
                    .or_insert_with(|| vec![first.clone()])
                    .push(meta.filename);
            }
            None => {
                first_seen.insert(meta.checksum.clone(), meta.filename);
            }
        }
    }

    if duplicates.is_empty() {
        log.info("No duplicate checksums found.");
        return Ok(0);
    }

    log.info("Possible (cs matches) duplicate files:");
    let mut lines: Vec<String> = duplicates
        .values()
        .map(|filenames| {
            let mut sorted = filenames.clone();
            sorted.sort();
            sorted
                .iter()
                .map(|f| format!("\"{f}\""))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect();
    lines.sort();
    for line in lines {
        log.info(line);
    }
    Ok(1)
}
