//! Log command implementation.

use std::collections::BTreeSet;

use crate::database::{Commit, CommitSort, Database};
use crate::error::Result;
use crate::logging::Logger;

/// Show commit history, oldest first, optionally restricted to the commits
/// touching the given files.
pub fn log(db: &Database, logger: &Logger, filenames: &[String], count: usize) -> Result<i32> {
    let mut commits_affected: BTreeSet<String> = BTreeSet::new();
    let mut files_listed: BTreeSet<String> = BTreeSet::new();

    for abstract_filename in filenames {
        match db.recursive_walk_files(abstract_filename, false) {
            Ok(metas) => {
                for meta in metas {
                    commits_affected.extend(meta.last_commits.iter().cloned());
                    files_listed.insert(meta.filename);
                }
            }
            Err(e) if e.is_not_found() => continue,
            Err(e) => return Err(e),
        }
    }

    let keys = (!filenames.is_empty()).then_some(&commits_affected);
    let commits = db.commit_list(Some(CommitSort::Timestamp), Some(count), keys);

    for commit in commits {
        let mut line = format!(
            " Commit {} at {} ",
            commit.uid,
            Commit::time_string(commit.timestamp)
        );
        if !commit.message.is_empty() {
            line.push_str(&format!(": {} ", commit.message));
        }
        line.push_str("-------------");
        logger.info(line);

        let mut affected = commit.affected.clone();
        affected.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        for (filename, operation, _extra) in &affected {
            if files_listed.is_empty() || files_listed.contains(filename) {
                logger.info(format!("   {operation} - {filename}"));
            }
        }
    }
    Ok(0)
}
