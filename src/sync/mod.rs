//! The synchronisation engine.
//!
//! [`plan_sync`] compares the metadata of two repositories and builds one
//! [`SyncTable`] per side: the file-plane operations that bring that side up
//! to the merged superset state. [`execute_sync`] replays one side's table
//! against its peer with at-most-once transfers; move and local-copy
//! detection eliminate cross-peer transfers for renamed or duplicated
//! content.
//!
//! Conflicts (both sides diverged with different content) are resolved
//! through a [`ConflictResolver`]; refusing unwinds the whole sync with
//! [`CofferError::Cancelled`].
//!
//! The [`check_file_equal`] overwrite guard is the single anti-data-loss
//! invariant of this layer: no sync ever overwrites a file that is neither
//! tracked with its prior content nor a known in-flight resumable write.

use std::collections::{BTreeSet, HashMap};
use std::io::BufRead;

use crate::database::{CHECKSUM_REMOVED, CHECKSUM_REVERTED, Commit, Database, Meta};
use crate::error::{CofferError, Result};
use crate::logging::Logger;
use crate::remote::Remote;
use crate::worktree::WorkTree;


/// Per-side transfer plan: five disjoint lists of file-plane operations.
#[derive(Debug, Default)]
pub struct SyncTable {
    pub name: String,
    /// Peer metas whose content must be fetched from the other side.
    pub copy: Vec<Meta>,
    /// Local metas to remove.
    pub delete: Vec<Meta>,
    /// Metas to adopt without any file I/O.
    pub merged: Vec<Meta>,
    /// `(old, new)` pairs where the content already exists locally under
    /// the old name and the old name is going away.
    pub moves: Vec<(Meta, Meta)>,
    /// `(existing, new)` pairs for local duplication.
    pub copy_local: Vec<(Meta, Meta)>,
}

impl SyncTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// True iff the plan holds no work at all.
    pub fn done(&self) -> bool {
        self.copy.is_empty()
            && self.delete.is_empty()
            && self.merged.is_empty()
            && self.moves.is_empty()
            && self.copy_local.is_empty()
    }

    fn merge(&mut self, meta: Meta) {
        self.merged.push(meta);
    }

    /// Route a peer meta: tombstones become deletes, normal content becomes
    /// a copy. Revert markers never propagate as content.
    fn process(&mut self, meta: Meta, log: &Logger) {
        if meta.checksum == CHECKSUM_REMOVED {
            log.verbose(1, format!("#SYNC:{}: delete {}", meta.filename, self.name));
            self.delete.push(meta);
        } else {
            debug_assert!(meta.checksum != CHECKSUM_REVERTED);
            log.verbose(1, format!("#SYNC:{}: copy mod {}", meta.filename, self.name));
            self.copy.push(meta);
        }
    }

    /// Plan adoption of files the other side has never seen: normal files
    /// are copied, tombstones and revert markers are merged as metadata
    /// only.
    fn append_missing_files(
        &mut self,
        filenames: impl IntoIterator<Item = String>,
        db: &Database,
        log: &Logger,
    ) -> Result<()> {
        for filename in filenames {
            let meta = db.meta_get(&filename)?;
            if meta.checksum_normal() {
                log.verbose(1, format!("#SYNC:{}: copy new {}", meta.filename, self.name));
                self.copy.push(meta);
            } else {
                log.verbose(1, format!("#SYNC:{}: merge missing {}", meta.filename, self.name));
                self.merged.push(meta);
            }
        }
        Ok(())
    }

    /// Rewrite `copy` entries whose content already exists in the local
    /// database: paired with a pending delete of the old name they become a
    /// `move`, otherwise a `copy_local`. Either way the cross-peer transfer
    /// is dropped.
    fn detect_move_files(&mut self, db: &mut Database, log: &Logger) {
        let to_delete: HashMap<String, usize> = self
            .delete
            .iter()
            .enumerate()
            .map(|(index, meta)| (meta.filename.clone(), index))
            .collect();

        let mut rmfrom_copy = BTreeSet::new();
        let mut rmfrom_delete = BTreeSet::new();

        for (index, meta_copy) in self.copy.iter().enumerate() {
            let Ok(meta_old) = db.meta_find(&meta_copy.checksum) else {
                continue;
            };
            rmfrom_copy.insert(index);

            if let Some(&index_in_delete) = to_delete.get(&meta_old.filename) {
                let meta_old = self.delete[index_in_delete].clone();
                rmfrom_delete.insert(index_in_delete);
                log.verbose(
                    1,
                    format!(
                        "#SYNC:{}: move from {} in {}",
                        meta_copy.filename, meta_old.filename, self.name
                    ),
                );
                self.moves.push((meta_old, meta_copy.clone()));
            } else {
                log.verbose(
                    1,
                    format!(
                        "#SYNC:{}: copy_local from {} in {}",
                        meta_copy.filename, meta_old.filename, self.name
                    ),
                );
                self.copy_local.push((meta_old, meta_copy.clone()));
            }
        }

        let filter = |list: &mut Vec<Meta>, drop: &BTreeSet<usize>| {
            let mut index = 0;
            list.retain(|_| {
                let keep = !drop.contains(&index);
                index += 1;
                keep
            });
        };
        filter(&mut self.copy, &rmfrom_copy);
        filter(&mut self.delete, &rmfrom_delete);
    }
}

/// Classification of an overwrite target by [`check_file_equal`].
#[derive(Debug, PartialEq, Eq)]
pub enum OverwriteCheck {
    /// The target may be written: missing, a resumable partial transfer, or
    /// tracked with its prior content.
    OverwriteOk,
    /// The target already carries the wanted content; skip the operation.
    Equal,
    /// The target holds untracked data; writing would lose it. Carries the
    /// offending filename.
    Untracked(String),
}

/// The overwrite guard run before every `file_set`/`file_move`/`file_copy`
/// that targets an existing on-disk file.
pub fn check_file_equal(
    meta: &Meta,
    database: &Database,
    tree: &WorkTree,
) -> Result<OverwriteCheck> {
    let mut meta_fs = meta.clone();
    match tree.meta_update(&mut meta_fs) {
        Err(e) if e.is_not_found() => return Ok(OverwriteCheck::OverwriteOk),
        Err(e) => return Err(e),
        Ok(_) => {}
    }

    if meta_fs.fs_equal(meta) {
        return Ok(OverwriteCheck::Equal);
    }

    // A same-named file in the trash marks a resumed interrupted write.
    if tree.trash_exists(&meta.filename) {
        return Ok(OverwriteCheck::OverwriteOk);
    }

    match database.meta_get(&meta.filename) {
        Ok(meta_db) => {
            if meta_db.checksum == CHECKSUM_REVERTED || meta_db.fs_equal(&meta_fs) {
                return Ok(OverwriteCheck::OverwriteOk);
            }
        }
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e),
    }

    Ok(OverwriteCheck::Untracked(meta.filename.clone()))
}

/// Refuse to plan a sync over a database with pending staging operations.
pub fn check_database(database: &Database) -> Result<()> {
    if database.get_table_sizes().2 > 0 {
        return Err(CofferError::Cancelled(
            "Database has staging operations. Commit changes and try again".to_string(),
        ));
    }
    Ok(())
}

/// The user's answer at a conflict prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictChoice {
    Local,
    Other,
    Abort,
}

/// One side of a conflict as shown to the resolver.
pub struct ConflictSide<'a> {
    pub name: &'a str,
    pub meta: &'a Meta,
    /// Up to the five most recent commits touching the file, newest first.
    pub commits: &'a [Commit],
}

/// Decides conflicts during planning.
///
/// The terminal implementation prompts the user; tests use
/// [`ScriptedResolver`].
pub trait ConflictResolver {
    fn resolve(
        &mut self,
        index: usize,
        total: usize,
        local: ConflictSide<'_>,
        other: ConflictSide<'_>,
    ) -> Result<ConflictChoice>;
}

/// Interactive resolver reading `l` / `o` / `x` from stdin.
pub struct TerminalResolver {
    log: Logger,
}

impl TerminalResolver {
    pub fn new(log: Logger) -> Self {
        Self { log }
    }

    fn print_side(&self, side: &ConflictSide<'_>) {
        self.log.info(format!(" ---- {} info below ----- ", side.name));
        self.log.info(format!(" Checksum: {}", side.meta.checksum));
        self.log.info(format!(
            " Last modified: {}",
            Commit::time_string(side.meta.modtime as f64)
        ));
        self.log.info(" Last 5 commits: ");
        for commit in side.commits {
            self.log.info(format!(
                "    Commit: {} at {} - msg: {}",
                commit.uid,
                Commit::time_string(commit.timestamp),
                commit.message
            ));
        }
    }
}

impl ConflictResolver for TerminalResolver {
    fn resolve(
        &mut self,
        index: usize,
        total: usize,
        local: ConflictSide<'_>,
        other: ConflictSide<'_>,
    ) -> Result<ConflictChoice> {
        self.log.info(format!(
            "Conflict ({index}/{total}) on file '{}'. Manual resolve required.",
            local.meta.filename
        ));
        self.print_side(&local);
        self.print_side(&other);
        self.log.info("------------------------------------");

        let stdin = std::io::stdin();
        loop {
            self.log
                .info("Select (L)ocal or (O)thers or e(X)it and cancel sync.");
            let mut line = String::new();
            let n = stdin
                .lock()
                .read_line(&mut line)
                .map_err(|e| CofferError::io("<stdin>", e))?;
            if n == 0 {
                return Ok(ConflictChoice::Abort);
            }
            match line.trim().to_lowercase().as_str() {
                "l" => return Ok(ConflictChoice::Local),
                "o" => return Ok(ConflictChoice::Other),
                "x" => return Ok(ConflictChoice::Abort),
                _ => continue,
            }
        }
    }
}

/// Resolver answering from a fixed script; for tests.
pub struct ScriptedResolver {
    answers: std::collections::VecDeque<ConflictChoice>,
}

impl ScriptedResolver {
    pub fn new(answers: impl IntoIterator<Item = ConflictChoice>) -> Self {
        Self {
            answers: answers.into_iter().collect(),
        }
    }
}

impl ConflictResolver for ScriptedResolver {
    fn resolve(
        &mut self,
        _index: usize,
        _total: usize,
        _local: ConflictSide<'_>,
        _other: ConflictSide<'_>,
    ) -> Result<ConflictChoice> {
        self.answers.pop_front().ok_or_else(|| {
            CofferError::Cancelled("no scripted answer left for conflict".to_string())
        })
    }
}

/// Find the common ancestor of two per-file commit histories.
///
/// Histories list commit uids oldest first; the returned pair holds each
/// side's reversed index of the first shared uid (`(0, 0)` when the newest
/// commits match, `(-1, -1)` when nothing is shared).
pub fn find_common_commit(commits_local: &[String], commits_other: &[String]) -> (i64, i64) {
    match (commits_local.last(), commits_other.last()) {
        (Some(a), Some(b)) if a == b => return (0, 0),
        (None, _) | (_, None) => return (-1, -1),
        _ => {}
    }

    let (shorter, longer, short_first) = if commits_local.len() < commits_other.len() {
        (commits_local, commits_other, true)
    } else {
        (commits_other, commits_local, false)
    };

    let shorter_reversed: HashMap<&String, i64> = shorter
        .iter()
        .rev()
        .enumerate()
        .map(|(index, uid)| (uid, index as i64))
        .collect();

    for (index_longer, uid) in longer.iter().rev().enumerate() {
        if let Some(&index_shorter) = shorter_reversed.get(uid) {
            return if short_first {
                (index_shorter, index_longer as i64)
            } else {
                (index_longer as i64, index_shorter)
            };
        }
    }

    (-1, -1)
}

/// Up to the five most recent commits of a file's history, newest first.
fn recent_commits(meta: &Meta, db: &Database) -> Vec<Commit> {
    meta.last_commits
        .iter()
        .rev()
        .take(5)
        .filter_map(|uid| db.commit_get(uid).ok())
        .collect()
}

/// Build both sync tables and attach them to their remotes.
pub fn plan_sync(
    local: &mut dyn Remote,
    other: &mut dyn Remote,
    resolver: &mut dyn ConflictResolver,
    log: &Logger,
) -> Result<()> {
    let (xtable_local, xtable_other) = {
        let db_local = local.database();
        let db_other = other.database();
        build_tables(db_local, db_other, resolver, log)?
    };

    local.table_set(xtable_local);
    other.table_set(xtable_other);
    Ok(())
}

fn build_tables(
    db_local: &mut Database,
    db_other: &mut Database,
    resolver: &mut dyn ConflictResolver,
    log: &Logger,
) -> Result<(SyncTable, SyncTable)> {
    check_database(db_local)?;
    check_database(db_other)?;

    let mut xtable_local = SyncTable::new("Local");
    let mut xtable_other = SyncTable::new("Other");

    let local_metas = db_local.meta_list_keys();
    let other_metas = db_other.meta_list_keys();

    xtable_other.append_missing_files(
        local_metas.difference(&other_metas).cloned(),
        db_local,
        log,
    )?;
    xtable_local.append_missing_files(
        other_metas.difference(&local_metas).cloned(),
        db_other,
        log,
    )?;

    let conflicts = process_common_files(
        &mut xtable_local,
        &mut xtable_other,
        db_local,
        db_other,
        local_metas.intersection(&other_metas),
        log,
    )?;

    solve_conflicts(
        &mut xtable_local,
        &mut xtable_other,
        db_local,
        db_other,
        conflicts,
        resolver,
        log,
    )?;

    xtable_local.detect_move_files(db_local, log);
    xtable_other.detect_move_files(db_other, log);

    // Union-transfer missing commit records, both directions.
    let local_commits = db_local.commit_list_keys();
    let other_commits = db_other.commit_list_keys();
    append_commits(other_commits.difference(&local_commits), db_local, db_other)?;
    append_commits(local_commits.difference(&other_commits), db_other, db_local)?;

    Ok((xtable_local, xtable_other))
}

fn process_common_files<'a>(
    xtable_local: &mut SyncTable,
    xtable_other: &mut SyncTable,
    db_local: &Database,
    db_other: &Database,
    filenames: impl Iterator<Item = &'a String>,
    log: &Logger,
) -> Result<Vec<(Meta, Meta)>> {
    let mut conflicts = Vec::new();
    let mut nfiles_ok = 0usize;

    for filename in filenames {
        let meta_local = db_local.meta_get(filename)?;
        let meta_other = db_other.meta_get(filename)?;

        let (idx_local, idx_other) =
            find_common_commit(&meta_local.last_commits, &meta_other.last_commits);

        if idx_local == 0 && idx_other == 0 {
            // Shared last commit; only revert markers may differ.
            let local_revert = meta_local.checksum == CHECKSUM_REVERTED;
            let other_revert = meta_other.checksum == CHECKSUM_REVERTED;

            if local_revert && other_revert {
                log.verbose(
                    1,
                    format!("#SYNC:{filename}: marked for revert in both db, skip"),
                );
            } else if local_revert {
                xtable_local.copy.push(meta_other);
            } else if other_revert {
                xtable_other.copy.push(meta_local);
            } else if meta_local.checksum == meta_other.checksum {
                nfiles_ok += 1;
            } else {
                return Err(CofferError::Corruption(format!(
                    "File '{filename}' in both db and as last commit, but checksum differs"
                )));
            }
        } else if idx_local < 0 || (idx_local > 0 && idx_other > 0) {
            // No shared history, or both sides diverged.
            if meta_local.fs_equal(&meta_other) {
                log.verbose(1, format!("#SYNC:{filename}: merge identical"));
                xtable_local.merge(meta_local.clone());
                xtable_other.merge(meta_local);
            } else {
                log.info(format!(" Conflict: {filename}"));
                conflicts.push((meta_local, meta_other));
            }
        } else if idx_local == 0 {
            // The other side has newer commits for this file.
            xtable_local.process(meta_other, log);
        } else {
            xtable_other.process(meta_local, log);
        }
    }

    log.verbose(
        1,
        format!("#SYNC: {nfiles_ok} files skipped, as identical in both db"),
    );
    Ok(conflicts)
}

fn solve_conflicts(
    xtable_local: &mut SyncTable,
    xtable_other: &mut SyncTable,
    db_local: &Database,
    db_other: &Database,
    conflicts: Vec<(Meta, Meta)>,
    resolver: &mut dyn ConflictResolver,
    log: &Logger,
) -> Result<()> {
    let total = conflicts.len();
    for (index, (meta_local, meta_other)) in conflicts.into_iter().enumerate() {
        let commits_local = recent_commits(&meta_local, db_local);
        let commits_other = recent_commits(&meta_other, db_other);

        let choice = resolver.resolve(
            index + 1,
            total,
            ConflictSide {
                name: &xtable_local.name,
                meta: &meta_local,
                commits: &commits_local,
            },
            ConflictSide {
                name: &xtable_other.name,
                meta: &meta_other,
                commits: &commits_other,
            },
        )?;

        match choice {
            ConflictChoice::Local => xtable_other.process(meta_local, log),
            ConflictChoice::Other => xtable_local.process(meta_other, log),
            ConflictChoice::Abort => {
                log.info("Cancelling sync and bailing out.");
                return Err(CofferError::Cancelled(
                    "sync cancelled at conflict prompt".to_string(),
                ));
            }
        }
    }
    Ok(())
}

fn append_commits<'a>(
    commits: impl Iterator<Item = &'a String>,
    db_to: &mut Database,
    db_from: &Database,
) -> Result<()> {
    for uid in commits {
        let commit = db_from.commit_get(uid)?;
        db_to.commit_add(&commit);
    }
    Ok(())
}

/// Replay this side's sync table, fetching `copy` content from the peer.
///
/// Lists are executed in the order copy, copy_local, move, delete, merged;
/// entries within each list are processed sorted by filename, making
/// execution order fully deterministic. The local database is updated after
/// every file operation.
pub fn execute_sync(this: &mut dyn Remote, peer: &mut dyn Remote, log: &Logger) -> Result<()> {
    let Some(mut table) = this.table_take() else {
        return Ok(());
    };

    table.copy.sort_by(|a, b| a.filename.cmp(&b.filename));
    table.copy_local.sort_by(|a, b| a.0.filename.cmp(&b.0.filename));
    table.moves.sort_by(|a, b| a.0.filename.cmp(&b.0.filename));
    table.delete.sort_by(|a, b| a.filename.cmp(&b.filename));

    for item in &table.copy {
        log.verbose(1, format!("Repo {}: Transfer {}", table.name, item.filename));
        let mut source = peer.file_get(item)?;
        this.file_set(item, source.as_mut())?;
        drop(source);
        this.database().meta_set(item);
    }

    for (item_source, item_target) in &table.copy_local {
        log.verbose(
            1,
            format!(
                "Repo {}: Copy local {} -> {}",
                table.name, item_source.filename, item_target.filename
            ),
        );
        this.file_copy(item_source, item_target)?;
        this.database().meta_set(item_target);
    }

    for (item_source, item_target) in &table.moves {
        log.verbose(
            1,
            format!(
                "Repo {}: Move {} -> {}",
                table.name, item_source.filename, item_target.filename
            ),
        );
        this.file_move(item_source, item_target)?;
        this.database().meta_set(item_source);
        this.database().meta_set(item_target);
    }

    for item in &table.delete {
        log.verbose(1, format!("Repo {}: Delete {}", table.name, item.filename));
        this.file_del(item)?;
        this.database().meta_set(item);
    }

    for meta in &table.merged {
        this.database().meta_set(meta);
    }

    Ok(())
}
