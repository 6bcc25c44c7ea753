//! The persisted metadata store.
//!
//! A [`Database`] maps tracked filenames to [`Meta`] records (modtime,
//! checksum, per-file commit history), holds the staging set of pending
//! [`Operation`]s and the append-only [`Commit`] map, and carries the
//! sync-status flag that guards crash recovery.
//!
//! # On-disk format
//!
//! The database serializes to a single JSON object:
//!
//! ```json
//! {
//!   "version_major": 0, "version_minor": 1, "name": "...",
//!   "status": "ok",
//!   "stor":   { "path/file": [modtime, checksum, [commit_uid, ...]] },
//!   "stag":   { "path/file": [operation, extra] },
//!   "commit": { "uid": [uid, timestamp, message, [[file, op, extra], ...]] }
//! }
//! ```
//!
//! Entities are positional arrays; Rust tuples keep that field order stable
//! for on-disk and wire compatibility.
//!
//! # Atomic save
//!
//! [`Database::save`] serializes to a sibling `.tmp` file and renames it
//! over the canonical file. A crash between mutations and save loses only
//! those mutations, never the prior state.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::{DATABASE_FILE, PATH_SEPARATOR};
use crate::error::{CofferError, Result};


/// Sentinel checksum: tracked but unhashed (transient during commit).
pub const CHECKSUM_NONE: &str = "";
/// Sentinel checksum: deleted by a past commit.
pub const CHECKSUM_REMOVED: &str = "#FILE_REMOVED";
/// Sentinel checksum: marked for revert, restored on next sync.
pub const CHECKSUM_REVERTED: &str = "#FILE_REVERT";

/// Per-file record: modtime, checksum and the commit uids that touched it.
#[derive(Debug, Clone, PartialEq)]
pub struct Meta {
    /// Repository-relative, forward-slash path. Never absolute.
    pub filename: String,
    /// Seconds since epoch, truncated from the filesystem mtime.
    pub modtime: i64,
    /// Hex digest, or one of the `#`-prefixed sentinels, or empty.
    pub checksum: String,
    /// Commit uids that touched this file, newest appended last.
    pub last_commits: Vec<String>,
}

impl Meta {
    pub fn new(filename: impl Into<String>) -> Self {
        let filename = filename.into();
        debug_assert!(!filename.starts_with(PATH_SEPARATOR));
        Self {
            filename,
            modtime: 0,
            checksum: CHECKSUM_NONE.to_string(),
            last_commits: Vec::new(),
        }
    }

    /// True iff the checksum is a real digest: non-empty and not a sentinel.
    pub fn checksum_normal(&self) -> bool {
        !self.checksum.is_empty() && !self.checksum.starts_with('#')
    }

    /// Compare the attributes that describe on-disk content: checksum and
    /// modtime.
    pub fn fs_equal(&self, other: &Meta) -> bool {
        self.checksum == other.checksum && self.modtime == other.modtime
    }

    /// Record a commit as the newest entry of this file's history.
    pub fn add_commit(&mut self, commit: &Commit) {
        self.last_commits.push(commit.uid.clone());
    }
}

/// Kind of a staged operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Add,
    Del,
    Modify,
    Revert,
}

impl OpKind {
    /// Short mnemonic used in the persisted staging and commit tables.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Del => "del",
            Self::Modify => "mod",
            Self::Revert => "rev",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "add" => Ok(Self::Add),
            "del" => Ok(Self::Del),
            "mod" => Ok(Self::Modify),
            "rev" => Ok(Self::Revert),
            other => Err(CofferError::Corruption(format!(
                "unknown operation '{other}' in staging table"
            ))),
        }
    }
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A staged intent, keyed by filename. At most one per filename.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub filename: String,
    pub kind: OpKind,
    /// Unused payload slot, kept for format compatibility.
    pub extra: Option<String>,
}

impl Operation {
    pub fn new(filename: impl Into<String>, kind: OpKind) -> Self {
        Self {
            filename: filename.into(),
            kind,
            extra: None,
        }
    }
}

/// One affected entry of a commit: `(filename, operation, extra)`.
pub type Affected = (String, String, Option<String>);

/// An immutable record of a batch of operations applied together.
#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
    /// Time-ordered unique identifier (UUIDv7).
    pub uid: String,
    /// Seconds since epoch, sub-second resolution.
    pub timestamp: f64,
    pub message: String,
    /// Ordered list of affected files.
    pub affected: Vec<Affected>,
}

impl Commit {
    pub fn new(message: impl Into<String>) -> Self {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Self {
            uid: uuid::Uuid::now_v7().to_string(),
            timestamp: now,
            message: message.into(),
            affected: Vec::new(),
        }
    }

    pub fn operation_append(&mut self, op: &Operation) {
        self.affected
            .push((op.filename.clone(), op.kind.to_string(), op.extra.clone()));
    }

    pub fn operation_count(&self) -> usize {
        self.affected.len()
    }

    /// Render a seconds-since-epoch timestamp as `YYYY-MM-DD HH:MM:SS` (UTC).
    pub fn time_string(timestamp: f64) -> String {
        chrono::DateTime::from_timestamp(timestamp as i64, 0)
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| format!("{timestamp}"))
    }
}

/// Sort key accepted by [`Database::commit_list`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitSort {
    Uid,
    Timestamp,
}

/// Sync-status flag persisted in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseStatus {
    Ok,
    Sync,
}

type MetaRecord = (i64, String, Vec<String>);
type StagRecord = (String, Option<String>);
type CommitRecord = (String, f64, String, Vec<Affected>);

/// The serialized shape of the database; field names are the JSON keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DatabaseDoc {
    version_major: u32,
    version_minor: u32,
    name: String,
    status: DatabaseStatus,
    stor: BTreeMap<String, MetaRecord>,
    stag: BTreeMap<String, StagRecord>,
    commit: BTreeMap<String, CommitRecord>,
}

impl DatabaseDoc {
    fn new(name: String) -> Self {
        Self {
            version_major: 0,
            version_minor: 1,
            name,
            status: DatabaseStatus::Ok,
            stor: BTreeMap::new(),
            stag: BTreeMap::new(),
            commit: BTreeMap::new(),
        }
    }
}

/// The metadata store of one repository.
///
/// Map iteration is `BTreeMap` order (sorted by key), so every listing in
/// this module is deterministic; `staging_list` is sorted by filename for
/// free.
#[derive(Debug)]
pub struct Database {
    doc: DatabaseDoc,
    db_file: Option<PathBuf>,
    /// Lazily built checksum → filename reverse index over normal entries.
    /// Invalidated explicitly by `meta_set` and whole-document loads.
    find_index: Option<HashMap<String, String>>,
}

impl Database {
    /// Path of the database file under a metadata directory.
    pub fn database_file(dir: &Path) -> PathBuf {
        dir.join(DATABASE_FILE)
    }

    /// Open an existing database from its metadata directory.
    pub fn open_from_path(dir: &Path) -> Result<Self> {
        let db_file = Self::database_file(dir);
        let raw = fs::read_to_string(&db_file).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                CofferError::NotFound(format!("Database not found: {}", db_file.display()))
            } else {
                CofferError::io(&db_file, source)
            }
        })?;
        let doc: DatabaseDoc = serde_json::from_str(&raw)?;
        Ok(Self {
            doc,
            db_file: Some(db_file),
            find_index: None,
        })
    }

    /// Create a new database file under `dir` and return the open handle.
    pub fn create_to_path(dir: &Path, name: &str) -> Result<Self> {
        let mut db = Self {
            doc: DatabaseDoc::new(name.to_string()),
            db_file: Some(Self::database_file(dir)),
            find_index: None,
        };
        db.save()?;
        Ok(db)
    }

    /// Build an in-memory database (no backing file), e.g. for a peer
    /// snapshot received over the wire.
    pub fn in_memory(name: &str) -> Self {
        Self {
            doc: DatabaseDoc::new(name.to_string()),
            db_file: None,
            find_index: None,
        }
    }

    /// Serialize the whole database to a JSON string.
    pub fn json_dumps(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.doc)?)
    }

    /// Replace the whole database with a decoded JSON string. The backing
    /// file, if any, is kept.
    pub fn json_loads(&mut self, raw: &str) -> Result<()> {
        self.doc = serde_json::from_str(raw)?;
        self.find_index = None;
        Ok(())
    }

    /// Persist atomically: write a sibling temporary file, then rename it
    /// over the canonical file.
    pub fn save(&self) -> Result<()> {
        let Some(db_file) = &self.db_file else {
            return Err(CofferError::Usage(
                "database has no backing file to save to".to_string(),
            ));
        };
        let raw = self.json_dumps()?;
        let tmp_file = db_file.with_extension("json.tmp");
        let mut fid = File::create(&tmp_file).map_err(|e| CofferError::io(&tmp_file, e))?;
        fid.write_all(raw.as_bytes())
            .map_err(|e| CofferError::io(&tmp_file, e))?;
        fid.sync_all().map_err(|e| CofferError::io(&tmp_file, e))?;
        fs::rename(&tmp_file, db_file).map_err(|e| CofferError::io(db_file, e))?;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.doc.name
    }

    pub fn get_status(&self) -> DatabaseStatus {
        self.doc.status
    }

    pub fn set_status(&mut self, status: DatabaseStatus) {
        self.doc.status = status;
    }

    /// `(n_commits, n_stor, n_staging)`.
    pub fn get_table_sizes(&self) -> (usize, usize, usize) {
        (
            self.doc.commit.len(),
            self.doc.stor.len(),
            self.doc.stag.len(),
        )
    }

    pub fn meta_get(&self, filename: &str) -> Result<Meta> {
        let (modtime, checksum, last_commits) = self.doc.stor.get(filename).ok_or_else(|| {
            CofferError::NotFound(format!("File not found from database: '{filename}'"))
        })?;
        Ok(Meta {
            filename: filename.to_string(),
            modtime: *modtime,
            checksum: checksum.clone(),
            last_commits: last_commits.clone(),
        })
    }

    pub fn meta_set(&mut self, meta: &Meta) {
        self.doc.stor.insert(
            meta.filename.clone(),
            (meta.modtime, meta.checksum.clone(), meta.last_commits.clone()),
        );
        // The reverse index may now be stale.
        self.find_index = None;
    }

    /// Reverse lookup: find a file carrying `checksum`.
    ///
    /// Only normal checksums participate. When several filenames share a
    /// checksum the first in filename order wins, which keeps move
    /// detection deterministic.
    pub fn meta_find(&mut self, checksum: &str) -> Result<Meta> {
        if self.find_index.is_none() {
            let mut index = HashMap::new();
            for (filename, (_, cs, _)) in &self.doc.stor {
                if !cs.is_empty() && !cs.starts_with('#') {
                    index.entry(cs.clone()).or_insert_with(|| filename.clone());
                }
            }
            self.find_index = Some(index);
        }
        let filename = self
            .find_index
            .as_ref()
            .and_then(|index| index.get(checksum))
            .ok_or_else(|| CofferError::NotFound(format!("Checksum '{checksum}' not found")))?
            .clone();
        self.meta_get(&filename)
    }

    /// All metas whose filename starts with `prefix` (all when `None` or
    /// empty), in filename order.
    pub fn meta_list(&self, prefix: Option<&str>) -> Vec<Meta> {
        let prefix = prefix.filter(|p| !p.is_empty());
        self.doc
            .stor
            .iter()
            .filter(|(filename, _)| prefix.is_none_or(|p| filename.starts_with(p)))
            .map(|(filename, (modtime, checksum, last_commits))| Meta {
                filename: filename.clone(),
                modtime: *modtime,
                checksum: checksum.clone(),
                last_commits: last_commits.clone(),
            })
            .collect()
    }

    pub fn meta_list_keys(&self) -> BTreeSet<String> {
        self.doc.stor.keys().cloned().collect()
    }

    /// Insert a staged operation; at most one may be pending per filename.
    pub fn staging_add(&mut self, op: Operation) -> Result<()> {
        if self.doc.stag.contains_key(&op.filename) {
            return Err(CofferError::StagingConflict(op.filename));
        }
        self.doc
            .stag
            .insert(op.filename, (op.kind.to_string(), op.extra));
        Ok(())
    }

    pub fn staging_get(&self, filename: &str) -> Result<Operation> {
        let (kind, extra) = self
            .doc
            .stag
            .get(filename)
            .ok_or_else(|| CofferError::NotFound(filename.to_string()))?;
        Ok(Operation {
            filename: filename.to_string(),
            kind: OpKind::parse(kind)?,
            extra: extra.clone(),
        })
    }

    /// All pending operations, sorted by filename.
    pub fn staging_list(&self) -> Result<Vec<Operation>> {
        self.doc
            .stag
            .iter()
            .map(|(filename, (kind, extra))| {
                Ok(Operation {
                    filename: filename.clone(),
                    kind: OpKind::parse(kind)?,
                    extra: extra.clone(),
                })
            })
            .collect()
    }

    pub fn staging_clear(&mut self) {
        self.doc.stag.clear();
    }

    pub fn commit_add(&mut self, commit: &Commit) {
        self.doc.commit.insert(
            commit.uid.clone(),
            (
                commit.uid.clone(),
                commit.timestamp,
                commit.message.clone(),
                commit.affected.clone(),
            ),
        );
    }

    pub fn commit_get(&self, uid: &str) -> Result<Commit> {
        let (uid, timestamp, message, affected) = self
            .doc
            .commit
            .get(uid)
            .ok_or_else(|| CofferError::NotFound(uid.to_string()))?;
        Ok(Commit {
            uid: uid.clone(),
            timestamp: *timestamp,
            message: message.clone(),
            affected: affected.clone(),
        })
    }

    pub fn commit_list_keys(&self) -> BTreeSet<String> {
        self.doc.commit.keys().cloned().collect()
    }

    /// List commits, optionally restricted to `keys`, sorted by `sort_by`
    /// (map order when `None`) and truncated to `limit` entries.
    ///
    /// Timestamps are `f64` and are ordered with `total_cmp`. Uids present
    /// in `keys` but absent from the table are skipped.
    pub fn commit_list(
        &self,
        sort_by: Option<CommitSort>,
        limit: Option<usize>,
        keys: Option<&BTreeSet<String>>,
    ) -> Vec<Commit> {
        let mut records: Vec<&CommitRecord> = match keys {
            Some(keys) => keys.iter().filter_map(|k| self.doc.commit.get(k)).collect(),
            None => self.doc.commit.values().collect(),
        };
        match sort_by {
            Some(CommitSort::Uid) => records.sort_by(|a, b| a.0.cmp(&b.0)),
            Some(CommitSort::Timestamp) => records.sort_by(|a, b| a.1.total_cmp(&b.1)),
            None => {}
        }
        records
            .into_iter()
            .take(limit.unwrap_or(usize::MAX))
            .map(|(uid, timestamp, message, affected)| Commit {
                uid: uid.clone(),
                timestamp: *timestamp,
                message: message.clone(),
                affected: affected.clone(),
            })
            .collect()
    }

    /// Database-side recursive walk.
    ///
    /// An exact-key hit is returned alone, unless it is tombstoned under
    /// `only_existing` in which case the lookup falls through to the prefix
    /// scan (`name/`). Zero matches fail not-found.
    pub fn recursive_walk_files(&self, filename_raw: &str, only_existing: bool) -> Result<Vec<Meta>> {
        if let Ok(meta) = self.meta_get(filename_raw) {
            if !only_existing || meta.checksum != CHECKSUM_REMOVED {
                return Ok(vec![meta]);
            }
        }

        let mut prefix = filename_raw.to_string();
        if !prefix.ends_with(PATH_SEPARATOR) {
            prefix.push(PATH_SEPARATOR);
        }
        let matches: Vec<Meta> = self
            .meta_list(Some(&prefix))
            .into_iter()
            .filter(|meta| !only_existing || meta.checksum != CHECKSUM_REMOVED)
            .collect();

        if matches.is_empty() {
            return Err(CofferError::NotFound(format!(
                "No matching files: {filename_raw}"
            )));
        }
        Ok(matches)
    }
}
