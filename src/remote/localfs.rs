//! Peer repository on the local filesystem.

use std::path::Path;

use crate::config::ARCHIVE_DIR;
use crate::database::{Database, Meta};
use crate::error::{CofferError, Result};
use crate::remote::{ChunkSource, Remote};
use crate::sync::{OverwriteCheck, SyncTable, check_database, check_file_equal};
use crate::worktree::WorkTree;

/// A peer living in a directory this process can reach directly.
pub struct RemoteLocalFs {
    name: String,
    db: Database,
    tree: WorkTree,
    xtable: Option<SyncTable>,
}

impl RemoteLocalFs {
    /// Bind an already-open database and tree (the local side of a sync).
    pub fn from_parts(name: impl Into<String>, db: Database, tree: WorkTree) -> Result<Self> {
        let remote = Self {
            name: name.into(),
            db,
            tree,
            xtable: None,
        };
        remote.open_check()?;
        Ok(remote)
    }

    /// Open the repository rooted exactly at `path` (the peer side of a
    /// `file://` sync).
    pub fn open(path: &str, name: impl Into<String>) -> Result<Self> {
        let mut tree = WorkTree::open(Path::new(path))
            .map_err(|_| CofferError::NotFound(format!("Repository path not existing: '{path}'")))?;
        tree.ascend_until(ARCHIVE_DIR, Some(1))
            .map_err(|_| CofferError::NotFound(format!("Repository not found from path: '{path}'")))?;
        let db = Database::open_from_path(&tree.root().join(ARCHIVE_DIR))?;
        Self::from_parts(name, db, tree)
    }

    /// Clear stale trash and refuse a dirty staging set.
    fn open_check(&self) -> Result<()> {
        self.tree.trash_clear()?;
        check_database(&self.db)
    }

    pub fn tree(&self) -> &WorkTree {
        &self.tree
    }

    /// Guard a write target, mapping untracked data to the fatal
    /// would-overwrite error.
    fn guard(&self, target: &Meta) -> Result<OverwriteCheck> {
        match check_file_equal(target, &self.db, &self.tree)? {
            OverwriteCheck::Untracked(filename) => Err(CofferError::WouldOverwrite(filename)),
            ok => Ok(ok),
        }
    }
}

impl Remote for RemoteLocalFs {
    fn name(&self) -> &str {
        &self.name
    }

    fn database(&mut self) -> &mut Database {
        &mut self.db
    }

    fn database_save(&mut self) -> Result<()> {
        self.db.save()
    }

    fn close(&mut self) -> Result<()> {
        self.tree.trash_clear()
    }

    fn file_get(&mut self, source: &Meta) -> Result<Box<dyn ChunkSource + '_>> {
        Ok(Box::new(self.tree.file_read(&source.filename)?))
    }

    fn file_set(&mut self, target: &Meta, content: &mut dyn ChunkSource) -> Result<()> {
        match self.guard(target)? {
            OverwriteCheck::OverwriteOk => self.tree.file_create(target, content),
            OverwriteCheck::Equal => Ok(()),
            OverwriteCheck::Untracked(_) => unreachable!("guard maps untracked to an error"),
        }
    }

    fn file_del(&mut self, target: &Meta) -> Result<()> {
        self.tree.file_del(&target.filename, true)
    }

    fn file_move(&mut self, source: &Meta, target: &Meta) -> Result<()> {
        match self.guard(target)? {
            OverwriteCheck::OverwriteOk => {
                self.tree
                    .move_file(&source.filename, &target.filename, true, Some(target.modtime))?;
                Ok(())
            }
            // The target already holds the wanted content; only the stale
            // pre-move name needs to go.
            OverwriteCheck::Equal => self.tree.file_del(&source.filename, true),
            OverwriteCheck::Untracked(_) => unreachable!("guard maps untracked to an error"),
        }
    }

    fn file_copy(&mut self, source: &Meta, target: &Meta) -> Result<()> {
        match self.guard(target)? {
            OverwriteCheck::OverwriteOk => {
                let mut stream = self.tree.file_read(&source.filename)?;
                self.tree.file_create(target, &mut stream)
            }
            OverwriteCheck::Equal => Ok(()),
            OverwriteCheck::Untracked(_) => unreachable!("guard maps untracked to an error"),
        }
    }

    fn table_set(&mut self, table: SyncTable) {
        self.xtable = Some(table);
    }

    fn table_take(&mut self) -> Option<SyncTable> {
        self.xtable.take()
    }

    fn table_done(&self) -> bool {
        self.xtable.as_ref().is_none_or(SyncTable::done)
    }
}
