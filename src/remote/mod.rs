//! Peer repositories.
//!
//! A [`Remote`] binds a database and a file tree and exposes the file-plane
//! operations the sync executor needs, plus database fetch/store and the
//! sync-table attachment point. Two implementations exist: a local
//! filesystem peer ([`localfs::RemoteLocalFs`]) and a peer speaking the
//! wire protocol over a duplex byte channel ([`wire::RemoteWire`]).

use crate::database::{Database, Meta};
use crate::error::{CofferError, Result};
use crate::logging::Logger;
use crate::sync::SyncTable;
pub use crate::worktree::ChunkSource;

pub mod localfs;
pub mod server;
pub mod transport;
pub mod wire;

/// A peer repository taking part in a sync.
pub trait Remote {
    fn name(&self) -> &str;

    /// The peer's database (for the wire peer, a local snapshot fetched on
    /// open and pushed back by [`Remote::database_save`]).
    fn database(&mut self) -> &mut Database;

    /// Persist the database on the peer's side.
    fn database_save(&mut self) -> Result<()>;

    /// Release the peer: clear its trash and, for the wire peer, shut down
    /// the connection.
    fn close(&mut self) -> Result<()>;

    /// Stream a file's content from the peer.
    fn file_get(&mut self, source: &Meta) -> Result<Box<dyn ChunkSource + '_>>;

    /// Write a file on the peer, guarded against untracked overwrites.
    fn file_set(&mut self, target: &Meta, content: &mut dyn ChunkSource) -> Result<()>;

    /// Delete a file on the peer (missing is ok).
    fn file_del(&mut self, target: &Meta) -> Result<()>;

    /// Rename a file on the peer, guarded on the destination.
    fn file_move(&mut self, source: &Meta, target: &Meta) -> Result<()>;

    /// Duplicate a file on the peer, guarded on the destination.
    fn file_copy(&mut self, source: &Meta, target: &Meta) -> Result<()>;

    /// Attach the transfer plan computed by the sync planner.
    fn table_set(&mut self, table: SyncTable);

    /// Detach the plan for execution.
    fn table_take(&mut self) -> Option<SyncTable>;

    /// True when no plan is attached or the attached plan holds no work.
    fn table_done(&self) -> bool;
}

/// Open a peer repository by URL: `file://<path>` or
/// `ssh://user@host:<path>`.
pub fn remote_open(
    url: &str,
    name: &str,
    ssh_command: &str,
    log: Logger,
) -> Result<Box<dyn Remote>> {
    if let Some(path) = url.strip_prefix("file://") {
        Ok(Box::new(localfs::RemoteLocalFs::open(path, name)?))
    } else if url.starts_with("ssh://") {
        Ok(Box::new(wire::RemoteWire::open(url, name, ssh_command, log)?))
    } else {
        Err(CofferError::Protocol(format!("Unknown protocol '{url}'")))
    }
}
