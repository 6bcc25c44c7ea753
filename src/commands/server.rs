//! Server-mode command implementation.
//!
//! `coffer _server_mode <path>` serves the wire protocol over stdio; the
//! ssh client launches it on the remote host. All human output goes to
//! stderr, stdout belongs to the protocol stream.

use std::path::Path;

use crate::config::ARCHIVE_DIR;
use crate::database::Database;
use crate::error::{CofferError, Result};
use crate::logging::Logger;
use crate::remote::server::serve;
use crate::remote::transport::StdioTransport;
use crate::worktree::WorkTree;

use super::sync::fast_check_for_mods;

/// Serve the repository rooted at `path` until the peer closes.
pub fn server_mode(path: &str, log: &Logger) -> Result<i32> {
    let tree = WorkTree::open(Path::new(path))?;
    let mut db = Database::open_from_path(&tree.root().join(ARCHIVE_DIR))?;

    if fast_check_for_mods(&db, &tree, log)? > 0 {
        log.error("Remote has local modifications. Please commit changes there and try again.");
        return Err(CofferError::Cancelled(
            "remote has local modifications".to_string(),
        ));
    }

    serve(&mut db, &tree, Box::new(StdioTransport), *log)?;
    Ok(0)
}
