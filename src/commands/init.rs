//! Init command implementation.

use std::fs;
use std::path::Path;

use crate::config::ARCHIVE_DIR;
use crate::database::Database;
use crate::error::{CofferError, Result};
use crate::logging::Logger;

/// Initialize a new repository in `current_dir`.
///
/// Refuses when the directory already lies inside a repository or carries
/// the metadata directory itself.
pub fn init(repo_found: bool, current_dir: &Path, name: &str, log: &Logger) -> Result<i32> {
    let archive_dir = current_dir.join(ARCHIVE_DIR);
    if repo_found || archive_dir.is_dir() {
        return Err(CofferError::Exists("The repository exists".to_string()));
    }

    fs::create_dir_all(&archive_dir).map_err(|e| CofferError::io(&archive_dir, e))?;
    Database::create_to_path(&archive_dir, name)?;
    log.verbose(1, format!("Initialized repository '{name}'"));
    Ok(0)
}
