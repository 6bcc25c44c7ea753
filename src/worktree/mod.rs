//! Filesystem view of one repository.
//!
//! A [`WorkTree`] is anchored at the directory it was opened from and, after
//! [`WorkTree::ascend_until`], at the discovered repository root. All
//! tracked paths are repository-relative, forward-slash separated strings;
//! the view translates between those and absolute filesystem paths.
//!
//! The trash staging subtree under the metadata directory is the foundation
//! of crash-safety: incoming files are streamed to their trash path,
//! checksum-verified, and only then renamed to the final target, so an
//! interrupted transfer never leaves a half-written file in place.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};

use filetime::FileTime;
use walkdir::WalkDir;

use crate::config::{ARCHIVE_DIR, DATA_BLOCK_SIZE, PATH_SEPARATOR, TRASH_DIR};
use crate::database::{CHECKSUM_NONE, Meta};
use crate::error::{CofferError, Result};
use crate::hashing::Checksummer;


/// Pull-based byte stream, yielded in fixed-size blocks.
///
/// Implemented by local file readers and by the wire data-frame receiver,
/// so file creation code does not care where the bytes come from.
pub trait ChunkSource {
    /// Next block of data, `None` at end of stream.
    fn next_chunk(&mut self) -> Result<Option<Vec<u8>>>;
}

/// In-memory chunk queue; handy for tests and small payloads.
impl ChunkSource for std::collections::VecDeque<Vec<u8>> {
    fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.pop_front())
    }
}

/// Streaming reader over a local file.
#[derive(Debug)]
pub struct FileChunks {
    fid: File,
    path: PathBuf,
}

impl ChunkSource for FileChunks {
    fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        let mut block = vec![0u8; DATA_BLOCK_SIZE];
        let n = self
            .fid
            .read(&mut block)
            .map_err(|e| CofferError::io(&self.path, e))?;
        if n == 0 {
            return Ok(None);
        }
        block.truncate(n);
        Ok(Some(block))
    }
}

/// Filesystem view anchored at a repository.
#[derive(Debug, Clone)]
pub struct WorkTree {
    /// Where the view was opened (the invocation directory, resolved).
    path_init: PathBuf,
    /// The repository root; equals `path_init` until `ascend_until` finds
    /// the metadata directory further up.
    path_root: PathBuf,
}

impl WorkTree {
    /// Open a view anchored at `path`, which must exist.
    pub fn open(path: &Path) -> Result<Self> {
        let resolved = path
            .canonicalize()
            .map_err(|_| CofferError::NotFound(format!("Path not found: {}", path.display())))?;
        Ok(Self {
            path_root: resolved.clone(),
            path_init: resolved,
        })
    }

    /// Ascend from the anchor until `marker` exists as a subdirectory and
    /// make that level the root. Fails not-found after `max_levels` steps
    /// (default: the full depth to the filesystem root).
    pub fn ascend_until(&mut self, marker: &str, max_levels: Option<usize>) -> Result<()> {
        let max_levels = max_levels.unwrap_or_else(|| self.path_init.components().count());
        let mut current = self.path_init.clone();
        for _ in 0..max_levels {
            if current.join(marker).is_dir() {
                self.path_root = current;
                return Ok(());
            }
            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => break,
            }
        }
        Err(CofferError::NotFound(format!(
            "Limit reached, '{marker}' not found"
        )))
    }

    /// The repository root directory.
    pub fn root(&self) -> &Path {
        &self.path_root
    }

    /// Absolute path of a repository-relative filename. The empty string
    /// names the root itself.
    pub fn absolute(&self, filename: &str) -> PathBuf {
        let mut abs = self.path_root.clone();
        for part in filename
            .split(PATH_SEPARATOR)
            .filter(|p| !p.is_empty() && *p != ".")
        {
            abs.push(part);
        }
        abs
    }

    /// Produce a repository-relative string from an absolute path or a path
    /// relative to the invocation directory.
    ///
    /// With `no_resolve = false` the path must exist and symlinks are
    /// canonicalized; otherwise the join is purely lexical (`.`/`..`
    /// components folded without touching the filesystem).
    pub fn make_relative(&self, raw_path: &str, no_resolve: bool) -> Result<String> {
        let joined = self.path_init.join(raw_path);
        let resolved = if no_resolve {
            normalize_lexically(&joined)
        } else {
            joined
                .canonicalize()
                .map_err(|_| CofferError::NotFound(format!("Path not found: {raw_path}")))?
        };
        let relative = resolved.strip_prefix(&self.path_root).map_err(|_| {
            CofferError::InvalidPath(format!(
                "'{raw_path}' is outside the repository at {}",
                self.path_root.display()
            ))
        })?;
        path_to_relative_string(relative)
    }

    /// True for paths under the reserved metadata directory.
    fn is_blacklisted(filename: &str) -> bool {
        filename == ARCHIVE_DIR
            || filename
                .strip_prefix(ARCHIVE_DIR)
                .is_some_and(|rest| rest.starts_with(PATH_SEPARATOR))
    }

    /// Repository-relative names of all regular files at or below
    /// `abstract_filename`, in sorted order. The metadata directory is
    /// skipped; a missing input fails not-found; exotic entry types fail
    /// unsupported.
    pub fn recursive_walk_files(&self, abstract_filename: &str) -> Result<Vec<String>> {
        let normalized = normalize_lexically(&self.absolute(abstract_filename));
        let relative = normalized
            .strip_prefix(&self.path_root)
            .map_err(|_| CofferError::InvalidPath(normalized.display().to_string()))
            .and_then(path_to_relative_string)?;
        if Self::is_blacklisted(&relative) {
            return Ok(Vec::new());
        }

        let target = self.absolute(&relative);
        let info = fs::metadata(&target).map_err(|_| {
            CofferError::NotFound(format!("File does not exists: {relative}"))
        })?;

        if info.is_file() {
            return Ok(vec![relative]);
        }
        if !info.is_dir() {
            return Err(CofferError::UnsupportedType(relative));
        }

        let mut found = Vec::new();
        for entry in WalkDir::new(&target).follow_links(true).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| target.clone());
                CofferError::io(path, e.into())
            })?;
            let rel = entry
                .path()
                .strip_prefix(&self.path_root)
                .map_err(|_| CofferError::InvalidPath(entry.path().display().to_string()))
                .and_then(path_to_relative_string)?;
            if Self::is_blacklisted(&rel) {
                continue;
            }
            let kind = entry.file_type();
            if kind.is_file() {
                found.push(rel);
            } else if !kind.is_dir() {
                return Err(CofferError::UnsupportedType(rel));
            }
        }
        Ok(found)
    }

    /// Modification time of a tracked file, truncated to whole seconds.
    pub fn modtime(&self, filename: &str) -> Result<i64> {
        let target = self.absolute(filename);
        let info = fs::metadata(&target)
            .map_err(|_| CofferError::NotFound(format!("File not found {filename}")))?;
        let modified = info.modified().map_err(|e| CofferError::io(&target, e))?;
        Ok(FileTime::from_system_time(modified).unix_seconds())
    }

    fn set_modtime(path: &Path, modtime: i64) -> Result<()> {
        let mtime = FileTime::from_unix_time(modtime, 0);
        filetime::set_file_times(path, mtime, mtime).map_err(|e| CofferError::io(path, e))
    }

    /// Refresh `meta.checksum` and `meta.modtime` from the file on disk,
    /// streaming in fixed-size blocks. Returns the byte count.
    pub fn meta_update(&self, meta: &mut Meta) -> Result<u64> {
        let target = self.absolute(&meta.filename);
        meta.modtime = self.modtime(&meta.filename)?;

        let mut fid = File::open(&target)
            .map_err(|_| CofferError::NotFound(format!("File not found {}", meta.filename)))?;
        let mut cs = Checksummer::new();
        let mut block = vec![0u8; DATA_BLOCK_SIZE];
        loop {
            let n = fid.read(&mut block).map_err(|e| CofferError::io(&target, e))?;
            if n == 0 {
                break;
            }
            cs.update(&block[..n]);
        }
        let bytes = cs.bytes();
        meta.checksum = cs.finish();
        Ok(bytes)
    }

    /// Open a streaming reader over a tracked file.
    pub fn file_read(&self, filename: &str) -> Result<FileChunks> {
        let path = self.absolute(filename);
        let fid = File::open(&path)
            .map_err(|_| CofferError::NotFound(format!("File not found {filename}")))?;
        Ok(FileChunks { fid, path })
    }

    /// Two-phase file write: stream the source to the trash staging path,
    /// apply the modtime, verify the checksum against `meta.checksum` (when
    /// it is a real digest), then rename into place.
    pub fn file_create(&self, meta: &Meta, source: &mut dyn ChunkSource) -> Result<()> {
        let target = self.absolute(&meta.filename);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| CofferError::io(parent, e))?;
        }

        let verify = meta.checksum != CHECKSUM_NONE;
        let tmp_path = self.trash_prepare(&meta.filename)?;
        let mut cs = Checksummer::new();
        let mut fid = File::create(&tmp_path).map_err(|e| CofferError::io(&tmp_path, e))?;
        while let Some(block) = source.next_chunk()? {
            if verify {
                cs.update(&block);
            }
            fid.write_all(&block).map_err(|e| CofferError::io(&tmp_path, e))?;
        }
        fid.sync_all().map_err(|e| CofferError::io(&tmp_path, e))?;
        drop(fid);

        Self::set_modtime(&tmp_path, meta.modtime)?;

        if verify {
            let computed = cs.finish();
            if computed != meta.checksum {
                return Err(CofferError::Checksum {
                    filename: meta.filename.clone(),
                    computed,
                    expected: meta.checksum.clone(),
                });
            }
        }

        fs::rename(&tmp_path, &target).map_err(|e| CofferError::io(&target, e))?;
        Ok(())
    }

    pub fn file_exists(&self, filename: &str) -> bool {
        self.absolute(filename).exists()
    }

    /// Unlink a file; a missing target is tolerated when `missing_ok`.
    pub fn file_del(&self, filename: &str, missing_ok: bool) -> Result<()> {
        match fs::remove_file(self.absolute(filename)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if missing_ok {
                    Ok(())
                } else {
                    Err(CofferError::NotFound(format!("File not found {filename}")))
                }
            }
            Err(e) => Err(CofferError::io(self.absolute(filename), e)),
        }
    }

    /// Absolute trash path of a filename, with parent directories created.
    fn trash_prepare(&self, filename: &str) -> Result<PathBuf> {
        let target = self.trash_path(filename);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| CofferError::io(parent, e))?;
        }
        Ok(target)
    }

    fn trash_path(&self, filename: &str) -> PathBuf {
        let mut path = self.path_root.join(TRASH_DIR.split(PATH_SEPARATOR).collect::<PathBuf>());
        for part in filename.split(PATH_SEPARATOR).filter(|p| !p.is_empty()) {
            path.push(part);
        }
        path
    }

    /// Move a file into the trash tree, preserving its relative layout.
    pub fn trash_add(&self, filename: &str, missing_ok: bool) -> Result<()> {
        let source = self.absolute(filename);
        let target = self.trash_prepare(filename)?;
        match fs::rename(&source, &target) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if missing_ok {
                    Ok(())
                } else {
                    Err(CofferError::NotFound(format!(
                        "File not found: {}",
                        source.display()
                    )))
                }
            }
            Err(e) => Err(CofferError::io(&source, e)),
        }
    }

    pub fn trash_exists(&self, filename: &str) -> bool {
        self.trash_path(filename).exists()
    }

    /// Move a single file back out of the trash.
    pub fn trash_revert(&self, filename: &str) -> Result<()> {
        let source = self.trash_path(filename);
        let target = self.absolute(filename);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| CofferError::io(parent, e))?;
        }
        fs::rename(&source, &target).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CofferError::NotFound(format!("File not found: {}", source.display()))
            } else {
                CofferError::io(&source, e)
            }
        })
    }

    /// Recursively delete the trash subtree.
    pub fn trash_clear(&self) -> Result<()> {
        let trash = self.path_root.join(TRASH_DIR.split(PATH_SEPARATOR).collect::<PathBuf>());
        if !trash.exists() {
            return Ok(());
        }
        if !trash.is_dir() {
            return Err(CofferError::UnsupportedType(format!(
                "Trash directory '{}' is not a directory",
                trash.display()
            )));
        }
        fs::remove_dir_all(&trash).map_err(|e| CofferError::io(&trash, e))
    }

    /// Directory part of a repository-relative filename; empty at the root.
    pub fn parent_of(filename: &str) -> String {
        match filename.rsplit_once(PATH_SEPARATOR) {
            Some((dir, _)) => dir.to_string(),
            None => String::new(),
        }
    }

    /// For each start point, ascend and remove empty directories, stopping
    /// at the repository root.
    pub fn remove_empty_dirs(&self, to_check: &BTreeSet<String>) -> Result<()> {
        for item in to_check {
            let mut path = self.absolute(item);
            while !path.exists() {
                match path.parent() {
                    Some(parent) if parent.starts_with(&self.path_root) => {
                        path = parent.to_path_buf();
                    }
                    _ => break,
                }
            }
            while path.is_dir() && path != self.path_root {
                let mut entries =
                    fs::read_dir(&path).map_err(|e| CofferError::io(&path, e))?;
                if entries.next().is_some() {
                    break;
                }
                fs::remove_dir(&path).map_err(|e| CofferError::io(&path, e))?;
                match path.parent() {
                    Some(parent) => path = parent.to_path_buf(),
                    None => break,
                }
            }
        }
        Ok(())
    }

    /// Rename `source_file` to `target_file`. A directory target receives
    /// the source's basename. Fails `Exists` when the full target exists.
    /// Returns the new repository-relative name.
    pub fn move_file(
        &self,
        source_file: &str,
        target_file: &str,
        create_dirs: bool,
        modtime: Option<i64>,
    ) -> Result<String> {
        let source = self.absolute(source_file);
        let target = self.absolute(target_file);

        let target_full = if target.is_dir() {
            match source.file_name() {
                Some(name) => target.join(name),
                None => target,
            }
        } else {
            target
        };

        if target_full.exists() {
            return Err(CofferError::Exists(format!(
                "Move target file '{}' exists",
                target_full.display()
            )));
        }

        if create_dirs
            && let Some(parent) = target_full.parent()
        {
            fs::create_dir_all(parent).map_err(|e| CofferError::io(parent, e))?;
        }
        fs::rename(&source, &target_full).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CofferError::NotFound(format!("File not found: {}", source.display()))
            } else {
                CofferError::io(&source, e)
            }
        })?;

        if let Some(modtime) = modtime {
            Self::set_modtime(&target_full, modtime)?;
        }

        let relative = target_full
            .strip_prefix(&self.path_root)
            .map_err(|_| CofferError::InvalidPath(target_full.display().to_string()))?;
        path_to_relative_string(relative)
    }
}

/// Fold `.` and `..` components without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut parts: Vec<Component> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(parts.last(), Some(Component::Normal(_))) {
                    parts.pop();
                } else {
                    parts.push(component);
                }
            }
            other => parts.push(other),
        }
    }
    parts.iter().collect()
}

/// Render a relative path as a forward-slash repository string.
fn path_to_relative_string(path: &Path) -> Result<String> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => {
                let part = part
                    .to_str()
                    .ok_or_else(|| CofferError::InvalidPath(path.display().to_string()))?;
                parts.push(part);
            }
            Component::CurDir => {}
            _ => return Err(CofferError::InvalidPath(path.display().to_string())),
        }
    }
    Ok(parts.join("/"))
}
