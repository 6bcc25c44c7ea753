//! Shared helpers for the integration tests: a temp-dir repository driven
//! through the command dispatcher, plus file fixtures with fixed
//! timestamps so modtime comparisons are deterministic.
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_fs::TempDir;
use coffer::cli::{Cli, Commands};
use coffer::commands::{execute_with_dir, execute_with_resolver};
use coffer::config::ARCHIVE_DIR;
use coffer::database::{CHECKSUM_REVERTED, Database, Meta};
use coffer::error::Result;
use coffer::hashing::Checksummer;
use coffer::sync::ConflictResolver;
use coffer::worktree::WorkTree;
use filetime::FileTime;

/// Fixed default mtime for fixture files.
pub const DEFAULT_TIMESTAMP: i64 = (1 << 20) + 3145;

/// Run a command with the dispatcher anchored at `dir`.
pub fn try_run_in(dir: &Path, command: Commands) -> Result<i32> {
    let cli = Cli::builder().quiet(true).command(command).build()?;
    execute_with_dir(&cli, Some(dir))
}

/// MD5 hex digest of a byte string.
pub fn md5_of(content: &[u8]) -> String {
    let mut cs = Checksummer::new();
    cs.update(content);
    cs.finish()
}

pub struct TestRepo {
    pub dir: TempDir,
    pub name: String,
}

impl TestRepo {
    pub fn new(name: &str) -> Self {
        let repo = Self {
            dir: TempDir::new().unwrap(),
            name: name.to_string(),
        };
        assert_eq!(
            repo.try_run(Commands::Init {
                name: name.to_string()
            })
            .unwrap(),
            0
        );
        repo
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn try_run(&self, command: Commands) -> Result<i32> {
        try_run_in(self.path(), command)
    }

    /// Run a command, asserting it did not fail fatally.
    pub fn run(&self, command: Commands) -> i32 {
        self.try_run(command).unwrap()
    }

    /// Run from a subdirectory of the repository.
    pub fn run_in(&self, subdir: &str, command: Commands) -> Result<i32> {
        try_run_in(&self.path().join(subdir), command)
    }

    // -- command shorthands ------------------------------------------------

    pub fn add(&self, files: &[&str]) -> i32 {
        self.run(Commands::Add {
            filenames: files.iter().map(|f| f.to_string()).collect(),
        })
    }

    pub fn rm(&self, files: &[&str]) -> i32 {
        self.run(Commands::Rm {
            filenames: files.iter().map(|f| f.to_string()).collect(),
        })
    }

    pub fn revert(&self, files: &[&str]) -> i32 {
        self.run(Commands::Revert {
            filenames: files.iter().map(|f| f.to_string()).collect(),
        })
    }

    pub fn commit(&self) -> i32 {
        self.commit_msg("")
    }

    pub fn commit_msg(&self, msg: &str) -> i32 {
        self.run(Commands::Commit {
            msg: msg.to_string(),
            auto: false,
        })
    }

    pub fn commit_auto(&self) -> i32 {
        self.run(Commands::Commit {
            msg: String::new(),
            auto: true,
        })
    }

    pub fn status(&self) -> i32 {
        self.run(Commands::Status)
    }

    pub fn verify(&self) -> i32 {
        self.run(Commands::Verify { filenames: vec![] })
    }

    /// Sync this repository against `other` over `file://`.
    pub fn sync_to(&self, other: &TestRepo) -> Result<i32> {
        self.try_run(Commands::Sync {
            url: format!("file://{}", other.path().display()),
            ssh_command: "ssh".to_string(),
        })
    }

    /// Sync with a scripted conflict resolver.
    pub fn sync_to_with(
        &self,
        other: &TestRepo,
        resolver: &mut dyn ConflictResolver,
    ) -> Result<i32> {
        let cli = Cli::builder()
            .quiet(true)
            .command(Commands::Sync {
                url: format!("file://{}", other.path().display()),
                ssh_command: "ssh".to_string(),
            })
            .build()?;
        execute_with_resolver(&cli, Some(self.path()), resolver)
    }

    /// Sync both directions and verify both sides converged.
    pub fn sync_both(&self, other: &TestRepo) {
        assert_eq!(self.sync_to(other).unwrap(), 0);
        assert_eq!(other.sync_to(self).unwrap(), 0);
        self.check_equal(other);
    }

    // -- filesystem fixtures -----------------------------------------------

    fn absolute(&self, rel: &str) -> PathBuf {
        self.path().join(rel.split('/').collect::<PathBuf>())
    }

    pub fn file_make_at(&self, rel: &str, content: &str, timestamp: i64) {
        let path = self.absolute(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        let mtime = FileTime::from_unix_time(timestamp, 0);
        filetime::set_file_times(&path, mtime, mtime).unwrap();
    }

    pub fn file_make(&self, rel: &str) {
        self.file_make_at(rel, &format!("content of {rel} ").repeat(8), DEFAULT_TIMESTAMP);
    }

    pub fn file_del(&self, rel: &str) {
        fs::remove_file(self.absolute(rel)).unwrap();
    }

    pub fn file_exists(&self, rel: &str) -> bool {
        self.absolute(rel).exists()
    }

    pub fn file_content(&self, rel: &str) -> Vec<u8> {
        fs::read(self.absolute(rel)).unwrap()
    }

    /// Copy a file preserving its modification time.
    pub fn file_copy(&self, src: &str, dst: &str) {
        let src_path = self.absolute(src);
        let dst_path = self.absolute(dst);
        if let Some(parent) = dst_path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::copy(&src_path, &dst_path).unwrap();
        let modified = fs::metadata(&src_path).unwrap().modified().unwrap();
        let mtime = FileTime::from_system_time(modified);
        filetime::set_file_times(&dst_path, mtime, mtime).unwrap();
    }

    pub fn file_move(&self, src: &str, dst: &str) {
        fs::rename(self.absolute(src), self.absolute(dst)).unwrap();
    }

    pub fn checksum_on_disk(&self, rel: &str) -> String {
        md5_of(&self.file_content(rel))
    }

    // -- database peeks ----------------------------------------------------

    pub fn db(&self) -> Database {
        Database::open_from_path(&self.path().join(ARCHIVE_DIR)).unwrap()
    }

    pub fn meta(&self, rel: &str) -> Meta {
        self.db().meta_get(rel).unwrap()
    }

    /// `(n_commits, n_stor, n_staging)`.
    pub fn db_sizes(&self) -> (usize, usize, usize) {
        self.db().get_table_sizes()
    }

    pub fn is_reverted(&self, rel: &str) -> bool {
        self.meta(rel).checksum == CHECKSUM_REVERTED
    }

    pub fn tree(&self) -> WorkTree {
        let mut tree = WorkTree::open(self.path()).unwrap();
        tree.ascend_until(ARCHIVE_DIR, None).unwrap();
        tree
    }

    // -- fixtures and comparisons -------------------------------------------

    /// The standard layout the original test suite seeds: a few root files
    /// (one of them deleted, one deleted and re-added) plus nested
    /// directories.
    pub fn seed_std_layout(&self) {
        for rel in ["FOO", "BAR", "REMOVED", "REMOVED_ADDED"] {
            self.file_make(rel);
        }
        for rel in ["dir1/dir2/FOO", "dir1/dir2/BAR", "sdir1/sdir2/FOO"] {
            self.file_make(rel);
        }
        assert_eq!(
            self.add(&[
                "FOO",
                "BAR",
                "REMOVED",
                "REMOVED_ADDED",
                "dir1",
                "sdir1"
            ]),
            0
        );
        assert_eq!(self.commit_msg("Initial commit"), 0);
        assert_eq!(self.rm(&["REMOVED", "REMOVED_ADDED"]), 0);
        assert_eq!(self.commit(), 0);
        self.file_make_at("REMOVED_ADDED", "recreated", DEFAULT_TIMESTAMP - 1);
        assert_eq!(self.add(&["REMOVED_ADDED"]), 0);
        assert_eq!(self.commit(), 0);
    }

    /// Assert both repositories hold the same files with the same content
    /// metadata and the same database tables.
    pub fn check_equal(&self, other: &TestRepo) {
        let files_local = self.tree().recursive_walk_files("").unwrap();
        let files_other = other.tree().recursive_walk_files("").unwrap();
        assert_eq!(files_local, files_other);

        for rel in &files_local {
            let mut meta_local = Meta::new(rel.clone());
            let mut meta_other = Meta::new(rel.clone());
            self.tree().meta_update(&mut meta_local).unwrap();
            other.tree().meta_update(&mut meta_other).unwrap();
            assert_eq!(meta_local.checksum, meta_other.checksum, "checksum of {rel}");
            assert_eq!(meta_local.modtime, meta_other.modtime, "modtime of {rel}");
        }

        let doc_local: serde_json::Value =
            serde_json::from_str(&self.db().json_dumps().unwrap()).unwrap();
        let doc_other: serde_json::Value =
            serde_json::from_str(&other.db().json_dumps().unwrap()).unwrap();
        for table in ["stor", "stag", "commit"] {
            assert_eq!(doc_local[table], doc_other[table], "table {table}");
        }
    }
}
