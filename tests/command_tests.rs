//! Integration tests for the staging, commit and query commands, driven
//! through the command dispatcher against temp-dir repositories.

mod common;

use assert_fs::TempDir;
use coffer::cli::Commands;
use coffer::database::{CHECKSUM_REMOVED, CommitSort};
use common::{DEFAULT_TIMESTAMP, TestRepo, md5_of, try_run_in};
use filetime::FileTime;

fn verify_one(repo: &TestRepo, files: &[&str]) -> coffer::error::Result<i32> {
    repo.try_run(Commands::Verify {
        filenames: files.iter().map(|f| f.to_string()).collect(),
    })
}

fn log_cmd(repo: &TestRepo, files: &[&str], count: usize) -> coffer::error::Result<i32> {
    repo.try_run(Commands::Log {
        filenames: files.iter().map(|f| f.to_string()).collect(),
        count,
    })
}

// -- commit ---------------------------------------------------------------

#[test]
fn test_basic_commit() {
    let repo = TestRepo::new("testrepo");
    repo.file_make_at("FOO", "foo data", 1_048_735);
    repo.file_make_at("BAR", "bar data", 1_048_735);

    assert_eq!(repo.add(&["FOO", "BAR"]), 0);
    assert_eq!(repo.db_sizes(), (0, 0, 2));
    assert_eq!(repo.commit_msg("init"), 0);

    // Staging is empty after a successful commit.
    assert_eq!(repo.db_sizes(), (1, 2, 0));

    let db = repo.db();
    let commits = db.commit_list(Some(CommitSort::Timestamp), None, None);
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].message, "init");
    assert_eq!(
        commits[0].affected,
        vec![
            ("BAR".to_string(), "add".to_string(), None),
            ("FOO".to_string(), "add".to_string(), None),
        ]
    );

    let meta = repo.meta("FOO");
    assert_eq!(meta.checksum, md5_of(b"foo data"));
    assert_eq!(meta.modtime, 1_048_735);
    assert_eq!(meta.last_commits, vec![commits[0].uid.clone()]);
}

#[test]
fn test_commit_without_changes_records_nothing() {
    let repo = TestRepo::new("testrepo");
    repo.seed_std_layout();
    let sizes = repo.db_sizes();
    assert_eq!(repo.commit(), 0);
    assert_eq!(repo.db_sizes(), sizes);
}

#[test]
fn test_commit_of_unmodified_staged_file_is_dropped() {
    let repo = TestRepo::new("testrepo");
    repo.seed_std_layout();
    let sizes = repo.db_sizes();
    // FOO is tracked and unchanged; staging it again commits nothing.
    assert_eq!(repo.add(&["FOO"]), 0);
    assert_eq!(repo.commit(), 0);
    assert_eq!(repo.db_sizes(), sizes);
}

#[test]
fn test_commit_auto() {
    let repo = TestRepo::new("testrepo");
    repo.seed_std_layout();

    repo.file_move("FOO", "FOO_MOVED");
    assert_eq!(repo.add(&["FOO_MOVED"]), 0);
    repo.file_make_at("BAR", "changed", 1 << 21);

    assert_eq!(repo.commit_auto(), 0);
    assert_eq!(repo.status(), 0);
    assert_eq!(repo.meta("FOO").checksum, CHECKSUM_REMOVED);
    assert_eq!(repo.meta("BAR").checksum, md5_of(b"changed"));
    assert!(repo.meta("FOO_MOVED").checksum_normal());
}

#[test]
fn test_commit_modification_is_recorded_as_mod() {
    let repo = TestRepo::new("testrepo");
    repo.seed_std_layout();
    repo.file_make_at("FOO", "fresh content", 1 << 21);
    assert_eq!(repo.add(&["FOO"]), 0);
    assert_eq!(repo.commit(), 0);

    let db = repo.db();
    let commits = db.commit_list(Some(CommitSort::Timestamp), None, None);
    let last = commits.last().unwrap();
    assert_eq!(
        last.affected,
        vec![("FOO".to_string(), "mod".to_string(), None)]
    );
}

#[test]
fn test_commit_readd_of_tombstone_stays_add() {
    let repo = TestRepo::new("testrepo");
    repo.seed_std_layout();
    // REMOVED_ADDED was deleted and re-added by the seed; its last commit
    // must record an "add" again.
    let meta = repo.meta("REMOVED_ADDED");
    let db = repo.db();
    let last = db.commit_get(meta.last_commits.last().unwrap()).unwrap();
    assert_eq!(
        last.affected,
        vec![("REMOVED_ADDED".to_string(), "add".to_string(), None)]
    );
    assert_eq!(meta.last_commits.len(), 3);
}

#[test]
fn test_commit_from_subdirectory() {
    let repo = TestRepo::new("testrepo");
    repo.seed_std_layout();
    let sizes = repo.db_sizes();

    // Everything below dir1/dir2 is committed and unchanged.
    assert_eq!(
        repo.run_in(
            "dir1/dir2",
            Commands::Add {
                filenames: vec![".".to_string()]
            }
        )
        .unwrap(),
        0
    );
    assert_eq!(
        repo.run_in(
            "dir1/dir2",
            Commands::Commit {
                msg: String::new(),
                auto: false
            }
        )
        .unwrap(),
        0
    );
    assert_eq!(repo.db_sizes(), sizes);

    repo.file_make("dir1/dir2/NEW_BAR1");
    repo.file_make("dir1/dir2/NEW_FOO1");
    assert_eq!(
        repo.run_in(
            "dir1/dir2",
            Commands::Add {
                filenames: vec![".".to_string()]
            }
        )
        .unwrap(),
        0
    );
    assert_eq!(repo.commit(), 0);
    assert_eq!(repo.db_sizes(), (sizes.0 + 1, sizes.1 + 2, 0));
}

#[test]
fn test_commit_of_staged_file_missing_from_disk_is_fatal() {
    let repo = TestRepo::new("testrepo");
    repo.file_make("FOO");
    assert_eq!(repo.add(&["FOO"]), 0);
    repo.file_del("FOO");
    let err = repo
        .try_run(Commands::Commit {
            msg: String::new(),
            auto: false,
        })
        .unwrap_err();
    assert!(err.is_not_found());
}

// -- add ------------------------------------------------------------------

#[test]
fn test_add_nonexistent_is_fatal() {
    let repo = TestRepo::new("testrepo");
    repo.seed_std_layout();
    assert!(
        repo.try_run(Commands::Add {
            filenames: vec!["NONEXT".to_string()]
        })
        .is_err()
    );
}

#[test]
fn test_add_with_pending_operation_reports_trouble() {
    let repo = TestRepo::new("testrepo");
    repo.seed_std_layout();
    assert_eq!(repo.rm(&["FOO"]), 0);
    repo.file_make_at("FOO", "recreated", 1 << 21);
    assert_eq!(repo.add(&["FOO"]), 1);
    // Staging still holds only the delete.
    let db = repo.db();
    assert_eq!(db.staging_get("FOO").unwrap().kind.as_str(), "del");
}

#[test]
fn test_add_of_revert_marked_file_reports_trouble() {
    let repo = TestRepo::new("testrepo");
    repo.seed_std_layout();
    repo.file_make_at("FOO", "modified", 1 << 21);
    assert_eq!(repo.revert(&["FOO"]), 0);
    assert!(repo.is_reverted("FOO"));
    assert_eq!(repo.add(&["FOO"]), 1);
}

#[test]
fn test_add_directory_expands_to_files() {
    let repo = TestRepo::new("testrepo");
    repo.file_make("dirx/A");
    repo.file_make("dirx/sub/B");
    assert_eq!(repo.add(&["dirx"]), 0);
    assert_eq!(repo.db_sizes(), (0, 0, 2));
}

// -- rm -------------------------------------------------------------------

#[test]
fn test_rm_file_parks_in_trash() {
    let repo = TestRepo::new("testrepo");
    repo.seed_std_layout();
    assert_eq!(repo.rm(&["FOO"]), 0);
    assert!(!repo.file_exists("FOO"));
    assert_eq!(repo.db_sizes().2, 1);

    assert_eq!(repo.commit(), 0);
    assert_eq!(repo.meta("FOO").checksum, CHECKSUM_REMOVED);
    assert_eq!(repo.verify(), 0);
}

#[test]
fn test_rm_file_already_deleted_from_disk() {
    let repo = TestRepo::new("testrepo");
    repo.seed_std_layout();
    repo.file_del("FOO");
    repo.file_del("BAR");
    assert_eq!(repo.rm(&["FOO", "BAR"]), 0);
    assert_eq!(repo.db_sizes().2, 2);
    assert_eq!(repo.commit(), 0);
    assert_eq!(repo.status(), 0);
}

#[test]
fn test_rm_directory_prunes_empty_dirs() {
    let repo = TestRepo::new("testrepo");
    repo.seed_std_layout();
    assert_eq!(repo.rm(&["dir1"]), 0);
    assert!(!repo.file_exists("dir1/dir2/FOO"));
    assert!(!repo.path().join("dir1").exists());
    assert_eq!(repo.db_sizes().2, 2);
    assert_eq!(repo.commit(), 0);
}

#[test]
fn test_rm_directory_keeps_untracked_files() {
    let repo = TestRepo::new("testrepo");
    repo.seed_std_layout();
    repo.file_make("dir1/dir2/EXTRA_FILE");

    assert_eq!(repo.rm(&["dir1"]), 0);
    assert!(repo.path().join("dir1").exists());
    assert!(!repo.file_exists("dir1/dir2/FOO"));
    assert!(repo.file_exists("dir1/dir2/EXTRA_FILE"));
    assert_eq!(repo.db_sizes().2, 2);
}

#[test]
fn test_rm_nonexistent_and_tombstoned_are_fatal() {
    let repo = TestRepo::new("testrepo");
    repo.seed_std_layout();
    assert!(
        repo.try_run(Commands::Rm {
            filenames: vec!["NONEXT".to_string()]
        })
        .unwrap_err()
        .is_not_found()
    );
    // A tombstoned exact match falls through to the (empty) prefix scan.
    assert!(
        repo.try_run(Commands::Rm {
            filenames: vec!["REMOVED".to_string()]
        })
        .unwrap_err()
        .is_not_found()
    );
    assert_eq!(repo.db_sizes().2, 0);
}

#[test]
fn test_rm_with_pending_add_reports_trouble() {
    let repo = TestRepo::new("testrepo");
    repo.seed_std_layout();
    repo.file_make("dir1/EXTRA_FILE");
    assert_eq!(repo.add(&["dir1"]), 0);
    assert_eq!(repo.rm(&["dir1"]), 1);
}

// -- revert ---------------------------------------------------------------

#[test]
fn test_revert_without_anything_staged() {
    let repo = TestRepo::new("testrepo");
    repo.seed_std_layout();
    assert_eq!(repo.revert(&[]), 0);
}

#[test]
fn test_revert_toggles_marker() {
    let repo = TestRepo::new("testrepo");
    repo.seed_std_layout();
    repo.file_make_at("FOO", "locally modified", 1 << 10);

    assert_eq!(repo.revert(&["FOO"]), 0);
    assert!(repo.is_reverted("FOO"));
    // A second revert clears the marker again.
    assert_eq!(repo.revert(&["FOO"]), 0);
    assert!(!repo.is_reverted("FOO"));
    assert_eq!(repo.status(), 1);

    assert_eq!(repo.add(&["FOO"]), 0);
    assert_eq!(repo.commit(), 0);
    assert_eq!(repo.verify(), 0);
    assert_eq!(repo.status(), 0);
}

#[test]
fn test_revert_staged_add_of_new_file() {
    let repo = TestRepo::new("testrepo");
    repo.seed_std_layout();
    repo.file_make("NEW_FOO");
    assert_eq!(repo.add(&["NEW_FOO"]), 0);
    assert_eq!(repo.revert(&[]), 0);
    assert_eq!(repo.db_sizes().2, 0);

    // Reverting an unmodified tracked file is a no-op.
    assert_eq!(repo.revert(&["FOO"]), 0);
    assert!(!repo.is_reverted("FOO"));
}

#[test]
fn test_revert_restores_staged_deletes_from_trash() {
    let repo = TestRepo::new("testrepo");
    repo.seed_std_layout();
    assert_eq!(repo.rm(&["dir1"]), 0);
    assert!(!repo.file_exists("dir1/dir2/FOO"));

    assert_eq!(repo.revert(&[]), 0);
    assert!(repo.file_exists("dir1/dir2/FOO"));
    assert!(repo.file_exists("dir1/dir2/BAR"));
    assert_eq!(repo.verify(), 0);
}

#[test]
fn test_revert_with_names_restores_selected_only() {
    let repo = TestRepo::new("testrepo");
    repo.seed_std_layout();
    assert_eq!(repo.rm(&["dir1"]), 0);
    assert_eq!(repo.rm(&["FOO", "BAR"]), 0);
    assert!(!repo.file_exists("dir1/dir2/FOO"));
    assert!(!repo.file_exists("FOO"));
    assert!(!repo.file_exists("BAR"));

    assert_eq!(repo.revert(&["dir1", "FOO"]), 0);
    assert!(repo.file_exists("dir1/dir2/FOO"));
    assert!(repo.file_exists("FOO"));
    assert!(!repo.file_exists("BAR"));
    assert!(!repo.is_reverted("FOO"));
}

#[test]
fn test_revert_of_physically_removed_staged_delete_sets_marker() {
    let repo = TestRepo::new("testrepo");
    repo.seed_std_layout();
    repo.file_del("FOO");
    assert_eq!(repo.rm(&["FOO"]), 0);
    assert_eq!(repo.revert(&[]), 0);
    assert!(!repo.file_exists("FOO"));
    assert!(repo.is_reverted("FOO"));
}

#[test]
fn test_revert_staged_add_of_modified_file_sets_marker() {
    let repo = TestRepo::new("testrepo");
    repo.seed_std_layout();
    repo.file_make_at("FOO", "locally modified", 1 << 10);
    assert_eq!(repo.add(&["FOO"]), 0);
    assert_eq!(repo.revert(&[]), 0);
    assert!(repo.is_reverted("FOO"));
}

#[test]
fn test_revert_unstaged_modified_and_missing_files() {
    let repo = TestRepo::new("testrepo");
    repo.seed_std_layout();
    repo.file_make_at("FOO", "locally modified", 1 << 10);
    repo.file_del("BAR");
    assert_eq!(repo.revert(&["FOO", "BAR"]), 0);
    assert!(repo.is_reverted("FOO"));
    assert!(repo.is_reverted("BAR"));
}

#[test]
fn test_revert_then_auto_commit() {
    let repo = TestRepo::new("testrepo");
    repo.seed_std_layout();
    repo.file_make_at("FOO", "modified", 1 << 10);
    assert_eq!(repo.revert(&["FOO"]), 0);
    assert_eq!(repo.revert(&["FOO"]), 0);
    assert_eq!(repo.status(), 1);
    assert_eq!(repo.commit_auto(), 0);
    assert_eq!(repo.verify(), 0);
    assert_eq!(repo.status(), 0);
}

// -- status ---------------------------------------------------------------

#[test]
fn test_status_clean() {
    let repo = TestRepo::new("testrepo");
    repo.seed_std_layout();
    assert_eq!(repo.status(), 0);
}

#[test]
fn test_status_from_subdirectory() {
    let repo = TestRepo::new("testrepo");
    repo.seed_std_layout();
    assert_eq!(repo.run_in("dir1/dir2", Commands::Status).unwrap(), 0);
}

#[test]
fn test_status_detects_problems() {
    let repo = TestRepo::new("testrepo");
    repo.seed_std_layout();

    // Modified file.
    repo.file_make_at("FOO", "modified", 1 << 10);
    assert_eq!(repo.status(), 1);
    assert_eq!(repo.revert(&["FOO"]), 0);
    // Revert marker still lists the file.
    assert_eq!(repo.status(), 1);
}

#[test]
fn test_status_untracked_then_staged() {
    let repo = TestRepo::new("testrepo");
    repo.seed_std_layout();
    repo.file_make("NEW_FOO");
    assert_eq!(repo.status(), 1);
    assert_eq!(repo.add(&["NEW_FOO"]), 0);
    assert_eq!(repo.rm(&["FOO"]), 0);
    assert_eq!(repo.status(), 0);
    assert_eq!(repo.commit(), 0);
    assert_eq!(repo.status(), 0);
}

#[test]
fn test_status_recreated_tombstone_is_untracked() {
    let repo = TestRepo::new("testrepo");
    repo.seed_std_layout();
    repo.file_make("REMOVED");
    assert_eq!(repo.status(), 1);
}

#[test]
fn test_status_deleted_tracked_file() {
    let repo = TestRepo::new("testrepo");
    repo.seed_std_layout();
    repo.file_del("FOO");
    assert_eq!(repo.status(), 1);
}

// -- verify ---------------------------------------------------------------

#[test]
fn test_verify_detects_content_change() {
    let repo = TestRepo::new("testrepo");
    repo.seed_std_layout();
    assert_eq!(repo.verify(), 0);

    repo.file_make_at("FOO", "MODIFIED", 1 << 30);
    assert_eq!(repo.verify(), 1);

    // Committing without staging does nothing about it.
    assert_eq!(repo.commit(), 0);
    assert_eq!(repo.verify(), 1);

    assert_eq!(repo.add(&["FOO"]), 0);
    assert_eq!(repo.commit(), 0);
    assert_eq!(repo.verify(), 0);
}

#[test]
fn test_verify_detects_modtime_drift() {
    let repo = TestRepo::new("testrepo");
    repo.seed_std_layout();
    // Same content, different mtime.
    let mtime = FileTime::from_unix_time(DEFAULT_TIMESTAMP + 7, 0);
    filetime::set_file_times(repo.path().join("FOO"), mtime, mtime).unwrap();
    assert_eq!(repo.verify(), 1);
}

#[test]
fn test_verify_selected_files() {
    let repo = TestRepo::new("testrepo");
    repo.seed_std_layout();
    assert_eq!(verify_one(&repo, &["FOO"]).unwrap(), 0);
    assert_eq!(verify_one(&repo, &["FOO", "BAR"]).unwrap(), 0);
    assert_eq!(verify_one(&repo, &["dir1"]).unwrap(), 0);
}

#[test]
fn test_verify_unknown_path_is_fatal() {
    let repo = TestRepo::new("testrepo");
    repo.seed_std_layout();
    assert!(verify_one(&repo, &["XXX"]).is_err());
    // Untracked existing files are unknown to the database too.
    repo.file_make("XXX");
    assert!(verify_one(&repo, &["XXX"]).is_err());
}

#[test]
fn test_verify_missing_file() {
    let repo = TestRepo::new("testrepo");
    repo.seed_std_layout();
    repo.file_del("BAR");
    assert_eq!(repo.verify(), 1);
}

// -- log ------------------------------------------------------------------

#[test]
fn test_log_variants_run_clean() {
    let repo = TestRepo::new("testrepo");
    repo.seed_std_layout();
    assert_eq!(log_cmd(&repo, &[], 16).unwrap(), 0);
    assert_eq!(log_cmd(&repo, &["dir1"], 16).unwrap(), 0);
    // Unknown and tombstoned files are skipped quietly.
    assert_eq!(log_cmd(&repo, &["XXX"], 16).unwrap(), 0);
    assert_eq!(log_cmd(&repo, &["REMOVED"], 16).unwrap(), 0);
}

#[test]
fn test_log_count_limits_output() {
    let repo = TestRepo::new("testrepo");
    repo.seed_std_layout();
    for loop_n in 0..8 {
        repo.file_make_at("FOO", &format!("MODIFIED {loop_n:08}"), 100_000 + loop_n * 1000);
        assert_eq!(repo.add(&["FOO"]), 0);
        assert_eq!(repo.commit(), 0);
    }
    let db = repo.db();
    assert_eq!(repo.meta("FOO").last_commits.len(), 9);
    assert_eq!(
        db.commit_list(Some(CommitSort::Timestamp), Some(3), None).len(),
        3
    );
    assert_eq!(log_cmd(&repo, &["FOO"], 3).unwrap(), 0);
}

// -- find_dups ------------------------------------------------------------

#[test]
fn test_find_dups() {
    let repo = TestRepo::new("testrepo");
    repo.seed_std_layout();
    assert_eq!(repo.run(Commands::FindDups), 0);

    for loop_n in 0..4 {
        repo.file_copy("FOO", &format!("FOO_{loop_n:03}"));
    }
    assert_eq!(
        repo.add(&["FOO_000", "FOO_001", "FOO_002", "FOO_003"]),
        0
    );
    assert_eq!(repo.commit(), 0);
    assert_eq!(repo.run(Commands::FindDups), 1);
}

// -- add_from -------------------------------------------------------------

fn date_prefix(timestamp: i64) -> String {
    chrono::DateTime::from_timestamp(timestamp, 0)
        .unwrap()
        .format("%Y-%m")
        .to_string()
}

fn external_dir() -> TempDir {
    TempDir::new().unwrap()
}

fn ext_file_make(dir: &TempDir, rel: &str, content: &str, timestamp: i64) {
    let path: std::path::PathBuf = dir.path().join(rel.split('/').collect::<std::path::PathBuf>());
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, content).unwrap();
    let mtime = FileTime::from_unix_time(timestamp, 0);
    filetime::set_file_times(&path, mtime, mtime).unwrap();
}

fn add_from(repo: &TestRepo, dir: &TempDir) -> coffer::error::Result<i32> {
    repo.try_run(Commands::AddFrom {
        filename: dir.path().to_str().unwrap().to_string(),
    })
}

#[test]
fn test_add_from_buckets_by_date() {
    let repo = TestRepo::new("testrepo");
    repo.seed_std_layout();

    let early = 1 << 20;
    let late = (1 << 20) + 60 * 60 * 24 * 60;
    let ext = external_dir();
    ext_file_make(&ext, "FILE1", "one", early);
    ext_file_make(&ext, "FILE2", "two", early);
    ext_file_make(&ext, "sub/FILE3", "three", late);

    assert_eq!(add_from(&repo, &ext).unwrap(), 0);
    assert_eq!(repo.commit(), 0);

    assert!(repo.file_exists(&format!("{}/FILE1", date_prefix(early))));
    assert!(repo.file_exists(&format!("{}/FILE2", date_prefix(early))));
    assert!(repo.file_exists(&format!("{}/FILE3", date_prefix(late))));
    assert_eq!(repo.verify(), 0);
    // Imported files keep their source modification time.
    assert_eq!(
        repo.meta(&format!("{}/FILE1", date_prefix(early))).modtime,
        early
    );
}

#[test]
fn test_add_from_subdirectory_buckets_below_cwd() {
    let repo = TestRepo::new("testrepo");
    repo.seed_std_layout();

    let early = 1 << 20;
    let ext = external_dir();
    ext_file_make(&ext, "FILE1", "one", early);

    assert_eq!(
        try_run_in(
            &repo.path().join("dir1"),
            Commands::AddFrom {
                filename: ext.path().to_str().unwrap().to_string(),
            }
        )
        .unwrap(),
        0
    );
    assert!(repo.file_exists(&format!("dir1/{}/FILE1", date_prefix(early))));
}

#[test]
fn test_add_from_name_clash_appends_suffix() {
    let repo = TestRepo::new("testrepo");
    repo.seed_std_layout();

    let ts = 1 << 20;
    let ext = external_dir();
    ext_file_make(&ext, "dir0/FOO", "variant zero", ts);
    ext_file_make(&ext, "dir1/FOO", "variant one", ts);
    ext_file_make(&ext, "dir2/FOO", "variant two", ts);

    assert_eq!(add_from(&repo, &ext).unwrap(), 0);
    let prefix = date_prefix(ts);
    assert!(repo.file_exists(&format!("{prefix}/FOO")));
    assert!(repo.file_exists(&format!("{prefix}/FOO-000")));
    assert!(repo.file_exists(&format!("{prefix}/FOO-001")));
}

#[test]
fn test_add_from_identical_target_skips_and_consumes_source() {
    let repo = TestRepo::new("testrepo");
    repo.seed_std_layout();

    let ts = 1 << 20;
    let ext = external_dir();
    ext_file_make(&ext, "a/FOO", "same bytes", ts);
    ext_file_make(&ext, "b/FOO", "same bytes", ts);

    assert_eq!(add_from(&repo, &ext).unwrap(), 0);
    let prefix = date_prefix(ts);
    assert!(repo.file_exists(&format!("{prefix}/FOO")));
    assert!(!repo.file_exists(&format!("{prefix}/FOO-000")));
    // The duplicate source was deleted on skip; the imported one stays.
    assert!(ext.path().join("a/FOO").exists());
    assert!(!ext.path().join("b/FOO").exists());
}
