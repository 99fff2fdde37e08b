//! Working-copy integration tests
//!
//! End-to-end flows through the repository facade: init, staging, commits,
//! change detection, packing, and recovery from damaged bookkeeping files.

use foxnest_core::{ChangeKind, ContentHash, FoxError, Repository};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write_file(root: &Path, rel: &str, content: &str) {
    let full = root.join(rel);
    if let Some(parent) = full.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(full, content).unwrap();
}

#[test]
fn test_init_add_commit_first() {
    let temp = TempDir::new().unwrap();
    let repo = Repository::init(temp.path(), "alice", "demo").unwrap();

    write_file(temp.path(), "a.txt", "hello");
    let report = repo.add(&["a.txt"]).unwrap();
    assert_eq!(report.staged.len(), 1);
    assert_eq!(report.staged[0].path, "a.txt");

    let commit = repo.commit("first", None).unwrap();
    assert_eq!(repo.commit_log().len().unwrap(), 1);
    assert_eq!(repo.commit_log().head().unwrap(), Some(commit.id.clone()));
    assert_eq!(commit.author, "alice");

    let hash = ContentHash::from_hex("2cf24dba5fb0a30e").unwrap();
    assert_eq!(repo.store().get(hash).unwrap(), b"hello");
}

#[test]
fn test_commit_triggers_automatic_packing() {
    let temp = TempDir::new().unwrap();
    let repo = Repository::init(temp.path(), "alice", "demo").unwrap();

    for i in 0..25 {
        write_file(temp.path(), &format!("file{i}.txt"), &format!("content {i}"));
    }
    let report = repo.add_all().unwrap();
    assert_eq!(report.staged.len(), 25);
    let hashes: Vec<ContentHash> = report.staged.iter().map(|e| e.hash).collect();

    repo.commit("bulk import", None).unwrap();

    let packs_dir = temp.path().join(".fox").join("packs");
    let mut pack_files = 0;
    let mut idx_files = 0;
    for entry in fs::read_dir(&packs_dir).unwrap() {
        let path = entry.unwrap().path();
        match path.extension().and_then(|e| e.to_str()) {
            Some("pack") => pack_files += 1,
            Some("idx") => idx_files += 1,
            _ => {}
        }
    }
    assert_eq!(pack_files, 1);
    assert_eq!(idx_files, 1);

    let stats = repo.stats().unwrap();
    assert_eq!(stats.loose_objects, 0);
    assert_eq!(stats.packed_objects, 25);

    for (i, hash) in hashes.iter().enumerate() {
        let content = repo.store().get(*hash).unwrap();
        assert_eq!(content, format!("content {i}").as_bytes());
    }
}

#[test]
fn test_second_commit_links_parent() {
    let temp = TempDir::new().unwrap();
    let repo = Repository::init(temp.path(), "alice", "demo").unwrap();

    write_file(temp.path(), "a.txt", "one");
    repo.add(&["a.txt"]).unwrap();
    let first = repo.commit("first", None).unwrap();

    write_file(temp.path(), "a.txt", "two");
    repo.add(&["a.txt"]).unwrap();
    let second = repo.commit("second", None).unwrap();

    assert_eq!(second.parent.as_deref(), Some(first.id.as_str()));
    assert_eq!(repo.commit_log().head().unwrap(), Some(second.id.clone()));

    let history = repo.history(None).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, second.id);
    assert_eq!(history[1].id, first.id);
    assert_eq!(repo.history(Some(1)).unwrap().len(), 1);
}

#[test]
fn test_status_after_commit_is_clean() {
    let temp = TempDir::new().unwrap();
    let repo = Repository::init(temp.path(), "alice", "demo").unwrap();

    write_file(temp.path(), "a.txt", "hello");
    write_file(temp.path(), "docs/readme.md", "# readme");
    repo.add_all().unwrap();
    repo.commit("first", None).unwrap();

    let status = repo.status().unwrap();
    assert!(status.staged.is_empty());
    assert!(status.changes.is_empty());
    assert!(status.untracked.is_empty());
    assert!(status.head.is_some());
}

#[test]
fn test_status_sees_modification_and_deletion() {
    let temp = TempDir::new().unwrap();
    let repo = Repository::init(temp.path(), "alice", "demo").unwrap();

    write_file(temp.path(), "a.txt", "one");
    write_file(temp.path(), "b.txt", "two");
    repo.add_all().unwrap();
    repo.commit("first", None).unwrap();

    write_file(temp.path(), "a.txt", "changed");
    fs::remove_file(temp.path().join("b.txt")).unwrap();
    write_file(temp.path(), "c.txt", "new");

    let status = repo.status().unwrap();
    let modified: Vec<&str> = status
        .changes
        .iter()
        .filter(|c| c.kind == ChangeKind::Modified)
        .map(|c| c.path.as_str())
        .collect();
    let deleted: Vec<&str> = status
        .changes
        .iter()
        .filter(|c| c.kind == ChangeKind::Deleted)
        .map(|c| c.path.as_str())
        .collect();
    assert_eq!(modified, vec!["a.txt"]);
    assert_eq!(deleted, vec!["b.txt"]);
    assert_eq!(status.untracked, vec!["c.txt"]);
}

#[test]
fn test_manual_gc_packs_below_threshold() {
    let temp = TempDir::new().unwrap();
    let repo = Repository::init(temp.path(), "alice", "demo").unwrap();

    write_file(temp.path(), "a.txt", "one");
    write_file(temp.path(), "b.txt", "two");
    repo.add_all().unwrap();
    repo.commit("small", None).unwrap();

    // Two loose objects is under the automatic threshold.
    assert_eq!(repo.stats().unwrap().loose_objects, 2);

    let summary = repo.gc().unwrap().unwrap();
    assert_eq!(summary.object_count, 2);
    assert_eq!(repo.stats().unwrap().loose_objects, 0);
    assert!(repo.gc().unwrap().is_none());

    let hash = ContentHash::from_data(b"one");
    assert_eq!(repo.store().get(hash).unwrap(), b"one");
}

#[test]
fn test_reopen_preserves_history_and_head() {
    let temp = TempDir::new().unwrap();
    let first_id;
    {
        let repo = Repository::init(temp.path(), "alice", "demo").unwrap();
        write_file(temp.path(), "a.txt", "hello");
        repo.add(&["a.txt"]).unwrap();
        first_id = repo.commit("first", None).unwrap().id;
    }

    let repo = Repository::open(temp.path()).unwrap();
    assert_eq!(repo.commit_log().head().unwrap(), Some(first_id.clone()));
    let history = repo.history(None).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, first_id);

    let config = repo.config().unwrap();
    assert_eq!(config.username, "alice");
    assert_eq!(config.repo_name, "demo");
}

#[test]
fn test_open_outside_repository_fails() {
    let temp = TempDir::new().unwrap();
    match Repository::open(temp.path()) {
        Err(FoxError::NotARepository(_)) => {}
        other => panic!("expected NotARepository, got {other:?}"),
    }
}

#[test]
fn test_corrupt_commit_log_degrades_to_empty() {
    let temp = TempDir::new().unwrap();
    let repo = Repository::init(temp.path(), "alice", "demo").unwrap();

    write_file(temp.path(), "a.txt", "hello");
    repo.add(&["a.txt"]).unwrap();
    repo.commit("first", None).unwrap();

    fs::write(temp.path().join(".fox").join("commits.json"), "{not json").unwrap();

    let repo = Repository::open(temp.path()).unwrap();
    assert!(repo.history(None).unwrap().is_empty());
}

#[test]
fn test_corrupt_index_treats_files_as_untracked() {
    let temp = TempDir::new().unwrap();
    let repo = Repository::init(temp.path(), "alice", "demo").unwrap();

    write_file(temp.path(), "a.txt", "hello");
    repo.add(&["a.txt"]).unwrap();
    repo.commit("first", None).unwrap();

    fs::write(temp.path().join(".fox").join("index.json"), "{not json").unwrap();

    let status = repo.status().unwrap();
    assert!(status.changes.is_empty());
    assert_eq!(status.untracked, vec!["a.txt"]);
}

#[test]
fn test_missing_index_bootstraps_from_last_commit() {
    let temp = TempDir::new().unwrap();
    let repo = Repository::init(temp.path(), "alice", "demo").unwrap();

    write_file(temp.path(), "a.txt", "hello");
    repo.add(&["a.txt"]).unwrap();
    repo.commit("first", None).unwrap();

    fs::remove_file(temp.path().join(".fox").join("index.json")).unwrap();

    let status = repo.status().unwrap();
    assert!(status.changes.is_empty());
    assert!(status.untracked.is_empty());
    assert!(temp.path().join(".fox").join("index.json").exists());
}

#[test]
fn test_ignored_directories_stay_invisible() {
    let temp = TempDir::new().unwrap();
    let repo = Repository::init(temp.path(), "alice", "demo").unwrap();

    write_file(temp.path(), "src/main.txt", "code");
    write_file(temp.path(), "node_modules/pkg/index.js", "js");
    write_file(temp.path(), "__pycache__/mod.pyc", "pyc");
    write_file(temp.path(), ".hidden/secret.txt", "s");

    let report = repo.add_all().unwrap();
    let staged: Vec<&str> = report.staged.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(staged, vec!["src/main.txt"]);

    repo.commit("only src", None).unwrap();
    let status = repo.status().unwrap();
    assert!(status.untracked.is_empty());
}

#[test]
fn test_empty_commit_rejected() {
    let temp = TempDir::new().unwrap();
    let repo = Repository::init(temp.path(), "alice", "demo").unwrap();

    match repo.commit("nothing", None) {
        Err(FoxError::EmptyCommit) => {}
        other => panic!("expected EmptyCommit, got {other:?}"),
    }
    assert!(repo.commit_log().head().unwrap().is_none());
}
