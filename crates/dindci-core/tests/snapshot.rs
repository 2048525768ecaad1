//! Working-tree snapshot behaviour against real repositories.

mod common;

use common::*;
use dindci_core::snapshot::{self, SNAPSHOT_REF};

#[test]
fn clean_tree_snapshots_to_head() {
    let root = tempfile::tempdir().unwrap();
    let repo = source_repo(root.path());

    let snap = snapshot::capture(&repo, 1).unwrap();
    assert_eq!(snap.commit, git(&repo, &["rev-parse", "HEAD"]));
    assert_eq!(snap.tree_hash, git(&repo, &["rev-parse", "HEAD^{tree}"]));
    assert!(snap.temp_ref.is_none());
}

#[test]
fn uncommitted_work_gets_a_temporary_commit() {
    let root = tempfile::tempdir().unwrap();
    let repo = source_repo(root.path());
    let head = git(&repo, &["rev-parse", "HEAD"]);
    std::fs::write(repo.join("x.py"), "x = 2\n").unwrap();
    std::fs::write(repo.join("new.py"), "print('new')\n").unwrap();
    let status_before = git(&repo, &["status", "--porcelain"]);

    let snap = snapshot::capture(&repo, 1_700_000_000_000).unwrap();
    assert_ne!(snap.commit, head);
    assert_eq!(git(&repo, &["rev-parse", &format!("{}^", snap.commit)]), head);
    assert_eq!(git(&repo, &["rev-parse", SNAPSHOT_REF]), snap.commit);
    assert_eq!(
        git(&repo, &["show", &format!("{}:new.py", snap.commit)]),
        "print('new')"
    );
    // The real index and working tree are untouched.
    assert_eq!(git(&repo, &["status", "--porcelain"]), status_before);

    drop(snap);
    let refs = git(&repo, &["for-each-ref", "--format=%(refname)"]);
    assert!(!refs.contains(SNAPSHOT_REF));
}

#[test]
fn ephemeral_hash_matches_stored_hash() {
    let root = tempfile::tempdir().unwrap();
    let repo = source_repo(root.path());
    std::fs::write(repo.join("x.py"), "x = 3\n").unwrap();

    let ephemeral = snapshot::working_tree_hash(&repo, true).unwrap();
    let stored = snapshot::working_tree_hash(&repo, false).unwrap();
    assert_eq!(ephemeral, stored);
    assert_ne!(stored, git(&repo, &["rev-parse", "HEAD^{tree}"]));
}
