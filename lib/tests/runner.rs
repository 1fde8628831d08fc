//! Integration tests for the six concrete scenarios named for this engine:
//! empty-repo-to-commit, ignore rules, reset, checkout-refuses-to-clobber,
//! three-way merge, and wrong-passphrase decryption.

use std::collections::BTreeMap;

use repo_engine::backend::ObjectStore;
use repo_engine::crypt::{CryptError, EncVersion};
use repo_engine::index::{CacheEntry, EntryMode, Stat};
use repo_engine::repository::Repository;
use repo_engine::testutils::TestRepo;
use repo_engine::unpack::{self, TreeSideEntry, UnpackFlags};

fn stat() -> Stat {
    Stat {
        ctime_sec: 0,
        ctime_nsec: 0,
        mtime_sec: 0,
        mtime_nsec: 0,
        dev: 0,
        ino: 0,
        uid: 0,
        gid: 0,
        size: 0,
    }
}

#[test]
fn empty_repo_one_file_commit() {
    let repo = TestRepo::new();
    assert!(repo.head_commit().is_none());

    repo.write("hello.txt", b"hello, world");
    let index = repo.scan();
    assert_eq!(index.entries().len(), 1);
    assert_eq!(index.entries()[0].name, "hello.txt");

    let commit_id = repo.commit(&index, "");
    let commit = repo.objects.read_commit(&commit_id).unwrap();
    assert!(commit.parent.is_none());
    assert!(commit.description.contains("Added"));
    assert_eq!(repo.head_commit(), Some(commit_id));
}

#[test]
fn ignore_rules_skip_known_junk_files() {
    let repo = TestRepo::new();
    repo.write("real.txt", b"kept");
    repo.write(".DS_Store", b"junk");
    repo.write("Thumbs.db", b"junk");

    let index = repo.scan();
    let names: Vec<&str> = index.entries().iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["real.txt"]);
}

#[test]
fn reset_discards_local_changes() {
    let repo = TestRepo::new();
    repo.write("a.txt", b"original");
    let index = repo.scan();
    repo.commit(&index, "");

    repo.write("a.txt", b"modified locally");
    let index = repo.scan();

    let reset_index = repo.reset_to_head(
        &index,
        &repo.worktree,
        UnpackFlags {
            reset: true,
            ..Default::default()
        },
    );

    assert_eq!(
        std::fs::read(repo.worktree.join("a.txt")).unwrap(),
        b"original"
    );
    assert_eq!(reset_index.get("a.txt").unwrap().name, "a.txt");
}

#[test]
fn checkout_refuses_to_clobber_local_modifications() {
    let repo = TestRepo::new();
    repo.write("a.txt", b"original");
    let index = repo.scan();
    repo.commit(&index, "");

    repo.write("a.txt", b"modified locally");
    let index = repo.scan();

    let trees = vec![repo.head_tree_side()];
    let result = unpack::unpack(
        &index,
        &trees,
        &|_| true,
        UnpackFlags::default(),
        &unpack::NoLocking,
    );
    assert!(result.is_err());
}

#[test]
fn threeway_merge_picks_non_conflicting_side() {
    let repo = TestRepo::new();

    let mut base = repo_engine::index::Index::default();
    base.add(CacheEntry::new(
        "a.txt".to_string(),
        EntryMode::Regular,
        [1; 20],
        stat(),
    ));
    let base_tree = repo_engine::testutils::tree_for_index(&base, &repo.objects);

    let mut ours = base.clone();
    // ours is untouched relative to base.
    let ours_tree = repo_engine::testutils::tree_for_index(&ours, &repo.objects);
    let _ = &mut ours;

    let mut theirs = base.clone();
    theirs.add(CacheEntry::new(
        "a.txt".to_string(),
        EntryMode::Regular,
        [9; 20],
        stat(),
    ));
    let theirs_tree = repo_engine::testutils::tree_for_index(&theirs, &repo.objects);

    let side = |tree_id: &repo_engine::object_id::TreeId| -> BTreeMap<String, TreeSideEntry> {
        let tree = repo_engine::backend::ObjectStore::read_tree(&repo.objects, tree_id).unwrap();
        tree.entries
            .iter()
            .map(|e| {
                let mut oid = [0u8; 20];
                oid.copy_from_slice(&e.id);
                (e.name.clone(), TreeSideEntry { mode: EntryMode::Regular, oid })
            })
            .collect()
    };

    let trees = vec![side(&base_tree), side(&ours_tree), side(&theirs_tree)];
    let result = unpack::unpack(
        &base,
        &trees,
        &|_| false,
        UnpackFlags::default(),
        &unpack::NoLocking,
    )
    .unwrap();

    assert!(result.conflicts.is_empty());
    assert_eq!(result.index.get("a.txt").unwrap().oid, [9; 20]);
}

#[test]
fn encrypted_repo_wrong_passphrase_is_rejected() {
    let mut repo = Repository::new("enc-repo", "Encrypted Repo");
    repo.generate_magic("correct horse battery staple", EncVersion::V1)
        .unwrap();

    let result = repo.verify_passphrase("wrong passphrase");
    assert!(matches!(result, Err(CryptError::WrongPassphrase)));

    assert!(repo.verify_passphrase("correct horse battery staple").is_ok());
}
