//! Test fixtures shared between this crate's unit tests and the
//! integration tests under `tests/`. Grounded in the teacher's own
//! `testutils.rs` `TestRepo` fixture: one struct that wires up a fresh,
//! temp-dir-backed store plus worktree so a test can call straight into the
//! engine modules without repeating the plumbing.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::backend::{BranchStore, ObjectStore};
use crate::cache_tree::{build_cache_tree, TreeSink};
use crate::commit_builder::{self, CommitOptions};
use crate::diff;
use crate::index::Index;
use crate::local_store::{LocalBranchStore, LocalFileStore, LocalObjectStore};
use crate::object_id::{CommitId, ObjectId, TreeId};
use crate::repo_path::RepoPath;
use crate::unpack::{self, TreeSideEntry, UnpackFlags};

pub const REPO_ID: &str = "test-repo";

/// A fresh, local-disk-backed repository with a writable worktree directory,
/// ready for a test to scan, commit, and check out against.
pub struct TestRepo {
    _dir: TempDir,
    pub worktree: PathBuf,
    pub objects: LocalObjectStore,
    pub branches: LocalBranchStore,
    pub files: LocalFileStore,
}

impl TestRepo {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let worktree = dir.path().join("worktree");
        std::fs::create_dir_all(&worktree).unwrap();
        let objects = LocalObjectStore::init(dir.path().join("objects")).unwrap();
        let branches = LocalBranchStore::init(dir.path().join("branches")).unwrap();
        let files = LocalFileStore::init(dir.path().join("files")).unwrap();
        TestRepo {
            _dir: dir,
            worktree,
            objects,
            branches,
            files,
        }
    }

    pub fn write(&self, relative: &str, contents: &[u8]) {
        let path = self.worktree.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }

    pub fn remove(&self, relative: &str) {
        let _ = std::fs::remove_file(self.worktree.join(relative));
    }

    /// Scans the whole worktree into a fresh index (§4.5), as if running
    /// `add` at the root with no prior index.
    pub fn scan(&self) -> Index {
        let mut index = Index::default();
        diff::add_recursive(
            &mut index,
            &self.worktree,
            &RepoPath::root(),
            &self.files,
            None,
            true,
        )
        .unwrap();
        index
    }

    /// Commits `index` onto the `local` branch, auto-generating a
    /// description when `description` is empty (§4.8).
    pub fn commit(&self, index: &Index, description: &str) -> CommitId {
        let head_tree = self.head_tree();
        commit_builder::commit_tree(
            index,
            &self.objects,
            &self.branches,
            head_tree.as_ref(),
            CommitOptions {
                repo_id: REPO_ID,
                description: description.to_string(),
                unmerged: false,
                author_name: "Test User".to_string(),
                author_email: "test@example.com".to_string(),
            },
        )
        .unwrap()
    }

    pub fn head_commit(&self) -> Option<CommitId> {
        self.branches.get(REPO_ID, "local").unwrap()
    }

    pub fn head_tree(&self) -> Option<TreeId> {
        self.head_commit()
            .map(|id| self.objects.read_commit(&id).unwrap().root_tree)
    }

    /// Flattens the `local` branch's current tree into a one-tree unpack
    /// side, the shape `unpack` expects for a reset/checkout (§4.6).
    pub fn head_tree_side(&self) -> BTreeMap<String, TreeSideEntry> {
        match self.head_tree() {
            Some(id) => flatten(&self.objects, &id),
            None => BTreeMap::new(),
        }
    }

    /// Runs the full reset cycle (§4.6, §4.7): unpack the head tree against
    /// `index` with `flags`, then apply the resulting plan to `worktree`.
    pub fn reset_to_head(&self, index: &Index, worktree: &Path, flags: UnpackFlags) -> Index {
        let trees = vec![self.head_tree_side()];
        let result = unpack::unpack(index, &trees, &|_| false, flags, &unpack::NoLocking).unwrap();
        let progress = crate::working_copy::Progress::new();
        crate::working_copy::apply_plan(
            &result.plan,
            &result.index,
            worktree,
            &self.files,
            None,
            &progress,
        )
        .unwrap();
        result.index
    }
}

impl Default for TestRepo {
    fn default() -> Self {
        Self::new()
    }
}

struct VecSink<'a>(&'a dyn ObjectStore);

impl<'a> TreeSink for VecSink<'a> {
    fn write_tree(&mut self, tree: &crate::backend::TreeObject) -> TreeId {
        self.0.write_tree(tree).expect("tree store write")
    }
}

/// Builds the cache tree for `index` through `store` without going through a
/// full commit, for tests that only need a tree id (e.g. as a merge base).
pub fn tree_for_index(index: &Index, store: &dyn ObjectStore) -> TreeId {
    let mut sink = VecSink(store);
    build_cache_tree(index, &mut sink)
}

fn flatten(store: &dyn ObjectStore, id: &TreeId) -> BTreeMap<String, TreeSideEntry> {
    let mut out = BTreeMap::new();
    flatten_into(store, id, "", &mut out);
    out
}

fn flatten_into(
    store: &dyn ObjectStore,
    id: &TreeId,
    prefix: &str,
    out: &mut BTreeMap<String, TreeSideEntry>,
) {
    let tree = store.read_tree(id).unwrap();
    for entry in &tree.entries {
        let full_name = if prefix.is_empty() {
            entry.name.clone()
        } else {
            format!("{prefix}/{}", entry.name)
        };
        match entry.mode {
            crate::backend::FileMode::Directory => {
                let child_id = TreeId::from_bytes(&entry.id);
                flatten_into(store, &child_id, &full_name, out);
            }
            crate::backend::FileMode::Regular => {
                let mut oid = [0u8; 20];
                oid.copy_from_slice(&entry.id);
                out.insert(
                    full_name,
                    TreeSideEntry {
                        mode: crate::index::EntryMode::Regular,
                        oid,
                    },
                );
            }
        }
    }
}
