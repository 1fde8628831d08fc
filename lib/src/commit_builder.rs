//! Commit builder (§4.8). Grounded in `commit_builder.rs`'s fluent
//! parent/description assembly, generalized from jj's rewrite-in-place
//! `MutableRepo` update to this engine's simpler "serialize index, advance
//! one named branch" model, since this spec has no change-id/rewrite
//! tracking (a non-goal).

use thiserror::Error;

use crate::backend::{BackendError, BranchStore, CommitObject, ObjectStore, Signature, Timestamp};
use crate::cache_tree::{build_cache_tree, TreeSink};
use crate::diff::{self, DiffStatus};
use crate::index::Index;
use crate::object_id::CommitId;

#[derive(Debug, Error)]
pub enum CommitBuilderError {
    #[error("no master branch to merge from")]
    NoMasterBranch,
    #[error("nothing to commit")]
    NothingToCommit,
    #[error("store error: {0}")]
    Store(#[from] BackendError),
}

pub struct CommitOptions<'a> {
    pub repo_id: &'a str,
    pub description: String,
    pub unmerged: bool,
    pub author_name: String,
    pub author_email: String,
}

struct TreeSinkStore<'a>(&'a dyn ObjectStore);

impl<'a> TreeSink for TreeSinkStore<'a> {
    fn write_tree(&mut self, tree: &crate::backend::TreeObject) -> crate::object_id::TreeId {
        // Store errors here would only be I/O races on an idempotent
        // content-addressed write; propagating through this callback
        // would require a fallible TreeSink, which no caller needs yet.
        self.0.write_tree(tree).expect("tree store write")
    }
}

/// Writes `index`'s cache tree through `store`, builds a commit on top of
/// the repo's current `local` head (and `master` as a second parent when
/// `unmerged`), advances `local`, and returns the new commit id.
pub fn commit_tree(
    index: &Index,
    object_store: &dyn ObjectStore,
    branch_store: &dyn BranchStore,
    head_tree_for_diff: Option<&crate::object_id::TreeId>,
    options: CommitOptions,
) -> Result<CommitId, CommitBuilderError> {
    let mut sink = TreeSinkStore(object_store);
    let root_tree = build_cache_tree(index, &mut sink);

    let parent = branch_store.get(options.repo_id, "local")?;
    let second_parent = if options.unmerged {
        Some(
            branch_store
                .get(options.repo_id, "master")?
                .ok_or(CommitBuilderError::NoMasterBranch)?,
        )
    } else {
        None
    };

    let description = if options.unmerged {
        "Auto merge".to_string()
    } else if options.description.is_empty() {
        generate_description(index, head_tree_for_diff, object_store)
    } else {
        options.description
    };

    if !options.unmerged && parent.is_some() && description.is_empty() {
        return Err(CommitBuilderError::NothingToCommit);
    }

    let now = Timestamp::now();
    let signature = Signature {
        name: options.author_name,
        email: options.author_email,
        timestamp: now,
    };
    let commit = CommitObject {
        root_tree,
        parent,
        second_parent,
        author: signature.clone(),
        committer: signature,
        description,
        repo_name: None,
        repo_desc: None,
        enc_version: None,
        magic: None,
    };
    let commit_id = object_store.write_commit(&commit)?;
    branch_store.set(options.repo_id, "local", &commit_id)?;
    Ok(commit_id)
}

fn generate_description(
    index: &Index,
    head_tree: Option<&crate::object_id::TreeId>,
    object_store: &dyn ObjectStore,
) -> String {
    let changes = diff::collect_changes_index(index, head_tree, object_store).unwrap_or_default();
    if changes.is_empty() {
        return String::new();
    }
    let added = changes.iter().filter(|c| c.status == DiffStatus::Added).count();
    let modified = changes
        .iter()
        .filter(|c| c.status == DiffStatus::Modified)
        .count();
    let deleted = changes
        .iter()
        .filter(|c| c.status == DiffStatus::Deleted)
        .count();

    let mut parts = Vec::new();
    if added > 0 {
        parts.push(format!("Added {added}"));
    }
    if modified > 0 {
        parts.push(format!("modified {modified}"));
    }
    if deleted > 0 {
        parts.push(format!("removed {deleted}"));
    }
    let summary = parts.join(", ");
    let total = added + modified + deleted;
    if total > 1 {
        format!("{summary} and {} more files", total - 1)
    } else {
        format!("{summary} file")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{CacheEntry, EntryMode, Stat};
    use crate::local_store::{LocalBranchStore, LocalObjectStore};

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
    fn first_commit_has_no_parent() {
        let dir = tempfile::tempdir().unwrap();
        let objects = LocalObjectStore::init(dir.path().join("objects")).unwrap();
        let branches = LocalBranchStore::init(dir.path().join("branches")).unwrap();

        let mut index = Index::default();
        index.add(CacheEntry::new(
            "a.txt".to_string(),
            EntryMode::Regular,
            [1; 20],
            stat(),
        ));

        let commit_id = commit_tree(
            &index,
            &objects,
            &branches,
            None,
            CommitOptions {
                repo_id: "repo-1",
                description: "first commit".to_string(),
                unmerged: false,
                author_name: "Alice".to_string(),
                author_email: "alice@example.com".to_string(),
            },
        )
        .unwrap();

        let commit = objects.read_commit(&commit_id).unwrap();
        assert!(commit.parent.is_none());
        assert_eq!(
            branches.get("repo-1", "local").unwrap().unwrap(),
            commit_id
        );
    }

    #[test]
    fn unmerged_without_master_fails() {
        let dir = tempfile::tempdir().unwrap();
        let objects = LocalObjectStore::init(dir.path().join("objects")).unwrap();
        let branches = LocalBranchStore::init(dir.path().join("branches")).unwrap();
        let index = Index::default();

        let result = commit_tree(
            &index,
            &objects,
            &branches,
            None,
            CommitOptions {
                repo_id: "repo-1",
                description: "merge".to_string(),
                unmerged: true,
                author_name: "Alice".to_string(),
                author_email: "alice@example.com".to_string(),
            },
        );
        assert!(matches!(result, Err(CommitBuilderError::NoMasterBranch)));
    }
}
