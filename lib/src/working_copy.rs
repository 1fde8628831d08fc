//! Worktree updater (§4.7): applies an unpack plan to disk. Grounded in
//! `local_working_copy.rs`'s file materialization loop, generalized from
//! jj's merged-content writer to a plain content-addressed fetch through
//! `FileStore`, and in `file_util.rs`'s atomic-rename idiom.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;

use crate::backend::{BackendError, FileStore};
use crate::crypt::{self, CryptContext};
use crate::file_util;
use crate::index::Index;
use crate::object_id::{FileId, ObjectId};
use crate::repo_path::RepoPath;
use crate::unpack::PlanEntry;

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("I/O error: {0}")]
    Io(String),
    #[error("store error: {0}")]
    Store(#[from] BackendError),
    #[error("ciphertext is corrupt: {0}")]
    Corrupt(#[from] crypt::CryptError),
}

impl From<std::io::Error> for ApplyError {
    fn from(err: std::io::Error) -> Self {
        ApplyError::Io(err.to_string())
    }
}

/// Tracks completed entries so a failed apply can report partial progress;
/// shareable across threads for a caller-supplied progress counter.
pub struct Progress(AtomicUsize);

impl Progress {
    pub fn new() -> Self {
        Progress(AtomicUsize::new(0))
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }

    fn bump(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ApplyOutcome {
    pub completed: Vec<String>,
}

/// Applies `plan` to `worktree`. Removals are performed before additions
/// so that a file-to-directory or directory-to-file transition at the same
/// path never leaves both a stale and fresh entry on disk simultaneously
/// (§4.6 invariant iii, enforced again here defensively).
pub fn apply_plan(
    plan: &[PlanEntry],
    index: &Index,
    worktree: &Path,
    store: &dyn FileStore,
    crypt_ctx: Option<&CryptContext>,
    progress: &Progress,
) -> Result<ApplyOutcome, ApplyError> {
    let mut completed = Vec::new();

    for entry in plan.iter().filter(|e| e.wt_remove) {
        let repo_path = RepoPath::from_normalized(entry.path.clone());
        let fs_path = repo_path.to_fs_path(worktree);
        match fs::symlink_metadata(&fs_path) {
            Ok(metadata) if metadata.is_dir() => {
                if fs::read_dir(&fs_path).map(|mut d| d.next().is_none()).unwrap_or(false) {
                    fs::remove_dir(&fs_path)?;
                }
            }
            Ok(_) => file_util::remove_file_and_empty_ancestors(&fs_path, worktree)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        progress.bump();
        completed.push(entry.path.clone());
    }

    for entry in plan.iter().filter(|e| e.update) {
        let repo_path = RepoPath::from_normalized(entry.path.clone());
        let fs_path = repo_path.to_fs_path(worktree);
        let Some(cache_entry) = index.get(&entry.path) else {
            continue;
        };
        if let Some(dir) = fs_path.parent() {
            fs::create_dir_all(dir)?;
        }
        let id = FileId::from_bytes(&cache_entry.oid);
        let mut reader = store.read_file(&repo_path, &id)?;
        let mut raw = Vec::new();
        std::io::Read::read_to_end(&mut reader, &mut raw)?;
        let plaintext = match crypt_ctx {
            Some(ctx) => crypt::decrypt_block(&raw, &ctx.key, &ctx.iv)?,
            None => raw,
        };
        let dir = fs_path.parent().unwrap_or(worktree);
        file_util::atomic_write(dir, &fs_path, &plaintext)?;
        progress.bump();
        completed.push(entry.path.clone());
    }

    Ok(ApplyOutcome { completed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendResult;
    use crate::index::{CacheEntry, EntryMode, Stat};
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct MemFileStore {
        files: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
    }

    impl FileStore for MemFileStore {
        fn write_file(&self, _path: &RepoPath, contents: &mut dyn std::io::Read) -> BackendResult<FileId> {
            let mut buf = Vec::new();
            std::io::Read::read_to_end(contents, &mut buf).unwrap();
            let id = crate::object_id::hash_object("blob", &buf).to_vec();
            self.files.lock().unwrap().insert(id.clone(), buf);
            Ok(FileId::from_bytes(&id))
        }

        fn read_file(&self, _path: &RepoPath, id: &FileId) -> BackendResult<Box<dyn std::io::Read>> {
            let data = self
                .files
                .lock()
                .unwrap()
                .get(id.as_bytes())
                .cloned()
                .ok_or(BackendError::NotFound)?;
            Ok(Box::new(Cursor::new(data)))
        }
    }

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
    fn materializes_updated_files() {
        let store = MemFileStore::default();
        let mut reader: &[u8] = b"hello world";
        let id = store.write_file(&RepoPath::root(), &mut reader).unwrap();

        let mut index = Index::default();
        let mut oid = [0u8; 20];
        oid.copy_from_slice(id.as_bytes());
        index.add(CacheEntry::new("a.txt".to_string(), EntryMode::Regular, oid, stat()));

        let dir = tempfile::tempdir().unwrap();
        let plan = vec![PlanEntry {
            path: "a.txt".to_string(),
            update: true,
            wt_remove: false,
        }];
        let progress = Progress::new();
        apply_plan(&plan, &index, dir.path(), &store, None, &progress).unwrap();
        assert_eq!(fs::read(dir.path().join("a.txt")).unwrap(), b"hello world");
        assert_eq!(progress.count(), 1);
    }

    #[test]
    fn removes_files_and_empty_ancestors() {
        let store = MemFileStore::default();
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/a.txt"), b"x").unwrap();

        let index = Index::default();
        let plan = vec![PlanEntry {
            path: "sub/a.txt".to_string(),
            update: false,
            wt_remove: true,
        }];
        let progress = Progress::new();
        apply_plan(&plan, &index, dir.path(), &store, None, &progress).unwrap();
        assert!(!dir.path().join("sub").exists());
    }
}
