//! Local, file-backed implementations of the commit/branch/fs store
//! collaborators (§4.11): one loose object file per blob/tree/commit,
//! named by hex id, and one file per `(repo_id, branch name)`.
//!
//! Grounded in `local_backend.rs`'s loose-object layout, generalized from a
//! single repository's store directory to one store shared by every
//! repository the manager knows about (each blob/tree/commit id is already
//! globally unique by content, so a single `blobs/trees/commits` directory
//! tree is shared; branches are scoped by `repo_id` subdirectory since
//! branch names are not content-addressed).

use std::fmt;
use std::fs;
use std::io::Read;
use std::path::PathBuf;

use tempfile::NamedTempFile;

use crate::backend::{
    BackendError, BackendResult, BranchStore, CommitObject, FileStore, ObjectStore, TreeObject,
};
use crate::file_util::persist_content_addressed_temp_file;
use crate::object_id::{hash_object, CommitId, FileId, ObjectId, TreeId};
use crate::repo_path::RepoPath;
use crate::settings::DEFAULT_BLOCK_SIZE;

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        BackendError::Other(err.to_string())
    }
}

impl From<tempfile::PersistError> for BackendError {
    fn from(err: tempfile::PersistError) -> Self {
        BackendError::Other(err.to_string())
    }
}

#[derive(Debug)]
pub struct LocalObjectStore {
    path: PathBuf,
}

impl LocalObjectStore {
    pub fn init(store_path: PathBuf) -> BackendResult<Self> {
        fs::create_dir_all(store_path.join("trees"))?;
        fs::create_dir_all(store_path.join("commits"))?;
        Ok(LocalObjectStore { path: store_path })
    }

    fn tree_path(&self, id: &TreeId) -> PathBuf {
        self.path.join("trees").join(id.hex())
    }

    fn commit_path(&self, id: &CommitId) -> PathBuf {
        self.path.join("commits").join(id.hex())
    }
}

impl ObjectStore for LocalObjectStore {
    fn write_tree(&self, tree: &TreeObject) -> BackendResult<TreeId> {
        let serialized = tree.serialize();
        let id = tree.id();
        let mut temp_file = NamedTempFile::new_in(&self.path)?;
        std::io::Write::write_all(&mut temp_file, &serialized)?;
        persist_content_addressed_temp_file(temp_file, self.tree_path(&id))?;
        Ok(id)
    }

    fn read_tree(&self, id: &TreeId) -> BackendResult<TreeObject> {
        let content = fs::read(self.tree_path(id)).map_err(|_| BackendError::NotFound)?;
        parse_tree(&content).ok_or_else(|| BackendError::Other("corrupt tree object".to_string()))
    }

    fn write_commit(&self, commit: &CommitObject) -> BackendResult<CommitId> {
        let serialized = commit.serialize();
        let id = commit.id();
        let mut temp_file = NamedTempFile::new_in(&self.path)?;
        std::io::Write::write_all(&mut temp_file, &serialized)?;
        persist_content_addressed_temp_file(temp_file, self.commit_path(&id))?;
        Ok(id)
    }

    fn read_commit(&self, id: &CommitId) -> BackendResult<CommitObject> {
        let content = fs::read(self.commit_path(id)).map_err(|_| BackendError::NotFound)?;
        parse_commit(&content)
            .ok_or_else(|| BackendError::Other("corrupt commit object".to_string()))
    }
}

fn parse_tree(content: &[u8]) -> Option<TreeObject> {
    use crate::backend::{FileMode, TreeEntry};
    let mut entries = Vec::new();
    let mut rest = content;
    while !rest.is_empty() {
        let space = rest.iter().position(|&b| b == b' ')?;
        let mode_str = std::str::from_utf8(&rest[..space]).ok()?;
        let mode = match mode_str {
            "100644" => FileMode::Regular,
            "40000" => FileMode::Directory,
            _ => return None,
        };
        rest = &rest[space + 1..];
        let nul = rest.iter().position(|&b| b == 0)?;
        let name = std::str::from_utf8(&rest[..nul]).ok()?.to_string();
        rest = &rest[nul + 1..];
        if rest.len() < 20 {
            return None;
        }
        let id = rest[..20].to_vec();
        rest = &rest[20..];
        entries.push(TreeEntry { mode, name, id });
    }
    Some(TreeObject { entries })
}

fn parse_commit(content: &[u8]) -> Option<CommitObject> {
    let text = std::str::from_utf8(content).ok()?;
    let (header, description) = text.split_once("\n\n").unwrap_or((text, ""));
    let mut root_tree = None;
    let mut parents = Vec::new();
    let mut author = None;
    let mut committer = None;
    let mut repo_name = None;
    let mut repo_desc = None;
    let mut enc_version = None;
    let mut magic = None;
    for line in header.lines() {
        if let Some(v) = line.strip_prefix("tree ") {
            root_tree = Some(TreeId::from_hex(v).ok()?);
        } else if let Some(v) = line.strip_prefix("parent ") {
            parents.push(CommitId::from_hex(v).ok()?);
        } else if let Some(v) = line.strip_prefix("author ") {
            author = Some(parse_signature(v)?);
        } else if let Some(v) = line.strip_prefix("committer ") {
            committer = Some(parse_signature(v)?);
        } else if let Some(v) = line.strip_prefix("repo-name ") {
            repo_name = Some(v.to_string());
        } else if let Some(v) = line.strip_prefix("repo-desc ") {
            repo_desc = Some(v.to_string());
        } else if let Some(v) = line.strip_prefix("enc-version ") {
            enc_version = Some(v.parse().ok()?);
        } else if let Some(v) = line.strip_prefix("magic ") {
            magic = Some(v.to_string());
        }
    }
    Some(CommitObject {
        root_tree: root_tree?,
        parent: parents.first().cloned(),
        second_parent: parents.get(1).cloned(),
        author: author?,
        committer: committer?,
        description: description.to_string(),
        repo_name,
        repo_desc,
        enc_version,
        magic,
    })
}

fn parse_signature(line: &str) -> Option<crate::backend::Signature> {
    use crate::backend::{Signature, Timestamp};
    let lt = line.find('<')?;
    let gt = line.find('>')?;
    let name = line[..lt].trim().to_string();
    let email = line[lt + 1..gt].to_string();
    let rest = line[gt + 1..].trim();
    let mut parts = rest.split_whitespace();
    let seconds: i64 = parts.next()?.parse().ok()?;
    let tz: i32 = parts.next()?.parse().ok()?;
    let tz_offset_minutes = (tz / 100) * 60 + (tz % 100);
    Some(Signature {
        name,
        email,
        timestamp: Timestamp {
            seconds,
            tz_offset_minutes,
        },
    })
}

#[derive(Debug)]
pub struct LocalBranchStore {
    path: PathBuf,
}

impl LocalBranchStore {
    pub fn init(store_path: PathBuf) -> BackendResult<Self> {
        fs::create_dir_all(&store_path)?;
        Ok(LocalBranchStore { path: store_path })
    }

    fn branch_path(&self, repo_id: &str, name: &str) -> PathBuf {
        self.path.join(repo_id).join(name)
    }
}

impl BranchStore for LocalBranchStore {
    fn get(&self, repo_id: &str, name: &str) -> BackendResult<Option<CommitId>> {
        match fs::read_to_string(self.branch_path(repo_id, name)) {
            Ok(hex) => Ok(Some(
                CommitId::from_hex(hex.trim())
                    .map_err(|e| BackendError::Other(e.to_string()))?,
            )),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, repo_id: &str, name: &str, commit: &CommitId) -> BackendResult<()> {
        let dir = self.path.join(repo_id);
        fs::create_dir_all(&dir)?;
        crate::file_util::atomic_write(&dir, &self.branch_path(repo_id, name), commit.hex().as_bytes())?;
        Ok(())
    }

    fn remove(&self, repo_id: &str, name: &str) -> BackendResult<()> {
        match fs::remove_file(self.branch_path(repo_id, name)) {
            Ok(()) | Err(_) => Ok(()),
        }
    }

    fn remove_all(&self, repo_id: &str) -> BackendResult<()> {
        let _ = fs::remove_dir_all(self.path.join(repo_id));
        Ok(())
    }
}

/// Splits a file into fixed-size blocks (§4.11) and stores each block as a
/// loose object named by its own SHA-1; the file id is the hash of the
/// concatenated block ids, so unchanged blocks across file revisions are
/// naturally deduplicated without implementing rolling-hash matching.
pub struct LocalFileStore {
    path: PathBuf,
    block_size: u64,
}

impl fmt::Debug for LocalFileStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalFileStore")
            .field("path", &self.path)
            .finish()
    }
}

impl LocalFileStore {
    pub fn init(store_path: PathBuf) -> BackendResult<Self> {
        fs::create_dir_all(store_path.join("blocks"))?;
        fs::create_dir_all(store_path.join("files"))?;
        Ok(LocalFileStore {
            path: store_path,
            block_size: DEFAULT_BLOCK_SIZE,
        })
    }

    pub fn with_block_size(mut self, block_size: u64) -> Self {
        self.block_size = block_size;
        self
    }

    fn block_path(&self, hex: &str) -> PathBuf {
        self.path.join("blocks").join(hex)
    }

    fn file_path(&self, id: &FileId) -> PathBuf {
        self.path.join("files").join(id.hex())
    }
}

impl FileStore for LocalFileStore {
    fn write_file(&self, _path: &RepoPath, contents: &mut dyn Read) -> BackendResult<FileId> {
        let mut block_ids = Vec::new();
        let mut buf = vec![0u8; self.block_size as usize];
        loop {
            let n = read_full(contents, &mut buf)?;
            if n == 0 {
                break;
            }
            let block_hash = hash_object("block", &buf[..n]);
            let hex = hex::encode(block_hash);
            let mut temp_file = NamedTempFile::new_in(&self.path)?;
            std::io::Write::write_all(&mut temp_file, &buf[..n])?;
            persist_content_addressed_temp_file(temp_file, self.block_path(&hex))?;
            block_ids.push(block_hash);
            if (n as u64) < self.block_size {
                break;
            }
        }
        let mut preimage = Vec::with_capacity(block_ids.len() * 20);
        for id in &block_ids {
            preimage.extend_from_slice(id);
        }
        let file_hash = hash_object("file", &preimage);
        let id = FileId::from_bytes(&file_hash);
        let manifest: Vec<u8> = block_ids.concat();
        let mut temp_file = NamedTempFile::new_in(&self.path)?;
        std::io::Write::write_all(&mut temp_file, &manifest)?;
        persist_content_addressed_temp_file(temp_file, self.file_path(&id))?;
        Ok(id)
    }

    fn read_file(&self, _path: &RepoPath, id: &FileId) -> BackendResult<Box<dyn Read>> {
        let manifest = fs::read(self.file_path(id)).map_err(|_| BackendError::NotFound)?;
        let mut blocks = Vec::new();
        for chunk in manifest.chunks(20) {
            let hex = hex::encode(chunk);
            blocks.push(fs::read(self.block_path(&hex)).map_err(|_| BackendError::NotFound)?);
        }
        Ok(Box::new(std::io::Cursor::new(blocks.concat())))
    }
}

/// Reads until `buf` is full or the reader is exhausted, returning the
/// number of bytes actually read (may be less than `buf.len()` only at
/// end-of-stream).
fn read_full(reader: &mut dyn Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match reader.read(&mut buf[total..])? {
            0 => break,
            n => total += n,
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::init(dir.path().to_path_buf()).unwrap();
        let tree = TreeObject {
            entries: vec![crate::backend::TreeEntry {
                mode: crate::backend::FileMode::Regular,
                name: "a.txt".to_string(),
                id: vec![9; 20],
            }],
        };
        let id = store.write_tree(&tree).unwrap();
        assert_eq!(store.read_tree(&id).unwrap(), tree);
    }

    #[test]
    fn commit_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::init(dir.path().to_path_buf()).unwrap();
        let sig = crate::backend::Signature {
            name: "A".to_string(),
            email: "a@example.com".to_string(),
            timestamp: crate::backend::Timestamp {
                seconds: 100,
                tz_offset_minutes: -60,
            },
        };
        let commit = CommitObject {
            root_tree: TreeObject::default().id(),
            parent: None,
            second_parent: None,
            author: sig.clone(),
            committer: sig,
            description: "hello\nworld".to_string(),
            repo_name: Some("repo".to_string()),
            repo_desc: None,
            enc_version: Some(1),
            magic: Some("abc123".to_string()),
        };
        let id = store.write_commit(&commit).unwrap();
        assert_eq!(store.read_commit(&id).unwrap(), commit);
    }

    #[test]
    fn branch_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBranchStore::init(dir.path().to_path_buf()).unwrap();
        assert_eq!(store.get("r1", "local").unwrap(), None);
        let commit_id = CommitId::from_bytes(&[7; 20]);
        store.set("r1", "local", &commit_id).unwrap();
        assert_eq!(store.get("r1", "local").unwrap(), Some(commit_id));
    }

    #[test]
    fn file_store_round_trips_multi_block() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::init(dir.path().to_path_buf())
            .unwrap()
            .with_block_size(4);
        let data = b"hello world!";
        let id = store
            .write_file(&RepoPath::root(), &mut &data[..])
            .unwrap();
        let mut out = Vec::new();
        store
            .read_file(&RepoPath::root(), &id)
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, data);
    }
}
