//! The content-addressed object model and the store traits external
//! collaborators implement: the commit store, the branch store, and the
//! block/fs store (§1, §4.11). `local_store` ships local, file-backed
//! implementations suitable for a single-node client.

use std::fmt;
use std::io::Read;

use thiserror::Error;

use crate::object_id::{hash_object, CommitId, FileId, ObjectId, TreeId};
use crate::repo_path::RepoPath;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    /// Seconds since the Unix epoch.
    pub seconds: i64,
    /// Timezone offset in minutes, matching the `author`/`committer` line's
    /// trailing `<tz>` field.
    pub tz_offset_minutes: i32,
}

impl Timestamp {
    pub fn now() -> Self {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp {
            seconds: now.as_secs() as i64,
            tz_offset_minutes: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Signature {
    pub name: String,
    pub email: String,
    pub timestamp: Timestamp,
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}

/// The mode bits recorded for a tree entry, mirroring the octal modes used
/// by the index and tree serialization (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FileMode {
    Regular,
    Directory,
}

impl FileMode {
    pub fn as_octal(self) -> &'static str {
        match self {
            FileMode::Regular => "100644",
            FileMode::Directory => "40000",
        }
    }
}

/// One record of a tree object: `<octal-mode> <name>\0<20-byte-sha1>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: FileMode,
    pub name: String,
    pub id: Vec<u8>,
}

/// A directory listing, sorted ascending by name before serialization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeObject {
    pub entries: Vec<TreeEntry>,
}

impl TreeObject {
    pub fn serialize(&self) -> Vec<u8> {
        let mut entries: Vec<&TreeEntry> = self.entries.iter().collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        let mut buf = Vec::new();
        for entry in entries {
            buf.extend_from_slice(entry.mode.as_octal().as_bytes());
            buf.push(b' ');
            buf.extend_from_slice(entry.name.as_bytes());
            buf.push(0);
            buf.extend_from_slice(&entry.id);
        }
        buf
    }

    pub fn id(&self) -> TreeId {
        TreeId::from_bytes(&hash_object("tree", &self.serialize()))
    }
}

/// A commit object. `repo_name`/`repo_desc`/`enc_version`/`magic` are the
/// repository metadata a commit inherits (§3); they are serialized as
/// additional header lines when present so that `commit_id` stays a pure
/// function of every field the data model names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitObject {
    pub root_tree: TreeId,
    pub parent: Option<CommitId>,
    pub second_parent: Option<CommitId>,
    pub author: Signature,
    pub committer: Signature,
    pub description: String,
    pub repo_name: Option<String>,
    pub repo_desc: Option<String>,
    pub enc_version: Option<u32>,
    pub magic: Option<String>,
}

fn format_signature_line(label: &str, sig: &Signature) -> String {
    format!(
        "{label} {} <{}> {} {:+05}\n",
        sig.name,
        sig.email,
        sig.timestamp.seconds,
        tz_as_hhmm(sig.timestamp.tz_offset_minutes)
    )
}

fn tz_as_hhmm(offset_minutes: i32) -> i32 {
    let sign = if offset_minutes < 0 { -1 } else { 1 };
    let abs = offset_minutes.abs();
    sign * (abs / 60 * 100 + abs % 60)
}

impl CommitObject {
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = String::new();
        buf.push_str(&format!("tree {}\n", self.root_tree.hex()));
        if let Some(parent) = &self.parent {
            buf.push_str(&format!("parent {}\n", parent.hex()));
        }
        if let Some(parent) = &self.second_parent {
            buf.push_str(&format!("parent {}\n", parent.hex()));
        }
        buf.push_str(&format_signature_line("author", &self.author));
        buf.push_str(&format_signature_line("committer", &self.committer));
        if let Some(name) = &self.repo_name {
            buf.push_str(&format!("repo-name {name}\n"));
        }
        if let Some(desc) = &self.repo_desc {
            buf.push_str(&format!("repo-desc {desc}\n"));
        }
        if let Some(version) = self.enc_version {
            buf.push_str(&format!("enc-version {version}\n"));
        }
        if let Some(magic) = &self.magic {
            buf.push_str(&format!("magic {magic}\n"));
        }
        buf.push('\n');
        buf.push_str(&self.description);
        buf.into_bytes()
    }

    pub fn id(&self) -> CommitId {
        CommitId::from_bytes(&hash_object("commit", &self.serialize()))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("object not found")]
    NotFound,
    #[error("store error: {0}")]
    Other(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// The commit/tree store external collaborator (§1).
pub trait ObjectStore: Send + Sync + fmt::Debug {
    fn write_tree(&self, tree: &TreeObject) -> BackendResult<TreeId>;
    fn read_tree(&self, id: &TreeId) -> BackendResult<TreeObject>;
    fn write_commit(&self, commit: &CommitObject) -> BackendResult<CommitId>;
    fn read_commit(&self, id: &CommitId) -> BackendResult<CommitObject>;
}

/// The named-branch-pointer store external collaborator (§1).
pub trait BranchStore: Send + Sync + fmt::Debug {
    fn get(&self, repo_id: &str, name: &str) -> BackendResult<Option<CommitId>>;
    fn set(&self, repo_id: &str, name: &str, commit: &CommitId) -> BackendResult<()>;
    fn remove(&self, repo_id: &str, name: &str) -> BackendResult<()>;
    fn remove_all(&self, repo_id: &str) -> BackendResult<()>;
}

/// The block/fs store external collaborator (§1, §4.11): splits a file
/// into fixed-size blocks and returns a content-addressed file-object id.
pub trait FileStore: Send + Sync + fmt::Debug {
    fn write_file(&self, path: &RepoPath, contents: &mut dyn Read) -> BackendResult<FileId>;
    fn read_file(&self, path: &RepoPath, id: &FileId) -> BackendResult<Box<dyn Read>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig() -> Signature {
        Signature {
            name: "Test User".to_string(),
            email: "test@example.com".to_string(),
            timestamp: Timestamp {
                seconds: 1_700_000_000,
                tz_offset_minutes: 0,
            },
        }
    }

    #[test]
    fn commit_id_is_deterministic() {
        let tree = TreeObject::default().id();
        let commit = CommitObject {
            root_tree: tree,
            parent: None,
            second_parent: None,
            author: sig(),
            committer: sig(),
            description: "hello".to_string(),
            repo_name: None,
            repo_desc: None,
            enc_version: None,
            magic: None,
        };
        assert_eq!(commit.id(), commit.clone().id());
        let mut other = commit.clone();
        other.description = "different".to_string();
        assert_ne!(commit.id(), other.id());
    }

    #[test]
    fn tree_serialization_sorts_by_name() {
        let tree = TreeObject {
            entries: vec![
                TreeEntry {
                    mode: FileMode::Regular,
                    name: "b.txt".to_string(),
                    id: vec![1; 20],
                },
                TreeEntry {
                    mode: FileMode::Regular,
                    name: "a.txt".to_string(),
                    id: vec![2; 20],
                },
            ],
        };
        let serialized = tree.serialize();
        let a_pos = serialized
            .windows(5)
            .position(|w| w == b"a.txt")
            .unwrap();
        let b_pos = serialized
            .windows(5)
            .position(|w| w == b"b.txt")
            .unwrap();
        assert!(a_pos < b_pos);
    }
}
