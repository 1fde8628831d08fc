//! The index: an ordered, on-disk table of cache entries mirroring the
//! worktree snapshot (§3, §4.3, §6). The binary format is the `"DIRC"`
//! layout from §6, modeled directly on the git index format the way
//! `andyyu2004-bit`'s `BitIndex` does, since that format is what the spec
//! names byte-for-byte.

use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::time::SystemTime;

use sha1::{Digest, Sha1};
use thiserror::Error;

const SIGNATURE: &[u8; 4] = b"DIRC";
const VERSION: u32 = 2;
const ENTRY_HEADER_LEN: usize = 4 * 10 + 20 + 2; // stat fields + sha1 + flags
const VALID_BIT: u16 = 0x8000;
const EXTENDED_BIT: u16 = 0x4000;
const STAGE_SHIFT: u16 = 12;
const STAGE_MASK: u16 = 0x3000;
const NAME_LEN_MASK: u16 = 0x0FFF;
const NAME_LEN_CAP: usize = 0x0FFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryMode {
    Regular,
    /// Synthetic sentinel entry representing an empty directory (§3).
    Directory,
}

impl EntryMode {
    fn to_raw(self) -> u32 {
        match self {
            EntryMode::Regular => 0o100644,
            EntryMode::Directory => 0o040000,
        }
    }

    fn from_raw(raw: u32) -> Self {
        if raw & 0o170000 == 0o040000 {
            EntryMode::Directory
        } else {
            EntryMode::Regular
        }
    }
}

/// Cache entry flags (§3), set by the unpack engine (§4.6) on the result
/// index and never read back from disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntryFlags {
    pub remove: bool,
    pub update: bool,
    pub wt_remove: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    pub ctime_sec: u32,
    pub ctime_nsec: u32,
    pub mtime_sec: u32,
    pub mtime_nsec: u32,
    pub dev: u32,
    pub ino: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u32,
}

impl Stat {
    pub fn from_metadata(metadata: &fs::Metadata) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            let mtime = system_time_parts(metadata.modified().ok());
            Stat {
                ctime_sec: metadata.ctime().max(0) as u32,
                ctime_nsec: metadata.ctime_nsec().max(0) as u32,
                mtime_sec: mtime.0,
                mtime_nsec: mtime.1,
                dev: metadata.dev() as u32,
                ino: metadata.ino() as u32,
                uid: metadata.uid(),
                gid: metadata.gid(),
                size: metadata.len() as u32,
            }
        }
        #[cfg(not(unix))]
        {
            let mtime = system_time_parts(metadata.modified().ok());
            Stat {
                ctime_sec: mtime.0,
                ctime_nsec: mtime.1,
                mtime_sec: mtime.0,
                mtime_nsec: mtime.1,
                dev: 0,
                ino: 0,
                uid: 0,
                gid: 0,
                size: metadata.len() as u32,
            }
        }
    }
}

fn system_time_parts(time: Option<SystemTime>) -> (u32, u32) {
    let duration = time
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .unwrap_or_default();
    (duration.as_secs() as u32, duration.subsec_nanos())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub name: String,
    pub mode: EntryMode,
    pub oid: [u8; 20],
    pub stat: Stat,
    pub stage: u8,
    pub flags: EntryFlags,
}

impl CacheEntry {
    pub fn new(name: String, mode: EntryMode, oid: [u8; 20], stat: Stat) -> Self {
        CacheEntry {
            name,
            mode,
            oid,
            stat,
            stage: 0,
            flags: EntryFlags::default(),
        }
    }

    fn sort_key(&self) -> (&str, u8) {
        (&self.name, self.stage)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IndexError {
    #[error("index file is corrupt: {0}")]
    Corrupt(&'static str),
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<io::Error> for IndexError {
    fn from(err: io::Error) -> Self {
        IndexError::Io(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Index {
    entries: Vec<CacheEntry>,
    timestamp: u32,
}

impl Index {
    pub fn entries(&self) -> &[CacheEntry] {
        &self.entries
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    pub fn is_unborn(&self) -> bool {
        self.entries.is_empty() && self.timestamp == 0
    }

    pub fn unmerged(&self) -> bool {
        self.entries.iter().any(|e| e.stage != 0)
    }

    /// Binary search for the stage-0 entry at `name`: `Ok(i)` on exact
    /// match, `Err(insertion_point)` otherwise.
    pub fn name_pos(&self, name: &str) -> Result<usize, usize> {
        self.entries
            .binary_search_by(|e| e.sort_key().cmp(&(name, 0)))
    }

    /// Inserts or replaces the entry at `(entry.name, entry.stage)`, keeping
    /// the sort invariant.
    pub fn add(&mut self, entry: CacheEntry) {
        match self
            .entries
            .binary_search_by(|e| e.sort_key().cmp(&(entry.name.as_str(), entry.stage)))
        {
            Ok(i) => self.entries[i] = entry,
            Err(i) => self.entries.insert(i, entry),
        }
    }

    pub fn remove(&mut self, name: &str) {
        if let Ok(i) = self.name_pos(name) {
            self.entries.remove(i);
        }
    }

    /// Removes every entry (any stage) at `name`, used when resolving a
    /// conflict back down to a single stage-0 entry.
    pub fn remove_all_stages(&mut self, name: &str) {
        self.entries.retain(|e| e.name != name);
    }

    pub fn get(&self, name: &str) -> Option<&CacheEntry> {
        self.name_pos(name).ok().map(|i| &self.entries[i])
    }

    /// An entry is clean when mtime, size, inode, and device all match; a
    /// matching index timestamp (to the second) is treated conservatively
    /// as dirty, since the file could have been rewritten within the same
    /// filesystem-timestamp granularity as the index write.
    pub fn match_stat(&self, entry: &CacheEntry, current: &Stat) -> bool {
        if self.timestamp != 0 && self.timestamp == current.mtime_sec {
            return false;
        }
        entry.stat.mtime_sec == current.mtime_sec
            && entry.stat.mtime_nsec == current.mtime_nsec
            && entry.stat.size == current.size
            && entry.stat.ino == current.ino
            && entry.stat.dev == current.dev
    }

    pub fn read(path: &Path) -> Result<Index, IndexError> {
        let data = match fs::read(path) {
            Ok(d) => d,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Index::default()),
            Err(e) => return Err(e.into()),
        };
        if data.is_empty() {
            return Ok(Index::default());
        }
        if data.len() < 12 + 20 {
            return Err(IndexError::Corrupt("truncated header"));
        }
        let (body, trailer) = data.split_at(data.len() - 20);
        let mut hasher = Sha1::new();
        hasher.update(body);
        let computed: [u8; 20] = hasher.finalize().into();
        if computed != trailer {
            return Err(IndexError::Corrupt("checksum mismatch"));
        }
        if &body[0..4] != SIGNATURE {
            return Err(IndexError::Corrupt("bad signature"));
        }
        let version = u32::from_be_bytes(body[4..8].try_into().unwrap());
        if version != VERSION {
            return Err(IndexError::Corrupt("unsupported version"));
        }
        let count = u32::from_be_bytes(body[8..12].try_into().unwrap()) as usize;
        let mut offset = 12;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let entry_start = offset;
            if offset + ENTRY_HEADER_LEN > body.len() {
                return Err(IndexError::Corrupt("truncated entry"));
            }
            let mut read_u32 = || {
                let v = u32::from_be_bytes(body[offset..offset + 4].try_into().unwrap());
                offset += 4;
                v
            };
            let ctime_sec = read_u32();
            let ctime_nsec = read_u32();
            let mtime_sec = read_u32();
            let mtime_nsec = read_u32();
            let dev = read_u32();
            let ino = read_u32();
            let mode_raw = read_u32();
            let uid = read_u32();
            let gid = read_u32();
            let size = read_u32();
            let stat = Stat {
                ctime_sec,
                ctime_nsec,
                mtime_sec,
                mtime_nsec,
                dev,
                ino,
                uid,
                gid,
                size,
            };
            let mut oid = [0u8; 20];
            oid.copy_from_slice(&body[offset..offset + 20]);
            offset += 20;
            let flags_raw = u16::from_be_bytes(body[offset..offset + 2].try_into().unwrap());
            offset += 2;
            if flags_raw & VALID_BIT == 0 {
                return Err(IndexError::Corrupt("invalid entry flag"));
            }
            let stage = ((flags_raw & STAGE_MASK) >> STAGE_SHIFT) as u8;
            let name_len = (flags_raw & NAME_LEN_MASK) as usize;
            let nul = body[offset..]
                .iter()
                .position(|&b| b == 0)
                .ok_or(IndexError::Corrupt("unterminated name"))?;
            let name_bytes = &body[offset..offset + nul];
            if name_len < NAME_LEN_CAP && name_bytes.len() != name_len {
                return Err(IndexError::Corrupt("name length mismatch"));
            }
            let name = std::str::from_utf8(name_bytes)
                .map_err(|_| IndexError::Corrupt("non-utf8 name"))?
                .to_string();
            offset += nul + 1;
            while (offset - entry_start) % 8 != 0 {
                offset += 1;
            }
            entries.push(CacheEntry {
                name,
                mode: EntryMode::from_raw(mode_raw),
                oid,
                stat,
                stage,
                flags: EntryFlags::default(),
            });
        }
        Ok(Index {
            entries,
            timestamp: 0,
        })
    }

    pub fn write(&self, path: &Path) -> Result<(), IndexError> {
        let mut body = Vec::new();
        body.extend_from_slice(SIGNATURE);
        body.extend_from_slice(&VERSION.to_be_bytes());
        body.extend_from_slice(&(self.entries.len() as u32).to_be_bytes());
        let mut sorted: Vec<&CacheEntry> = self.entries.iter().collect();
        sorted.sort_by_key(|e| e.sort_key());
        for entry in sorted {
            let entry_start = body.len();
            body.extend_from_slice(&entry.stat.ctime_sec.to_be_bytes());
            body.extend_from_slice(&entry.stat.ctime_nsec.to_be_bytes());
            body.extend_from_slice(&entry.stat.mtime_sec.to_be_bytes());
            body.extend_from_slice(&entry.stat.mtime_nsec.to_be_bytes());
            body.extend_from_slice(&entry.stat.dev.to_be_bytes());
            body.extend_from_slice(&entry.stat.ino.to_be_bytes());
            body.extend_from_slice(&entry.mode.to_raw().to_be_bytes());
            body.extend_from_slice(&entry.stat.uid.to_be_bytes());
            body.extend_from_slice(&entry.stat.gid.to_be_bytes());
            body.extend_from_slice(&entry.stat.size.to_be_bytes());
            body.extend_from_slice(&entry.oid);
            let name_len = entry.name.len().min(NAME_LEN_CAP) as u16;
            let mut flags = VALID_BIT | ((entry.stage as u16) << STAGE_SHIFT) | name_len;
            if entry.name.len() > NAME_LEN_CAP {
                flags |= EXTENDED_BIT;
            }
            body.extend_from_slice(&flags.to_be_bytes());
            body.extend_from_slice(entry.name.as_bytes());
            body.push(0);
            while (body.len() - entry_start) % 8 != 0 {
                body.push(0);
            }
        }
        let mut hasher = Sha1::new();
        hasher.update(&body);
        let trailer: [u8; 20] = hasher.finalize().into();

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;
        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        temp.write_all(&body)?;
        temp.write_all(&trailer)?;
        temp.as_file().sync_all()?;
        temp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

/// Scoped acquisition of an on-disk index (§9 REDESIGN FLAGS): reads the
/// index once, hands out a mutable view, and writes it back only if the
/// caller explicitly calls `commit`. Dropping the guard without committing
/// — on an early return, a `?`, or a panic unwind — simply discards the
/// in-memory copy, so there is no manual unlock/rollback path to forget.
pub struct IndexGuard<'p> {
    path: &'p Path,
    index: Index,
}

impl<'p> IndexGuard<'p> {
    pub fn acquire(path: &'p Path) -> Result<Self, IndexError> {
        Ok(IndexGuard {
            path,
            index: Index::read(path)?,
        })
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn index_mut(&mut self) -> &mut Index {
        &mut self.index
    }

    /// Replaces the held index (e.g. with the unpack engine's result index)
    /// before committing.
    pub fn replace(&mut self, index: Index) {
        self.index = index;
    }

    pub fn commit(self) -> Result<(), IndexError> {
        self.index.write(self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, stage: u8) -> CacheEntry {
        CacheEntry {
            name: name.to_string(),
            mode: EntryMode::Regular,
            oid: [1; 20],
            stat: Stat {
                ctime_sec: 1,
                ctime_nsec: 0,
                mtime_sec: 2,
                mtime_nsec: 0,
                dev: 1,
                ino: 1,
                uid: 0,
                gid: 0,
                size: 5,
            },
            stage,
            flags: EntryFlags::default(),
        }
    }

    #[test]
    fn add_keeps_sorted_order() {
        let mut index = Index::default();
        index.add(entry("b.txt", 0));
        index.add(entry("a.txt", 0));
        index.add(entry("c.txt", 0));
        let names: Vec<&str> = index.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "c.txt"]);
    }

    #[test]
    fn add_replaces_existing_stage0_entry() {
        let mut index = Index::default();
        index.add(entry("a.txt", 0));
        let mut replacement = entry("a.txt", 0);
        replacement.oid = [9; 20];
        index.add(replacement);
        assert_eq!(index.entries().len(), 1);
        assert_eq!(index.entries()[0].oid, [9; 20]);
    }

    #[test]
    fn name_pos_binary_search() {
        let mut index = Index::default();
        index.add(entry("a.txt", 0));
        index.add(entry("c.txt", 0));
        assert_eq!(index.name_pos("a.txt"), Ok(0));
        assert_eq!(index.name_pos("b.txt"), Err(1));
        assert_eq!(index.name_pos("d.txt"), Err(2));
    }

    #[test]
    fn unmerged_detects_conflict_stages() {
        let mut index = Index::default();
        index.add(entry("a.txt", 0));
        assert!(!index.unmerged());
        index.add(entry("a.txt", 1));
        assert!(index.unmerged());
    }

    #[test]
    fn read_write_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index");
        let mut index = Index::default();
        index.add(entry("a.txt", 0));
        index.add(entry("b/c.txt", 0));
        index.write(&path).unwrap();
        let loaded = Index::read(&path).unwrap();
        assert_eq!(loaded.entries().len(), index.entries().len());
        for (a, b) in loaded.entries().iter().zip(index.entries().iter()) {
            assert_eq!(a.name, b.name);
            assert_eq!(a.oid, b.oid);
            assert_eq!(a.stage, b.stage);
        }
    }

    #[test]
    fn missing_file_is_unborn() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist");
        let index = Index::read(&path).unwrap();
        assert!(index.is_unborn());
    }

    #[test]
    fn corrupt_signature_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index");
        fs::write(&path, b"NOPE0000000000000000000000000000000000000000").unwrap();
        assert!(matches!(Index::read(&path), Err(IndexError::Corrupt(_))));
    }

    #[test]
    fn guard_discards_uncommitted_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index");
        {
            let mut guard = IndexGuard::acquire(&path).unwrap();
            guard.index_mut().add(entry("a.txt", 0));
            // dropped without commit()
        }
        assert!(Index::read(&path).unwrap().entries().is_empty());
    }

    #[test]
    fn guard_commit_persists_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index");
        let mut guard = IndexGuard::acquire(&path).unwrap();
        guard.index_mut().add(entry("a.txt", 0));
        guard.commit().unwrap();
        assert_eq!(Index::read(&path).unwrap().entries().len(), 1);
    }
}
