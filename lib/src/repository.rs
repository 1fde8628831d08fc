//! Repository value object (§4.9): repository metadata plus the helpers
//! that translate it to and from a commit's header lines, and the per-repo
//! mutex that serializes destructive operations. Grounded in
//! `repo-mgr.c`'s `seaf_repo_new`/passphrase fields, expressed as a plain
//! Rust value type the way the teacher's `repo.rs` keeps `MutableRepo`
//! data separate from its `Store` plumbing.

use std::sync::Mutex;

use crate::backend::CommitObject;
use crate::crypt::{self, CryptError, EncVersion};

#[derive(Debug, Clone)]
pub struct Repository {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub enc_version: Option<EncVersion>,
    pub magic: Option<String>,
    pub kdf_iterations: u32,
}

impl Repository {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Repository {
            id: id.into(),
            name: name.into(),
            description: None,
            enc_version: None,
            magic: None,
            kdf_iterations: crate::settings::DEFAULT_KDF_ITERATIONS,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.enc_version.is_some()
    }

    /// Derives the magic for `passphrase` and stores it, enabling
    /// encryption for this repository (§4.2, §4.9).
    pub fn generate_magic(
        &mut self,
        passphrase: &str,
        version: EncVersion,
    ) -> Result<crypt::CryptContext, CryptError> {
        let (ctx, magic) = crypt::derive(&self.id, passphrase, version, self.kdf_iterations)?;
        self.enc_version = Some(version);
        self.magic = Some(magic);
        Ok(ctx)
    }

    /// Checks `passphrase` against the stored magic without ever
    /// persisting it, and returns the derived crypt context on success.
    pub fn verify_passphrase(
        &self,
        passphrase: &str,
    ) -> Result<crypt::CryptContext, CryptError> {
        let version = self.enc_version.ok_or(CryptError::WrongPassphrase)?;
        let magic = self.magic.as_deref().ok_or(CryptError::WrongPassphrase)?;
        let ok = crypt::verify(&self.id, passphrase, version, self.kdf_iterations, magic)?;
        if !ok {
            return Err(CryptError::WrongPassphrase);
        }
        let (ctx, _) = crypt::derive(&self.id, passphrase, version, self.kdf_iterations)?;
        Ok(ctx)
    }

    /// Populates name/description/encryption metadata from a commit's
    /// inherited repository header lines (§3).
    pub fn from_commit(id: impl Into<String>, commit: &CommitObject) -> Self {
        Repository {
            id: id.into(),
            name: commit.repo_name.clone().unwrap_or_default(),
            description: commit.repo_desc.clone(),
            enc_version: commit.enc_version.and_then(|v| EncVersion::from_u32(v).ok()),
            magic: commit.magic.clone(),
            kdf_iterations: crate::settings::DEFAULT_KDF_ITERATIONS,
        }
    }

    /// Projects this repository's metadata onto a commit in progress (the
    /// inverse of `from_commit`), leaving tree/parents/signature to the
    /// commit builder.
    pub fn apply_to_commit(&self, commit: &mut CommitObject) {
        commit.repo_name = Some(self.name.clone());
        commit.repo_desc = self.description.clone();
        commit.enc_version = self.enc_version.map(|v| v.as_u32());
        commit.magic = self.magic.clone();
    }
}

/// Serializes destructive worktree operations (add, commit, checkout,
/// reset, revert, merge) for one repository (§4.9, §5).
pub struct RepositoryLock {
    mutex: Mutex<()>,
}

impl RepositoryLock {
    pub fn new() -> Self {
        RepositoryLock { mutex: Mutex::new(()) }
    }

    pub fn with_lock<T>(&self, f: impl FnOnce() -> T) -> T {
        let _guard = self.mutex.lock().unwrap_or_else(|e| e.into_inner());
        f()
    }
}

impl Default for RepositoryLock {
    fn default() -> Self {
        Self::new()
    }
}
