//! The manager's flat public error surface (§7): each module keeps its own
//! `thiserror` enum; `EngineError` wraps them with `#[error(transparent)]`
//! so callers see one type, mirroring how `jj-lib` keeps `BackendError`,
//! `CheckoutError`, `ResetError`, and `SnapshotError` separate rather than
//! one giant enum, while still giving external callers a single type to
//! match on.

use thiserror::Error;

use crate::backend::BackendError;
use crate::commit_builder::CommitBuilderError;
use crate::crypt::CryptError;
use crate::diff::ScanError;
use crate::index::IndexError;
use crate::unpack::UnpackError;
use crate::working_copy::ApplyError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Crypt(#[from] CryptError),
    #[error(transparent)]
    Unpack(#[from] UnpackError),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Apply(#[from] ApplyError),
    #[error(transparent)]
    CommitBuilder(#[from] CommitBuilderError),

    #[error("internal error: {0}")]
    Internal(String),
    #[error("repository worktree is missing")]
    WorktreeMissing,
    #[error("wrong passphrase")]
    WrongPassphrase,
    #[error("bad passphrase")]
    BadPassphrase,
    #[error("local modifications would be overwritten")]
    LocalModifications,
    #[error("no master branch")]
    NoMasterBranch,
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error("ambiguous repository id prefix")]
    Ambiguous,
}

pub type EngineResult<T> = Result<T, EngineError>;
