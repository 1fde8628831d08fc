//! Repository-relative paths.
//!
//! Internally every path is forward-slash separated and relative to the
//! worktree root, regardless of the host OS. Conversion to and from
//! platform path separators happens only at the worktree-scanner and
//! worktree-updater boundary (`diff.rs`, `working_copy.rs`).

use std::fmt;
use std::path::{Path, PathBuf};

/// A repository-relative path such as `src/lib.rs`. The empty path refers to
/// the worktree root.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RepoPath(String);

impl RepoPath {
    pub fn root() -> Self {
        RepoPath(String::new())
    }

    /// Parses an already-normalized, `/`-separated, repo-relative string.
    /// Panics if it contains a platform separator or a `.`/`..` component;
    /// callers that need validation against untrusted input should use
    /// `RepoPath::normalize` instead.
    pub fn from_normalized(value: impl Into<String>) -> Self {
        let value = value.into();
        debug_assert!(!value.contains('\\'));
        debug_assert!(!value.split('/').any(|c| c == "." || c == ".."));
        RepoPath(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|c| !c.is_empty())
    }

    pub fn basename(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or("")
    }

    /// The parent directory, or `None` if this is the root.
    pub fn parent(&self) -> Option<RepoPath> {
        if self.0.is_empty() {
            return None;
        }
        match self.0.rfind('/') {
            Some(i) => Some(RepoPath(self.0[..i].to_string())),
            None => Some(RepoPath::root()),
        }
    }

    pub fn join(&self, component: &str) -> RepoPath {
        if self.0.is_empty() {
            RepoPath(component.to_string())
        } else {
            RepoPath(format!("{}/{}", self.0, component))
        }
    }

    /// Converts to a platform-native relative path under `base`.
    pub fn to_fs_path(&self, base: &Path) -> PathBuf {
        let mut path = base.to_path_buf();
        for component in self.components() {
            path.push(component);
        }
        path
    }

    /// True if `self` is `other` or a descendant of `other`.
    pub fn starts_with(&self, other: &RepoPath) -> bool {
        if other.0.is_empty() {
            return true;
        }
        self.0 == other.0 || self.0.starts_with(&format!("{}/", other.0))
    }
}

impl fmt::Debug for RepoPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RepoPath").field(&self.0).finish()
    }
}

impl fmt::Display for RepoPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RepoPathError {
    #[error("path contains a control byte or forbidden character")]
    ForbiddenCharacter,
    #[error("path has a trailing space")]
    TrailingSpace,
    #[error("path escapes the worktree root")]
    Escapes,
}

/// Normalizes a platform path relative to `worktree` into a `RepoPath`,
/// rejecting anything the ignore matcher's portability rules forbid.
pub fn normalize_relative(worktree: &Path, full_path: &Path) -> Result<RepoPath, RepoPathError> {
    let relative = full_path
        .strip_prefix(worktree)
        .map_err(|_| RepoPathError::Escapes)?;
    let mut parts = Vec::new();
    for component in relative.components() {
        use std::path::Component;
        match component {
            Component::Normal(s) => parts.push(s.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => return Err(RepoPathError::Escapes),
        }
    }
    let joined = parts.join("/");
    crate::ignore::validate_portable_name(&joined)?;
    Ok(RepoPath::from_normalized(joined))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_join() {
        let root = RepoPath::root();
        let a = root.join("a");
        let ab = a.join("b");
        assert_eq!(ab.as_str(), "a/b");
        assert_eq!(ab.basename(), "b");
        assert_eq!(ab.parent().unwrap().as_str(), "a");
        assert_eq!(a.parent().unwrap().as_str(), "");
    }

    #[test]
    fn starts_with_root() {
        let root = RepoPath::root();
        let p = root.join("a").join("b");
        assert!(p.starts_with(&root));
        assert!(p.starts_with(&root.join("a")));
        assert!(!p.starts_with(&root.join("c")));
    }
}
