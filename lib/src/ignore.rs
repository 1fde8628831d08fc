//! Decides whether a worktree entry is skipped by the scanner.
//!
//! Unlike `.gitignore` matching (which compiles a user-supplied pattern
//! file into per-directory regexes, see the sibling `gitignore` module),
//! this matcher is a fixed, built-in table: editor swap files, office lock
//! files, thumbnail caches and OS metadata that should never be synced.

use once_cell::sync::Lazy;
use regex::RegexSet;

use crate::repo_path::RepoPathError;

/// Basename patterns that are always skipped, regardless of directory.
const IGNORED_BASENAME_PATTERNS: &[&str] = &[
    r"^\.DS_Store$",
    r"^\.\_.*$",
    r"^Thumbs\.db$",
    r"^desktop\.ini$",
    r"^~\$.*$",       // Office lock files, e.g. ~$report.docx
    r"^\..*\.swp$",   // vim swap files
    r"^\..*\.swx$",
    r"^\.goutputstream-.*$",
    r"^\.~lock\..*#$", // LibreOffice lock files
];

static IGNORED_BASENAMES: Lazy<RegexSet> =
    Lazy::new(|| RegexSet::new(IGNORED_BASENAME_PATTERNS).unwrap());

/// Characters forbidden anywhere in a repo-relative path so that names stay
/// portable across worktree filesystems.
const FORBIDDEN_CHARACTERS: &[char] = &['\\', ':', '*', '?', '"', '<', '>', '|', '\u{8}', '\t'];

/// True if `basename` (the last path component) should be skipped by the
/// scanner.
pub fn ignore(basename: &str) -> bool {
    IGNORED_BASENAMES.is_match(basename)
}

/// Checks the portability rules that apply to every component of a
/// repo-relative path, independent of the fixed ignore list above: no
/// control bytes, none of the OS-reserved characters, and no trailing
/// ASCII space on any component.
pub fn validate_portable_name(path: &str) -> Result<(), RepoPathError> {
    if path.ends_with(' ') {
        return Err(RepoPathError::TrailingSpace);
    }
    for c in path.chars() {
        if (c as u32) < 0x20 && c != '/' {
            return Err(RepoPathError::ForbiddenCharacter);
        }
        if FORBIDDEN_CHARACTERS.contains(&c) {
            return Err(RepoPathError::ForbiddenCharacter);
        }
    }
    for component in path.split('/') {
        if component.ends_with(' ') {
            return Err(RepoPathError::TrailingSpace);
        }
    }
    Ok(())
}
