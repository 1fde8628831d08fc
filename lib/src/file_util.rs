//! Small filesystem helpers shared by the index, local store, and worktree
//! updater: atomic writes via a sibling temp file, content-addressed
//! idempotent persistence, and empty-ancestor-directory cleanup.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::{NamedTempFile, PersistError};

/// Like `NamedTempFile::persist`, but also succeeds if the target already
/// exists: content-addressed writes are idempotent by construction, so a
/// second writer racing to create the same id is not an error.
pub fn persist_content_addressed_temp_file<P: AsRef<Path>>(
    temp_file: NamedTempFile,
    new_path: P,
) -> Result<File, PersistError> {
    match temp_file.persist(&new_path) {
        Ok(file) => Ok(file),
        Err(PersistError { error, file }) => {
            if let Ok(existing_file) = File::open(new_path) {
                Ok(existing_file)
            } else {
                Err(PersistError { error, file })
            }
        }
    }
}

/// Writes `contents` to a temp file in `dir`, fsyncs it, and atomically
/// renames it to `target`, overwriting any existing file there.
pub fn atomic_write(dir: &Path, target: &Path, contents: &[u8]) -> io::Result<()> {
    let mut temp = NamedTempFile::new_in(dir)?;
    {
        use std::io::Write;
        temp.write_all(contents)?;
        temp.as_file().sync_all()?;
    }
    temp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

/// Removes `path` and then removes each now-empty ancestor directory up to
/// (but not including) `stop_at`.
pub fn remove_file_and_empty_ancestors(path: &Path, stop_at: &Path) -> io::Result<()> {
    std::fs::remove_file(path)?;
    let mut dir = path.parent().map(PathBuf::from);
    while let Some(d) = dir {
        if d == stop_at || !d.starts_with(stop_at) {
            break;
        }
        if !is_dir_empty(&d) {
            break;
        }
        if let Err(e) = std::fs::remove_dir(&d) {
            if e.kind() != io::ErrorKind::NotFound {
                return Err(e);
            }
        }
        dir = d.parent().map(PathBuf::from);
    }
    Ok(())
}

fn is_dir_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
}
