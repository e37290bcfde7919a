//! Scratch directory housekeeping.

use std::io;
use std::path::Path;

/// Remove everything inside `dir`, keeping `dir` itself.
///
/// Symlinks are unlinked, never followed. Returns the number of top-level
/// entries removed; a missing `dir` removes nothing.
pub fn clear_directory(dir: &Path) -> io::Result<usize> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut removed = 0;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
        removed += 1;
    }

    tracing::debug!(dir = %dir.display(), removed, "cleared directory");
    Ok(removed)
}
