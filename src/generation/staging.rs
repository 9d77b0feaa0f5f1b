//! Per-request staging directory.
//!
//! Each request gets a private temporary directory for its input files and
//! the pipeline's raw output. The directory is removed when the
//! [`StagingArea`] is dropped, on success and on every error path alike.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::{DaemonError, Result};

/// File name of the staged lyrics.
pub const LYRICS_FILE: &str = "lyrics.txt";

/// File name of the staged tags.
pub const TAGS_FILE: &str = "tags.txt";

/// A temporary directory owned by one request.
#[derive(Debug)]
pub struct StagingArea {
    dir: TempDir,
}

impl StagingArea {
    /// Creates a fresh staging directory under the system temp dir.
    pub fn new() -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("heartmula-")
            .tempdir()
            .map_err(|e| DaemonError::staging_failed("cannot create staging directory", e))?;
        tracing::debug!(path = %dir.path().display(), "staging directory created");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path of `name` inside the staging directory.
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Writes `contents` to `name` and returns the file's path.
    pub fn write(&self, name: &str, contents: &str) -> Result<PathBuf> {
        let path = self.file(name);
        std::fs::write(&path, contents)
            .map_err(|e| DaemonError::staging_failed(format!("cannot write {}", name), e))?;
        Ok(path)
    }

    /// Removes the directory now, reporting failures instead of ignoring them.
    pub fn close(self) -> Result<()> {
        self.dir
            .close()
            .map_err(|e| DaemonError::staging_failed("cannot remove staging directory", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_places_files_inside() {
        let staging = StagingArea::new().unwrap();
        let path = staging.write(LYRICS_FILE, "[Verse]\nhello\n").unwrap();

        assert!(path.starts_with(staging.path()));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[Verse]\nhello\n");
    }

    #[test]
    fn drop_removes_directory() {
        let staging = StagingArea::new().unwrap();
        staging.write(TAGS_FILE, "piano\n").unwrap();
        let dir = staging.path().to_path_buf();

        drop(staging);
        assert!(!dir.exists());
    }

    #[test]
    fn close_removes_directory() {
        let staging = StagingArea::new().unwrap();
        let dir = staging.path().to_path_buf();

        staging.close().unwrap();
        assert!(!dir.exists());
    }

    #[test]
    fn each_area_is_distinct() {
        let a = StagingArea::new().unwrap();
        let b = StagingArea::new().unwrap();
        assert_ne!(a.path(), b.path());
    }
}
