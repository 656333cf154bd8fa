//! Scratch workspace
//!
//! Each run owns `<scratch_root>/<session_id>/` holding the source file. The
//! directory is removed when the run ends, and again on drop if that did not
//! happen.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Session-exclusive scratch directory
#[derive(Debug)]
pub struct Workspace {
    dir: PathBuf,
    source_path: PathBuf,
    removed: bool,
}

impl Workspace {
    /// Create the session directory and write `source` into it.
    ///
    /// The scratch root is created if missing and may be shared with other
    /// sessions. The session directory itself must not exist yet.
    pub fn create(
        root: &Path,
        session_id: &str,
        file_name: &str,
        source: &str,
    ) -> io::Result<Self> {
        fs::create_dir_all(root)?;
        let dir = root.join(session_id);
        fs::create_dir(&dir)?;

        let mut workspace = Self {
            source_path: dir.join(file_name),
            dir,
            removed: false,
        };
        if let Err(e) = fs::write(&workspace.source_path, source) {
            let _ = workspace.remove();
            return Err(e);
        }

        debug!("Workspace created: {}", workspace.dir.display());
        Ok(workspace)
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// Remove every entry in the directory, then the directory. Idempotent.
    pub fn remove(&mut self) -> io::Result<()> {
        if self.removed {
            return Ok(());
        }
        match fs::read_dir(&self.dir) {
            Ok(entries) => {
                for entry in entries {
                    let entry = entry?;
                    let path = entry.path();
                    if entry.file_type()?.is_dir() {
                        fs::remove_dir_all(&path)?;
                    } else {
                        fs::remove_file(&path)?;
                    }
                }
                fs::remove_dir(&self.dir)?;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        self.removed = true;
        debug!("Workspace removed: {}", self.dir.display());
        Ok(())
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Err(e) = self.remove() {
            warn!("Failed to remove workspace {}: {}", self.dir.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_writes_source() {
        let root = TempDir::new().unwrap();
        let workspace = Workspace::create(root.path(), "abc", "code.py", "print('hi')").unwrap();
        assert_eq!(workspace.path(), root.path().join("abc"));
        assert_eq!(fs::read_to_string(workspace.source_path()).unwrap(), "print('hi')");
    }

    #[test]
    fn test_remove_deletes_extra_files() {
        let root = TempDir::new().unwrap();
        let mut workspace = Workspace::create(root.path(), "abc", "code.py", "").unwrap();
        fs::write(workspace.path().join("out.txt"), "x").unwrap();
        fs::create_dir(workspace.path().join("nested")).unwrap();
        fs::write(workspace.path().join("nested").join("deep.txt"), "y").unwrap();

        workspace.remove().unwrap();
        assert!(!root.path().join("abc").exists());
        // second call is a no-op
        workspace.remove().unwrap();
    }

    #[test]
    fn test_drop_removes_directory() {
        let root = TempDir::new().unwrap();
        {
            let _workspace = Workspace::create(root.path(), "dropped", "code.py", "").unwrap();
            assert!(root.path().join("dropped").exists());
        }
        assert!(!root.path().join("dropped").exists());
        assert!(root.path().exists());
    }

    #[test]
    fn test_existing_directory_is_rejected() {
        let root = TempDir::new().unwrap();
        let _first = Workspace::create(root.path(), "same", "code.py", "").unwrap();
        let err = Workspace::create(root.path(), "same", "code.py", "").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert!(root.path().join("same").exists());
    }

    #[test]
    fn test_missing_root_is_created() {
        let root = TempDir::new().unwrap();
        let nested = root.path().join("scratch").join("runs");
        let workspace = Workspace::create(&nested, "s1", "code.py", "").unwrap();
        assert!(workspace.source_path().exists());
    }
}
