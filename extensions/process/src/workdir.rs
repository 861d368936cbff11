use crate::error::ProcessError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// A scratch directory owned by one walk, e.g. a server's data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingDirectory {
    path: PathBuf,
}

impl WorkingDirectory {
    /// Create a fresh, uniquely named directory below `parent`.
    pub fn create_in(parent: &Path) -> Result<Self, ProcessError> {
        let path = parent.join(format!("rewind-{}", Uuid::new_v4().simple()));
        std::fs::create_dir_all(&path)?;
        tracing::debug!(path = %path.display(), "working directory created");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the directory and its contents. Already gone is fine.
    pub fn remove(&self) -> Result<(), ProcessError> {
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "working directory removed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_remove() {
        let parent = tempfile::tempdir().unwrap();
        let first = WorkingDirectory::create_in(parent.path()).unwrap();
        let second = WorkingDirectory::create_in(parent.path()).unwrap();
        assert_ne!(first, second);
        assert!(first.path().is_dir());

        std::fs::write(first.path().join("mongod.lock"), "1").unwrap();
        first.remove().unwrap();
        assert!(!first.path().exists());
        first.remove().unwrap();
    }
}
