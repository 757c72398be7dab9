use std::fs::File;
use std::path::Path;

use fs2::FileExt;

use crate::error::Result;

const LOCK_FILE: &str = "LOCK";

/// Guard for the repository-level advisory lock serializing commit
/// creation, checkout, branch mutation, stash apply, GC, and rebuild.
/// Readers never take it.
///
/// Dropping the guard closes the descriptor, which releases the lock.
pub struct RepoLock {
    _file: File,
}

impl RepoLock {
    /// Block until the exclusive lock is held.
    pub fn acquire(repo_dir: &Path) -> Result<Self> {
        let file = File::create(repo_dir.join(LOCK_FILE))?;
        file.lock_exclusive()?;
        Ok(Self { _file: file })
    }

    /// Non-blocking probe; `None` when another writer holds the lock.
    pub fn try_acquire(repo_dir: &Path) -> Result<Option<Self>> {
        let file = File::create(repo_dir.join(LOCK_FILE))?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { _file: file })),
            Err(err) if err.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_is_released_on_drop() {
        let temp = tempfile::tempdir().expect("tempdir");
        {
            let _lock = RepoLock::acquire(temp.path()).expect("first");
        }
        let _again = RepoLock::acquire(temp.path()).expect("second");
    }

    #[test]
    fn try_acquire_reports_free_lock() {
        let temp = tempfile::tempdir().expect("tempdir");
        let held = RepoLock::try_acquire(temp.path()).expect("probe");
        assert!(held.is_some());
        drop(held);
        assert!(RepoLock::try_acquire(temp.path()).expect("probe").is_some());
    }
}
