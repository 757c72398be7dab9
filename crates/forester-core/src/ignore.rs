use std::path::{Component, Path, PathBuf};

use ignore::gitignore::{Gitignore, GitignoreBuilder};

use crate::error::{Error, Result};
use crate::repo::{Repo, REPO_DIR_NAME};

/// Decides which working-directory paths participate in commits, driven by
/// the gitignore-style rules in `.DFM/.dfmignore`. The `.DFM` directory
/// itself is always excluded.
pub struct IgnoreFilter {
    root: PathBuf,
    gitignore: Gitignore,
}

impl IgnoreFilter {
    pub fn load(repo: &Repo) -> Result<Self> {
        let root = repo.worktree().to_path_buf();
        let mut builder = GitignoreBuilder::new(&root);
        builder.add(repo.ignore_path());
        let gitignore = builder
            .build()
            .map_err(|err| Error::corrupt("ignore", err.to_string()))?;
        Ok(Self { root, gitignore })
    }

    pub fn is_ignored(&self, path: &Path, is_dir: bool) -> bool {
        if let Ok(rel) = path.strip_prefix(&self.root) {
            if contains_repo_dir(rel) {
                return true;
            }
            self.gitignore.matched(rel, is_dir).is_ignore()
        } else {
            false
        }
    }
}

fn contains_repo_dir(path: &Path) -> bool {
    path.components().any(|component| {
        matches!(
            component,
            Component::Normal(name) if name == REPO_DIR_NAME
        )
    })
}

/// Default `.dfmignore` contents written at init.
pub fn default_ignore_file() -> String {
    [
        "# Forester ignore rules",
        "# Lines starting with # are comments",
        "",
        "# Scene backup files",
        "*.blend1",
        "*.blend2",
        "",
        "# OS litter",
        ".DS_Store",
        "Thumbs.db",
        "desktop.ini",
        "",
        "# Temporary files",
        "*.tmp",
        "*.swp",
        "*~",
        "",
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn repo_dir_always_ignored() {
        let temp = tempfile::tempdir().expect("tempdir");
        let repo = Repo::init(temp.path(), false).expect("init");
        let filter = IgnoreFilter::load(&repo).expect("load");
        assert!(filter.is_ignored(&temp.path().join(".DFM"), true));
        assert!(filter.is_ignored(&temp.path().join(".DFM/forester.db"), false));
        assert!(!filter.is_ignored(&temp.path().join("scene.txt"), false));
    }

    #[test]
    fn custom_rules_apply() {
        let temp = tempfile::tempdir().expect("tempdir");
        let repo = Repo::init(temp.path(), false).expect("init");
        fs::write(
            repo.ignore_path(),
            "*.log\n/renders/\n!keep.log\ncache-?\n",
        )
        .expect("write rules");
        let filter = IgnoreFilter::load(&repo).expect("load");

        assert!(filter.is_ignored(&temp.path().join("debug.log"), false));
        assert!(filter.is_ignored(&temp.path().join("sub/debug.log"), false));
        assert!(!filter.is_ignored(&temp.path().join("keep.log"), false));
        assert!(filter.is_ignored(&temp.path().join("renders"), true));
        assert!(filter.is_ignored(&temp.path().join("cache-1"), false));
        assert!(!filter.is_ignored(&temp.path().join("cache-10"), false));
    }

    #[test]
    fn default_rules_skip_backups() {
        let temp = tempfile::tempdir().expect("tempdir");
        let repo = Repo::init(temp.path(), false).expect("init");
        let filter = IgnoreFilter::load(&repo).expect("load");
        assert!(filter.is_ignored(&temp.path().join("scene.blend1"), false));
        assert!(filter.is_ignored(&temp.path().join(".DS_Store"), false));
        assert!(!filter.is_ignored(&temp.path().join("scene.blend"), false));
    }
}
