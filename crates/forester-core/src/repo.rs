use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ignore::default_ignore_file;
use crate::index::Index;
use crate::oid::Oid;
use crate::util::{atomic_write, unix_now};

pub const REPO_DIR_NAME: &str = ".DFM";
pub const OBJECTS_DIR: &str = "objects";
pub const REFS_DIR: &str = "refs";
pub const BRANCHES_DIR: &str = "branches";
pub const TAGS_DIR: &str = "tags";
pub const HOOKS_DIR: &str = "hooks";
pub const STASH_DIR: &str = "stash";
pub const DB_FILE: &str = "forester.db";
pub const HEAD_FILE: &str = "HEAD";
pub const IGNORE_FILE: &str = ".dfmignore";
pub const METADATA_FILE: &str = "metadata.json";
pub const DEFAULT_BRANCH: &str = "main";

/// Handle to an initialized repository: the worktree root and its `.DFM`
/// control directory.
#[derive(Clone, Debug)]
pub struct Repo {
    worktree: PathBuf,
    repo_dir: PathBuf,
}

impl Repo {
    /// Create the `.DFM` layout under `worktree` and seed the metadata
    /// index with the default branch.
    pub fn init(worktree: impl AsRef<Path>, force: bool) -> Result<Self> {
        let root = worktree.as_ref();
        if !root.exists() {
            fs::create_dir_all(root)?;
        }

        let repo_dir = root.join(REPO_DIR_NAME);
        if repo_dir.exists() && !force {
            return Err(Error::AlreadyExists(format!(
                "repository at {}",
                repo_dir.display()
            )));
        }

        for kind in crate::object::ObjectKind::ALL {
            fs::create_dir_all(repo_dir.join(OBJECTS_DIR).join(kind.dir_name()))?;
        }
        fs::create_dir_all(repo_dir.join(REFS_DIR).join(BRANCHES_DIR))?;
        fs::create_dir_all(repo_dir.join(REFS_DIR).join(TAGS_DIR))?;
        fs::create_dir_all(repo_dir.join(HOOKS_DIR))?;
        fs::create_dir_all(repo_dir.join(STASH_DIR))?;

        let repo = Self {
            worktree: root.to_path_buf(),
            repo_dir,
        };

        let mut index = Index::open(&repo)?;
        index.set_branch_and_head(DEFAULT_BRANCH, None)?;
        crate::index::upsert_branch(index.conn(), DEFAULT_BRANCH, None)?;

        atomic_write(&repo.head_path(), format!("{DEFAULT_BRANCH}\n").as_bytes())?;
        // Empty ref file: the branch exists but has no commits yet.
        atomic_write(&repo.branch_ref_path(DEFAULT_BRANCH), b"")?;
        if !repo.ignore_path().exists() {
            atomic_write(&repo.ignore_path(), default_ignore_file().as_bytes())?;
        }
        RepoMetadata::initial().save(&repo)?;

        Ok(repo)
    }

    /// Open an existing repository. The control directory is enough; a
    /// missing index file is recoverable via rebuild.
    pub fn open(worktree: impl AsRef<Path>) -> Result<Self> {
        let root = worktree.as_ref();
        let repo_dir = root.join(REPO_DIR_NAME);
        if !repo_dir.is_dir() {
            return Err(Error::NotARepo(root.to_path_buf()));
        }
        Ok(Self {
            worktree: root.to_path_buf(),
            repo_dir,
        })
    }

    /// Walk up from `start` until a repository root is found.
    pub fn find(start: impl AsRef<Path>) -> Result<Self> {
        let start = start.as_ref();
        let mut current = start.canonicalize().unwrap_or_else(|_| start.to_path_buf());
        loop {
            if current.join(REPO_DIR_NAME).is_dir() {
                return Self::open(&current);
            }
            if !current.pop() {
                return Err(Error::NotARepo(start.to_path_buf()));
            }
        }
    }

    pub fn worktree(&self) -> &Path {
        &self.worktree
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    pub fn objects_dir(&self) -> PathBuf {
        self.repo_dir.join(OBJECTS_DIR)
    }

    pub fn branches_dir(&self) -> PathBuf {
        self.repo_dir.join(REFS_DIR).join(BRANCHES_DIR)
    }

    pub fn tags_dir(&self) -> PathBuf {
        self.repo_dir.join(REFS_DIR).join(TAGS_DIR)
    }

    pub fn branch_ref_path(&self, name: &str) -> PathBuf {
        self.branches_dir().join(name)
    }

    pub fn tag_ref_path(&self, name: &str) -> PathBuf {
        self.tags_dir().join(name)
    }

    pub fn hooks_dir(&self) -> PathBuf {
        self.repo_dir.join(HOOKS_DIR)
    }

    pub fn stash_dir(&self) -> PathBuf {
        self.repo_dir.join(STASH_DIR)
    }

    pub fn db_path(&self) -> PathBuf {
        self.repo_dir.join(DB_FILE)
    }

    pub fn head_path(&self) -> PathBuf {
        self.repo_dir.join(HEAD_FILE)
    }

    pub fn ignore_path(&self) -> PathBuf {
        self.repo_dir.join(IGNORE_FILE)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.repo_dir.join(METADATA_FILE)
    }
}

/// Explicit configuration threaded through every operation; replaces the
/// global mutable preferences of the original design.
#[derive(Clone, Debug)]
pub struct RepoConfig {
    /// Author recorded when the caller does not supply one.
    pub author: String,
    /// Seconds a hook may run before it is killed.
    pub hook_timeout_secs: u64,
    /// Retention count for mesh-only commits; `None` disables auto-compress.
    pub auto_compress_keep: Option<usize>,
    /// Default lifetime for new file locks, seconds. `None` means no expiry.
    pub lock_ttl_secs: Option<i64>,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            author: "unknown".to_string(),
            hook_timeout_secs: 30,
            auto_compress_keep: None,
            lock_ttl_secs: None,
        }
    }
}

/// Small mirror of the current branch and HEAD kept in `metadata.json`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RepoMetadata {
    pub version: String,
    pub created_at: i64,
    pub current_branch: String,
    pub head: Option<Oid>,
}

impl RepoMetadata {
    pub fn initial() -> Self {
        Self {
            version: "1.0".to_string(),
            created_at: unix_now(),
            current_branch: DEFAULT_BRANCH.to_string(),
            head: None,
        }
    }

    pub fn load(repo: &Repo) -> Result<Self> {
        let bytes = fs::read(repo.metadata_path())?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn save(&self, repo: &Repo) -> Result<()> {
        atomic_write(&repo.metadata_path(), &serde_json::to_vec_pretty(self)?)
    }

    /// Update the mirrored branch/head, falling back to a fresh file when
    /// the existing one is missing or unreadable.
    pub fn update(repo: &Repo, branch: &str, head: Option<Oid>) -> Result<()> {
        let mut meta = Self::load(repo).unwrap_or_else(|_| Self::initial());
        meta.current_branch = branch.to_string();
        meta.head = head;
        meta.save(repo)
    }
}
