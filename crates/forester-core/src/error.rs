use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds surfaced by the core. Every public operation returns either
/// a typed success value or one of these.
#[derive(Debug, Error)]
pub enum Error {
    #[error("not a forester repository: {0}")]
    NotARepo(PathBuf),
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("unknown ref: {0}")]
    UnknownRef(String),
    #[error("working directory has uncommitted changes")]
    UncommittedChanges,
    #[error("files locked by another user: {}", .0.join(", "))]
    LockedFiles(Vec<String>),
    #[error("{hook} hook rejected the operation: {message}")]
    HookRejected { hook: String, message: String },
    #[error("{0} timed out")]
    Timeout(String),
    #[error("corrupt object {hash}: {detail}")]
    CorruptObject { hash: String, detail: String },
    #[error("invalid name '{0}'")]
    InvalidName(String),
    #[error("branch '{0}' is currently checked out")]
    BranchCheckedOut(String),
    #[error("cannot delete the only remaining branch '{0}'")]
    LastBranch(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("metadata index error: {0}")]
    Index(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl Error {
    pub fn corrupt(hash: impl ToString, detail: impl Into<String>) -> Self {
        Self::CorruptObject {
            hash: hash.to_string(),
            detail: detail.into(),
        }
    }
}
