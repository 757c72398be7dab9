use crate::branch::validate_name;
use crate::checkout::resolve_target;
use crate::error::{Error, Result};
use crate::index::{CommitRow, Index};
use crate::lock::RepoLock;
use crate::oid::Oid;
use crate::refs;
use crate::repo::Repo;

/// Tag a commit with a lightweight `refs/tags/<name>` file. With no target,
/// the current HEAD commit is tagged.
pub fn create(repo: &Repo, name: &str, target: Option<&str>) -> Result<()> {
    validate_name(name)?;
    let _guard = RepoLock::acquire(repo.repo_dir())?;
    let index = Index::open(repo)?;

    if refs::read_tag_ref(repo, name)?.is_some() {
        return Err(Error::AlreadyExists(format!("tag '{name}'")));
    }
    let commit = match target {
        Some(target) => resolve_target(repo, &index, target)?.0,
        None => index
            .head_commit()?
            .ok_or_else(|| Error::UnknownRef("HEAD".to_string()))?,
    };
    if index.get_commit(&commit)?.is_none() {
        return Err(Error::UnknownRef(commit.to_hex()));
    }
    refs::write_tag_ref(repo, name, &commit)
}

pub fn delete(repo: &Repo, name: &str) -> Result<()> {
    let _guard = RepoLock::acquire(repo.repo_dir())?;
    if refs::read_tag_ref(repo, name)?.is_none() {
        return Err(Error::UnknownRef(format!("tag '{name}'")));
    }
    refs::delete_tag_ref(repo, name)
}

pub fn list(repo: &Repo) -> Result<Vec<(String, Oid)>> {
    Ok(refs::list_ref_dir(&repo.tags_dir())?
        .into_iter()
        .filter_map(|(name, tip)| tip.map(|tip| (name, tip)))
        .collect())
}

/// The commit a tag points at, with its metadata row.
pub fn show(repo: &Repo, name: &str) -> Result<CommitRow> {
    let target =
        refs::read_tag_ref(repo, name)?.ok_or_else(|| Error::UnknownRef(format!("tag '{name}'")))?;
    let index = Index::open(repo)?;
    index
        .get_commit(&target)?
        .ok_or_else(|| Error::UnknownRef(target.to_hex()))
}
