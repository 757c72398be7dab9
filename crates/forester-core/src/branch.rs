use std::fs;

use tracing::info;

use crate::error::{Error, Result};
use crate::index::{self, Index};
use crate::lock::RepoLock;
use crate::oid::Oid;
use crate::refs::{self, Head};
use crate::repo::{Repo, RepoMetadata};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BranchInfo {
    pub name: String,
    pub tip: Option<Oid>,
    pub commit_count: u64,
    pub current: bool,
}

/// Create a branch pointing at `from`'s tip (or the current branch tip).
pub fn create(repo: &Repo, name: &str, from: Option<&str>) -> Result<()> {
    validate_name(name)?;
    let _guard = RepoLock::acquire(repo.repo_dir())?;
    let mut index = Index::open(repo)?;

    if index.get_branch_tip(name)?.is_some() || refs::branch_ref_exists(repo, name) {
        return Err(Error::AlreadyExists(format!("branch '{name}'")));
    }

    let source = match from {
        Some(other) => other.to_string(),
        None => index.current_branch()?,
    };
    let tip = index
        .get_branch_tip(&source)?
        .ok_or_else(|| Error::UnknownRef(source.clone()))?;

    let tx = index.transaction()?;
    index::upsert_branch(&tx, name, tip)?;
    tx.commit()?;
    refs::write_branch_ref(repo, name, tip.as_ref())?;
    index.checkpoint();
    info!(branch = name, from = %source, "created branch");
    Ok(())
}

/// Switch HEAD to `name`. The working directory is untouched; callers
/// combine this with checkout for the Git-style effect.
pub fn switch(repo: &Repo, name: &str) -> Result<()> {
    let _guard = RepoLock::acquire(repo.repo_dir())?;
    let mut index = Index::open(repo)?;
    let tip = index
        .get_branch_tip(name)?
        .ok_or_else(|| Error::UnknownRef(name.to_string()))?;

    index.set_branch_and_head(name, tip)?;
    refs::write_head(repo, &Head::Branch(name.to_string()))?;
    RepoMetadata::update(repo, name, tip)?;
    info!(branch = name, "switched branch");
    Ok(())
}

/// Rename a branch ref. Existing commit rows keep the name the branch had
/// when they were created.
pub fn rename(repo: &Repo, old: &str, new: &str) -> Result<()> {
    validate_name(new)?;
    let _guard = RepoLock::acquire(repo.repo_dir())?;
    let mut index = Index::open(repo)?;

    let tip = index
        .get_branch_tip(old)?
        .ok_or_else(|| Error::UnknownRef(old.to_string()))?;
    if index.get_branch_tip(new)?.is_some() || refs::branch_ref_exists(repo, new) {
        return Err(Error::AlreadyExists(format!("branch '{new}'")));
    }

    let current = index.current_branch()?;
    let tx = index.transaction()?;
    index::rename_branch_row(&tx, old, new)?;
    if current == old {
        index::set_meta(&tx, "current_branch", new)?;
    }
    tx.commit()?;

    refs::write_branch_ref(repo, new, tip.as_ref())?;
    let _ = fs::remove_file(repo.branch_ref_path(old));
    if current == old {
        refs::write_head(repo, &Head::Branch(new.to_string()))?;
        RepoMetadata::update(repo, new, tip)?;
    }
    index.checkpoint();
    info!(old, new, "renamed branch");
    Ok(())
}

/// Delete a branch ref. Fails when `name` is checked out (unless `force`)
/// or is the only branch left. Objects are never deleted here; GC is the
/// only deleter of objects.
pub fn delete(repo: &Repo, name: &str, force: bool) -> Result<()> {
    let _guard = RepoLock::acquire(repo.repo_dir())?;
    let mut index = Index::open(repo)?;

    if index.get_branch_tip(name)?.is_none() && !refs::branch_ref_exists(repo, name) {
        return Err(Error::UnknownRef(name.to_string()));
    }
    let branches = index.list_branches()?;
    if branches.len() <= 1 {
        return Err(Error::LastBranch(name.to_string()));
    }
    let current = index.current_branch()?;
    if current == name && !force {
        return Err(Error::BranchCheckedOut(name.to_string()));
    }

    let fallback = branches
        .iter()
        .map(|(branch, _)| branch.clone())
        .find(|branch| branch != name);

    let tx = index.transaction()?;
    index::delete_branch_row(&tx, name)?;
    if current == name {
        if let Some(fallback) = &fallback {
            index::set_meta(&tx, "current_branch", fallback)?;
        }
    }
    tx.commit()?;

    refs::delete_branch_ref(repo, name)?;
    if current == name {
        if let Some(fallback) = fallback {
            let tip = index.get_branch_tip(&fallback)?.flatten();
            refs::write_head(repo, &Head::Branch(fallback.clone()))?;
            RepoMetadata::update(repo, &fallback, tip)?;
        }
    }
    index.checkpoint();
    info!(branch = name, "deleted branch");
    Ok(())
}

pub fn list(repo: &Repo) -> Result<Vec<BranchInfo>> {
    let index = Index::open(repo)?;
    let current = index.current_branch()?;
    let mut out = Vec::new();
    for (name, tip) in index.list_branches()? {
        let commit_count = index.commit_count(&name)?;
        out.push(BranchInfo {
            current: name == current,
            name,
            tip,
            commit_count,
        });
    }
    Ok(out)
}

/// Branch names: non-empty after trimming, no control characters, no path
/// separators, no leading slash, not whitespace-only.
pub fn validate_name(name: &str) -> Result<()> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed != name {
        return Err(Error::InvalidName(name.to_string()));
    }
    if name.starts_with('/') || name.contains('/') || name.contains('\\') {
        return Err(Error::InvalidName(name.to_string()));
    }
    if name.chars().any(|c| c.is_control()) {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::{commit, CommitOptions};
    use crate::repo::RepoConfig;

    fn setup_with_commit() -> (tempfile::TempDir, Repo, Oid) {
        let temp = tempfile::tempdir().expect("tempdir");
        let repo = Repo::init(temp.path(), false).expect("init");
        std::fs::write(temp.path().join("a.txt"), b"base").expect("write");
        let hash = commit(
            &repo,
            &RepoConfig::default(),
            "base",
            "alice",
            &CommitOptions::default(),
        )
        .expect("commit")
        .expect("created");
        (temp, repo, hash)
    }

    #[test]
    fn create_points_at_source_tip() {
        let (_temp, repo, tip) = setup_with_commit();
        create(&repo, "feature", None).expect("create");

        let branches = list(&repo).expect("list");
        let feature = branches.iter().find(|b| b.name == "feature").expect("row");
        assert_eq!(feature.tip, Some(tip));
        assert!(!feature.current);
        assert_eq!(
            refs::read_branch_ref(&repo, "feature").expect("ref"),
            Some(tip)
        );

        let err = create(&repo, "feature", None).expect_err("duplicate");
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[test]
    fn name_validation_rejects_bad_names() {
        for bad in ["", "  ", "a/b", "/lead", "back\\slash", "ctl\u{7}", " pad"] {
            assert!(validate_name(bad).is_err(), "accepted {bad:?}");
        }
        validate_name("feature-1.2_ok").expect("valid");
    }

    #[test]
    fn switch_updates_head_only() {
        let (temp, repo, _tip) = setup_with_commit();
        create(&repo, "dev", None).expect("create");
        std::fs::write(temp.path().join("a.txt"), b"untouched edit").expect("write");

        switch(&repo, "dev").expect("switch");
        let index = Index::open(&repo).expect("index");
        assert_eq!(index.current_branch().expect("branch"), "dev");
        assert_eq!(
            refs::read_head(&repo).expect("head"),
            Head::Branch("dev".into())
        );
        // Working directory untouched.
        assert_eq!(
            std::fs::read(temp.path().join("a.txt")).expect("read"),
            b"untouched edit"
        );
        // Second switch is not a no-op trap: reads come fresh from the
        // index every time.
        switch(&repo, "main").expect("switch back");
        switch(&repo, "dev").expect("switch again");
        let index = Index::open(&repo).expect("index");
        assert_eq!(index.current_branch().expect("branch"), "dev");
    }

    #[test]
    fn delete_guards_current_and_last() {
        let (_temp, repo, _tip) = setup_with_commit();
        assert!(matches!(
            delete(&repo, "main", true),
            Err(Error::LastBranch(_))
        ));

        create(&repo, "dev", None).expect("create");
        assert!(matches!(
            delete(&repo, "main", false),
            Err(Error::BranchCheckedOut(_))
        ));
        delete(&repo, "main", true).expect("force delete");
        let index = Index::open(&repo).expect("index");
        assert_eq!(index.current_branch().expect("branch"), "dev");
        assert!(!refs::branch_ref_exists(&repo, "main"));
    }

    #[test]
    fn rename_moves_ref_and_current_pointer() {
        let (_temp, repo, tip) = setup_with_commit();
        rename(&repo, "main", "trunk").expect("rename");
        assert!(!refs::branch_ref_exists(&repo, "main"));
        assert_eq!(
            refs::read_branch_ref(&repo, "trunk").expect("ref"),
            Some(tip)
        );
        let index = Index::open(&repo).expect("index");
        assert_eq!(index.current_branch().expect("branch"), "trunk");
    }
}
