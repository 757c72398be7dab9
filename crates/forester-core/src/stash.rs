use std::fs;

use tracing::info;

use crate::checkout::restore_worktree;
use crate::commit::working_tree_differs;
use crate::error::{Error, Result};
use crate::ignore::IgnoreFilter;
use crate::index::{self, Index, StashRow};
use crate::lock::RepoLock;
use crate::object::{CommitRecord, CommitType};
use crate::oid::Oid;
use crate::repo::{Repo, RepoConfig};
use crate::store::ObjectStore;
use crate::tree::build_worktree_tree;
use crate::util::{atomic_write, unix_now};

/// Snapshot the dirty working set into a commit-shaped record outside any
/// branch history, then restore the branch tip state. Returns `Ok(None)`
/// when there is nothing to stash.
pub fn stash_changes(
    repo: &Repo,
    config: &RepoConfig,
    message: Option<&str>,
) -> Result<Option<Oid>> {
    let _guard = RepoLock::acquire(repo.repo_dir())?;
    let mut index = Index::open(repo)?;
    let store = ObjectStore::new(repo);
    let ignore = IgnoreFilter::load(repo)?;

    let branch = index.current_branch()?;
    let tip = index.get_branch_tip(&branch)?.flatten();
    let tip_tree = match tip {
        Some(tip) => Some(
            index
                .get_commit(&tip)?
                .ok_or_else(|| Error::UnknownRef(tip.to_hex()))?
                .tree_hash,
        ),
        None => None,
    };

    let build = build_worktree_tree(repo, &store, &ignore)?;
    let clean = match tip_tree {
        Some(tree) => tree == build.root,
        None => build.files.is_empty() && build.meshes.is_empty(),
    };
    if clean {
        return Ok(None);
    }

    let timestamp = unix_now();
    let message = message
        .map(str::to_string)
        .unwrap_or_else(|| format!("WIP on {branch}"));
    let record = CommitRecord {
        author: config.author.clone(),
        branch: branch.clone(),
        commit_type: CommitType::Project,
        mesh_hashes: build.meshes.iter().map(|(hash, _)| *hash).collect(),
        message: message.clone(),
        parent: None,
        timestamp,
        tree_hash: build.root,
    };
    let bytes = record.encode()?;
    let hash = record.hash()?;
    atomic_write(&repo.stash_dir().join(hash.to_hex()), &bytes)?;

    let tx = index.transaction()?;
    index::insert_stash(
        &tx,
        &StashRow {
            hash,
            branch: branch.clone(),
            timestamp,
            message,
            tree_hash: build.root,
        },
    )?;
    for (tree_hash, tree) in &build.trees {
        index::insert_tree_entries(&tx, tree_hash, tree)?;
    }
    tx.commit()?;
    index.checkpoint();

    // Back to the tip state; the dirty snapshot lives on in the stash.
    restore_worktree(repo, &store, tip_tree.as_ref())?;
    info!(%hash, %branch, "stashed working set");
    Ok(Some(hash))
}

/// Materialize a stash's tree over the working directory, guarded against
/// uncommitted changes unless forced.
pub fn apply_stash(repo: &Repo, hash: &Oid, force: bool) -> Result<()> {
    let _guard = RepoLock::acquire(repo.repo_dir())?;
    let index = Index::open(repo)?;
    let store = ObjectStore::new(repo);

    let row = index
        .get_stash(hash)?
        .ok_or_else(|| Error::UnknownRef(hash.to_hex()))?;
    if !force && working_tree_differs(repo, &index, &store)? {
        return Err(Error::UncommittedChanges);
    }
    restore_worktree(repo, &store, Some(&row.tree_hash))?;
    info!(%hash, "applied stash");
    Ok(())
}

/// Remove the stash record; its objects become GC-eligible once nothing
/// else reaches them.
pub fn delete_stash(repo: &Repo, hash: &Oid) -> Result<()> {
    let _guard = RepoLock::acquire(repo.repo_dir())?;
    let mut index = Index::open(repo)?;
    if index.get_stash(hash)?.is_none() {
        return Err(Error::UnknownRef(hash.to_hex()));
    }
    let tx = index.transaction()?;
    index::delete_stash_row(&tx, hash)?;
    tx.commit()?;
    let _ = fs::remove_file(repo.stash_dir().join(hash.to_hex()));
    index.checkpoint();
    Ok(())
}

pub fn list_stashes(repo: &Repo) -> Result<Vec<StashRow>> {
    let index = Index::open(repo)?;
    index.list_stashes()
}

/// Load the commit-shaped record backing a stash, if its file survives.
pub fn load_stash_record(repo: &Repo, hash: &Oid) -> Result<Option<CommitRecord>> {
    let path = repo.stash_dir().join(hash.to_hex());
    match fs::read(&path) {
        Ok(bytes) => Ok(Some(CommitRecord::decode(&bytes)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::{commit, CommitOptions};

    fn setup() -> (tempfile::TempDir, Repo, RepoConfig) {
        let temp = tempfile::tempdir().expect("tempdir");
        let repo = Repo::init(temp.path(), false).expect("init");
        (temp, repo, RepoConfig::default())
    }

    #[test]
    fn stash_round_trip_restores_dirty_state() {
        let (temp, repo, config) = setup();
        fs::write(temp.path().join("a.txt"), b"clean").expect("write");
        commit(&repo, &config, "base", "alice", &CommitOptions::default())
            .expect("commit")
            .expect("created");

        fs::write(temp.path().join("a.txt"), b"dirty edits").expect("write");
        let stash = stash_changes(&repo, &config, Some("wip"))
            .expect("stash")
            .expect("created");

        // The working directory is back at the tip state.
        assert_eq!(fs::read(temp.path().join("a.txt")).expect("read"), b"clean");

        apply_stash(&repo, &stash, true).expect("apply");
        assert_eq!(
            fs::read(temp.path().join("a.txt")).expect("read"),
            b"dirty edits"
        );
    }

    #[test]
    fn clean_worktree_yields_no_stash() {
        let (temp, repo, config) = setup();
        fs::write(temp.path().join("a.txt"), b"clean").expect("write");
        commit(&repo, &config, "base", "alice", &CommitOptions::default())
            .expect("commit")
            .expect("created");
        assert_eq!(stash_changes(&repo, &config, None).expect("stash"), None);
    }

    #[test]
    fn stash_record_is_commit_shaped_without_parent() {
        let (temp, repo, config) = setup();
        fs::write(temp.path().join("a.txt"), b"data").expect("write");
        let stash = stash_changes(&repo, &config, Some("wip"))
            .expect("stash")
            .expect("created");

        let record = load_stash_record(&repo, &stash)
            .expect("load")
            .expect("file present");
        assert_eq!(record.parent, None);
        assert_eq!(record.message, "wip");
        assert_eq!(record.hash().expect("hash"), stash);

        let rows = list_stashes(&repo).expect("list");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].hash, stash);
        // No branch ref was advanced.
        assert_eq!(crate::refs::read_branch_ref(&repo, "main").expect("ref"), None);
    }

    #[test]
    fn apply_guards_against_dirty_worktree() {
        let (temp, repo, config) = setup();
        fs::write(temp.path().join("a.txt"), b"v1").expect("write");
        commit(&repo, &config, "base", "alice", &CommitOptions::default())
            .expect("commit")
            .expect("created");
        fs::write(temp.path().join("a.txt"), b"v2").expect("write");
        let stash = stash_changes(&repo, &config, None)
            .expect("stash")
            .expect("created");

        fs::write(temp.path().join("a.txt"), b"v3 uncommitted").expect("write");
        let err = apply_stash(&repo, &stash, false).expect_err("dirty");
        assert!(matches!(err, Error::UncommittedChanges));
    }

    #[test]
    fn delete_removes_row_and_file() {
        let (temp, repo, config) = setup();
        fs::write(temp.path().join("a.txt"), b"data").expect("write");
        let stash = stash_changes(&repo, &config, None)
            .expect("stash")
            .expect("created");

        delete_stash(&repo, &stash).expect("delete");
        assert!(list_stashes(&repo).expect("list").is_empty());
        assert!(load_stash_record(&repo, &stash).expect("load").is_none());
        assert!(matches!(
            delete_stash(&repo, &stash),
            Err(Error::UnknownRef(_))
        ));
    }
}
