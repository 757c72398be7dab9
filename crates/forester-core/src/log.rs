use std::collections::HashMap;

use crate::checkout::flatten_tree;
use crate::error::{Error, Result};
use crate::ignore::IgnoreFilter;
use crate::index::{CommitFileRow, CommitRow, Index};
use crate::object::TreeEntryKind;
use crate::oid::Oid;
use crate::repo::Repo;
use crate::store::ObjectStore;
use crate::tree::build_worktree_tree;

/// Walk the parent chain from a branch tip, newest first. `None` uses the
/// current branch. The parent chain is the authoritative ordering.
pub fn log(repo: &Repo, branch: Option<&str>, limit: Option<usize>) -> Result<Vec<CommitRow>> {
    let index = Index::open(repo)?;
    let branch = match branch {
        Some(name) => name.to_string(),
        None => index.current_branch()?,
    };
    let tip = index
        .get_branch_tip(&branch)?
        .ok_or_else(|| Error::UnknownRef(branch.clone()))?;

    let mut out = Vec::new();
    let mut current = tip;
    let max = limit.unwrap_or(usize::MAX);
    while let Some(hash) = current {
        if out.len() >= max {
            break;
        }
        let Some(row) = index.get_commit(&hash)? else {
            break;
        };
        current = row.parent;
        out.push(row);
    }
    Ok(out)
}

pub struct CommitDetail {
    pub row: CommitRow,
    pub files: Vec<CommitFileRow>,
    pub mesh_names: Vec<String>,
}

/// Look up one commit by full or abbreviated hash, with its file list and
/// mesh names.
pub fn show(repo: &Repo, target: &str) -> Result<CommitDetail> {
    let index = Index::open(repo)?;
    let hash = match Oid::from_hex(target) {
        Some(oid) => oid,
        None => index
            .find_commit_by_prefix(target)?
            .ok_or_else(|| Error::UnknownRef(target.to_string()))?,
    };
    let row = index
        .get_commit(&hash)?
        .ok_or_else(|| Error::UnknownRef(target.to_string()))?;
    let files = index.files_for_commit(&hash)?;
    let mut mesh_names = Vec::new();
    for mesh in &row.mesh_hashes {
        if let Some(name) = index.mesh_name(mesh)? {
            mesh_names.push(name);
        }
    }
    Ok(CommitDetail {
        row,
        files,
        mesh_names,
    })
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatusReport {
    pub branch: String,
    pub head: Option<Oid>,
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
}

impl StatusReport {
    pub fn is_clean(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// Compare the working set against the current branch tip.
pub fn status(repo: &Repo) -> Result<StatusReport> {
    let index = Index::open(repo)?;
    let store = ObjectStore::new(repo);
    let ignore = IgnoreFilter::load(repo)?;

    let branch = index.current_branch()?;
    let head = index.get_branch_tip(&branch)?.flatten();

    let build = build_worktree_tree(repo, &store, &ignore)?;
    let working = flatten_tree(&store, &build.root)?;
    let committed: HashMap<String, (TreeEntryKind, Oid)> = match head {
        Some(tip) => {
            let row = index
                .get_commit(&tip)?
                .ok_or_else(|| Error::UnknownRef(tip.to_hex()))?;
            flatten_tree(&store, &row.tree_hash)?
        }
        None => HashMap::new(),
    };

    let mut report = StatusReport {
        branch,
        head,
        ..StatusReport::default()
    };
    for (path, (_, hash)) in &working {
        match committed.get(path) {
            None => report.added.push(path.clone()),
            Some((_, committed_hash)) if committed_hash != hash => {
                report.modified.push(path.clone());
            }
            Some(_) => {}
        }
    }
    for path in committed.keys() {
        if !working.contains_key(path) {
            report.deleted.push(path.clone());
        }
    }
    report.added.sort();
    report.modified.sort();
    report.deleted.sort();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::{commit, CommitOptions};
    use crate::repo::RepoConfig;
    use std::fs;

    fn setup() -> (tempfile::TempDir, Repo, RepoConfig) {
        let temp = tempfile::tempdir().expect("tempdir");
        let repo = Repo::init(temp.path(), false).expect("init");
        (temp, repo, RepoConfig::default())
    }

    #[test]
    fn log_walks_parent_chain_newest_first() {
        let (temp, repo, config) = setup();
        let mut hashes = Vec::new();
        for n in 0..3 {
            fs::write(temp.path().join("a.txt"), format!("rev {n}")).expect("write");
            hashes.push(
                commit(&repo, &config, &format!("c{n}"), "alice", &CommitOptions::default())
                    .expect("commit")
                    .expect("created"),
            );
        }

        let entries = log(&repo, None, None).expect("log");
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].hash, hashes[2]);
        assert_eq!(entries[2].hash, hashes[0]);
        assert_eq!(log(&repo, Some("main"), Some(2)).expect("log").len(), 2);
        assert!(matches!(
            log(&repo, Some("ghost"), None),
            Err(Error::UnknownRef(_))
        ));
    }

    #[test]
    fn show_reports_files() {
        let (temp, repo, config) = setup();
        fs::write(temp.path().join("a.txt"), b"hello").expect("write");
        let hash = commit(&repo, &config, "first", "alice", &CommitOptions::default())
            .expect("commit")
            .expect("created");

        let detail = show(&repo, &hash.to_hex()[..10]).expect("show");
        assert_eq!(detail.row.message, "first");
        assert_eq!(detail.files.len(), 1);
        assert_eq!(detail.files[0].path, "a.txt");
        assert_eq!(detail.files[0].size, 5);
    }

    #[test]
    fn status_classifies_changes() {
        let (temp, repo, config) = setup();
        fs::write(temp.path().join("keep.txt"), b"same").expect("write");
        fs::write(temp.path().join("edit.txt"), b"before").expect("write");
        fs::write(temp.path().join("gone.txt"), b"bye").expect("write");
        commit(&repo, &config, "base", "alice", &CommitOptions::default())
            .expect("commit")
            .expect("created");

        fs::write(temp.path().join("edit.txt"), b"after").expect("write");
        fs::remove_file(temp.path().join("gone.txt")).expect("rm");
        fs::write(temp.path().join("new.txt"), b"hello").expect("write");

        let report = status(&repo).expect("status");
        assert_eq!(report.branch, "main");
        assert_eq!(report.added, vec!["new.txt"]);
        assert_eq!(report.modified, vec!["edit.txt"]);
        assert_eq!(report.deleted, vec!["gone.txt"]);
        assert!(!report.is_clean());
    }

    #[test]
    fn status_on_fresh_repo_is_clean() {
        let (_temp, repo, _config) = setup();
        let report = status(&repo).expect("status");
        assert!(report.is_clean());
        assert_eq!(report.head, None);
    }
}
