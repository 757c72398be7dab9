use std::collections::HashMap;
use std::fs;
use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, info};

use crate::commit::working_tree_differs;
use crate::error::{Error, Result};
use crate::hash::hash_file;
use crate::hooks;
use crate::ignore::IgnoreFilter;
use crate::index::Index;
use crate::lock::RepoLock;
use crate::object::{ObjectKind, Tree, TreeEntryKind};
use crate::oid::Oid;
use crate::refs::{self, Head};
use crate::repo::{Repo, RepoConfig, RepoMetadata};
use crate::scan::scan_worktree;
use crate::store::ObjectStore;

#[derive(Clone, Debug, Default)]
pub struct CheckoutOptions {
    /// Discard uncommitted changes instead of failing.
    pub force: bool,
    /// Skip the pre-checkout hook.
    pub no_verify: bool,
    /// Materialize only tree entries whose path matches one of these globs.
    pub file_patterns: Option<Vec<String>>,
    /// Materialize only mesh entries with one of these object names.
    pub mesh_names: Option<Vec<String>>,
}

impl CheckoutOptions {
    fn is_selective(&self) -> bool {
        self.file_patterns.is_some() || self.mesh_names.is_some()
    }
}

/// Reconstruct the working directory from `target`, which resolves first as
/// a branch name, then a tag, then a (possibly abbreviated) commit hash.
pub fn checkout(repo: &Repo, config: &RepoConfig, target: &str, opts: &CheckoutOptions) -> Result<()> {
    let _guard = RepoLock::acquire(repo.repo_dir())?;
    let mut index = Index::open(repo)?;
    let store = ObjectStore::new(repo);

    let (commit_hash, branch) = resolve_target(repo, &index, target)?;

    if !opts.force && working_tree_differs(repo, &index, &store)? {
        return Err(Error::UncommittedChanges);
    }

    if !opts.no_verify {
        hooks::run_pre_hook(
            repo,
            hooks::PRE_CHECKOUT,
            &[("DFM_TARGET", target)],
            config.hook_timeout_secs,
        )?;
    }

    let row = index
        .get_commit(&commit_hash)?
        .ok_or_else(|| Error::UnknownRef(commit_hash.to_hex()))?;
    let entries = flatten_tree(&store, &row.tree_hash)?;

    let filter = EntryFilter::new(opts)?;
    materialize(repo, &store, &entries, &filter)?;
    if !opts.is_selective() {
        remove_untracked(repo, &entries)?;
    }

    match &branch {
        Some(name) => {
            index.set_branch_and_head(name, Some(commit_hash))?;
            refs::write_head(repo, &Head::Branch(name.clone()))?;
            RepoMetadata::update(repo, name, Some(commit_hash))?;
        }
        None => {
            let current = index.current_branch()?;
            let tx = index.transaction()?;
            crate::index::set_head_meta(&tx, Some(commit_hash))?;
            tx.commit()?;
            index.checkpoint();
            refs::write_head(repo, &Head::Detached(commit_hash))?;
            RepoMetadata::update(repo, &current, Some(commit_hash))?;
        }
    }

    hooks::run_post_hook(
        repo,
        hooks::POST_CHECKOUT,
        &[("DFM_TARGET", target)],
        config.hook_timeout_secs,
    );

    info!(target, %commit_hash, detached = branch.is_none(), "checkout complete");
    Ok(())
}

/// Resolve a checkout target to `(commit, branch-name-if-branch)`.
pub fn resolve_target(repo: &Repo, index: &Index, target: &str) -> Result<(Oid, Option<String>)> {
    if let Some(tip) = index.get_branch_tip(target)? {
        let tip = tip.ok_or_else(|| Error::UnknownRef(format!("branch '{target}' has no commits")))?;
        return Ok((tip, Some(target.to_string())));
    }
    if let Some(tagged) = refs::read_tag_ref(repo, target)? {
        return Ok((tagged, None));
    }
    if let Some(oid) = Oid::from_hex(target) {
        if index.get_commit(&oid)?.is_some() {
            return Ok((oid, None));
        }
        return Err(Error::UnknownRef(target.to_string()));
    }
    if let Some(oid) = index.find_commit_by_prefix(target)? {
        return Ok((oid, None));
    }
    Err(Error::UnknownRef(target.to_string()))
}

/// Flatten a tree DAG into `path -> (kind, hash)` with `/`-joined paths.
pub fn flatten_tree(
    store: &ObjectStore,
    root: &Oid,
) -> Result<HashMap<String, (TreeEntryKind, Oid)>> {
    let mut out = HashMap::new();
    collect(store, root, String::new(), &mut out)?;
    Ok(out)
}

fn collect(
    store: &ObjectStore,
    tree_hash: &Oid,
    prefix: String,
    out: &mut HashMap<String, (TreeEntryKind, Oid)>,
) -> Result<()> {
    let bytes = store.get_required(ObjectKind::Tree, tree_hash)?;
    let tree = Tree::decode(&bytes)?;
    for entry in tree.entries {
        let path = if prefix.is_empty() {
            entry.name.clone()
        } else {
            format!("{prefix}/{}", entry.name)
        };
        match entry.kind {
            TreeEntryKind::Tree => collect(store, &entry.hash, path, out)?,
            kind => {
                out.insert(path, (kind, entry.hash));
            }
        }
    }
    Ok(())
}

/// Full (non-selective) restore of a tree into the working directory:
/// materialize everything and drop files the tree does not carry. `None`
/// restores the empty state.
pub(crate) fn restore_worktree(repo: &Repo, store: &ObjectStore, root: Option<&Oid>) -> Result<()> {
    let entries = match root {
        Some(root) => flatten_tree(store, root)?,
        None => HashMap::new(),
    };
    let filter = EntryFilter::new(&CheckoutOptions::default())?;
    materialize(repo, store, &entries, &filter)?;
    remove_untracked(repo, &entries)
}

struct EntryFilter {
    globs: Option<GlobSet>,
    mesh_names: Option<Vec<String>>,
    selective: bool,
}

impl EntryFilter {
    fn new(opts: &CheckoutOptions) -> Result<Self> {
        let globs = match &opts.file_patterns {
            Some(patterns) => {
                let mut builder = GlobSetBuilder::new();
                for pattern in patterns {
                    let glob = Glob::new(pattern)
                        .map_err(|err| Error::InvalidName(format!("{pattern}: {err}")))?;
                    builder.add(glob);
                }
                Some(
                    builder
                        .build()
                        .map_err(|err| Error::InvalidName(err.to_string()))?,
                )
            }
            None => None,
        };
        Ok(Self {
            globs,
            mesh_names: opts.mesh_names.clone(),
            selective: opts.is_selective(),
        })
    }

    fn matches(&self, store: &ObjectStore, path: &str, kind: TreeEntryKind, hash: &Oid) -> bool {
        if !self.selective {
            return true;
        }
        if let Some(globs) = &self.globs {
            if globs.is_match(path) {
                return true;
            }
        }
        if let (Some(names), TreeEntryKind::Mesh) = (&self.mesh_names, kind) {
            if let Ok(doc) = crate::mesh::load_mesh(store, hash) {
                return names.iter().any(|name| *name == doc.name);
            }
        }
        false
    }
}

/// Write matched entries into the working directory: create when missing,
/// overwrite when the on-disk content hash differs, leave identical files
/// alone.
fn materialize(
    repo: &Repo,
    store: &ObjectStore,
    entries: &HashMap<String, (TreeEntryKind, Oid)>,
    filter: &EntryFilter,
) -> Result<()> {
    let mut paths: Vec<&String> = entries.keys().collect();
    paths.sort();
    for path in paths {
        let (kind, hash) = &entries[path];
        if !filter.matches(store, path, *kind, hash) {
            continue;
        }
        let target = repo.worktree().join(path);
        if file_matches(&target, hash)? {
            continue;
        }
        let bytes = match kind {
            TreeEntryKind::Blob => store.get_required(ObjectKind::Blob, hash)?,
            TreeEntryKind::Mesh => store.get_required(ObjectKind::Mesh, hash)?,
            TreeEntryKind::Tree => continue,
        };
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, &bytes)?;
        debug!(path = %path, "materialized");
    }
    Ok(())
}

fn file_matches(path: &Path, expected: &Oid) -> Result<bool> {
    if !path.is_file() {
        return Ok(false);
    }
    let (actual, _size) = hash_file(path)?;
    Ok(&actual == expected)
}

/// Remove tracked-eligible files that are not part of the target tree, then
/// prune directories that emptied out. Mesh descriptors are compared by
/// re-ingest hash, not raw bytes, so an unchanged descriptor whose raw text
/// differs from canonical form is still removed only when its path is gone
/// from the tree.
fn remove_untracked(repo: &Repo, entries: &HashMap<String, (TreeEntryKind, Oid)>) -> Result<()> {
    let ignore = IgnoreFilter::load(repo)?;
    let mut dirs = Vec::new();
    for found in scan_worktree(repo, &ignore)? {
        if entries.contains_key(&found.path) {
            continue;
        }
        let full = repo.worktree().join(&found.path);
        fs::remove_file(&full)?;
        debug!(path = %found.path, "removed untracked file");
        if let Some(parent) = full.parent() {
            dirs.push(parent.to_path_buf());
        }
    }
    dirs.sort_by_key(|dir| std::cmp::Reverse(dir.components().count()));
    dirs.dedup();
    for dir in dirs {
        if dir != repo.worktree() {
            let _ = fs::remove_dir(&dir);
        }
    }
    Ok(())
}
