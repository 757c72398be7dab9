use std::collections::HashMap;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::hooks;
use crate::ignore::IgnoreFilter;
use crate::index::{self, CommitRow, Index};
use crate::lock::RepoLock;
use crate::locks;
use crate::object::{CommitRecord, CommitType, ObjectKind};
use crate::oid::Oid;
use crate::repo::{Repo, RepoConfig, RepoMetadata};
use crate::store::ObjectStore;
use crate::tree::{build_mesh_only_tree, build_worktree_tree, TreeBuild};
use crate::util::unix_now;

#[derive(Clone, Debug)]
pub struct CommitOptions {
    /// Reject the commit when a changed file is locked by someone else.
    pub check_locks: bool,
    /// Skip the pre-commit hook (`--no-verify`).
    pub no_verify: bool,
    /// Snapshot only mesh descriptors instead of the whole working set.
    pub mesh_only: bool,
    /// With `mesh_only`, restrict to these mesh object names.
    pub mesh_names: Option<Vec<String>>,
    /// Viewport capture provided by the caller, stored as a blob and linked
    /// into the commit row.
    pub screenshot: Option<Vec<u8>>,
}

impl Default for CommitOptions {
    fn default() -> Self {
        Self {
            check_locks: true,
            no_verify: false,
            mesh_only: false,
            mesh_names: None,
            screenshot: None,
        }
    }
}

/// Create a commit from the current working set. Returns `Ok(None)` when
/// the new root tree equals the current branch tip's tree.
pub fn commit(
    repo: &Repo,
    config: &RepoConfig,
    message: &str,
    author: &str,
    opts: &CommitOptions,
) -> Result<Option<Oid>> {
    let _guard = RepoLock::acquire(repo.repo_dir())?;
    let mut index = Index::open(repo)?;
    let store = ObjectStore::new(repo);
    let ignore = IgnoreFilter::load(repo)?;

    let branch = index.current_branch()?;
    let parent = index
        .get_branch_tip(&branch)?
        .ok_or_else(|| Error::UnknownRef(branch.clone()))?;
    let parent_row = match parent {
        Some(hash) => index.get_commit(&hash)?,
        None => None,
    };

    let build = if opts.mesh_only {
        build_mesh_only_tree(repo, &store, &ignore, opts.mesh_names.as_deref())?
    } else {
        build_worktree_tree(repo, &store, &ignore)?
    };

    if opts.mesh_only && build.meshes.is_empty() {
        debug!(%branch, "no meshes to commit");
        return Ok(None);
    }

    if let Some(ref parent_row) = parent_row {
        if parent_row.tree_hash == build.root {
            debug!(%branch, "no changes against branch tip");
            return Ok(None);
        }
    }

    if opts.check_locks {
        let changed = changed_paths(&index, parent_row.as_ref(), &build)?;
        let conflicts = locks::check_conflicts(&index, &branch, &changed, author)?;
        if !conflicts.is_empty() {
            let mut files: Vec<String> =
                conflicts.into_iter().map(|lock| lock.file_path).collect();
            files.sort();
            files.dedup();
            return Err(Error::LockedFiles(files));
        }
    }

    if !opts.no_verify {
        hooks::run_pre_hook(
            repo,
            hooks::PRE_COMMIT,
            &[
                ("DFM_BRANCH", branch.as_str()),
                ("DFM_AUTHOR", author),
                ("DFM_MESSAGE", message),
            ],
            config.hook_timeout_secs,
        )?;
    }

    // Timestamps stay monotonic along the parent chain even when the OS
    // clock runs backwards.
    let timestamp = parent_row
        .as_ref()
        .map(|row| row.timestamp)
        .unwrap_or(i64::MIN)
        .max(unix_now());

    let record = CommitRecord {
        author: author.to_string(),
        branch: branch.clone(),
        commit_type: if opts.mesh_only {
            CommitType::MeshOnly
        } else {
            CommitType::Project
        },
        mesh_hashes: build.meshes.iter().map(|(hash, _)| *hash).collect(),
        message: message.to_string(),
        parent: parent_row.as_ref().map(|row| row.hash),
        timestamp,
        tree_hash: build.root,
    };
    let bytes = record.encode()?;
    let commit_hash = store.put(ObjectKind::Commit, &bytes)?;

    let screenshot_hash = match &opts.screenshot {
        Some(image) => Some(store.put(ObjectKind::Blob, image)?),
        None => None,
    };

    let row = CommitRow {
        hash: commit_hash,
        branch: branch.clone(),
        parent: record.parent,
        timestamp,
        message: record.message.clone(),
        tree_hash: build.root,
        author: record.author.clone(),
        commit_type: record.commit_type,
        mesh_hashes: record.mesh_hashes.clone(),
        screenshot_hash,
    };

    // All metadata lands in one transaction; a cancellation before this
    // point leaves only unreachable objects behind for GC.
    let tx = index.transaction()?;
    index::insert_commit(&tx, &row)?;
    index::upsert_branch(&tx, &branch, Some(commit_hash))?;
    index::set_meta(&tx, "current_branch", &branch)?;
    index::set_head_meta(&tx, Some(commit_hash))?;
    for (tree_hash, tree) in &build.trees {
        index::insert_tree_entries(&tx, tree_hash, tree)?;
    }
    for file in &build.files {
        index::insert_commit_file(&tx, &commit_hash, &file.path, &file.hash, file.size)?;
    }
    for (mesh_hash, name) in &build.meshes {
        index::upsert_mesh(&tx, mesh_hash, name, timestamp)?;
    }
    for texture in &build.textures {
        index::upsert_texture(&tx, texture)?;
        index::link_texture_commit(&tx, &texture.hash, &commit_hash)?;
    }
    tx.commit()?;

    // Ref-file and metadata mirrors follow the transaction.
    crate::refs::write_branch_ref(repo, &branch, Some(&commit_hash))?;
    RepoMetadata::update(repo, &branch, Some(commit_hash))?;
    index.checkpoint();

    let commit_hex = commit_hash.to_hex();
    hooks::run_post_hook(
        repo,
        hooks::POST_COMMIT,
        &[
            ("DFM_BRANCH", branch.as_str()),
            ("DFM_AUTHOR", author),
            ("DFM_MESSAGE", message),
            ("DFM_COMMIT_HASH", commit_hex.as_str()),
        ],
        config.hook_timeout_secs,
    );

    if let Some(keep) = config.auto_compress_keep {
        auto_compress(&mut index, &store, &branch, keep)?;
    }

    info!(%commit_hash, %branch, commit_type = record.commit_type.as_str(), "created commit");
    Ok(Some(commit_hash))
}

/// True when the working set differs from the current branch tip.
pub fn working_tree_differs(repo: &Repo, index: &Index, store: &ObjectStore) -> Result<bool> {
    let ignore = IgnoreFilter::load(repo)?;
    let build = build_worktree_tree(repo, store, &ignore)?;
    let branch = index.current_branch()?;
    let tip = index.get_branch_tip(&branch)?.flatten();
    match tip {
        Some(tip) => {
            let row = index
                .get_commit(&tip)?
                .ok_or_else(|| Error::UnknownRef(tip.to_hex()))?;
            Ok(row.tree_hash != build.root)
        }
        None => Ok(!build.files.is_empty() || !build.meshes.is_empty()),
    }
}

/// Paths whose blob content changed relative to the parent commit. Every
/// file counts on a root commit.
fn changed_paths(
    index: &Index,
    parent: Option<&CommitRow>,
    build: &TreeBuild,
) -> Result<Vec<String>> {
    let previous: HashMap<String, Oid> = match parent {
        Some(parent) => index
            .files_for_commit(&parent.hash)?
            .into_iter()
            .map(|file| (file.path, file.blob_hash))
            .collect(),
        None => HashMap::new(),
    };
    Ok(build
        .files
        .iter()
        .filter(|file| previous.get(&file.path) != Some(&file.hash))
        .map(|file| file.path.clone())
        .collect())
}

/// Delete mesh-only commits on `branch` beyond the retention count. A
/// commit reachable from any branch tip or referenced by HEAD is never
/// deleted.
fn auto_compress(index: &mut Index, store: &ObjectStore, branch: &str, keep: usize) -> Result<()> {
    let mesh_only: Vec<CommitRow> = index
        .commits_on_branch(branch)?
        .into_iter()
        .filter(|row| row.commit_type == CommitType::MeshOnly)
        .collect();
    if mesh_only.len() <= keep {
        return Ok(());
    }

    let reachable = crate::gc::reachable_commits(index)?;
    let excess = mesh_only.len() - keep;
    let mut deleted = 0usize;
    for row in mesh_only.into_iter().take(excess) {
        if reachable.contains(&row.hash) {
            continue;
        }
        store.delete(ObjectKind::Commit, &row.hash)?;
        let tx = index.transaction()?;
        index::delete_commit_row(&tx, &row.hash)?;
        tx.commit()?;
        deleted += 1;
    }
    if deleted > 0 {
        info!(branch, deleted, "auto-compressed mesh-only commits");
    }
    Ok(())
}
