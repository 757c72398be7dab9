use std::fs;

use tracing::{info, warn};

use crate::error::Result;
use crate::index::{self, CommitRow, Index, StashRow, TextureRow};
use crate::lock::RepoLock;
use crate::object::{CommitRecord, ObjectKind, Tree, TreeEntryKind};
use crate::oid::Oid;
use crate::refs::{self, Head};
use crate::repo::{Repo, RepoMetadata};
use crate::store::ObjectStore;
use crate::texture::probe_image;
use crate::util::unix_now;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RebuildStats {
    pub commits: usize,
    pub trees: usize,
    pub meshes: usize,
    pub textures: usize,
    pub stashes: usize,
    pub branches: usize,
}

/// Reconstruct the metadata index from the object store, the ref files,
/// and the HEAD file. Ref files are authoritative here: rebuild resolves
/// branch disagreements by trusting what is on disk.
pub fn rebuild(repo: &Repo, backup: bool) -> Result<RebuildStats> {
    let _guard = RepoLock::acquire(repo.repo_dir())?;

    if backup && repo.db_path().exists() {
        let backup_path = repo.db_path().with_extension("db.backup");
        fs::copy(repo.db_path(), &backup_path)?;
        info!(path = %backup_path.display(), "backed up metadata index");
    }

    let mut index = Index::open(repo)?;
    let store = ObjectStore::new(repo);
    let mut stats = RebuildStats::default();

    let tx = index.transaction()?;
    index::clear_all(&tx)?;

    // Commits, their file lists, and texture links come from the commit
    // objects themselves.
    for hash in store.list(ObjectKind::Commit)? {
        let bytes = match store.get(ObjectKind::Commit, &hash) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => continue,
            Err(err) => {
                warn!(%hash, %err, "skipping unreadable commit object");
                continue;
            }
        };
        let record = match CommitRecord::decode(&bytes) {
            Ok(record) => record,
            Err(err) => {
                warn!(%hash, %err, "skipping undecodable commit object");
                continue;
            }
        };
        index::insert_commit(
            &tx,
            &CommitRow {
                hash,
                branch: record.branch.clone(),
                parent: record.parent,
                timestamp: record.timestamp,
                message: record.message.clone(),
                tree_hash: record.tree_hash,
                author: record.author.clone(),
                commit_type: record.commit_type,
                mesh_hashes: record.mesh_hashes.clone(),
                screenshot_hash: None,
            },
        )?;
        stats.commits += 1;

        for (path, kind, entry_hash) in flatten_for_rebuild(&store, &record.tree_hash)? {
            if kind != TreeEntryKind::Blob {
                continue;
            }
            let size = store
                .get(ObjectKind::Blob, &entry_hash)?
                .map(|bytes| bytes.len() as u64)
                .unwrap_or(0);
            index::insert_commit_file(&tx, &hash, &path, &entry_hash, size)?;
        }
        for mesh_hash in &record.mesh_hashes {
            if let Ok(doc) = crate::mesh::load_mesh(&store, mesh_hash) {
                for texture in crate::mesh::texture_hashes(&doc) {
                    index::link_texture_commit(&tx, &texture, &hash)?;
                }
            }
        }
    }

    for hash in store.list(ObjectKind::Tree)? {
        let Some(bytes) = store.get(ObjectKind::Tree, &hash)? else {
            continue;
        };
        match Tree::decode(&bytes) {
            Ok(tree) => {
                index::insert_tree_entries(&tx, &hash, &tree)?;
                stats.trees += 1;
            }
            Err(err) => warn!(%hash, %err, "skipping undecodable tree object"),
        }
    }

    let now = unix_now();
    for hash in store.list(ObjectKind::Mesh)? {
        match crate::mesh::load_mesh(&store, &hash) {
            Ok(doc) => {
                index::upsert_mesh(&tx, &hash, &doc.name, now)?;
                stats.meshes += 1;
            }
            Err(err) => warn!(%hash, %err, "skipping undecodable mesh object"),
        }
    }

    for hash in store.list(ObjectKind::Texture)? {
        let Some(bytes) = store.get(ObjectKind::Texture, &hash)? else {
            continue;
        };
        let probe = probe_image(&bytes);
        index::upsert_texture(
            &tx,
            &TextureRow {
                hash,
                original_name: hash.to_hex(),
                format: probe.format,
                width: probe.width,
                height: probe.height,
                channels: probe.channels,
                file_size: bytes.len() as u64,
                created_at: now,
            },
        )?;
        stats.textures += 1;
    }

    // Stash records live beside the object store.
    if repo.stash_dir().is_dir() {
        for entry in fs::read_dir(repo.stash_dir())? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(hash) = Oid::from_hex(&name) else {
                continue;
            };
            let bytes = fs::read(entry.path())?;
            match CommitRecord::decode(&bytes) {
                Ok(record) => {
                    index::insert_stash(
                        &tx,
                        &StashRow {
                            hash,
                            branch: record.branch,
                            timestamp: record.timestamp,
                            message: record.message,
                            tree_hash: record.tree_hash,
                        },
                    )?;
                    stats.stashes += 1;
                }
                Err(err) => warn!(%hash, %err, "skipping undecodable stash record"),
            }
        }
    }

    // Branch rows from ref files.
    for (name, tip) in refs::list_ref_dir(&repo.branches_dir())? {
        index::upsert_branch(&tx, &name, tip)?;
        stats.branches += 1;
    }

    // Repository state from the HEAD file.
    match refs::read_head(repo) {
        Ok(Head::Branch(branch)) => {
            index::set_meta(&tx, "current_branch", &branch)?;
            let tip = refs::read_branch_ref(repo, &branch).unwrap_or(None);
            index::set_head_meta(&tx, tip)?;
            RepoMetadata::update(repo, &branch, tip)?;
        }
        Ok(Head::Detached(commit)) => {
            index::set_meta(&tx, "current_branch", crate::repo::DEFAULT_BRANCH)?;
            index::set_head_meta(&tx, Some(commit))?;
        }
        Err(err) => warn!(%err, "HEAD file unreadable during rebuild"),
    }

    tx.commit()?;
    index.checkpoint();

    info!(
        commits = stats.commits,
        trees = stats.trees,
        meshes = stats.meshes,
        textures = stats.textures,
        stashes = stats.stashes,
        branches = stats.branches,
        "rebuilt metadata index"
    );
    Ok(stats)
}

/// Flatten a tree from the store into `(path, kind, hash)` rows, skipping
/// unreadable subtrees rather than failing the whole rebuild.
fn flatten_for_rebuild(
    store: &ObjectStore,
    root: &Oid,
) -> Result<Vec<(String, TreeEntryKind, Oid)>> {
    let mut out = Vec::new();
    let mut stack = vec![(String::new(), *root)];
    while let Some((prefix, tree_hash)) = stack.pop() {
        let Some(bytes) = store.get(ObjectKind::Tree, &tree_hash).unwrap_or(None) else {
            warn!(%tree_hash, "tree object missing during rebuild");
            continue;
        };
        let Ok(tree) = Tree::decode(&bytes) else {
            warn!(%tree_hash, "tree object undecodable during rebuild");
            continue;
        };
        for entry in tree.entries {
            let path = if prefix.is_empty() {
                entry.name.clone()
            } else {
                format!("{prefix}/{}", entry.name)
            };
            match entry.kind {
                TreeEntryKind::Tree => stack.push((path, entry.hash)),
                kind => out.push((path, kind, entry.hash)),
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::{commit, CommitOptions};
    use crate::repo::RepoConfig;

    #[test]
    fn rebuild_restores_lost_index() {
        let temp = tempfile::tempdir().expect("tempdir");
        let repo = Repo::init(temp.path(), false).expect("init");
        let config = RepoConfig::default();

        fs::write(temp.path().join("a.txt"), b"one").expect("write");
        fs::create_dir_all(temp.path().join("sub")).expect("mkdir");
        fs::write(temp.path().join("sub/b.txt"), b"two").expect("write");
        fs::write(
            temp.path().join("m.mesh.json"),
            br#"{"name":"M","vertices":[[0.0,0.0,0.0]],"faces":[[0,0,0]]}"#,
        )
        .expect("write");
        let first = commit(&repo, &config, "one", "alice", &CommitOptions::default())
            .expect("commit")
            .expect("created");
        fs::write(temp.path().join("a.txt"), b"changed").expect("write");
        let second = commit(&repo, &config, "two", "bob", &CommitOptions::default())
            .expect("commit")
            .expect("created");

        // Lose the index entirely.
        fs::remove_file(repo.db_path()).expect("drop db");
        let stats = rebuild(&repo, false).expect("rebuild");
        assert_eq!(stats.commits, 2);
        assert!(stats.trees >= 2);
        assert_eq!(stats.meshes, 1);
        assert_eq!(stats.branches, 1);

        let index = Index::open(&repo).expect("index");
        let row = index.get_commit(&second).expect("get").expect("row");
        assert_eq!(row.message, "two");
        assert_eq!(row.parent, Some(first));
        assert_eq!(index.current_branch().expect("branch"), "main");
        assert_eq!(index.head_commit().expect("head"), Some(second));
        assert_eq!(
            index.get_branch_tip("main").expect("tip"),
            Some(Some(second))
        );
        let files = index.files_for_commit(&second).expect("files");
        assert!(files.iter().any(|f| f.path == "a.txt" && f.size == 7));
        assert!(files.iter().any(|f| f.path == "sub/b.txt"));
    }

    #[test]
    fn rebuild_backs_up_existing_db() {
        let temp = tempfile::tempdir().expect("tempdir");
        let repo = Repo::init(temp.path(), false).expect("init");
        rebuild(&repo, true).expect("rebuild");
        assert!(repo.db_path().with_extension("db.backup").exists());
    }

    #[test]
    fn rebuild_restores_stashes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let repo = Repo::init(temp.path(), false).expect("init");
        let config = RepoConfig::default();
        fs::write(temp.path().join("a.txt"), b"wip").expect("write");
        let stash = crate::stash::stash_changes(&repo, &config, Some("wip"))
            .expect("stash")
            .expect("created");

        fs::remove_file(repo.db_path()).expect("drop db");
        let stats = rebuild(&repo, false).expect("rebuild");
        assert_eq!(stats.stashes, 1);
        let index = Index::open(&repo).expect("index");
        assert_eq!(
            index.get_stash(&stash).expect("get").expect("row").message,
            "wip"
        );
    }
}
