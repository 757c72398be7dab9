use std::collections::BTreeMap;
use std::fs;

use crate::error::Result;
use crate::ignore::IgnoreFilter;
use crate::index::TextureRow;
use crate::mesh::{ingest_mesh, is_mesh_descriptor};
use crate::object::{ObjectKind, Tree, TreeEntry, TreeEntryKind};
use crate::oid::Oid;
use crate::repo::Repo;
use crate::scan::{scan_worktree, ScanEntry};
use crate::store::ObjectStore;

/// Everything produced while assembling a root tree. Object writes happen
/// here (idempotently); metadata rows are the commit transaction's job.
pub struct TreeBuild {
    pub root: Oid,
    /// Flat list of blob-backed files: `(path, blob hash, size)`.
    pub files: Vec<ScanEntry>,
    /// Every tree object written, root included.
    pub trees: Vec<(Oid, Tree)>,
    /// Ingested meshes as `(mesh hash, object name)`.
    pub meshes: Vec<(Oid, String)>,
    /// Textures ingested while normalizing mesh descriptors.
    pub textures: Vec<TextureRow>,
}

/// Snapshot the full working set into a tree DAG.
pub fn build_worktree_tree(
    repo: &Repo,
    store: &ObjectStore,
    ignore: &IgnoreFilter,
) -> Result<TreeBuild> {
    let entries = scan_worktree(repo, ignore)?;
    build_from_entries(repo, store, entries)
}

/// Snapshot only mesh descriptors (optionally restricted to the given
/// object names); used for mesh-only commits.
pub fn build_mesh_only_tree(
    repo: &Repo,
    store: &ObjectStore,
    ignore: &IgnoreFilter,
    mesh_names: Option<&[String]>,
) -> Result<TreeBuild> {
    let mut selected = Vec::new();
    for entry in scan_worktree(repo, ignore)? {
        if !is_mesh_descriptor(&entry.path) {
            continue;
        }
        if let Some(names) = mesh_names {
            let bytes = fs::read(repo.worktree().join(&entry.path))?;
            match crate::mesh::descriptor_name(&bytes) {
                Some(name) if names.iter().any(|n| *n == name) => {}
                _ => continue,
            }
        }
        selected.push(entry);
    }
    build_from_entries(repo, store, selected)
}

fn build_from_entries(
    repo: &Repo,
    store: &ObjectStore,
    entries: Vec<ScanEntry>,
) -> Result<TreeBuild> {
    let mut files = Vec::new();
    let mut meshes = Vec::new();
    let mut textures = Vec::new();
    let mut root = DirNode::default();

    for entry in entries {
        let full = repo.worktree().join(&entry.path);
        if is_mesh_descriptor(&entry.path) {
            let bytes = fs::read(&full)?;
            match ingest_mesh(repo, store, &bytes) {
                Ok(ingested) => {
                    meshes.push((ingested.hash, ingested.doc.name.clone()));
                    textures.extend(ingested.textures);
                    root.insert(&entry.path, TreeEntryKind::Mesh, ingested.hash);
                    continue;
                }
                Err(err) => {
                    // A descriptor that does not parse is tracked as a
                    // plain file.
                    tracing::warn!(path = %entry.path, %err, "mesh descriptor not parseable");
                }
            }
        }
        let blob_hash = if store.exists(ObjectKind::Blob, &entry.hash) {
            entry.hash
        } else {
            store.put(ObjectKind::Blob, &fs::read(&full)?)?
        };
        root.insert(&entry.path, TreeEntryKind::Blob, blob_hash);
        files.push(ScanEntry {
            path: entry.path,
            hash: blob_hash,
            size: entry.size,
        });
    }

    let mut trees = Vec::new();
    let root_hash = write_tree(&root, store, &mut trees)?;
    Ok(TreeBuild {
        root: root_hash,
        files,
        trees,
        meshes,
        textures,
    })
}

#[derive(Default)]
struct DirNode {
    leaves: Vec<TreeEntry>,
    dirs: BTreeMap<String, DirNode>,
}

impl DirNode {
    fn insert(&mut self, path: &str, kind: TreeEntryKind, hash: Oid) {
        match path.split_once('/') {
            Some((dir, rest)) => {
                self.dirs
                    .entry(dir.to_string())
                    .or_default()
                    .insert(rest, kind, hash);
            }
            None => self.leaves.push(TreeEntry {
                name: path.to_string(),
                kind,
                hash,
            }),
        }
    }
}

/// Store subtrees leaves-up; each non-root tree is its own object.
fn write_tree(node: &DirNode, store: &ObjectStore, out: &mut Vec<(Oid, Tree)>) -> Result<Oid> {
    let mut entries = node.leaves.clone();
    for (name, child) in &node.dirs {
        let child_hash = write_tree(child, store, out)?;
        entries.push(TreeEntry {
            name: name.clone(),
            kind: TreeEntryKind::Tree,
            hash: child_hash,
        });
    }
    let tree = Tree::new(entries);
    let hash = store.put(ObjectKind::Tree, &tree.encode())?;
    out.push((hash, tree));
    Ok(hash)
}
