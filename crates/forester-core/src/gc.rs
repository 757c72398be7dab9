use std::collections::{HashSet, VecDeque};

use tracing::{info, warn};

use crate::error::Result;
use crate::index::{self, Index};
use crate::lock::RepoLock;
use crate::object::{ObjectKind, Tree, TreeEntryKind};
use crate::oid::Oid;
use crate::repo::Repo;
use crate::store::ObjectStore;

/// Objects removed (or, in dry-run mode, removable) per kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GcStats {
    pub commits_deleted: usize,
    pub trees_deleted: usize,
    pub blobs_deleted: usize,
    pub meshes_deleted: usize,
    pub textures_deleted: usize,
}

impl GcStats {
    pub fn total(&self) -> usize {
        self.commits_deleted
            + self.trees_deleted
            + self.blobs_deleted
            + self.meshes_deleted
            + self.textures_deleted
    }
}

/// Commits reachable by parent chain from every branch tip, plus the HEAD
/// commit itself (it may be detached).
pub fn reachable_commits(index: &Index) -> Result<HashSet<Oid>> {
    let mut roots = index.branch_tips()?;
    if let Some(head) = index.head_commit()? {
        roots.push(head);
    }
    let mut seen = HashSet::new();
    let mut queue: VecDeque<Oid> = roots.into_iter().collect();
    while let Some(hash) = queue.pop_front() {
        if !seen.insert(hash) {
            continue;
        }
        if let Some(row) = index.get_commit(&hash)? {
            if let Some(parent) = row.parent {
                queue.push_back(parent);
            }
        }
    }
    Ok(seen)
}

struct Reachable {
    commits: HashSet<Oid>,
    trees: HashSet<Oid>,
    blobs: HashSet<Oid>,
    meshes: HashSet<Oid>,
    textures: HashSet<Oid>,
}

/// Mark-and-sweep over the reachable set. Holds the repo-level lock so no
/// commit or stash can race the ref snapshot; an object written after the
/// snapshot is simply re-stored by its writer as a no-op.
pub fn gc(repo: &Repo, dry_run: bool) -> Result<GcStats> {
    let _guard = RepoLock::acquire(repo.repo_dir())?;
    let mut index = Index::open(repo)?;
    let store = ObjectStore::new(repo);

    let reachable = mark(&index, &store)?;
    let mut stats = GcStats::default();

    let sweeps: [(ObjectKind, &HashSet<Oid>, &mut usize); 5] = [
        (ObjectKind::Commit, &reachable.commits, &mut stats.commits_deleted),
        (ObjectKind::Tree, &reachable.trees, &mut stats.trees_deleted),
        (ObjectKind::Blob, &reachable.blobs, &mut stats.blobs_deleted),
        (ObjectKind::Mesh, &reachable.meshes, &mut stats.meshes_deleted),
        (ObjectKind::Texture, &reachable.textures, &mut stats.textures_deleted),
    ];

    let mut dead: Vec<(ObjectKind, Oid)> = Vec::new();
    for (kind, marked, counter) in sweeps {
        for oid in store.list(kind)? {
            if marked.contains(&oid) {
                continue;
            }
            *counter += 1;
            if !dry_run {
                dead.push((kind, oid));
            }
        }
    }

    if dry_run {
        info!(candidates = stats.total(), "gc dry run");
        return Ok(stats);
    }

    for (kind, oid) in &dead {
        store.delete(*kind, oid)?;
    }
    let tx = index.transaction()?;
    for (kind, oid) in &dead {
        match kind {
            ObjectKind::Commit => index::delete_commit_row(&tx, oid)?,
            ObjectKind::Tree => index::delete_tree_entries(&tx, oid)?,
            ObjectKind::Mesh => index::delete_mesh_row(&tx, oid)?,
            ObjectKind::Texture => index::delete_texture_row(&tx, oid)?,
            ObjectKind::Blob => {}
        }
    }
    tx.commit()?;
    index.checkpoint();

    info!(
        commits = stats.commits_deleted,
        trees = stats.trees_deleted,
        blobs = stats.blobs_deleted,
        meshes = stats.meshes_deleted,
        textures = stats.textures_deleted,
        "gc swept unreachable objects"
    );
    Ok(stats)
}

/// Seed with every branch tip and stash, then close over trees, blobs,
/// meshes, and textures.
fn mark(index: &Index, store: &ObjectStore) -> Result<Reachable> {
    let mut reachable = Reachable {
        commits: reachable_commits(index)?,
        trees: HashSet::new(),
        blobs: HashSet::new(),
        meshes: HashSet::new(),
        textures: HashSet::new(),
    };

    let mut tree_roots = Vec::new();
    for commit in reachable.commits.clone() {
        if let Some(row) = index.get_commit(&commit)? {
            tree_roots.push(row.tree_hash);
            if let Some(screenshot) = row.screenshot_hash {
                reachable.blobs.insert(screenshot);
            }
            for mesh in row.mesh_hashes {
                reachable.meshes.insert(mesh);
            }
            for texture in index.textures_for_commit(&commit)? {
                reachable.textures.insert(texture);
            }
        }
    }
    for stash in index.list_stashes()? {
        tree_roots.push(stash.tree_hash);
    }

    let mut queue: VecDeque<Oid> = tree_roots.into_iter().collect();
    while let Some(tree_hash) = queue.pop_front() {
        if !reachable.trees.insert(tree_hash) {
            continue;
        }
        let tree = match store.get(ObjectKind::Tree, &tree_hash)? {
            Some(bytes) => Tree::decode(&bytes)?,
            None => {
                // Fall back to the flattened rows; a missing tree object is
                // rebuild's problem, not a license to sweep its children.
                warn!(%tree_hash, "tree object missing, marking from index rows");
                index::get_tree_entries(index.conn(), &tree_hash)?
            }
        };
        for entry in tree.entries {
            match entry.kind {
                TreeEntryKind::Tree => queue.push_back(entry.hash),
                TreeEntryKind::Blob => {
                    reachable.blobs.insert(entry.hash);
                }
                TreeEntryKind::Mesh => {
                    reachable.meshes.insert(entry.hash);
                }
            }
        }
    }

    // Meshes keep their textures alive.
    for mesh in reachable.meshes.clone() {
        match crate::mesh::load_mesh(store, &mesh) {
            Ok(doc) => {
                for texture in crate::mesh::texture_hashes(&doc) {
                    reachable.textures.insert(texture);
                }
            }
            Err(err) => warn!(%mesh, %err, "mesh unreadable during mark, keeping it"),
        }
    }

    Ok(reachable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkout::{checkout, CheckoutOptions};
    use crate::commit::{commit, CommitOptions};
    use crate::repo::RepoConfig;
    use std::fs;

    fn setup() -> (tempfile::TempDir, Repo, RepoConfig) {
        let temp = tempfile::tempdir().expect("tempdir");
        let repo = Repo::init(temp.path(), false).expect("init");
        (temp, repo, RepoConfig::default())
    }

    fn commit_all(repo: &Repo, config: &RepoConfig, message: &str) -> Oid {
        commit(repo, config, message, "alice", &CommitOptions::default())
            .expect("commit")
            .expect("created")
    }

    #[test]
    fn gc_on_fully_reachable_repo_deletes_nothing() {
        let (temp, repo, config) = setup();
        fs::write(temp.path().join("a.txt"), b"one").expect("write");
        commit_all(&repo, &config, "one");
        fs::write(temp.path().join("a.txt"), b"two").expect("write");
        commit_all(&repo, &config, "two");

        let stats = gc(&repo, false).expect("gc");
        assert_eq!(stats.total(), 0);
    }

    #[test]
    fn gc_reclaims_unreferenced_commit_and_reruns_clean() {
        let (temp, repo, config) = setup();
        let store = ObjectStore::new(&repo);

        fs::write(temp.path().join("a.txt"), b"one").expect("write");
        let first = commit_all(&repo, &config, "one");
        fs::write(temp.path().join("a.txt"), b"two").expect("write");
        let second = commit_all(&repo, &config, "two");
        fs::write(temp.path().join("a.txt"), b"three").expect("write");
        let third = commit_all(&repo, &config, "three");

        // Move main back to the second commit; the third becomes garbage.
        checkout(
            &repo,
            &config,
            &second.to_hex(),
            &CheckoutOptions {
                force: true,
                ..CheckoutOptions::default()
            },
        )
        .expect("checkout");
        let mut index = Index::open(&repo).expect("index");
        {
            let tx = index.transaction().expect("tx");
            index::upsert_branch(&tx, "main", Some(second)).expect("rewind");
            index::set_meta(&tx, "current_branch", "main").expect("meta");
            crate::index::set_head_meta(&tx, Some(second)).expect("head");
            tx.commit().expect("commit");
        }
        crate::refs::write_branch_ref(&repo, "main", Some(&second)).expect("ref");
        crate::refs::write_head(&repo, &crate::refs::Head::Branch("main".into())).expect("head");
        drop(index);

        let dry = gc(&repo, true).expect("dry run");
        assert_eq!(dry.commits_deleted, 1);
        assert!(store.exists(ObjectKind::Commit, &third));

        let stats = gc(&repo, false).expect("gc");
        assert_eq!(stats.commits_deleted, 1);
        assert!(!store.exists(ObjectKind::Commit, &third));
        // Reachable history is intact.
        assert!(store.exists(ObjectKind::Commit, &first));
        assert!(store.exists(ObjectKind::Commit, &second));
        let index = Index::open(&repo).expect("index");
        let row = index.get_commit(&second).expect("get").expect("row");
        assert!(store.exists(ObjectKind::Tree, &row.tree_hash));

        // Idempotence: a second gc changes nothing.
        let again = gc(&repo, false).expect("gc again");
        assert_eq!(again.total(), 0);
    }

    #[test]
    fn stash_objects_survive_gc() {
        let (temp, repo, config) = setup();
        fs::write(temp.path().join("a.txt"), b"clean").expect("write");
        commit_all(&repo, &config, "base");
        fs::write(temp.path().join("a.txt"), b"dirty").expect("write");
        let stash = crate::stash::stash_changes(&repo, &config, None)
            .expect("stash")
            .expect("created");

        let stats = gc(&repo, false).expect("gc");
        assert_eq!(stats.total(), 0);

        crate::stash::apply_stash(&repo, &stash, true).expect("apply");
        assert_eq!(fs::read(temp.path().join("a.txt")).expect("read"), b"dirty");

        // Once the stash is gone its snapshot becomes garbage.
        crate::checkout::checkout(
            &repo,
            &config,
            "main",
            &CheckoutOptions {
                force: true,
                ..CheckoutOptions::default()
            },
        )
        .expect("reset");
        crate::stash::delete_stash(&repo, &stash).expect("delete");
        let stats = gc(&repo, false).expect("gc");
        assert!(stats.blobs_deleted > 0 || stats.trees_deleted > 0);
    }

    #[test]
    fn textures_of_reachable_meshes_are_kept() {
        let (temp, repo, config) = setup();
        fs::write(temp.path().join("t.png"), b"texture bytes").expect("write");
        fs::write(
            temp.path().join("m.mesh.json"),
            br#"{"name":"M","vertices":[[0.0,0.0,0.0]],"faces":[[0,0,0]],"textures":[{"name":"d","source":"t.png"}]}"#,
        )
        .expect("write");
        commit_all(&repo, &config, "mesh");

        let stats = gc(&repo, false).expect("gc");
        assert_eq!(stats.meshes_deleted, 0);
        assert_eq!(stats.textures_deleted, 0);
    }
}
