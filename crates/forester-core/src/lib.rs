mod branch;
mod checkout;
mod commit;
mod error;
mod gc;
mod hash;
mod hooks;
mod ignore;
mod index;
mod lock;
mod locks;
mod log;
mod mesh;
mod object;
mod oid;
mod rebuild;
mod refs;
mod repo;
mod review;
mod scan;
mod stash;
mod store;
mod tag;
mod texture;
mod tree;
mod util;

pub use branch::{
    create as create_branch, delete as delete_branch, list as list_branches,
    rename as rename_branch, switch as switch_branch, validate_name, BranchInfo,
};
pub use checkout::{checkout, resolve_target, CheckoutOptions};
pub use commit::{commit, working_tree_differs, CommitOptions};
pub use error::{Error, Result};
pub use gc::{gc, reachable_commits, GcStats};
pub use hash::{hash_bytes, hash_file, Hasher};
pub use ignore::{default_ignore_file, IgnoreFilter};
pub use index::{CommitFileRow, CommitRow, Index, StashRow, TextureRow};
pub use lock::RepoLock;
pub use locks::{
    check_conflicts, get_locks, lock_file, lock_files, purge_expired, unlock_file, unlock_files,
    LockRow, LockType,
};
pub use log::{log, show, status, CommitDetail, StatusReport};
pub use mesh::{ingest_mesh, load_mesh, IngestedMesh, MeshDoc, TextureRef, MESH_SUFFIX};
pub use object::{CommitRecord, CommitType, ObjectKind, Tree, TreeEntry, TreeEntryKind};
pub use oid::Oid;
pub use rebuild::{rebuild, RebuildStats};
pub use refs::{
    read_branch_ref, read_head, read_tag_ref, write_branch_ref, write_head, write_tag_ref, Head,
};
pub use repo::{Repo, RepoConfig, RepoMetadata, DEFAULT_BRANCH, REPO_DIR_NAME};
pub use review::{
    approve_asset, comment_on_asset, delete_comment, get_approval, get_approvals, get_comments,
    resolve_comment, Approval, ApprovalStatus, AssetType, Comment,
};
pub use scan::{scan_worktree, ScanEntry};
pub use stash::{apply_stash, delete_stash, list_stashes, load_stash_record, stash_changes};
pub use store::ObjectStore;
pub use tag::{create as create_tag, delete as delete_tag, list as list_tags, show as show_tag};
pub use texture::{ingest_texture, probe_image, ImageProbe};
pub use tree::{build_mesh_only_tree, build_worktree_tree, TreeBuild};
