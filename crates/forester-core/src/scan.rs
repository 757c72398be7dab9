use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::hash::hash_file;
use crate::ignore::IgnoreFilter;
use crate::oid::Oid;
use crate::repo::Repo;

/// One tracked file found in the working directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanEntry {
    /// Path relative to the worktree root, `/`-separated.
    pub path: String,
    pub hash: Oid,
    pub size: u64,
}

/// Walk the working tree, yielding `(relative path, content hash, size)` for
/// every file that participates in commits. Symlinks are followed only when
/// their target stays inside the worktree; cycles are broken by tracking
/// visited `(device, inode)` pairs.
pub fn scan_worktree(repo: &Repo, ignore: &IgnoreFilter) -> Result<Vec<ScanEntry>> {
    let mut out = Vec::new();
    let mut visited = HashSet::new();
    note_visited(repo.worktree(), &mut visited)?;
    walk(
        repo.worktree(),
        repo.worktree(),
        ignore,
        &mut visited,
        &mut out,
    )?;
    out.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(out)
}

fn walk(
    root: &Path,
    dir: &Path,
    ignore: &IgnoreFilter,
    visited: &mut HashSet<(u64, u64)>,
    out: &mut Vec<ScanEntry>,
) -> Result<()> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        entries.push(entry?);
    }
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let path = entry.path();
        let file_type = entry.file_type()?;

        let resolved = if file_type.is_symlink() {
            match resolve_symlink(root, &path)? {
                Some(target) => target,
                None => continue,
            }
        } else {
            path.clone()
        };

        let is_dir = resolved.is_dir();
        if ignore.is_ignored(&path, is_dir) {
            continue;
        }

        if is_dir {
            if !note_visited(&resolved, visited)? {
                continue;
            }
            walk(root, &path, ignore, visited, out)?;
        } else if resolved.is_file() {
            let (hash, size) = hash_file(&resolved)?;
            out.push(ScanEntry {
                path: relative_posix(root, &path),
                hash,
                size,
            });
        }
    }
    Ok(())
}

/// Resolve a symlink, returning `None` when the target escapes the worktree
/// or does not exist.
fn resolve_symlink(root: &Path, link: &Path) -> Result<Option<PathBuf>> {
    let target = match link.canonicalize() {
        Ok(target) => target,
        Err(_) => return Ok(None),
    };
    let root = root.canonicalize()?;
    if target.starts_with(&root) {
        Ok(Some(target))
    } else {
        Ok(None)
    }
}

/// Record a directory's identity; returns false if it was already seen.
#[cfg(unix)]
fn note_visited(path: &Path, visited: &mut HashSet<(u64, u64)>) -> Result<bool> {
    use std::os::unix::fs::MetadataExt;
    let meta = fs::metadata(path)?;
    Ok(visited.insert((meta.dev(), meta.ino())))
}

#[cfg(not(unix))]
fn note_visited(path: &Path, visited: &mut HashSet<(u64, u64)>) -> Result<bool> {
    let _ = path;
    let _ = visited;
    Ok(true)
}

fn relative_posix(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    parts.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;

    fn setup() -> (tempfile::TempDir, Repo, IgnoreFilter) {
        let temp = tempfile::tempdir().expect("tempdir");
        let repo = Repo::init(temp.path(), false).expect("init");
        let ignore = IgnoreFilter::load(&repo).expect("ignore");
        (temp, repo, ignore)
    }

    #[test]
    fn yields_relative_paths_hashes_and_sizes() {
        let (temp, repo, ignore) = setup();
        fs::write(temp.path().join("a.txt"), b"hello").expect("write");
        fs::create_dir_all(temp.path().join("sub/deep")).expect("mkdir");
        fs::write(temp.path().join("sub/deep/b.txt"), b"world!").expect("write");

        let entries = scan_worktree(&repo, &ignore).expect("scan");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path, "a.txt");
        assert_eq!(entries[0].hash, hash_bytes(b"hello"));
        assert_eq!(entries[0].size, 5);
        assert_eq!(entries[1].path, "sub/deep/b.txt");
        assert_eq!(entries[1].size, 6);
    }

    #[test]
    fn skips_repo_dir_and_ignored_files() {
        let (temp, repo, ignore) = setup();
        fs::write(temp.path().join("keep.txt"), b"keep").expect("write");
        fs::write(temp.path().join("junk.tmp"), b"junk").expect("write");

        let entries = scan_worktree(&repo, &ignore).expect("scan");
        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["keep.txt"]);
    }

    #[cfg(unix)]
    #[test]
    fn symlink_outside_worktree_is_skipped() {
        use std::os::unix::fs::symlink;
        let (temp, repo, ignore) = setup();
        let outside = tempfile::tempdir().expect("outside");
        fs::write(outside.path().join("secret.txt"), b"nope").expect("write");
        symlink(outside.path().join("secret.txt"), temp.path().join("link")).expect("symlink");
        fs::write(temp.path().join("real.txt"), b"yes").expect("write");

        let entries = scan_worktree(&repo, &ignore).expect("scan");
        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["real.txt"]);
    }

    #[cfg(unix)]
    #[test]
    fn symlink_cycle_is_broken() {
        use std::os::unix::fs::symlink;
        let (temp, repo, ignore) = setup();
        fs::create_dir(temp.path().join("dir")).expect("mkdir");
        fs::write(temp.path().join("dir/f.txt"), b"data").expect("write");
        symlink(temp.path().join("dir"), temp.path().join("dir/loop")).expect("symlink");

        let entries = scan_worktree(&repo, &ignore).expect("scan");
        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["dir/f.txt"]);
    }
}
