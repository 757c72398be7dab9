use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::oid::Oid;
use crate::repo::Repo;
use crate::util::atomic_write;

/// The currently checked-out branch, or a bare commit during detached
/// checkout (serialized with a leading `@`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Head {
    Branch(String),
    Detached(Oid),
}

pub fn read_head(repo: &Repo) -> Result<Head> {
    let data = fs::read(repo.head_path())?;
    let text = String::from_utf8_lossy(&data);
    let text = text.trim();
    if let Some(hex) = text.strip_prefix('@') {
        let oid = Oid::from_hex(hex).ok_or_else(|| Error::corrupt("HEAD", "invalid commit hash"))?;
        Ok(Head::Detached(oid))
    } else if text.is_empty() {
        Err(Error::corrupt("HEAD", "empty HEAD file"))
    } else {
        Ok(Head::Branch(text.to_string()))
    }
}

pub fn write_head(repo: &Repo, head: &Head) -> Result<()> {
    let data = match head {
        Head::Branch(name) => format!("{name}\n"),
        Head::Detached(oid) => format!("@{}\n", oid.to_hex()),
    };
    atomic_write(&repo.head_path(), data.as_bytes())
}

/// Read a branch ref file. `Ok(None)` distinguishes an unborn branch (the
/// file exists but is empty) from a missing branch, which is an error.
pub fn read_branch_ref(repo: &Repo, name: &str) -> Result<Option<Oid>> {
    read_ref_file(&repo.branch_ref_path(name), name)
}

pub fn write_branch_ref(repo: &Repo, name: &str, tip: Option<&Oid>) -> Result<()> {
    let data = match tip {
        Some(oid) => format!("{}\n", oid.to_hex()),
        None => String::new(),
    };
    atomic_write(&repo.branch_ref_path(name), data.as_bytes())
}

pub fn delete_branch_ref(repo: &Repo, name: &str) -> Result<()> {
    fs::remove_file(repo.branch_ref_path(name))?;
    Ok(())
}

pub fn branch_ref_exists(repo: &Repo, name: &str) -> bool {
    repo.branch_ref_path(name).is_file()
}

pub fn read_tag_ref(repo: &Repo, name: &str) -> Result<Option<Oid>> {
    let path = repo.tag_ref_path(name);
    if !path.is_file() {
        return Ok(None);
    }
    read_ref_file(&path, name)
}

pub fn write_tag_ref(repo: &Repo, name: &str, target: &Oid) -> Result<()> {
    atomic_write(
        &repo.tag_ref_path(name),
        format!("{}\n", target.to_hex()).as_bytes(),
    )
}

pub fn delete_tag_ref(repo: &Repo, name: &str) -> Result<()> {
    fs::remove_file(repo.tag_ref_path(name))?;
    Ok(())
}

fn read_ref_file(path: &Path, name: &str) -> Result<Option<Oid>> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::UnknownRef(name.to_string()))
        }
        Err(err) => return Err(err.into()),
    };
    let text = String::from_utf8_lossy(&data);
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    let oid = Oid::from_hex(text)
        .ok_or_else(|| Error::corrupt(name, "ref file does not hold a commit hash"))?;
    Ok(Some(oid))
}

/// List `(name, tip)` for every ref file in a directory. Unreadable entries
/// are skipped.
pub fn list_ref_dir(dir: &Path) -> Result<Vec<(String, Option<Oid>)>> {
    let mut out = Vec::new();
    if !dir.is_dir() {
        return Ok(out);
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        let data = fs::read(entry.path())?;
        let text = String::from_utf8_lossy(&data);
        let text = text.trim();
        let tip = if text.is_empty() {
            None
        } else {
            Oid::from_hex(text)
        };
        if !text.is_empty() && tip.is_none() {
            continue;
        }
        out.push((name, tip));
    }
    out.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_roundtrip() {
        let temp = tempfile::tempdir().expect("tempdir");
        let repo = Repo::init(temp.path(), false).expect("init");
        assert_eq!(read_head(&repo).expect("head"), Head::Branch("main".into()));

        let oid = Oid::new([0x5a; 32]);
        write_head(&repo, &Head::Detached(oid)).expect("write");
        assert_eq!(read_head(&repo).expect("head"), Head::Detached(oid));
        let raw = fs::read_to_string(repo.head_path()).expect("raw");
        assert!(raw.starts_with('@'));
    }

    #[test]
    fn branch_ref_distinguishes_unborn_from_missing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let repo = Repo::init(temp.path(), false).expect("init");
        // main exists but has no commits.
        assert_eq!(read_branch_ref(&repo, "main").expect("read"), None);
        assert!(matches!(
            read_branch_ref(&repo, "ghost"),
            Err(Error::UnknownRef(_))
        ));

        let oid = Oid::new([0x11; 32]);
        write_branch_ref(&repo, "main", Some(&oid)).expect("write");
        assert_eq!(read_branch_ref(&repo, "main").expect("read"), Some(oid));
    }

    #[test]
    fn tag_refs_roundtrip() {
        let temp = tempfile::tempdir().expect("tempdir");
        let repo = Repo::init(temp.path(), false).expect("init");
        let oid = Oid::new([0x22; 32]);
        assert_eq!(read_tag_ref(&repo, "v1").expect("read"), None);
        write_tag_ref(&repo, "v1", &oid).expect("write");
        assert_eq!(read_tag_ref(&repo, "v1").expect("read"), Some(oid));

        let listed = list_ref_dir(&repo.tags_dir()).expect("list");
        assert_eq!(listed, vec![("v1".to_string(), Some(oid))]);

        delete_tag_ref(&repo, "v1").expect("delete");
        assert_eq!(read_tag_ref(&repo, "v1").expect("read"), None);
    }
}
