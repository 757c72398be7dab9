use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};
use crate::hash::hash_bytes;
use crate::object::ObjectKind;
use crate::oid::Oid;
use crate::repo::Repo;
use crate::util::atomic_write;

/// Content-addressed object files under `.DFM/objects/<kind>/<xx>/<rest>`.
/// The first two hex characters of the hash form the fan-out subdirectory.
pub struct ObjectStore {
    objects_dir: PathBuf,
}

impl ObjectStore {
    pub fn new(repo: &Repo) -> Self {
        Self {
            objects_dir: repo.objects_dir(),
        }
    }

    /// Store `bytes` under its content hash. A second identical write is a
    /// no-op by construction.
    pub fn put(&self, kind: ObjectKind, bytes: &[u8]) -> Result<Oid> {
        let oid = hash_bytes(bytes);
        let path = self.object_path(kind, &oid);
        if path.exists() {
            return Ok(oid);
        }
        atomic_write(&path, bytes)?;
        debug!(kind = kind.dir_name(), %oid, size = bytes.len(), "stored object");
        Ok(oid)
    }

    /// Read an object back, verifying that the bytes still hash to their
    /// identifier. A mismatch is reported as a corrupt object and mutates
    /// nothing.
    pub fn get(&self, kind: ObjectKind, oid: &Oid) -> Result<Option<Vec<u8>>> {
        let path = self.object_path(kind, oid);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let computed = hash_bytes(&bytes);
        if &computed != oid {
            return Err(Error::corrupt(
                oid,
                format!("stored bytes hash to {computed}"),
            ));
        }
        Ok(Some(bytes))
    }

    /// Like [`get`](Self::get) but a missing object is an `unknown_ref`
    /// error rather than `None`.
    pub fn get_required(&self, kind: ObjectKind, oid: &Oid) -> Result<Vec<u8>> {
        self.get(kind, oid)?
            .ok_or_else(|| Error::UnknownRef(oid.to_hex()))
    }

    pub fn exists(&self, kind: ObjectKind, oid: &Oid) -> bool {
        self.object_path(kind, oid).exists()
    }

    pub fn delete(&self, kind: ObjectKind, oid: &Oid) -> Result<bool> {
        let path = self.object_path(kind, oid);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)?;
        if let Some(parent) = path.parent() {
            // Drop the fan-out directory when it empties out.
            let _ = fs::remove_dir(parent);
        }
        Ok(true)
    }

    /// Enumerate every stored object of one kind.
    pub fn list(&self, kind: ObjectKind) -> Result<Vec<Oid>> {
        let mut out = Vec::new();
        let kind_dir = self.objects_dir.join(kind.dir_name());
        if !kind_dir.exists() {
            return Ok(out);
        }
        for dir_entry in fs::read_dir(&kind_dir)? {
            let dir_entry = dir_entry?;
            if !dir_entry.file_type()?.is_dir() {
                continue;
            }
            let dir_name = dir_entry.file_name().to_string_lossy().to_string();
            if dir_name.len() != 2 {
                continue;
            }
            for file_entry in fs::read_dir(dir_entry.path())? {
                let file_entry = file_entry?;
                if !file_entry.file_type()?.is_file() {
                    continue;
                }
                let file_name = file_entry.file_name().to_string_lossy().to_string();
                if file_name.len() != 62 {
                    continue;
                }
                let hex = format!("{dir_name}{file_name}");
                if let Some(oid) = Oid::from_hex(&hex) {
                    out.push(oid);
                }
            }
        }
        Ok(out)
    }

    pub fn object_path(&self, kind: ObjectKind, oid: &Oid) -> PathBuf {
        object_path(&self.objects_dir, kind, oid)
    }
}

pub fn object_path(objects_dir: &Path, kind: ObjectKind, oid: &Oid) -> PathBuf {
    let hex = oid.to_hex();
    let (fanout, rest) = hex.split_at(2);
    objects_dir.join(kind.dir_name()).join(fanout).join(rest)
}
