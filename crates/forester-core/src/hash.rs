use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::oid::Oid;

const READ_CHUNK: usize = 8 * 1024;

/// Streaming SHA-256. Callers feed chunks and finalize to an [`Oid`].
pub struct Hasher {
    inner: Sha256,
}

impl Hasher {
    pub fn new() -> Self {
        Self {
            inner: Sha256::new(),
        }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
    }

    pub fn finish(self) -> Oid {
        Oid::new(self.inner.finalize().into())
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

pub fn hash_bytes(bytes: &[u8]) -> Oid {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finish()
}

/// Hash a file's contents without loading it whole, returning the digest
/// and the byte length read.
pub fn hash_file(path: &Path) -> Result<(Oid, u64)> {
    let mut file = File::open(path)?;
    let mut hasher = Hasher::new();
    let mut buf = vec![0u8; READ_CHUNK];
    let mut total = 0u64;
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        total += read as u64;
        hasher.update(&buf[..read]);
    }
    Ok((hasher.finish(), total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_known_digest() {
        // SHA-256 of the empty input.
        let oid = hash_bytes(b"");
        assert_eq!(
            oid.to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn streaming_equals_oneshot() {
        let mut hasher = Hasher::new();
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(hasher.finish(), hash_bytes(b"hello world"));
    }

    #[test]
    fn file_hash_matches_bytes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("data.bin");
        std::fs::write(&path, b"some file contents").expect("write");
        let (oid, len) = hash_file(&path).expect("hash");
        assert_eq!(len, 18);
        assert_eq!(oid, hash_bytes(b"some file contents"));
    }
}
