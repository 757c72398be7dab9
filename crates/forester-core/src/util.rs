use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Result;

static STAGE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Stage `bytes` in a sibling temp file, fsync it, then rename it over
/// `path` and sync the directory. Two concurrent writers of the same
/// content-addressed target cannot corrupt each other: they rename
/// identical bytes onto the same name.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no parent")
    })?;
    fs::create_dir_all(parent)?;

    // Process id plus a process-wide sequence keeps stage names unique;
    // create_new guards against a stale leftover with the same name.
    let (stage_path, mut stage) = loop {
        let seq = STAGE_SEQ.fetch_add(1, Ordering::Relaxed);
        let candidate = parent.join(format!(".stage-{}-{seq}", process::id()));
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
        {
            Ok(file) => break (candidate, file),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err.into()),
        }
    };

    if let Err(err) = stage.write_all(bytes).and_then(|()| stage.sync_all()) {
        drop(stage);
        let _ = fs::remove_file(&stage_path);
        return Err(err.into());
    }
    drop(stage);

    if let Err(err) = fs::rename(&stage_path, path) {
        let _ = fs::remove_file(&stage_path);
        return Err(err.into());
    }
    File::open(parent)?.sync_all()?;
    Ok(())
}

/// Current wall-clock time as epoch seconds.
pub fn unix_now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_creates_parents() {
        let temp = tempfile::tempdir().expect("tempdir");
        let target = temp.path().join("a/b/c.txt");
        atomic_write(&target, b"payload").expect("write");
        assert_eq!(fs::read(&target).expect("read"), b"payload");
    }

    #[test]
    fn atomic_write_replaces_existing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let target = temp.path().join("file.txt");
        atomic_write(&target, b"one").expect("write");
        atomic_write(&target, b"two").expect("rewrite");
        assert_eq!(fs::read(&target).expect("read"), b"two");
    }

    #[test]
    fn no_stage_files_left_behind() {
        let temp = tempfile::tempdir().expect("tempdir");
        atomic_write(&temp.path().join("x.bin"), b"data").expect("write");
        atomic_write(&temp.path().join("y.bin"), b"data").expect("write");
        let leftovers: Vec<_> = fs::read_dir(temp.path())
            .expect("read dir")
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(".stage-"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
