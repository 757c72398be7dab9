use rusqlite::{params, Connection};

use crate::error::Result;
use crate::index::Index;
use crate::util::unix_now;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockType {
    Exclusive,
    Shared,
}

impl LockType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exclusive => "exclusive",
            Self::Shared => "shared",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "exclusive" => Some(Self::Exclusive),
            "shared" => Some(Self::Shared),
            _ => None,
        }
    }
}

/// Advisory ownership record for a file path on a branch. Expired locks are
/// treated as absent by every query and lazily purged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockRow {
    pub file_path: String,
    pub branch: String,
    pub lock_type: LockType,
    pub locked_by: String,
    pub locked_at: i64,
    pub expires_at: Option<i64>,
}

/// Try to take a lock. Returns `false` without changing anything when the
/// state machine forbids it: an exclusive request on any held state, or a
/// shared request against an exclusive holder.
pub fn lock_file(
    index: &mut Index,
    file_path: &str,
    branch: &str,
    locked_by: &str,
    lock_type: LockType,
    ttl_secs: Option<i64>,
) -> Result<bool> {
    let now = unix_now();
    let expires_at = ttl_secs.map(|ttl| now + ttl);
    let tx = index.transaction()?;

    tx.execute(
        "DELETE FROM locks WHERE file_path = ?1 AND branch = ?2 \
         AND expires_at IS NOT NULL AND expires_at <= ?3",
        params![file_path, branch, now],
    )?;

    let holders = active_rows(&tx, file_path, branch, now)?;
    let allowed = match lock_type {
        LockType::Exclusive => holders.is_empty(),
        LockType::Shared => holders.iter().all(|h| h.lock_type == LockType::Shared),
    };
    if !allowed {
        return Ok(false);
    }

    tx.execute(
        "INSERT INTO locks (file_path, branch, lock_type, locked_by, locked_at, expires_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
         ON CONFLICT(file_path, branch, locked_by) DO UPDATE SET \
             lock_type = excluded.lock_type, \
             locked_at = excluded.locked_at, \
             expires_at = excluded.expires_at",
        params![
            file_path,
            branch,
            lock_type.as_str(),
            locked_by,
            now,
            expires_at
        ],
    )?;
    tx.commit()?;
    Ok(true)
}

/// Release a lock. An unlock by a non-owner returns `false` and makes no
/// changes.
pub fn unlock_file(
    index: &mut Index,
    file_path: &str,
    branch: &str,
    locked_by: &str,
) -> Result<bool> {
    let tx = index.transaction()?;
    let removed = tx.execute(
        "DELETE FROM locks WHERE file_path = ?1 AND branch = ?2 AND locked_by = ?3",
        params![file_path, branch, locked_by],
    )?;
    tx.commit()?;
    Ok(removed > 0)
}

pub fn lock_files(
    index: &mut Index,
    file_paths: &[String],
    branch: &str,
    locked_by: &str,
    lock_type: LockType,
    ttl_secs: Option<i64>,
) -> Result<Vec<(String, bool)>> {
    let mut out = Vec::with_capacity(file_paths.len());
    for path in file_paths {
        let ok = lock_file(index, path, branch, locked_by, lock_type, ttl_secs)?;
        out.push((path.clone(), ok));
    }
    Ok(out)
}

pub fn unlock_files(
    index: &mut Index,
    file_paths: &[String],
    branch: &str,
    locked_by: &str,
) -> Result<Vec<(String, bool)>> {
    let mut out = Vec::with_capacity(file_paths.len());
    for path in file_paths {
        let ok = unlock_file(index, path, branch, locked_by)?;
        out.push((path.clone(), ok));
    }
    Ok(out)
}

/// Active locks, optionally filtered by branch and owner.
pub fn get_locks(
    index: &Index,
    branch: Option<&str>,
    locked_by: Option<&str>,
) -> Result<Vec<LockRow>> {
    const COLUMNS: &str = "file_path, branch, lock_type, locked_by, locked_at, expires_at";
    let now = unix_now();
    let conn = index.conn();

    let rows: Vec<Option<LockRow>> = match (branch, locked_by) {
        (Some(branch), Some(user)) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM locks WHERE branch = ?1 AND locked_by = ?2 \
                 AND (expires_at IS NULL OR expires_at > ?3) \
                 ORDER BY locked_at DESC, file_path ASC"
            ))?;
            let mapped = stmt.query_map(params![branch, user, now], row_to_lock)?;
            mapped.collect::<rusqlite::Result<_>>()?
        }
        (Some(branch), None) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM locks WHERE branch = ?1 \
                 AND (expires_at IS NULL OR expires_at > ?2) \
                 ORDER BY locked_at DESC, file_path ASC"
            ))?;
            let mapped = stmt.query_map(params![branch, now], row_to_lock)?;
            mapped.collect::<rusqlite::Result<_>>()?
        }
        (None, Some(user)) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM locks WHERE locked_by = ?1 \
                 AND (expires_at IS NULL OR expires_at > ?2) \
                 ORDER BY locked_at DESC, file_path ASC"
            ))?;
            let mapped = stmt.query_map(params![user, now], row_to_lock)?;
            mapped.collect::<rusqlite::Result<_>>()?
        }
        (None, None) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM locks WHERE expires_at IS NULL OR expires_at > ?1 \
                 ORDER BY locked_at DESC, file_path ASC"
            ))?;
            let mapped = stmt.query_map(params![now], row_to_lock)?;
            mapped.collect::<rusqlite::Result<_>>()?
        }
    };
    Ok(rows.into_iter().flatten().collect())
}

/// Every active lock on any of `paths` held by someone other than `user`
/// on the given branch.
pub fn check_conflicts(
    index: &Index,
    branch: &str,
    paths: &[String],
    user: &str,
) -> Result<Vec<LockRow>> {
    let now = unix_now();
    let mut stmt = index.conn().prepare(
        "SELECT file_path, branch, lock_type, locked_by, locked_at, expires_at FROM locks \
         WHERE branch = ?1 AND file_path = ?2 AND locked_by != ?3 \
         AND (expires_at IS NULL OR expires_at > ?4)",
    )?;
    let mut out = Vec::new();
    for path in paths {
        let rows = stmt.query_map(params![branch, path, user, now], row_to_lock)?;
        for row in rows {
            if let Some(lock) = row? {
                out.push(lock);
            }
        }
    }
    Ok(out)
}

/// Delete every expired lock row; returns the number removed.
pub fn purge_expired(index: &mut Index) -> Result<usize> {
    let now = unix_now();
    let tx = index.transaction()?;
    let removed = tx.execute(
        "DELETE FROM locks WHERE expires_at IS NOT NULL AND expires_at <= ?1",
        params![now],
    )?;
    tx.commit()?;
    Ok(removed)
}

fn active_rows(
    conn: &Connection,
    file_path: &str,
    branch: &str,
    now: i64,
) -> Result<Vec<LockRow>> {
    let mut stmt = conn.prepare(
        "SELECT file_path, branch, lock_type, locked_by, locked_at, expires_at FROM locks \
         WHERE file_path = ?1 AND branch = ?2 \
         AND (expires_at IS NULL OR expires_at > ?3)",
    )?;
    let rows = stmt.query_map(params![file_path, branch, now], row_to_lock)?;
    let mut out = Vec::new();
    for row in rows {
        if let Some(lock) = row? {
            out.push(lock);
        }
    }
    Ok(out)
}

fn row_to_lock(row: &rusqlite::Row<'_>) -> rusqlite::Result<Option<LockRow>> {
    let lock_type: String = row.get(2)?;
    let Some(lock_type) = LockType::parse(&lock_type) else {
        return Ok(None);
    };
    Ok(Some(LockRow {
        file_path: row.get(0)?,
        branch: row.get(1)?,
        lock_type,
        locked_by: row.get(3)?,
        locked_at: row.get(4)?,
        expires_at: row.get(5)?,
    }))
}
