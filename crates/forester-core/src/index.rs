use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use tracing::debug;

use crate::error::{Error, Result};
use crate::object::{CommitType, Tree, TreeEntryKind};
use crate::oid::Oid;
use crate::repo::Repo;

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Transactional metadata index backed by a single SQLite file. Opened with
/// WAL journaling so readers see a consistent snapshot without blocking the
/// writer; write-side operations run inside one immediate transaction.
pub struct Index {
    conn: Connection,
}

impl Index {
    pub fn open(repo: &Repo) -> Result<Self> {
        let conn = Connection::open(repo.db_path())?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn transaction(&mut self) -> Result<Transaction<'_>> {
        Ok(self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?)
    }

    /// Force a WAL checkpoint so a subsequent connection observes the state
    /// just written. Failure is logged and otherwise ignored.
    pub fn checkpoint(&self) {
        let result = self
            .conn
            .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_row| Ok(()));
        if let Err(err) = result {
            debug!(%err, "wal checkpoint failed");
        }
    }

    // ----- repository state -----

    pub fn current_branch(&self) -> Result<String> {
        Ok(get_meta(&self.conn, "current_branch")?.unwrap_or_else(|| "main".to_string()))
    }

    pub fn head_commit(&self) -> Result<Option<Oid>> {
        match get_meta(&self.conn, "head")? {
            Some(hex) => Ok(Some(parse_oid(&hex)?)),
            None => Ok(None),
        }
    }

    pub fn set_branch_and_head(&mut self, branch: &str, head: Option<Oid>) -> Result<()> {
        let tx = self.transaction()?;
        set_meta(&tx, "current_branch", branch)?;
        set_head_meta(&tx, head)?;
        tx.commit()?;
        self.checkpoint();
        Ok(())
    }

    // ----- commits -----

    pub fn get_commit(&self, hash: &Oid) -> Result<Option<CommitRow>> {
        get_commit(&self.conn, hash)
    }

    /// Resolve a possibly-abbreviated commit hash. An ambiguous prefix is an
    /// unknown ref.
    pub fn find_commit_by_prefix(&self, prefix: &str) -> Result<Option<Oid>> {
        if prefix.len() < 4 || !prefix.chars().all(|c| c.is_ascii_hexdigit()) {
            return Ok(None);
        }
        let mut stmt = self
            .conn
            .prepare("SELECT hash FROM commits WHERE hash LIKE ?1 || '%' LIMIT 2")?;
        let matches: Vec<String> = stmt
            .query_map(params![prefix.to_ascii_lowercase()], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        match matches.as_slice() {
            [] => Ok(None),
            [one] => Ok(Some(parse_oid(one)?)),
            _ => Err(Error::UnknownRef(format!("ambiguous prefix '{prefix}'"))),
        }
    }

    pub fn commits_on_branch(&self, branch: &str) -> Result<Vec<CommitRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT hash, branch, parent_hash, timestamp, message, tree_hash, author, \
                    commit_type, mesh_hashes, screenshot_hash \
             FROM commits WHERE branch = ?1 ORDER BY timestamp ASC, hash ASC",
        )?;
        let rows = stmt.query_map(params![branch], commit_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_commit_row()?);
        }
        Ok(out)
    }

    pub fn commit_count(&self, branch: &str) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM commits WHERE branch = ?1",
            params![branch],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    // ----- branches -----

    pub fn get_branch_tip(&self, name: &str) -> Result<Option<Option<Oid>>> {
        let tip: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT tip FROM branches WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        match tip {
            None => Ok(None),
            Some(None) => Ok(Some(None)),
            Some(Some(hex)) => Ok(Some(Some(parse_oid(&hex)?))),
        }
    }

    pub fn list_branches(&self) -> Result<Vec<(String, Option<Oid>)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, tip FROM branches ORDER BY name ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (name, tip) = row?;
            let tip = match tip {
                Some(hex) => Some(parse_oid(&hex)?),
                None => None,
            };
            out.push((name, tip));
        }
        Ok(out)
    }

    pub fn branch_tips(&self) -> Result<Vec<Oid>> {
        Ok(self
            .list_branches()?
            .into_iter()
            .filter_map(|(_, tip)| tip)
            .collect())
    }

    // ----- commit files / tree entries -----

    pub fn files_for_commit(&self, commit: &Oid) -> Result<Vec<CommitFileRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT path, blob_hash, size FROM commit_files \
             WHERE commit_hash = ?1 ORDER BY path ASC",
        )?;
        let rows = stmt.query_map(params![commit.to_hex()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (path, blob, size) = row?;
            out.push(CommitFileRow {
                path,
                blob_hash: parse_oid(&blob)?,
                size: size as u64,
            });
        }
        Ok(out)
    }

    // ----- meshes / textures -----

    pub fn mesh_name(&self, hash: &Oid) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT name FROM meshes WHERE hash = ?1",
                params![hash.to_hex()],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn get_texture(&self, hash: &Oid) -> Result<Option<TextureRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT hash, original_name, format, width, height, channels, file_size, \
                        created_at FROM textures WHERE hash = ?1",
                params![hash.to_hex()],
                texture_from_row,
            )
            .optional()?;
        match row {
            Some(raw) => Ok(Some(raw.into_texture_row()?)),
            None => Ok(None),
        }
    }

    pub fn textures_for_commit(&self, commit: &Oid) -> Result<Vec<Oid>> {
        let mut stmt = self
            .conn
            .prepare("SELECT texture_hash FROM texture_commits WHERE commit_hash = ?1")?;
        let rows = stmt.query_map(params![commit.to_hex()], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(parse_oid(&row?)?);
        }
        Ok(out)
    }

    // ----- stashes -----

    pub fn get_stash(&self, hash: &Oid) -> Result<Option<StashRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT hash, branch, timestamp, message, tree_hash FROM stashes \
                 WHERE hash = ?1",
                params![hash.to_hex()],
                stash_from_row,
            )
            .optional()?;
        match row {
            Some(raw) => Ok(Some(raw.into_stash_row()?)),
            None => Ok(None),
        }
    }

    pub fn list_stashes(&self) -> Result<Vec<StashRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT hash, branch, timestamp, message, tree_hash FROM stashes \
             ORDER BY timestamp DESC, hash ASC",
        )?;
        let rows = stmt.query_map([], stash_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_stash_row()?);
        }
        Ok(out)
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS commits (
    hash TEXT PRIMARY KEY,
    branch TEXT NOT NULL,
    parent_hash TEXT,
    timestamp INTEGER NOT NULL,
    message TEXT NOT NULL,
    tree_hash TEXT NOT NULL,
    author TEXT NOT NULL,
    commit_type TEXT NOT NULL DEFAULT 'project',
    mesh_hashes TEXT,
    screenshot_hash TEXT
);
CREATE INDEX IF NOT EXISTS idx_commits_branch ON commits(branch);
CREATE INDEX IF NOT EXISTS idx_commits_parent ON commits(parent_hash);

CREATE TABLE IF NOT EXISTS branches (
    name TEXT PRIMARY KEY,
    tip TEXT
);

CREATE TABLE IF NOT EXISTS tree_entries (
    tree_hash TEXT NOT NULL,
    name TEXT NOT NULL,
    kind TEXT NOT NULL,
    entry_hash TEXT NOT NULL,
    PRIMARY KEY (tree_hash, name)
);

CREATE TABLE IF NOT EXISTS commit_files (
    commit_hash TEXT NOT NULL,
    path TEXT NOT NULL,
    blob_hash TEXT NOT NULL,
    size INTEGER NOT NULL,
    PRIMARY KEY (commit_hash, path)
);

CREATE TABLE IF NOT EXISTS meshes (
    hash TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS textures (
    hash TEXT PRIMARY KEY,
    original_name TEXT NOT NULL,
    format TEXT,
    width INTEGER,
    height INTEGER,
    channels INTEGER,
    file_size INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS texture_commits (
    texture_hash TEXT NOT NULL,
    commit_hash TEXT NOT NULL,
    PRIMARY KEY (texture_hash, commit_hash)
);

CREATE TABLE IF NOT EXISTS stashes (
    hash TEXT PRIMARY KEY,
    branch TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    message TEXT NOT NULL,
    tree_hash TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_stashes_timestamp ON stashes(timestamp);

CREATE TABLE IF NOT EXISTS locks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_path TEXT NOT NULL,
    branch TEXT NOT NULL,
    lock_type TEXT NOT NULL,
    locked_by TEXT NOT NULL,
    locked_at INTEGER NOT NULL,
    expires_at INTEGER,
    UNIQUE (file_path, branch, locked_by)
);
CREATE INDEX IF NOT EXISTS idx_locks_branch ON locks(branch);
CREATE INDEX IF NOT EXISTS idx_locks_expires ON locks(expires_at);

CREATE TABLE IF NOT EXISTS comments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    asset_hash TEXT NOT NULL,
    asset_type TEXT NOT NULL,
    author TEXT NOT NULL,
    text TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    x REAL,
    y REAL,
    resolved INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_comments_asset ON comments(asset_hash, asset_type);

CREATE TABLE IF NOT EXISTS approvals (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    asset_hash TEXT NOT NULL,
    asset_type TEXT NOT NULL,
    approver TEXT NOT NULL,
    status TEXT NOT NULL,
    comment TEXT,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_approvals_asset ON approvals(asset_hash, asset_type);

CREATE TABLE IF NOT EXISTS repo_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// One row of the `commits` table.
#[derive(Clone, Debug, PartialEq)]
pub struct CommitRow {
    pub hash: Oid,
    pub branch: String,
    pub parent: Option<Oid>,
    pub timestamp: i64,
    pub message: String,
    pub tree_hash: Oid,
    pub author: String,
    pub commit_type: CommitType,
    pub mesh_hashes: Vec<Oid>,
    pub screenshot_hash: Option<Oid>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CommitFileRow {
    pub path: String,
    pub blob_hash: Oid,
    pub size: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TextureRow {
    pub hash: Oid,
    pub original_name: String,
    pub format: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub channels: Option<u8>,
    pub file_size: u64,
    pub created_at: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StashRow {
    pub hash: Oid,
    pub branch: String,
    pub timestamp: i64,
    pub message: String,
    pub tree_hash: Oid,
}

// ----- write-side helpers, usable inside a transaction -----

pub fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO repo_meta (key, value) VALUES (?1, ?2) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

pub fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT value FROM repo_meta WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?)
}

pub fn set_head_meta(conn: &Connection, head: Option<Oid>) -> Result<()> {
    match head {
        Some(oid) => set_meta(conn, "head", &oid.to_hex()),
        None => {
            conn.execute("DELETE FROM repo_meta WHERE key = 'head'", [])?;
            Ok(())
        }
    }
}

pub fn insert_commit(conn: &Connection, row: &CommitRow) -> Result<()> {
    let mesh_hashes = if row.mesh_hashes.is_empty() {
        None
    } else {
        Some(serde_json::to_string(&row.mesh_hashes)?)
    };
    conn.execute(
        "INSERT INTO commits (hash, branch, parent_hash, timestamp, message, tree_hash, \
                              author, commit_type, mesh_hashes, screenshot_hash) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            row.hash.to_hex(),
            row.branch,
            row.parent.map(|oid| oid.to_hex()),
            row.timestamp,
            row.message,
            row.tree_hash.to_hex(),
            row.author,
            row.commit_type.as_str(),
            mesh_hashes,
            row.screenshot_hash.map(|oid| oid.to_hex()),
        ],
    )?;
    Ok(())
}

pub fn get_commit(conn: &Connection, hash: &Oid) -> Result<Option<CommitRow>> {
    let row = conn
        .query_row(
            "SELECT hash, branch, parent_hash, timestamp, message, tree_hash, author, \
                    commit_type, mesh_hashes, screenshot_hash FROM commits WHERE hash = ?1",
            params![hash.to_hex()],
            commit_from_row,
        )
        .optional()?;
    match row {
        Some(raw) => Ok(Some(raw.into_commit_row()?)),
        None => Ok(None),
    }
}

pub fn delete_commit_row(conn: &Connection, hash: &Oid) -> Result<()> {
    let hex = hash.to_hex();
    conn.execute("DELETE FROM commits WHERE hash = ?1", params![hex])?;
    conn.execute(
        "DELETE FROM commit_files WHERE commit_hash = ?1",
        params![hex],
    )?;
    conn.execute(
        "DELETE FROM texture_commits WHERE commit_hash = ?1",
        params![hex],
    )?;
    Ok(())
}

pub fn upsert_branch(conn: &Connection, name: &str, tip: Option<Oid>) -> Result<()> {
    conn.execute(
        "INSERT INTO branches (name, tip) VALUES (?1, ?2) \
         ON CONFLICT(name) DO UPDATE SET tip = excluded.tip",
        params![name, tip.map(|oid| oid.to_hex())],
    )?;
    Ok(())
}

pub fn delete_branch_row(conn: &Connection, name: &str) -> Result<()> {
    conn.execute("DELETE FROM branches WHERE name = ?1", params![name])?;
    Ok(())
}

pub fn rename_branch_row(conn: &Connection, old: &str, new: &str) -> Result<()> {
    conn.execute(
        "UPDATE branches SET name = ?2 WHERE name = ?1",
        params![old, new],
    )?;
    Ok(())
}

pub fn insert_tree_entries(conn: &Connection, tree_hash: &Oid, tree: &Tree) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR REPLACE INTO tree_entries (tree_hash, name, kind, entry_hash) \
         VALUES (?1, ?2, ?3, ?4)",
    )?;
    for entry in &tree.entries {
        stmt.execute(params![
            tree_hash.to_hex(),
            entry.name,
            entry.kind.as_str(),
            entry.hash.to_hex(),
        ])?;
    }
    Ok(())
}

pub fn get_tree_entries(conn: &Connection, tree_hash: &Oid) -> Result<Tree> {
    let mut stmt = conn.prepare(
        "SELECT name, kind, entry_hash FROM tree_entries WHERE tree_hash = ?1 \
         ORDER BY name ASC",
    )?;
    let rows = stmt.query_map(params![tree_hash.to_hex()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;
    let mut entries = Vec::new();
    for row in rows {
        let (name, kind, hash) = row?;
        let kind = TreeEntryKind::parse(&kind)
            .ok_or_else(|| Error::corrupt(tree_hash, "unknown tree entry kind in index"))?;
        entries.push(crate::object::TreeEntry {
            name,
            kind,
            hash: parse_oid(&hash)?,
        });
    }
    Ok(Tree { entries })
}

pub fn delete_tree_entries(conn: &Connection, tree_hash: &Oid) -> Result<()> {
    conn.execute(
        "DELETE FROM tree_entries WHERE tree_hash = ?1",
        params![tree_hash.to_hex()],
    )?;
    Ok(())
}

pub fn insert_commit_file(
    conn: &Connection,
    commit: &Oid,
    path: &str,
    blob: &Oid,
    size: u64,
) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO commit_files (commit_hash, path, blob_hash, size) \
         VALUES (?1, ?2, ?3, ?4)",
        params![commit.to_hex(), path, blob.to_hex(), size as i64],
    )?;
    Ok(())
}

pub fn upsert_mesh(conn: &Connection, hash: &Oid, name: &str, created_at: i64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO meshes (hash, name, created_at) VALUES (?1, ?2, ?3)",
        params![hash.to_hex(), name, created_at],
    )?;
    Ok(())
}

pub fn delete_mesh_row(conn: &Connection, hash: &Oid) -> Result<()> {
    conn.execute("DELETE FROM meshes WHERE hash = ?1", params![hash.to_hex()])?;
    Ok(())
}

pub fn upsert_texture(conn: &Connection, row: &TextureRow) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO textures (hash, original_name, format, width, height, \
                                         channels, file_size, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            row.hash.to_hex(),
            row.original_name,
            row.format,
            row.width,
            row.height,
            row.channels,
            row.file_size as i64,
            row.created_at,
        ],
    )?;
    Ok(())
}

pub fn delete_texture_row(conn: &Connection, hash: &Oid) -> Result<()> {
    let hex = hash.to_hex();
    conn.execute("DELETE FROM textures WHERE hash = ?1", params![hex])?;
    conn.execute(
        "DELETE FROM texture_commits WHERE texture_hash = ?1",
        params![hex],
    )?;
    Ok(())
}

pub fn link_texture_commit(conn: &Connection, texture: &Oid, commit: &Oid) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO texture_commits (texture_hash, commit_hash) VALUES (?1, ?2)",
        params![texture.to_hex(), commit.to_hex()],
    )?;
    Ok(())
}

pub fn insert_stash(conn: &Connection, row: &StashRow) -> Result<()> {
    conn.execute(
        "INSERT INTO stashes (hash, branch, timestamp, message, tree_hash) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            row.hash.to_hex(),
            row.branch,
            row.timestamp,
            row.message,
            row.tree_hash.to_hex(),
        ],
    )?;
    Ok(())
}

pub fn delete_stash_row(conn: &Connection, hash: &Oid) -> Result<()> {
    conn.execute("DELETE FROM stashes WHERE hash = ?1", params![hash.to_hex()])?;
    Ok(())
}

/// Empty every table; used by rebuild before repopulating from storage.
pub fn clear_all(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "DELETE FROM commits; DELETE FROM branches; DELETE FROM tree_entries; \
         DELETE FROM commit_files; DELETE FROM meshes; DELETE FROM textures; \
         DELETE FROM texture_commits; DELETE FROM stashes; DELETE FROM repo_meta;",
    )?;
    Ok(())
}

pub(crate) fn parse_oid(hex: &str) -> Result<Oid> {
    Oid::from_hex(hex).ok_or_else(|| Error::corrupt(hex, "invalid hash in metadata index"))
}

// Raw row shapes: rusqlite's row mappers cannot return crate errors, so
// hex parsing happens in a second step.

struct RawCommit {
    hash: String,
    branch: String,
    parent: Option<String>,
    timestamp: i64,
    message: String,
    tree_hash: String,
    author: String,
    commit_type: String,
    mesh_hashes: Option<String>,
    screenshot_hash: Option<String>,
}

impl RawCommit {
    fn into_commit_row(self) -> Result<CommitRow> {
        let mesh_hashes = match self.mesh_hashes {
            Some(json) => serde_json::from_str(&json)?,
            None => Vec::new(),
        };
        Ok(CommitRow {
            hash: parse_oid(&self.hash)?,
            branch: self.branch,
            parent: self.parent.as_deref().map(parse_oid).transpose()?,
            timestamp: self.timestamp,
            message: self.message,
            tree_hash: parse_oid(&self.tree_hash)?,
            author: self.author,
            commit_type: CommitType::parse(&self.commit_type)
                .ok_or_else(|| Error::corrupt(&self.hash, "unknown commit type"))?,
            mesh_hashes,
            screenshot_hash: self.screenshot_hash.as_deref().map(parse_oid).transpose()?,
        })
    }
}

fn commit_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawCommit> {
    Ok(RawCommit {
        hash: row.get(0)?,
        branch: row.get(1)?,
        parent: row.get(2)?,
        timestamp: row.get(3)?,
        message: row.get(4)?,
        tree_hash: row.get(5)?,
        author: row.get(6)?,
        commit_type: row.get(7)?,
        mesh_hashes: row.get(8)?,
        screenshot_hash: row.get(9)?,
    })
}

struct RawTexture {
    hash: String,
    original_name: String,
    format: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    channels: Option<u8>,
    file_size: i64,
    created_at: i64,
}

impl RawTexture {
    fn into_texture_row(self) -> Result<TextureRow> {
        Ok(TextureRow {
            hash: parse_oid(&self.hash)?,
            original_name: self.original_name,
            format: self.format,
            width: self.width,
            height: self.height,
            channels: self.channels,
            file_size: self.file_size as u64,
            created_at: self.created_at,
        })
    }
}

fn texture_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawTexture> {
    Ok(RawTexture {
        hash: row.get(0)?,
        original_name: row.get(1)?,
        format: row.get(2)?,
        width: row.get(3)?,
        height: row.get(4)?,
        channels: row.get(5)?,
        file_size: row.get(6)?,
        created_at: row.get(7)?,
    })
}

struct RawStash {
    hash: String,
    branch: String,
    timestamp: i64,
    message: String,
    tree_hash: String,
}

impl RawStash {
    fn into_stash_row(self) -> Result<StashRow> {
        Ok(StashRow {
            hash: parse_oid(&self.hash)?,
            branch: self.branch,
            timestamp: self.timestamp,
            message: self.message,
            tree_hash: parse_oid(&self.tree_hash)?,
        })
    }
}

fn stash_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawStash> {
    Ok(RawStash {
        hash: row.get(0)?,
        branch: row.get(1)?,
        timestamp: row.get(2)?,
        message: row.get(3)?,
        tree_hash: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_index() -> (tempfile::TempDir, Index) {
        let temp = tempfile::tempdir().expect("tempdir");
        let repo = Repo::init(temp.path(), false).expect("init");
        let index = Index::open(&repo).expect("open");
        (temp, index)
    }

    fn sample_commit(fill: u8, branch: &str, parent: Option<Oid>) -> CommitRow {
        CommitRow {
            hash: Oid::new([fill; 32]),
            branch: branch.to_string(),
            parent,
            timestamp: fill as i64,
            message: format!("commit {fill}"),
            tree_hash: Oid::new([fill.wrapping_add(1); 32]),
            author: "tester".to_string(),
            commit_type: CommitType::Project,
            mesh_hashes: Vec::new(),
            screenshot_hash: None,
        }
    }

    #[test]
    fn init_seeds_default_branch_state() {
        let (_temp, index) = open_index();
        assert_eq!(index.current_branch().expect("branch"), "main");
        assert!(index.head_commit().expect("head").is_none());
        assert_eq!(
            index.get_branch_tip("main").expect("tip"),
            Some(None),
            "main exists but is unborn"
        );
    }

    #[test]
    fn commit_rows_roundtrip() {
        let (_temp, mut index) = open_index();
        let first = sample_commit(1, "main", None);
        let second = sample_commit(2, "main", Some(first.hash));
        {
            let tx = index.transaction().expect("tx");
            insert_commit(&tx, &first).expect("insert");
            insert_commit(&tx, &second).expect("insert");
            upsert_branch(&tx, "main", Some(second.hash)).expect("branch");
            tx.commit().expect("commit");
        }
        let got = index.get_commit(&first.hash).expect("get").expect("row");
        assert_eq!(got, first);
        let on_branch = index.commits_on_branch("main").expect("list");
        assert_eq!(on_branch.len(), 2);
        assert_eq!(on_branch[1].parent, Some(first.hash));
        assert_eq!(index.commit_count("main").expect("count"), 2);
        assert_eq!(
            index.get_branch_tip("main").expect("tip"),
            Some(Some(second.hash))
        );
    }

    #[test]
    fn prefix_lookup_detects_ambiguity() {
        let (_temp, mut index) = open_index();
        let a = sample_commit(0xa0, "main", None);
        let mut b = sample_commit(0xa0, "main", None);
        b.hash = {
            let mut bytes = *b.hash.as_bytes();
            bytes[31] = 0xff;
            Oid::new(bytes)
        };
        {
            let tx = index.transaction().expect("tx");
            insert_commit(&tx, &a).expect("insert");
            insert_commit(&tx, &b).expect("insert");
            tx.commit().expect("commit");
        }
        let unique = &a.hash.to_hex()[..63];
        assert_eq!(
            index.find_commit_by_prefix(unique).expect("find"),
            Some(a.hash)
        );
        let err = index.find_commit_by_prefix("a0a0").expect_err("ambiguous");
        assert!(matches!(err, Error::UnknownRef(_)));
        assert!(index
            .find_commit_by_prefix("ffff")
            .expect("find")
            .is_none());
    }

    #[test]
    fn tree_entries_roundtrip() {
        let (_temp, index) = open_index();
        let tree = Tree::new(vec![
            crate::object::TreeEntry {
                name: "a.txt".to_string(),
                kind: TreeEntryKind::Blob,
                hash: Oid::new([1; 32]),
            },
            crate::object::TreeEntry {
                name: "model.mesh.json".to_string(),
                kind: TreeEntryKind::Mesh,
                hash: Oid::new([2; 32]),
            },
        ]);
        let tree_hash = tree.hash();
        insert_tree_entries(index.conn(), &tree_hash, &tree).expect("insert");
        let back = get_tree_entries(index.conn(), &tree_hash).expect("get");
        assert_eq!(back, tree);
    }

    #[test]
    fn stash_rows_roundtrip() {
        let (_temp, index) = open_index();
        let row = StashRow {
            hash: Oid::new([9; 32]),
            branch: "main".to_string(),
            timestamp: 100,
            message: "wip".to_string(),
            tree_hash: Oid::new([8; 32]),
        };
        insert_stash(index.conn(), &row).expect("insert");
        assert_eq!(index.get_stash(&row.hash).expect("get"), Some(row.clone()));
        assert_eq!(index.list_stashes().expect("list"), vec![row.clone()]);
        delete_stash_row(index.conn(), &row.hash).expect("delete");
        assert!(index.get_stash(&row.hash).expect("get").is_none());
    }
}
