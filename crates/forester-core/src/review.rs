use rusqlite::{params, OptionalExtension};

use crate::error::Result;
use crate::index::Index;
use crate::oid::Oid;
use crate::util::unix_now;

/// Asset categories review records attach to. Hashes are not validated to
/// exist; comments may outlive their assets and GC leaves them alone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssetType {
    Mesh,
    Blob,
    Commit,
}

impl AssetType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mesh => "mesh",
            Self::Blob => "blob",
            Self::Commit => "commit",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "mesh" => Some(Self::Mesh),
            "blob" => Some(Self::Blob),
            "commit" => Some(Self::Commit),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Comment {
    pub id: i64,
    pub asset_hash: Oid,
    pub asset_type: AssetType,
    pub author: String,
    pub text: String,
    pub created_at: i64,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub resolved: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Approval {
    pub asset_hash: Oid,
    pub asset_type: AssetType,
    pub approver: String,
    pub status: ApprovalStatus,
    pub comment: Option<String>,
    pub created_at: i64,
}

/// Attach a comment to an asset, optionally anchored at viewport
/// coordinates. Returns the new row id.
pub fn comment_on_asset(
    index: &mut Index,
    asset_hash: &Oid,
    asset_type: AssetType,
    author: &str,
    text: &str,
    position: Option<(f64, f64)>,
) -> Result<i64> {
    let tx = index.transaction()?;
    tx.execute(
        "INSERT INTO comments (asset_hash, asset_type, author, text, created_at, x, y) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            asset_hash.to_hex(),
            asset_type.as_str(),
            author,
            text,
            unix_now(),
            position.map(|p| p.0),
            position.map(|p| p.1),
        ],
    )?;
    let id = tx.last_insert_rowid();
    tx.commit()?;
    Ok(id)
}

pub fn get_comments(
    index: &Index,
    asset_hash: &Oid,
    asset_type: AssetType,
    include_resolved: bool,
) -> Result<Vec<Comment>> {
    let sql = if include_resolved {
        "SELECT id, asset_hash, asset_type, author, text, created_at, x, y, resolved \
         FROM comments WHERE asset_hash = ?1 AND asset_type = ?2 ORDER BY created_at ASC, id ASC"
    } else {
        "SELECT id, asset_hash, asset_type, author, text, created_at, x, y, resolved \
         FROM comments WHERE asset_hash = ?1 AND asset_type = ?2 AND resolved = 0 \
         ORDER BY created_at ASC, id ASC"
    };
    let mut stmt = index.conn().prepare(sql)?;
    let rows = stmt.query_map(params![asset_hash.to_hex(), asset_type.as_str()], raw_comment)?;
    let mut out = Vec::new();
    for row in rows {
        if let Some(comment) = row?.into_comment() {
            out.push(comment);
        }
    }
    Ok(out)
}

pub fn resolve_comment(index: &mut Index, id: i64) -> Result<bool> {
    let tx = index.transaction()?;
    let updated = tx.execute("UPDATE comments SET resolved = 1 WHERE id = ?1", params![id])?;
    tx.commit()?;
    Ok(updated > 0)
}

pub fn delete_comment(index: &mut Index, id: i64) -> Result<bool> {
    let tx = index.transaction()?;
    let deleted = tx.execute("DELETE FROM comments WHERE id = ?1", params![id])?;
    tx.commit()?;
    Ok(deleted > 0)
}

/// Record an approval decision. The store is append-mostly: a new row per
/// decision, and the latest row per `(asset, approver)` wins.
pub fn approve_asset(
    index: &mut Index,
    asset_hash: &Oid,
    asset_type: AssetType,
    approver: &str,
    status: ApprovalStatus,
    comment: Option<&str>,
) -> Result<()> {
    let tx = index.transaction()?;
    tx.execute(
        "INSERT INTO approvals (asset_hash, asset_type, approver, status, comment, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            asset_hash.to_hex(),
            asset_type.as_str(),
            approver,
            status.as_str(),
            comment,
            unix_now(),
        ],
    )?;
    tx.commit()?;
    Ok(())
}

/// Current status for one `(asset, approver)` pair.
pub fn get_approval(
    index: &Index,
    asset_hash: &Oid,
    asset_type: AssetType,
    approver: &str,
) -> Result<Option<Approval>> {
    let row = index
        .conn()
        .query_row(
            "SELECT asset_hash, asset_type, approver, status, comment, created_at \
             FROM approvals WHERE asset_hash = ?1 AND asset_type = ?2 AND approver = ?3 \
             ORDER BY created_at DESC, id DESC LIMIT 1",
            params![asset_hash.to_hex(), asset_type.as_str(), approver],
            raw_approval,
        )
        .optional()?;
    Ok(row.and_then(RawApproval::into_approval))
}

/// Latest decision per approver for an asset.
pub fn get_approvals(index: &Index, asset_hash: &Oid, asset_type: AssetType) -> Result<Vec<Approval>> {
    let mut stmt = index.conn().prepare(
        "SELECT asset_hash, asset_type, approver, status, comment, created_at FROM approvals \
         WHERE asset_hash = ?1 AND asset_type = ?2 \
         AND id IN (SELECT MAX(id) FROM approvals \
                    WHERE asset_hash = ?1 AND asset_type = ?2 GROUP BY approver) \
         ORDER BY approver ASC",
    )?;
    let rows = stmt.query_map(params![asset_hash.to_hex(), asset_type.as_str()], raw_approval)?;
    let mut out = Vec::new();
    for row in rows {
        if let Some(approval) = row?.into_approval() {
            out.push(approval);
        }
    }
    Ok(out)
}

struct RawComment {
    id: i64,
    asset_hash: String,
    asset_type: String,
    author: String,
    text: String,
    created_at: i64,
    x: Option<f64>,
    y: Option<f64>,
    resolved: i64,
}

impl RawComment {
    fn into_comment(self) -> Option<Comment> {
        Some(Comment {
            id: self.id,
            asset_hash: Oid::from_hex(&self.asset_hash)?,
            asset_type: AssetType::parse(&self.asset_type)?,
            author: self.author,
            text: self.text,
            created_at: self.created_at,
            x: self.x,
            y: self.y,
            resolved: self.resolved != 0,
        })
    }
}

fn raw_comment(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawComment> {
    Ok(RawComment {
        id: row.get(0)?,
        asset_hash: row.get(1)?,
        asset_type: row.get(2)?,
        author: row.get(3)?,
        text: row.get(4)?,
        created_at: row.get(5)?,
        x: row.get(6)?,
        y: row.get(7)?,
        resolved: row.get(8)?,
    })
}

struct RawApproval {
    asset_hash: String,
    asset_type: String,
    approver: String,
    status: String,
    comment: Option<String>,
    created_at: i64,
}

impl RawApproval {
    fn into_approval(self) -> Option<Approval> {
        Some(Approval {
            asset_hash: Oid::from_hex(&self.asset_hash)?,
            asset_type: AssetType::parse(&self.asset_type)?,
            approver: self.approver,
            status: ApprovalStatus::parse(&self.status)?,
            comment: self.comment,
            created_at: self.created_at,
        })
    }
}

fn raw_approval(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawApproval> {
    Ok(RawApproval {
        asset_hash: row.get(0)?,
        asset_type: row.get(1)?,
        approver: row.get(2)?,
        status: row.get(3)?,
        comment: row.get(4)?,
        created_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::Repo;

    fn index() -> (tempfile::TempDir, Index) {
        let temp = tempfile::tempdir().expect("tempdir");
        let repo = Repo::init(temp.path(), false).expect("init");
        let index = Index::open(&repo).expect("open");
        (temp, index)
    }

    #[test]
    fn comment_lifecycle() {
        let (_temp, mut index) = index();
        let asset = Oid::new([0x10; 32]);
        let id = comment_on_asset(
            &mut index,
            &asset,
            AssetType::Mesh,
            "alice",
            "wing looks off",
            Some((0.4, 0.8)),
        )
        .expect("comment");
        assert!(id > 0);

        let open = get_comments(&index, &asset, AssetType::Mesh, false).expect("list");
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].text, "wing looks off");
        assert_eq!(open[0].x, Some(0.4));
        assert!(!open[0].resolved);

        assert!(resolve_comment(&mut index, id).expect("resolve"));
        assert!(get_comments(&index, &asset, AssetType::Mesh, false)
            .expect("list")
            .is_empty());
        let all = get_comments(&index, &asset, AssetType::Mesh, true).expect("list");
        assert_eq!(all.len(), 1);
        assert!(all[0].resolved);

        assert!(delete_comment(&mut index, id).expect("delete"));
        assert!(!delete_comment(&mut index, id).expect("gone"));
    }

    #[test]
    fn latest_approval_row_wins() {
        let (_temp, mut index) = index();
        let asset = Oid::new([0x20; 32]);
        approve_asset(&mut index, &asset, AssetType::Commit, "bob", ApprovalStatus::Pending, None)
            .expect("pending");
        approve_asset(
            &mut index,
            &asset,
            AssetType::Commit,
            "bob",
            ApprovalStatus::Rejected,
            Some("needs normals"),
        )
        .expect("rejected");
        approve_asset(&mut index, &asset, AssetType::Commit, "eve", ApprovalStatus::Approved, None)
            .expect("approved");

        let bob = get_approval(&index, &asset, AssetType::Commit, "bob")
            .expect("get")
            .expect("row");
        assert_eq!(bob.status, ApprovalStatus::Rejected);
        assert_eq!(bob.comment.as_deref(), Some("needs normals"));

        let latest = get_approvals(&index, &asset, AssetType::Commit).expect("all");
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].approver, "bob");
        assert_eq!(latest[0].status, ApprovalStatus::Rejected);
        assert_eq!(latest[1].approver, "eve");
        assert_eq!(latest[1].status, ApprovalStatus::Approved);
    }

    #[test]
    fn comments_do_not_require_existing_assets() {
        let (_temp, mut index) = index();
        let ghost = Oid::new([0xee; 32]);
        comment_on_asset(&mut index, &ghost, AssetType::Blob, "alice", "orphan note", None)
            .expect("comment");
        assert_eq!(
            get_comments(&index, &ghost, AssetType::Blob, true)
                .expect("list")
                .len(),
            1
        );
    }
}
