use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hash::hash_bytes;
use crate::oid::Oid;

/// Kinds of content-addressed objects, one fan-out directory each.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Blob,
    Tree,
    Commit,
    Mesh,
    Texture,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 5] = [
        ObjectKind::Blob,
        ObjectKind::Tree,
        ObjectKind::Commit,
        ObjectKind::Mesh,
        ObjectKind::Texture,
    ];

    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Blob => "blobs",
            Self::Tree => "trees",
            Self::Commit => "commits",
            Self::Mesh => "meshes",
            Self::Texture => "textures",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TreeEntryKind {
    Blob,
    Tree,
    Mesh,
}

impl TreeEntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Blob => "blob",
            Self::Tree => "tree",
            Self::Mesh => "mesh",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "blob" => Some(Self::Blob),
            "tree" => Some(Self::Tree),
            "mesh" => Some(Self::Mesh),
            _ => None,
        }
    }
}

/// Single entry of a tree: one path segment pointing at a child object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeEntry {
    pub name: String,
    pub kind: TreeEntryKind,
    pub hash: Oid,
}

/// Directory snapshot. Entries are kept sorted by name in byte order; the
/// canonical serialization is one `<name>\t<kind>\t<hash>` line per entry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tree {
    pub entries: Vec<TreeEntry>,
}

impl Tree {
    pub fn new(mut entries: Vec<TreeEntry>) -> Self {
        entries.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));
        Self { entries }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&entry.name);
            out.push('\t');
            out.push_str(entry.kind.as_str());
            out.push('\t');
            out.push_str(&entry.hash.to_hex());
            out.push('\n');
        }
        out.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| Error::corrupt("tree", "tree is not valid UTF-8"))?;
        let mut entries = Vec::new();
        for line in text.lines() {
            let mut parts = line.splitn(3, '\t');
            let name = parts
                .next()
                .filter(|name| !name.is_empty())
                .ok_or_else(|| Error::corrupt("tree", "missing entry name"))?;
            let kind = parts
                .next()
                .and_then(TreeEntryKind::parse)
                .ok_or_else(|| Error::corrupt("tree", "unknown entry kind"))?;
            let hash = parts
                .next()
                .and_then(Oid::from_hex)
                .ok_or_else(|| Error::corrupt("tree", "invalid entry hash"))?;
            entries.push(TreeEntry {
                name: name.to_string(),
                kind,
                hash,
            });
        }
        Ok(Self { entries })
    }

    pub fn hash(&self) -> Oid {
        hash_bytes(&self.encode())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitType {
    Project,
    MeshOnly,
}

impl CommitType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::MeshOnly => "mesh_only",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "project" => Some(Self::Project),
            "mesh_only" => Some(Self::MeshOnly),
            _ => None,
        }
    }
}

/// Commit record. The stash record has the same shape with `parent: None`,
/// so the store treats both uniformly.
///
/// Fields are declared in ascending key order: the canonical wire format is
/// JSON with sorted keys, and serde emits struct fields in declaration
/// order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub author: String,
    pub branch: String,
    pub commit_type: CommitType,
    #[serde(default)]
    pub mesh_hashes: Vec<Oid>,
    pub message: String,
    pub parent: Option<Oid>,
    pub timestamp: i64,
    pub tree_hash: Oid,
}

impl CommitRecord {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn hash(&self) -> Result<Oid> {
        Ok(hash_bytes(&self.encode()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry(name: &str, kind: TreeEntryKind, fill: u8) -> TreeEntry {
        TreeEntry {
            name: name.to_string(),
            kind,
            hash: Oid::new([fill; 32]),
        }
    }

    #[test]
    fn tree_roundtrip_sorted() {
        let tree = Tree::new(vec![
            sample_entry("b.txt", TreeEntryKind::Blob, 0x22),
            sample_entry("a.txt", TreeEntryKind::Blob, 0x11),
            sample_entry("sub", TreeEntryKind::Tree, 0x33),
        ]);
        assert_eq!(tree.entries[0].name, "a.txt");
        let decoded = Tree::decode(&tree.encode()).expect("decode");
        assert_eq!(decoded, tree);
    }

    #[test]
    fn tree_hash_ignores_input_order() {
        let a = Tree::new(vec![
            sample_entry("x", TreeEntryKind::Blob, 1),
            sample_entry("y", TreeEntryKind::Mesh, 2),
        ]);
        let b = Tree::new(vec![
            sample_entry("y", TreeEntryKind::Mesh, 2),
            sample_entry("x", TreeEntryKind::Blob, 1),
        ]);
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn tree_decode_rejects_garbage() {
        assert!(Tree::decode(b"name-without-fields\n").is_err());
        assert!(Tree::decode(b"a\tblob\tnothex\n").is_err());
    }

    #[test]
    fn commit_record_keys_are_sorted() {
        let record = CommitRecord {
            author: "alice".to_string(),
            branch: "main".to_string(),
            commit_type: CommitType::Project,
            mesh_hashes: Vec::new(),
            message: "first".to_string(),
            parent: None,
            timestamp: 1_700_000_000,
            tree_hash: Oid::new([0x42; 32]),
        };
        let json = String::from_utf8(record.encode().expect("encode")).expect("utf8");
        let key_positions: Vec<usize> = [
            "\"author\"",
            "\"branch\"",
            "\"commit_type\"",
            "\"mesh_hashes\"",
            "\"message\"",
            "\"parent\"",
            "\"timestamp\"",
            "\"tree_hash\"",
        ]
        .iter()
        .map(|key| json.find(key).expect("key present"))
        .collect();
        assert!(key_positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn commit_hash_covers_parent() {
        let mut record = CommitRecord {
            author: "alice".to_string(),
            branch: "main".to_string(),
            commit_type: CommitType::Project,
            mesh_hashes: Vec::new(),
            message: "msg".to_string(),
            parent: None,
            timestamp: 10,
            tree_hash: Oid::new([0x01; 32]),
        };
        let first = record.hash().expect("hash");
        record.parent = Some(Oid::new([0x02; 32]));
        let second = record.hash().expect("hash");
        assert_ne!(first, second);
    }
}
