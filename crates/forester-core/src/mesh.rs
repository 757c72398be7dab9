use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};
use crate::index::TextureRow;
use crate::object::ObjectKind;
use crate::oid::Oid;
use crate::repo::Repo;
use crate::store::ObjectStore;

/// File-name suffix that marks a working-set file as a mesh descriptor.
pub const MESH_SUFFIX: &str = ".mesh.json";

/// Structured 3D asset. Field declaration order is ascending so the
/// canonical JSON serialization carries sorted keys; floats round-trip at
/// IEEE-754 double precision through serde_json.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeshDoc {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub faces: Vec<Vec<u32>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub materials: Vec<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normals: Option<Vec<[f64; 3]>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub textures: Vec<TextureRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uv: Option<Vec<[f64; 2]>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vertices: Vec<[f64; 3]>,
}

/// Texture reference inside a mesh descriptor. In working-directory form it
/// names a `source` file; after ingestion the reference is by texture hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextureRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub texture: Option<Oid>,
}

impl MeshDoc {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Result of ingesting one mesh descriptor.
pub struct IngestedMesh {
    pub hash: Oid,
    pub doc: MeshDoc,
    pub textures: Vec<TextureRow>,
}

/// Parse a mesh descriptor, store every referenced texture by hash, replace
/// the inline `source` references with texture hashes, and store the
/// normalized mesh object. Re-ingesting unchanged input yields the same
/// hash, so the operation is idempotent.
pub fn ingest_mesh(repo: &Repo, store: &ObjectStore, bytes: &[u8]) -> Result<IngestedMesh> {
    let mut doc = MeshDoc::decode(bytes)?;
    let mut textures = Vec::new();
    for reference in &mut doc.textures {
        let Some(source) = reference.source.take() else {
            continue;
        };
        let path = repo.worktree().join(&source);
        if !path.is_file() {
            warn!(mesh = %doc.name, %source, "texture source missing, keeping path reference");
            reference.source = Some(source);
            continue;
        }
        let row = crate::texture::ingest_texture(store, &path)?;
        reference.texture = Some(row.hash);
        textures.push(row);
    }
    let canonical = doc.encode()?;
    let hash = store.put(ObjectKind::Mesh, &canonical)?;
    Ok(IngestedMesh {
        hash,
        doc,
        textures,
    })
}

/// Load and parse a stored mesh object.
pub fn load_mesh(store: &ObjectStore, hash: &Oid) -> Result<MeshDoc> {
    let bytes = store.get_required(ObjectKind::Mesh, hash)?;
    MeshDoc::decode(&bytes).map_err(|_| Error::corrupt(hash, "mesh object is not valid JSON"))
}

pub fn is_mesh_descriptor(path: &str) -> bool {
    path.ends_with(MESH_SUFFIX)
}

/// Texture hashes referenced by a mesh, for reachability walks.
pub fn texture_hashes(doc: &MeshDoc) -> Vec<Oid> {
    doc.textures.iter().filter_map(|t| t.texture).collect()
}

/// Best-effort parse of a descriptor just to read its object name; used by
/// selective checkout filters.
pub fn descriptor_name(bytes: &[u8]) -> Option<String> {
    MeshDoc::decode(bytes).ok().map(|doc| doc.name)
}
