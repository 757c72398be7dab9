use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::Result;
use crate::index::TextureRow;
use crate::object::ObjectKind;
use crate::store::ObjectStore;
use crate::util::unix_now;

/// Ingest one texture file: store the raw bytes by hash and derive image
/// metadata from the container header. Two meshes referencing the same
/// texture bytes share a single stored object.
pub fn ingest_texture(store: &ObjectStore, path: &Path) -> Result<TextureRow> {
    let bytes = fs::read(path)?;
    let hash = store.put(ObjectKind::Texture, &bytes)?;
    let probe = probe_image(&bytes);
    let original_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| hash.to_hex());
    debug!(%hash, name = %original_name, "ingested texture");
    Ok(TextureRow {
        hash,
        original_name,
        format: probe.format,
        width: probe.width,
        height: probe.height,
        channels: probe.channels,
        file_size: bytes.len() as u64,
        created_at: unix_now(),
    })
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImageProbe {
    pub format: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub channels: Option<u8>,
}

/// Best-effort dimensions/channels from PNG and JPEG headers. Unknown
/// containers keep `None` metadata; the bytes are stored either way.
pub fn probe_image(bytes: &[u8]) -> ImageProbe {
    if let Some(probe) = probe_png(bytes) {
        return probe;
    }
    if let Some(probe) = probe_jpeg(bytes) {
        return probe;
    }
    ImageProbe::default()
}

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];

fn probe_png(bytes: &[u8]) -> Option<ImageProbe> {
    // Signature, IHDR length+tag, then width/height/bit-depth/color-type.
    if bytes.len() < 33 || bytes[..8] != PNG_SIGNATURE || &bytes[12..16] != b"IHDR" {
        return None;
    }
    let width = u32::from_be_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
    let height = u32::from_be_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]);
    let channels = match bytes[25] {
        0 => Some(1), // grayscale
        2 => Some(3), // rgb
        3 => Some(1), // palette
        4 => Some(2), // grayscale + alpha
        6 => Some(4), // rgba
        _ => None,
    };
    Some(ImageProbe {
        format: Some("png".to_string()),
        width: Some(width),
        height: Some(height),
        channels,
    })
}

fn probe_jpeg(bytes: &[u8]) -> Option<ImageProbe> {
    if bytes.len() < 4 || bytes[0] != 0xff || bytes[1] != 0xd8 {
        return None;
    }
    // Scan marker segments for a start-of-frame header.
    let mut pos = 2usize;
    while pos + 4 <= bytes.len() {
        if bytes[pos] != 0xff {
            pos += 1;
            continue;
        }
        let marker = bytes[pos + 1];
        if matches!(marker, 0xc0 | 0xc1 | 0xc2) {
            if pos + 10 > bytes.len() {
                break;
            }
            let height = u16::from_be_bytes([bytes[pos + 5], bytes[pos + 6]]) as u32;
            let width = u16::from_be_bytes([bytes[pos + 7], bytes[pos + 8]]) as u32;
            let channels = bytes[pos + 9];
            return Some(ImageProbe {
                format: Some("jpeg".to_string()),
                width: Some(width),
                height: Some(height),
                channels: Some(channels),
            });
        }
        if matches!(marker, 0xd8 | 0x01 | 0xd0..=0xd7) {
            pos += 2;
            continue;
        }
        let length = u16::from_be_bytes([bytes[pos + 2], bytes[pos + 3]]) as usize;
        pos += 2 + length;
    }
    Some(ImageProbe {
        format: Some("jpeg".to_string()),
        ..ImageProbe::default()
    })
}
