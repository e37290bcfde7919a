//! On-disk format for a fitted [`KnnIndex`].
//!
//! The blob is a JSON envelope around the index snapshot. The snapshot is
//! stored as an embedded JSON string so its SHA-256 can be checked against
//! the exact bytes that were hashed at save time.

use crate::index::{IndexError, IndexSnapshot, KnnIndex};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::Path;
use thiserror::Error;

const MAGIC: &str = "faceknn-index";
const FORMAT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed index blob: {0}")]
    Format(#[from] serde_json::Error),
    #[error("not a faceknn index (magic {0:?})")]
    BadMagic(String),
    #[error("unsupported index format version {0}")]
    UnsupportedVersion(u32),
    #[error("index checksum mismatch, file is corrupt or was edited")]
    ChecksumMismatch,
    #[error("stored index is invalid: {0}")]
    Invalid(#[from] IndexError),
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    magic: String,
    version: u32,
    sha256: String,
    payload: String,
}

fn digest_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Serialize an index to a self-checking byte blob.
pub fn to_bytes(index: &KnnIndex) -> Result<Vec<u8>, PersistError> {
    let payload = serde_json::to_string(&index.snapshot())?;
    let envelope = Envelope {
        magic: MAGIC.to_string(),
        version: FORMAT_VERSION,
        sha256: digest_hex(payload.as_bytes()),
        payload,
    };
    Ok(serde_json::to_vec(&envelope)?)
}

/// Deserialize a blob produced by [`to_bytes`] into an equivalent index.
pub fn from_bytes(bytes: &[u8]) -> Result<KnnIndex, PersistError> {
    let envelope: Envelope = serde_json::from_slice(bytes)?;
    if envelope.magic != MAGIC {
        return Err(PersistError::BadMagic(envelope.magic));
    }
    if envelope.version != FORMAT_VERSION {
        return Err(PersistError::UnsupportedVersion(envelope.version));
    }
    if digest_hex(envelope.payload.as_bytes()) != envelope.sha256 {
        return Err(PersistError::ChecksumMismatch);
    }
    let snapshot: IndexSnapshot = serde_json::from_str(&envelope.payload)?;
    Ok(KnnIndex::from_snapshot(snapshot)?)
}

/// Write an index to `path`, replacing any existing file atomically.
///
/// The blob goes to a uniquely named temp file in the same directory first,
/// so concurrent saves never share a scratch file. The temp file is removed
/// if anything fails before the final rename.
pub fn save(index: &KnnIndex, path: &Path) -> Result<(), PersistError> {
    let bytes = to_bytes(index)?;
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    std::fs::create_dir_all(parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(&bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| PersistError::Io(e.error))?;
    tracing::debug!(path = %path.display(), bytes = bytes.len(), "wrote index blob");
    Ok(())
}

/// Load an index previously written with [`save`].
pub fn load(path: &Path) -> Result<KnnIndex, PersistError> {
    let bytes = std::fs::read(path)?;
    let index = from_bytes(&bytes)?;
    tracing::debug!(
        path = %path.display(),
        samples = index.len(),
        k = index.k(),
        "loaded index blob"
    );
    Ok(index)
}
