//! Metadata persistence and the share format
//!
//! The index is a versioned JSON file written atomically (tmp file + rename)
//! on a periodic flush and on clean shutdown. Losing the window between
//! flushes is tolerable: placements can be re-derived by probing hosts for
//! sector roots.
//!
//! The share format is a magic-prefixed bincode sequence of file records
//! with local repair paths and tracking stripped, so a recipient imports the
//! placements and keys but never this renter's disk layout.

use super::{FileMeta, FileStore, StoreError};
use serde::{Deserialize, Serialize};
use std::path::Path;

const PERSIST_FILENAME: &str = "renter.json";
const PERSIST_NAME: &str = "nimbus-renter";
const PERSIST_VERSION: &str = "1.0";

const SHARE_MAGIC: &[u8] = b"NimbusShare";
const SHARE_VERSION: u8 = 1;

#[derive(Serialize, Deserialize)]
struct PersistData {
    name: String,
    version: String,
    files: Vec<FileMeta>,
}

/// Write the store's snapshot to `dir`
pub async fn save_store(dir: &Path, store: &FileStore) -> Result<(), StoreError> {
    let data = PersistData {
        name: PERSIST_NAME.to_string(),
        version: PERSIST_VERSION.to_string(),
        files: store.snapshot(),
    };
    let json = serde_json::to_string_pretty(&data)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;

    let path = dir.join(PERSIST_FILENAME);
    let tmp = dir.join(format!("{}.tmp", PERSIST_FILENAME));
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, &path).await?;
    Ok(())
}

/// Load persisted records from `dir`. A missing index is an empty renter.
pub async fn load_store(dir: &Path) -> Result<Vec<FileMeta>, StoreError> {
    let path = dir.join(PERSIST_FILENAME);
    let json = match tokio::fs::read_to_string(&path).await {
        Ok(json) => json,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let data: PersistData =
        serde_json::from_str(&json).map_err(|e| StoreError::Serialization(e.to_string()))?;
    if data.name != PERSIST_NAME || data.version != PERSIST_VERSION {
        return Err(StoreError::BadPersistHeader {
            name: data.name,
            version: data.version,
        });
    }
    Ok(data.files)
}

/// Serialize file records for sharing. Deterministic for a given input.
pub fn encode_share(files: &[FileMeta]) -> Result<Vec<u8>, StoreError> {
    let stripped: Vec<FileMeta> = files
        .iter()
        .map(|meta| {
            let mut meta = meta.clone();
            meta.repair_path = None;
            meta.tracked = false;
            meta
        })
        .collect();

    let body =
        bincode::serialize(&stripped).map_err(|e| StoreError::Serialization(e.to_string()))?;

    let mut out = Vec::with_capacity(SHARE_MAGIC.len() + 1 + body.len());
    out.extend_from_slice(SHARE_MAGIC);
    out.push(SHARE_VERSION);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Parse a share blob back into file records
pub fn decode_share(bytes: &[u8]) -> Result<Vec<FileMeta>, StoreError> {
    let body = bytes
        .strip_prefix(SHARE_MAGIC)
        .and_then(|rest| rest.strip_prefix(&[SHARE_VERSION]))
        .ok_or(StoreError::BadShareFormat)?;

    bincode::deserialize(body).map_err(|_| StoreError::BadShareFormat)
}
