//! File Metadata Module - Tracked files, chunks, and piece placements
//!
//! Maps logical files to chunks and per-chunk piece placements, guards the
//! unique-nickname invariant, and round-trips the metadata through the
//! persisted index and the share format.

mod meta;
mod persist;
mod store;

pub use meta::{ChunkMeta, FileMeta, PieceMeta};
pub use persist::{decode_share, encode_share, load_store, save_store};
pub use store::FileStore;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("A file named {0} already exists")]
    DuplicateNickname(String),

    #[error("Chunk {chunk} out of range for file {nickname}")]
    ChunkOutOfRange { nickname: String, chunk: u64 },

    #[error("Unrecognized share data")]
    BadShareFormat,

    #[error("Persisted metadata has unexpected header {name} v{version}")]
    BadPersistHeader { name: String, version: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
