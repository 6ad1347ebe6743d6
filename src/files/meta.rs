//! File, chunk, and piece placement records

use crate::crypto::{MasterKey, SectorRoot};
use crate::erasure::ErasureConfig;
use crate::host::{ContractId, HostKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// One placed piece: an encoded, encrypted shard living on exactly one host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PieceMeta {
    /// Piece index within the chunk (0..total_shards)
    pub piece_index: u32,

    /// Host holding the piece
    pub host: HostKey,

    /// Contract the piece was uploaded under
    pub contract: ContractId,

    /// Sector root addressing the piece on the host
    pub root: SectorRoot,
}

/// One erasure-coded chunk of a file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMeta {
    /// Chunk index within the file
    pub index: u64,

    /// Byte offset of the chunk in the plaintext file
    pub offset: u64,

    /// Plaintext bytes covered by this chunk. The final chunk may be short;
    /// its plaintext is zero-padded to the coding boundary at encode time.
    pub len: u64,

    /// Placed pieces. A piece index may appear under several contracts after
    /// repairs; reachability decides which placement counts.
    pub pieces: Vec<PieceMeta>,
}

impl ChunkMeta {
    /// Distinct piece indices with at least one placement passing `reachable`
    pub fn reachable_piece_indices(
        &self,
        reachable: &dyn Fn(ContractId) -> bool,
    ) -> BTreeSet<u32> {
        self.pieces
            .iter()
            .filter(|p| reachable(p.contract))
            .map(|p| p.piece_index)
            .collect()
    }

    /// Chunk health: reachable placed pieces over the coding minimum.
    /// 1.0 means recoverable, above 1.0 means surplus redundancy.
    pub fn health(&self, data_shards: usize, reachable: &dyn Fn(ContractId) -> bool) -> f64 {
        self.reachable_piece_indices(reachable).len() as f64 / data_shards as f64
    }

    /// Piece indices with no reachable placement
    pub fn missing_piece_indices(
        &self,
        total_shards: usize,
        reachable: &dyn Fn(ContractId) -> bool,
    ) -> Vec<u32> {
        let placed = self.reachable_piece_indices(reachable);
        (0..total_shards as u32)
            .filter(|i| !placed.contains(i))
            .collect()
    }

    /// Hosts holding any placement of this chunk
    pub fn hosts(&self) -> Vec<HostKey> {
        let mut hosts: Vec<HostKey> = self.pieces.iter().map(|p| p.host).collect();
        hosts.sort();
        hosts.dedup();
        hosts
    }
}

/// Metadata for one logical file tracked by the renter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMeta {
    /// Stable nickname, unique within the renter
    pub nickname: String,

    /// Plaintext size in bytes
    pub size: u64,

    /// Master encryption key; per-piece keys are derived from it
    pub master_key: MasterKey,

    /// Erasure coding parameters
    pub erasure: ErasureConfig,

    /// Size of each encoded piece in bytes
    pub piece_size: u64,

    /// Chunks in file order
    pub chunks: Vec<ChunkMeta>,

    /// Local source used for repairs; `None` for shared-in files
    pub repair_path: Option<PathBuf>,

    /// Whether the repair scanner maintains this file
    pub tracked: bool,

    /// Creation timestamp (Unix seconds)
    pub created_at: i64,

    /// Last modification timestamp (Unix seconds)
    pub modified_at: i64,
}

impl FileMeta {
    /// Create metadata for a new file, laying out its chunks
    pub fn new(
        nickname: String,
        size: u64,
        master_key: MasterKey,
        erasure: ErasureConfig,
        piece_size: u64,
        repair_path: Option<PathBuf>,
    ) -> Self {
        let chunk_size = erasure.data_shards as u64 * piece_size;
        let chunk_count = size.div_ceil(chunk_size);

        let chunks = (0..chunk_count)
            .map(|index| {
                let offset = index * chunk_size;
                ChunkMeta {
                    index,
                    offset,
                    len: chunk_size.min(size - offset),
                    pieces: Vec::new(),
                }
            })
            .collect();

        let now = chrono::Utc::now().timestamp();
        let tracked = repair_path.is_some();

        Self {
            nickname,
            size,
            master_key,
            erasure,
            piece_size,
            chunks,
            repair_path,
            tracked,
            created_at: now,
            modified_at: now,
        }
    }

    /// Plaintext bytes per chunk at this file's coding parameters
    pub fn chunk_plaintext_size(&self) -> u64 {
        self.erasure.data_shards as u64 * self.piece_size
    }

    /// File redundancy: the weakest chunk's reachable pieces over the coding
    /// minimum. An empty file reports full redundancy.
    pub fn redundancy(&self, reachable: &dyn Fn(ContractId) -> bool) -> f64 {
        self.chunks
            .iter()
            .map(|c| c.health(self.erasure.data_shards, reachable))
            .fold(f64::INFINITY, f64::min)
            .min(self.erasure.redundancy())
    }

    /// Bytes placed on hosts across all chunks
    pub fn uploaded_bytes(&self) -> u64 {
        self.chunks
            .iter()
            .map(|c| c.pieces.len() as u64 * self.piece_size)
            .sum()
    }
}
