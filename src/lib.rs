//! Nimbus Core - Decentralized Storage Renter Engine
//!
//! This crate implements the upload/download core of the Nimbus renter: it
//! turns local files into redundant encrypted pieces spread across remote
//! hosts under storage contracts, keeps their redundancy healthy through a
//! background repair loop, and reassembles file data on retrieval.
//!
//! Contract negotiation, host discovery, and blockchain plumbing live in
//! collaborator components consumed through the traits in [`host`].

pub mod crypto;
pub mod download;
pub mod erasure;
pub mod files;
pub mod host;
pub mod memory;
pub mod pricing;
pub mod renter;

mod repair;
mod upload;
mod worker;

#[cfg(test)]
pub(crate) mod teststubs;

pub use download::{DownloadError, DownloadHandle, DownloadProgress};
pub use renter::{FileInfo, Renter, RenterSettings};
pub use upload::UploadError;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Default size of an encoded piece (4 MiB). Must be a power of two.
pub const DEFAULT_PIECE_SIZE: u64 = 4 * 1024 * 1024;

/// Default number of data shards per chunk.
pub const DEFAULT_DATA_SHARDS: usize = 10;

/// Default number of parity shards per chunk.
pub const DEFAULT_PARITY_SHARDS: usize = 20;

/// Default memory budget for in-flight chunk buffers (512 MiB).
pub const DEFAULT_BASE_MEMORY: u64 = 512 * 1024 * 1024;

/// Main error type for Nimbus operations
#[derive(Error, Debug)]
pub enum NimbusError {
    #[error("Cryptographic error: {0}")]
    Crypto(#[from] crypto::CryptoError),

    #[error("Erasure coding error: {0}")]
    Erasure(#[from] erasure::ErasureError),

    #[error("File store error: {0}")]
    Store(#[from] files::StoreError),

    #[error("Host error: {0}")]
    Host(#[from] host::HostError),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    #[error("Download error: {0}")]
    Download(#[from] DownloadError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Renter is shutting down")]
    ShuttingDown,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, NimbusError>;

/// Configuration for the renter core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenterConfig {
    /// Directory where file metadata is persisted
    pub persist_dir: PathBuf,

    /// Memory budget for in-flight chunk buffers (bytes)
    pub base_memory: u64,

    /// Size of an encoded piece (bytes, power of two)
    pub piece_size: u64,

    /// Default data shards for new uploads
    pub data_shards: usize,

    /// Default parity shards for new uploads
    pub parity_shards: usize,

    /// Seconds between repair scanner passes
    pub repair_interval_secs: u64,

    /// Seconds between periodic metadata flushes
    pub persist_interval_secs: u64,

    /// Deadline for a single host sector operation (seconds)
    pub host_timeout_secs: u64,
}

impl Default for RenterConfig {
    fn default() -> Self {
        Self {
            persist_dir: PathBuf::from("./nimbus_data"),
            base_memory: DEFAULT_BASE_MEMORY,
            piece_size: DEFAULT_PIECE_SIZE,
            data_shards: DEFAULT_DATA_SHARDS,
            parity_shards: DEFAULT_PARITY_SHARDS,
            repair_interval_secs: 30,
            persist_interval_secs: 120,
            host_timeout_secs: 120,
        }
    }
}

impl RenterConfig {
    /// Set the persist directory
    pub fn with_persist_dir(mut self, dir: PathBuf) -> Self {
        self.persist_dir = dir;
        self
    }

    /// Set the memory budget
    pub fn with_base_memory(mut self, bytes: u64) -> Self {
        self.base_memory = bytes;
        self
    }

    /// Set the piece size
    pub fn with_piece_size(mut self, bytes: u64) -> Self {
        self.piece_size = bytes;
        self
    }

    /// Set the repair scanner interval
    pub fn with_repair_interval_secs(mut self, secs: u64) -> Self {
        self.repair_interval_secs = secs;
        self
    }

    /// Check the configuration for values the core cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.piece_size == 0 || !self.piece_size.is_power_of_two() {
            return Err(NimbusError::Config(format!(
                "piece size must be a power of two, got {}",
                self.piece_size
            )));
        }
        if self.data_shards == 0 {
            return Err(NimbusError::Config("data shards must be at least 1".into()));
        }
        if self.data_shards + self.parity_shards > erasure::MAX_TOTAL_SHARDS {
            return Err(NimbusError::Config(format!(
                "total shards must not exceed {}, got {}",
                erasure::MAX_TOTAL_SHARDS,
                self.data_shards + self.parity_shards
            )));
        }
        if self.base_memory == 0 {
            return Err(NimbusError::Config("base memory must be non-zero".into()));
        }
        Ok(())
    }
}
