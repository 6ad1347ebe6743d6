//! Collaborator interfaces - host database, contractor, consensus, fees
//!
//! The renter core never negotiates contracts or scores hosts itself. Those
//! jobs belong to the contractor and the host database, consumed here through
//! capability traits so tests can inject stubs.

use crate::crypto::SectorRoot;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Currency amount in base units
pub type Currency = u128;

#[derive(Error, Debug)]
pub enum HostError {
    #[error("Host is offline")]
    Offline,

    #[error("Host operation timed out")]
    Timeout,

    #[error("Host rejected the operation: {0}")]
    Rejected(String),

    #[error("Contract no longer exists")]
    ContractEnded,

    #[error("Sector not found: {0}")]
    SectorNotFound(SectorRoot),

    #[error("Operation cancelled by shutdown")]
    ShuttingDown,

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Public key identifying a host
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostKey([u8; 32]);

impl HostKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_base58(&self) -> String {
        bs58::encode(&self.0).into_string()
    }
}

impl fmt::Debug for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostKey({})", self.to_base58())
    }
}

impl fmt::Display for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base58())
    }
}

/// Identifier of a storage contract. This is the canonical key for offline
/// checks and worker-pool membership; renewals are followed with
/// [`Contractor::resolve_id`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContractId([u8; 32]);

impl ContractId {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_base58(&self) -> String {
        bs58::encode(&self.0).into_string()
    }
}

impl fmt::Debug for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContractId({})", self.to_base58())
    }
}

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base58())
    }
}

/// A host known to the host database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostEntry {
    /// Host public key
    pub public_key: HostKey,

    /// One-time cost of forming a contract
    pub contract_price: Currency,

    /// Storage price per byte per block
    pub storage_price: Currency,

    /// Download bandwidth price per byte
    pub download_price: Currency,

    /// Upload bandwidth price per byte
    pub upload_price: Currency,

    /// Hostdb score; higher is better
    pub score: u64,
}

/// An active storage agreement, owned by the contractor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    /// Contract identifier
    pub id: ContractId,

    /// Host the contract was formed with
    pub host_key: HostKey,

    /// Block height at which the contract ends
    pub end_height: u64,

    /// Funds remaining for the renter
    pub renter_funds: Currency,
}

/// Budget the user grants the contractor per billing period
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allowance {
    /// Total funds to spend on contracts
    pub funds: Currency,

    /// Length of the billing period in blocks
    pub period: u64,

    /// Number of hosts to form contracts with
    pub hosts: usize,
}

/// An ordered consensus change notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsensusChange {
    /// Chain height after the change
    pub height: u64,
}

/// Database of hosts the renter can place pieces on
pub trait HostDb: Send + Sync {
    /// Return up to `n` usable hosts, weighted by score, excluding the given
    /// keys. Offline and inactive hosts are never returned.
    fn random_hosts(&self, n: usize, exclude: &[HostKey]) -> Vec<HostEntry>;

    /// Look up a single host
    fn host(&self, key: &HostKey) -> Option<HostEntry>;
}

/// Sector writer opened against one contract
#[async_trait]
pub trait SectorEditor: Send {
    /// Append a sector to the contract, returning its root
    async fn upload_sector(&mut self, data: &[u8]) -> Result<SectorRoot, HostError>;
}

/// Sector reader opened against one contract
#[async_trait]
pub trait SectorDownloader: Send {
    /// Fetch a sector by its root
    async fn download_sector(&mut self, root: SectorRoot) -> Result<Vec<u8>, HostError>;
}

/// Negotiates, renews, and provides access to storage contracts
#[async_trait]
pub trait Contractor: Send + Sync {
    /// Contracts currently active
    fn contracts(&self) -> Vec<Contract>;

    /// Look up a contract by id
    fn contract_by_id(&self, id: ContractId) -> Option<Contract>;

    /// Whether the host behind the contract is considered offline
    fn is_offline(&self, id: ContractId) -> bool;

    /// Follow renewals to the most recent id for a contract
    fn resolve_id(&self, id: ContractId) -> ContractId;

    /// Open a sector editor against the contract
    async fn editor(
        &self,
        id: ContractId,
        cancel: CancellationToken,
    ) -> Result<Box<dyn SectorEditor>, HostError>;

    /// Open a sector downloader against the contract
    async fn downloader(
        &self,
        id: ContractId,
        cancel: CancellationToken,
    ) -> Result<Box<dyn SectorDownloader>, HostError>;

    /// Set the amount of money the contractor may spend per period
    fn set_allowance(&self, allowance: Allowance) -> Result<(), HostError>;

    /// Current allowance
    fn allowance(&self) -> Allowance;
}

/// Source of ordered consensus change notifications
pub trait ConsensusSet: Send + Sync {
    /// Subscribe to consensus changes. Events arrive in chain order.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<ConsensusChange>;
}

/// Fee source for price estimation
pub trait TransactionPool: Send + Sync {
    /// Minimum and maximum recommended fee per byte
    fn fee_estimation(&self) -> (Currency, Currency);
}
