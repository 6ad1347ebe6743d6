//! Price Estimation - what storage and bandwidth currently cost
//!
//! Averages per-host prices over a sample of the host database, scales them
//! to per-terabyte units, and folds in the transaction fees of forming the
//! first round of contracts. The renter caches the result until a consensus
//! change invalidates it.

use crate::host::{Currency, HostDb, TransactionPool};
use serde::{Deserialize, Serialize};

/// Number of hosts sampled for an estimate. Congruent with the number of
/// contracts a standard allowance spreads across.
pub const PRICE_ESTIMATION_SCOPE: usize = 50;

/// Bytes per terabyte, used to scale per-byte prices
pub const BYTES_PER_TERABYTE: Currency = 1_000_000_000_000;

/// Blocks in a 30-day month at 10-minute blocks
pub const BLOCKS_PER_MONTH: Currency = 4_320;

/// Fixed redundancy factor applied to storage and upload costs. Real files
/// carry their own coding parameters; the estimate assumes 3x.
pub const REDUNDANCY_FACTOR: Currency = 3;

/// Estimated size in bytes of a contract formation transaction
const CONTRACT_TX_SIZE: Currency = 1_000;

/// Estimated costs of storage operations, in base currency units
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceEstimation {
    /// Cost of forming a full set of contracts
    pub form_contracts: Currency,

    /// Cost of downloading one terabyte
    pub download_terabyte: Currency,

    /// Cost of storing one terabyte for a month
    pub storage_terabyte_month: Currency,

    /// Cost of uploading one terabyte
    pub upload_terabyte: Currency,
}

/// Build an estimate from the current host set. With no hosts known, every
/// price reports zero.
pub fn estimate_prices(hostdb: &dyn HostDb, tpool: &dyn TransactionPool) -> PriceEstimation {
    let hosts = hostdb.random_hosts(PRICE_ESTIMATION_SCOPE, &[]);
    if hosts.is_empty() {
        return PriceEstimation::default();
    }

    let mut total_contract: Currency = 0;
    let mut total_download: Currency = 0;
    let mut total_storage: Currency = 0;
    let mut total_upload: Currency = 0;
    for host in &hosts {
        total_contract += host.contract_price;
        total_download += host.download_price;
        total_storage += host.storage_price;
        total_upload += host.upload_price;
    }

    // Human-scale units.
    total_download *= BYTES_PER_TERABYTE;
    total_storage *= BYTES_PER_TERABYTE * BLOCKS_PER_MONTH;
    total_upload *= BYTES_PER_TERABYTE;

    // Stored and uploaded bytes are multiplied by the coding overhead.
    total_storage *= REDUNDANCY_FACTOR;
    total_upload *= REDUNDANCY_FACTOR;

    let count = hosts.len() as Currency;
    total_contract /= count;
    total_download /= count;
    total_storage /= count;
    total_upload /= count;

    // A full contract set forms one contract per sampled host, each paying
    // its own transaction fee.
    total_contract *= PRICE_ESTIMATION_SCOPE as Currency;
    let (_, fee_per_byte) = tpool.fee_estimation();
    total_contract += fee_per_byte * CONTRACT_TX_SIZE * PRICE_ESTIMATION_SCOPE as Currency;

    PriceEstimation {
        form_contracts: total_contract,
        download_terabyte: total_download,
        storage_terabyte_month: total_storage,
        upload_terabyte: total_upload,
    }
}
