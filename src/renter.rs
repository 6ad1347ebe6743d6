//! Renter - public surface and lifecycle coordination
//!
//! Owns the file store, memory budget, worker pool, and the background
//! loops (repair scanner, download scheduler, consensus listener, persist
//! flusher). `close` signals every loop, drains the workers, flushes
//! metadata, then returns.

use crate::crypto::MasterKey;
use crate::download::{
    DownloadHandle, DownloadProgress, DownloadRequest, DownloadScheduler, DownloadShared,
};
use crate::erasure::ErasureConfig;
use crate::files::{self, FileMeta, FileStore, StoreError};
use crate::host::{
    Allowance, ConsensusSet, Contract, ContractId, Contractor, HostDb, TransactionPool,
};
use crate::memory::MemoryManager;
use crate::pricing::{self, PriceEstimation};
use crate::repair::RepairScanner;
use crate::upload::ChunkUploader;
use crate::worker::WorkerPool;
use crate::{DownloadError, NimbusError, RenterConfig, Result};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// User-adjustable renter settings, forwarded to the contractor
#[derive(Debug, Clone, Default)]
pub struct RenterSettings {
    pub allowance: Allowance,
}

/// Summary of one tracked or shared-in file
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Unique nickname
    pub nickname: String,

    /// Plaintext size in bytes
    pub size: u64,

    /// Whether enough reachable pieces exist to download the file
    pub available: bool,

    /// Weakest-chunk redundancy over the coding minimum
    pub redundancy: f64,

    /// Bytes placed on hosts
    pub uploaded_bytes: u64,
}

/// The renter core. One instance per daemon.
pub struct Renter {
    config: RenterConfig,
    files: Arc<FileStore>,
    memory: Arc<MemoryManager>,
    pool: Arc<WorkerPool>,
    hostdb: Arc<dyn HostDb>,
    contractor: Arc<dyn Contractor>,
    tpool: Arc<dyn TransactionPool>,
    scheduler: Arc<DownloadScheduler>,
    download_tx: mpsc::UnboundedSender<DownloadRequest>,
    estimation: Arc<Mutex<Option<PriceEstimation>>>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Renter {
    /// Build a renter, load persisted metadata, and start the background
    /// loops.
    pub async fn new(
        config: RenterConfig,
        hostdb: Arc<dyn HostDb>,
        contractor: Arc<dyn Contractor>,
        consensus: Arc<dyn ConsensusSet>,
        tpool: Arc<dyn TransactionPool>,
    ) -> Result<Self> {
        config.validate()?;
        tokio::fs::create_dir_all(&config.persist_dir).await?;

        let files = Arc::new(FileStore::new());
        files.load(files::load_store(&config.persist_dir).await?);

        let shutdown = CancellationToken::new();
        let memory = Arc::new(MemoryManager::new(config.base_memory));
        let pool = Arc::new(WorkerPool::new(
            contractor.clone(),
            Duration::from_secs(config.host_timeout_secs),
            shutdown.clone(),
        ));
        pool.update();

        let estimation = Arc::new(Mutex::new(None));
        let consensus_wake = Arc::new(Notify::new());
        let mut tasks = Vec::new();

        let scanner = RepairScanner {
            files: files.clone(),
            uploader: ChunkUploader {
                memory: memory.clone(),
                files: files.clone(),
                hostdb: hostdb.clone(),
                contractor: contractor.clone(),
                pool: pool.clone(),
                shutdown: shutdown.clone(),
            },
            contractor: contractor.clone(),
            pool: pool.clone(),
            interval: Duration::from_secs(config.repair_interval_secs),
            consensus_wake: consensus_wake.clone(),
            shutdown: shutdown.clone(),
        };
        tasks.push(tokio::spawn(scanner.run()));

        let scheduler = Arc::new(DownloadScheduler {
            memory: memory.clone(),
            files: files.clone(),
            contractor: contractor.clone(),
            pool: pool.clone(),
            shutdown: shutdown.clone(),
            history: Mutex::new(Vec::new()),
        });
        let (download_tx, download_rx) = mpsc::unbounded_channel();
        tasks.push(tokio::spawn(scheduler.clone().run(download_rx)));

        // Consensus changes invalidate the cached estimate, reconcile the
        // worker pool, and nudge the repair scanner.
        let mut consensus_rx = consensus.subscribe();
        tasks.push(tokio::spawn({
            let estimation = estimation.clone();
            let pool = pool.clone();
            let consensus_wake = consensus_wake.clone();
            let shutdown = shutdown.clone();
            async move {
                loop {
                    tokio::select! {
                        change = consensus_rx.recv() => match change {
                            Some(change) => {
                                debug!(height = change.height, "consensus change");
                                estimation.lock().unwrap().take();
                                pool.update();
                                consensus_wake.notify_one();
                            }
                            None => break,
                        },
                        _ = shutdown.cancelled() => break,
                    }
                }
            }
        }));

        // Periodic metadata flush; the shutdown path writes the final one.
        tasks.push(tokio::spawn({
            let files = files.clone();
            let dir = config.persist_dir.clone();
            let interval = Duration::from_secs(config.persist_interval_secs);
            let shutdown = shutdown.clone();
            async move {
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(interval) => {
                            if let Err(err) = files::save_store(&dir, &files).await {
                                warn!(error = %err, "periodic metadata flush failed");
                            }
                        }
                        _ = shutdown.cancelled() => break,
                    }
                }
            }
        }));

        info!(persist_dir = %config.persist_dir.display(), "renter started");
        Ok(Self {
            config,
            files,
            memory,
            pool,
            hostdb,
            contractor,
            tpool,
            scheduler,
            download_tx,
            estimation,
            shutdown,
            tasks: Mutex::new(tasks),
        })
    }

    /// Track a local file for upload. Pieces are placed by the repair
    /// scanner, which wakes immediately.
    pub async fn upload(
        &self,
        source: &Path,
        nickname: &str,
        data_shards: usize,
        parity_shards: usize,
    ) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(NimbusError::ShuttingDown);
        }
        let erasure = ErasureConfig::new(data_shards, parity_shards)?;
        let size = tokio::fs::metadata(source).await?.len();

        let meta = FileMeta::new(
            nickname.to_string(),
            size,
            MasterKey::generate(),
            erasure,
            self.config.piece_size,
            Some(source.to_path_buf()),
        );
        self.files.add_file(meta)?;
        info!(nickname, size, "file queued for upload");
        Ok(())
    }

    /// Stop maintaining and forget a file
    pub fn delete(&self, nickname: &str) -> Result<()> {
        self.files.delete(nickname)?;
        info!(nickname, "file deleted");
        Ok(())
    }

    /// Rename a file, keeping nicknames unique
    pub fn rename(&self, old: &str, new: &str) -> Result<()> {
        self.files.rename(old, new)?;
        Ok(())
    }

    /// Summaries of all known files
    pub fn list(&self) -> Vec<FileInfo> {
        let live = self.pool.live_contracts();
        let reachable = |id: ContractId| live.contains(&id) && !self.contractor.is_offline(id);
        self.files
            .snapshot()
            .into_iter()
            .map(|meta| {
                let redundancy = meta.redundancy(&reachable);
                FileInfo {
                    nickname: meta.nickname.clone(),
                    size: meta.size,
                    available: redundancy >= 1.0,
                    redundancy,
                    uploaded_bytes: meta.uploaded_bytes(),
                }
            })
            .collect()
    }

    /// Stream `[offset, offset + length)` of a file into `sink`. Bytes are
    /// delivered strictly in file order.
    pub fn download(
        &self,
        nickname: &str,
        offset: u64,
        length: u64,
        sink: Box<dyn AsyncWrite + Send + Unpin>,
    ) -> Result<DownloadHandle> {
        let meta = self
            .files
            .get(nickname)
            .ok_or_else(|| DownloadError::FileNotFound(nickname.to_string()))?;
        if offset.checked_add(length).map_or(true, |end| end > meta.size) {
            return Err(DownloadError::InvalidRange {
                offset,
                length,
                size: meta.size,
            }
            .into());
        }

        let shared = Arc::new(DownloadShared::new(
            nickname.to_string(),
            offset,
            length,
            self.shutdown.child_token(),
        ));
        self.scheduler.history.lock().unwrap().push(shared.clone());

        self.download_tx
            .send(DownloadRequest {
                sink,
                shared: shared.clone(),
            })
            .map_err(|_| NimbusError::ShuttingDown)?;
        Ok(DownloadHandle { shared })
    }

    /// Progress of every download accepted this session, oldest first
    pub fn downloads(&self) -> Vec<DownloadProgress> {
        self.scheduler
            .history
            .lock()
            .unwrap()
            .iter()
            .map(|shared| shared.progress())
            .collect()
    }

    /// Serialize file records for sharing, without local repair state
    pub fn share_out(&self, nicknames: &[String]) -> Result<Vec<u8>> {
        let mut metas = Vec::with_capacity(nicknames.len());
        for nickname in nicknames {
            metas.push(
                self.files
                    .get(nickname)
                    .ok_or_else(|| StoreError::FileNotFound(nickname.clone()))?,
            );
        }
        Ok(files::encode_share(&metas)?)
    }

    /// Import shared file records. Fails without side effects if any
    /// nickname collides with an existing file.
    pub fn share_in(&self, bytes: &[u8]) -> Result<Vec<String>> {
        let metas = files::decode_share(bytes)?;
        for meta in &metas {
            if self.files.get(&meta.nickname).is_some() {
                return Err(StoreError::DuplicateNickname(meta.nickname.clone()).into());
            }
        }

        let mut nicknames = Vec::with_capacity(metas.len());
        for meta in metas {
            nicknames.push(meta.nickname.clone());
            self.files.add_file(meta)?;
        }
        info!(count = nicknames.len(), "shared files imported");
        Ok(nicknames)
    }

    /// Update renter settings, forwarding the allowance to the contractor
    pub fn set_settings(&self, settings: RenterSettings) -> Result<()> {
        self.contractor.set_allowance(settings.allowance)?;
        self.pool.update();
        Ok(())
    }

    /// Current settings
    pub fn settings(&self) -> RenterSettings {
        RenterSettings {
            allowance: self.contractor.allowance(),
        }
    }

    /// Active contracts, straight from the contractor
    pub fn contracts(&self) -> Vec<Contract> {
        self.contractor.contracts()
    }

    /// Estimated storage prices, cached until the next consensus change
    pub fn price_estimation(&self) -> PriceEstimation {
        let mut cached = self.estimation.lock().unwrap();
        match &*cached {
            Some(estimate) => estimate.clone(),
            None => {
                let estimate = pricing::estimate_prices(self.hostdb.as_ref(), self.tpool.as_ref());
                *cached = Some(estimate.clone());
                estimate
            }
        }
    }

    /// Stop every background loop, drain the workers, and flush metadata
    pub async fn close(&self) -> Result<()> {
        self.shutdown.cancel();
        self.pool.close().await;

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().unwrap().drain(..).collect();
        for task in tasks {
            if task.await.is_err() {
                warn!("background task panicked during shutdown");
            }
        }

        files::save_store(&self.config.persist_dir, &self.files).await?;
        info!("renter shut down");
        Ok(())
    }
}
