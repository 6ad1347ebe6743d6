//! Chunk Uploader - turns a degraded chunk back into placed pieces
//!
//! Admission is gated on the memory budget before any buffer exists. The
//! pipeline then reads the chunk plaintext from the local source, erasure
//! codes it, encrypts the missing pieces, and spreads them across idle
//! workers. The memory debit is released only after every dispatched piece
//! has reported back.

use crate::crypto::SectorRoot;
use crate::erasure::{ErasureCoder, ErasureError};
use crate::files::{FileMeta, FileStore, StoreError};
use crate::host::{ContractId, Contractor, HostDb};
use crate::memory::MemoryManager;
use crate::worker::{UploadJob, Worker, WorkerPool};
use std::io::SeekFrom;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("No local source to repair from: {0}")]
    NoLocalSource(String),

    #[error("Not enough hosts to place pieces: have {available}, need {needed}")]
    InsufficientHosts { available: usize, needed: usize },

    #[error("Renter is shutting down")]
    ShuttingDown,

    #[error("Erasure coding error: {0}")]
    Erasure(#[from] ErasureError),

    #[error("File store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One chunk the repair scanner wants worked on
#[derive(Debug, Clone)]
pub(crate) struct RepairTask {
    pub nickname: String,
    pub chunk_index: u64,
    pub health: f64,
}

/// Shared state the uploader needs to move a chunk through the pipeline
pub(crate) struct ChunkUploader {
    pub memory: Arc<MemoryManager>,
    pub files: Arc<FileStore>,
    pub hostdb: Arc<dyn HostDb>,
    pub contractor: Arc<dyn Contractor>,
    pub pool: Arc<WorkerPool>,
    pub shutdown: CancellationToken,
}

impl ChunkUploader {
    /// Repair one chunk: place every piece that has no reachable placement.
    /// Returns the number of pieces newly placed.
    pub async fn repair_chunk(&self, task: &RepairTask) -> Result<usize, UploadError> {
        let meta = self
            .files
            .get(&task.nickname)
            .ok_or_else(|| UploadError::FileNotFound(task.nickname.clone()))?;
        if task.chunk_index as usize >= meta.chunks.len() {
            return Err(StoreError::ChunkOutOfRange {
                nickname: task.nickname.clone(),
                chunk: task.chunk_index,
            }
            .into());
        }

        // N piece buffers plus one piece of coding scratch.
        let required = (meta.erasure.total_shards() as u64 + 1) * meta.piece_size;
        tokio::select! {
            _ = self.memory.acquire(required) => {}
            _ = self.shutdown.cancelled() => return Err(UploadError::ShuttingDown),
        }

        let result = self.repair_chunk_admitted(&meta, task).await;
        self.memory.release(required);
        result
    }

    async fn repair_chunk_admitted(
        &self,
        meta: &FileMeta,
        task: &RepairTask,
    ) -> Result<usize, UploadError> {
        let chunk = &meta.chunks[task.chunk_index as usize];
        let total = meta.erasure.total_shards();

        let live = self.pool.live_contracts();
        let reachable =
            |id: ContractId| live.contains(&id) && !self.contractor.is_offline(id);
        let missing = chunk.missing_piece_indices(total, &reachable);
        if missing.is_empty() {
            return Ok(0);
        }
        if meta.repair_path.is_none() {
            return Err(UploadError::NoLocalSource(task.nickname.clone()));
        }

        // Pick target workers before doing any CPU work so a hopeless task
        // costs nothing but the admission round-trip.
        let targets = self.select_targets(meta, task, &missing)?;

        let plaintext = self.read_chunk_plaintext(meta, task).await?;
        let coder = ErasureCoder::new(meta.erasure, meta.piece_size as usize)?;
        let shards = coder.encode(&plaintext)?;

        let mut pending = Vec::with_capacity(targets.len());
        for (piece_index, worker) in targets {
            let cipher = meta.master_key.piece_cipher(chunk.index, piece_index);
            let ciphertext = Arc::new(cipher.encrypt(&shards[piece_index as usize]));
            let expected_root = SectorRoot::hash(&ciphertext);

            let (tx, rx) = oneshot::channel();
            worker.queue_upload(UploadJob {
                data: ciphertext,
                reply: tx,
            });
            pending.push((piece_index, worker, expected_root, rx));
        }

        // Wait for every reply before returning; workers drain their queues
        // even on shutdown, so this cannot hang.
        let mut placed = 0;
        for (piece_index, worker, expected_root, rx) in pending {
            match rx.await {
                Ok(Ok(root)) if root == expected_root => {
                    self.files.record_piece_placement(
                        &task.nickname,
                        task.chunk_index,
                        piece_index,
                        worker.host_key,
                        worker.contract_id,
                        root,
                    )?;
                    placed += 1;
                }
                Ok(Ok(root)) => {
                    warn!(
                        nickname = %task.nickname,
                        chunk = task.chunk_index,
                        piece = piece_index,
                        host = %worker.host_key,
                        returned = %root,
                        expected = %expected_root,
                        "host returned mismatched sector root, discarding placement"
                    );
                }
                Ok(Err(err)) => {
                    warn!(
                        nickname = %task.nickname,
                        chunk = task.chunk_index,
                        piece = piece_index,
                        host = %worker.host_key,
                        error = %err,
                        "piece upload failed, leaving piece for next repair pass"
                    );
                }
                Err(_) => {
                    warn!(
                        nickname = %task.nickname,
                        chunk = task.chunk_index,
                        piece = piece_index,
                        "worker dropped upload job"
                    );
                }
            }
        }

        debug!(
            nickname = %task.nickname,
            chunk = task.chunk_index,
            placed,
            "chunk repair finished"
        );
        Ok(placed)
    }

    /// Pair each missing piece with a live worker. Workers with shallow
    /// upload queues win; hostdb score breaks ties.
    fn select_targets(
        &self,
        meta: &FileMeta,
        task: &RepairTask,
        missing: &[u32],
    ) -> Result<Vec<(u32, Arc<Worker>)>, UploadError> {
        let chunk = &meta.chunks[task.chunk_index as usize];
        let total = meta.erasure.total_shards();
        let exclude = chunk.hosts();

        let mut candidates: Vec<(Arc<Worker>, u64)> = Vec::new();
        for entry in self.hostdb.random_hosts(total, &exclude) {
            let contract = self
                .contractor
                .contracts()
                .into_iter()
                .find(|c| c.host_key == entry.public_key);
            let Some(contract) = contract else { continue };
            if self.contractor.is_offline(contract.id) {
                continue;
            }
            let Some(worker) = self.pool.worker(contract.id) else {
                continue;
            };
            candidates.push((worker, entry.score));
        }
        candidates.sort_by(|(wa, sa), (wb, sb)| {
            wa.upload_queue_len()
                .cmp(&wb.upload_queue_len())
                .then(sb.cmp(sa))
        });

        let live = self.pool.live_contracts();
        let reachable =
            |id: ContractId| live.contains(&id) && !self.contractor.is_offline(id);
        let placed = chunk.reachable_piece_indices(&reachable).len();
        if placed + candidates.len() < meta.erasure.data_shards {
            return Err(UploadError::InsufficientHosts {
                available: candidates.len(),
                needed: meta.erasure.data_shards - placed,
            });
        }

        Ok(missing
            .iter()
            .copied()
            .zip(candidates.into_iter().map(|(w, _)| w))
            .collect())
    }

    async fn read_chunk_plaintext(
        &self,
        meta: &FileMeta,
        task: &RepairTask,
    ) -> Result<Vec<u8>, UploadError> {
        let chunk = &meta.chunks[task.chunk_index as usize];
        let path = meta
            .repair_path
            .as_ref()
            .ok_or_else(|| UploadError::NoLocalSource(task.nickname.clone()))?;

        let mut file = tokio::fs::File::open(path).await?;
        file.seek(SeekFrom::Start(chunk.offset)).await?;
        let mut plaintext = vec![0u8; chunk.len as usize];
        file.read_exact(&mut plaintext).await?;
        Ok(plaintext)
    }
}
