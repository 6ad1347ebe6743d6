//! Download Scheduler - reassembles file ranges from placed pieces
//!
//! Requests are decomposed into per-chunk fetches. Each fetch acquires
//! memory, pulls any D pieces from reachable placements, verifies them
//! against their sector roots, decrypts, decodes, and writes the requested
//! sub-range to the sink. Chunks are processed in ascending order, so bytes
//! reach the sink strictly in file order even though piece reads complete
//! out of order.

use crate::erasure::{ErasureCoder, ErasureError};
use crate::files::{ChunkMeta, FileMeta, FileStore, PieceMeta};
use crate::host::{ContractId, Contractor, HostError};
use crate::memory::MemoryManager;
use crate::worker::{DownloadJob, WorkerPool};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Not enough reachable pieces: have {have}, need {need}")]
    InsufficientRedundancy { have: usize, need: usize },

    #[error("Requested range [{offset}, {offset}+{length}) exceeds file size {size}")]
    InvalidRange { offset: u64, length: u64, size: u64 },

    #[error("Download cancelled")]
    Cancelled,

    #[error("Renter is shutting down")]
    ShuttingDown,

    #[error("Erasure coding error: {0}")]
    Erasure(#[from] ErasureError),

    #[error("Sink error: {0}")]
    Sink(#[from] std::io::Error),
}

/// Snapshot of a download's progress
#[derive(Debug, Clone)]
pub struct DownloadProgress {
    pub nickname: String,
    pub offset: u64,
    pub length: u64,
    pub written: u64,
    pub completed: bool,
    pub error: Option<String>,
}

enum EndState {
    InProgress,
    Complete,
    Failed(String),
}

pub(crate) struct DownloadShared {
    nickname: String,
    offset: u64,
    length: u64,
    written: AtomicU64,
    state: Mutex<EndState>,
    done: watch::Sender<bool>,
    cancel: CancellationToken,
}

impl DownloadShared {
    pub fn new(nickname: String, offset: u64, length: u64, cancel: CancellationToken) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            nickname,
            offset,
            length,
            written: AtomicU64::new(0),
            state: Mutex::new(EndState::InProgress),
            done,
            cancel,
        }
    }

    fn finish(&self, result: &Result<(), DownloadError>) {
        let mut state = self.state.lock().unwrap();
        *state = match result {
            Ok(()) => EndState::Complete,
            Err(err) => EndState::Failed(err.to_string()),
        };
        drop(state);
        let _ = self.done.send(true);
    }

    pub(crate) fn progress(&self) -> DownloadProgress {
        let state = self.state.lock().unwrap();
        let (completed, error) = match &*state {
            EndState::InProgress => (false, None),
            EndState::Complete => (true, None),
            EndState::Failed(msg) => (true, Some(msg.clone())),
        };
        DownloadProgress {
            nickname: self.nickname.clone(),
            offset: self.offset,
            length: self.length,
            written: self.written.load(Ordering::Relaxed),
            completed,
            error,
        }
    }
}

/// Handle to an in-flight download: progress, completion, cancellation
pub struct DownloadHandle {
    pub(crate) shared: Arc<DownloadShared>,
}

impl DownloadHandle {
    /// Current progress snapshot
    pub fn progress(&self) -> DownloadProgress {
        self.shared.progress()
    }

    /// Abort pending piece reads and fail the download
    pub fn cancel(&self) {
        self.shared.cancel.cancel();
    }

    /// Wait for the download to finish, returning the final progress
    pub async fn wait(&self) -> DownloadProgress {
        let mut done = self.shared.done.subscribe();
        loop {
            let progress = self.shared.progress();
            if progress.completed {
                return progress;
            }
            if done.changed().await.is_err() {
                return self.shared.progress();
            }
        }
    }
}

/// A queued request, created by `Renter::download`
pub(crate) struct DownloadRequest {
    pub sink: Box<dyn AsyncWrite + Send + Unpin>,
    pub shared: Arc<DownloadShared>,
}

pub(crate) struct DownloadScheduler {
    pub memory: Arc<MemoryManager>,
    pub files: Arc<FileStore>,
    pub contractor: Arc<dyn Contractor>,
    pub pool: Arc<WorkerPool>,
    pub shutdown: CancellationToken,
    pub history: Mutex<Vec<Arc<DownloadShared>>>,
}

impl DownloadScheduler {
    /// Consume queued requests until shutdown
    pub async fn run(self: Arc<Self>, mut queue: mpsc::UnboundedReceiver<DownloadRequest>) {
        loop {
            tokio::select! {
                request = queue.recv() => match request {
                    Some(request) => self.process(request).await,
                    None => break,
                },
                _ = self.shutdown.cancelled() => break,
            }
        }

        // Fail whatever is still queued so no handle waits forever.
        queue.close();
        while let Ok(request) = queue.try_recv() {
            request.shared.finish(&Err(DownloadError::ShuttingDown));
        }
        debug!("download scheduler stopped");
    }

    async fn process(&self, mut request: DownloadRequest) {
        let shared = request.shared.clone();
        let result = self.fetch(&shared, &mut *request.sink).await;
        if let Err(err) = &result {
            warn!(
                nickname = %shared.nickname,
                offset = shared.offset,
                length = shared.length,
                error = %err,
                "download failed"
            );
        }
        shared.finish(&result);
    }

    async fn fetch(
        &self,
        shared: &DownloadShared,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<(), DownloadError> {
        let meta = self
            .files
            .get(&shared.nickname)
            .ok_or_else(|| DownloadError::FileNotFound(shared.nickname.clone()))?;

        let (offset, length) = (shared.offset, shared.length);
        if offset.checked_add(length).map_or(true, |end| end > meta.size) {
            return Err(DownloadError::InvalidRange {
                offset,
                length,
                size: meta.size,
            });
        }
        if length == 0 {
            sink.flush().await?;
            return Ok(());
        }

        let chunk_size = meta.chunk_plaintext_size();
        let coder = ErasureCoder::new(meta.erasure, meta.piece_size as usize)?;
        let first_chunk = offset / chunk_size;
        let last_chunk = (offset + length - 1) / chunk_size;

        for chunk_index in first_chunk..=last_chunk {
            if shared.cancel.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }
            if self.shutdown.is_cancelled() {
                return Err(DownloadError::ShuttingDown);
            }
            let chunk = &meta.chunks[chunk_index as usize];

            // Reconstruction buffer plus one piece of decode scratch.
            let required = (meta.erasure.total_shards() as u64 + 1) * meta.piece_size;
            tokio::select! {
                _ = self.memory.acquire(required) => {}
                _ = shared.cancel.cancelled() => return Err(DownloadError::Cancelled),
                _ = self.shutdown.cancelled() => return Err(DownloadError::ShuttingDown),
            }

            let result = self.fetch_chunk(&meta, chunk, &coder, shared).await;
            self.memory.release(required);
            let plaintext = result?;

            // Slice the chunk down to the requested range before it reaches
            // the sink; chunk order keeps delivery in file order.
            let begin = (offset.max(chunk.offset) - chunk.offset) as usize;
            let end = ((offset + length).min(chunk.offset + chunk.len) - chunk.offset) as usize;
            sink.write_all(&plaintext[begin..end]).await?;
            shared
                .written
                .fetch_add((end - begin) as u64, Ordering::Relaxed);
        }

        sink.flush().await?;
        Ok(())
    }

    /// Fetch and reconstruct one chunk's plaintext
    async fn fetch_chunk(
        &self,
        meta: &FileMeta,
        chunk: &ChunkMeta,
        coder: &ErasureCoder,
        shared: &DownloadShared,
    ) -> Result<Vec<u8>, DownloadError> {
        let need = meta.erasure.data_shards;
        let total = meta.erasure.total_shards();

        let live = self.pool.live_contracts();
        let reachable =
            |id: ContractId| live.contains(&id) && !self.contractor.is_offline(id);

        // Reachable placements grouped by piece index; alternates back up
        // the first choice when a host misbehaves.
        let mut targets: BTreeMap<u32, VecDeque<PieceMeta>> = BTreeMap::new();
        for piece in &chunk.pieces {
            if reachable(piece.contract) {
                targets.entry(piece.piece_index).or_default().push_back(piece.clone());
            }
        }
        if targets.len() < need {
            return Err(DownloadError::InsufficientRedundancy {
                have: targets.len(),
                need,
            });
        }

        let mut queue: VecDeque<(u32, VecDeque<PieceMeta>)> = targets.into_iter().collect();
        let mut in_flight: VecDeque<InFlightPiece> = VecDeque::new();
        let mut slots: Vec<Option<Vec<u8>>> = vec![None; total];
        let mut assembled = 0;

        while assembled < need {
            // Top up dispatches so `need` pieces are always being worked on.
            while assembled + in_flight.len() < need {
                let Some((piece_index, mut alternates)) = queue.pop_front() else {
                    break;
                };
                match self.dispatch_piece(piece_index, &mut alternates) {
                    Some(flight) => in_flight.push_back(InFlightPiece {
                        alternates,
                        ..flight
                    }),
                    None => continue,
                }
            }

            let Some(mut flight) = in_flight.pop_front() else {
                return Err(DownloadError::InsufficientRedundancy {
                    have: assembled,
                    need,
                });
            };

            let reply = tokio::select! {
                reply = &mut flight.reply => reply,
                _ = shared.cancel.cancelled() => return Err(DownloadError::Cancelled),
                _ = self.shutdown.cancelled() => return Err(DownloadError::ShuttingDown),
            };

            match reply {
                Ok(Ok(data)) if flight.placement.root.verify(&data) => {
                    let cipher = meta
                        .master_key
                        .piece_cipher(chunk.index, flight.piece_index);
                    slots[flight.piece_index as usize] = Some(cipher.decrypt(&data));
                    assembled += 1;
                }
                Ok(Ok(_)) => {
                    warn!(
                        nickname = %shared.nickname,
                        chunk = chunk.index,
                        piece = flight.piece_index,
                        host = %flight.placement.host,
                        "piece failed integrity check, dropping placement"
                    );
                    let _ = self.files.forget_piece(
                        &shared.nickname,
                        chunk.index,
                        flight.piece_index,
                        flight.placement.contract,
                    );
                    self.requeue(&mut queue, flight);
                }
                Ok(Err(err)) => {
                    debug!(
                        nickname = %shared.nickname,
                        chunk = chunk.index,
                        piece = flight.piece_index,
                        host = %flight.placement.host,
                        error = %err,
                        "piece read failed, trying another placement"
                    );
                    self.requeue(&mut queue, flight);
                }
                Err(_) => self.requeue(&mut queue, flight),
            }
        }

        Ok(coder.decode(slots, chunk.len as usize)?)
    }

    /// Hand one placement of a piece to its worker. Falls through the
    /// alternates until a worker accepts.
    fn dispatch_piece(
        &self,
        piece_index: u32,
        alternates: &mut VecDeque<PieceMeta>,
    ) -> Option<InFlightPiece> {
        while let Some(placement) = alternates.pop_front() {
            let Some(worker) = self.pool.worker(placement.contract) else {
                continue;
            };
            let (tx, rx) = oneshot::channel();
            let job = DownloadJob {
                root: placement.root,
                reply: tx,
            };
            if worker.assign_download(job).is_ok() {
                return Some(InFlightPiece {
                    piece_index,
                    placement,
                    alternates: VecDeque::new(),
                    reply: rx,
                });
            }
        }
        None
    }

    /// Put a failed piece back on the target queue if it has alternates left
    fn requeue(&self, queue: &mut VecDeque<(u32, VecDeque<PieceMeta>)>, flight: InFlightPiece) {
        if !flight.alternates.is_empty() {
            queue.push_front((flight.piece_index, flight.alternates));
        }
    }
}

struct InFlightPiece {
    piece_index: u32,
    placement: PieceMeta,
    alternates: VecDeque<PieceMeta>,
    reply: oneshot::Receiver<Result<Vec<u8>, HostError>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_snapshot() {
        let shared = DownloadShared::new("file".into(), 10, 20, CancellationToken::new());
        shared.written.store(5, Ordering::Relaxed);

        let progress = shared.progress();
        assert_eq!(progress.offset, 10);
        assert_eq!(progress.length, 20);
        assert_eq!(progress.written, 5);
        assert!(!progress.completed);

        shared.finish(&Err(DownloadError::Cancelled));
        let progress = shared.progress();
        assert!(progress.completed);
        assert!(progress.error.is_some());
    }

    #[tokio::test]
    async fn test_wait_returns_after_finish() {
        let shared = Arc::new(DownloadShared::new(
            "file".into(),
            0,
            1,
            CancellationToken::new(),
        ));
        let handle = DownloadHandle {
            shared: shared.clone(),
        };

        let waiter = tokio::spawn(async move { handle.wait().await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        shared.finish(&Ok(()));

        let progress = tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(progress.completed);
        assert!(progress.error.is_none());
    }
}
