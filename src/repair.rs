//! Repair Scanner - keeps tracked files at full redundancy
//!
//! A single long-lived task walks the tracked files, measures chunk health
//! against the current contract set, and feeds degraded chunks into the
//! upload pipeline, worst first. Passes are serialized by construction.

use crate::files::FileStore;
use crate::host::{ContractId, Contractor};
use crate::upload::{ChunkUploader, RepairTask, UploadError};
use crate::worker::WorkerPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub(crate) struct RepairScanner {
    pub files: Arc<FileStore>,
    pub uploader: ChunkUploader,
    pub contractor: Arc<dyn Contractor>,
    pub pool: Arc<WorkerPool>,
    pub interval: Duration,
    pub consensus_wake: Arc<Notify>,
    pub shutdown: CancellationToken,
}

impl RepairScanner {
    /// Scan until shutdown. Wakes early when a file is added or the
    /// contract set may have shifted under a consensus change.
    pub async fn run(self) {
        loop {
            self.scan_once().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.files.wait_added() => {}
                _ = self.consensus_wake.notified() => {}
                _ = self.shutdown.cancelled() => break,
            }
        }
        debug!("repair scanner stopped");
    }

    /// One pass: collect repair tasks across all tracked files and submit
    /// them to the uploader in ascending health order.
    async fn scan_once(&self) {
        let live = self.pool.live_contracts();
        let reachable =
            |id: ContractId| live.contains(&id) && !self.contractor.is_offline(id);

        let mut tasks: Vec<RepairTask> = Vec::new();
        for meta in self.files.tracked() {
            let data_shards = meta.erasure.data_shards;
            let total = meta.erasure.total_shards();

            for chunk in &meta.chunks {
                if chunk.missing_piece_indices(total, &reachable).is_empty() {
                    continue;
                }
                let health = chunk.health(data_shards, &reachable);

                // Without a local source the chunk cannot be topped up.
                // Degraded chunks still go to the uploader so the data-loss
                // error surfaces every pass.
                if meta.repair_path.is_none() && health >= 1.0 {
                    continue;
                }

                tasks.push(RepairTask {
                    nickname: meta.nickname.clone(),
                    chunk_index: chunk.index,
                    health,
                });
            }
        }

        // Most degraded chunks first; background topping-up (health >= 1.0)
        // naturally sorts last.
        tasks.sort_by(|a, b| a.health.total_cmp(&b.health));

        for task in tasks {
            if self.shutdown.is_cancelled() {
                break;
            }
            match self.uploader.repair_chunk(&task).await {
                Ok(placed) if placed > 0 => {
                    debug!(
                        nickname = %task.nickname,
                        chunk = task.chunk_index,
                        placed,
                        "repair pass placed pieces"
                    );
                }
                Ok(_) => {}
                Err(UploadError::ShuttingDown) => break,
                Err(err @ UploadError::NoLocalSource(_)) => {
                    // Data loss warning: the chunk cannot be rebuilt locally
                    // and hosts alone no longer cover it.
                    warn!(
                        nickname = %task.nickname,
                        chunk = task.chunk_index,
                        health = task.health,
                        error = %err,
                        "chunk degraded with no local source"
                    );
                }
                Err(UploadError::InsufficientHosts { available, needed }) => {
                    debug!(
                        nickname = %task.nickname,
                        chunk = task.chunk_index,
                        available,
                        needed,
                        "not enough hosts, task deferred to a later pass"
                    );
                }
                Err(err) => {
                    warn!(
                        nickname = %task.nickname,
                        chunk = task.chunk_index,
                        error = %err,
                        "chunk repair failed"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::MasterKey;
    use crate::erasure::ErasureConfig;
    use crate::files::FileMeta;
    use crate::memory::MemoryManager;
    use crate::teststubs::{StubContractor, StubHostDb, StubNet};
    use tempfile::TempDir;

    const PIECE_SIZE: u64 = 64;

    async fn scanner_fixture(hosts: u8) -> (Arc<StubNet>, RepairScanner, TempDir) {
        let net = StubNet::new();
        for seed in 1..=hosts {
            net.add_host(seed);
        }

        let contractor: Arc<dyn Contractor> = Arc::new(StubContractor(net.clone()));
        let shutdown = CancellationToken::new();
        let pool = Arc::new(WorkerPool::new(
            contractor.clone(),
            Duration::from_secs(5),
            shutdown.clone(),
        ));
        pool.update();

        let files = Arc::new(FileStore::new());
        let uploader = ChunkUploader {
            memory: Arc::new(MemoryManager::new(1 << 20)),
            files: files.clone(),
            hostdb: Arc::new(StubHostDb(net.clone())),
            contractor: contractor.clone(),
            pool: pool.clone(),
            shutdown: shutdown.clone(),
        };

        let scanner = RepairScanner {
            files,
            uploader,
            contractor,
            pool,
            interval: Duration::from_millis(20),
            consensus_wake: Arc::new(Notify::new()),
            shutdown,
        };

        (net, scanner, TempDir::new().unwrap())
    }

    async fn add_tracked_file(
        scanner: &RepairScanner,
        dir: &TempDir,
        nickname: &str,
        data: &[u8],
    ) {
        let source = dir.path().join(format!("{}.bin", nickname));
        tokio::fs::write(&source, data).await.unwrap();
        scanner
            .files
            .add_file(FileMeta::new(
                nickname.to_string(),
                data.len() as u64,
                MasterKey::generate(),
                ErasureConfig::new(2, 1).unwrap(),
                PIECE_SIZE,
                Some(source),
            ))
            .unwrap();
    }

    #[tokio::test]
    async fn test_scan_uploads_new_file() {
        let (_net, scanner, dir) = scanner_fixture(3).await;
        add_tracked_file(&scanner, &dir, "fresh", &vec![5u8; 200]).await;

        scanner.scan_once().await;

        let meta = scanner.files.get("fresh").unwrap();
        let all = |_id: ContractId| true;
        for chunk in &meta.chunks {
            assert_eq!(chunk.health(2, &all), 1.5);
        }

        scanner.pool.close().await;
    }

    #[tokio::test]
    async fn test_scan_skips_healthy_files() {
        let (_net, scanner, dir) = scanner_fixture(3).await;
        add_tracked_file(&scanner, &dir, "steady", &vec![6u8; 100]).await;

        scanner.scan_once().await;
        let before = scanner.files.get("steady").unwrap().modified_at;

        tokio::time::sleep(Duration::from_millis(1100)).await;
        scanner.scan_once().await;
        let after = scanner.files.get("steady").unwrap().modified_at;
        assert_eq!(before, after);

        scanner.pool.close().await;
    }

    #[tokio::test]
    async fn test_degraded_chunk_without_source_is_not_repaired() {
        let (_net, scanner, _dir) = scanner_fixture(3).await;

        // Tracked file whose local source is gone: the pass surfaces the
        // data-loss error and places nothing.
        let mut meta = FileMeta::new(
            "lost".to_string(),
            100,
            MasterKey::generate(),
            ErasureConfig::new(2, 1).unwrap(),
            PIECE_SIZE,
            None,
        );
        meta.tracked = true;
        scanner.files.add_file(meta).unwrap();

        scanner.scan_once().await;

        assert!(scanner.files.get("lost").unwrap().chunks[0].pieces.is_empty());
        scanner.pool.close().await;
    }

    #[tokio::test]
    async fn test_health_restored_after_host_loss() {
        let (net, scanner, dir) = scanner_fixture(4).await;
        add_tracked_file(&scanner, &dir, "wounded", &vec![7u8; 100]).await;

        scanner.scan_once().await;

        // Take one of the placed hosts offline; the chunk drops below full
        // placement and the next pass must re-disperse onto the spare host.
        let meta = scanner.files.get("wounded").unwrap();
        let victim = meta.chunks[0].pieces[0].contract;
        net.set_offline(victim, true);

        scanner.scan_once().await;

        let meta = scanner.files.get("wounded").unwrap();
        let reachable = |id: ContractId| !net.is_offline(id);
        assert_eq!(meta.chunks[0].health(2, &reachable), 1.5);

        scanner.pool.close().await;
    }
}
