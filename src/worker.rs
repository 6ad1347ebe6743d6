//! Worker Pool - serialized host I/O, one worker per active contract
//!
//! Each worker owns a FIFO of upload jobs and a single-slot download
//! assignment and processes them one at a time against its host. Workers
//! hold no reference back into the renter: results travel on the reply
//! channel embedded in each job, so no worker method ever needs a
//! renter-level lock.

use crate::crypto::SectorRoot;
use crate::host::{ContractId, Contractor, HostError, HostKey};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A piece upload bound for one host
pub(crate) struct UploadJob {
    /// Encrypted piece data, shared with the dispatching chunk
    pub data: Arc<Vec<u8>>,

    /// Completion channel back to the uploader
    pub reply: oneshot::Sender<Result<SectorRoot, HostError>>,
}

/// A piece retrieval bound for one host
pub(crate) struct DownloadJob {
    /// Sector root to fetch
    pub root: SectorRoot,

    /// Completion channel back to the download scheduler
    pub reply: oneshot::Sender<Result<Vec<u8>, HostError>>,
}

enum Job {
    Upload(UploadJob),
    Download(DownloadJob),
}

struct WorkerState {
    uploads: VecDeque<UploadJob>,
    download: Option<DownloadJob>,
    killed: bool,
}

/// Dispatcher for a single contract
pub(crate) struct Worker {
    pub contract_id: ContractId,
    pub host_key: HostKey,
    state: Mutex<WorkerState>,
    wake: Notify,
}

impl Worker {
    fn new(contract_id: ContractId, host_key: HostKey) -> Self {
        Self {
            contract_id,
            host_key,
            state: Mutex::new(WorkerState {
                uploads: VecDeque::new(),
                download: None,
                killed: false,
            }),
            wake: Notify::new(),
        }
    }

    /// Append an upload job to the FIFO. A killed worker fails the job
    /// immediately instead of accepting it.
    pub fn queue_upload(&self, job: UploadJob) {
        let rejected = {
            let mut state = self.state.lock().unwrap();
            if state.killed {
                Some(job)
            } else {
                state.uploads.push_back(job);
                None
            }
        };
        match rejected {
            Some(job) => {
                let _ = job.reply.send(Err(HostError::ContractEnded));
            }
            None => self.wake.notify_one(),
        }
    }

    /// Assign the single download slot. Returns the job back if the slot is
    /// occupied so the scheduler can pick another placement.
    pub fn assign_download(&self, job: DownloadJob) -> Result<(), DownloadJob> {
        let rejected = {
            let mut state = self.state.lock().unwrap();
            if state.killed {
                Some((job, true))
            } else if state.download.is_some() {
                Some((job, false))
            } else {
                state.download = Some(job);
                None
            }
        };
        match rejected {
            Some((job, killed)) => {
                if killed {
                    let _ = job.reply.send(Err(HostError::ContractEnded));
                    Ok(())
                } else {
                    Err(job)
                }
            }
            None => {
                self.wake.notify_one();
                Ok(())
            }
        }
    }

    /// Pending upload jobs, used for dispatch tie-breaking
    pub fn upload_queue_len(&self) -> usize {
        self.state.lock().unwrap().uploads.len()
    }

    pub fn is_killed(&self) -> bool {
        self.state.lock().unwrap().killed
    }

    /// Signal termination. The worker loop drains its queue, failing
    /// pending jobs, before exiting.
    pub fn kill(&self) {
        self.state.lock().unwrap().killed = true;
        self.wake.notify_one();
    }

    /// Take every queued job, leaving the worker empty
    fn drain(&self) -> Vec<Job> {
        let mut state = self.state.lock().unwrap();
        let mut jobs: Vec<Job> = state.uploads.drain(..).map(Job::Upload).collect();
        if let Some(dl) = state.download.take() {
            jobs.push(Job::Download(dl));
        }
        jobs
    }

    fn fail_pending(&self, err: fn() -> HostError) {
        for job in self.drain() {
            match job {
                Job::Upload(j) => {
                    let _ = j.reply.send(Err(err()));
                }
                Job::Download(j) => {
                    let _ = j.reply.send(Err(err()));
                }
            }
        }
    }

    /// Worker loop: wait for work or termination, prefer the
    /// latency-sensitive download slot, process one job at a time.
    async fn run(
        self: Arc<Self>,
        contractor: Arc<dyn Contractor>,
        timeout: Duration,
        shutdown: CancellationToken,
    ) {
        debug!(contract = %self.contract_id, host = %self.host_key, "worker started");
        loop {
            if shutdown.is_cancelled() {
                self.fail_pending(|| HostError::ShuttingDown);
                break;
            }
            if self.is_killed() {
                self.fail_pending(|| HostError::ContractEnded);
                break;
            }
            if contractor.is_offline(self.contract_id) {
                self.fail_pending(|| HostError::Offline);
            }

            let job = {
                let mut state = self.state.lock().unwrap();
                if let Some(dl) = state.download.take() {
                    Some(Job::Download(dl))
                } else {
                    state.uploads.pop_front().map(Job::Upload)
                }
            };

            match job {
                Some(Job::Download(job)) => {
                    let result = self
                        .fetch_sector(job.root, &contractor, timeout, &shutdown)
                        .await;
                    let _ = job.reply.send(result);
                }
                Some(Job::Upload(job)) => {
                    let result = self
                        .store_sector(&job.data, &contractor, timeout, &shutdown)
                        .await;
                    let _ = job.reply.send(result);
                }
                None => {
                    tokio::select! {
                        _ = self.wake.notified() => {}
                        _ = shutdown.cancelled() => {}
                    }
                }
            }
        }
        debug!(contract = %self.contract_id, "worker stopped");
    }

    async fn store_sector(
        &self,
        data: &[u8],
        contractor: &Arc<dyn Contractor>,
        timeout: Duration,
        shutdown: &CancellationToken,
    ) -> Result<SectorRoot, HostError> {
        let mut editor = contractor
            .editor(self.contract_id, shutdown.child_token())
            .await?;
        match tokio::time::timeout(timeout, editor.upload_sector(data)).await {
            Ok(result) => result,
            Err(_) => Err(HostError::Timeout),
        }
    }

    async fn fetch_sector(
        &self,
        root: SectorRoot,
        contractor: &Arc<dyn Contractor>,
        timeout: Duration,
        shutdown: &CancellationToken,
    ) -> Result<Vec<u8>, HostError> {
        let mut downloader = contractor
            .downloader(self.contract_id, shutdown.child_token())
            .await?;
        match tokio::time::timeout(timeout, downloader.download_sector(root)).await {
            Ok(result) => result,
            Err(_) => Err(HostError::Timeout),
        }
    }
}

struct WorkerHandle {
    worker: Arc<Worker>,
    task: JoinHandle<()>,
}

/// The set of live workers, keyed by contract id
pub(crate) struct WorkerPool {
    contractor: Arc<dyn Contractor>,
    host_timeout: Duration,
    shutdown: CancellationToken,
    workers: Mutex<HashMap<ContractId, WorkerHandle>>,
    retired: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(
        contractor: Arc<dyn Contractor>,
        host_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            contractor,
            host_timeout,
            shutdown,
            workers: Mutex::new(HashMap::new()),
            retired: Mutex::new(Vec::new()),
        }
    }

    /// Reconcile workers against the contractor's active contract set:
    /// spawn a worker for each new contract, kill the worker of each
    /// vanished one. Renewals are followed through `resolve_id`.
    pub fn update(&self) {
        let contracts = self.contractor.contracts();
        let mut current: HashMap<ContractId, HostKey> = HashMap::new();
        for contract in contracts {
            current.insert(self.contractor.resolve_id(contract.id), contract.host_key);
        }

        let mut workers = self.workers.lock().unwrap();

        let gone: Vec<ContractId> = workers
            .keys()
            .filter(|id| !current.contains_key(id))
            .copied()
            .collect();
        for id in gone {
            if let Some(handle) = workers.remove(&id) {
                debug!(contract = %id, "contract gone, killing worker");
                handle.worker.kill();
                self.retired.lock().unwrap().push(handle.task);
            }
        }

        for (id, host_key) in current {
            if workers.contains_key(&id) {
                continue;
            }
            let worker = Arc::new(Worker::new(id, host_key));
            let task = tokio::spawn(worker.clone().run(
                self.contractor.clone(),
                self.host_timeout,
                self.shutdown.clone(),
            ));
            workers.insert(id, WorkerHandle { worker, task });
        }
    }

    /// Look up the live worker for a contract
    pub fn worker(&self, id: ContractId) -> Option<Arc<Worker>> {
        self.workers
            .lock()
            .unwrap()
            .get(&id)
            .map(|h| h.worker.clone())
            .filter(|w| !w.is_killed())
    }

    /// Contract ids with a live worker
    pub fn live_contracts(&self) -> HashSet<ContractId> {
        self.workers
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, h)| !h.worker.is_killed())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Kill every worker and wait for all worker tasks to exit
    pub async fn close(&self) {
        let handles: Vec<WorkerHandle> = {
            let mut workers = self.workers.lock().unwrap();
            workers.drain().map(|(_, h)| h).collect()
        };
        for handle in &handles {
            handle.worker.kill();
        }
        for handle in handles {
            if handle.task.await.is_err() {
                warn!("worker task panicked during shutdown");
            }
        }

        let retired: Vec<JoinHandle<()>> = self.retired.lock().unwrap().drain(..).collect();
        for task in retired {
            let _ = task.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::teststubs::{StubContractor, StubNet};

    fn pool_with_net() -> (Arc<StubNet>, WorkerPool) {
        let net = StubNet::new();
        let contractor = Arc::new(StubContractor(net.clone()));
        let pool = WorkerPool::new(contractor, Duration::from_secs(5), CancellationToken::new());
        (net, pool)
    }

    #[tokio::test]
    async fn test_update_spawns_and_kills_workers() {
        let (net, pool) = pool_with_net();
        let (_, c1) = net.add_host(1);
        let (_, c2) = net.add_host(2);

        pool.update();
        assert_eq!(pool.live_contracts().len(), 2);

        net.remove_contract(c1);
        pool.update();
        let live = pool.live_contracts();
        assert_eq!(live.len(), 1);
        assert!(live.contains(&c2));

        pool.close().await;
    }

    #[tokio::test]
    async fn test_upload_job_round_trip() {
        let (net, pool) = pool_with_net();
        let (_, contract) = net.add_host(1);
        pool.update();

        let worker = pool.worker(contract).unwrap();
        let data = Arc::new(vec![9u8; 128]);
        let (tx, rx) = oneshot::channel();
        worker.queue_upload(UploadJob {
            data: data.clone(),
            reply: tx,
        });

        let root = rx.await.unwrap().unwrap();
        assert_eq!(root, SectorRoot::hash(&data));
        assert_eq!(net.sector(contract, root).unwrap(), *data);

        pool.close().await;
    }

    #[tokio::test]
    async fn test_download_prefers_slot_and_round_trips() {
        let (net, pool) = pool_with_net();
        let (_, contract) = net.add_host(1);
        pool.update();

        let data = vec![3u8; 64];
        let root = net.store_sector(contract, data.clone());

        let worker = pool.worker(contract).unwrap();
        let (tx, rx) = oneshot::channel();
        worker
            .assign_download(DownloadJob { root, reply: tx })
            .unwrap_or_else(|_| panic!("slot should be free"));

        assert_eq!(rx.await.unwrap().unwrap(), data);
        pool.close().await;
    }

    #[tokio::test]
    async fn test_offline_host_fails_pending_jobs() {
        let (net, pool) = pool_with_net();
        let (_, contract) = net.add_host(1);
        pool.update();
        let worker = pool.worker(contract).unwrap();

        net.set_offline(contract, true);
        let (tx, rx) = oneshot::channel();
        worker.queue_upload(UploadJob {
            data: Arc::new(vec![0u8; 8]),
            reply: tx,
        });

        assert!(matches!(rx.await.unwrap(), Err(HostError::Offline)));
        pool.close().await;
    }

    #[tokio::test]
    async fn test_killed_worker_rejects_new_jobs() {
        let (net, pool) = pool_with_net();
        let (_, contract) = net.add_host(1);
        pool.update();
        let worker = pool.worker(contract).unwrap();

        worker.kill();
        let (tx, rx) = oneshot::channel();
        worker.queue_upload(UploadJob {
            data: Arc::new(vec![0u8; 8]),
            reply: tx,
        });
        assert!(matches!(rx.await.unwrap(), Err(HostError::ContractEnded)));

        pool.close().await;
    }
}
