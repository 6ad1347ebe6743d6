//! Stub collaborators backed by an in-memory sector map, shared by the
//! concurrency and scenario tests.

use crate::crypto::SectorRoot;
use crate::host::{
    Allowance, ConsensusChange, ConsensusSet, Contract, ContractId, Contractor, Currency,
    HostDb, HostEntry, HostError, HostKey, SectorDownloader, SectorEditor, TransactionPool,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Shared fake network: hosts, contracts, and the sectors they store
pub(crate) struct StubNet {
    hosts: Mutex<Vec<HostEntry>>,
    contracts: Mutex<Vec<Contract>>,
    offline: Mutex<HashSet<ContractId>>,
    sectors: Mutex<HashMap<ContractId, HashMap<SectorRoot, Vec<u8>>>>,
    allowance: Mutex<Allowance>,
    fail_uploads: Mutex<u32>,
}

impl StubNet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            hosts: Mutex::new(Vec::new()),
            contracts: Mutex::new(Vec::new()),
            offline: Mutex::new(HashSet::new()),
            sectors: Mutex::new(HashMap::new()),
            allowance: Mutex::new(Allowance::default()),
            fail_uploads: Mutex::new(0),
        })
    }

    /// Add a host with an active contract. The seed fixes keys and prices,
    /// and lower seeds get higher scores.
    pub fn add_host(&self, seed: u8) -> (HostKey, ContractId) {
        let key = HostKey::from_bytes([seed; 32]);
        let id = ContractId::from_bytes([seed; 32]);

        self.hosts.lock().unwrap().push(HostEntry {
            public_key: key,
            contract_price: 100 * seed as Currency,
            storage_price: seed as Currency,
            download_price: 2 * seed as Currency,
            upload_price: 3 * seed as Currency,
            score: 1000 - seed as u64,
        });
        self.contracts.lock().unwrap().push(Contract {
            id,
            host_key: key,
            end_height: 10_000,
            renter_funds: 1_000_000,
        });
        (key, id)
    }

    pub fn remove_contract(&self, id: ContractId) {
        self.contracts.lock().unwrap().retain(|c| c.id != id);
    }

    pub fn set_offline(&self, id: ContractId, offline: bool) {
        let mut set = self.offline.lock().unwrap();
        if offline {
            set.insert(id);
        } else {
            set.remove(&id);
        }
    }

    pub fn is_offline(&self, id: ContractId) -> bool {
        self.offline.lock().unwrap().contains(&id)
    }

    /// Fail the next `n` sector uploads with a transport error
    pub fn fail_next_uploads(&self, n: u32) {
        *self.fail_uploads.lock().unwrap() = n;
    }

    fn take_upload_failure(&self) -> bool {
        let mut remaining = self.fail_uploads.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            true
        } else {
            false
        }
    }

    /// Place a sector directly, bypassing a worker
    pub fn store_sector(&self, contract: ContractId, data: Vec<u8>) -> SectorRoot {
        let root = SectorRoot::hash(&data);
        self.sectors
            .lock()
            .unwrap()
            .entry(contract)
            .or_default()
            .insert(root, data);
        root
    }

    pub fn sector(&self, contract: ContractId, root: SectorRoot) -> Option<Vec<u8>> {
        self.sectors
            .lock()
            .unwrap()
            .get(&contract)
            .and_then(|m| m.get(&root))
            .cloned()
    }

    /// Replace a stored sector with garbage while keeping its root key
    pub fn corrupt_sector(&self, contract: ContractId, root: SectorRoot) {
        if let Some(data) = self
            .sectors
            .lock()
            .unwrap()
            .get_mut(&contract)
            .and_then(|m| m.get_mut(&root))
        {
            for byte in data.iter_mut() {
                *byte = !*byte;
            }
        }
    }
}

pub(crate) struct StubHostDb(pub Arc<StubNet>);

impl HostDb for StubHostDb {
    fn random_hosts(&self, n: usize, exclude: &[HostKey]) -> Vec<HostEntry> {
        let contracts = self.0.contracts.lock().unwrap().clone();
        let offline_hosts: HashSet<HostKey> = contracts
            .iter()
            .filter(|c| self.0.is_offline(c.id))
            .map(|c| c.host_key)
            .collect();

        let mut hosts: Vec<HostEntry> = self
            .0
            .hosts
            .lock()
            .unwrap()
            .iter()
            .filter(|h| !exclude.contains(&h.public_key))
            .filter(|h| !offline_hosts.contains(&h.public_key))
            .cloned()
            .collect();
        hosts.sort_by(|a, b| b.score.cmp(&a.score));
        hosts.truncate(n);
        hosts
    }

    fn host(&self, key: &HostKey) -> Option<HostEntry> {
        self.0
            .hosts
            .lock()
            .unwrap()
            .iter()
            .find(|h| h.public_key == *key)
            .cloned()
    }
}

pub(crate) struct StubContractor(pub Arc<StubNet>);

#[async_trait]
impl Contractor for StubContractor {
    fn contracts(&self) -> Vec<Contract> {
        self.0.contracts.lock().unwrap().clone()
    }

    fn contract_by_id(&self, id: ContractId) -> Option<Contract> {
        self.0
            .contracts
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id == id)
            .cloned()
    }

    fn is_offline(&self, id: ContractId) -> bool {
        self.0.is_offline(id)
    }

    fn resolve_id(&self, id: ContractId) -> ContractId {
        id
    }

    async fn editor(
        &self,
        id: ContractId,
        _cancel: CancellationToken,
    ) -> Result<Box<dyn SectorEditor>, HostError> {
        if self.0.is_offline(id) {
            return Err(HostError::Offline);
        }
        Ok(Box::new(StubEditor {
            net: self.0.clone(),
            id,
        }))
    }

    async fn downloader(
        &self,
        id: ContractId,
        _cancel: CancellationToken,
    ) -> Result<Box<dyn SectorDownloader>, HostError> {
        if self.0.is_offline(id) {
            return Err(HostError::Offline);
        }
        Ok(Box::new(StubDownloader {
            net: self.0.clone(),
            id,
        }))
    }

    fn set_allowance(&self, allowance: Allowance) -> Result<(), HostError> {
        *self.0.allowance.lock().unwrap() = allowance;
        Ok(())
    }

    fn allowance(&self) -> Allowance {
        self.0.allowance.lock().unwrap().clone()
    }
}

struct StubEditor {
    net: Arc<StubNet>,
    id: ContractId,
}

#[async_trait]
impl SectorEditor for StubEditor {
    async fn upload_sector(&mut self, data: &[u8]) -> Result<SectorRoot, HostError> {
        if self.net.is_offline(self.id) {
            return Err(HostError::Offline);
        }
        if self.net.take_upload_failure() {
            return Err(HostError::Transport("injected failure".into()));
        }
        Ok(self.net.store_sector(self.id, data.to_vec()))
    }
}

struct StubDownloader {
    net: Arc<StubNet>,
    id: ContractId,
}

#[async_trait]
impl SectorDownloader for StubDownloader {
    async fn download_sector(&mut self, root: SectorRoot) -> Result<Vec<u8>, HostError> {
        if self.net.is_offline(self.id) {
            return Err(HostError::Offline);
        }
        self.net
            .sector(self.id, root)
            .ok_or(HostError::SectorNotFound(root))
    }
}

pub(crate) struct StubConsensus {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ConsensusChange>>>,
}

impl StubConsensus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            subscribers: Mutex::new(Vec::new()),
        })
    }

    pub fn emit(&self, height: u64) {
        let subscribers = self.subscribers.lock().unwrap();
        for tx in subscribers.iter() {
            let _ = tx.send(ConsensusChange { height });
        }
    }
}

impl ConsensusSet for StubConsensus {
    fn subscribe(&self) -> mpsc::UnboundedReceiver<ConsensusChange> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }
}

pub(crate) struct StubTpool(pub (Currency, Currency));

impl TransactionPool for StubTpool {
    fn fee_estimation(&self) -> (Currency, Currency) {
        self.0
    }
}

/// Download sink collecting bytes in memory
#[derive(Clone)]
pub(crate) struct MemSink(Arc<Mutex<Vec<u8>>>);

impl MemSink {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Vec::new())))
    }

    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

impl tokio::io::AsyncWrite for MemSink {
    fn poll_write(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        self.0.lock().unwrap().extend_from_slice(buf);
        std::task::Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::task::Poll::Ready(Ok(()))
    }
}
