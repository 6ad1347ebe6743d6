//! In-memory file metadata store
//!
//! All mutations go through a single writer lock; readers take the shared
//! side and receive cloned snapshots. The lock is internal and never held
//! across an await point, so callers cannot deadlock against workers.

use super::{FileMeta, PieceMeta, StoreError};
use crate::crypto::SectorRoot;
use crate::host::{ContractId, HostKey};
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::Notify;

/// Mapping of nickname to file metadata
pub struct FileStore {
    files: RwLock<HashMap<String, FileMeta>>,
    added: Notify,
}

impl FileStore {
    pub fn new() -> Self {
        Self {
            files: RwLock::new(HashMap::new()),
            added: Notify::new(),
        }
    }

    /// Add a file, enforcing the unique-nickname invariant. Wakes the repair
    /// scanner so new uploads start without waiting out the scan interval.
    pub fn add_file(&self, meta: FileMeta) -> Result<(), StoreError> {
        {
            let mut files = self.files.write().unwrap();
            if files.contains_key(&meta.nickname) {
                return Err(StoreError::DuplicateNickname(meta.nickname));
            }
            files.insert(meta.nickname.clone(), meta);
        }
        self.added.notify_one();
        Ok(())
    }

    /// Insert persisted records, replacing any in-memory state
    pub fn load(&self, metas: Vec<FileMeta>) {
        let mut files = self.files.write().unwrap();
        for meta in metas {
            files.insert(meta.nickname.clone(), meta);
        }
    }

    /// Snapshot a single file
    pub fn get(&self, nickname: &str) -> Option<FileMeta> {
        self.files.read().unwrap().get(nickname).cloned()
    }

    /// Remove a file
    pub fn delete(&self, nickname: &str) -> Result<FileMeta, StoreError> {
        self.files
            .write()
            .unwrap()
            .remove(nickname)
            .ok_or_else(|| StoreError::FileNotFound(nickname.to_string()))
    }

    /// Rename a file, keeping nicknames unique
    pub fn rename(&self, old: &str, new: &str) -> Result<(), StoreError> {
        let mut files = self.files.write().unwrap();
        if files.contains_key(new) {
            return Err(StoreError::DuplicateNickname(new.to_string()));
        }
        let mut meta = files
            .remove(old)
            .ok_or_else(|| StoreError::FileNotFound(old.to_string()))?;
        meta.nickname = new.to_string();
        meta.modified_at = chrono::Utc::now().timestamp();
        files.insert(new.to_string(), meta);
        Ok(())
    }

    /// Snapshot every file, ordered by nickname
    pub fn snapshot(&self) -> Vec<FileMeta> {
        let mut metas: Vec<FileMeta> = self.files.read().unwrap().values().cloned().collect();
        metas.sort_by(|a, b| a.nickname.cmp(&b.nickname));
        metas
    }

    /// Snapshot the files the repair scanner maintains
    pub fn tracked(&self) -> Vec<FileMeta> {
        let mut metas: Vec<FileMeta> = self
            .files
            .read()
            .unwrap()
            .values()
            .filter(|m| m.tracked)
            .cloned()
            .collect();
        metas.sort_by(|a, b| a.nickname.cmp(&b.nickname));
        metas
    }

    /// Record a successful piece upload. An existing placement of the same
    /// piece under the same contract is replaced.
    pub fn record_piece_placement(
        &self,
        nickname: &str,
        chunk_index: u64,
        piece_index: u32,
        host: HostKey,
        contract: ContractId,
        root: SectorRoot,
    ) -> Result<(), StoreError> {
        let mut files = self.files.write().unwrap();
        let meta = files
            .get_mut(nickname)
            .ok_or_else(|| StoreError::FileNotFound(nickname.to_string()))?;
        let chunk = meta.chunks.get_mut(chunk_index as usize).ok_or_else(|| {
            StoreError::ChunkOutOfRange {
                nickname: nickname.to_string(),
                chunk: chunk_index,
            }
        })?;

        chunk
            .pieces
            .retain(|p| !(p.piece_index == piece_index && p.contract == contract));
        chunk.pieces.push(PieceMeta {
            piece_index,
            host,
            contract,
            root,
        });
        meta.modified_at = chrono::Utc::now().timestamp();
        Ok(())
    }

    /// Drop a placement, e.g. after an integrity failure
    pub fn forget_piece(
        &self,
        nickname: &str,
        chunk_index: u64,
        piece_index: u32,
        contract: ContractId,
    ) -> Result<(), StoreError> {
        let mut files = self.files.write().unwrap();
        let meta = files
            .get_mut(nickname)
            .ok_or_else(|| StoreError::FileNotFound(nickname.to_string()))?;
        let chunk = meta.chunks.get_mut(chunk_index as usize).ok_or_else(|| {
            StoreError::ChunkOutOfRange {
                nickname: nickname.to_string(),
                chunk: chunk_index,
            }
        })?;

        chunk
            .pieces
            .retain(|p| !(p.piece_index == piece_index && p.contract == contract));
        meta.modified_at = chrono::Utc::now().timestamp();
        Ok(())
    }

    /// Wait until a file is added. Used by the repair scanner.
    pub async fn wait_added(&self) {
        self.added.notified().await;
    }
}

impl Default for FileStore {
    fn default() -> Self {
        Self::new()
    }
}
