//! An in-memory store, for tests and for runs that do not need to survive a restart.

use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;

use super::{AuditStore, StorageResult};
use fedwatch_core::{AuditBlock, LedgerEntry, RoundReport};

#[derive(Default)]
struct Logs {
    ledger: Vec<LedgerEntry>,
    blocks: Vec<AuditBlock>,
}

#[derive(Clone, Default)]
pub struct MemoryStore(Arc<Mutex<Logs>>);

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_logs<T>(&self, f: impl FnOnce(&mut Logs) -> StorageResult<T>) -> StorageResult<T> {
        let mut logs = self
            .0
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        f(&mut logs)
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn log_round(&mut self, report: RoundReport) -> StorageResult<LedgerEntry> {
        self.with_logs(|logs| {
            let entry = report.into_entry(Utc::now());
            let block = AuditBlock::seal(&entry, logs.blocks.last(), Utc::now())?;
            logs.ledger.push(entry.clone());
            logs.blocks.push(block);
            Ok(entry)
        })
    }

    async fn ledger(&mut self) -> StorageResult<Vec<LedgerEntry>> {
        self.with_logs(|logs| {
            let mut ledger = logs.ledger.clone();
            ledger.sort_by_key(|entry| entry.round_num);
            Ok(ledger)
        })
    }

    async fn blocks(&mut self) -> StorageResult<Vec<AuditBlock>> {
        self.with_logs(|logs| Ok(logs.blocks.clone()))
    }

    async fn clear(&mut self) -> StorageResult<()> {
        self.with_logs(|logs| {
            logs.ledger.clear();
            logs.blocks.clear();
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::{check_concurrent_appends, check_store};

    #[tokio::test]
    async fn test_memory_store() {
        check_store(MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_memory_store_concurrent_appends() {
        check_concurrent_appends(MemoryStore::new()).await;
    }
}
