//! A store that keeps the ledger and the audit chain in two line-delimited JSON files.
//!
//! Each file starts with `#` comment lines describing its format. Lines that fail to parse are
//! skipped with a warning, so a truncated last line never makes the whole log unreadable. Appends
//! terminate such a line first, so the new line stays readable.

use std::{
    io::SeekFrom,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use tokio::{
    fs,
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
    sync::Mutex,
};
use tracing::{debug, warn};

use super::{AuditStore, StorageResult};
use fedwatch_core::{AuditBlock, LedgerEntry, RoundReport};

const LEDGER_HEADER: &str = "# Federated Learning Training Ledger\n\
                             # Format: {timestamp, round_num, clients, accuracy, loss}\n";
const CHAIN_HEADER: &str = "# Blockchain Hashes for FL Training Rounds\n\
                            # Format: {timestamp, round_num, data_hash, previous_hash}\n";

#[derive(Clone)]
pub struct FileStore {
    ledger_path: Arc<PathBuf>,
    chain_path: Arc<PathBuf>,
    // serializes appends: reading the last block and writing the next one must not interleave
    lock: Arc<Mutex<()>>,
}

impl FileStore {
    /// Opens the store, creating missing directories and files.
    pub async fn open(
        ledger_path: impl Into<PathBuf>,
        chain_path: impl Into<PathBuf>,
    ) -> StorageResult<Self> {
        let store = Self {
            ledger_path: Arc::new(ledger_path.into()),
            chain_path: Arc::new(chain_path.into()),
            lock: Arc::new(Mutex::new(())),
        };
        init_file(&store.ledger_path, LEDGER_HEADER).await?;
        init_file(&store.chain_path, CHAIN_HEADER).await?;
        Ok(store)
    }
}

async fn init_file(path: &Path, header: &str) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    if fs::metadata(path).await.is_err() {
        debug!("creating {}", path.display());
        fs::write(path, header)
            .await
            .with_context(|| format!("failed to create {}", path.display()))?;
    }
    Ok(())
}

async fn read_lines<T: DeserializeOwned>(path: &Path) -> StorageResult<Vec<T>> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()));
        }
    };
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| match serde_json::from_str(line) {
            Ok(item) => Some(item),
            Err(err) => {
                warn!("skipping malformed line in {}: {}", path.display(), err);
                None
            }
        })
        .collect())
}

/// Appends `item` as one line and returns the length the file had before.
async fn append_line<T: serde::Serialize>(path: &Path, item: &T) -> StorageResult<u64> {
    let mut line = serde_json::to_string(item)?;
    line.push('\n');
    let mut file = fs::OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    let len = file.metadata().await?.len();
    if len > 0 {
        let mut last = [0_u8; 1];
        file.seek(SeekFrom::Start(len - 1)).await?;
        file.read_exact(&mut last).await?;
        if last[0] != b'\n' {
            warn!("terminating a partial last line in {}", path.display());
            line.insert(0, '\n');
        }
    }
    // append mode: the write lands at the end whatever the read position
    file.write_all(line.as_bytes())
        .await
        .with_context(|| format!("failed to append to {}", path.display()))?;
    file.flush().await?;
    Ok(len)
}

async fn truncate(path: &Path, len: u64) -> StorageResult<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .open(path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    file.set_len(len)
        .await
        .with_context(|| format!("failed to truncate {}", path.display()))?;
    Ok(())
}

#[async_trait]
impl AuditStore for FileStore {
    async fn log_round(&mut self, report: RoundReport) -> StorageResult<LedgerEntry> {
        let _guard = self.lock.lock().await;
        let entry = report.into_entry(Utc::now());
        let blocks: Vec<AuditBlock> = read_lines(&self.chain_path).await?;
        let block = AuditBlock::seal(&entry, blocks.last(), Utc::now())?;
        // the block goes first and is rolled back if the entry cannot be written, so the ledger
        // never holds an entry without a block
        let chain_len = append_line(&self.chain_path, &block).await?;
        if let Err(err) = append_line(&self.ledger_path, &entry).await {
            if let Err(rollback) = truncate(&self.chain_path, chain_len).await {
                warn!("failed to roll back the audit chain: {:?}", rollback);
            }
            return Err(err);
        }
        debug!(round = entry.round_num, hash = %block.data_hash, "logged round");
        Ok(entry)
    }

    async fn ledger(&mut self) -> StorageResult<Vec<LedgerEntry>> {
        let mut ledger: Vec<LedgerEntry> = read_lines(&self.ledger_path).await?;
        ledger.sort_by_key(|entry| entry.round_num);
        Ok(ledger)
    }

    async fn blocks(&mut self) -> StorageResult<Vec<AuditBlock>> {
        read_lines(&self.chain_path).await
    }

    async fn clear(&mut self) -> StorageResult<()> {
        let _guard = self.lock.lock().await;
        fs::write(self.ledger_path.as_ref(), LEDGER_HEADER).await?;
        fs::write(self.chain_path.as_ref(), CHAIN_HEADER).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::{check_concurrent_appends, check_store, report};

    async fn store(dir: &tempfile::TempDir) -> FileStore {
        FileStore::open(
            dir.path().join("logs/ledger.log"),
            dir.path().join("logs/blockchain.log"),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_file_store() {
        let dir = tempfile::tempdir().unwrap();
        check_store(store(&dir).await).await;
    }

    #[tokio::test]
    async fn test_file_store_concurrent_appends() {
        let dir = tempfile::tempdir().unwrap();
        check_concurrent_appends(store(&dir).await).await;
    }

    #[tokio::test]
    async fn test_reopen_keeps_chain() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = store(&dir).await;
        first.log_round(report(1)).await.unwrap();

        let mut second = store(&dir).await;
        second.log_round(report(2)).await.unwrap();
        let blocks = second.blocks().await.unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].previous_hash, blocks[0].data_hash);
    }

    #[tokio::test]
    async fn test_malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store(&dir).await;
        store.log_round(report(1)).await.unwrap();
        append_line(&store.ledger_path, &"not an entry").await.unwrap();
        fs::OpenOptions::new()
            .append(true)
            .open(store.ledger_path.as_ref())
            .await
            .unwrap()
            .write_all(b"{\"round_num\": 2, \"timest")
            .await
            .unwrap();

        let ledger = store.ledger().await.unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].round_num, 1);
    }

    async fn write_partial_line(path: &Path) {
        fs::OpenOptions::new()
            .append(true)
            .open(path)
            .await
            .unwrap()
            .write_all(b"{\"round_num\": 2, \"timest")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_append_after_partial_line() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store(&dir).await;
        store.log_round(report(1)).await.unwrap();
        write_partial_line(&store.ledger_path).await;
        write_partial_line(&store.chain_path).await;

        store.log_round(report(2)).await.unwrap();
        let ledger = store.ledger().await.unwrap();
        let rounds = ledger.iter().map(|e| e.round_num).collect::<Vec<_>>();
        assert_eq!(rounds, vec![1, 2]);
        let blocks = store.blocks().await.unwrap();
        let rounds = blocks.iter().map(|b| b.round_num).collect::<Vec<_>>();
        assert_eq!(rounds, vec![1, 2]);
        assert_eq!(blocks[1].previous_hash, blocks[0].data_hash);
    }

    #[tokio::test]
    async fn test_failed_entry_rolls_back_block() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store(&dir).await;
        store.log_round(report(1)).await.unwrap();
        let chain = fs::read_to_string(store.chain_path.as_ref()).await.unwrap();

        // the ledger can no longer be opened for appending
        fs::remove_file(store.ledger_path.as_ref()).await.unwrap();
        fs::create_dir(store.ledger_path.as_ref()).await.unwrap();

        assert!(store.log_round(report(2)).await.is_err());
        assert_eq!(
            fs::read_to_string(store.chain_path.as_ref()).await.unwrap(),
            chain
        );
        assert_eq!(store.blocks().await.unwrap().len(), 1);
    }
}
