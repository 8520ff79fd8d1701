//! Storage of the training ledger and its audit chain.

pub mod file;
pub mod memory;

pub use self::{file::FileStore, memory::MemoryStore};

use async_trait::async_trait;

use fedwatch_core::{AuditBlock, LedgerEntry, RoundReport};

/// The error type for storage operations that are not directly related to application domain.
/// These include, for example IO errors like broken pipe, file not found, out-of-memory, etc.
pub type StorageError = anyhow::Error;

/// The result of the storage operation.
pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
/// An append-only store of ledger entries and the audit blocks sealing them.
pub trait AuditStore
where
    Self: Clone + Send + Sync + 'static,
{
    /// Stamps the report with the current time, appends it to the ledger and seals it into a new
    /// audit block chained to the last one.
    ///
    /// # Behavior
    ///
    /// - If the chain is empty, the new block points to the genesis hash.
    /// - Concurrent calls on clones of the same store are applied one after another, so no two
    ///   blocks ever point to the same predecessor.
    async fn log_round(&mut self, report: RoundReport) -> StorageResult<LedgerEntry>;

    /// Returns all ledger entries, ordered by round number.
    async fn ledger(&mut self) -> StorageResult<Vec<LedgerEntry>>;

    /// Returns all audit blocks, in the order they were written.
    async fn blocks(&mut self) -> StorageResult<Vec<AuditBlock>>;

    /// Deletes all entries and blocks.
    async fn clear(&mut self) -> StorageResult<()>;
}
