use async_trait::async_trait;

use crate::client::ClientError;
use fedwatch_core::{Ack, AuditBlock, LedgerEntry, TrainingConfig, TrainingStatus};

/// A trait used by the [`Poller`] and the command line to talk to the fedwatch server.
///
/// Methods take `&self` so that one client can be shared by the fetches of a poll cycle that run
/// concurrently.
///
/// [`Poller`]: crate::Poller
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrainingApi: Send + Sync + 'static {
    /// Retrieve the training ledger.
    async fn ledger(&self) -> Result<Vec<LedgerEntry>, ClientError>;

    /// Retrieve the audit chain.
    async fn blockchain(&self) -> Result<Vec<AuditBlock>, ClientError>;

    /// Retrieve the live training status.
    async fn flower_status(&self) -> Result<TrainingStatus, ClientError>;

    /// Ask the server to start a training run.
    async fn start_training(&self, config: TrainingConfig) -> Result<Ack, ClientError>;

    /// Ask the server to stop the training run.
    async fn stop_training(&self) -> Result<Ack, ClientError>;
}
