//! The polling loop feeding the [`ViewState`].
//!
//! [`ViewState`]: crate::ViewState

use std::{future::Future, sync::Arc, time::Duration};

use futures::join;
use thiserror::Error;
use tokio::{sync::mpsc, time};
use tracing::{debug, debug_span, warn};
use tracing_futures::Instrument;

use crate::{ClientError, TrainingApi};
use fedwatch_core::{AuditBlock, LedgerEntry, TrainingStatus};

/// A ledger/audit fetch failure shown in the error banner.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Both the ledger and the audit chain could not be fetched.
    #[error("cannot reach the server: {0}")]
    NetworkFailure(String),
    /// One of the ledger and the audit chain could not be fetched.
    #[error("showing partial data: {0}")]
    PartialDataFailure(String),
}

/// The outcome of the ledger and audit fetches of one poll cycle.
#[derive(Debug)]
pub struct CycleReport {
    pub cycle: u64,
    pub ledger: Result<Vec<LedgerEntry>, ClientError>,
    pub blocks: Result<Vec<AuditBlock>, ClientError>,
}

impl CycleReport {
    /// The banner this cycle calls for, if any.
    pub fn failure(&self) -> Option<FetchError> {
        match (&self.ledger, &self.blocks) {
            (Ok(_), Ok(_)) => None,
            (Err(ledger), Err(blocks)) => Some(FetchError::NetworkFailure(format!(
                "ledger: {}; audit log: {}",
                ledger, blocks
            ))),
            (Err(e), Ok(_)) => Some(FetchError::PartialDataFailure(format!("ledger: {}", e))),
            (Ok(_), Err(e)) => Some(FetchError::PartialDataFailure(format!("audit log: {}", e))),
        }
    }
}

/// A result delivered to the view owner.
#[derive(Debug)]
pub enum Update {
    /// The ledger and audit fetches of a cycle resolved.
    Cycle(CycleReport),
    /// The live status fetch of a cycle resolved.
    Status {
        cycle: u64,
        status: Result<TrainingStatus, ClientError>,
    },
}

impl Update {
    pub fn cycle(&self) -> u64 {
        match self {
            Update::Cycle(report) => report.cycle,
            Update::Status { cycle, .. } => *cycle,
        }
    }
}

/// Polls the server at a fixed period.
///
/// Every tick starts a poll cycle numbered one higher than the last. A cycle runs in its own task,
/// so a slow server delays neither the next tick nor the other fetches. Dropping the future
/// returned by [`Poller::run`] stops the ticks. Every fetch gives up after the request timeout,
/// so an unresponsive server shows up as a failed fetch and hung cycles do not pile up.
pub struct Poller<A> {
    api: Arc<A>,
    period: Duration,
    request_timeout: Duration,
    updates: mpsc::UnboundedSender<Update>,
}

impl<A> Poller<A>
where
    A: TrainingApi,
{
    pub fn new(
        api: A,
        period: Duration,
        request_timeout: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<Update>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let poller = Self {
            api: Arc::new(api),
            period,
            request_timeout,
            updates: tx,
        };
        (poller, rx)
    }

    pub async fn run(self) {
        let mut interval = time::interval(self.period);
        let mut cycle = 0_u64;
        loop {
            interval.tick().await;
            cycle += 1;
            let api = self.api.clone();
            let updates = self.updates.clone();
            tokio::spawn(
                poll_cycle(api, cycle, self.request_timeout, updates)
                    .instrument(debug_span!("poll_cycle", cycle)),
            );
        }
    }
}

/// Runs the fetches of one poll cycle.
///
/// Errors end up in the updates and never leave this function.
pub async fn poll_cycle<A>(
    api: Arc<A>,
    cycle: u64,
    request_timeout: Duration,
    updates: mpsc::UnboundedSender<Update>,
) where
    A: TrainingApi,
{
    let status_api = api.clone();
    let status_updates = updates.clone();
    tokio::spawn(
        async move {
            let status = fetch(status_api.flower_status(), request_timeout).await;
            if let Err(ref e) = status {
                debug!("failed to fetch the training status: {}", e);
            }
            // the view owner is gone when this fails
            let _ = status_updates.send(Update::Status { cycle, status });
        }
        .in_current_span(),
    );

    let (ledger, blocks) = join!(
        fetch(api.ledger(), request_timeout),
        fetch(api.blockchain(), request_timeout)
    );
    if let Err(ref e) = ledger {
        warn!("failed to fetch the ledger: {}", e);
    }
    if let Err(ref e) = blocks {
        warn!("failed to fetch the audit log: {}", e);
    }
    let _ = updates.send(Update::Cycle(CycleReport {
        cycle,
        ledger,
        blocks,
    }));
}

async fn fetch<T, F>(request: F, timeout: Duration) -> Result<T, ClientError>
where
    F: Future<Output = Result<T, ClientError>>,
{
    match time::timeout(timeout, request).await {
        Ok(response) => response,
        Err(_) => Err(ClientError::Http(format!(
            "no response within {} ms",
            timeout.as_millis()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::traits::MockTrainingApi;
    use fedwatch_core::GENESIS_HASH;

    fn block() -> AuditBlock {
        AuditBlock {
            round_num: 0,
            timestamp: Utc.ymd(2023, 11, 14).and_hms(10, 0, 0),
            data_hash: "ab".repeat(32),
            previous_hash: GENESIS_HASH.to_string(),
        }
    }

    fn unreachable() -> ClientError {
        ClientError::Http("connection refused".to_string())
    }

    #[test]
    fn test_failure_banner() {
        let report = |ledger: bool, blocks: bool| CycleReport {
            cycle: 1,
            ledger: if ledger { Ok(vec![]) } else { Err(unreachable()) },
            blocks: if blocks { Ok(vec![]) } else { Err(unreachable()) },
        };
        assert_eq!(report(true, true).failure(), None);
        assert!(matches!(
            report(false, false).failure(),
            Some(FetchError::NetworkFailure(_))
        ));
        assert!(matches!(
            report(false, true).failure(),
            Some(FetchError::PartialDataFailure(ref msg)) if msg.starts_with("ledger")
        ));
        assert!(matches!(
            report(true, false).failure(),
            Some(FetchError::PartialDataFailure(ref msg)) if msg.starts_with("audit log")
        ));
    }

    #[tokio::test]
    async fn test_poll_cycle_sends_both_updates() {
        let mut api = MockTrainingApi::new();
        api.expect_ledger().times(1).returning(|| Err(unreachable()));
        api.expect_blockchain()
            .times(1)
            .returning(|| Ok(vec![block()]));
        api.expect_flower_status()
            .times(1)
            .returning(|| Ok(TrainingStatus::default()));

        let (tx, mut rx) = mpsc::unbounded_channel();
        poll_cycle(Arc::new(api), 7, Duration::from_secs(5), tx).await;

        let mut cycles = 0;
        let mut statuses = 0;
        for _ in 0..2 {
            match rx.recv().await.unwrap() {
                Update::Cycle(report) => {
                    assert_eq!(report.cycle, 7);
                    assert!(report.ledger.is_err());
                    assert_eq!(report.blocks.unwrap(), vec![block()]);
                    cycles += 1;
                }
                Update::Status { cycle, status } => {
                    assert_eq!(cycle, 7);
                    assert!(status.is_ok());
                    statuses += 1;
                }
            }
        }
        assert_eq!((cycles, statuses), (1, 1));
    }

    #[tokio::test]
    async fn test_failing_fetches_do_not_stop_the_ticks() {
        let mut api = MockTrainingApi::new();
        api.expect_ledger().returning(|| Err(unreachable()));
        api.expect_blockchain().returning(|| Ok(vec![block()]));
        api.expect_flower_status().returning(|| Err(unreachable()));

        let (poller, mut rx) = Poller::new(api, Duration::from_millis(10), Duration::from_secs(5));
        tokio::spawn(poller.run());

        let mut cycles = Vec::new();
        while cycles.len() < 3 {
            if let Update::Cycle(report) = rx.recv().await.unwrap() {
                assert!(report.ledger.is_err());
                assert!(report.blocks.is_ok());
                cycles.push(report.cycle);
            }
        }
        // cycles run concurrently and may resolve out of order
        cycles.sort_unstable();
        cycles.dedup();
        assert_eq!(cycles.len(), 3);
        assert!(cycles.iter().all(|cycle| *cycle >= 1));
    }

    struct Unresponsive;

    #[async_trait::async_trait]
    impl TrainingApi for Unresponsive {
        async fn ledger(&self) -> Result<Vec<LedgerEntry>, ClientError> {
            futures::future::pending().await
        }

        async fn blockchain(&self) -> Result<Vec<AuditBlock>, ClientError> {
            futures::future::pending().await
        }

        async fn flower_status(&self) -> Result<TrainingStatus, ClientError> {
            futures::future::pending().await
        }

        async fn start_training(
            &self,
            _config: fedwatch_core::TrainingConfig,
        ) -> Result<fedwatch_core::Ack, ClientError> {
            futures::future::pending().await
        }

        async fn stop_training(&self) -> Result<fedwatch_core::Ack, ClientError> {
            futures::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_unresponsive_server_times_out() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cycle = poll_cycle(
            Arc::new(Unresponsive),
            3,
            Duration::from_millis(50),
            tx,
        );
        // the cycle must end on its own
        time::timeout(Duration::from_secs(5), cycle).await.unwrap();

        let mut report = None;
        while report.is_none() {
            match time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap() {
                Some(Update::Cycle(cycle)) => report = Some(cycle),
                Some(Update::Status { status, .. }) => {
                    assert!(matches!(status, Err(ClientError::Http(_))))
                }
                None => panic!("channel closed before the cycle report"),
            }
        }
        let report = report.unwrap();
        assert_eq!(report.cycle, 3);
        assert!(matches!(report.ledger, Err(ClientError::Http(_))));
        assert!(matches!(report.blocks, Err(ClientError::Http(_))));
        assert!(matches!(
            report.failure(),
            Some(FetchError::NetworkFailure(_))
        ));
    }
}
