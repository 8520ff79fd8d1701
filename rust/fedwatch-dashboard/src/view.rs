//! The dashboard state merged from the poll results.

use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::poller::{FetchError, Update};
use fedwatch_core::{AuditBlock, LedgerEntry, TrainingStatus};

/// How long the completion notice stays visible by default.
pub const COMPLETED_VISIBLE_FOR: Duration = Duration::from_secs(5);

/// The training phase as seen by the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Training,
    /// A run finished at `since`.
    Completed { since: Instant },
}

/// Everything the dashboard shows.
///
/// The view has a single owner applying [`Update`]s in arrival order. Updates of a poll cycle
/// older than the one already applied to the same region are dropped, so a slow response can
/// never overwrite newer data.
#[derive(Debug)]
pub struct ViewState {
    pub ledger: Vec<LedgerEntry>,
    pub blocks: Vec<AuditBlock>,
    pub status: Option<TrainingStatus>,
    pub error: Option<FetchError>,
    phase: Phase,
    data_cycle: Option<u64>,
    status_cycle: Option<u64>,
    completed_visible_for: Duration,
}

impl Default for ViewState {
    fn default() -> Self {
        Self::new(COMPLETED_VISIBLE_FOR)
    }
}

impl ViewState {
    pub fn new(completed_visible_for: Duration) -> Self {
        Self {
            ledger: Vec::new(),
            blocks: Vec::new(),
            status: None,
            error: None,
            phase: Phase::Idle,
            data_cycle: None,
            status_cycle: None,
            completed_visible_for,
        }
    }

    /// Merges an update into the view. Returns whether anything was applied.
    pub fn apply(&mut self, update: Update, now: Instant) -> bool {
        match update {
            Update::Cycle(report) => {
                if is_stale(self.data_cycle, report.cycle) {
                    debug!("dropping the data of stale cycle {}", report.cycle);
                    return false;
                }
                self.data_cycle = Some(report.cycle);
                self.error = report.failure();
                if let Ok(ledger) = report.ledger {
                    self.ledger = ledger;
                }
                if let Ok(blocks) = report.blocks {
                    self.blocks = blocks;
                }
                true
            }
            Update::Status { cycle, status } => {
                if is_stale(self.status_cycle, cycle) {
                    debug!("dropping the status of stale cycle {}", cycle);
                    return false;
                }
                self.status_cycle = Some(cycle);
                match status {
                    Ok(status) => {
                        self.track_phase(&status, now);
                        self.status = Some(status);
                        true
                    }
                    // already logged by the poller, keep the last known status
                    Err(_) => false,
                }
            }
        }
    }

    fn track_phase(&mut self, status: &TrainingStatus, now: Instant) {
        if status.training_in_progress {
            if self.phase != Phase::Training {
                info!("training in progress");
            }
            self.phase = Phase::Training;
        } else if self.phase == Phase::Training {
            if self.ledger.is_empty() {
                self.phase = Phase::Idle;
            } else {
                info!("training completed");
                self.phase = Phase::Completed { since: now };
            }
        }
    }

    /// The phase to show at `now`. The completion notice expires after the configured delay.
    pub fn phase(&self, now: Instant) -> Phase {
        match self.phase {
            Phase::Completed { since }
                if now.saturating_duration_since(since) >= self.completed_visible_for =>
            {
                Phase::Idle
            }
            phase => phase,
        }
    }
}

fn is_stale(applied: Option<u64>, cycle: u64) -> bool {
    applied.map_or(false, |applied| cycle <= applied)
}
