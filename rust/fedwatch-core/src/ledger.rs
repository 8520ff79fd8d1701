//! The training ledger.

use chrono::{DateTime, Utc};

use crate::common::unix_seconds;

/// One round of federated learning as recorded in the training ledger.
///
/// The entry with `round_num == 0` is written when a run starts and carries the number of rounds
/// the run was configured for in `total_rounds`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub round_num: u32,
    #[serde(with = "unix_seconds")]
    pub timestamp: DateTime<Utc>,
    /// Identifiers of the clients that took part in the round.
    #[serde(default)]
    pub clients: Vec<String>,
    /// Accuracy of the global model, in `[0, 1]`.
    #[serde(default)]
    pub accuracy: Option<f64>,
    /// Loss of the global model.
    #[serde(default)]
    pub loss: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_rounds: Option<u32>,
}

/// A finished round as reported by a trainer, before it is timestamped and logged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoundReport {
    pub round_num: u32,
    #[serde(default)]
    pub clients: Vec<String>,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub loss: Option<f64>,
    #[serde(default)]
    pub total_rounds: Option<u32>,
}

impl RoundReport {
    /// The report logged when a run of `total_rounds` rounds starts.
    pub fn initial(total_rounds: u32) -> Self {
        Self {
            round_num: 0,
            total_rounds: Some(total_rounds),
            ..Self::default()
        }
    }

    /// Turns the report into a ledger entry stamped with `timestamp`.
    pub fn into_entry(self, timestamp: DateTime<Utc>) -> LedgerEntry {
        let RoundReport {
            round_num,
            clients,
            accuracy,
            loss,
            total_rounds,
        } = self;
        LedgerEntry {
            round_num,
            timestamp,
            clients,
            accuracy,
            loss,
            total_rounds,
        }
    }
}
