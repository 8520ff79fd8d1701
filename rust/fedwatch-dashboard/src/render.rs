//! Rendering of the [`ViewState`].
//!
//! Everything in here is a pure function of the view, so the terminal dashboard and any other
//! front end show the same numbers.

use std::{
    fmt::{self, Display, Formatter},
    time::Instant,
};

use chrono::{DateTime, Utc};

use crate::view::{Phase, ViewState};
use fedwatch_core::{AuditBlock, LedgerEntry, TrainingStatus};

/// Shown instead of the previous hash of the first block of the chain.
pub const GENESIS_LABEL: &str = "Genesis";

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const PROGRESS_BAR_WIDTH: usize = 30;

/// The progress of the run in percent.
pub fn progress(status: &TrainingStatus) -> u8 {
    if status.total_rounds == 0 {
        return 0;
    }
    let percent =
        (100.0 * f64::from(status.current_round) / f64::from(status.total_rounds)).round();
    percent.max(0.0).min(100.0) as u8
}

pub fn connection_label(status: &TrainingStatus) -> String {
    if status.connected {
        format!("Connected ({} clients)", status.clients_connected)
    } else if status.server_running {
        "running but not accessible".to_string()
    } else if status.training_in_progress {
        "starting up".to_string()
    } else {
        "disconnected".to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LedgerRow {
    pub round: u32,
    pub time: String,
    pub clients: String,
    pub accuracy: String,
    pub loss: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuditRow {
    pub round: u32,
    pub time: String,
    pub data_hash: String,
    pub previous_hash: String,
}

/// The ledger table, newest entry first.
pub fn ledger_rows(entries: &[LedgerEntry]) -> Vec<LedgerRow> {
    let mut entries = entries.iter().collect::<Vec<_>>();
    entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    entries
        .into_iter()
        .map(|entry| LedgerRow {
            round: entry.round_num,
            time: format_time(&entry.timestamp),
            clients: if entry.clients.is_empty() {
                "-".to_string()
            } else {
                entry.clients.join(", ")
            },
            accuracy: entry
                .accuracy
                .map(|accuracy| format!("{:.2}%", accuracy * 100.0))
                .unwrap_or_else(|| "-".to_string()),
            loss: entry
                .loss
                .map(|loss| format!("{:.4}", loss))
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect()
}

/// The audit table, newest block first.
pub fn audit_rows(blocks: &[AuditBlock]) -> Vec<AuditRow> {
    let mut blocks = blocks.iter().collect::<Vec<_>>();
    blocks.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    blocks
        .into_iter()
        .map(|block| AuditRow {
            round: block.round_num,
            time: format_time(&block.timestamp),
            data_hash: block.data_hash.clone(),
            previous_hash: if block.is_genesis() {
                GENESIS_LABEL.to_string()
            } else {
                block.previous_hash.clone()
            },
        })
        .collect()
}

/// Metric series of the charts, as `(round, value)` points.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChartSeries {
    pub accuracy: Vec<(u32, f64)>,
    pub loss: Vec<(u32, f64)>,
}

/// The chart series, in ascending round order. Rounds without a metric are left out of its
/// series.
pub fn chart_series(entries: &[LedgerEntry]) -> ChartSeries {
    let mut entries = entries.iter().collect::<Vec<_>>();
    entries.sort_by_key(|entry| entry.round_num);
    ChartSeries {
        accuracy: entries
            .iter()
            .filter_map(|entry| entry.accuracy.map(|value| (entry.round_num, value)))
            .collect(),
        loss: entries
            .iter()
            .filter_map(|entry| entry.loss.map(|value| (entry.round_num, value)))
            .collect(),
    }
}

fn format_time(ts: &DateTime<Utc>) -> String {
    ts.format(TIME_FORMAT).to_string()
}

fn shorten(hash: &str) -> &str {
    hash.get(..16).unwrap_or(hash)
}

/// A plain-text rendering of the view at a point in time.
pub struct Dashboard<'a> {
    view: &'a ViewState,
    now: Instant,
}

impl<'a> Dashboard<'a> {
    pub fn new(view: &'a ViewState, now: Instant) -> Self {
        Self { view, now }
    }
}

impl<'a> Display for Dashboard<'a> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let view = self.view;
        writeln!(f, "fedwatch")?;
        if let Some(ref error) = view.error {
            writeln!(f, "!! {}", error)?;
        }
        writeln!(f)?;

        let status = view.status.clone().unwrap_or_default();
        writeln!(f, "Flower server: {}", connection_label(&status))?;
        let percent = progress(&status);
        let filled = PROGRESS_BAR_WIDTH * usize::from(percent) / 100;
        writeln!(
            f,
            "Round {}/{} [{}{}] {}%",
            status.current_round,
            status.total_rounds,
            "#".repeat(filled),
            " ".repeat(PROGRESS_BAR_WIDTH - filled),
            percent
        )?;
        match view.phase(self.now) {
            Phase::Training => writeln!(f, "Training in progress")?,
            Phase::Completed { .. } => writeln!(f, "Training completed")?,
            Phase::Idle => {}
        }

        writeln!(f)?;
        writeln!(f, "Training ledger")?;
        writeln!(
            f,
            "{:>5}  {:<19}  {:>8}  {:>8}  clients",
            "round", "time", "accuracy", "loss"
        )?;
        for row in ledger_rows(&view.ledger) {
            writeln!(
                f,
                "{:>5}  {:<19}  {:>8}  {:>8}  {}",
                row.round, row.time, row.accuracy, row.loss, row.clients
            )?;
        }

        writeln!(f)?;
        writeln!(f, "Audit log")?;
        writeln!(
            f,
            "{:>5}  {:<19}  {:<16}  previous",
            "round", "time", "hash"
        )?;
        for row in audit_rows(&view.blocks) {
            writeln!(
                f,
                "{:>5}  {:<19}  {:<16}  {}",
                row.round,
                row.time,
                shorten(&row.data_hash),
                shorten(&row.previous_hash)
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::poller::{CycleReport, Update};
    use fedwatch_core::{RoundReport, GENESIS_HASH};

    fn entry(round_num: u32, hour: u32, min: u32) -> LedgerEntry {
        RoundReport {
            round_num,
            clients: vec!["0".to_string(), "1".to_string()],
            accuracy: Some(0.5 + f64::from(round_num) / 10.0),
            loss: Some(1.0 / f64::from(round_num + 1)),
            total_rounds: None,
        }
        .into_entry(Utc.ymd(2023, 11, 14).and_hms(hour, min, 0))
    }

    fn block(round_num: u32, min: u32, previous_hash: &str) -> AuditBlock {
        AuditBlock {
            round_num,
            timestamp: Utc.ymd(2023, 11, 14).and_hms(10, min, 0),
            data_hash: format!("{:f>64}", round_num + 1),
            previous_hash: previous_hash.to_string(),
        }
    }

    fn status(current_round: u32, total_rounds: u32) -> TrainingStatus {
        TrainingStatus {
            current_round,
            total_rounds,
            ..Default::default()
        }
    }

    #[test]
    fn test_progress() {
        assert_eq!(progress(&status(3, 10)), 30);
        assert_eq!(progress(&status(0, 0)), 0);
        assert_eq!(progress(&status(5, 0)), 0);
        assert_eq!(progress(&status(1, 3)), 33);
        assert_eq!(progress(&status(2, 3)), 67);
        assert_eq!(progress(&status(3, 3)), 100);
        // a late round report must not overflow the bar
        assert_eq!(progress(&status(4, 3)), 100);
    }

    #[test]
    fn test_connection_label() {
        let mut status = TrainingStatus {
            connected: true,
            server_running: true,
            flower_accessible: true,
            training_in_progress: true,
            clients_connected: 2,
            ..Default::default()
        };
        assert_eq!(connection_label(&status), "Connected (2 clients)");
        status.connected = false;
        assert_eq!(connection_label(&status), "running but not accessible");
        status.server_running = false;
        assert_eq!(connection_label(&status), "starting up");
        status.training_in_progress = false;
        assert_eq!(connection_label(&status), "disconnected");
    }

    #[test]
    fn test_ledger_rows_newest_first() {
        let rows = ledger_rows(&[entry(1, 10, 0), entry(2, 10, 5), entry(3, 10, 2)]);
        let order = rows
            .iter()
            .map(|row| (row.round, row.time.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(
            order,
            vec![
                (2, "2023-11-14 10:05:00"),
                (3, "2023-11-14 10:02:00"),
                (1, "2023-11-14 10:00:00"),
            ]
        );
        assert_eq!(rows[0].accuracy, "70.00%");
        assert_eq!(rows[0].clients, "0, 1");
    }

    #[test]
    fn test_missing_metrics() {
        let initial = RoundReport::initial(3).into_entry(Utc.ymd(2023, 11, 14).and_hms(9, 0, 0));
        let rows = ledger_rows(&[initial]);
        assert_eq!(rows[0].accuracy, "-");
        assert_eq!(rows[0].loss, "-");
        assert_eq!(rows[0].clients, "-");
    }

    #[test]
    fn test_audit_rows_label_genesis() {
        let first = block(0, 0, GENESIS_HASH);
        let second = block(1, 1, &first.data_hash);
        let rows = audit_rows(&[first.clone(), second]);
        assert_eq!(rows[0].round, 1);
        assert_eq!(rows[0].previous_hash, first.data_hash);
        assert_eq!(rows[1].round, 0);
        assert_eq!(rows[1].previous_hash, GENESIS_LABEL);
    }

    #[test]
    fn test_chart_series_ascending_and_sparse() {
        let mut late = entry(2, 10, 1);
        late.loss = None;
        let entries = vec![
            late,
            RoundReport::initial(3).into_entry(Utc.ymd(2023, 11, 14).and_hms(9, 0, 0)),
            entry(1, 10, 5),
        ];
        let series = chart_series(&entries);
        assert_eq!(series.accuracy, vec![(1, 0.6), (2, 0.7)]);
        assert_eq!(series.loss, vec![(1, 0.5)]);
    }

    #[test]
    fn test_dashboard_text() {
        let now = Instant::now();
        let mut view = ViewState::default();
        view.apply(
            Update::Cycle(CycleReport {
                cycle: 1,
                ledger: Err(crate::ClientError::Http("timed out".to_string())),
                blocks: Ok(vec![block(0, 0, GENESIS_HASH)]),
            }),
            now,
        );
        view.apply(
            Update::Status {
                cycle: 1,
                status: Ok(TrainingStatus {
                    connected: true,
                    server_running: true,
                    flower_accessible: true,
                    training_in_progress: true,
                    clients_connected: 3,
                    current_round: 3,
                    total_rounds: 10,
                }),
            },
            now,
        );

        let text = Dashboard::new(&view, now).to_string();
        assert!(text.contains("!! showing partial data: ledger"));
        assert!(text.contains("Flower server: Connected (3 clients)"));
        assert!(text.contains("Round 3/10 [#########"));
        assert!(text.contains("30%"));
        assert!(text.contains("Training in progress"));
        assert!(text.contains(GENESIS_LABEL));
        assert!(!text.contains(&GENESIS_HASH[..16]));
    }
}
