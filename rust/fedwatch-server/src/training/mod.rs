//! The training supervisor.
//!
//! A training run launches one Flower server and `num_clients` Flower clients as child processes,
//! watches them until the server exits or every client is done, and then tears everything down.
//! At most one run is in progress at any time.

pub mod process;

use std::{io, process::ExitStatus, sync::Arc};

use displaydoc::Display;
use thiserror::Error;
use tokio::{net::TcpStream, sync::Mutex, time};
use tracing::{debug, error, info, info_span, warn};
use tracing_futures::Instrument;
use validator::{Validate, ValidationErrors};

use self::process::{render_command, Process};
use crate::{
    settings::TrainingSettings,
    storage::{AuditStore, StorageError},
};
use fedwatch_core::{LedgerEntry, RoundReport, TrainingConfig, TrainingStatus};

/// Errors of a training run.
#[derive(Debug, Display, Error)]
pub enum TrainingError {
    /// Training is already in progress.
    AlreadyRunning,
    /// Invalid training configuration: {0}.
    InvalidConfig(#[from] ValidationErrors),
    /// Failed to launch `{command}`: {source}.
    Spawn { command: String, source: io::Error },
    /// The {process} exited early with {status}.
    EarlyExit { process: String, status: ExitStatus },
    /// Storage request failed: {0}.
    Storage(#[from] StorageError),
    /// The run was stopped.
    Stopped,
}

#[derive(Debug, Default)]
struct Run {
    // incremented by every start, so a finishing run never tears down its successor
    id: u64,
    in_progress: bool,
    server: Option<Process>,
    clients: Vec<Process>,
}

impl Run {
    fn take_processes(&mut self) -> Vec<Process> {
        self.server
            .take()
            .into_iter()
            .chain(self.clients.drain(..))
            .collect()
    }
}

/// A handle to the training supervisor.
#[derive(Clone)]
pub struct TrainingSupervisor<S> {
    settings: Arc<TrainingSettings>,
    store: S,
    run: Arc<Mutex<Run>>,
}

impl<S> TrainingSupervisor<S>
where
    S: AuditStore,
{
    pub fn new(settings: TrainingSettings, store: S) -> Self {
        Self {
            settings: Arc::new(settings),
            store,
            run: Arc::new(Mutex::new(Run::default())),
        }
    }

    /// Starts a training run in the background.
    ///
    /// # Errors
    /// Fails if the configuration is invalid or if a run is already in progress.
    pub async fn start(&self, config: TrainingConfig) -> Result<(), TrainingError> {
        config.validate()?;
        let run_id = {
            let mut run = self.run.lock().await;
            if run.in_progress {
                warn!("training is already in progress");
                return Err(TrainingError::AlreadyRunning);
            }
            run.in_progress = true;
            run.id += 1;
            run.id
        };

        let supervisor = self.clone();
        tokio::spawn(
            async move {
                match supervisor.train(run_id, config).await {
                    Ok(()) => info!("training completed"),
                    Err(TrainingError::Stopped) => info!("training stopped"),
                    Err(err) => error!("training failed: {}", err),
                }
                supervisor.finish(run_id).await;
            }
            .instrument(info_span!("training", run = run_id)),
        );
        Ok(())
    }

    /// Stops the run in progress, if any.
    pub async fn stop(&self) {
        let processes = {
            let mut run = self.run.lock().await;
            run.in_progress = false;
            run.take_processes()
        };
        self.terminate(processes).await;
    }

    /// Takes a snapshot of the training status.
    pub async fn status(&self) -> TrainingStatus {
        let (training_in_progress, server_running, clients_connected) = {
            let mut run = self.run.lock().await;
            let server_running = run.server.as_mut().map_or(false, Process::is_running);
            let clients = run
                .clients
                .iter_mut()
                .map(Process::is_running)
                .filter(|running| *running)
                .count();
            (run.in_progress, server_running, clients as u32)
        };
        let flower_accessible = self.probe_flower().await;
        let (current_round, total_rounds) = match self.store.clone().ledger().await {
            Ok(ledger) => rounds(&ledger),
            Err(err) => {
                warn!("failed to read the ledger: {}", err);
                (0, 0)
            }
        };
        TrainingStatus {
            connected: server_running && flower_accessible,
            server_running,
            flower_accessible,
            training_in_progress,
            clients_connected,
            current_round,
            total_rounds,
        }
    }

    async fn train(&self, run_id: u64, config: TrainingConfig) -> Result<(), TrainingError> {
        info!(
            "starting training: {} rounds, {} clients",
            config.num_rounds, config.num_clients
        );
        self.seed_ledger(run_id, config).await?;

        let settings = &self.settings;
        let working_dir = settings.working_dir.as_deref();
        let server_address = settings.flower_address.to_string();

        let command = render_command(
            &settings.server_command,
            &[
                ("rounds", config.num_rounds.to_string()),
                ("clients", config.num_clients.to_string()),
                ("server_address", server_address.clone()),
            ],
        );
        let server = Process::spawn("server", &command, working_dir)?;
        self.with_run(run_id, |run| run.server = Some(server)).await?;

        time::delay_for(settings.startup_delay()).await;
        self.with_run(run_id, |run| early_exit(run.server.as_mut()))
            .await??;

        for cid in 0..config.num_clients {
            let command = render_command(
                &settings.client_command,
                &[
                    ("cid", cid.to_string()),
                    ("server_address", server_address.clone()),
                ],
            );
            let client = Process::spawn(format!("client {}", cid), &command, working_dir)?;
            self.with_run(run_id, |run| run.clients.push(client)).await?;
            time::delay_for(settings.client_spawn_delay()).await;
            self.with_run(run_id, |run| early_exit(run.clients.last_mut()))
                .await??;
        }
        info!("started {} clients", config.num_clients);

        loop {
            let done = self
                .with_run(run_id, |run| {
                    let server_done = run.server.as_mut().map_or(true, |s| !s.is_running());
                    let running = run
                        .clients
                        .iter_mut()
                        .map(Process::is_running)
                        .filter(|running| *running)
                        .count();
                    debug!("{}/{} clients still running", running, run.clients.len());
                    server_done || running == 0
                })
                .await?;
            if done {
                return Ok(());
            }
            time::delay_for(settings.monitor_interval()).await;
        }
    }

    /// Runs `f` on the state of the run `run_id`.
    ///
    /// # Errors
    /// Fails with [`TrainingError::Stopped`] if the run is no longer the current one.
    /// Resets the ledger for the run. The run lock is held throughout, so a stopped run can never
    /// reset or seed the ledger of the run that replaced it.
    async fn seed_ledger(&self, run_id: u64, config: TrainingConfig) -> Result<(), TrainingError> {
        let run = self.run.lock().await;
        if run.id != run_id || !run.in_progress {
            return Err(TrainingError::Stopped);
        }
        let mut store = self.store.clone();
        store.clear().await?;
        store
            .log_round(RoundReport::initial(config.num_rounds))
            .await?;
        Ok(())
    }

    async fn with_run<T>(
        &self,
        run_id: u64,
        f: impl FnOnce(&mut Run) -> T,
    ) -> Result<T, TrainingError> {
        let mut run = self.run.lock().await;
        if run.id != run_id || !run.in_progress {
            return Err(TrainingError::Stopped);
        }
        Ok(f(&mut run))
    }

    async fn finish(&self, run_id: u64) {
        let processes = {
            let mut run = self.run.lock().await;
            if run.id != run_id {
                return;
            }
            run.in_progress = false;
            run.take_processes()
        };
        self.terminate(processes).await;
    }

    async fn terminate(&self, processes: Vec<Process>) {
        for process in processes {
            process.terminate(self.settings.stop_timeout()).await;
        }
    }

    async fn probe_flower(&self) -> bool {
        let address = self.settings.flower_address;
        match time::timeout(self.settings.probe_timeout(), TcpStream::connect(address)).await {
            Ok(Ok(_)) => true,
            Ok(Err(err)) => {
                debug!("flower server at {} is not accessible: {}", address, err);
                false
            }
            Err(_) => {
                debug!("probing the flower server at {} timed out", address);
                false
            }
        }
    }
}

fn early_exit(process: Option<&mut Process>) -> Result<(), TrainingError> {
    match process {
        Some(process) => match process.exit_status() {
            Some(status) => Err(TrainingError::EarlyExit {
                process: process.name().to_string(),
                status,
            }),
            None => Ok(()),
        },
        None => Ok(()),
    }
}

/// The highest logged round and the planned number of rounds.
fn rounds(ledger: &[LedgerEntry]) -> (u32, u32) {
    let current_round = ledger.iter().map(|e| e.round_num).max().unwrap_or(0);
    let total_rounds = ledger
        .iter()
        .find(|e| e.round_num == 0)
        .and_then(|e| e.total_rounds)
        .unwrap_or(0);
    (current_round, total_rounds)
}
