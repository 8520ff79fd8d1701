use std::{path::PathBuf, process};

use fedwatch_server::{
    registry::{EventListener, EventPublisher, RegistryService},
    rest,
    settings::{ApiSettings, Settings, StorageBackend, TrainingSettings},
    storage::{AuditStore, FileStore, MemoryStore},
    training::TrainingSupervisor,
};
use structopt::StructOpt;
use tokio::signal;
use tracing_futures::Instrument;
use tracing_subscriber::*;

#[macro_use]
extern crate tracing;

#[derive(Debug, StructOpt)]
#[structopt(name = "fedwatch-server")]
struct Opt {
    /// Path of the configuration file
    #[structopt(short, parse(from_os_str))]
    config_path: PathBuf,
}

#[tokio::main]
async fn main() {
    let opt = Opt::from_args();

    let settings = Settings::new(opt.config_path).unwrap_or_else(|err| {
        eprintln!("{}", err);
        process::exit(1);
    });

    let _fmt_subscriber = FmtSubscriber::builder()
        .with_env_filter(settings.log.filter)
        .with_ansi(true)
        .init();

    if sodiumoxide::init().is_err() {
        error!("failed to initialize the crypto library");
        process::exit(1);
    }

    let storage = settings.storage;
    match storage.backend {
        StorageBackend::File => {
            let store = FileStore::open(storage.ledger_path, storage.chain_path)
                .await
                .unwrap_or_else(|err| {
                    error!("failed to open the audit log: {:?}", err);
                    process::exit(1);
                });
            run(settings.api, settings.training, store).await
        }
        StorageBackend::Memory => {
            run(settings.api, settings.training, MemoryStore::new()).await
        }
    }
}

async fn run<S: AuditStore>(
    api_settings: ApiSettings,
    training_settings: TrainingSettings,
    store: S,
) {
    let (publisher, listener) = EventPublisher::new(256);
    let (registry_service, registry) = RegistryService::new(publisher);
    let supervisor = TrainingSupervisor::new(training_settings, store.clone());

    tokio::spawn(log_registry_events(listener).instrument(info_span!("registry_events")));
    info!("listening on {}", api_settings.bind_address);

    tokio::select! {
        _ = registry_service.run().instrument(info_span!("registry")) => {
            warn!("shutting down: registry service terminated");
        }
        _ = rest::serve(api_settings, store, supervisor.clone(), registry) => {
            warn!("shutting down: REST server terminated");
        }
        _ = signal::ctrl_c() => {}
    }

    // leave no orphaned Flower processes behind
    supervisor.stop().await;
}

async fn log_registry_events(mut listener: EventListener) {
    while let Some(event) = listener.recv().await {
        info!("{:?}", event);
    }
}
