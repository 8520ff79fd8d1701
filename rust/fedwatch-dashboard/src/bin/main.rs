use std::{
    io::Write,
    path::PathBuf,
    process,
    time::{Duration, Instant},
};

use fedwatch_core::TrainingConfig;
use fedwatch_dashboard::{
    render::Dashboard,
    settings::DashboardSettings,
    Client,
    Poller,
    TrainingApi,
    ViewState,
};
use structopt::StructOpt;
use tokio::{signal, time};
use tracing_futures::Instrument;
use tracing_subscriber::*;

#[macro_use]
extern crate tracing;

#[derive(Debug, StructOpt)]
#[structopt(name = "fedwatch-dashboard")]
struct Opt {
    /// Path of the configuration file
    #[structopt(short, parse(from_os_str))]
    config_path: PathBuf,
    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Follow the training run
    Watch,
    /// Start a training run
    Train {
        #[structopt(long, default_value = "3")]
        rounds: u32,
        #[structopt(long, default_value = "3")]
        clients: u32,
    },
    /// Stop the training run
    Stop,
}

#[tokio::main]
async fn main() {
    let opt = Opt::from_args();

    let settings = DashboardSettings::new(opt.config_path).unwrap_or_else(|err| {
        eprintln!("{}", err);
        process::exit(1);
    });

    let _fmt_subscriber = FmtSubscriber::builder()
        .with_env_filter(settings.log.filter)
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .init();

    let http_client = reqwest::Client::builder()
        .timeout(settings.poll.request_timeout())
        .build()
        .unwrap_or_else(|err| {
            error!("failed to build the HTTP client: {}", err);
            process::exit(1);
        });
    let client = Client::new(http_client, &settings.server.url).unwrap_or_else(|err| {
        error!("{}", err);
        process::exit(1);
    });

    let outcome = match opt.command {
        Command::Watch => {
            let mut view = ViewState::new(settings.poll.completed_visible_for());
            let poll = &settings.poll;
            watch(client, poll.interval(), poll.request_timeout(), &mut view).await;
            return;
        }
        Command::Train { rounds, clients } => {
            let config = TrainingConfig {
                num_rounds: rounds,
                num_clients: clients,
            };
            client.start_training(config).await
        }
        Command::Stop => client.stop_training().await,
    };

    match outcome {
        Ok(ack) => println!("{}", ack.status),
        Err(err) => {
            error!("{}", err);
            process::exit(1);
        }
    }
}

async fn watch<A: TrainingApi>(
    api: A,
    period: Duration,
    request_timeout: Duration,
    view: &mut ViewState,
) {
    let (poller, mut updates) = Poller::new(api, period, request_timeout);
    tokio::spawn(poller.run().instrument(info_span!("poller")));

    // redraws between updates let the completion notice expire on time
    let mut redraw = time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Some(update) => {
                    if !view.apply(update, Instant::now()) {
                        continue;
                    }
                }
                None => break,
            },
            _ = redraw.tick() => {}
            _ = signal::ctrl_c() => break,
        }
        draw(view);
    }
}

fn draw(view: &ViewState) {
    let mut stdout = std::io::stdout();
    // clear the screen and move the cursor home
    let _ = write!(stdout, "\x1b[2J\x1b[H{}", Dashboard::new(view, Instant::now()));
    let _ = stdout.flush();
}
