use anyhow::{bail, Context, Result};
use feedpilot::bus::{Bus, Participant};
use feedpilot::config::Config;
use feedpilot::coordinator::Coordinator;
use feedpilot::generator;
use feedpilot::page::simulated::SimulatedFeed;
use feedpilot::page::PageDriver;
use feedpilot::pipeline::Worker;
use feedpilot::profiles::{HttpProfileResolver, ProfileResolver, StoredNameResolver};
use feedpilot::store::{JsonListStore, StateStore};
use feedpilot::tui::{self, state::AppState, TuiCommand};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;

/// Value following `flag` on the command line, if any.
fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

#[tokio::main]
async fn main() -> Result<()> {
    let log_file = std::fs::File::create("feedpilot.log")?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("feedpilot=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(log_file)
        .with_ansi(false)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config_path = flag_value(&args, "--config").unwrap_or_else(|| "config.toml".to_string());
    let simulate = args.iter().any(|a| a == "--simulate");
    let auto_start = args.iter().any(|a| a == "--auto-start");

    let config = Config::load(Path::new(&config_path))?;

    // Load saved keys from .env (real env vars take precedence)
    Config::load_env_file();

    if !simulate {
        bail!("no live page driver is bundled; run with --simulate to drive the simulated feed");
    }

    let driver: Arc<dyn PageDriver> = Arc::new(
        SimulatedFeed::from_config(&config.simulation).context("failed to build simulated feed")?,
    );
    let generator = generator::from_config(&config.comment_service, Config::comment_api_key())?;
    let store = StateStore::open(&config.storage.state_path)?;
    let lists = JsonListStore::new(&config.storage.lists_path);
    let resolver: Arc<dyn ProfileResolver> = if config.site.resolve_profiles {
        Arc::new(HttpProfileResolver::new())
    } else {
        Arc::new(StoredNameResolver)
    };
    tracing::info!(
        config = %config_path,
        layout = ?config.simulation.layout,
        state = %config.storage.state_path.display(),
        "starting feedpilot"
    );

    // Every participant attaches before anything runs so early requests queue.
    let bus = Bus::new();
    let coordinator_mailbox = bus.attach(Participant::Coordinator);
    let worker_mailbox = bus.attach(Participant::Worker);
    let ui_mailbox = bus.attach(Participant::Ui);

    let coordinator = Coordinator::new(bus.clone(), store, lists, resolver, config.timings.clone());
    tokio::spawn(coordinator.run(coordinator_mailbox));

    let worker = Worker::new(bus.clone(), driver, generator, &config);
    tokio::spawn(worker.serve(worker_mailbox));

    let (state_tx, _state_rx) = watch::channel({
        let mut s = AppState::new();
        s.push_log("INFO", format!("simulated feed, {:?} layout", config.simulation.layout));
        s
    });
    let (cmd_tx, cmd_rx) = mpsc::channel::<TuiCommand>(16);

    tokio::spawn(tui::follow_bus(ui_mailbox, state_tx.clone()));
    tokio::spawn(tui::forward_commands(bus.clone(), config.run.clone(), cmd_rx, state_tx.clone()));

    if auto_start {
        cmd_tx.send(TuiCommand::Start).await?;
    }

    tui::run_tui(state_tx, cmd_tx).await?;

    tracing::debug!("shutting down");
    Ok(())
}
