//! `parley`: signs in with the configured account, prints session events and
//! takes slash commands on stdin.

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use parley_core::{
    config,
    error::EventBusError,
    event::{BroadcastEventBus, EventBus},
};
use parley_session::{Collaborators, SessionManager};
use parley_xmpp::WebSocketTransport;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    select,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod output;

use commands::Action;

/// Terminal client for an XMPP account
#[derive(Parser)]
#[command(name = "parley")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file to use instead of the platform default
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter, takes precedence over RUST_LOG and the configured level
    #[arg(long)]
    log_level: Option<String>,

    /// Print events as JSON lines
    #[arg(long)]
    json: bool,

    /// Start without connecting
    #[arg(long)]
    offline: bool,
}

fn init_tracing(cli_level: Option<&str>, configured: &str) {
    let filter = match cli_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(configured)),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => config::load_config_from(path.clone()),
        None => config::load_config(),
    }
    .with_context(|| match &cli.config {
        Some(path) => format!("failed to load {}", path.display()),
        None => format!("failed to load {}", config::config_path().display()),
    })?;

    init_tracing(cli.log_level.as_deref(), &config.logging.level);

    let event_bus: Arc<dyn EventBus> =
        Arc::new(BroadcastEventBus::new(config.event_bus.channel_capacity));
    let mut events = event_bus
        .subscribe("**")
        .context("failed to subscribe to events")?;

    let (handle, session) = SessionManager::<WebSocketTransport>::spawn(
        config,
        event_bus,
        Collaborators::default(),
    );

    if !cli.offline {
        if let Err(error) = handle.connect().await {
            error!(%error, "connect failed, use /connect to retry");
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(error) => {
                        warn!(%error, "stdin read failed");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                let action = match commands::parse(&line) {
                    Ok(action) => action,
                    Err(error) => {
                        println!("{error}");
                        continue;
                    }
                };
                if action == Action::Quit {
                    break;
                }
                match commands::run(&handle, action).await {
                    Ok(Some(reply)) => println!("{reply}"),
                    Ok(None) => {}
                    Err(error) => println!("{error}"),
                }
            }
            event = events.recv() => match event {
                Ok(event) if cli.json => match serde_json::to_string(&event) {
                    Ok(json) => println!("{json}"),
                    Err(error) => warn!(%error, "event not serialisable"),
                },
                Ok(event) => println!("{}", output::describe(&event)),
                Err(EventBusError::Lagged(count)) => {
                    warn!("event subscription lagged, missed {count} events");
                }
                Err(EventBusError::ChannelClosed) => break,
                Err(error) => error!(%error, "event bus error"),
            }
        }
    }

    info!("shutting down");
    if let Err(error) = handle.disconnect().await {
        warn!(%error, "disconnect failed");
    }
    drop(handle);
    session.await.context("session task failed")?;
    Ok(())
}
