//! ABR Headless - engine host without a 3D front end
//!
//! Runs the engine loop against a recording render host. States come from
//! a file, a locator resolved by the state loader, or the state server's
//! notifier socket; every applied state is rendered and summarized.

use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use abr_core::runtime::spawn_notifier_listener;
use abr_core::state::{FileStateLoader, HttpStateLoader, StateLoader};
use abr_core::{
    ApplyOutcome, Engine, EngineConfig, HeadlessHost, OutboundSender, RenderReport, Runtime, StateRequest,
};
use clap::Parser;
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "abr-headless")]
#[command(about = "Apply ABR states to a headless engine", long_about = None)]
struct Cli {
    /// State to apply at startup: a file path, or a locator for the state loader
    #[arg(short, long)]
    state: Option<String>,

    /// State server base URL (overrides the config file)
    #[arg(long)]
    server: Option<String>,

    /// Notifier socket of the state server, e.g. 127.0.0.1:1900
    #[arg(long)]
    notifier: Option<String>,

    /// Media root holding datasets/ and visassets/
    #[arg(long)]
    media_root: Option<PathBuf>,

    /// Config file used instead of the standard locations
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Apply the first state, render it, print a summary and exit
    #[arg(long)]
    once: bool,

    /// Seconds to wait for the first state with --once
    #[arg(long, default_value = "30")]
    timeout: u64,
}

fn load_config(cli: &Cli) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load_layers(std::slice::from_ref(path))?,
        None => EngineConfig::load_standard(std::env::current_dir().ok().as_deref())?,
    };
    if let Some(root) = &cli.media_root {
        config.media_root = root.clone();
    }
    if let Some(server) = &cli.server {
        config.server_url = Some(server.clone());
    }
    Ok(config)
}

/// Loader the prefetch worker resolves locators with
fn state_loader(config: &EngineConfig) -> Result<Arc<dyn StateLoader>, Box<dyn std::error::Error>> {
    Ok(match &config.server_url {
        Some(url) => Arc::new(HttpStateLoader::new(url.clone(), config.http_timeout())?),
        None => Arc::new(FileStateLoader::new(config.media_root.join("states"))),
    })
}

fn initial_request(cli: &Cli, config: &EngineConfig) -> Result<Option<StateRequest>, std::io::Error> {
    match &cli.state {
        Some(state) if Path::new(state).is_file() => Ok(Some(StateRequest::Text(std::fs::read_to_string(state)?))),
        Some(locator) => Ok(Some(StateRequest::Locator(locator.clone()))),
        None if config.server_url.is_some() => Ok(Some(StateRequest::Locator(String::new()))),
        None => Ok(None),
    }
}

fn summarize(outcome: &ApplyOutcome, report: &RenderReport) {
    tracing::info!(
        "Applied state: {} processed, {} skipped, {} removed{}; rendered {}, failed {}",
        outcome.processed.len(),
        outcome.skipped.len(),
        outcome.removed.len(),
        if outcome.cleared { " (cleared)" } else { "" },
        report.rendered.len(),
        report.failed.len(),
    );
    for (uuid, reason) in outcome.failed.iter().chain(report.failed.iter()) {
        tracing::warn!("Impression {} failed: {}", uuid, reason);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let loader = state_loader(&config)?;
    let first = initial_request(&cli, &config)?;
    let engine = Engine::new(config, Box::new(HeadlessHost::new()));
    let runtime = Runtime::start(engine, Some(loader));

    let mut outbound = None;
    if let Some(addr) = &cli.notifier {
        let stream = TcpStream::connect(addr)?;
        tracing::info!("Connected to notifier at {}", addr);
        spawn_notifier_listener(stream.try_clone()?, runtime.handle(), String::new())?;
        outbound = Some(OutboundSender::spawn(stream)?.0);
    }

    match first {
        Some(request) => {
            runtime.submit(request);
        }
        None if cli.once => return Err("--once needs --state or --server".into()),
        None => tracing::info!("Waiting for state notifications"),
    }

    let poll = if cli.once { Duration::from_secs(cli.timeout) } else { Duration::from_millis(500) };
    let handle = runtime.handle();
    while !handle.is_cancelled() {
        let Some(result) = runtime.wait_and_apply(poll) else {
            if cli.once {
                return Err("Timed out waiting for the state".into());
            }
            continue;
        };
        match result {
            Ok((outcome, report)) => {
                let report = report.unwrap_or_else(|| runtime.render());
                summarize(&outcome, &report);
                if let Some(outbound) = &outbound {
                    outbound.send(
                        "renderReport",
                        json!({ "rendered": report.rendered.len(), "failed": report.failed.len() }),
                    );
                }
            }
            Err(e) if cli.once => return Err(e.into()),
            Err(e) => tracing::error!("State not applied: {}", e),
        }
        if cli.once {
            break;
        }
    }

    runtime.shutdown();
    Ok(())
}
