use anyhow::Context;
use clap::Parser;
use devsim::{load_config, logging, DeviceSimulator, SimulationEvent};
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the simulation configuration file (JSON or YAML)
    #[arg(short, long, value_name = "FILE", env = "DEVSIM_CONFIG")]
    config: PathBuf,

    /// Log level or filter, e.g. `info` or `info,devsim=debug`
    #[arg(long, default_value = "info", env = "DEVSIM_LOG_LEVEL")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    logging::init(&args.log_level, args.json_logs)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Starting device simulator");
    let config = load_config(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;

    let simulator = DeviceSimulator::with_default_transports()?;
    let mut events = simulator.start(config);

    let mut fatal = None;
    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);
    let mut stopping = false;

    loop {
        tokio::select! {
            _ = &mut shutdown, if !stopping => {
                info!("Shutdown signal received");
                stopping = true;
                simulator.stop();
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                if let SimulationEvent::Error { error, .. } = &event {
                    if error.is_fatal() {
                        fatal = Some(error.clone());
                    }
                }
                let is_end = matches!(event, SimulationEvent::End);
                log_event(&event);
                if is_end {
                    break;
                }
            }
        }
    }

    match fatal {
        Some(e) => Err(anyhow::anyhow!("Simulation ended with error: {}", e)),
        None => {
            info!("Simulation finished");
            Ok(())
        },
    }
}

fn log_event(event: &SimulationEvent) {
    match event {
        SimulationEvent::TokenRequest { request } => info!("Token requested from {}", request.url()),
        SimulationEvent::TokenResponse { expires_at } => info!("Token received, expires at {}", expires_at),
        SimulationEvent::TokenRequestScheduled { scheduled_at } => {
            info!("Token renewal scheduled at {}", scheduled_at)
        },
        SimulationEvent::UpdateScheduled { schedule, element, attributes } => {
            info!("Update scheduled '{}' for {:?} ({} attributes)", schedule, element, attributes.len())
        },
        SimulationEvent::UpdateRequest { request } => match serde_json::to_string(request) {
            Ok(json) => debug!("Update request: {}", json),
            Err(_) => debug!("Update request to {}", request.url()),
        },
        SimulationEvent::UpdateResponse { request, response } => {
            info!("Update sent to {}: {}", request.url(), response)
        },
        SimulationEvent::Error { error, request, response } => match request {
            Some(request) => error!(
                "{} ({}) on {}: {}",
                error.name(),
                error,
                request.url(),
                response.as_ref().map(ToString::to_string).unwrap_or_default()
            ),
            None => error!("{}: {}", error.name(), error),
        },
        SimulationEvent::Stop => warn!("Simulation stopped"),
        SimulationEvent::End => info!("Simulation ended"),
    }
}

/// Wait for Ctrl+C, or SIGTERM on Unix
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            },
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            },
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
