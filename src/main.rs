use std::io::Write;
use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::Parser;
use tokio::signal;
use tokio::signal::unix::SignalKind;

use heimdall::config;
use heimdall::discovery::upnp::UpnpDiscovery;
use heimdall::discovery::{BridgeDiscovery, DiscoveryEvent};
use heimdall::error::ApiResult;
use heimdall::service;

#[derive(Parser, Debug)]
#[command(about = "Philips Hue bridge discovery and session manager")]
struct Args {
    /// Configuration file
    #[arg(long, default_value = "heimdall.yaml")]
    config: Utf8PathBuf,

    /// Override the bridge state file from the configuration
    #[arg(long)]
    state_file: Option<Utf8PathBuf>,
}

/*
 * Formatter function to output in syslog format. This makes sense when running
 * as a service (where output might go to a log file, or the system journal)
 */
#[allow(clippy::match_same_arms)]
fn syslog_format(
    buf: &mut pretty_env_logger::env_logger::fmt::Formatter,
    record: &log::Record,
) -> std::io::Result<()> {
    writeln!(
        buf,
        "<{}>{}: {}",
        match record.level() {
            log::Level::Error => 3,
            log::Level::Warn => 4,
            log::Level::Info => 6,
            log::Level::Debug => 7,
            log::Level::Trace => 7,
        },
        record.target(),
        record.args()
    )
}

fn init_logging() -> ApiResult<()> {
    /* Try to provide reasonable default filters, when RUST_LOG is not specified */
    const DEFAULT_LOG_FILTERS: &[&str] = &["debug", "reqwest=info", "hyper=info", "h2=info"];

    let log_filters = std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTERS.join(","));

    /* Detect if we need syslog or human-readable formatting */
    if std::env::var("SYSTEMD_EXEC_PID").is_ok_and(|pid| pid == std::process::id().to_string()) {
        Ok(pretty_env_logger::env_logger::builder()
            .format(syslog_format)
            .parse_filters(&log_filters)
            .try_init()?)
    } else {
        Ok(pretty_env_logger::formatted_timed_builder()
            .parse_filters(&log_filters)
            .try_init()?)
    }
}

fn log_event(event: &DiscoveryEvent) {
    match event {
        DiscoveryEvent::BridgeDiscovered { id } => {
            log::info!("Bridge discovered: {id}");
        }
        DiscoveryEvent::DiscoveryStateChanged(state) => {
            log::info!("Discovery state: {state:?}");
        }
        DiscoveryEvent::LightRenamed { unique_id, name } => {
            log::info!("Light {unique_id} renamed to {name:?}");
        }
        DiscoveryEvent::LightDeleted { unique_id } => {
            log::info!("Light {unique_id} deleted");
        }
        DiscoveryEvent::PacketReceived => {}
    }
}

async fn run() -> ApiResult<()> {
    init_logging()?;

    let args = Args::parse();
    let mut config = config::parse(&args.config)?;
    if let Some(state_file) = args.state_file {
        config.discovery.state_file = state_file;
    }
    log::debug!("Configuration loaded successfully");

    let upnp = Arc::new(UpnpDiscovery::new());
    let discovery = BridgeDiscovery::new(&config, upnp)?;
    let handle = discovery.handle();

    let mut events = handle.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let task = service::spawn("bridge-discovery", discovery);

    let mut term = signal::unix::signal(SignalKind::terminate())?;
    tokio::select! {
        _ = signal::ctrl_c() => log::warn!("Ctrl-C pressed, exiting.."),
        _ = term.recv() => log::warn!("SIGTERM received, exiting.."),
        _ = task => log::error!("Discovery service stopped unexpectedly"),
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        log::error!("Heimdall error: {err}");
        log::error!("Fatal error encountered, cannot continue.");
    }
}
