//! UPS power-status relay - main entry point

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use ups_relay::config::RelayConfig;
use ups_relay::observability::init_default_logging;
use ups_relay::queue::{ReadingQueue, SqliteQueue};
use ups_relay::relay::{Orchestrator, RelayPublisher};
use ups_relay::shutdown::{self, ShutdownTrigger};
use ups_relay::transport::mqtt::MqttClient;
use ups_relay::transport::{Reachability, ReachabilityMonitor};

/// Store-and-forward relay for UPS power readings
#[derive(Parser)]
#[command(name = "ups-relay")]
#[command(about = "Relay queued UPS power-status readings to an MQTT broker")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay until interrupted or a fatal condition
    Run,
    /// Validate configuration
    Config {
        /// Show the resolved configuration
        #[arg(long)]
        show: bool,
    },
    /// Inspect the pending-reading queue
    Queue {
        /// Number of oldest pending readings to list
        #[arg(long, value_name = "N", default_value_t = 10)]
        list: usize,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging(cli.verbose > 0);

    info!("Starting ups-relay v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => {
            let code = run_relay(config).await;
            info!(exit_code = code, "Application shutdown complete");
            process::exit(code);
        }
        Commands::Config { show } => handle_config_command(&config, show),
        Commands::Queue { list } => handle_queue_command(&config, list),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<RelayConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(RelayConfig::load_from_file(path)?)
        }
        None => {
            let (path, config) = RelayConfig::load_from_default_paths()?;
            info!("Loading configuration from: {}", path.display());
            Ok(config)
        }
    }
}

fn open_queue(config: &RelayConfig) -> Result<SqliteQueue, Box<dyn std::error::Error>> {
    let busy_timeout = Duration::from_millis(config.queue.busy_timeout_ms);
    Ok(SqliteQueue::open(&config.queue.path, busy_timeout)?)
}

/// Wire the relay together and run it. Returns the process exit code.
async fn run_relay(config: RelayConfig) -> i32 {
    info!(
        device_id = %config.device.id,
        location = %config.device.location,
        "Relay starting"
    );

    let queue = match open_queue(&config) {
        Ok(queue) => Arc::new(queue),
        Err(e) => {
            error!(path = %config.queue.path.display(), "Failed to open reading queue: {}", e);
            return 1;
        }
    };

    let (host, port) = match config.probe_target() {
        Ok(target) => target,
        Err(e) => {
            error!("Invalid reachability target: {}", e);
            return 1;
        }
    };
    let reachability: Arc<dyn Reachability> =
        Arc::new(ReachabilityMonitor::new(host, port, config.probe_timeout()));

    let (trigger, shutdown) = shutdown::channel();

    let transport = match MqttClient::new(&config, reachability.clone(), shutdown.clone()) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Failed to create MQTT client: {}", e);
            return 1;
        }
    };

    let topic = config.topic();
    let publisher = RelayPublisher::new(
        queue,
        transport.clone(),
        reachability.clone(),
        config.device.id.clone(),
        config.device.location.clone(),
        topic,
    );

    let orchestrator = Orchestrator::new(
        publisher,
        transport,
        reachability,
        config.cycle_interval(),
        config.relay.max_wait_cycles,
        shutdown,
    );

    tokio::spawn(wait_for_signal(trigger));

    let reason = orchestrator.run().await;
    info!(?reason, "Relay stopped");
    reason.exit_code()
}

/// Raise the shutdown flag on SIGINT or SIGTERM
async fn wait_for_signal(trigger: ShutdownTrigger) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
                }
                trigger.trigger();
                return;
            }
            _ => warn!("Failed to install unix signal handlers, falling back to Ctrl-C"),
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl-C, shutting down gracefully..."),
        Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
    }
    trigger.trigger();
}

fn handle_config_command(config: &RelayConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(config)?);

        let credentials = config.mqtt.credentials()?;
        match credentials {
            Some(credentials) => println!(
                "# credentials: username '{}' resolved, password {}",
                credentials.username,
                if credentials.password.is_empty() { "empty" } else { "set" }
            ),
            None => println!("# credentials: anonymous session"),
        }
        println!("# publish topic: {}", config.topic());
    }

    info!("Configuration validation complete");
    Ok(())
}

fn handle_queue_command(config: &RelayConfig, list: usize) -> Result<(), Box<dyn std::error::Error>> {
    let queue = open_queue(config)?;
    let pending = queue.pending_count()?;

    println!("Pending readings: {pending}");
    for reading in queue.peek(list)? {
        println!(
            "  id={} timestamp={} ac={}V ({}) ups={}V ({})",
            reading.id,
            reading.timestamp,
            reading.ac_voltage,
            reading.ac_status.code(),
            reading.ups_voltage,
            reading.ups_status.code(),
        );
    }
    Ok(())
}
