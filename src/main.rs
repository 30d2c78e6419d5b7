//! RiceBot link - command line entry point
//!
//! Monitors the cooker feeds, sends start commands, or plays the cooker
//! itself for testing the app without hardware.

use clap::{Parser, Subcommand};
use ricebot_link::config::{ClientConfig, ConnectionConfig};
use ricebot_link::cooking::{DeviceSimulator, RiceCooker};
use ricebot_link::observability::{init_default_logging, init_logging, LogFormat};
use ricebot_link::protocol::Payload;
use ricebot_link::service::{ConnectionState, ConnectionStatus, MqttService};
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn, Level};

/// MQTT link to the RiceBot cooker
#[derive(Parser)]
#[command(name = "ricebot")]
#[command(about = "MQTT link to the RiceBot rice cooker")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Broker URL, e.g. ws://broker.hivemq.com:8000/mqtt or mqtt://localhost:1883
    #[arg(long, env = "RICEBOT_BROKER_URL")]
    broker_url: Option<String>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print connection status and cooker feeds until interrupted
    Monitor,
    /// Send a start cooking command
    StartCooking {
        /// Quantity as the app sends it
        #[arg(short, long, default_value = "1 Cup")]
        quantity: String,
        /// Seconds to wait for the broker connection
        #[arg(long, default_value_t = 15)]
        timeout: u64,
    },
    /// Act as the cooker: answer start commands with a simulated cycle
    Simulate {
        /// Seconds between progress updates
        #[arg(long, default_value_t = 2)]
        tick: u64,
    },
    /// Validate configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.verbose {
        0 => init_default_logging(),
        1 => init_logging(Level::DEBUG, LogFormat::Compact, false),
        _ => init_logging(Level::TRACE, LogFormat::Pretty, true),
    };

    info!("Starting ricebot v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config, cli.broker_url.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Monitor => run_monitor(config).await,
        Commands::StartCooking { quantity, timeout } => {
            run_start_cooking(config, &quantity, Duration::from_secs(timeout)).await
        }
        Commands::Simulate { tick } => run_simulator(config, Duration::from_secs(tick)).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Shutdown complete");
}

fn load_configuration(
    config_path: &Option<PathBuf>,
    broker_url: Option<&str>,
) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    let mut config = match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            ClientConfig::load_from_file(path)?
        }
        None => {
            let default_paths = ["ricebot.toml", "config/ricebot.toml"];
            match default_paths
                .iter()
                .map(PathBuf::from)
                .find(|path| path.exists())
            {
                Some(path) => {
                    info!("Loading configuration from: {}", path.display());
                    ClientConfig::load_from_file(&path)?
                }
                None => {
                    info!("No configuration file found, using defaults");
                    ClientConfig::default()
                }
            }
        }
    };

    if let Some(url) = broker_url {
        let endpoint = ConnectionConfig::from_url(url)?;
        config.mqtt = ConnectionConfig {
            client_id: config.mqtt.client_id,
            keep_alive_secs: config.mqtt.keep_alive_secs,
            max_packet_bytes: config.mqtt.max_packet_bytes,
            username_env: config.mqtt.username_env,
            password_env: config.mqtt.password_env,
            ..endpoint
        };
    }

    config.validate()?;
    Ok(config)
}

/// Start the service and log every status change
async fn connect_service(config: ClientConfig) -> Result<MqttService, Box<dyn std::error::Error>> {
    let broker = config.mqtt.broker_url();
    let service = MqttService::with_rumqttc(config);

    let _ = service.on_status_change(|status: &ConnectionStatus| match status {
        ConnectionStatus::Failed(reason) => warn!(reason = %reason, "Connection attempt failed"),
        ConnectionStatus::ReconnectFailed => error!("Giving up on the broker after all retries"),
        other => info!(status = %other, "Connection status"),
    });

    info!(broker = %broker, "Connecting");
    service.connect().await?;
    Ok(service)
}

async fn wait_for_shutdown_signal() -> Result<(), Box<dyn std::error::Error>> {
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully..."),
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
    }
    Ok(())
}

/// Wait for the next `Connected`; errors once the service gave up or stopped
async fn next_connection(
    state: &mut watch::Receiver<ConnectionState>,
) -> Result<(), Box<dyn std::error::Error>> {
    let reached = state
        .wait_for(|s| matches!(s, ConnectionState::Connected | ConnectionState::ReconnectFailed))
        .await
        .map(|s| *s)?;
    match reached {
        ConnectionState::Connected => Ok(()),
        _ => Err("broker unreachable, retries exhausted".into()),
    }
}

async fn subscribe_feeds(cooker: &RiceCooker) {
    cooker
        .subscribe_to_cooking_progress(|progress| {
            println!("progress  {:>3}%  {}", progress.progress, progress.status);
        })
        .await;
    cooker
        .subscribe_to_alerts(|alert| {
            println!("alert     {:?}: {}", alert.kind, alert.message);
        })
        .await;
    cooker
        .subscribe_to_device_status(|status| {
            println!(
                "device    cooking={} progress={}% wifi={} water_flow={} rice_level={} temp={}",
                status.is_cooking,
                status.cooking_progress,
                status.wifi,
                status.water_flow,
                status.rice_level,
                status.temperature
            );
        })
        .await;
    cooker
        .subscribe_to_cooking_status(|payload: &Payload| {
            println!("status    {payload}");
        })
        .await;
}

/// Register the feeds on the first connection; automatic reconnects keep them
async fn monitor_feeds(service: &MqttService) -> Result<(), Box<dyn std::error::Error>> {
    let cooker = RiceCooker::new(service.clone());
    let mut state = service.watch_state();

    loop {
        next_connection(&mut state).await?;
        if service.snapshot().await?.subscriptions.is_empty() {
            subscribe_feeds(&cooker).await;
            info!("Monitoring cooker feeds");
        }
        state.wait_for(|s| *s != ConnectionState::Connected).await?;
    }
}

async fn run_monitor(config: ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    let service = connect_service(config).await?;

    let outcome = tokio::select! {
        result = wait_for_shutdown_signal() => result,
        result = monitor_feeds(&service) => result,
    };

    service.shutdown().await?;
    outcome
}

async fn run_start_cooking(
    config: ClientConfig,
    quantity: &str,
    timeout: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let service = connect_service(config).await?;
    service
        .wait_for_state(ConnectionState::Connected, timeout)
        .await?;

    let cooker = RiceCooker::new(service.clone());
    let sent = cooker.start_cooking(quantity).await;
    service.shutdown().await?;

    if sent {
        println!("Start cooking command sent ({quantity})");
        Ok(())
    } else {
        Err("start cooking command was not sent".into())
    }
}

async fn run_simulator(
    config: ClientConfig,
    tick: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let service = connect_service(config).await?;
    let simulator = DeviceSimulator::new(service.clone()).with_tick(tick);

    let outcome = tokio::select! {
        result = wait_for_shutdown_signal() => result,
        result = serve_commands(&service, &simulator) => result,
    };

    service.shutdown().await?;
    outcome
}

async fn serve_commands(
    service: &MqttService,
    simulator: &DeviceSimulator,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut state = service.watch_state();

    loop {
        next_connection(&mut state).await?;
        if service.snapshot().await?.subscriptions.is_empty() && simulator.listen().await {
            info!("Simulator waiting for start commands");
        }
        state.wait_for(|s| *s != ConnectionState::Connected).await?;
    }
}

fn handle_config_command(
    config: ClientConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Effective configuration:");
        println!("{}", config.to_toml()?);
    }

    info!(broker = %config.mqtt.broker_url(), "Configuration validation complete");
    Ok(())
}
