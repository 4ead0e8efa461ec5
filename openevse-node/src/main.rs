//! OpenEVSE Node - CLI for the OpenEVSE status bridge
//!
//! Runs one charger accessory against an in-memory host and logs every value
//! pushed to it.
//!
//! # Usage
//!
//! ```bash
//! # Poll over HTTP
//! openevse-node --name "Garage Charger" --host 192.168.1.50
//!
//! # MQTT only, shown as an outlet
//! openevse-node --mqtt-host broker.local --mqtt-topic garage/evse --profile outlet
//!
//! # Accessory config file, with an override
//! openevse-node --config openevse.json --poll-interval 30
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use openevse_bridge::{
    Accessory, BridgeConfig, Characteristic, HttpConfig, MemoryBridge, MqttConfig, Profile,
};
use tokio::sync::watch;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// OpenEVSE charger status bridge
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Accessory config file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Accessory display name
    #[arg(short, long)]
    name: Option<String>,

    /// Charger HTTP host (enables polling)
    #[arg(long)]
    host: Option<String>,

    /// Charger HTTP port
    #[arg(long)]
    port: Option<u16>,

    /// MQTT broker host (enables the subscriber)
    #[arg(long)]
    mqtt_host: Option<String>,

    /// MQTT broker port
    #[arg(long)]
    mqtt_port: Option<u16>,

    /// MQTT base topic
    #[arg(long)]
    mqtt_topic: Option<String>,

    /// Presentation profile (switch, battery, outlet)
    #[arg(long)]
    profile: Option<String>,

    /// HTTP poll interval in seconds
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Setup logging
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = build_config(&args)?;

    let http = config
        .http
        .as_ref()
        .map(|h| h.status_url())
        .unwrap_or_else(|| "-".into());
    let mqtt = config
        .mqtt
        .as_ref()
        .map(|m| format!("{}:{} ({})", m.host, m.port, m.topic_base()))
        .unwrap_or_else(|| "-".into());

    // Print banner
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║             OpenEVSE Node - Charger Status Bridge            ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Name:     {:<50} ║", truncate(&config.name, 50));
    println!("║  Profile:  {:<50} ║", config.profile);
    println!("║  HTTP:     {:<50} ║", truncate(&http, 50));
    println!("║  MQTT:     {:<50} ║", truncate(&mqtt, 50));
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    let bridge = Arc::new(MemoryBridge::new());
    let accessory = Accessory::new(config, bridge.clone())?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl-C, shutting down"),
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
        let _ = shutdown_tx.send(true);
    });

    let state = accessory.run(shutdown_rx).await?;

    println!();
    println!(
        "Final state: {} | {} W | {} A | SoC {}%",
        state.connection_state, state.power_watts, state.current_amps, state.state_of_charge
    );
    for (service, characteristic, value) in bridge.snapshot() {
        let unit = match characteristic {
            Characteristic::Telemetry(channel) => channel.unit(),
            _ => "",
        };
        println!(
            "  {:<24} {:<26} {} {}",
            service,
            characteristic.host_name(),
            value,
            unit
        );
    }

    Ok(())
}

/// Config file (if any) with command-line overrides applied
fn build_config(args: &Args) -> Result<BridgeConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => BridgeConfig::from_file(path)?,
        None => BridgeConfig::new("OpenEVSE"),
    };

    if let Some(name) = &args.name {
        config.name = name.clone();
    }

    if let Some(profile) = &args.profile {
        config = config.with_profile(profile.parse::<Profile>()?);
    }

    if let Some(host) = &args.host {
        let http = config.http.get_or_insert_with(|| HttpConfig::new(host.as_str()));
        http.host = host.clone();
    }

    if let Some(http) = config.http.as_mut() {
        if let Some(port) = args.port {
            http.port = port;
        }
        if let Some(secs) = args.poll_interval {
            http.poll_interval = Duration::from_secs(secs);
        }
    }

    if let Some(host) = &args.mqtt_host {
        let mqtt = config.mqtt.get_or_insert_with(|| MqttConfig::new(host.as_str()));
        mqtt.host = host.clone();
    }

    if let Some(mqtt) = config.mqtt.as_mut() {
        if let Some(port) = args.mqtt_port {
            mqtt.port = port;
        }
        if let Some(topic) = &args.mqtt_topic {
            mqtt.base_topic = topic.clone();
        }
    }

    config.validate()?;
    Ok(config)
}

/// Truncate string with ellipsis
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}
