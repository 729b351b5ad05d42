//! dronesim-agent - one synthetic UAV on the fleet backend

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dronesim_agent::config::Config;
use dronesim_agent::loops::persist_loop::run_persist_loop;
use dronesim_agent::persistence::StateStore;
use dronesim_agent::registration::{self, Registration};
use dronesim_agent::transport::{run_command_bridge, run_telemetry_publisher};
use dronesim_agent::vehicle::Vehicle;
use dronesim_core::{DisarmPolicy, FarewellMessage, FlightStateMachine};
use dronesim_sdk::{client_id, BackendClient, LinkOptions, MqttLink, QoS, Topics};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const CHANNEL_CAPACITY: usize = 32;

/// Run a simulated drone against the fleet backend
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Backend API base URL
    #[arg(long)]
    backend_url: Option<String>,

    /// MQTT broker host (overridden by registration credentials)
    #[arg(long)]
    mqtt_host: Option<String>,

    #[arg(long)]
    mqtt_port: Option<u16>,

    /// Serial number to register with
    #[arg(long)]
    serial: Option<String>,

    #[arg(long)]
    model: Option<String>,

    /// Skip registration and run as an existing drone
    #[arg(long)]
    drone_id: Option<String>,

    /// Seconds between simulation ticks and telemetry samples
    #[arg(long)]
    telemetry_interval: Option<u64>,

    /// Directory holding drone state files
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// on-touchdown or manual
    #[arg(long)]
    disarm_policy: Option<DisarmPolicy>,

    /// JSON file overriding flight constants
    #[arg(long)]
    profile: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn apply(self, config: &mut Config) {
        if let Some(url) = self.backend_url {
            config.backend_url = url;
        }
        if let Some(host) = self.mqtt_host {
            config.mqtt_host = host;
        }
        if let Some(port) = self.mqtt_port {
            config.mqtt_port = port;
        }
        if let Some(model) = self.model {
            config.model = model;
        }
        if let Some(secs) = self.telemetry_interval {
            config.telemetry_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(dir) = self.state_dir {
            config.state_dir = dir;
        }
        if let Some(policy) = self.disarm_policy {
            config.disarm_policy = policy;
        }
        config.serial_number = self.serial.or(config.serial_number.take());
        config.drone_id = self.drone_id.or(config.drone_id.take());
        config.profile_path = self.profile.or(config.profile_path.take());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("dronesim_agent={level}").parse()?)
                .add_directive(format!("dronesim_core={level}").parse()?)
                .add_directive(format!("dronesim_sdk={level}").parse()?),
        )
        .init();

    let mut config = Config::from_env();
    args.apply(&mut config);
    tracing::info!("Starting dronesim-agent (backend {})", config.backend_url);

    // Every receiver exists before the first await so no task misses the signal
    let (shutdown_tx, mut main_shutdown) = broadcast::channel::<()>(4);
    let vehicle_shutdown = shutdown_tx.subscribe();
    let bridge_shutdown = shutdown_tx.subscribe();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", err);
            return;
        }
        tracing::info!("Shutdown requested");
        shutdown_tx.send(()).ok();
    });

    let backend = BackendClient::new(config.backend_url.clone())?;
    let registration = tokio::select! {
        _ = main_shutdown.recv() => {
            tracing::info!("Shutdown before registration completed");
            return Ok(());
        }
        result = identify(&backend, &config) => result?,
    };

    let credentials = registration.credentials.clone().unwrap_or_default();
    let topics = Topics::for_drone(&registration.drone_id).with_overrides(
        credentials.mqtt_topic_telemetry.clone(),
        credentials.mqtt_topic_commands.clone(),
    );
    let (host, port) = credentials.broker_address(&config.mqtt_host, config.mqtt_port);

    let profile = config.load_profile()?;
    let store = StateStore::new(config.state_dir.clone());
    let state = store.restore_or_start(&registration.drone_id).await;
    let machine = FlightStateMachine::new(state, profile, config.disarm_policy);

    let (incoming_tx, incoming_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let options = LinkOptions::new(
        client_id(&format!("sim-drone-{}", registration.serial_number)),
        host,
        port,
    )
    .with_credentials(credentials.mqtt_username, credentials.mqtt_password);
    let link = MqttLink::connect(options, incoming_tx);
    link.wait_connected(CONNECT_TIMEOUT)
        .await
        .context("could not reach the MQTT broker")?;
    link.subscribe(&topics.commands).await?;

    let (telemetry_tx, telemetry_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (snapshot_tx, snapshot_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let persist_task = tokio::spawn(run_persist_loop(store, config.persist_interval, snapshot_rx));

    let vehicle = Vehicle::new(
        registration.drone_id.clone(),
        machine,
        config.telemetry_interval,
        telemetry_tx,
        snapshot_tx,
    );
    let (handle, mut vehicle_task) = vehicle.spawn(vehicle_shutdown);
    let telemetry_task = tokio::spawn(run_telemetry_publisher(
        link.publisher(),
        topics.telemetry.clone(),
        telemetry_rx,
    ));
    let bridge_task = tokio::spawn(run_command_bridge(
        handle,
        link.publisher(),
        topics.commands.clone(),
        topics.responses.clone(),
        incoming_rx,
        bridge_shutdown,
    ));

    tracing::info!(
        "Drone {} online: telemetry on {}, commands on {}",
        registration.drone_id,
        topics.telemetry,
        topics.commands
    );
    main_shutdown.recv().await.ok();

    let grace = config.shutdown_grace;
    let final_state = match timeout(grace, &mut vehicle_task).await {
        Ok(Ok(state)) => Some(state),
        Ok(Err(err)) => {
            tracing::error!("Vehicle task failed: {}", err);
            None
        }
        Err(_) => {
            tracing::warn!("Vehicle did not stop within {:?}, aborting", grace);
            vehicle_task.abort();
            None
        }
    };
    if timeout(grace, bridge_task).await.is_err() {
        tracing::warn!("Command bridge did not stop within {:?}", grace);
    }
    if timeout(grace, persist_task).await.is_err() {
        tracing::warn!("State flush did not finish within {:?}", grace);
    }
    if timeout(grace, telemetry_task).await.is_err() {
        tracing::warn!("Telemetry publisher did not stop within {:?}", grace);
    }

    if let Some(state) = final_state {
        let farewell = FarewellMessage::new(
            &registration.drone_id,
            &registration.serial_number,
            state.battery,
            Utc::now(),
        );
        match timeout(grace, link.publish_json(&topics.telemetry, QoS::AtLeastOnce, &farewell)).await {
            Ok(Ok(())) => tracing::info!("Farewell published"),
            Ok(Err(err)) => tracing::warn!("Failed to publish farewell: {:#}", err),
            Err(_) => tracing::warn!("Farewell publish timed out"),
        }
    }
    link.disconnect(grace).await?;

    tracing::info!("dronesim-agent stopped");
    Ok(())
}

async fn identify(backend: &BackendClient, config: &Config) -> Result<Registration> {
    if let Some(drone_id) = &config.drone_id {
        return Ok(registration::existing(backend, drone_id).await);
    }
    let serial = registration::serial_number(config.serial_number.clone());
    registration::register_and_wait(
        backend,
        &serial,
        &config.model,
        config.poll_interval,
        config.max_polls,
    )
    .await
}
