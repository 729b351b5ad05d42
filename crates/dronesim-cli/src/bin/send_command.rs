//! Remote control for a running dronesim-agent over MQTT.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use dronesim_cli::{new_command_id, RemoteCommand};
use dronesim_core::Acknowledgement;
use dronesim_sdk::{client_id, IncomingMessage, LinkOptions, MqttLink, QoS, Topics};
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Send one command to a simulated drone
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[arg(long, default_value = "localhost")]
    mqtt_host: String,

    #[arg(long, default_value_t = 1883)]
    mqtt_port: u16,

    #[arg(long)]
    username: Option<String>,

    #[arg(long)]
    password: Option<String>,

    /// Target drone id
    #[arg(long)]
    drone_id: String,

    /// Seconds to wait for the acknowledgement; 0 sends without waiting
    #[arg(long, default_value_t = 10)]
    wait: u64,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: RemoteCommand,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let level = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("dronesim_cli={level}").parse()?)
                .add_directive(format!("dronesim_sdk={level}").parse()?),
        )
        .init();

    let topics = Topics::for_drone(&args.drone_id);
    let envelope = args.command.to_envelope(new_command_id());

    let (incoming_tx, mut incoming_rx) = mpsc::channel(16);
    let options = LinkOptions::new(client_id("sim-remote"), &args.mqtt_host, args.mqtt_port)
        .with_credentials(args.username, args.password);
    let link = MqttLink::connect(options, incoming_tx);
    link.wait_connected(Duration::from_secs(5))
        .await
        .with_context(|| format!("could not reach broker {}:{}", args.mqtt_host, args.mqtt_port))?;

    let wait = Duration::from_secs(args.wait);
    if !wait.is_zero() {
        link.subscribe(&topics.responses).await?;
    }

    println!("Sending {} to {}", envelope.command_type, topics.commands);
    println!("{}", serde_json::to_string(&envelope)?);
    link.publish_json(&topics.commands, QoS::AtLeastOnce, &envelope)
        .await?;

    let outcome = if wait.is_zero() {
        Ok(())
    } else {
        match wait_for_ack(&mut incoming_rx, &topics.responses, &envelope.command_id, wait).await {
            Some(ack) => {
                println!("{:?}: {}", ack.status, ack.message);
                if ack.is_success() {
                    Ok(())
                } else {
                    Err(anyhow::anyhow!("command rejected"))
                }
            }
            None => Err(anyhow::anyhow!("no acknowledgement within {:?}", wait)),
        }
    };

    link.disconnect(Duration::from_secs(2)).await?;
    outcome
}

/// First acknowledgement on `topic` that answers `command_id`.
async fn wait_for_ack(
    incoming: &mut mpsc::Receiver<IncomingMessage>,
    topic: &str,
    command_id: &str,
    limit: Duration,
) -> Option<Acknowledgement> {
    let deadline = Instant::now() + limit;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let message = timeout(remaining, incoming.recv()).await.ok()??;
        if message.topic != topic {
            continue;
        }
        match serde_json::from_slice::<Acknowledgement>(&message.payload) {
            Ok(ack) if ack.command_id == command_id => return Some(ack),
            Ok(ack) => tracing::debug!("Ignoring acknowledgement for {}", ack.command_id),
            Err(err) => tracing::debug!("Ignoring unparseable response: {}", err),
        }
    }
}

