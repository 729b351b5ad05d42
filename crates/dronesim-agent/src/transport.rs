//! Glue between the MQTT link and the vehicle actor.

use dronesim_core::TelemetryEnvelope;
use dronesim_sdk::{IncomingMessage, LinkPublisher, QoS};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::vehicle::VehicleHandle;

/// Reason recorded on the vehicle when the broker link goes away for good.
pub const LINK_LOST_REASON: &str = "MQTT event loop terminated";

/// Forward command payloads to the vehicle and publish each acknowledgement.
///
/// Ends on shutdown. If the link's inbound channel closes first the link is
/// gone for good and the vehicle is faulted.
pub async fn run_command_bridge(
    vehicle: VehicleHandle,
    publisher: LinkPublisher,
    commands_topic: String,
    responses_topic: String,
    mut incoming: mpsc::Receiver<IncomingMessage>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                debug!("Command bridge stopping");
                break;
            }
            maybe_message = incoming.recv() => {
                let Some(message) = maybe_message else {
                    warn!("MQTT inbound channel closed");
                    if vehicle.fault(LINK_LOST_REASON).await.is_err() {
                        debug!("Vehicle already stopped");
                    }
                    break;
                };
                if message.topic != commands_topic {
                    debug!("Ignoring message on {}", message.topic);
                    continue;
                }

                let ack = match vehicle.command_raw(message.payload).await {
                    Ok(ack) => ack,
                    Err(err) => {
                        warn!("Command dropped: {}", err);
                        break;
                    }
                };
                info!(
                    command_id = %ack.command_id,
                    status = ?ack.status,
                    "{}",
                    ack.message
                );
                if let Err(err) = publisher
                    .publish_json(&responses_topic, QoS::AtLeastOnce, &ack)
                    .await
                {
                    warn!("Failed to publish acknowledgement: {:#}", err);
                }
            }
        }
    }
}

/// Publish telemetry samples until the vehicle drops its sender.
pub async fn run_telemetry_publisher(
    publisher: LinkPublisher,
    topic: String,
    mut samples: mpsc::Receiver<TelemetryEnvelope>,
) {
    while let Some(sample) = samples.recv().await {
        if !publisher.is_connected() {
            debug!("Broker offline, telemetry sample skipped");
            continue;
        }
        match publisher.publish_json(&topic, QoS::AtMostOnce, &sample).await {
            Ok(()) => debug!(
                "Telemetry: {} at ({:.6}, {:.6}, {:.1} m), battery {:.1}%",
                sample.status, sample.latitude, sample.longitude, sample.altitude, sample.battery_level
            ),
            Err(err) => warn!("Failed to publish telemetry: {:#}", err),
        }
    }
    debug!("Telemetry channel closed");
}
