//! MQTT link built on rumqttc.
//!
//! The event loop runs on its own task. Inbound publishes are forwarded to an
//! mpsc channel; connection state is observable through a watch channel. The
//! loop reconnects on its own after a short pause and re-subscribes once the
//! broker acknowledges the new session.

use std::sync::Arc;

use anyhow::{Context, Result};
use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, Packet, QoS};
use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, error, info, warn};

const REQUEST_CHANNEL_CAPACITY: usize = 32;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct LinkOptions {
    pub client_id: String,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
}

impl LinkOptions {
    pub fn new(client_id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            client_id: client_id.into(),
            host: host.into(),
            port,
            username: None,
            password: None,
            keep_alive: Duration::from_secs(30),
        }
    }

    pub fn with_credentials(mut self, username: Option<String>, password: Option<String>) -> Self {
        self.username = username;
        self.password = password;
        self
    }
}

/// Client id with a short random suffix so restarts don't collide.
pub fn client_id(prefix: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &suffix[..4])
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Cloneable publishing half of an [`MqttLink`].
#[derive(Clone)]
pub struct LinkPublisher {
    client: AsyncClient,
    connected: watch::Receiver<bool>,
}

impl LinkPublisher {
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    pub async fn publish_json<T: Serialize>(&self, topic: &str, qos: QoS, body: &T) -> Result<()> {
        let payload = serde_json::to_vec(body)?;
        self.client
            .publish(topic, qos, false, payload)
            .await
            .with_context(|| format!("failed to publish to {topic}"))?;
        Ok(())
    }
}

/// Hand an inbound publish to the receiver. Returns false when the receiver
/// is gone and the message was dropped.
async fn forward(incoming: &mpsc::Sender<IncomingMessage>, message: IncomingMessage) -> bool {
    match incoming.send(message).await {
        Ok(()) => true,
        Err(mpsc::error::SendError(message)) => {
            debug!("Inbound receiver dropped, discarding message on {}", message.topic);
            false
        }
    }
}

fn ends_session(event: &Event) -> bool {
    matches!(event, Event::Outgoing(Outgoing::Disconnect))
}

pub struct MqttLink {
    client: AsyncClient,
    connected: watch::Receiver<bool>,
    subscriptions: Arc<Mutex<Vec<String>>>,
    event_task: JoinHandle<()>,
}

impl MqttLink {
    /// Start the event loop. Inbound publishes are sent to `incoming`; the
    /// loop ends only after [`Self::disconnect`]. Publishes arriving after
    /// `incoming` is closed are dropped.
    pub fn connect(options: LinkOptions, incoming: mpsc::Sender<IncomingMessage>) -> Self {
        let mut mqtt_options = MqttOptions::new(options.client_id.clone(), options.host.clone(), options.port);
        mqtt_options
            .set_keep_alive(options.keep_alive)
            .set_clean_session(true);
        if let Some(username) = options.username.clone() {
            mqtt_options.set_credentials(username, options.password.clone().unwrap_or_default());
        }

        info!("Connecting to MQTT broker at {}:{} as {}", options.host, options.port, options.client_id);
        let (client, mut eventloop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);
        let (connected_tx, connected) = watch::channel(false);
        let subscriptions: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let task_client = client.clone();
        let task_subscriptions = subscriptions.clone();
        let event_task = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        info!("Connected to MQTT broker: {:?}", ack.code);
                        connected_tx.send_replace(true);
                        for topic in task_subscriptions.lock().await.iter() {
                            if let Err(e) = task_client.try_subscribe(topic.clone(), QoS::AtLeastOnce) {
                                warn!("Failed to restore subscription {}: {:?}", topic, e);
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::SubAck(ack))) => {
                        debug!("Subscription confirmed: {:?}", ack);
                    }
                    Ok(Event::Incoming(Packet::Publish(p))) => {
                        debug!("Received message on {} ({} bytes)", p.topic, p.payload.len());
                        let message = IncomingMessage {
                            topic: p.topic,
                            payload: p.payload.to_vec(),
                        };
                        forward(&incoming, message).await;
                    }
                    Ok(event) if ends_session(&event) => {
                        info!("MQTT disconnect sent");
                        break;
                    }
                    Ok(event) => {
                        debug!("MQTT event: {:?}", event);
                    }
                    Err(e) => {
                        if connected_tx.send_replace(false) {
                            error!("MQTT connection lost: {:?}, reconnecting", e);
                        } else {
                            debug!("MQTT connection attempt failed: {:?}", e);
                        }
                        sleep(RECONNECT_DELAY).await;
                    }
                }
            }
            connected_tx.send_replace(false);
        });

        Self {
            client,
            connected,
            subscriptions,
            event_task,
        }
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Watch handle that flips with the broker session.
    pub fn connection_state(&self) -> watch::Receiver<bool> {
        self.connected.clone()
    }

    pub async fn wait_connected(&self, limit: Duration) -> Result<()> {
        let mut connected = self.connected.clone();
        timeout(limit, connected.wait_for(|c| *c))
            .await
            .context("timed out waiting for MQTT connection")?
            .context("MQTT event loop stopped")?;
        Ok(())
    }

    pub async fn subscribe(&self, topic: &str) -> Result<()> {
        self.subscriptions.lock().await.push(topic.to_string());
        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .with_context(|| format!("failed to subscribe to {topic}"))?;
        info!("Subscribed to {}", topic);
        Ok(())
    }

    pub fn publisher(&self) -> LinkPublisher {
        LinkPublisher {
            client: self.client.clone(),
            connected: self.connected.clone(),
        }
    }

    pub async fn publish_json<T: Serialize>(&self, topic: &str, qos: QoS, body: &T) -> Result<()> {
        self.publisher().publish_json(topic, qos, body).await
    }

    /// Flush queued requests, send DISCONNECT and wait for the event loop to stop.
    pub async fn disconnect(self, limit: Duration) -> Result<()> {
        if let Err(e) = self.client.disconnect().await {
            debug!("MQTT event loop already stopped: {:?}", e);
        }
        let mut task = self.event_task;
        match timeout(limit, &mut task).await {
            Ok(joined) => joined.context("MQTT event loop panicked")?,
            Err(_) => {
                warn!("MQTT event loop did not stop within {:?}, aborting", limit);
                task.abort();
            }
        }
        Ok(())
    }
}
