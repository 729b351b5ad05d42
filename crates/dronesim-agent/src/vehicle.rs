//! Vehicle actor.
//!
//! One task owns the [`FlightStateMachine`] and is the only place it is
//! mutated. It selects over shutdown, the simulation clock and the request
//! channel, so commands and ticks never interleave. Telemetry and persistence
//! snapshots leave the actor as copies over channels; the actor does no I/O.

use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use dronesim_core::{
    Acknowledgement, CommandEnvelope, Dispatcher, FlightStateMachine, PersistedState,
    TelemetryEnvelope, VehicleState,
};

const REQUEST_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug)]
pub enum VehicleRequest {
    /// Undecoded command payload straight from the transport
    Command {
        payload: Vec<u8>,
        reply: oneshot::Sender<Acknowledgement>,
    },
    Envelope {
        envelope: CommandEnvelope,
        reply: oneshot::Sender<Acknowledgement>,
    },
    Snapshot {
        reply: oneshot::Sender<VehicleState>,
    },
    Fault {
        reason: String,
    },
    Reset {
        reply: oneshot::Sender<bool>,
    },
}

#[derive(Debug, Error)]
pub enum VehicleError {
    #[error("vehicle actor has stopped")]
    Stopped,
}

/// Cheap, cloneable front end to the vehicle actor.
#[derive(Debug, Clone)]
pub struct VehicleHandle {
    tx: mpsc::Sender<VehicleRequest>,
}

impl VehicleHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> VehicleRequest,
    ) -> Result<T, VehicleError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| VehicleError::Stopped)?;
        rx.await.map_err(|_| VehicleError::Stopped)
    }

    pub async fn command_raw(&self, payload: Vec<u8>) -> Result<Acknowledgement, VehicleError> {
        self.request(|reply| VehicleRequest::Command { payload, reply })
            .await
    }

    pub async fn command(&self, envelope: CommandEnvelope) -> Result<Acknowledgement, VehicleError> {
        self.request(|reply| VehicleRequest::Envelope { envelope, reply })
            .await
    }

    pub async fn snapshot(&self) -> Result<VehicleState, VehicleError> {
        self.request(|reply| VehicleRequest::Snapshot { reply }).await
    }

    pub async fn fault(&self, reason: impl Into<String>) -> Result<(), VehicleError> {
        self.tx
            .send(VehicleRequest::Fault {
                reason: reason.into(),
            })
            .await
            .map_err(|_| VehicleError::Stopped)
    }

    pub async fn reset(&self) -> Result<bool, VehicleError> {
        self.request(|reply| VehicleRequest::Reset { reply }).await
    }
}

pub struct Vehicle {
    drone_id: String,
    machine: FlightStateMachine,
    dispatcher: Dispatcher,
    tick_interval: Duration,
    telemetry: mpsc::Sender<TelemetryEnvelope>,
    snapshots: mpsc::Sender<PersistedState>,
}

impl Vehicle {
    pub fn new(
        drone_id: impl Into<String>,
        machine: FlightStateMachine,
        tick_interval: Duration,
        telemetry: mpsc::Sender<TelemetryEnvelope>,
        snapshots: mpsc::Sender<PersistedState>,
    ) -> Self {
        let drone_id = drone_id.into();
        Self {
            dispatcher: Dispatcher::new(drone_id.clone()),
            drone_id,
            machine,
            tick_interval: tick_interval.max(Duration::from_millis(10)),
            telemetry,
            snapshots,
        }
    }

    /// Start the actor. The task resolves to the final state after shutdown.
    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> (VehicleHandle, JoinHandle<VehicleState>) {
        let (tx, rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        let task = tokio::spawn(self.run(rx, shutdown));
        (VehicleHandle { tx }, task)
    }

    async fn run(
        mut self,
        mut requests: mpsc::Receiver<VehicleRequest>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> VehicleState {
        let start = Instant::now();
        let mut ticker = interval_at(start + self.tick_interval, self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_tick = start;

        info!(
            drone_id = %self.drone_id,
            state = %self.machine.state().flight_state,
            "Vehicle online, ticking every {:?}",
            self.tick_interval
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Vehicle actor shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let now = Instant::now();
                    self.machine.tick(now - last_tick);
                    last_tick = now;
                    self.publish_telemetry();
                    self.offer_snapshot();
                }
                maybe_request = requests.recv() => {
                    match maybe_request {
                        Some(request) => self.handle(request),
                        None => {
                            info!("All vehicle handles dropped, stopping actor");
                            break;
                        }
                    }
                }
            }
        }

        let final_state = self.machine.snapshot();
        let record = PersistedState::capture(&self.drone_id, &final_state, Utc::now());
        if self.snapshots.send(record).await.is_err() {
            warn!("Persistence loop gone, final state not handed over");
        }
        final_state
    }

    fn handle(&mut self, request: VehicleRequest) {
        match request {
            VehicleRequest::Command { payload, reply } => {
                let ack = self.dispatcher.dispatch_raw(&mut self.machine, &payload);
                self.after_command(ack, reply);
            }
            VehicleRequest::Envelope { envelope, reply } => {
                let ack = self.dispatcher.dispatch(&mut self.machine, envelope);
                self.after_command(ack, reply);
            }
            VehicleRequest::Snapshot { reply } => {
                reply.send(self.machine.snapshot()).ok();
            }
            VehicleRequest::Fault { reason } => {
                self.machine.fault(&reason);
                self.offer_snapshot();
            }
            VehicleRequest::Reset { reply } => {
                let reset = self.machine.reset();
                if reset {
                    self.offer_snapshot();
                }
                reply.send(reset).ok();
            }
        }
    }

    fn after_command(&mut self, ack: Acknowledgement, reply: oneshot::Sender<Acknowledgement>) {
        if ack.is_success() {
            self.offer_snapshot();
        }
        if reply.send(ack).is_err() {
            debug!("Command requester went away before the acknowledgement");
        }
    }

    fn publish_telemetry(&self) {
        let envelope = TelemetryEnvelope::from_state(&self.drone_id, self.machine.state(), Utc::now());
        if let Err(err) = self.telemetry.try_send(envelope) {
            debug!("Telemetry sample dropped: {}", err);
        }
    }

    fn offer_snapshot(&self) {
        let record = PersistedState::capture(&self.drone_id, self.machine.state(), Utc::now());
        if let Err(err) = self.snapshots.try_send(record) {
            debug!("Persistence snapshot skipped: {}", err);
        }
    }
}
