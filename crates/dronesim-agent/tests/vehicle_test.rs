//! Vehicle actor integration tests.
//!
//! Run with paused tokio time, so simulated minutes pass instantly.

use std::time::Duration;

use dronesim_agent::vehicle::{Vehicle, VehicleHandle};
use dronesim_core::{
    AckStatus, CommandEnvelope, CommandKind, FlightState, FlightStateMachine, PersistedState,
    TelemetryEnvelope, VehicleState,
};
use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

const TICK: Duration = Duration::from_secs(5);

struct Harness {
    handle: VehicleHandle,
    task: JoinHandle<VehicleState>,
    telemetry: mpsc::Receiver<TelemetryEnvelope>,
    snapshots: mpsc::Receiver<PersistedState>,
    shutdown: broadcast::Sender<()>,
}

fn start(state: VehicleState) -> Harness {
    let (telemetry_tx, telemetry) = mpsc::channel(256);
    let (snapshot_tx, snapshots) = mpsc::channel(256);
    let (shutdown, shutdown_rx) = broadcast::channel(1);
    let vehicle = Vehicle::new(
        "drone-1",
        FlightStateMachine::with_defaults(state),
        TICK,
        telemetry_tx,
        snapshot_tx,
    );
    let (handle, task) = vehicle.spawn(shutdown_rx);
    Harness {
        handle,
        task,
        telemetry,
        snapshots,
        shutdown,
    }
}

fn envelope(id: &str, kind: CommandKind, parameters: serde_json::Value) -> CommandEnvelope {
    CommandEnvelope::new(id, kind, parameters)
}

fn drain<T>(rx: &mut mpsc::Receiver<T>) -> Vec<T> {
    let mut items = Vec::new();
    while let Ok(item) = rx.try_recv() {
        items.push(item);
    }
    items
}

async fn arm_and_take_off(handle: &VehicleHandle, altitude: f64) {
    let ack = handle
        .command(envelope("c-arm", CommandKind::Arm, json!({})))
        .await
        .unwrap();
    assert_eq!(ack.status, AckStatus::Success, "{}", ack.message);
    let ack = handle
        .command(envelope("c-takeoff", CommandKind::Takeoff, json!({"altitude": altitude})))
        .await
        .unwrap();
    assert_eq!(ack.status, AckStatus::Success, "{}", ack.message);
}

#[tokio::test(start_paused = true)]
async fn test_takeoff_reaches_hover_through_actor() {
    let mut h = start(VehicleState::on_ground(41.8, 123.45, 100.0));
    arm_and_take_off(&h.handle, 40.0).await;

    tokio::time::sleep(TICK * 8 + Duration::from_secs(1)).await;

    let state = h.handle.snapshot().await.unwrap();
    assert_eq!(state.flight_state, FlightState::Hover);
    assert!((state.position.alt - 40.0).abs() < 1e-6);

    let samples = drain(&mut h.telemetry);
    assert_eq!(samples.len(), 8);
    let altitudes: Vec<f64> = samples.iter().map(|s| s.altitude).collect();
    assert!(altitudes.windows(2).all(|w| w[1] >= w[0]));
    let last = samples.last().unwrap();
    assert_eq!(last.status, FlightState::Hover);
    assert_eq!(last.drone_id, "drone-1");
    assert!(last.is_armed);
}

#[tokio::test(start_paused = true)]
async fn test_acknowledgement_echoes_command() {
    let h = start(VehicleState::on_ground(41.8, 123.45, 100.0));
    let ack = h
        .handle
        .command(envelope("cmd-77", CommandKind::Arm, json!({})))
        .await
        .unwrap();
    assert_eq!(ack.command_id, "cmd-77");
    assert_eq!(ack.drone_id, "drone-1");
    assert_eq!(ack.status, AckStatus::Success);

    let wire = serde_json::to_value(&ack).unwrap();
    assert_eq!(wire["commandId"], "cmd-77");
    assert_eq!(wire["status"], "SUCCESS");
    assert!(wire["timestamp"].as_str().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_rejected_command_leaves_state_untouched() {
    let h = start(VehicleState::on_ground(41.8, 123.45, 100.0));
    arm_and_take_off(&h.handle, 40.0).await;
    tokio::time::sleep(TICK * 8 + Duration::from_secs(1)).await;
    let before = h.handle.snapshot().await.unwrap();

    let ack = h
        .handle
        .command(envelope("c-disarm", CommandKind::Disarm, json!({})))
        .await
        .unwrap();
    assert_eq!(ack.status, AckStatus::Failed);
    assert_eq!(h.handle.snapshot().await.unwrap(), before);
}

#[tokio::test(start_paused = true)]
async fn test_raw_payload_handling() {
    let h = start(VehicleState::on_ground(41.8, 123.45, 100.0));

    let ack = h.handle.command_raw(b"{not json".to_vec()).await.unwrap();
    assert_eq!(ack.status, AckStatus::Failed);
    assert_eq!(ack.command_id, "unknown");

    let ack = h
        .handle
        .command_raw(br#"{"commandId": "x1", "type": "BARREL_ROLL", "parameters": {}}"#.to_vec())
        .await
        .unwrap();
    assert_eq!(ack.status, AckStatus::Failed);
    assert_eq!(ack.command_id, "x1");
    assert!(ack.message.contains("BARREL_ROLL"));

    let ack = h
        .handle
        .command_raw(br#"{"commandId": "x2", "type": "ARM"}"#.to_vec())
        .await
        .unwrap();
    assert_eq!(ack.status, AckStatus::Success);
    assert!(h.handle.snapshot().await.unwrap().armed);
}

#[tokio::test(start_paused = true)]
async fn test_fault_blocks_commands_until_reset() {
    let mut h = start(VehicleState::on_ground(41.8, 123.45, 100.0));
    h.handle.fault("MQTT event loop terminated").await.unwrap();

    let state = h.handle.snapshot().await.unwrap();
    assert_eq!(state.flight_state, FlightState::Error);

    let ack = h
        .handle
        .command(envelope("c-arm", CommandKind::Arm, json!({})))
        .await
        .unwrap();
    assert_eq!(ack.status, AckStatus::Failed);

    tokio::time::sleep(TICK + Duration::from_secs(1)).await;
    let sample = drain(&mut h.telemetry).pop().unwrap();
    assert_eq!(sample.status, FlightState::Error);

    assert!(h.handle.reset().await.unwrap());
    assert_eq!(h.handle.snapshot().await.unwrap().flight_state, FlightState::Idle);
    assert!(!h.handle.reset().await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_hands_over_final_snapshot() {
    let mut h = start(VehicleState::on_ground(41.8, 123.45, 100.0));
    arm_and_take_off(&h.handle, 30.0).await;
    tokio::time::sleep(TICK * 2 + Duration::from_secs(1)).await;

    h.shutdown.send(()).unwrap();
    let final_state = h.task.await.unwrap();
    assert_eq!(final_state.flight_state, FlightState::Takeoff);

    let records = drain(&mut h.snapshots);
    let last = records.last().unwrap();
    assert_eq!(last.drone_id, "drone-1");
    assert_eq!(last.state, final_state);

    assert_eq!(drain(&mut h.telemetry).len(), 2);

    // Senders are gone once the actor has stopped
    assert!(h.snapshots.recv().await.is_none());
    assert!(h.telemetry.recv().await.is_none());
    assert!(h.handle.snapshot().await.is_err());
}
