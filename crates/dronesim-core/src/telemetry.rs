//! Outbound telemetry and farewell payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geodesic::normalize_heading;
use crate::models::{FlightState, VehicleState};
use crate::trajectory::TrajectoryKind;

/// Simulated GNSS fix quality, reported as constants.
pub const SATELLITES: u32 = 8;
pub const SIGNAL_STRENGTH: f64 = 85.0;
pub const TEMPERATURE_C: f64 = 20.0;

pub const FAREWELL_TYPE: &str = "FAREWELL";

/// Patrol progress, present only while a trajectory is loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrajectoryInfo {
    #[serde(rename = "type")]
    pub kind: TrajectoryKind,
    pub active: bool,
    pub current_index: usize,
    pub total_points: usize,
    pub direction: i8,
    pub cycles: f64,
}

/// One telemetry sample as published to the telemetry topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEnvelope {
    pub drone_id: String,
    /// Unix epoch seconds
    pub timestamp: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub battery_level: f64,
    pub battery_voltage: f64,
    pub speed: f64,
    pub heading: f64,
    pub satellites: u32,
    pub signal_strength: f64,
    pub flight_mode: String,
    pub temperature: f64,
    pub status: FlightState,
    pub is_armed: bool,
    #[serde(default)]
    pub trajectory_info: Option<TrajectoryInfo>,
}

impl TelemetryEnvelope {
    pub fn from_state(drone_id: &str, state: &VehicleState, at: DateTime<Utc>) -> Self {
        let trajectory_info = state.trajectory.as_ref().map(|t| TrajectoryInfo {
            kind: t.kind(),
            active: state.flight_state == FlightState::Patrol,
            current_index: t.index(),
            total_points: t.len(),
            direction: t.direction(),
            cycles: t.cycles(),
        });

        Self {
            drone_id: drone_id.to_string(),
            timestamp: epoch_seconds(at),
            latitude: round_to(state.position.lat, 6),
            longitude: round_to(state.position.lon, 6),
            altitude: round_to(state.position.alt, 2),
            battery_level: round_to(state.battery, 1),
            battery_voltage: round_to(battery_voltage(state.battery), 2),
            speed: round_to(state.speed, 2),
            heading: normalize_heading(round_to(state.heading, 1)),
            satellites: SATELLITES,
            signal_strength: SIGNAL_STRENGTH,
            flight_mode: flight_mode(state),
            temperature: TEMPERATURE_C,
            status: state.flight_state,
            is_armed: state.armed,
            trajectory_info,
        }
    }
}

/// Sent once on the telemetry topic during shutdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FarewellMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub drone_id: String,
    pub serial_number: String,
    pub timestamp: f64,
    pub message: String,
    pub battery_remaining: f64,
}

impl FarewellMessage {
    pub fn new(drone_id: &str, serial_number: &str, battery: f64, at: DateTime<Utc>) -> Self {
        Self {
            kind: FAREWELL_TYPE.to_string(),
            drone_id: drone_id.to_string(),
            serial_number: serial_number.to_string(),
            timestamp: epoch_seconds(at),
            message: "simulator shutting down".to_string(),
            battery_remaining: round_to(battery, 1),
        }
    }
}

/// Human-facing mode string shown by ground stations.
pub fn flight_mode(state: &VehicleState) -> String {
    match (&state.trajectory, state.flight_state) {
        (Some(trajectory), FlightState::Patrol) => format!("PATROL_{}", trajectory.kind()),
        (_, FlightState::Idle) if state.armed => "ARMED".to_string(),
        (_, FlightState::Idle) => "IDLE".to_string(),
        (_, other) => other.as_str().to_string(),
    }
}

/// Nominal pack voltage for a charge percentage.
pub fn battery_voltage(battery: f64) -> f64 {
    battery * 0.12 + 10.0
}

fn epoch_seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp_micros() as f64 / 1_000_000.0
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
