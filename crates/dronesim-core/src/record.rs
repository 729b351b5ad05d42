//! On-disk record of a vehicle's state, and how it is restored.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::models::{FlightState, VehicleState};

/// Bounds of the default spawn area (Shenyang city core), degrees.
pub const SPAWN_LAT_RANGE: (f64, f64) = (41.75, 41.85);
pub const SPAWN_LON_RANGE: (f64, f64) = (123.35, 123.55);

pub const STATE_FILE_PREFIX: &str = "drone_state_";
pub const STATE_FILE_SUFFIX: &str = ".json";

/// File name holding the state of `drone_id`.
pub fn state_file_name(drone_id: &str) -> String {
    format!("{STATE_FILE_PREFIX}{drone_id}{STATE_FILE_SUFFIX}")
}

/// Drone id encoded in a state file name, if it is one.
pub fn drone_id_from_file_name(name: &str) -> Option<&str> {
    name.strip_prefix(STATE_FILE_PREFIX)?
        .strip_suffix(STATE_FILE_SUFFIX)
        .filter(|id| !id.is_empty())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    pub drone_id: String,
    pub saved_at: DateTime<Utc>,
    #[serde(flatten)]
    pub state: VehicleState,
}

impl PersistedState {
    pub fn capture(drone_id: &str, state: &VehicleState, saved_at: DateTime<Utc>) -> Self {
        Self {
            drone_id: drone_id.to_string(),
            saved_at,
            state: state.clone(),
        }
    }

    /// Vehicle state to resume from, or `None` when the record belongs to
    /// another vehicle.
    ///
    /// An airborne record that claims IDLE is resumed as an armed hover.
    pub fn restore(&self, drone_id: &str) -> Option<VehicleState> {
        if self.drone_id != drone_id {
            warn!(
                expected = drone_id,
                found = %self.drone_id,
                "State record belongs to another vehicle, ignoring"
            );
            return None;
        }

        let mut state = self.state.clone();
        state.battery = state.battery.clamp(0.0, 100.0);
        state.position.alt = state.position.alt.max(0.0);
        if state.flight_state == FlightState::Idle && state.is_airborne() {
            info!(
                altitude = state.position.alt,
                "Restored airborne vehicle marked IDLE, resuming as HOVER"
            );
            state.flight_state = FlightState::Hover;
            state.armed = true;
            state.speed = 0.0;
        }
        if state.flight_state != FlightState::Patrol {
            state.trajectory = None;
        }
        Some(state)
    }
}

/// Fresh disarmed vehicle at a random spot in the spawn area; home is the spawn point.
pub fn random_start<R: Rng + ?Sized>(rng: &mut R) -> VehicleState {
    let lat = round6(rng.random_range(SPAWN_LAT_RANGE.0..=SPAWN_LAT_RANGE.1));
    let lon = round6(rng.random_range(SPAWN_LON_RANGE.0..=SPAWN_LON_RANGE.1));
    VehicleState::on_ground(lat, lon, 100.0)
}

fn round6(value: f64) -> f64 {
    (value * 1e6).round() / 1e6
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Position;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn record(state: VehicleState) -> PersistedState {
        PersistedState::capture("17", &state, Utc::now())
    }

    #[test]
    fn file_name_round_trips_drone_id() {
        let name = state_file_name("17");
        assert_eq!(name, "drone_state_17.json");
        assert_eq!(drone_id_from_file_name(&name), Some("17"));
        assert_eq!(drone_id_from_file_name("drone_state_.json"), None);
        assert_eq!(drone_id_from_file_name("notes.json"), None);
    }

    #[test]
    fn airborne_idle_is_restored_as_hover() {
        let mut state = VehicleState::on_ground(41.8, 123.4, 64.0);
        state.position.alt = 35.0;
        state.speed = 3.0;

        let restored = record(state).restore("17").unwrap();
        assert_eq!(restored.flight_state, FlightState::Hover);
        assert!(restored.armed);
        assert_eq!(restored.speed, 0.0);
        assert_eq!(restored.position.alt, 35.0);
    }

    #[test]
    fn other_states_restore_verbatim() {
        let mut state = VehicleState::on_ground(41.8, 123.4, 64.0);
        state.home = Position::ground(41.79, 123.39);
        state.position.alt = 35.0;
        state.armed = true;
        state.flight_state = FlightState::Goto;
        state.speed = 6.0;
        state.heading = 123.0;

        let restored = record(state.clone()).restore("17").unwrap();
        assert_eq!(restored, state);
    }

    #[test]
    fn mismatched_drone_id_is_ignored() {
        let state = VehicleState::on_ground(41.8, 123.4, 64.0);
        assert!(record(state).restore("18").is_none());
    }

    #[test]
    fn serialized_record_is_flat_camel_case() {
        let mut state = VehicleState::on_ground(41.8, 123.4, 64.0);
        state.flight_state = FlightState::ReturningToLaunch;
        let json = serde_json::to_value(record(state)).unwrap();
        assert_eq!(json["droneId"], "17");
        assert_eq!(json["flightState"], "RETURNING_TO_LAUNCH");
        assert_eq!(json["position"]["lat"], 41.8);
        assert!(json["savedAt"].is_string());

        let back: PersistedState = serde_json::from_value(json).unwrap();
        assert_eq!(back.state.flight_state, FlightState::ReturningToLaunch);
    }

    #[test]
    fn json_text_preserves_every_coordinate_bit() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..500 {
            let mut state = random_start(&mut rng);
            state.position.alt = state.position.lat.fract() * 97.0;
            state.heading = state.position.lon.fract() * 360.0;
            state.battery = 100.0 - state.position.lat.fract();

            let text = serde_json::to_string(&record(state.clone())).unwrap();
            let back: PersistedState = serde_json::from_str(&text).unwrap();
            assert_eq!(back.state, state);
        }
    }

    #[test]
    fn random_start_lies_in_spawn_area() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let state = random_start(&mut rng);
            assert!((SPAWN_LAT_RANGE.0..=SPAWN_LAT_RANGE.1).contains(&state.position.lat));
            assert!((SPAWN_LON_RANGE.0..=SPAWN_LON_RANGE.1).contains(&state.position.lon));
            assert_eq!(state.home, state.position);
            assert_eq!(state.flight_state, FlightState::Idle);
            assert!(!state.armed);
        }
    }
}
