//! Flight limits, rates and thresholds for the simulated vehicle.

use serde::{Deserialize, Serialize};

use crate::models::FlightState;

/// Configuration for the flight state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlightProfile {
    /// Allowed commanded altitude range for TAKEOFF/GOTO/PATROL (meters)
    pub min_altitude_m: f64,
    pub max_altitude_m: f64,
    /// Allowed horizontal speed range (m/s)
    pub min_speed_mps: f64,
    pub max_speed_mps: f64,
    /// Default takeoff altitude when none is given
    pub default_takeoff_altitude_m: f64,
    /// Default cruise speed for GOTO/PATROL
    pub default_speed_mps: f64,
    /// Speed used while returning home
    pub return_speed_mps: f64,
    /// Nominal speed reported while descending
    pub landing_speed_mps: f64,
    /// Minimum altitude held on the way home
    pub safe_cruise_altitude_m: f64,
    /// Vertical rates (m/s)
    pub climb_rate_fast_mps: f64,
    pub climb_rate_landing_mps: f64,
    pub climb_rate_slow_mps: f64,
    /// Altitude is considered reached inside this band
    pub altitude_tolerance_m: f64,
    /// Lateral arrival tolerance on top of the per-tick step
    pub arrival_tolerance_m: f64,
    /// Battery percent at which a forced return begins
    pub low_battery_threshold: f64,
    pub battery_drain: BatteryDrain,
}

impl Default for FlightProfile {
    fn default() -> Self {
        Self {
            min_altitude_m: 5.0,
            max_altitude_m: 500.0,
            min_speed_mps: 0.5,
            max_speed_mps: 20.0,
            default_takeoff_altitude_m: 30.0,
            default_speed_mps: 5.0,
            return_speed_mps: 4.0,
            landing_speed_mps: 1.0,
            safe_cruise_altitude_m: 20.0,
            climb_rate_fast_mps: 1.0,
            climb_rate_landing_mps: 0.6,
            climb_rate_slow_mps: 0.4,
            altitude_tolerance_m: 0.1,
            arrival_tolerance_m: 0.5,
            low_battery_threshold: 20.0,
            battery_drain: BatteryDrain::default(),
        }
    }
}

impl FlightProfile {
    pub fn clamp_altitude(&self, altitude_m: f64) -> f64 {
        altitude_m.clamp(self.min_altitude_m, self.max_altitude_m)
    }

    pub fn clamp_speed(&self, speed_mps: f64) -> f64 {
        speed_mps.clamp(self.min_speed_mps, self.max_speed_mps)
    }

    /// Maximum vertical speed while in `state`.
    pub fn climb_rate(&self, state: FlightState) -> f64 {
        match state {
            FlightState::Takeoff | FlightState::Flying => self.climb_rate_fast_mps,
            FlightState::Landing => self.climb_rate_landing_mps,
            _ => self.climb_rate_slow_mps,
        }
    }
}

/// Battery drain in percent per second.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatteryDrain {
    pub disarmed: f64,
    pub idle: f64,
    pub hover: f64,
    pub cruise: f64,
    pub vertical: f64,
    pub other: f64,
}

impl Default for BatteryDrain {
    fn default() -> Self {
        Self {
            disarmed: 0.002,
            idle: 0.01,
            hover: 0.04,
            cruise: 0.1,
            vertical: 0.06,
            other: 0.02,
        }
    }
}

impl BatteryDrain {
    pub fn rate(&self, state: FlightState, armed: bool) -> f64 {
        if !armed {
            return self.disarmed;
        }
        match state {
            FlightState::Idle => self.idle,
            FlightState::Hover => self.hover,
            FlightState::Flying
            | FlightState::Goto
            | FlightState::ReturningToLaunch
            | FlightState::Patrol
            | FlightState::LowBattery => self.cruise,
            FlightState::Takeoff | FlightState::Landing => self.vertical,
            FlightState::Error => self.other,
        }
    }
}
