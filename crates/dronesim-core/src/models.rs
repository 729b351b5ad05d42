//! Core data models for the simulated vehicle.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::trajectory::Trajectory;

/// Altitude at or below which the vehicle counts as on the ground.
pub const GROUND_THRESHOLD_M: f64 = 0.5;

/// A point on the earth's surface.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// A 3D position: latitude/longitude in degrees, altitude in meters above launch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
}

impl Position {
    pub fn new(lat: f64, lon: f64, alt: f64) -> Self {
        Self { lat, lon, alt }
    }

    pub fn ground(lat: f64, lon: f64) -> Self {
        Self::new(lat, lon, 0.0)
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint {
            lat: self.lat,
            lon: self.lon,
        }
    }
}

/// A single (latitude, longitude, altitude) target point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
}

impl Waypoint {
    pub fn new(lat: f64, lon: f64, alt: f64) -> Self {
        Self { lat, lon, alt }
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint {
            lat: self.lat,
            lon: self.lon,
        }
    }
}

impl From<[f64; 3]> for Waypoint {
    fn from([lat, lon, alt]: [f64; 3]) -> Self {
        Self { lat, lon, alt }
    }
}

/// Discrete flight state. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlightState {
    /// On the ground, waiting for commands
    #[default]
    Idle,
    /// Climbing to the requested takeoff altitude
    Takeoff,
    /// Changing altitude on request
    Flying,
    /// Flying to a single commanded point
    Goto,
    /// Holding position in the air
    Hover,
    /// Descending to the ground
    Landing,
    /// Flying back to the launch point
    ReturningToLaunch,
    /// Sweeping a generated trajectory
    Patrol,
    /// Forced return after the battery crossed the reserve threshold
    LowBattery,
    /// Unrecoverable fault, waiting for external reset
    Error,
}

impl FlightState {
    pub const ALL: [FlightState; 10] = [
        FlightState::Idle,
        FlightState::Takeoff,
        FlightState::Flying,
        FlightState::Goto,
        FlightState::Hover,
        FlightState::Landing,
        FlightState::ReturningToLaunch,
        FlightState::Patrol,
        FlightState::LowBattery,
        FlightState::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FlightState::Idle => "IDLE",
            FlightState::Takeoff => "TAKEOFF",
            FlightState::Flying => "FLYING",
            FlightState::Goto => "GOTO",
            FlightState::Hover => "HOVER",
            FlightState::Landing => "LANDING",
            FlightState::ReturningToLaunch => "RETURNING_TO_LAUNCH",
            FlightState::Patrol => "PATROL",
            FlightState::LowBattery => "LOW_BATTERY",
            FlightState::Error => "ERROR",
        }
    }

    /// States in which the vehicle moves toward a lateral target.
    pub fn permits_lateral_motion(&self) -> bool {
        matches!(
            self,
            FlightState::Goto
                | FlightState::ReturningToLaunch
                | FlightState::Flying
                | FlightState::Patrol
                | FlightState::LowBattery
        )
    }
}

impl fmt::Display for FlightState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full command vocabulary understood by the vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandKind {
    Arm,
    Disarm,
    Takeoff,
    Land,
    Rtl,
    Goto,
    Patrol,
    StopPatrol,
    Hover,
    SetSpeed,
    SetAltitude,
}

impl CommandKind {
    pub const ALL: [CommandKind; 11] = [
        CommandKind::Arm,
        CommandKind::Disarm,
        CommandKind::Takeoff,
        CommandKind::Land,
        CommandKind::Rtl,
        CommandKind::Goto,
        CommandKind::Patrol,
        CommandKind::StopPatrol,
        CommandKind::Hover,
        CommandKind::SetSpeed,
        CommandKind::SetAltitude,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Arm => "ARM",
            CommandKind::Disarm => "DISARM",
            CommandKind::Takeoff => "TAKEOFF",
            CommandKind::Land => "LAND",
            CommandKind::Rtl => "RTL",
            CommandKind::Goto => "GOTO",
            CommandKind::Patrol => "PATROL",
            CommandKind::StopPatrol => "STOP_PATROL",
            CommandKind::Hover => "HOVER",
            CommandKind::SetSpeed => "SET_SPEED",
            CommandKind::SetAltitude => "SET_ALTITUDE",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CommandKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| s.to_string())
    }
}

/// What happens to arming when the vehicle touches down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DisarmPolicy {
    /// Disarm automatically once a landing completes
    #[default]
    OnTouchdown,
    /// Stay armed after landing until an explicit DISARM
    Manual,
}

impl FromStr for DisarmPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "on-touchdown" | "on_touchdown" | "auto" => Ok(DisarmPolicy::OnTouchdown),
            "manual" => Ok(DisarmPolicy::Manual),
            other => Err(format!("unknown disarm policy: {other}")),
        }
    }
}

/// Complete mutable state of one simulated vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleState {
    pub position: Position,
    /// Launch point recorded at creation; RTL flies here
    pub home: Position,
    /// Percent, always within [0, 100]
    pub battery: f64,
    pub armed: bool,
    pub flight_state: FlightState,
    /// Horizontal speed in m/s
    pub speed: f64,
    /// Degrees in [0, 360)
    pub heading: f64,
    #[serde(default)]
    pub target_position: Option<GeoPoint>,
    #[serde(default)]
    pub target_altitude: Option<f64>,
    /// Present only while patrolling
    #[serde(default)]
    pub trajectory: Option<Trajectory>,
}

impl VehicleState {
    /// Fresh vehicle sitting disarmed on the ground at `lat`/`lon`.
    pub fn on_ground(lat: f64, lon: f64, battery: f64) -> Self {
        let position = Position::ground(lat, lon);
        Self {
            position,
            home: position,
            battery: battery.clamp(0.0, 100.0),
            armed: false,
            flight_state: FlightState::Idle,
            speed: 0.0,
            heading: 0.0,
            target_position: None,
            target_altitude: None,
            trajectory: None,
        }
    }

    pub fn is_on_ground(&self) -> bool {
        self.position.alt <= GROUND_THRESHOLD_M
    }

    pub fn is_airborne(&self) -> bool {
        !self.is_on_ground()
    }

    pub fn clear_targets(&mut self) {
        self.target_position = None;
        self.target_altitude = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_kind_parses_case_insensitively() {
        assert_eq!("stop_patrol".parse::<CommandKind>(), Ok(CommandKind::StopPatrol));
        assert_eq!("RTL".parse::<CommandKind>(), Ok(CommandKind::Rtl));
        assert_eq!("FLIP".parse::<CommandKind>(), Err("FLIP".to_string()));
    }

    #[test]
    fn flight_state_serializes_screaming_snake() {
        let json = serde_json::to_string(&FlightState::ReturningToLaunch).unwrap();
        assert_eq!(json, "\"RETURNING_TO_LAUNCH\"");
        let state: FlightState = serde_json::from_str("\"LOW_BATTERY\"").unwrap();
        assert_eq!(state, FlightState::LowBattery);
    }

    #[test]
    fn ground_threshold_decides_airborne() {
        let mut state = VehicleState::on_ground(41.8, 123.4, 100.0);
        assert!(state.is_on_ground());
        state.position.alt = 0.6;
        assert!(state.is_airborne());
    }

    #[test]
    fn disarm_policy_from_str() {
        assert_eq!("manual".parse::<DisarmPolicy>(), Ok(DisarmPolicy::Manual));
        assert_eq!("on-touchdown".parse::<DisarmPolicy>(), Ok(DisarmPolicy::OnTouchdown));
        assert!("sometimes".parse::<DisarmPolicy>().is_err());
    }
}
