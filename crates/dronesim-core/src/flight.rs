//! Flight state machine and per-tick kinematics.
//!
//! [`FlightStateMachine`] owns one [`VehicleState`]. Commands go through a
//! transition table (guard plus allowed source states) before any effect is
//! applied, so a rejected command never mutates state. [`FlightStateMachine::tick`]
//! advances altitude, position and battery and never fails.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::geodesic;
use crate::models::{
    CommandKind, DisarmPolicy, FlightState, GeoPoint, VehicleState, GROUND_THRESHOLD_M,
};
use crate::profile::FlightProfile;
use crate::trajectory::{PatrolShape, Trajectory, TrajectoryError};

/// A parsed, typed command ready for the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum FlightCommand {
    Arm,
    Disarm,
    Takeoff {
        altitude: Option<f64>,
    },
    Land,
    Rtl,
    Goto {
        lat: f64,
        lon: f64,
        altitude: Option<f64>,
        speed: Option<f64>,
    },
    Patrol(PatrolRequest),
    StopPatrol,
    Hover,
    SetSpeed {
        speed: f64,
    },
    SetAltitude {
        altitude: f64,
    },
}

impl FlightCommand {
    pub fn kind(&self) -> CommandKind {
        match self {
            FlightCommand::Arm => CommandKind::Arm,
            FlightCommand::Disarm => CommandKind::Disarm,
            FlightCommand::Takeoff { .. } => CommandKind::Takeoff,
            FlightCommand::Land => CommandKind::Land,
            FlightCommand::Rtl => CommandKind::Rtl,
            FlightCommand::Goto { .. } => CommandKind::Goto,
            FlightCommand::Patrol(_) => CommandKind::Patrol,
            FlightCommand::StopPatrol => CommandKind::StopPatrol,
            FlightCommand::Hover => CommandKind::Hover,
            FlightCommand::SetSpeed { .. } => CommandKind::SetSpeed,
            FlightCommand::SetAltitude { .. } => CommandKind::SetAltitude,
        }
    }
}

/// Patrol parameters. Unset values fall back to the vehicle's position and profile.
#[derive(Debug, Clone, PartialEq)]
pub struct PatrolRequest {
    pub shape: PatrolShape,
    pub center: Option<GeoPoint>,
    pub altitude: Option<f64>,
    pub speed: Option<f64>,
}

/// Why a command was refused. The display text goes back to the operator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandRejection {
    #[error("vehicle is in ERROR state; external reset required")]
    Faulted,
    #[error("vehicle is not armed")]
    NotArmed,
    #[error("vehicle is airborne; land before {0}")]
    Airborne(CommandKind),
    #[error("vehicle is on the ground; take off before {0}")]
    OnGround(CommandKind),
    #[error("{command} not allowed while {state}")]
    InvalidState {
        command: CommandKind,
        state: FlightState,
    },
    #[error("invalid target: {0}")]
    InvalidTarget(String),
    #[error("trajectory generation failed: {0}")]
    Trajectory(#[from] TrajectoryError),
}

/// Precondition on the armed/airborne flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Guard {
    Always,
    OnGround,
    Armed,
    ArmedOnGround,
    ArmedAirborne,
}

/// One row of the transition table.
#[derive(Debug, Clone, Copy)]
struct Rule {
    guard: Guard,
    from: &'static [FlightState],
}

use FlightState::{
    Flying, Goto, Hover, Idle, Landing, LowBattery, Patrol, ReturningToLaunch, Takeoff,
};

const NOT_FAULTED: &[FlightState] = &[
    Idle,
    Takeoff,
    Flying,
    Goto,
    Hover,
    Landing,
    ReturningToLaunch,
    Patrol,
    LowBattery,
];

fn rule(kind: CommandKind) -> Rule {
    match kind {
        CommandKind::Arm => Rule {
            guard: Guard::Always,
            from: NOT_FAULTED,
        },
        CommandKind::Disarm => Rule {
            guard: Guard::OnGround,
            from: NOT_FAULTED,
        },
        CommandKind::Takeoff => Rule {
            guard: Guard::ArmedOnGround,
            from: &[Idle],
        },
        CommandKind::Goto => Rule {
            guard: Guard::ArmedAirborne,
            from: &[Flying, Hover, Goto, Patrol],
        },
        CommandKind::Patrol => Rule {
            guard: Guard::ArmedAirborne,
            from: &[Hover, Flying, Goto, Patrol],
        },
        CommandKind::StopPatrol => Rule {
            guard: Guard::ArmedAirborne,
            from: &[Patrol, Hover],
        },
        CommandKind::Hover => Rule {
            guard: Guard::ArmedAirborne,
            from: &[Flying, Goto, Patrol, Hover],
        },
        CommandKind::Land => Rule {
            guard: Guard::ArmedAirborne,
            from: &[Takeoff, Flying, Goto, Hover, Patrol, LowBattery],
        },
        CommandKind::Rtl => Rule {
            guard: Guard::Armed,
            from: &[
                Idle,
                Takeoff,
                Flying,
                Goto,
                Hover,
                Landing,
                ReturningToLaunch,
                Patrol,
            ],
        },
        CommandKind::SetSpeed => Rule {
            guard: Guard::ArmedAirborne,
            from: &[Flying, Goto, ReturningToLaunch, Patrol],
        },
        CommandKind::SetAltitude => Rule {
            guard: Guard::Armed,
            from: &[Flying, Hover, Goto],
        },
    }
}

/// Simulated vehicle: state plus the rules that govern it.
#[derive(Debug, Clone)]
pub struct FlightStateMachine {
    state: VehicleState,
    profile: FlightProfile,
    disarm_policy: DisarmPolicy,
}

impl FlightStateMachine {
    pub fn new(state: VehicleState, profile: FlightProfile, disarm_policy: DisarmPolicy) -> Self {
        Self {
            state,
            profile,
            disarm_policy,
        }
    }

    pub fn with_defaults(state: VehicleState) -> Self {
        Self::new(state, FlightProfile::default(), DisarmPolicy::default())
    }

    pub fn state(&self) -> &VehicleState {
        &self.state
    }

    /// Copy of the current state for telemetry or persistence.
    pub fn snapshot(&self) -> VehicleState {
        self.state.clone()
    }

    pub fn profile(&self) -> &FlightProfile {
        &self.profile
    }

    pub fn disarm_policy(&self) -> DisarmPolicy {
        self.disarm_policy
    }

    /// Check `kind` against the transition table without touching state.
    pub fn check(&self, kind: CommandKind) -> Result<(), CommandRejection> {
        let current = self.state.flight_state;
        if current == FlightState::Error {
            return Err(CommandRejection::Faulted);
        }

        let rule = rule(kind);
        let armed = self.state.armed;
        let on_ground = self.state.is_on_ground();
        match rule.guard {
            Guard::Always => {}
            Guard::OnGround if !on_ground => return Err(CommandRejection::Airborne(kind)),
            Guard::Armed | Guard::ArmedOnGround | Guard::ArmedAirborne if !armed => {
                return Err(CommandRejection::NotArmed)
            }
            Guard::ArmedOnGround if !on_ground => return Err(CommandRejection::Airborne(kind)),
            Guard::ArmedAirborne if on_ground => return Err(CommandRejection::OnGround(kind)),
            _ => {}
        }

        if !rule.from.contains(&current) {
            return Err(CommandRejection::InvalidState {
                command: kind,
                state: current,
            });
        }
        Ok(())
    }

    /// Apply a command. On success returns the acknowledgement message.
    pub fn handle(&mut self, command: FlightCommand) -> Result<String, CommandRejection> {
        let kind = command.kind();
        let before = self.state.flight_state;
        if let Err(rejection) = self.check(kind) {
            debug!(command = %kind, state = %before, "Command rejected: {}", rejection);
            return Err(rejection);
        }

        let message = match command {
            FlightCommand::Arm => self.arm(),
            FlightCommand::Disarm => self.disarm(),
            FlightCommand::Takeoff { altitude } => self.takeoff(altitude),
            FlightCommand::Land => self.land(),
            FlightCommand::Rtl => self.return_to_launch(),
            FlightCommand::Goto {
                lat,
                lon,
                altitude,
                speed,
            } => self.goto(lat, lon, altitude, speed)?,
            FlightCommand::Patrol(request) => self.patrol(request)?,
            FlightCommand::StopPatrol | FlightCommand::Hover => self.hover(),
            FlightCommand::SetSpeed { speed } => self.set_speed(speed)?,
            FlightCommand::SetAltitude { altitude } => self.set_altitude(altitude)?,
        };

        info!(
            command = %kind,
            from = %before,
            to = %self.state.flight_state,
            "{}",
            message
        );
        Ok(message)
    }

    fn arm(&mut self) -> String {
        if self.state.armed {
            return "already armed".to_string();
        }
        self.state.armed = true;
        "armed".to_string()
    }

    fn disarm(&mut self) -> String {
        self.state.armed = false;
        self.state.clear_targets();
        self.state.trajectory = None;
        self.set_state(FlightState::Idle);
        "disarmed".to_string()
    }

    fn takeoff(&mut self, altitude: Option<f64>) -> String {
        let requested = altitude
            .filter(|a| a.is_finite())
            .unwrap_or(self.profile.default_takeoff_altitude_m);
        let target = self.profile.clamp_altitude(requested);
        self.state.target_altitude = Some(target);
        self.state.target_position = Some(self.state.position.point());
        self.state.trajectory = None;
        self.set_state(FlightState::Takeoff);
        self.state.speed = 0.0;
        format!("taking off to {target:.1} m")
    }

    fn land(&mut self) -> String {
        self.state.target_altitude = Some(0.0);
        self.state.target_position = None;
        self.state.trajectory = None;
        self.set_state(FlightState::Landing);
        self.state.speed = self.profile.landing_speed_mps;
        "landing".to_string()
    }

    fn return_to_launch(&mut self) -> String {
        self.state.trajectory = None;
        if self.state.is_on_ground() {
            self.state.target_position = None;
            self.state.target_altitude = Some(0.0);
            self.set_state(FlightState::Landing);
            self.state.speed = 0.0;
            return "on the ground; returning to launch resolves to landing".to_string();
        }

        let home = self.state.home;
        let cruise = self
            .state
            .position
            .alt
            .max(self.profile.safe_cruise_altitude_m);
        self.state.target_position = Some(home.point());
        self.state.target_altitude = Some(cruise);
        self.set_state(FlightState::ReturningToLaunch);
        self.state.speed = self.profile.return_speed_mps;
        format!(
            "returning to launch ({:.6}, {:.6}) at {:.1} m",
            home.lat, home.lon, cruise
        )
    }

    fn goto(
        &mut self,
        lat: f64,
        lon: f64,
        altitude: Option<f64>,
        speed: Option<f64>,
    ) -> Result<String, CommandRejection> {
        validate_coordinates(lat, lon)?;
        let altitude = self
            .profile
            .clamp_altitude(altitude.filter(|a| a.is_finite()).unwrap_or(self.state.position.alt));
        let speed = self.profile.clamp_speed(
            speed
                .filter(|s| s.is_finite())
                .unwrap_or(self.profile.default_speed_mps),
        );

        self.state.trajectory = None;
        self.state.target_position = Some(GeoPoint { lat, lon });
        self.state.target_altitude = Some(altitude);
        self.set_state(FlightState::Goto);
        self.state.speed = speed;
        Ok(format!(
            "flying to ({lat:.6}, {lon:.6}, {altitude:.1} m) at {speed:.1} m/s"
        ))
    }

    fn patrol(&mut self, request: PatrolRequest) -> Result<String, CommandRejection> {
        let center = request.center.unwrap_or_else(|| self.state.position.point());
        validate_coordinates(center.lat, center.lon)?;
        let default_altitude = self
            .state
            .position
            .alt
            .max(self.profile.safe_cruise_altitude_m);
        let altitude = self.profile.clamp_altitude(
            request
                .altitude
                .filter(|a| a.is_finite())
                .unwrap_or(default_altitude),
        );

        let trajectory = Trajectory::build(&request.shape, center, altitude)?;
        let Some(first) = trajectory.current() else {
            return Err(TrajectoryError::Degenerate(trajectory.kind()).into());
        };
        let speed = self.profile.clamp_speed(
            request
                .speed
                .filter(|s| s.is_finite())
                .unwrap_or(self.profile.default_speed_mps),
        );

        let message = format!(
            "patrolling {} trajectory with {} waypoints",
            trajectory.kind(),
            trajectory.len()
        );
        self.state.target_position = Some(first.point());
        self.state.target_altitude = Some(first.alt.max(0.0));
        self.state.trajectory = Some(trajectory);
        self.set_state(FlightState::Patrol);
        self.state.speed = speed;
        Ok(message)
    }

    fn hover(&mut self) -> String {
        let was_hovering =
            self.state.flight_state == FlightState::Hover && self.state.trajectory.is_none();
        self.state.target_position = None;
        self.state.target_altitude = Some(self.state.position.alt);
        self.state.trajectory = None;
        self.set_state(FlightState::Hover);
        if was_hovering {
            "already hovering".to_string()
        } else {
            "hovering".to_string()
        }
    }

    fn set_speed(&mut self, speed: f64) -> Result<String, CommandRejection> {
        if !speed.is_finite() {
            return Err(CommandRejection::InvalidTarget(format!("speed {speed}")));
        }
        self.state.speed = self.profile.clamp_speed(speed);
        Ok(format!("speed set to {:.1} m/s", self.state.speed))
    }

    fn set_altitude(&mut self, altitude: f64) -> Result<String, CommandRejection> {
        if !altitude.is_finite() {
            return Err(CommandRejection::InvalidTarget(format!("altitude {altitude}")));
        }
        let target = altitude.clamp(0.0, self.profile.max_altitude_m);
        if target <= GROUND_THRESHOLD_M {
            self.state.target_altitude = Some(0.0);
            self.state.target_position = None;
            self.set_state(FlightState::Landing);
            self.state.speed = self.profile.landing_speed_mps;
            return Ok("target altitude 0 m; landing".to_string());
        }

        self.state.target_altitude = Some(target);
        if self.state.flight_state == FlightState::Hover {
            self.set_state(FlightState::Flying);
        }
        Ok(format!("target altitude set to {target:.1} m"))
    }

    /// Advance the simulation by `dt`. Never fails.
    pub fn tick(&mut self, dt: Duration) {
        let dt = dt.as_secs_f64();
        if dt <= 0.0 {
            return;
        }

        if self.state.flight_state != FlightState::Error {
            self.update_altitude(dt);
            self.update_lateral(dt);
        }
        self.drain_battery(dt);
        self.check_low_battery();
        self.enforce_invariants();
    }

    fn update_altitude(&mut self, dt: f64) {
        let Some(target) = self.state.target_altitude else {
            return;
        };
        let tolerance = self.profile.altitude_tolerance_m;
        let current = self.state.position.alt;
        let diff = target - current;

        if diff.abs() > tolerance {
            let step = (self.profile.climb_rate(self.state.flight_state) * dt).min(diff.abs());
            self.state.position.alt = (current + step.copysign(diff)).max(0.0);
        }

        if (target - self.state.position.alt).abs() <= tolerance {
            self.state.position.alt = target.max(0.0);
            self.on_altitude_reached(target);
        }
    }

    fn on_altitude_reached(&mut self, target: f64) {
        if target <= GROUND_THRESHOLD_M {
            self.touchdown();
            return;
        }

        let state = self.state.flight_state;
        if matches!(state, FlightState::Takeoff | FlightState::Flying) && !self.has_lateral_goal()
        {
            self.state.target_position = None;
            self.set_state(FlightState::Hover);
            info!(altitude = self.state.position.alt, "Reached target altitude, hovering");
        }
    }

    fn touchdown(&mut self) {
        self.state.position.alt = 0.0;
        self.state.clear_targets();
        self.state.trajectory = None;
        if self.disarm_policy == DisarmPolicy::OnTouchdown {
            self.state.armed = false;
        }
        self.set_state(FlightState::Idle);
        info!(armed = self.state.armed, "Touchdown complete");
    }

    /// Whether a lateral target is set and not yet reached.
    fn has_lateral_goal(&self) -> bool {
        match self.state.target_position {
            Some(target) => {
                let pos = self.state.position;
                geodesic::distance(pos.lat, pos.lon, target.lat, target.lon)
                    > self.profile.arrival_tolerance_m
            }
            None => false,
        }
    }

    fn update_lateral(&mut self, dt: f64) {
        if !self.state.flight_state.permits_lateral_motion() {
            return;
        }
        let Some(target) = self.state.target_position else {
            return;
        };

        let pos = self.state.position;
        let remaining = geodesic::distance(pos.lat, pos.lon, target.lat, target.lon);
        let step = self.state.speed.max(0.0) * dt;
        if remaining > f64::EPSILON {
            self.state.heading = geodesic::bearing(pos.lat, pos.lon, target.lat, target.lon);
        }

        if remaining <= step + self.profile.arrival_tolerance_m {
            self.state.position.lat = target.lat;
            self.state.position.lon = target.lon;
            self.on_lateral_arrival();
        } else {
            let (lat, lon) = geodesic::destination(pos.lat, pos.lon, self.state.heading, step);
            self.state.position.lat = lat;
            self.state.position.lon = lon;
        }
    }

    fn on_lateral_arrival(&mut self) {
        match self.state.flight_state {
            FlightState::Goto | FlightState::Flying => {
                self.state.target_position = None;
                self.set_state(FlightState::Hover);
                info!("Arrived at target position, hovering");
            }
            FlightState::ReturningToLaunch | FlightState::LowBattery => {
                self.state.target_position = None;
                self.state.target_altitude = Some(0.0);
                self.set_state(FlightState::Landing);
                self.state.speed = self.profile.landing_speed_mps;
                info!("Arrived at launch point, landing");
            }
            FlightState::Patrol => {
                let next = self.state.trajectory.as_mut().and_then(Trajectory::advance);
                match next {
                    Some(waypoint) => {
                        self.state.target_position = Some(waypoint.point());
                        self.state.target_altitude = Some(waypoint.alt.max(0.0));
                        debug!(
                            "Patrol heading to next waypoint ({:.6}, {:.6}, {:.1})",
                            waypoint.lat, waypoint.lon, waypoint.alt
                        );
                    }
                    None => {
                        self.state.target_position = None;
                        warn!("No next patrol waypoint available, holding position");
                    }
                }
            }
            _ => {}
        }
    }

    fn drain_battery(&mut self, dt: f64) {
        let rate = self
            .profile
            .battery_drain
            .rate(self.state.flight_state, self.state.armed);
        self.state.battery = (self.state.battery - rate * dt).clamp(0.0, 100.0);
    }

    fn check_low_battery(&mut self) {
        let state = self.state.flight_state;
        if self.state.battery > self.profile.low_battery_threshold
            || self.state.is_on_ground()
            || matches!(
                state,
                FlightState::Landing | FlightState::LowBattery | FlightState::Error
            )
        {
            return;
        }

        warn!(
            battery = self.state.battery,
            state = %state,
            "Battery low, forcing return to launch"
        );
        self.state.trajectory = None;
        self.state.target_position = Some(self.state.home.point());
        self.state.target_altitude = Some(self.state.position.alt);
        self.set_state(FlightState::LowBattery);
        self.state.speed = self.profile.return_speed_mps;
    }

    fn enforce_invariants(&mut self) {
        self.state.battery = self.state.battery.clamp(0.0, 100.0);
        self.state.position.alt = self.state.position.alt.max(0.0);
        self.state.heading = geodesic::normalize_heading(self.state.heading);
        if matches!(self.state.flight_state, FlightState::Idle | FlightState::Hover) {
            self.state.speed = 0.0;
        }
        if self.state.flight_state != FlightState::Patrol {
            self.state.trajectory = None;
        }
    }

    /// Enter ERROR after an unrecoverable external fault.
    pub fn fault(&mut self, reason: &str) {
        warn!(reason, "Vehicle fault, entering ERROR state");
        self.state.clear_targets();
        self.state.trajectory = None;
        self.set_state(FlightState::Error);
        self.state.speed = 0.0;
    }

    /// Leave ERROR after external intervention. Returns false when not faulted.
    pub fn reset(&mut self) -> bool {
        if self.state.flight_state != FlightState::Error {
            return false;
        }
        if self.state.is_on_ground() {
            self.state.position.alt = 0.0;
            self.state.armed = false;
            self.set_state(FlightState::Idle);
        } else {
            self.state.armed = true;
            self.set_state(FlightState::Hover);
        }
        info!(state = %self.state.flight_state, "Vehicle reset");
        true
    }

    fn set_state(&mut self, next: FlightState) {
        let previous = self.state.flight_state;
        if previous != next {
            debug!(from = %previous, to = %next, "Flight state transition");
        }
        self.state.flight_state = next;
        if matches!(next, FlightState::Idle | FlightState::Hover) {
            self.state.speed = 0.0;
        }
    }
}

fn validate_coordinates(lat: f64, lon: f64) -> Result<(), CommandRejection> {
    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(CommandRejection::InvalidTarget(format!("latitude {lat}")));
    }
    if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
        return Err(CommandRejection::InvalidTarget(format!("longitude {lon}")));
    }
    Ok(())
}
