//! Remote-control commands as sent by `send_command`.

use clap::{Subcommand, ValueEnum};
use dronesim_core::{CommandEnvelope, CommandKind, TrajectoryKind};
use serde_json::{json, Value};

pub const DEFAULT_TAKEOFF_ALTITUDE: f64 = 30.0;
pub const DEFAULT_GOTO_ALTITUDE: f64 = 25.0;
pub const DEFAULT_SPEED: f64 = 5.0;
pub const DEFAULT_PATROL_SIZE: f64 = 100.0;
pub const DEFAULT_PATROL_ALTITUDE: f64 = 30.0;

/// Patrol shapes that need no explicit point list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PatrolPattern {
    Rectangle,
    Circle,
    Triangle,
    Line,
}

impl From<PatrolPattern> for TrajectoryKind {
    fn from(pattern: PatrolPattern) -> Self {
        match pattern {
            PatrolPattern::Rectangle => TrajectoryKind::Rectangle,
            PatrolPattern::Circle => TrajectoryKind::Circle,
            PatrolPattern::Triangle => TrajectoryKind::Triangle,
            PatrolPattern::Line => TrajectoryKind::Line,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Subcommand)]
pub enum RemoteCommand {
    /// Arm the motors
    Arm,
    /// Disarm (on the ground only)
    Disarm,
    /// Climb to an altitude in meters
    Takeoff {
        #[arg(default_value_t = DEFAULT_TAKEOFF_ALTITUDE)]
        altitude: f64,
    },
    /// Descend in place
    Land,
    /// Return to launch
    Rtl,
    /// Fly to a point
    Goto {
        #[arg(allow_negative_numbers = true)]
        latitude: f64,
        #[arg(allow_negative_numbers = true)]
        longitude: f64,
        #[arg(default_value_t = DEFAULT_GOTO_ALTITUDE)]
        altitude: f64,
        #[arg(default_value_t = DEFAULT_SPEED)]
        speed: f64,
    },
    /// Stop and hold position
    Hover,
    /// End the current patrol and hover
    StopPatrol,
    /// Patrol a pattern around the current position
    Patrol {
        #[arg(value_enum, ignore_case = true)]
        pattern: PatrolPattern,
        /// Pattern size in meters
        #[arg(default_value_t = DEFAULT_PATROL_SIZE)]
        size: f64,
        #[arg(default_value_t = DEFAULT_PATROL_ALTITUDE)]
        altitude: f64,
        #[arg(default_value_t = DEFAULT_SPEED)]
        speed: f64,
    },
    /// Change cruise speed in m/s
    SetSpeed { speed: f64 },
    /// Change target altitude in meters
    SetAltitude { altitude: f64 },
}

impl RemoteCommand {
    pub fn kind(&self) -> CommandKind {
        match self {
            RemoteCommand::Arm => CommandKind::Arm,
            RemoteCommand::Disarm => CommandKind::Disarm,
            RemoteCommand::Takeoff { .. } => CommandKind::Takeoff,
            RemoteCommand::Land => CommandKind::Land,
            RemoteCommand::Rtl => CommandKind::Rtl,
            RemoteCommand::Goto { .. } => CommandKind::Goto,
            RemoteCommand::Hover => CommandKind::Hover,
            RemoteCommand::StopPatrol => CommandKind::StopPatrol,
            RemoteCommand::Patrol { .. } => CommandKind::Patrol,
            RemoteCommand::SetSpeed { .. } => CommandKind::SetSpeed,
            RemoteCommand::SetAltitude { .. } => CommandKind::SetAltitude,
        }
    }

    fn parameters(&self) -> Value {
        match *self {
            RemoteCommand::Takeoff { altitude } => json!({ "altitude": altitude }),
            RemoteCommand::Goto {
                latitude,
                longitude,
                altitude,
                speed,
            } => json!({
                "latitude": latitude,
                "longitude": longitude,
                "altitude": altitude,
                "speed": speed,
            }),
            RemoteCommand::Patrol {
                pattern,
                size,
                altitude,
                speed,
            } => json!({
                "trajectoryType": TrajectoryKind::from(pattern).as_str(),
                "size": size,
                "altitude": altitude,
                "speed": speed,
            }),
            RemoteCommand::SetSpeed { speed } => json!({ "speed": speed }),
            RemoteCommand::SetAltitude { altitude } => json!({ "altitude": altitude }),
            _ => json!({}),
        }
    }

    pub fn to_envelope(&self, command_id: impl Into<String>) -> CommandEnvelope {
        CommandEnvelope::new(command_id, self.kind(), self.parameters())
    }
}

/// `cmd-` plus eight random hex digits.
pub fn new_command_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("cmd-{}", &id[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use dronesim_core::{parse_command, FlightCommand, GeoPoint};

    #[derive(Parser)]
    struct Cli {
        #[command(subcommand)]
        command: RemoteCommand,
    }

    fn parse(args: &[&str]) -> RemoteCommand {
        let mut argv = vec!["send_command"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap().command
    }

    #[test]
    fn defaults_fill_optional_arguments() {
        assert_eq!(parse(&["takeoff"]), RemoteCommand::Takeoff { altitude: 30.0 });
        assert_eq!(
            parse(&["goto", "41.8", "-123.4"]),
            RemoteCommand::Goto {
                latitude: 41.8,
                longitude: -123.4,
                altitude: 25.0,
                speed: 5.0,
            }
        );
        assert_eq!(
            parse(&["patrol", "CIRCLE"]),
            RemoteCommand::Patrol {
                pattern: PatrolPattern::Circle,
                size: 100.0,
                altitude: 30.0,
                speed: 5.0,
            }
        );
        assert_eq!(parse(&["stop-patrol"]), RemoteCommand::StopPatrol);
    }

    #[test]
    fn patrol_rejects_custom() {
        let argv = ["send_command", "patrol", "custom"];
        assert!(Cli::try_parse_from(argv).is_err());
    }

    #[test]
    fn envelope_round_trips_through_dispatcher_parsing() {
        let here = GeoPoint { lat: 41.8, lon: 123.4 };

        let envelope = parse(&["patrol", "rectangle", "150", "25", "5"]).to_envelope("cmd-1");
        assert_eq!(envelope.command_type, "PATROL");
        assert_eq!(envelope.parameters["trajectoryType"], "RECTANGLE");
        let command = parse_command(CommandKind::Patrol, &envelope.parameters, here).unwrap();
        assert!(matches!(command, FlightCommand::Patrol(_)));

        let envelope = parse(&["set-altitude", "80"]).to_envelope("cmd-2");
        assert_eq!(envelope.command_type, "SET_ALTITUDE");
        let command = parse_command(CommandKind::SetAltitude, &envelope.parameters, here).unwrap();
        assert_eq!(command, FlightCommand::SetAltitude { altitude: 80.0 });
    }

    #[test]
    fn command_ids_are_short() {
        let id = new_command_id();
        assert!(id.starts_with("cmd-"));
        assert_eq!(id.len(), 12);
    }
}
