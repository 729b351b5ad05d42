//! Command envelope parsing and acknowledgement.
//!
//! The dispatcher is the only boundary between wire payloads and the flight
//! state machine: one envelope in, exactly one [`Acknowledgement`] out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::flight::{FlightCommand, FlightStateMachine, PatrolRequest};
use crate::models::{CommandKind, GeoPoint, Waypoint};
use crate::trajectory::{PatrolShape, TrajectoryKind, DEFAULT_CIRCLE_POINTS, DEFAULT_LINE_SEGMENTS};

/// Command id used when the envelope carries none.
pub const UNKNOWN_COMMAND_ID: &str = "unknown";

/// Default patrol pattern size in meters.
const DEFAULT_PATROL_SIZE_M: f64 = 100.0;
/// Default LINE end offset from the center, in degrees.
const DEFAULT_LINE_OFFSET_DEG: f64 = 0.001;

fn unknown_command_id() -> String {
    UNKNOWN_COMMAND_ID.to_string()
}

/// Inbound command as received from the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandEnvelope {
    #[serde(default = "unknown_command_id")]
    pub command_id: String,
    #[serde(rename = "type")]
    pub command_type: String,
    #[serde(default)]
    pub parameters: Value,
}

impl CommandEnvelope {
    pub fn new(command_id: impl Into<String>, kind: CommandKind, parameters: Value) -> Self {
        Self {
            command_id: command_id.into(),
            command_type: kind.as_str().to_string(),
            parameters,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AckStatus {
    Success,
    Failed,
}

/// Outbound reply, one per command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Acknowledgement {
    pub command_id: String,
    pub drone_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: AckStatus,
    pub message: String,
}

impl Acknowledgement {
    pub fn is_success(&self) -> bool {
        self.status == AckStatus::Success
    }
}

#[derive(Debug, Error)]
pub enum ParameterError {
    #[error("{0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unknown trajectory type: {0}")]
    UnknownTrajectory(String),
    #[error("CUSTOM trajectory requires points")]
    MissingPoints,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct TakeoffParams {
    altitude: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GotoParams {
    #[serde(alias = "lat")]
    latitude: f64,
    #[serde(alias = "lon")]
    longitude: f64,
    #[serde(default)]
    altitude: Option<f64>,
    #[serde(default)]
    speed: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SpeedParams {
    speed: f64,
}

#[derive(Debug, Deserialize)]
struct AltitudeParams {
    altitude: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PatrolParams {
    #[serde(alias = "trajectory_type")]
    trajectory_type: Option<String>,
    size: Option<f64>,
    width: Option<f64>,
    height: Option<f64>,
    radius: Option<f64>,
    #[serde(alias = "num_points")]
    num_points: Option<usize>,
    #[serde(alias = "center_lat")]
    center_lat: Option<f64>,
    #[serde(alias = "center_lon")]
    center_lon: Option<f64>,
    #[serde(alias = "end_lat")]
    end_lat: Option<f64>,
    #[serde(alias = "end_lon")]
    end_lon: Option<f64>,
    points: Option<Vec<[f64; 3]>>,
    altitude: Option<f64>,
    speed: Option<f64>,
}

fn params<T: serde::de::DeserializeOwned>(parameters: &Value) -> Result<T, serde_json::Error> {
    match parameters {
        Value::Null => serde_json::from_value(Value::Object(Default::default())),
        other => serde_json::from_value(other.clone()),
    }
}

/// Turn `kind` + raw `parameters` into a typed command.
///
/// `current` is used to resolve defaults that depend on where the vehicle is,
/// such as the patrol center.
pub fn parse_command(
    kind: CommandKind,
    parameters: &Value,
    current: GeoPoint,
) -> Result<FlightCommand, ParameterError> {
    let command = match kind {
        CommandKind::Arm => FlightCommand::Arm,
        CommandKind::Disarm => FlightCommand::Disarm,
        CommandKind::Land => FlightCommand::Land,
        CommandKind::Rtl => FlightCommand::Rtl,
        CommandKind::Hover => FlightCommand::Hover,
        CommandKind::StopPatrol => FlightCommand::StopPatrol,
        CommandKind::Takeoff => {
            let p: TakeoffParams = params(parameters)?;
            FlightCommand::Takeoff {
                altitude: p.altitude,
            }
        }
        CommandKind::Goto => {
            let p: GotoParams = params(parameters)?;
            FlightCommand::Goto {
                lat: p.latitude,
                lon: p.longitude,
                altitude: p.altitude,
                speed: p.speed,
            }
        }
        CommandKind::SetSpeed => {
            let p: SpeedParams = params(parameters)?;
            FlightCommand::SetSpeed { speed: p.speed }
        }
        CommandKind::SetAltitude => {
            let p: AltitudeParams = params(parameters)?;
            FlightCommand::SetAltitude {
                altitude: p.altitude,
            }
        }
        CommandKind::Patrol => FlightCommand::Patrol(patrol_request(params(parameters)?, current)?),
    };
    Ok(command)
}

fn patrol_request(p: PatrolParams, current: GeoPoint) -> Result<PatrolRequest, ParameterError> {
    let kind = match p.trajectory_type.as_deref() {
        Some(name) => name
            .parse::<TrajectoryKind>()
            .map_err(ParameterError::UnknownTrajectory)?,
        None => TrajectoryKind::Rectangle,
    };
    let center = GeoPoint {
        lat: p.center_lat.unwrap_or(current.lat),
        lon: p.center_lon.unwrap_or(current.lon),
    };
    let size = p.size.unwrap_or(DEFAULT_PATROL_SIZE_M);

    let shape = match kind {
        TrajectoryKind::Rectangle => PatrolShape::Rectangle {
            width: p.width.unwrap_or(size),
            height: p.height.unwrap_or(size),
        },
        TrajectoryKind::Circle => PatrolShape::Circle {
            radius: p.radius.unwrap_or(size / 2.0),
            num_points: p.num_points.unwrap_or(DEFAULT_CIRCLE_POINTS),
        },
        TrajectoryKind::Triangle => PatrolShape::Triangle { size },
        TrajectoryKind::Line => PatrolShape::Line {
            end: GeoPoint {
                lat: p.end_lat.unwrap_or(center.lat + DEFAULT_LINE_OFFSET_DEG),
                lon: p.end_lon.unwrap_or(center.lon + DEFAULT_LINE_OFFSET_DEG),
            },
            num_points: p.num_points.unwrap_or(DEFAULT_LINE_SEGMENTS),
        },
        TrajectoryKind::Custom => {
            let points = p.points.ok_or(ParameterError::MissingPoints)?;
            PatrolShape::Custom {
                points: points.into_iter().map(Waypoint::from).collect(),
            }
        }
    };

    Ok(PatrolRequest {
        shape,
        center: Some(center),
        altitude: p.altitude,
        speed: p.speed,
    })
}

/// Routes envelopes for one vehicle and builds its acknowledgements.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    drone_id: String,
}

impl Dispatcher {
    pub fn new(drone_id: impl Into<String>) -> Self {
        Self {
            drone_id: drone_id.into(),
        }
    }

    pub fn drone_id(&self) -> &str {
        &self.drone_id
    }

    pub fn dispatch(
        &self,
        machine: &mut FlightStateMachine,
        envelope: CommandEnvelope,
    ) -> Acknowledgement {
        let CommandEnvelope {
            command_id,
            command_type,
            parameters,
        } = envelope;

        let kind = match command_type.parse::<CommandKind>() {
            Ok(kind) => kind,
            Err(unknown) => {
                warn!(command_id = %command_id, "Unsupported command type: {}", unknown);
                return self.failed(command_id, format!("unsupported command type: {unknown}"));
            }
        };

        let current = machine.state().position.point();
        let command = match parse_command(kind, &parameters, current) {
            Ok(command) => command,
            Err(e) => {
                warn!(command_id = %command_id, command = %kind, "Invalid parameters: {}", e);
                return self.failed(command_id, format!("invalid parameters for {kind}: {e}"));
            }
        };

        match machine.handle(command) {
            Ok(message) => {
                info!(command_id = %command_id, command = %kind, "Command accepted");
                self.ack(command_id, AckStatus::Success, message)
            }
            Err(rejection) => {
                info!(command_id = %command_id, command = %kind, "Command rejected: {}", rejection);
                self.failed(command_id, rejection.to_string())
            }
        }
    }

    /// Dispatch an undecoded payload. Malformed JSON still yields a FAILED ack.
    pub fn dispatch_raw(&self, machine: &mut FlightStateMachine, payload: &[u8]) -> Acknowledgement {
        let value: Value = match serde_json::from_slice(payload) {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to parse command payload: {}", e);
                return self.failed(unknown_command_id(), format!("malformed command: {e}"));
            }
        };

        match serde_json::from_value::<CommandEnvelope>(value.clone()) {
            Ok(envelope) => self.dispatch(machine, envelope),
            Err(e) => {
                let command_id = value
                    .get("commandId")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(unknown_command_id);
                warn!(command_id = %command_id, "Malformed command envelope: {}", e);
                self.failed(command_id, format!("malformed command: {e}"))
            }
        }
    }

    fn failed(&self, command_id: String, message: String) -> Acknowledgement {
        self.ack(command_id, AckStatus::Failed, message)
    }

    fn ack(&self, command_id: String, status: AckStatus, message: String) -> Acknowledgement {
        Acknowledgement {
            command_id,
            drone_id: self.drone_id.clone(),
            timestamp: Utc::now(),
            status,
            message,
        }
    }
}
