pub mod dispatch;
pub mod flight;
pub mod geodesic;
pub mod models;
pub mod profile;
pub mod record;
pub mod telemetry;
pub mod trajectory;

pub use dispatch::{
    parse_command, AckStatus, Acknowledgement, CommandEnvelope, Dispatcher, ParameterError,
};
pub use flight::{CommandRejection, FlightCommand, FlightStateMachine, PatrolRequest};
pub use models::{
    CommandKind, DisarmPolicy, FlightState, GeoPoint, Position, VehicleState, Waypoint,
    GROUND_THRESHOLD_M,
};
pub use profile::{BatteryDrain, FlightProfile};
pub use record::{random_start, state_file_name, PersistedState};
pub use telemetry::{FarewellMessage, TelemetryEnvelope, TrajectoryInfo};
pub use trajectory::{PatrolShape, Trajectory, TrajectoryError, TrajectoryKind};
