//! MQTT topic naming.

pub fn telemetry(drone_id: &str) -> String {
    format!("drones/{drone_id}/telemetry")
}

pub fn commands(drone_id: &str) -> String {
    format!("drones/{drone_id}/commands")
}

pub fn responses(drone_id: &str) -> String {
    format!("drones/{drone_id}/responses")
}

/// Topics used by one vehicle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub telemetry: String,
    pub commands: String,
    pub responses: String,
}

impl Topics {
    pub fn for_drone(drone_id: &str) -> Self {
        Self {
            telemetry: telemetry(drone_id),
            commands: commands(drone_id),
            responses: responses(drone_id),
        }
    }

    /// Replace telemetry/command topics with ones handed out at registration.
    pub fn with_overrides(mut self, telemetry: Option<String>, commands: Option<String>) -> Self {
        if let Some(topic) = telemetry.filter(|t| !t.is_empty()) {
            self.telemetry = topic;
        }
        if let Some(topic) = commands.filter(|t| !t.is_empty()) {
            self.commands = topic;
        }
        self
    }
}
