//! Agent configuration from environment.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use dronesim_core::{DisarmPolicy, FlightProfile};

const ENV_PREFIX: &str = "DRONESIM_";

#[derive(Debug, Clone)]
pub struct Config {
    pub backend_url: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub model: String,
    /// Serial number to register with; generated when absent
    pub serial_number: Option<String>,
    /// Skip registration and run as this already-approved drone
    pub drone_id: Option<String>,
    pub telemetry_interval: Duration,
    pub poll_interval: Duration,
    pub max_polls: u32,
    pub persist_interval: Duration,
    pub state_dir: PathBuf,
    pub disarm_policy: DisarmPolicy,
    /// Optional JSON file overriding flight constants
    pub profile_path: Option<PathBuf>,
    pub shutdown_grace: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:8080/api/v1".to_string(),
            mqtt_host: "localhost".to_string(),
            mqtt_port: 1883,
            model: "SimDrone-X2".to_string(),
            serial_number: None,
            drone_id: None,
            telemetry_interval: Duration::from_secs(5),
            poll_interval: Duration::from_secs(10),
            max_polls: 60,
            persist_interval: Duration::from_secs(30),
            state_dir: PathBuf::from("."),
            disarm_policy: DisarmPolicy::OnTouchdown,
            profile_path: None,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable values keep the default,
    /// as do zero tick, poll and persist intervals.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.is_empty());
        let parse = |name: &str| get(name).and_then(|v| v.trim().parse::<u64>().ok());
        let interval = |name: &str| parse(name).filter(|secs| *secs > 0).map(Duration::from_secs);
        let defaults = Self::default();

        Self {
            backend_url: get("BACKEND_URL").unwrap_or(defaults.backend_url),
            mqtt_host: get("MQTT_HOST").unwrap_or(defaults.mqtt_host),
            mqtt_port: get("MQTT_PORT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.mqtt_port),
            model: get("MODEL").unwrap_or(defaults.model),
            serial_number: get("SERIAL"),
            drone_id: get("DRONE_ID"),
            telemetry_interval: interval("TELEMETRY_INTERVAL_SECS")
                .unwrap_or(defaults.telemetry_interval),
            poll_interval: interval("POLL_INTERVAL_SECS").unwrap_or(defaults.poll_interval),
            max_polls: get("MAX_POLLS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_polls),
            persist_interval: interval("PERSIST_INTERVAL_SECS")
                .unwrap_or(defaults.persist_interval),
            state_dir: get("STATE_DIR").map(PathBuf::from).unwrap_or(defaults.state_dir),
            disarm_policy: get("DISARM_POLICY")
                .and_then(|s| DisarmPolicy::from_str(&s).ok())
                .unwrap_or(defaults.disarm_policy),
            profile_path: get("PROFILE").map(PathBuf::from),
            shutdown_grace: parse("SHUTDOWN_GRACE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_grace),
        }
    }

    /// Flight constants: defaults, or the JSON file at `profile_path`.
    pub fn load_profile(&self) -> Result<FlightProfile> {
        let Some(path) = &self.profile_path else {
            return Ok(FlightProfile::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read flight profile {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid flight profile {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = Config::from_lookup(lookup(&[]));
        assert_eq!(config.backend_url, "http://localhost:8080/api/v1");
        assert_eq!(config.mqtt_port, 1883);
        assert_eq!(config.telemetry_interval, Duration::from_secs(5));
        assert_eq!(config.persist_interval, Duration::from_secs(30));
        assert_eq!(config.max_polls, 60);
        assert_eq!(config.disarm_policy, DisarmPolicy::OnTouchdown);
        assert!(config.drone_id.is_none());
    }

    #[test]
    fn env_values_override_defaults() {
        let config = Config::from_lookup(lookup(&[
            ("DRONESIM_MQTT_HOST", "broker"),
            ("DRONESIM_MQTT_PORT", "8883"),
            ("DRONESIM_DRONE_ID", "abc"),
            ("DRONESIM_TELEMETRY_INTERVAL_SECS", "2"),
            ("DRONESIM_DISARM_POLICY", "manual"),
            ("DRONESIM_STATE_DIR", "/var/lib/dronesim"),
        ]));
        assert_eq!(config.mqtt_host, "broker");
        assert_eq!(config.mqtt_port, 8883);
        assert_eq!(config.drone_id.as_deref(), Some("abc"));
        assert_eq!(config.telemetry_interval, Duration::from_secs(2));
        assert_eq!(config.disarm_policy, DisarmPolicy::Manual);
        assert_eq!(config.state_dir, PathBuf::from("/var/lib/dronesim"));
    }

    #[test]
    fn bad_values_fall_back() {
        let config = Config::from_lookup(lookup(&[
            ("DRONESIM_MQTT_PORT", "not-a-port"),
            ("DRONESIM_DISARM_POLICY", "sometimes"),
            ("DRONESIM_SERIAL", ""),
        ]));
        assert_eq!(config.mqtt_port, 1883);
        assert_eq!(config.disarm_policy, DisarmPolicy::OnTouchdown);
        assert!(config.serial_number.is_none());
    }

    #[test]
    fn zero_intervals_keep_defaults() {
        let config = Config::from_lookup(lookup(&[
            ("DRONESIM_TELEMETRY_INTERVAL_SECS", "0"),
            ("DRONESIM_POLL_INTERVAL_SECS", "0"),
            ("DRONESIM_PERSIST_INTERVAL_SECS", "0"),
            ("DRONESIM_SHUTDOWN_GRACE_SECS", "0"),
        ]));
        let defaults = Config::default();
        assert_eq!(config.telemetry_interval, defaults.telemetry_interval);
        assert_eq!(config.poll_interval, defaults.poll_interval);
        assert_eq!(config.persist_interval, defaults.persist_interval);
        assert_eq!(config.shutdown_grace, Duration::ZERO);
    }

    #[test]
    fn default_profile_without_path() {
        let config = Config::default();
        assert_eq!(config.load_profile().unwrap(), FlightProfile::default());
    }
}
