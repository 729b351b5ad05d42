//! Backend client for drone registration and metadata lookup.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Client for the fleet backend REST API.
#[derive(Debug, Clone)]
pub struct BackendClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub serial_number: String,
    pub model: String,
    pub notes: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub request_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegistrationStatus {
    PendingApproval,
    Approved,
    Rejected,
    #[serde(other)]
    Unknown,
}

/// Broker access granted on approval.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MqttCredentials {
    pub mqtt_broker_url: Option<String>,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_topic_telemetry: Option<String>,
    pub mqtt_topic_commands: Option<String>,
}

impl MqttCredentials {
    /// Host and port from `mqttBrokerUrl` (`tcp://host:port`), falling back
    /// to the given defaults for whatever is missing.
    pub fn broker_address(&self, default_host: &str, default_port: u16) -> (String, u16) {
        let Some(url) = self.mqtt_broker_url.as_deref() else {
            return (default_host.to_string(), default_port);
        };
        let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
        let (host, port) = match without_scheme.rsplit_once(':') {
            Some((host, port)) => (host, port.trim_end_matches('/').parse().ok()),
            None => (without_scheme.trim_end_matches('/'), None),
        };
        let host = if host.is_empty() { default_host } else { host };
        (host.to_string(), port.unwrap_or(default_port))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationStatusResponse {
    pub status: RegistrationStatus,
    #[serde(default)]
    pub drone_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub mqtt_credentials: Option<MqttCredentials>,
}

/// Static metadata for an already registered drone.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DroneInfo {
    pub serial_number: String,
    pub model: String,
    #[serde(default)]
    pub current_status: Option<String>,
}

impl DroneInfo {
    /// Placeholder metadata used when the backend cannot be reached.
    pub fn fallback(drone_id: &str) -> Self {
        let short: String = drone_id.chars().take(8).collect();
        Self {
            serial_number: format!("SIM-{short}"),
            model: "Simulator".to_string(),
            current_status: None,
        }
    }
}

impl BackendClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Submit a registration request. Returns the request id to poll.
    pub async fn register(&self, request: &RegisterRequest) -> Result<String> {
        let url = format!("{}/drones/register", self.base_url);
        let response = self.client.post(&url).json(request).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("Registration failed: {}", response.status());
        }
        let body: RegisterResponse = response
            .json()
            .await
            .context("invalid registration response")?;
        Ok(body.request_id)
    }

    pub async fn registration_status(&self, request_id: &str) -> Result<RegistrationStatusResponse> {
        let url = format!("{}/drones/registration/{}/status", self.base_url, request_id);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("Registration status query failed: {}", response.status());
        }
        Ok(response
            .json()
            .await
            .context("invalid registration status response")?)
    }

    pub async fn drone_info(&self, drone_id: &str) -> Result<DroneInfo> {
        let url = format!("{}/drones/{}", self.base_url, drone_id);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("Drone lookup failed: {}", response.status());
        }
        Ok(response.json().await.context("invalid drone info response")?)
    }

    /// Like [`Self::drone_info`] but never fails.
    pub async fn drone_info_or_fallback(&self, drone_id: &str) -> DroneInfo {
        match self.drone_info(drone_id).await {
            Ok(info) => info,
            Err(err) => {
                tracing::warn!("Failed to fetch drone info for {}: {} (using defaults)", drone_id, err);
                DroneInfo::fallback(drone_id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_address_parses_tcp_url() {
        let creds = MqttCredentials {
            mqtt_broker_url: Some("tcp://broker.local:1884".to_string()),
            ..Default::default()
        };
        assert_eq!(
            creds.broker_address("localhost", 1883),
            ("broker.local".to_string(), 1884)
        );
    }

    #[test]
    fn broker_address_falls_back_to_defaults() {
        let creds = MqttCredentials::default();
        assert_eq!(creds.broker_address("localhost", 1883), ("localhost".to_string(), 1883));

        let creds = MqttCredentials {
            mqtt_broker_url: Some("tcp://broker.local".to_string()),
            ..Default::default()
        };
        assert_eq!(
            creds.broker_address("localhost", 1883),
            ("broker.local".to_string(), 1883)
        );
    }

    #[test]
    fn status_response_tolerates_unknown_status_and_missing_fields() {
        let body = r#"{"status": "PENDING_APPROVAL"}"#;
        let parsed: RegistrationStatusResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.status, RegistrationStatus::PendingApproval);
        assert!(parsed.mqtt_credentials.is_none());

        let body = r#"{"status": "ARCHIVED", "droneId": "abc"}"#;
        let parsed: RegistrationStatusResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.status, RegistrationStatus::Unknown);
    }

    #[test]
    fn approved_response_carries_credentials() {
        let body = r#"{
            "status": "APPROVED",
            "droneId": "9b2f6a70-1f5e-4c2e-9d8b-6f1f0d7c2a11",
            "mqttCredentials": {
                "mqttBrokerUrl": "tcp://10.0.0.5:1883",
                "mqttUsername": "drone",
                "mqttPassword": "secret",
                "mqttTopicTelemetry": "drones/9b2f/telemetry",
                "mqttTopicCommands": "drones/9b2f/commands"
            }
        }"#;
        let parsed: RegistrationStatusResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.status, RegistrationStatus::Approved);
        let creds = parsed.mqtt_credentials.unwrap();
        assert_eq!(creds.mqtt_username.as_deref(), Some("drone"));
        assert_eq!(creds.broker_address("localhost", 1), ("10.0.0.5".to_string(), 1883));
    }

    #[test]
    fn fallback_info_uses_short_id() {
        let info = DroneInfo::fallback("9b2f6a70-1f5e");
        assert_eq!(info.serial_number, "SIM-9b2f6a70");
        assert_eq!(info.model, "Simulator");
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = BackendClient::new("http://localhost:8080/api/v1/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:8080/api/v1");
    }
}
