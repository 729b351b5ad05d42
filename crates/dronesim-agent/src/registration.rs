//! Registration handshake with the fleet backend.

use std::time::Duration;

use anyhow::{bail, Result};
use dronesim_sdk::{BackendClient, MqttCredentials, RegisterRequest, RegistrationStatus};
use tokio::time::sleep;
use tracing::{info, warn};

const REGISTRATION_NOTES: &str = "Synthetic vehicle from dronesim-agent";

/// Identity the agent runs under once the backend knows about it.
#[derive(Debug, Clone)]
pub struct Registration {
    pub drone_id: String,
    pub serial_number: String,
    pub model: String,
    /// Broker access from the approval; `None` for pre-registered drones
    pub credentials: Option<MqttCredentials>,
}

/// Configured serial number, or a fresh `SIM-XXXXXXXXXXXX`.
pub fn serial_number(configured: Option<String>) -> String {
    configured.filter(|s| !s.trim().is_empty()).unwrap_or_else(|| {
        let id = uuid::Uuid::new_v4().simple().to_string().to_uppercase();
        format!("SIM-{}", &id[..12])
    })
}

/// Submit a registration and poll until an operator approves it.
///
/// Approval without credentials keeps polling, as the backend may still be
/// provisioning the broker account. Rejection or an exhausted poll budget is
/// an error.
pub async fn register_and_wait(
    backend: &BackendClient,
    serial_number: &str,
    model: &str,
    poll_interval: Duration,
    max_polls: u32,
) -> Result<Registration> {
    let request = RegisterRequest {
        serial_number: serial_number.to_string(),
        model: model.to_string(),
        notes: REGISTRATION_NOTES.to_string(),
    };
    let request_id = backend.register(&request).await?;
    info!(
        "Registration submitted for {} (request {}), waiting for approval",
        serial_number, request_id
    );

    for attempt in 1..=max_polls {
        sleep(poll_interval).await;

        let status = match backend.registration_status(&request_id).await {
            Ok(status) => status,
            Err(err) => {
                warn!("Registration status check {}/{} failed: {:#}", attempt, max_polls, err);
                continue;
            }
        };

        match status.status {
            RegistrationStatus::Approved => match (status.drone_id, status.mqtt_credentials) {
                (Some(drone_id), Some(credentials)) => {
                    info!("Registration approved, drone id {}", drone_id);
                    return Ok(Registration {
                        drone_id,
                        serial_number: serial_number.to_string(),
                        model: model.to_string(),
                        credentials: Some(credentials),
                    });
                }
                _ => info!("Approved but credentials not issued yet ({}/{})", attempt, max_polls),
            },
            RegistrationStatus::Rejected => {
                bail!(
                    "Registration rejected: {}",
                    status.message.unwrap_or_else(|| "no reason given".to_string())
                );
            }
            RegistrationStatus::PendingApproval | RegistrationStatus::Unknown => {
                info!("Waiting for approval ({}/{})", attempt, max_polls);
            }
        }
    }

    bail!("Registration not approved after {} polls", max_polls)
}

/// Run as an already registered drone, looking up its static metadata.
pub async fn existing(backend: &BackendClient, drone_id: &str) -> Registration {
    let info = backend.drone_info_or_fallback(drone_id).await;
    info!(
        "Using existing drone {} (serial {}, model {})",
        drone_id, info.serial_number, info.model
    );
    Registration {
        drone_id: drone_id.to_string(),
        serial_number: info.serial_number,
        model: info.model,
        credentials: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_serial_is_kept() {
        assert_eq!(serial_number(Some("SN-42".to_string())), "SN-42");
    }

    #[test]
    fn generated_serial_format() {
        for configured in [None, Some("  ".to_string())] {
            let serial = serial_number(configured);
            assert!(serial.starts_with("SIM-"));
            assert_eq!(serial.len(), 16);
            assert!(serial[4..]
                .chars()
                .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
        }
    }
}
