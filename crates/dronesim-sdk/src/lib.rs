//! Backend and broker connectivity for the simulated drone.
//!
//! [`BackendClient`] drives the registration handshake over HTTP;
//! [`MqttLink`] carries telemetry, commands and acknowledgements.

pub mod client;
pub mod link;
pub mod topics;

pub use client::{BackendClient, DroneInfo, MqttCredentials, RegisterRequest, RegistrationStatus};
pub use link::{client_id, IncomingMessage, LinkOptions, LinkPublisher, MqttLink};
pub use rumqttc::QoS;
pub use topics::Topics;
