//! Error types for the OpenEVSE status bridge
//!
//! Only configuration and startup registration errors ever reach the caller.
//! Transport, parse, validation and push errors are logged where they occur
//! and the affected update is dropped.

use thiserror::Error;

use crate::hap::Characteristic;

/// Configuration errors (fatal at startup)
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Neither an HTTP host nor an MQTT host is configured")]
    NoTransport,

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Unknown profile: {0}")]
    UnknownProfile(String),

    #[error("Config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Config read error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while obtaining telemetry from the charger
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Request timeout")]
    Timeout,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Status body is not a JSON object")]
    NotAnObject,

    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    #[error("Non-numeric payload on {topic}: {payload:?}")]
    InvalidPayload { topic: String, payload: String },

    #[error("MQTT connection error: {0}")]
    MqttConnection(#[from] rumqttc::ConnectionError),

    #[error("MQTT client error: {0}")]
    MqttClient(#[from] rumqttc::ClientError),
}

/// Validation errors raised by the update normalizer
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UpdateError {
    #[error("Unknown charger state: {0}")]
    UnknownState(i64),

    #[error("Charger state is not an integer: {0}")]
    InvalidState(String),
}

/// Errors reported by the host bridge
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("Service not registered: {0}")]
    UnknownService(String),

    #[error("Service already registered: {0}")]
    DuplicateService(String),

    #[error("Characteristic {characteristic:?} not exposed by service {service}")]
    UnknownCharacteristic {
        service: String,
        characteristic: Characteristic,
    },

    #[error("Host bridge unavailable: {0}")]
    Unavailable(String),
}

/// Any error surfaced by this crate
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Update(#[from] UpdateError),

    #[error(transparent)]
    Host(#[from] HostError),
}

pub type Result<T> = std::result::Result<T, Error>;
