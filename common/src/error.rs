use thiserror::Error;

use crate::{thresholds::ThresholdField, types::Actuator};

/// Rejections that are decided locally, before anything reaches the network.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("unknown actuator '{0}'")]
    UnknownActuator(String),
    #[error("pwm value {value} for {actuator} is outside 0-255")]
    PwmOutOfRange { actuator: Actuator, value: i64 },
    #[error("{0} does not accept a pwm value")]
    PwmNotSupported(Actuator),
    #[error("actuator state has not been synchronized yet")]
    NotSynced,
    #[error("unknown threshold field '{0}'")]
    UnknownThresholdField(String),
    #[error("threshold {0} must be a finite number")]
    NonFiniteThreshold(ThresholdField),
    #[error("bulk threshold commit is missing {}", join_fields(.0))]
    IncompleteBulk(Vec<ThresholdField>),
}

/// A pull or push that failed in flight.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("{endpoint} request failed: {message}")]
    Request { endpoint: String, message: String },
    #[error("{endpoint} returned status {status}")]
    Status { endpoint: String, status: u16 },
    #[error("{endpoint} returned an unreadable body: {message}")]
    Decode { endpoint: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

fn join_fields(fields: &[ThresholdField]) -> String {
    fields
        .iter()
        .map(|field| field.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
