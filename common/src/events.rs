use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::{
    connectivity::{ChannelSignal, ConnectivityMonitor},
    store::{Changes, SnapshotStore},
    topics::{
        EVENT_ACTUATOR_CHANGED, EVENT_READING, EVENT_THRESHOLD_CHANGED,
        LEGACY_EVENT_ACTUATOR_CHANGED, LEGACY_EVENT_READING, LEGACY_EVENT_THRESHOLD_CHANGED,
    },
    types::{Actuator, SensorReading, SyncAction},
};

pub const MAX_EVENT_PAYLOAD_BYTES: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("{topic}: payload of {len} bytes exceeds {MAX_EVENT_PAYLOAD_BYTES}")]
    Oversized { topic: String, len: usize },
    #[error("{topic}: {source}")]
    Json {
        topic: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Another client changed one actuator.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ActuatorChange {
    #[serde(alias = "actuatorName")]
    pub actuator: String,
    pub state: bool,
    #[serde(default)]
    pub pwm: Option<u8>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    Reading(SensorReading),
    /// Carries no payload worth trusting; the canonical values are re-pulled.
    ThresholdChanged,
    ActuatorChanged(ActuatorChange),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Push(PushEvent),
    Lifecycle(ChannelSignal),
}

impl PushEvent {
    /// Classifies a message by the last segment of its topic. Unknown kinds
    /// decode to `None` and are ignored.
    pub fn decode(prefix: &str, topic: &str, payload: &[u8]) -> Result<Option<Self>, DecodeError> {
        let Some(kind) = topic
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('/'))
        else {
            return Ok(None);
        };

        if payload.len() > MAX_EVENT_PAYLOAD_BYTES {
            return Err(DecodeError::Oversized {
                topic: topic.to_string(),
                len: payload.len(),
            });
        }
        let json_error = |source| DecodeError::Json {
            topic: topic.to_string(),
            source,
        };

        let event = match kind {
            EVENT_READING | LEGACY_EVENT_READING => {
                Self::Reading(serde_json::from_slice(payload).map_err(json_error)?)
            }
            EVENT_THRESHOLD_CHANGED | LEGACY_EVENT_THRESHOLD_CHANGED => Self::ThresholdChanged,
            EVENT_ACTUATOR_CHANGED | LEGACY_EVENT_ACTUATOR_CHANGED => {
                Self::ActuatorChanged(serde_json::from_slice(payload).map_err(json_error)?)
            }
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

/// What a dispatched event did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Routed {
    pub changes: Changes,
    pub actions: Vec<SyncAction>,
    /// New liveness, when a lifecycle signal flipped it.
    pub live: Option<bool>,
    /// Actuator name that did not match any known actuator.
    pub ignored: Option<String>,
}

/// Single dispatch point for everything arriving on the push channel.
/// Routes only; merge policy lives in the store.
pub fn route(
    event: &ChannelEvent,
    store: &mut SnapshotStore,
    connectivity: &mut ConnectivityMonitor,
    now: DateTime<Utc>,
) -> Routed {
    match event {
        ChannelEvent::Lifecycle(signal) => Routed {
            live: connectivity
                .on_signal(*signal, now)
                .then(|| connectivity.is_live()),
            ..Routed::default()
        },
        ChannelEvent::Push(PushEvent::Reading(reading)) => Routed {
            changes: store.apply_reading(reading),
            ..Routed::default()
        },
        ChannelEvent::Push(PushEvent::ThresholdChanged) => Routed {
            actions: vec![SyncAction::RefreshThresholds],
            ..Routed::default()
        },
        ChannelEvent::Push(PushEvent::ActuatorChanged(change)) => {
            let Ok(actuator) = change.actuator.parse::<Actuator>() else {
                return Routed {
                    ignored: Some(change.actuator.clone()),
                    ..Routed::default()
                };
            };
            Routed {
                changes: store.apply_field_update(
                    actuator,
                    Some(change.state),
                    change.pwm,
                    change.timestamp.unwrap_or(now),
                ),
                ..Routed::default()
            }
        }
    }
}
