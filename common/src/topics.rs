pub const DEFAULT_EVENT_PREFIX: &str = "greenhouse/events";

pub const EVENT_READING: &str = "reading";
pub const EVENT_THRESHOLD_CHANGED: &str = "threshold_changed";
pub const EVENT_ACTUATOR_CHANGED: &str = "actuator_changed";

// Older backends still publish under the socket event names.
pub const LEGACY_EVENT_READING: &str = "new_reading";
pub const LEGACY_EVENT_THRESHOLD_CHANGED: &str = "threshold_update";
pub const LEGACY_EVENT_ACTUATOR_CHANGED: &str = "manual_control";

pub const PATH_SENSORS_LATEST: &str = "/sensors/latest";
pub const PATH_SENSORS_24H: &str = "/sensors/24h";
pub const PATH_SENSORS_BY_DATE: &str = "/sensors/date";
pub const PATH_THRESHOLDS: &str = "/thresholds";
pub const PATH_MANUAL_CONTROL: &str = "/manual/control";
pub const PATH_MANUAL_RESUME: &str = "/manual/resume-auto";

pub fn event_topic(prefix: &str, event: &str) -> String {
    format!("{prefix}/{event}")
}

/// Wildcard filter covering every event under `prefix`.
pub fn event_filter(prefix: &str) -> String {
    format!("{prefix}/+")
}
