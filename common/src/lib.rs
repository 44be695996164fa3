pub mod config;
pub mod connectivity;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod poll;
pub mod store;
pub mod thresholds;
pub mod topics;
pub mod types;

pub use config::{ApiConfig, DashboardConfig, MqttConfig};
pub use connectivity::{ChannelSignal, ConnectivityMonitor, ConnectivityStatus};
pub use coordinator::{
    ActuatorCommand, CommandId, CommandOutcome, ControlCoordinator, PendingCommand, ResumeOutcome,
    ResumePlan, RESUME_PROMPT,
};
pub use error::{SyncError, TransportError, ValidationError};
pub use events::{route, ActuatorChange, ChannelEvent, DecodeError, PushEvent, Routed};
pub use poll::{PollScheduler, Pull, SeriesRequest};
pub use store::{
    ActuatorMap, ActuatorSlot, Changes, Observer, Snapshot, SnapshotStore, SnapshotView, Stamped,
    SubscriptionId,
};
pub use thresholds::{
    ThresholdCommit, ThresholdConfig, ThresholdDraft, ThresholdField, ThresholdValues,
};
pub use topics::*;
pub use types::{
    Actuator, ActuatorReport, ChartWindow, ControlMode, NutrientReading, SensorReading,
    SeriesPoint, SyncAction,
};
