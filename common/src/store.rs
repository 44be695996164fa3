use std::{cmp::Ordering, collections::BTreeMap, fmt};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::{
    thresholds::ThresholdConfig,
    types::{
        Actuator, ActuatorReport, ChartWindow, ControlMode, NutrientReading, SensorReading,
        SeriesPoint,
    },
};

/// A value together with the timestamp of the datum that wrote it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Stamped<T> {
    pub value: T,
    pub at: DateTime<Utc>,
}

impl<T> Stamped<T> {
    pub fn new(value: T, at: DateTime<Utc>) -> Self {
        Self { value, at }
    }
}

/// Newest timestamp wins. At an identical timestamp the larger value wins,
/// which keeps the result independent of delivery order.
fn merge_stamped<T: Copy + PartialOrd>(
    current: &mut Stamped<T>,
    value: T,
    at: DateTime<Utc>,
) -> bool {
    let replace = match at.cmp(&current.at) {
        Ordering::Greater => true,
        Ordering::Equal => value.partial_cmp(&current.value) == Some(Ordering::Greater),
        Ordering::Less => false,
    };
    if replace {
        *current = Stamped::new(value, at);
    }
    replace
}

fn merge_optional<T: Copy + PartialOrd>(
    current: &mut Option<Stamped<T>>,
    incoming: Option<T>,
    at: DateTime<Utc>,
) -> bool {
    let Some(value) = incoming else {
        return false;
    };
    match current {
        Some(current) => merge_stamped(current, value, at),
        None => {
            *current = Some(Stamped::new(value, at));
            true
        }
    }
}

fn fill_point(current: &mut Option<f64>, incoming: Option<f64>) -> bool {
    match (*current, incoming) {
        (None, Some(value)) => {
            *current = Some(value);
            true
        }
        (Some(existing), Some(value)) if value > existing => {
            *current = Some(value);
            true
        }
        _ => false,
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveReading {
    pub temperature: Option<Stamped<f64>>,
    pub humidity: Option<Stamped<f64>>,
    pub soil1: Option<Stamped<f64>>,
    pub soil2: Option<Stamped<f64>>,
    pub npk: Option<Stamped<NutrientReading>>,
}

impl LiveReading {
    pub fn latest_timestamp(&self) -> Option<DateTime<Utc>> {
        [
            self.temperature.map(|value| value.at),
            self.humidity.map(|value| value.at),
            self.soil1.map(|value| value.at),
            self.soil2.map(|value| value.at),
            self.npk.map(|value| value.at),
        ]
        .into_iter()
        .flatten()
        .max()
    }

    fn merge(&mut self, reading: &SensorReading) -> bool {
        let at = reading.timestamp;
        let mut changed = merge_optional(&mut self.temperature, reading.temperature, at);
        changed |= merge_optional(&mut self.humidity, reading.humidity, at);
        changed |= merge_optional(&mut self.soil1, reading.soil1, at);
        changed |= merge_optional(&mut self.soil2, reading.soil2, at);
        changed |= merge_optional(&mut self.npk, reading.npk, at);
        changed
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActuatorSlot {
    pub on: Stamped<bool>,
    pub pwm: Option<Stamped<u8>>,
}

/// Every named actuator always has a state once the map exists.
#[derive(Debug, Clone, PartialEq)]
pub struct ActuatorMap {
    slots: [ActuatorSlot; 6],
}

impl ActuatorMap {
    /// Builds the map from a report that names every actuator.
    pub fn from_report(report: &ActuatorReport, at: DateTime<Utc>) -> Option<Self> {
        let mut slots = [ActuatorSlot {
            on: Stamped::new(false, at),
            pwm: None,
        }; 6];
        for actuator in Actuator::ALL {
            slots[actuator.index()] = ActuatorSlot {
                on: Stamped::new(report.state(actuator)?, at),
                pwm: report.pwm(actuator).map(|pwm| Stamped::new(pwm, at)),
            };
        }
        Some(Self { slots })
    }

    pub fn slot(&self, actuator: Actuator) -> &ActuatorSlot {
        &self.slots[actuator.index()]
    }

    pub(crate) fn slot_mut(&mut self, actuator: Actuator) -> &mut ActuatorSlot {
        &mut self.slots[actuator.index()]
    }

    pub fn is_on(&self, actuator: Actuator) -> bool {
        self.slot(actuator).on.value
    }

    pub fn pwm(&self, actuator: Actuator) -> Option<u8> {
        self.slot(actuator).pwm.map(|pwm| pwm.value)
    }

    fn merge_one(
        &mut self,
        actuator: Actuator,
        state: Option<bool>,
        pwm: Option<u8>,
        at: DateTime<Utc>,
    ) -> bool {
        let slot = self.slot_mut(actuator);
        let mut changed = match state {
            Some(state) => merge_stamped(&mut slot.on, state, at),
            None => false,
        };
        if actuator.supports_pwm() {
            changed |= merge_optional(&mut slot.pwm, pwm, at);
        }
        changed
    }
}

/// Which parts of the snapshot an apply touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Changes {
    pub reading: bool,
    pub series: bool,
    pub actuators: bool,
    pub mode: bool,
    pub thresholds: bool,
}

impl Changes {
    pub fn any(self) -> bool {
        self.reading || self.series || self.actuators || self.mode || self.thresholds
    }
}

impl std::ops::BitOr for Changes {
    type Output = Changes;

    fn bitor(self, other: Changes) -> Changes {
        Changes {
            reading: self.reading || other.reading,
            series: self.series || other.series,
            actuators: self.actuators || other.actuators,
            mode: self.mode || other.mode,
            thresholds: self.thresholds || other.thresholds,
        }
    }
}

impl std::ops::BitOrAssign for Changes {
    fn bitor_assign(&mut self, other: Changes) {
        *self = *self | other;
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub reading: LiveReading,
    pub window: ChartWindow,
    pub series: Vec<SeriesPoint>,
    pub actuators: Option<ActuatorMap>,
    pub mode: Option<Stamped<ControlMode>>,
    pub thresholds: Option<ThresholdConfig>,
    thresholds_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    pub fn mode(&self) -> Option<ControlMode> {
        self.mode.map(|mode| mode.value)
    }

    pub fn view(&self, live: bool) -> SnapshotView {
        let value = |field: Option<Stamped<f64>>| field.map(|stamped| stamped.value);
        SnapshotView {
            last_update: self.reading.latest_timestamp(),
            temperature: value(self.reading.temperature),
            humidity: value(self.reading.humidity),
            soil1: value(self.reading.soil1),
            soil2: value(self.reading.soil2),
            npk: self.reading.npk.map(|npk| npk.value),
            mode: self.mode().map(ControlMode::as_str),
            manual_override: self.mode() == Some(ControlMode::Manual),
            actuators: self.actuators.as_ref().map(|map| {
                Actuator::ALL
                    .into_iter()
                    .map(|actuator| {
                        (
                            actuator.as_str(),
                            ActuatorView {
                                on: map.is_on(actuator),
                                pwm: map.pwm(actuator),
                            },
                        )
                    })
                    .collect()
            }),
            thresholds: self.thresholds.clone(),
            window: self.window,
            series: self.series.clone(),
            live,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ActuatorView {
    pub on: bool,
    pub pwm: Option<u8>,
}

/// Read-only projection handed to the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotView {
    #[serde(rename = "lastUpdate")]
    pub last_update: Option<DateTime<Utc>>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub soil1: Option<f64>,
    pub soil2: Option<f64>,
    pub npk: Option<NutrientReading>,
    pub mode: Option<&'static str>,
    #[serde(rename = "manualOverride")]
    pub manual_override: bool,
    pub actuators: Option<BTreeMap<&'static str, ActuatorView>>,
    pub thresholds: Option<ThresholdConfig>,
    pub window: ChartWindow,
    pub series: Vec<SeriesPoint>,
    pub live: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

pub type Observer = Box<dyn FnMut(&Snapshot, Changes) + Send>;

const LIVE_WINDOW_HOURS: i64 = 24;

/// Single owner of the last-known state. Observers run synchronously after
/// each apply has finished, and only when something actually changed.
#[derive(Default)]
pub struct SnapshotStore {
    snapshot: Snapshot,
    observers: Vec<(SubscriptionId, Observer)>,
    next_subscription: u64,
}

impl fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotStore")
            .field("snapshot", &self.snapshot)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn subscribe(&mut self, observer: Observer) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.observers.push((id, observer));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(existing, _)| *existing != id);
        self.observers.len() != before
    }

    /// Sensor fields, the embedded actuator block, and the live chart series.
    pub fn apply_reading(&mut self, reading: &SensorReading) -> Changes {
        self.mutate(|snapshot| {
            let mut changes = Changes {
                reading: snapshot.reading.merge(reading),
                series: false,
                ..Changes::default()
            };
            if snapshot.window.is_live() {
                changes.series = append_live_point(&mut snapshot.series, reading);
            }
            if let Some(report) = &reading.actuators {
                changes |= merge_actuator_report(snapshot, report, reading.timestamp);
            }
            changes
        })
    }

    pub fn apply_actuator_map(&mut self, report: &ActuatorReport, at: DateTime<Utc>) -> Changes {
        self.mutate(|snapshot| merge_actuator_report(snapshot, report, at))
    }

    /// Dropped while the map has not been populated by a complete report.
    pub fn apply_field_update(
        &mut self,
        actuator: Actuator,
        state: Option<bool>,
        pwm: Option<u8>,
        at: DateTime<Utc>,
    ) -> Changes {
        self.mutate(|snapshot| Changes {
            actuators: snapshot
                .actuators
                .as_mut()
                .is_some_and(|map| map.merge_one(actuator, state, pwm, at)),
            ..Changes::default()
        })
    }

    /// `fetched_at` stands in for the revision time when the backend omits
    /// `updatedAt`.
    pub fn apply_thresholds(
        &mut self,
        config: &ThresholdConfig,
        fetched_at: DateTime<Utc>,
    ) -> Changes {
        let at = config.updated_at.unwrap_or(fetched_at);
        self.mutate(|snapshot| {
            let changed = match (&mut snapshot.thresholds, snapshot.thresholds_at) {
                (Some(current), Some(current_at)) => match at.cmp(&current_at) {
                    Ordering::Less => false,
                    Ordering::Equal => merge_threshold_config(current, config, false),
                    Ordering::Greater => {
                        let changed = merge_threshold_config(current, config, true);
                        snapshot.thresholds_at = Some(at);
                        changed
                    }
                },
                _ => {
                    snapshot.thresholds = Some(config.clone());
                    snapshot.thresholds_at = Some(at);
                    true
                }
            };
            Changes {
                thresholds: changed,
                ..Changes::default()
            }
        })
    }

    /// Loads the chart series. A historical day is replaced outright; the
    /// live window keeps pushed points the pull has not caught up with yet.
    /// Points for a window that is no longer selected are discarded.
    pub fn apply_series(&mut self, window: ChartWindow, points: &[SensorReading]) -> Changes {
        self.mutate(|snapshot| {
            if snapshot.window != window {
                return Changes::default();
            }
            let mut series = if window.is_live() {
                snapshot.series.clone()
            } else {
                Vec::with_capacity(points.len())
            };
            for reading in points {
                if window.is_live() {
                    append_live_point(&mut series, reading);
                } else {
                    append_point(&mut series, reading);
                }
            }
            let changed = snapshot.series != series;
            if changed {
                snapshot.series = series;
            }
            Changes {
                series: changed,
                ..Changes::default()
            }
        })
    }

    pub fn set_window(&mut self, window: ChartWindow) -> Changes {
        self.mutate(|snapshot| {
            if snapshot.window == window {
                return Changes::default();
            }
            snapshot.window = window;
            snapshot.series.clear();
            Changes {
                series: true,
                ..Changes::default()
            }
        })
    }

    /// Applies `update` and notifies observers once, after it returns.
    pub(crate) fn mutate(&mut self, update: impl FnOnce(&mut Snapshot) -> Changes) -> Changes {
        let changes = update(&mut self.snapshot);
        if changes.any() {
            let snapshot = &self.snapshot;
            for (_, observer) in self.observers.iter_mut() {
                observer(snapshot, changes);
            }
        }
        changes
    }
}

fn merge_actuator_report(
    snapshot: &mut Snapshot,
    report: &ActuatorReport,
    at: DateTime<Utc>,
) -> Changes {
    let mut changes = Changes {
        mode: merge_optional(&mut snapshot.mode, report.mode(), at),
        ..Changes::default()
    };
    match snapshot.actuators.as_mut() {
        Some(map) => {
            for actuator in Actuator::ALL {
                changes.actuators |=
                    map.merge_one(actuator, report.state(actuator), report.pwm(actuator), at);
            }
        }
        None => {
            if let Some(map) = ActuatorMap::from_report(report, at) {
                snapshot.actuators = Some(map);
                changes.actuators = true;
            }
        }
    }
    changes
}

fn merge_threshold_config(
    current: &mut ThresholdConfig,
    incoming: &ThresholdConfig,
    overwrite: bool,
) -> bool {
    let mut changed = current.values.merge_from(&incoming.values, overwrite);
    for (slot, value) in [
        (&mut current.last_synced, incoming.last_synced),
        (&mut current.updated_at, incoming.updated_at),
    ] {
        if value.is_some() && (*slot < value) {
            *slot = value;
            changed = true;
        }
    }
    changed
}

fn append_point(series: &mut Vec<SeriesPoint>, reading: &SensorReading) -> bool {
    let incoming = SeriesPoint::from(reading);
    match series.binary_search_by(|point| point.timestamp.cmp(&reading.timestamp)) {
        Ok(index) => {
            let point = &mut series[index];
            let mut changed = fill_point(&mut point.temperature, incoming.temperature);
            changed |= fill_point(&mut point.humidity, incoming.humidity);
            changed |= fill_point(&mut point.soil1, incoming.soil1);
            changed |= fill_point(&mut point.soil2, incoming.soil2);
            changed
        }
        Err(index) => {
            series.insert(index, incoming);
            true
        }
    }
}

fn append_live_point(series: &mut Vec<SeriesPoint>, reading: &SensorReading) -> bool {
    let mut changed = append_point(series, reading);
    if let Some(newest) = series.last().map(|point| point.timestamp) {
        let cutoff = newest - Duration::hours(LIVE_WINDOW_HOURS);
        let before = series.len();
        series.retain(|point| point.timestamp >= cutoff);
        changed |= series.len() != before;
    }
    changed
}
