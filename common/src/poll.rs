use chrono::{DateTime, Utc};

use crate::{
    store::{Changes, SnapshotStore},
    thresholds::ThresholdConfig,
    types::{ChartWindow, SensorReading},
};

/// A series pull tagged with the window generation it was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeriesRequest {
    pub window: ChartWindow,
    generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pull {
    Latest,
    Thresholds,
    Series(SeriesRequest),
}

/// Decides what to pull and when a pulled result is still wanted. Results go
/// through the same store merges as push events.
#[derive(Debug, Clone, Default)]
pub struct PollScheduler {
    window: ChartWindow,
    generation: u64,
}

impl PollScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn window(&self) -> ChartWindow {
        self.window
    }

    fn series(&self) -> Pull {
        Pull::Series(SeriesRequest {
            window: self.window,
            generation: self.generation,
        })
    }

    pub fn initial_pull(&self) -> Vec<Pull> {
        vec![Pull::Latest, Pull::Thresholds, self.series()]
    }

    pub fn refresh_now(&self) -> Vec<Pull> {
        self.initial_pull()
    }

    /// Runs on the fixed cadence whether or not the push channel is up.
    pub fn periodic(&self) -> Vec<Pull> {
        vec![Pull::Latest]
    }

    /// Only the series is re-pulled for a new window.
    pub fn select_window(
        &mut self,
        store: &mut SnapshotStore,
        window: ChartWindow,
    ) -> Option<Pull> {
        if window == self.window {
            return None;
        }
        self.window = window;
        self.generation += 1;
        store.set_window(window);
        Some(self.series())
    }

    pub fn apply_latest(&self, store: &mut SnapshotStore, reading: &SensorReading) -> Changes {
        store.apply_reading(reading)
    }

    pub fn apply_thresholds(
        &self,
        store: &mut SnapshotStore,
        config: &ThresholdConfig,
        fetched_at: DateTime<Utc>,
    ) -> Changes {
        store.apply_thresholds(config, fetched_at)
    }

    /// Returns `None` when the window has moved on since the request went out.
    pub fn apply_series(
        &self,
        store: &mut SnapshotStore,
        request: SeriesRequest,
        points: &[SensorReading],
    ) -> Option<Changes> {
        if request.generation != self.generation {
            return None;
        }
        Some(store.apply_series(request.window, points))
    }
}
