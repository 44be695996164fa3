use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelSignal {
    Connected,
    Disconnected,
    ReconnectAttempt,
}

/// Push-channel liveness. `live` mirrors the channel's connected state and
/// nothing else; it says nothing about whether data has arrived.
#[derive(Debug, Clone, Default)]
pub struct ConnectivityMonitor {
    live: bool,
    reconnect_attempts: u32,
    last_change: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivityStatus {
    pub live: bool,
    pub reconnect_attempts: u32,
    pub last_change: Option<DateTime<Utc>>,
}

impl ConnectivityMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn status(&self) -> ConnectivityStatus {
        ConnectivityStatus {
            live: self.live,
            reconnect_attempts: self.reconnect_attempts,
            last_change: self.last_change,
        }
    }

    /// Returns true when `live` flipped.
    pub fn on_signal(&mut self, signal: ChannelSignal, now: DateTime<Utc>) -> bool {
        let live = match signal {
            ChannelSignal::Connected => {
                self.reconnect_attempts = 0;
                true
            }
            ChannelSignal::Disconnected => false,
            ChannelSignal::ReconnectAttempt => {
                self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
                false
            }
        };
        if live == self.live {
            return false;
        }
        self.live = live;
        self.last_change = Some(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, second).unwrap()
    }

    #[test]
    fn starts_offline() {
        let monitor = ConnectivityMonitor::new();
        assert!(!monitor.is_live());
        assert_eq!(monitor.status().last_change, None);
    }

    #[test]
    fn disconnect_flips_immediately() {
        let mut monitor = ConnectivityMonitor::new();
        assert!(monitor.on_signal(ChannelSignal::Connected, at(0)));
        assert!(monitor.is_live());

        assert!(monitor.on_signal(ChannelSignal::Disconnected, at(1)));
        assert!(!monitor.is_live());
        assert_eq!(monitor.status().last_change, Some(at(1)));

        assert!(!monitor.on_signal(ChannelSignal::Disconnected, at(2)));
        assert_eq!(monitor.status().last_change, Some(at(1)));
    }

    #[test]
    fn reconnect_attempts_reset_on_connect() {
        let mut monitor = ConnectivityMonitor::new();
        monitor.on_signal(ChannelSignal::Connected, at(0));
        monitor.on_signal(ChannelSignal::Disconnected, at(1));
        assert!(!monitor.on_signal(ChannelSignal::ReconnectAttempt, at(3)));
        monitor.on_signal(ChannelSignal::ReconnectAttempt, at(5));
        assert_eq!(monitor.status().reconnect_attempts, 2);

        assert!(monitor.on_signal(ChannelSignal::Connected, at(6)));
        assert_eq!(
            monitor.status(),
            ConnectivityStatus {
                live: true,
                reconnect_attempts: 0,
                last_change: Some(at(6)),
            }
        );
    }
}
