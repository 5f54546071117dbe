/// Bus liveness bookkeeping.
///
/// Counters only ever grow (until an explicit reset). `connected` and `tx_capable` are not
/// stored: they compare the last timestamps against `now` whenever somebody asks.
use std::time::{Duration, Instant};

use serde::Serialize;
use strum::Display;

/// No valid telegram for this long means the bus is gone.
pub const BUS_TIMEOUT: Duration = Duration::from_millis(15_000);
/// No poll for us for this long means we cannot transmit.
pub const POLL_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Whether an exchange is outstanding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Display)]
pub enum TxStatus {
    #[default]
    Idle,
    Wait,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
pub enum BusHealth {
    Connected,
    /// Telegrams arrive but the master stopped polling us.
    TxErrors,
    Offline,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusStatus {
    pub rx_packets: u64,
    pub tx_packets: u64,
    pub crc_errors: u64,
    pub retry_count: u64,
    pub last_rx: Option<Instant>,
    pub last_poll: Option<Instant>,
    pub tx_status: TxStatus,
}

impl BusStatus {
    pub fn connected(&self, now: Instant) -> bool {
        is_recent(self.last_rx, now, BUS_TIMEOUT)
    }

    pub fn tx_capable(&self, now: Instant) -> bool {
        is_recent(self.last_poll, now, POLL_TIMEOUT)
    }

    pub fn health(&self, now: Instant) -> BusHealth {
        if !self.connected(now) {
            BusHealth::Offline
        } else if !self.tx_capable(now) {
            BusHealth::TxErrors
        } else {
            BusHealth::Connected
        }
    }

    /// Zero the counters, keep timestamps and tx status.
    pub fn reset_counters(&mut self) {
        self.rx_packets = 0;
        self.tx_packets = 0;
        self.crc_errors = 0;
        self.retry_count = 0;
    }

    pub fn report(&self, now: Instant, queue_len: usize) -> StatusReport {
        StatusReport {
            health: self.health(now),
            connected: self.connected(now),
            tx_capable: self.tx_capable(now),
            tx_status: self.tx_status,
            rx_packets: self.rx_packets,
            tx_packets: self.tx_packets,
            crc_errors: self.crc_errors,
            retry_count: self.retry_count,
            last_rx_ms: self.last_rx.map(|t| millis_since(t, now)),
            last_poll_ms: self.last_poll.map(|t| millis_since(t, now)),
            queue_len,
        }
    }
}

/// Serializable view of [`BusStatus`] with the predicates evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub health: BusHealth,
    pub connected: bool,
    pub tx_capable: bool,
    pub tx_status: TxStatus,
    pub rx_packets: u64,
    pub tx_packets: u64,
    pub crc_errors: u64,
    pub retry_count: u64,
    /// Age of the last valid telegram.
    pub last_rx_ms: Option<u64>,
    /// Age of the last poll addressed to us.
    pub last_poll_ms: Option<u64>,
    pub queue_len: usize,
}

fn is_recent(stamp: Option<Instant>, now: Instant, limit: Duration) -> bool {
    stamp.is_some_and(|t| now.saturating_duration_since(t) < limit)
}

fn millis_since(stamp: Instant, now: Instant) -> u64 {
    now.saturating_duration_since(stamp).as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicates_are_false_before_any_traffic() {
        let status = BusStatus::default();
        let now = Instant::now();
        assert!(!status.connected(now));
        assert!(!status.tx_capable(now));
        assert_eq!(status.health(now), BusHealth::Offline);
    }

    #[test]
    fn test_predicates_age_out() {
        let start = Instant::now();
        let status = BusStatus {
            last_rx: Some(start),
            last_poll: Some(start),
            ..Default::default()
        };

        assert_eq!(status.health(start), BusHealth::Connected);

        let later = start + Duration::from_millis(5_000);
        assert!(status.connected(later));
        assert!(!status.tx_capable(later));
        assert_eq!(status.health(later), BusHealth::TxErrors);

        let much_later = start + Duration::from_millis(15_000);
        assert!(!status.connected(much_later));
        assert_eq!(status.health(much_later), BusHealth::Offline);
    }

    #[test]
    fn test_reset_counters_keeps_timestamps() {
        let now = Instant::now();
        let mut status = BusStatus {
            rx_packets: 4,
            tx_packets: 3,
            crc_errors: 2,
            retry_count: 1,
            last_rx: Some(now),
            ..Default::default()
        };
        status.reset_counters();
        assert_eq!(status.rx_packets + status.tx_packets, 0);
        assert_eq!(status.crc_errors + status.retry_count, 0);
        assert!(status.connected(now));
    }

    #[test]
    fn test_report_ages() {
        let start = Instant::now();
        let status = BusStatus {
            last_rx: Some(start),
            ..Default::default()
        };
        let report = status.report(start + Duration::from_millis(1_200), 3);
        assert_eq!(report.last_rx_ms, Some(1_200));
        assert_eq!(report.last_poll_ms, None);
        assert_eq!(report.queue_len, 3);
        assert_eq!(report.health, BusHealth::TxErrors);
    }
}
