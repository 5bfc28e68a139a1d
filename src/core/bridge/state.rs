use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Lifecycle of the whole bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BridgeState {
    /// Opening the serial device and waiting for the first client
    Starting,
    /// Both pumps forwarding frames
    Running,
    /// Cancellation requested, waiting for the pumps to exit
    Stopping,
    /// Both links closed
    Stopped,
}

impl std::fmt::Display for BridgeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeState::Starting => write!(f, "Starting"),
            BridgeState::Running => write!(f, "Running"),
            BridgeState::Stopping => write!(f, "Stopping"),
            BridgeState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Live counters updated by the pumps
#[derive(Debug, Default)]
pub struct BridgeStatistics {
    serial_to_network: AtomicU64,
    network_to_serial: AtomicU64,
    dropped_frames: AtomicU64,
    serial_reconnects: AtomicU64,
    clients_accepted: AtomicU64,
}

impl BridgeStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_serial_to_network(&self) {
        self.serial_to_network.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_network_to_serial(&self) {
        self.network_to_serial.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_serial_reconnect(&self) {
        self.serial_reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_client_accepted(&self) {
        self.clients_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            serial_to_network: self.serial_to_network.load(Ordering::Relaxed),
            network_to_serial: self.network_to_serial.load(Ordering::Relaxed),
            dropped_frames: self.dropped_frames.load(Ordering::Relaxed),
            serial_reconnects: self.serial_reconnects.load(Ordering::Relaxed),
            clients_accepted: self.clients_accepted.load(Ordering::Relaxed),
            // Counted by the links; see `Bridge::statistics`
            undecodable_frames: 0,
        }
    }
}

/// Point-in-time copy of [`BridgeStatistics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    /// Frames forwarded from the device to the client
    pub serial_to_network: u64,
    /// Frames forwarded from the client to the device
    pub network_to_serial: u64,
    /// Frames that could not be delivered (no client, failed send)
    pub dropped_frames: u64,
    /// Serial reopen after a link failure
    pub serial_reconnects: u64,
    /// Clients accepted, including replacements
    pub clients_accepted: u64,
    /// Input discarded by either link because it was not valid UTF-8
    #[serde(default)]
    pub undecodable_frames: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = BridgeStatistics::new();
        stats.record_serial_to_network();
        stats.record_serial_to_network();
        stats.record_network_to_serial();
        stats.record_dropped();
        stats.record_client_accepted();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.serial_to_network, 2);
        assert_eq!(snapshot.network_to_serial, 1);
        assert_eq!(snapshot.dropped_frames, 1);
        assert_eq!(snapshot.serial_reconnects, 0);
        assert_eq!(snapshot.clients_accepted, 1);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(BridgeState::Starting.to_string(), "Starting");
        assert_eq!(BridgeState::Stopped.to_string(), "Stopped");
    }
}
