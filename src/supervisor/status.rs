//! Capture state, counters and status snapshots.

use crate::capture::CaptureConfig;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;

/// Lifecycle state of a supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    /// No worker is running.
    Stopped,
    /// Worker running with the device open.
    Connected,
    /// Worker running, device lost and not yet retried.
    Disconnected,
    /// Worker waiting for or performing a reconnect attempt.
    Reconnecting,
}

impl CaptureState {
    /// Returns true for every state except `Stopped`.
    pub fn is_running(self) -> bool {
        self != Self::Stopped
    }

    /// Returns true only while the device is open and producing frames.
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

impl std::fmt::Display for CaptureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// Counters owned by the capture worker.
///
/// Lives behind the supervisor lock; readers only ever see copies.
#[derive(Debug, Clone)]
pub(crate) struct Stats {
    pub frames_captured: u64,
    pub connection_errors: u64,
    pub last_reconnect: Option<DateTime<Utc>>,
    pub last_frame_at: Option<Instant>,
    started_at: DateTime<Utc>,
    started_instant: Instant,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            frames_captured: 0,
            connection_errors: 0,
            last_reconnect: None,
            last_frame_at: None,
            started_at: Utc::now(),
            started_instant: Instant::now(),
        }
    }

    /// Copies the counters and derives time-based fields.
    pub fn snapshot(&self, frames_dropped: u64, now: Instant) -> StatsSnapshot {
        StatsSnapshot {
            frames_captured: self.frames_captured,
            frames_dropped,
            connection_errors: self.connection_errors,
            last_reconnect: self.last_reconnect,
            started_at: self.started_at,
            uptime_secs: now.duration_since(self.started_instant).as_secs_f64(),
            last_frame_age_secs: self
                .last_frame_at
                .map(|at| now.duration_since(at).as_secs_f64()),
        }
    }
}

/// Point-in-time copy of the capture counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    /// Frames read from the device.
    pub frames_captured: u64,
    /// Frames evicted from the buffer before a reader took them.
    pub frames_dropped: u64,
    /// Read failures and failed reconnect opens.
    pub connection_errors: u64,
    /// Time of the last successful reconnect.
    pub last_reconnect: Option<DateTime<Utc>>,
    /// Time the supervisor was created.
    pub started_at: DateTime<Utc>,
    /// Seconds since the supervisor was created.
    pub uptime_secs: f64,
    /// Seconds since the last captured frame, absent if none yet.
    pub last_frame_age_secs: Option<f64>,
}

/// Consistent view of supervisor state for reporting.
///
/// Serializes to a single flat JSON object with the configuration nested
/// under `config`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    /// Lifecycle state at the time of the snapshot.
    pub state: CaptureState,
    /// Whether a worker owns the device.
    pub is_running: bool,
    /// Whether the device is open and producing frames.
    pub is_connected: bool,
    /// Frames currently buffered.
    pub queue_size: usize,
    /// Frame buffer capacity.
    pub queue_capacity: usize,
    /// Reconnect attempts since the last successful connection.
    pub reconnect_attempts: u32,
    /// Counters, flattened into the top-level JSON object.
    #[serde(flatten)]
    pub stats: StatsSnapshot,
    /// Configuration the supervisor was built with.
    pub config: CaptureConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_state_flags() {
        assert!(!CaptureState::Stopped.is_running());
        assert!(CaptureState::Reconnecting.is_running());
        assert!(CaptureState::Disconnected.is_running());
        assert!(CaptureState::Connected.is_connected());
        assert!(!CaptureState::Reconnecting.is_connected());
    }

    #[test]
    fn test_snapshot_without_frames() {
        let stats = Stats::new();
        let snapshot = stats.snapshot(0, Instant::now());

        assert_eq!(snapshot.frames_captured, 0);
        assert!(snapshot.last_frame_age_secs.is_none());
        assert!(snapshot.last_reconnect.is_none());
        assert!(snapshot.uptime_secs >= 0.0);
    }

    #[test]
    fn test_snapshot_derives_ages() {
        let mut stats = Stats::new();
        let captured = Instant::now();
        stats.last_frame_at = Some(captured);
        stats.frames_captured = 4;

        let snapshot = stats.snapshot(1, captured + Duration::from_millis(1500));

        assert_eq!(snapshot.frames_dropped, 1);
        let age = snapshot.last_frame_age_secs.unwrap();
        assert!((age - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_status_serializes_flat() {
        let snapshot = StatusSnapshot {
            state: CaptureState::Reconnecting,
            is_running: true,
            is_connected: false,
            queue_size: 0,
            queue_capacity: 2,
            reconnect_attempts: 2,
            stats: Stats::new().snapshot(0, Instant::now()),
            config: CaptureConfig::default(),
        };

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["state"], "reconnecting");
        assert_eq!(json["reconnect_attempts"], 2);
        assert_eq!(json["frames_captured"], 0);
        assert!(json["last_frame_age_secs"].is_null());
        assert_eq!(json["config"]["buffer_size"], 2);
        assert_eq!(json["config"]["reconnect_interval"], 5);
    }
}
