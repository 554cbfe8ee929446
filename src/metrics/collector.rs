//! Metrics collection and registry.

use crate::supervisor::StatusSnapshot;
use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// Prometheus metrics registry for capture monitoring.
pub struct MetricsRegistry {
    registry: Registry,
    // Totals from the previous update; held for the whole update so
    // concurrent scrapes add each delta once.
    seen: Mutex<SeenTotals>,

    // State metrics
    running: IntGauge,
    connected: IntGauge,
    reconnect_attempts: IntGauge,

    // Buffer metrics
    queue_size: IntGauge,
    queue_capacity: IntGauge,

    // Counters
    frames_captured: IntCounter,
    frames_dropped: IntCounter,
    connection_errors: IntCounter,

    // Timing metrics
    uptime_seconds: Gauge,
    last_frame_age_seconds: Gauge,
}

impl MetricsRegistry {
    /// Creates a new metrics registry with all capture metrics registered.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let running = IntGauge::new(
            "camera_capture_running",
            "Whether the capture worker is running (1=running, 0=stopped)",
        )?;
        let connected = IntGauge::new(
            "camera_capture_connected",
            "Whether the capture device is open (1=connected, 0=not connected)",
        )?;
        let reconnect_attempts = IntGauge::new(
            "camera_capture_reconnect_attempts",
            "Reconnect attempts since the last successful connection",
        )?;

        let queue_size = IntGauge::new(
            "camera_capture_queue_size",
            "Frames currently buffered",
        )?;
        let queue_capacity = IntGauge::new(
            "camera_capture_queue_capacity",
            "Frame buffer capacity",
        )?;

        let frames_captured = IntCounter::new(
            "camera_capture_frames_captured_total",
            "Total frames read from the device",
        )?;
        let frames_dropped = IntCounter::new(
            "camera_capture_frames_dropped_total",
            "Total frames evicted from the buffer before being read",
        )?;
        let connection_errors = IntCounter::new(
            "camera_capture_connection_errors_total",
            "Total read failures and failed reconnect attempts",
        )?;

        let uptime_seconds = Gauge::new(
            "camera_capture_uptime_seconds",
            "Seconds since the supervisor was created",
        )?;
        let last_frame_age_seconds = Gauge::new(
            "camera_capture_last_frame_age_seconds",
            "Seconds since the last captured frame",
        )?;

        registry.register(Box::new(running.clone()))?;
        registry.register(Box::new(connected.clone()))?;
        registry.register(Box::new(reconnect_attempts.clone()))?;
        registry.register(Box::new(queue_size.clone()))?;
        registry.register(Box::new(queue_capacity.clone()))?;
        registry.register(Box::new(frames_captured.clone()))?;
        registry.register(Box::new(frames_dropped.clone()))?;
        registry.register(Box::new(connection_errors.clone()))?;
        registry.register(Box::new(uptime_seconds.clone()))?;
        registry.register(Box::new(last_frame_age_seconds.clone()))?;

        Ok(Self {
            registry,
            seen: Mutex::new(SeenTotals::default()),
            running,
            connected,
            reconnect_attempts,
            queue_size,
            queue_capacity,
            frames_captured,
            frames_dropped,
            connection_errors,
            uptime_seconds,
            last_frame_age_seconds,
        })
    }

    /// Updates all metrics from a supervisor status snapshot.
    pub fn update(&self, status: &StatusSnapshot) {
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);

        self.running.set(i64::from(status.is_running));
        self.connected.set(i64::from(status.is_connected));
        self.reconnect_attempts.set(i64::from(status.reconnect_attempts));

        self.queue_size.set(status.queue_size as i64);
        self.queue_capacity.set(status.queue_capacity as i64);

        advance(&self.frames_captured, &mut seen.frames_captured, status.stats.frames_captured);
        advance(&self.frames_dropped, &mut seen.frames_dropped, status.stats.frames_dropped);
        advance(
            &self.connection_errors,
            &mut seen.connection_errors,
            status.stats.connection_errors,
        );

        self.uptime_seconds.set(status.stats.uptime_secs);
        if let Some(age) = status.stats.last_frame_age_secs {
            self.last_frame_age_seconds.set(age);
        }
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

/// Supervisor totals observed by the previous update.
#[derive(Debug, Default)]
struct SeenTotals {
    frames_captured: u64,
    frames_dropped: u64,
    connection_errors: u64,
}

/// Adds the growth of `total` since the last update to `counter`.
///
/// A total below the last one means a reloaded supervisor started counting
/// from zero, so all of it is new.
fn advance(counter: &IntCounter, seen: &mut u64, total: u64) {
    let delta = if total >= *seen { total - *seen } else { total };
    if delta > 0 {
        counter.inc_by(delta);
    }
    *seen = total;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureConfig, MockDevice};
    use crate::supervisor::Supervisor;

    fn stopped_status() -> StatusSnapshot {
        let supervisor = Supervisor::new(CaptureConfig::default(), MockDevice::new()).unwrap();
        supervisor.get_status()
    }

    #[test]
    fn test_registry_creation() {
        let registry = MetricsRegistry::new();
        assert!(registry.is_ok());
    }

    #[test]
    fn test_metrics_update() {
        let registry = MetricsRegistry::new().unwrap();

        let mut status = stopped_status();
        status.is_running = true;
        status.is_connected = true;
        status.queue_size = 1;
        status.stats.frames_captured = 42;
        status.stats.frames_dropped = 3;
        status.stats.last_frame_age_secs = Some(0.5);

        registry.update(&status);

        let output = registry.encode().unwrap();
        assert!(output.contains("camera_capture_running 1"));
        assert!(output.contains("camera_capture_connected 1"));
        assert!(output.contains("camera_capture_queue_capacity 2"));
        assert!(output.contains("camera_capture_frames_captured_total 42"));
        assert!(output.contains("camera_capture_frames_dropped_total 3"));
        assert!(output.contains("camera_capture_last_frame_age_seconds 0.5"));
    }

    #[test]
    fn test_counters_add_only_growth() {
        let registry = MetricsRegistry::new().unwrap();

        let mut status = stopped_status();
        status.stats.connection_errors = 5;
        registry.update(&status);
        registry.update(&status);

        status.stats.connection_errors = 8;
        registry.update(&status);

        let output = registry.encode().unwrap();
        assert!(output.contains("camera_capture_connection_errors_total 8"));
    }

    #[test]
    fn test_counters_continue_after_supervisor_replaced() {
        let registry = MetricsRegistry::new().unwrap();

        let mut status = stopped_status();
        status.stats.connection_errors = 5;
        registry.update(&status);

        // A replacement supervisor reports its own totals from zero.
        status.stats.connection_errors = 2;
        registry.update(&status);

        let output = registry.encode().unwrap();
        assert!(output.contains("camera_capture_connection_errors_total 7"));
    }

    #[test]
    fn test_concurrent_updates_count_once() {
        let registry = MetricsRegistry::new().unwrap();
        let mut status = stopped_status();
        status.stats.frames_captured = 1000;

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..100 {
                        registry.update(&status);
                    }
                });
            }
        });

        let output = registry.encode().unwrap();
        assert!(output.contains("camera_capture_frames_captured_total 1000"));
    }

    #[test]
    fn test_metrics_encode() {
        let registry = MetricsRegistry::new().unwrap();
        let output = registry.encode().unwrap();

        assert!(output.contains("camera_capture_running"));
        assert!(output.contains("camera_capture_frames_captured_total"));
        assert!(output.contains("camera_capture_queue_size"));
    }
}
