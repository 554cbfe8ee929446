//! Prometheus metrics and the HTTP control surface.
//!
//! The registry is always available and is fed from
//! [`StatusSnapshot`](crate::supervisor::StatusSnapshot)s. The HTTP server
//! is behind the `metrics` feature.
//!
//! # Metrics Exposed
//!
//! ## State Metrics
//! - `camera_capture_running` - Worker running (1=running, 0=stopped)
//! - `camera_capture_connected` - Device open (1=connected, 0=not connected)
//! - `camera_capture_reconnect_attempts` - Attempts since the last connection
//!
//! ## Buffer Metrics
//! - `camera_capture_queue_size` - Frames currently buffered
//! - `camera_capture_queue_capacity` - Frame buffer capacity
//! - `camera_capture_frames_dropped_total` - Frames evicted before being read
//!
//! ## Capture Metrics
//! - `camera_capture_frames_captured_total` - Frames read from the device
//! - `camera_capture_connection_errors_total` - Read and reconnect failures
//! - `camera_capture_uptime_seconds` - Seconds since the supervisor was created
//! - `camera_capture_last_frame_age_seconds` - Seconds since the last frame
//!
//! # Endpoints
//!
//! - `GET /metrics` - Prometheus text format
//! - `GET /health` - Liveness with frame freshness
//! - `GET /status` - Supervisor status as JSON
//! - `GET /config` - Active capture configuration as JSON
//! - `POST /camera/restart` - Restart capture
//! - `POST /server/reload-config` - Re-read the configuration file
//! - `POST /server/shutdown` - Request graceful process shutdown
//!
//! # Example
//!
//! ```no_run
//! use camera_supervisor::capture::{CaptureConfig, MockDevice};
//! use camera_supervisor::metrics::MetricsRegistry;
//! use camera_supervisor::supervisor::Supervisor;
//!
//! let registry = MetricsRegistry::new().expect("Failed to create registry");
//! let supervisor = Supervisor::new(CaptureConfig::default(), MockDevice::new())
//!     .expect("Invalid configuration");
//!
//! registry.update(&supervisor.get_status());
//! println!("{}", registry.encode().expect("Failed to encode metrics"));
//! ```

mod collector;
#[cfg(feature = "metrics")]
mod server;

pub use collector::{MetricsError, MetricsRegistry};
#[cfg(feature = "metrics")]
pub use server::{ConfigSource, MetricsServer, MetricsServerConfig, ServerError};
