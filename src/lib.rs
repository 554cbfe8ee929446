//! Camera Capture Supervisor Library
//!
//! Keeps one camera device producing frames for as long as the process
//! runs. A background worker reads frames into a small bounded buffer,
//! releases the device when reads fail and re-opens it under a bounded
//! retry policy.
//!
//! # Architecture
//!
//! ```text
//! device → worker → frame buffer → get_frame
//!             ↓
//!     reconnect policy, stats → get_status → metrics
//! ```
//!
//! # Design Principles
//!
//! - **Freshness over completeness**: a full buffer evicts its oldest frame
//! - **Bounded recovery**: reconnects stop after a fixed number of attempts
//! - **Responsive control**: status reads and stop never wait on a reconnect
//! - **Pluggable devices**: V4L2 behind the `v4l2` feature, a mock for tests
//!
//! # Example
//!
//! ```no_run
//! use camera_supervisor::{CaptureConfig, MockDevice, Supervisor};
//! use std::time::Duration;
//!
//! let supervisor = Supervisor::new(CaptureConfig::default(), MockDevice::new()).unwrap();
//!
//! if supervisor.start() {
//!     for _ in 0..10 {
//!         if let Some(frame) = supervisor.get_frame(Duration::from_secs(1)) {
//!             println!("frame {} ({} bytes)", frame.sequence(), frame.data().len());
//!         }
//!     }
//! }
//!
//! println!("{:?}", supervisor.get_status());
//! supervisor.stop();
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod capture;
pub mod metrics;
pub mod reconnect;
pub mod supervisor;

// Re-export commonly used types at crate root
pub use capture::{
    CaptureConfig, CaptureDevice, DeviceError, FileConfig, FrameBuffer, FrameRecord, MockDevice,
    RawFrame,
};
pub use reconnect::{ReconnectError, ReconnectPolicy};
pub use supervisor::{
    CaptureState, StartError, StatusSnapshot, Supervisor, SupervisorSlot, SupervisorTimings,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
