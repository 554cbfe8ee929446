//! Camera devices, frames and frame buffering.
//!
//! This module provides the device abstraction the supervisor drives, a
//! mock device for tests and demos, and the bounded buffer that decouples
//! the capture worker from frame consumers.

mod buffer;
mod config;
mod device;
mod frame;
#[cfg(feature = "v4l2")]
mod v4l2;

pub use buffer::FrameBuffer;
pub use config::{CaptureConfig, ConfigError, FileConfig, ServerConfig, MAX_DIMENSION};
pub use device::{CaptureDevice, DeviceError, MockControl, MockDevice};
pub use frame::{FrameRecord, RawFrame};
#[cfg(feature = "v4l2")]
pub use v4l2::V4l2Device;
