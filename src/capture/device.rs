//! Capture device abstraction.
//!
//! A [`CaptureDevice`] is a pure resource wrapper: it opens, configures,
//! reads and releases hardware and carries no retry or buffering policy.
//! The supervisor serializes every call behind its own lock.

use super::{CaptureConfig, RawFrame};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during device operations.
#[derive(Debug, Clone, Error)]
pub enum DeviceError {
    #[error("capture device not found: {0}")]
    DeviceNotFound(String),
    #[error("failed to open capture device: {0}")]
    OpenFailed(String),
    #[error("failed to configure capture device: {0}")]
    ConfigFailed(String),
    #[error("failed to read frame: {0}")]
    ReadFailed(String),
    #[error("capture device not open")]
    NotOpen,
    #[error("failed to release capture device: {0}")]
    ReleaseFailed(String),
}

/// Trait for capture device implementations.
///
/// Implementations must be `Send` so the supervisor can hand the device to
/// its worker thread.
pub trait CaptureDevice: Send {
    /// Opens and configures the device.
    ///
    /// Implementations should request the smallest internal buffer queue the
    /// driver accepts so reads return the newest frame.
    fn open(&mut self, config: &CaptureConfig) -> Result<(), DeviceError>;

    /// Blocks until the next frame is available.
    fn read(&mut self) -> Result<RawFrame, DeviceError>;

    /// Checks if the device is currently open.
    fn is_open(&self) -> bool;

    /// Releases the device. Calling this on a closed device is a no-op.
    fn release(&mut self) -> Result<(), DeviceError>;
}

impl<D: CaptureDevice + ?Sized> CaptureDevice for Box<D> {
    fn open(&mut self, config: &CaptureConfig) -> Result<(), DeviceError> {
        (**self).open(config)
    }

    fn read(&mut self) -> Result<RawFrame, DeviceError> {
        (**self).read()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn release(&mut self) -> Result<(), DeviceError> {
        (**self).release()
    }
}

#[derive(Debug, Default)]
struct MockFlags {
    missing: AtomicBool,
    refuse_open: AtomicBool,
    fail_reads: AtomicBool,
    fail_release: AtomicBool,
    opens: AtomicU64,
    reads: AtomicU64,
    releases: AtomicU64,
}

/// Shared switches for injecting faults into a [`MockDevice`].
///
/// The control stays usable after the device has been moved into a
/// supervisor, which is how tests simulate unplugging a camera.
#[derive(Debug, Clone, Default)]
pub struct MockControl {
    flags: Arc<MockFlags>,
}

impl MockControl {
    /// Makes subsequent opens fail with `DeviceNotFound`.
    pub fn set_missing(&self, missing: bool) {
        self.flags.missing.store(missing, Ordering::SeqCst);
    }

    /// Makes subsequent opens fail with `OpenFailed`.
    pub fn set_refuse_open(&self, refuse: bool) {
        self.flags.refuse_open.store(refuse, Ordering::SeqCst);
    }

    /// Makes subsequent reads fail with `ReadFailed`.
    pub fn set_fail_reads(&self, fail: bool) {
        self.flags.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent releases report an error.
    pub fn set_fail_release(&self, fail: bool) {
        self.flags.fail_release.store(fail, Ordering::SeqCst);
    }

    /// Number of open calls, successful or not.
    pub fn opens(&self) -> u64 {
        self.flags.opens.load(Ordering::SeqCst)
    }

    /// Number of successful reads.
    pub fn reads(&self) -> u64 {
        self.flags.reads.load(Ordering::SeqCst)
    }

    /// Number of release calls that found the device open.
    pub fn releases(&self) -> u64 {
        self.flags.releases.load(Ordering::SeqCst)
    }
}

/// Mock device that generates synthetic frames paced at the configured rate.
#[derive(Debug, Default)]
pub struct MockDevice {
    config: Option<CaptureConfig>,
    sequence: u64,
    control: MockControl,
}

impl MockDevice {
    /// Creates a closed mock device with no faults injected.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a handle for injecting faults after the device is moved.
    pub fn control(&self) -> MockControl {
        self.control.clone()
    }
}

impl CaptureDevice for MockDevice {
    fn open(&mut self, config: &CaptureConfig) -> Result<(), DeviceError> {
        let flags = &self.control.flags;
        flags.opens.fetch_add(1, Ordering::SeqCst);

        if flags.missing.load(Ordering::SeqCst) {
            return Err(DeviceError::DeviceNotFound(
                config.device_node().display().to_string(),
            ));
        }
        if flags.refuse_open.load(Ordering::SeqCst) {
            return Err(DeviceError::OpenFailed("mock device refused open".to_owned()));
        }
        config
            .validate()
            .map_err(|e| DeviceError::ConfigFailed(e.to_string()))?;

        self.config = Some(config.clone());
        tracing::info!(
            width = config.width,
            height = config.height,
            fps = config.fps,
            "MockDevice opened"
        );
        Ok(())
    }

    fn read(&mut self) -> Result<RawFrame, DeviceError> {
        let config = self.config.as_ref().ok_or(DeviceError::NotOpen)?;

        std::thread::sleep(config.frame_interval());

        if self.control.flags.fail_reads.load(Ordering::SeqCst) {
            return Err(DeviceError::ReadFailed("mock device unplugged".to_owned()));
        }

        // Deterministic pattern; content only matters for sizing tests.
        let pixel_count = (config.width as usize)
            .checked_mul(config.height as usize)
            .ok_or_else(|| {
                DeviceError::ConfigFailed(format!(
                    "frame size {}x{} overflows",
                    config.width, config.height
                ))
            })?;
        let pixels: Vec<u8> = (0..pixel_count)
            .map(|i| ((i as u64 ^ self.sequence) % 256) as u8)
            .collect();

        self.sequence += 1;
        self.control.flags.reads.fetch_add(1, Ordering::SeqCst);
        Ok(RawFrame::new(pixels, config.width, config.height))
    }

    fn is_open(&self) -> bool {
        self.config.is_some()
    }

    fn release(&mut self) -> Result<(), DeviceError> {
        if self.config.take().is_none() {
            return Ok(());
        }
        self.control.flags.releases.fetch_add(1, Ordering::SeqCst);
        tracing::info!("MockDevice released");

        if self.control.flags.fail_release.load(Ordering::SeqCst) {
            return Err(DeviceError::ReleaseFailed(
                "mock device release error".to_owned(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> CaptureConfig {
        CaptureConfig {
            fps: 120,
            ..CaptureConfig::with_dimensions(8, 6)
        }
    }

    #[test]
    fn test_mock_device_lifecycle() {
        let mut device = MockDevice::new();
        let config = small_config();

        assert!(!device.is_open());

        device.open(&config).unwrap();
        assert!(device.is_open());

        let frame = device.read().unwrap();
        assert_eq!(frame.data.len(), 48);
        assert_eq!((frame.width, frame.height), (8, 6));

        device.release().unwrap();
        assert!(!device.is_open());
    }

    #[test]
    fn test_open_rejects_oversized_frames() {
        let mut device = MockDevice::new();
        let config = CaptureConfig::with_dimensions(65536, 65536);

        assert!(matches!(
            device.open(&config),
            Err(DeviceError::ConfigFailed(_))
        ));
        assert!(!device.is_open());
    }

    #[test]
    fn test_read_without_open() {
        let mut device = MockDevice::new();
        assert!(matches!(device.read(), Err(DeviceError::NotOpen)));
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut device = MockDevice::new();
        let control = device.control();

        device.release().unwrap();
        device.open(&small_config()).unwrap();
        device.release().unwrap();
        device.release().unwrap();

        assert_eq!(control.releases(), 1);
    }

    #[test]
    fn test_fault_injection() {
        let mut device = MockDevice::new();
        let control = device.control();
        let config = small_config();

        control.set_missing(true);
        assert!(matches!(
            device.open(&config),
            Err(DeviceError::DeviceNotFound(_))
        ));

        control.set_missing(false);
        control.set_refuse_open(true);
        assert!(matches!(device.open(&config), Err(DeviceError::OpenFailed(_))));

        control.set_refuse_open(false);
        device.open(&config).unwrap();
        control.set_fail_reads(true);
        assert!(matches!(device.read(), Err(DeviceError::ReadFailed(_))));
        assert_eq!(control.opens(), 3);
        assert_eq!(control.reads(), 0);
    }

    #[test]
    fn test_boxed_device_delegates() {
        let inner = MockDevice::new();
        let control = inner.control();
        let mut device: Box<dyn CaptureDevice> = Box::new(inner);

        device.open(&small_config()).unwrap();
        device.read().unwrap();
        assert!(device.is_open());
        assert_eq!(control.reads(), 1);
    }
}
