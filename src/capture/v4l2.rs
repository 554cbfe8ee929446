//! V4L2 capture device using the v4l crate.
//!
//! The mmap stream borrows the device, so both live in one self-referencing
//! state that exists only while the device is open.

use super::{CaptureConfig, CaptureDevice, DeviceError, RawFrame};
use ouroboros::self_referencing;
use std::path::PathBuf;
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;

/// Pixel format requested from the driver.
const PIXEL_FORMAT: &[u8; 4] = b"YUYV";

/// Smallest mmap queue; drivers round this up to their own minimum.
const STREAM_BUFFERS: u32 = 1;

#[self_referencing]
struct OpenDevice {
    device: v4l::Device,
    #[borrows(device)]
    #[covariant]
    stream: MmapStream<'this>,
}

/// Linux V4L2 capture device.
#[derive(Default)]
pub struct V4l2Device {
    state: Option<OpenDevice>,
    node: Option<PathBuf>,
    width: u32,
    height: u32,
}

impl V4l2Device {
    /// Creates a closed device; the node is chosen on `open`.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CaptureDevice for V4l2Device {
    fn open(&mut self, config: &CaptureConfig) -> Result<(), DeviceError> {
        let node = config.device_node();
        if !node.exists() {
            return Err(DeviceError::DeviceNotFound(node.display().to_string()));
        }

        // Reopening replaces any stale stream.
        self.state = None;

        let mut device = v4l::Device::with_path(&node)
            .map_err(|err| DeviceError::OpenFailed(format!("{}: {err}", node.display())))?;

        let mut format = device
            .format()
            .map_err(|err| DeviceError::ConfigFailed(err.to_string()))?;
        format.width = config.width;
        format.height = config.height;
        format.fourcc = v4l::FourCC::new(PIXEL_FORMAT);

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                tracing::warn!(device = %node.display(), error = %err, "Failed to set format");
                device
                    .format()
                    .map_err(|err| DeviceError::ConfigFailed(err.to_string()))?
            }
        };

        let params = v4l::video::capture::Parameters::with_fps(config.fps);
        if let Err(err) = device.set_params(&params) {
            tracing::warn!(device = %node.display(), error = %err, "Failed to set frame rate");
        }

        let state = OpenDeviceTryBuilder {
            device,
            stream_builder: |device| {
                MmapStream::with_buffers(device, Type::VideoCapture, STREAM_BUFFERS)
                    .map_err(|err| DeviceError::OpenFailed(format!("create stream: {err}")))
            },
        }
        .try_build()?;

        tracing::info!(
            device = %node.display(),
            width = format.width,
            height = format.height,
            fps = config.fps,
            "V4L2 device opened"
        );

        self.width = format.width;
        self.height = format.height;
        self.node = Some(node);
        self.state = Some(state);
        Ok(())
    }

    fn read(&mut self) -> Result<RawFrame, DeviceError> {
        let state = self.state.as_mut().ok_or(DeviceError::NotOpen)?;

        let data = state
            .with_stream_mut(|stream| stream.next().map(|(buf, _meta)| buf.to_vec()))
            .map_err(|err| DeviceError::ReadFailed(err.to_string()))?;

        Ok(RawFrame::new(data, self.width, self.height))
    }

    fn is_open(&self) -> bool {
        self.state.is_some()
    }

    fn release(&mut self) -> Result<(), DeviceError> {
        // Dropping the stream stops streaming and unmaps the buffers.
        if self.state.take().is_some() {
            if let Some(node) = self.node.take() {
                tracing::info!(device = %node.display(), "V4L2 device released");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_node_reports_not_found() {
        let mut device = V4l2Device::new();
        let config = CaptureConfig {
            device_path: Some(PathBuf::from("/dev/does-not-exist-video99")),
            ..Default::default()
        };

        assert!(matches!(
            device.open(&config),
            Err(DeviceError::DeviceNotFound(_))
        ));
        assert!(!device.is_open());
    }

    #[test]
    fn test_read_before_open() {
        let mut device = V4l2Device::new();
        assert!(matches!(device.read(), Err(DeviceError::NotOpen)));
        assert!(device.release().is_ok());
    }
}
