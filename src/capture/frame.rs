//! Frame types produced by capture devices and the capture worker.

use chrono::{DateTime, Utc};

/// Image bytes returned by a single device read.
#[derive(Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Raw image payload in the device's native pixel format.
    pub data: Vec<u8>,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
}

impl RawFrame {
    /// Creates a frame from a device payload.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
        }
    }
}

impl std::fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// A captured frame stamped by the capture worker.
///
/// Records are never mutated after creation. Readers take ownership when
/// they pop one from the frame buffer.
#[derive(Clone)]
pub struct FrameRecord {
    /// Raw image payload.
    data: Vec<u8>,
    /// Frame width in pixels.
    width: u32,
    /// Frame height in pixels.
    height: u32,
    /// Wall-clock capture time.
    captured_at: DateTime<Utc>,
    /// Monotonic sequence number within one supervisor.
    sequence: u64,
}

impl FrameRecord {
    /// Stamps a raw frame with the current time.
    pub fn new(raw: RawFrame, sequence: u64) -> Self {
        Self {
            data: raw.data,
            width: raw.width,
            height: raw.height,
            captured_at: Utc::now(),
            sequence,
        }
    }

    /// Returns the raw image payload.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Returns the frame width.
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Returns the frame height.
    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Returns the wall-clock capture timestamp.
    #[inline]
    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Returns the sequence number.
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Splits the record into its payload and capture timestamp.
    pub fn into_parts(self) -> (Vec<u8>, DateTime<Utc>) {
        (self.data, self.captured_at)
    }
}

impl std::fmt::Debug for FrameRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameRecord")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("captured_at", &self.captured_at)
            .field("bytes", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_creation() {
        let before = Utc::now();
        let record = FrameRecord::new(RawFrame::new(vec![7u8; 12], 4, 3), 9);

        assert_eq!(record.width(), 4);
        assert_eq!(record.height(), 3);
        assert_eq!(record.sequence(), 9);
        assert_eq!(record.data().len(), 12);
        assert!(record.captured_at() >= before);
    }

    #[test]
    fn test_into_parts() {
        let record = FrameRecord::new(RawFrame::new(vec![1, 2, 3], 3, 1), 1);
        let stamp = record.captured_at();

        let (bytes, captured_at) = record.into_parts();
        assert_eq!(bytes, vec![1, 2, 3]);
        assert_eq!(captured_at, stamp);
    }
}
