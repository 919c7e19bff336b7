//! Core traits and types for the capture pipeline.
//!
//! [`CaptureDevice`] is the ioctl-level protocol spoken with the driver. The
//! real implementation is [`crate::device::DeviceHandle`]; tests run the same
//! components against an in-process mock.

use std::fmt;
use std::io;
use std::str::FromStr;
use std::time::Duration;

/// Pixel format representation (e.g., YUYV, MJPG, RGB3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// YUYV pixel format (4:2:2 packed).
    pub const YUYV: Self = Self::new(b"YUYV");
    /// MJPEG pixel format (Motion JPEG).
    pub const MJPG: Self = Self::new(b"MJPG");
    /// RGB3 pixel format (24-bit RGB).
    pub const RGB3: Self = Self::new(b"RGB3");

    /// The code as the kernel stores it in `pixelformat`.
    #[must_use]
    pub const fn to_u32(self) -> u32 {
        u32::from_le_bytes(self.0)
    }

    /// Decode a kernel `pixelformat` value.
    #[must_use]
    pub const fn from_u32(code: u32) -> Self {
        Self(code.to_le_bytes())
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            let ch = if byte.is_ascii_graphic() || byte == b' ' {
                char::from(byte)
            } else {
                '.'
            };
            write!(f, "{ch}")?;
        }
        Ok(())
    }
}

impl FromStr for FourCC {
    type Err = String;

    fn from_str(code: &str) -> Result<Self, Self::Err> {
        let bytes: [u8; 4] = code
            .as_bytes()
            .try_into()
            .map_err(|_| format!("pixel format must be 4 characters, got {code:?}"))?;
        if !bytes.iter().all(u8::is_ascii) {
            return Err(format!("pixel format must be ASCII, got {code:?}"));
        }
        Ok(Self(bytes))
    }
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

/// Field order of the captured image, mirroring `enum v4l2_field`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOrder {
    /// Driver chooses.
    Any,
    /// Progressive.
    None,
    /// Top field only.
    Top,
    /// Bottom field only.
    Bottom,
    /// Both fields interlaced.
    Interlaced,
    /// Both fields sequential, top first.
    SeqTb,
    /// Both fields sequential, bottom first.
    SeqBt,
    /// Fields alternate between buffers.
    Alternate,
    /// Interlaced, top field first.
    InterlacedTb,
    /// Interlaced, bottom field first.
    InterlacedBt,
    /// A value this crate does not know.
    Unknown(u32),
}

impl From<u32> for FieldOrder {
    fn from(raw: u32) -> Self {
        match raw {
            0 => Self::Any,
            1 => Self::None,
            2 => Self::Top,
            3 => Self::Bottom,
            4 => Self::Interlaced,
            5 => Self::SeqTb,
            6 => Self::SeqBt,
            7 => Self::Alternate,
            8 => Self::InterlacedTb,
            9 => Self::InterlacedBt,
            other => Self::Unknown(other),
        }
    }
}

impl From<FieldOrder> for u32 {
    fn from(field: FieldOrder) -> Self {
        match field {
            FieldOrder::Any => 0,
            FieldOrder::None => 1,
            FieldOrder::Top => 2,
            FieldOrder::Bottom => 3,
            FieldOrder::Interlaced => 4,
            FieldOrder::SeqTb => 5,
            FieldOrder::SeqBt => 6,
            FieldOrder::Alternate => 7,
            FieldOrder::InterlacedTb => 8,
            FieldOrder::InterlacedBt => 9,
            FieldOrder::Unknown(other) => other,
        }
    }
}

/// Single-planar capture format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureFormat {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format.
    pub fourcc: FourCC,
    /// Field order.
    pub field: FieldOrder,
    /// Bytes per line, filled in by the driver.
    pub stride: u32,
    /// Frame size in bytes, filled in by the driver.
    pub size: u32,
}

impl CaptureFormat {
    /// A format request: interlaced, with stride and size left to the driver.
    #[must_use]
    pub const fn new(width: u32, height: u32, fourcc: FourCC) -> Self {
        Self {
            width,
            height,
            fourcc,
            field: FieldOrder::Interlaced,
            stride: 0,
            size: 0,
        }
    }
}

impl fmt::Display for CaptureFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} {} ({:?}, {} bytes)",
            self.width, self.height, self.fourcc, self.field, self.size
        )
    }
}

/// One entry of `VIDIOC_ENUM_FMT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDescription {
    /// Enumeration index.
    pub index: u32,
    /// Pixel format.
    pub fourcc: FourCC,
    /// Driver-provided description.
    pub description: String,
}

/// Diagnostic view of the device's capabilities.
#[derive(Debug, Clone, Default)]
pub struct CapabilityReport {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// Kernel version the driver was built for.
    pub version: (u8, u8, u8),
    /// Whether the device can capture video.
    pub can_capture: bool,
    /// Whether the device supports streaming I/O.
    pub can_stream: bool,
    /// Supported capture pixel formats.
    pub formats: Vec<FormatDescription>,
}

/// Metadata for a dequeued buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMetadata {
    /// Kernel buffer index the frame landed in.
    pub index: u32,
    /// Frame sequence number.
    pub sequence: u32,
    /// Capture timestamp.
    pub timestamp: Duration,
    /// Bytes the driver filled in.
    pub bytes_used: u32,
}

/// A memory region mapped for one kernel buffer.
///
/// Dropping a region unmaps it; [`MappedRegion::unmap`] does the same but
/// reports failure.
pub trait MappedRegion: Send + Sync {
    /// Read-only view of the mapping.
    fn as_slice(&self) -> &[u8];

    /// Unmap the region.
    fn unmap(self) -> io::Result<()>
    where
        Self: Sized;
}

/// Device-side V4L2 protocol for single-planar mmap capture.
///
/// All methods take `&self` so the capture thread and the controller can
/// share one device.
pub trait CaptureDevice: Send + Sync {
    /// The mapping type produced by [`CaptureDevice::map_buffer`].
    type Region: MappedRegion;

    /// `VIDIOC_QUERYCAP` plus `VIDIOC_ENUM_FMT`.
    fn capabilities(&self) -> io::Result<CapabilityReport>;

    /// `VIDIOC_S_FMT`. Returns the format the driver applied.
    fn set_format(&self, format: &CaptureFormat) -> io::Result<CaptureFormat>;

    /// `VIDIOC_G_FMT`.
    fn format(&self) -> io::Result<CaptureFormat>;

    /// `VIDIOC_S_PARM` with the given time per frame.
    fn set_frame_interval(&self, numerator: u32, denominator: u32) -> io::Result<()>;

    /// `VIDIOC_REQBUFS`. Returns the number of buffers granted.
    fn request_buffers(&self, count: u32) -> io::Result<u32>;

    /// `VIDIOC_QUERYBUF` and `mmap` for one buffer.
    fn map_buffer(&self, index: u32) -> io::Result<Self::Region>;

    /// `VIDIOC_QBUF`.
    fn queue_buffer(&self, index: u32) -> io::Result<()>;

    /// `VIDIOC_DQBUF`.
    fn dequeue_buffer(&self) -> io::Result<FrameMetadata>;

    /// `VIDIOC_STREAMON`.
    fn stream_on(&self) -> io::Result<()>;

    /// `VIDIOC_STREAMOFF`. Also returns every queued buffer to userspace.
    fn stream_off(&self) -> io::Result<()>;

    /// Wait until a buffer is ready to dequeue. `Ok(false)` on timeout.
    fn wait_readable(&self, timeout: Duration) -> io::Result<bool>;

    /// Close the descriptor.
    fn close(self) -> io::Result<()>
    where
        Self: Sized;
}

/// Error a consumer may report for one frame.
pub type ConsumeError = Box<dyn std::error::Error + Send + Sync>;

/// Result of consuming one frame.
pub type ConsumeResult = Result<(), ConsumeError>;

/// Receives completed frames from the capture loop.
///
/// Called synchronously and sequentially in driver order. `frame` points into
/// a kernel buffer that is requeued as soon as the call returns.
pub trait FrameConsumer: Send {
    /// Handle one frame. Errors are logged by the loop and otherwise ignored.
    fn consume(&mut self, frame: &[u8], metadata: &FrameMetadata) -> ConsumeResult;
}

impl<F> FrameConsumer for F
where
    F: FnMut(&[u8], &FrameMetadata) -> ConsumeResult + Send,
{
    fn consume(&mut self, frame: &[u8], metadata: &FrameMetadata) -> ConsumeResult {
        self(frame, metadata)
    }
}
