//! v4l-ring-capture: memory-mapped V4L2 frame capture.
//!
//! Opens a capture device, negotiates a pixel format, maps a ring of kernel
//! buffers, and runs a capture thread that hands each filled buffer to a
//! [`FrameConsumer`] before returning it to the driver. The device sits
//! behind the [`CaptureDevice`] trait so everything above the ioctl layer
//! can be exercised without hardware.

pub mod config;
pub mod consumer;
pub mod device;
pub mod error;
pub mod format;
pub mod ring;
pub mod session;
pub mod stream;
pub mod traits;
pub mod validation;

mod sys;

#[cfg(test)]
mod mock;

pub use config::CaptureConfig;
pub use consumer::FileSink;
pub use device::DeviceHandle;
pub use error::{BufferError, CaptureError, DeviceError, FormatError, Result, StreamError};
pub use ring::{BufferRing, MappedBuffer, BUFFER_COUNT};
pub use session::CaptureSession;
pub use stream::{CaptureSummary, StreamController, StreamState};
pub use traits::{
    CapabilityReport, CaptureDevice, CaptureFormat, ConsumeError, ConsumeResult, FieldOrder,
    FourCC, FrameConsumer, FrameMetadata, MappedRegion,
};
