//! Error taxonomy for capture operations.
//!
//! Each component has its own error enum; [`CaptureError`] wraps them so
//! setup code can propagate any of them with `?`.

use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::stream::StreamState;

/// Failures opening, querying or closing the device.
#[derive(Debug)]
pub enum DeviceError {
    /// The path exists but is not a character device.
    NotCharacterDevice(PathBuf),
    /// `stat` or `open` failed.
    OpenFailed {
        /// Device path that was opened.
        path: PathBuf,
        /// Underlying OS error.
        source: io::Error,
    },
    /// `close` returned an error.
    CloseFailed(io::Error),
    /// `VIDIOC_QUERYCAP` failed.
    QueryFailed(io::Error),
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotCharacterDevice(path) => {
                write!(f, "{} is not a character device", path.display())
            }
            Self::OpenFailed { path, source } => {
                write!(f, "cannot open {}: {source}", path.display())
            }
            Self::CloseFailed(err) => write!(f, "close failed: {err}"),
            Self::QueryFailed(err) => write!(f, "VIDIOC_QUERYCAP failed: {err}"),
        }
    }
}

impl std::error::Error for DeviceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::NotCharacterDevice(_) => None,
            Self::OpenFailed { source, .. } => Some(source),
            Self::CloseFailed(err) | Self::QueryFailed(err) => Some(err),
        }
    }
}

/// Failures negotiating the capture format.
#[derive(Debug)]
pub enum FormatError {
    /// Width or height was zero.
    InvalidDimensions {
        /// Requested width.
        width: u32,
        /// Requested height.
        height: u32,
    },
    /// `VIDIOC_S_FMT` failed.
    FormatRejected(io::Error),
    /// `VIDIOC_G_FMT` failed.
    FormatQueryFailed(io::Error),
    /// `VIDIOC_S_PARM` failed or the rate was unusable. Never fatal.
    FrameRateRejected {
        /// Requested frames per second.
        fps: u32,
        /// Underlying OS error.
        source: io::Error,
    },
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidDimensions { width, height } => {
                write!(f, "invalid frame size {width}x{height}")
            }
            Self::FormatRejected(err) => write!(f, "VIDIOC_S_FMT failed: {err}"),
            Self::FormatQueryFailed(err) => write!(f, "VIDIOC_G_FMT failed: {err}"),
            Self::FrameRateRejected { fps, source } => {
                write!(f, "VIDIOC_S_PARM failed for {fps} fps: {source}")
            }
        }
    }
}

impl std::error::Error for FormatError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidDimensions { .. } => None,
            Self::FormatRejected(err) | Self::FormatQueryFailed(err) => Some(err),
            Self::FrameRateRejected { source, .. } => Some(source),
        }
    }
}

/// Failures allocating, mapping or unmapping the buffer ring.
#[derive(Debug)]
pub enum BufferError {
    /// `VIDIOC_REQBUFS` failed or granted nothing usable.
    AllocationFailed(io::Error),
    /// The buffer table could not be reserved.
    OutOfMemory,
    /// Querying or mapping the buffer at `index` failed.
    MapFailed {
        /// Kernel buffer index.
        index: u32,
        /// Underlying OS error.
        source: io::Error,
    },
    /// Unmapping the buffer at `index` failed (first failure reported).
    UnmapFailed {
        /// Kernel buffer index.
        index: u32,
        /// Underlying OS error.
        source: io::Error,
    },
}

impl fmt::Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllocationFailed(err) => write!(f, "VIDIOC_REQBUFS failed: {err}"),
            Self::OutOfMemory => write!(f, "out of memory for the buffer table"),
            Self::MapFailed { index, source } => {
                write!(f, "mapping buffer {index} failed: {source}")
            }
            Self::UnmapFailed { index, source } => {
                write!(f, "munmap of buffer {index} failed: {source}")
            }
        }
    }
}

impl std::error::Error for BufferError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::OutOfMemory => None,
            Self::AllocationFailed(err) => Some(err),
            Self::MapFailed { source, .. } | Self::UnmapFailed { source, .. } => Some(source),
        }
    }
}

/// Failures while starting, running or stopping the stream.
#[derive(Debug)]
pub enum StreamError {
    /// `VIDIOC_QBUF` failed while priming the ring.
    QueueFailed {
        /// Kernel buffer index.
        index: u32,
        /// Underlying OS error.
        source: io::Error,
    },
    /// `VIDIOC_STREAMON` failed.
    StreamOnFailed(io::Error),
    /// The capture thread could not be spawned.
    SpawnFailed(io::Error),
    /// Waiting for a frame failed.
    WaitFailed(io::Error),
    /// `VIDIOC_DQBUF` failed.
    DequeueFailed(io::Error),
    /// `VIDIOC_QBUF` failed while returning a consumed buffer.
    RequeueFailed {
        /// Kernel buffer index.
        index: u32,
        /// Underlying OS error.
        source: io::Error,
    },
    /// `VIDIOC_STREAMOFF` failed.
    StreamOffFailed(io::Error),
    /// The capture thread panicked.
    LoopPanicked,
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFailed { index, source } => {
                write!(f, "VIDIOC_QBUF failed for buffer {index}: {source}")
            }
            Self::StreamOnFailed(err) => write!(f, "VIDIOC_STREAMON failed: {err}"),
            Self::SpawnFailed(err) => write!(f, "cannot spawn capture thread: {err}"),
            Self::WaitFailed(err) => write!(f, "waiting for a frame failed: {err}"),
            Self::DequeueFailed(err) => write!(f, "VIDIOC_DQBUF failed: {err}"),
            Self::RequeueFailed { index, source } => {
                write!(f, "VIDIOC_QBUF failed requeueing buffer {index}: {source}")
            }
            Self::StreamOffFailed(err) => write!(f, "VIDIOC_STREAMOFF failed: {err}"),
            Self::LoopPanicked => write!(f, "capture thread panicked"),
        }
    }
}

impl std::error::Error for StreamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::QueueFailed { source, .. } | Self::RequeueFailed { source, .. } => Some(source),
            Self::StreamOnFailed(err)
            | Self::SpawnFailed(err)
            | Self::WaitFailed(err)
            | Self::DequeueFailed(err)
            | Self::StreamOffFailed(err) => Some(err),
            Self::LoopPanicked => None,
        }
    }
}

/// Top-level error for capture operations.
#[derive(Debug)]
pub enum CaptureError {
    /// Device handle failure.
    Device(DeviceError),
    /// Format negotiation failure.
    Format(FormatError),
    /// Buffer ring failure.
    Buffer(BufferError),
    /// Streaming failure.
    Stream(StreamError),
    /// Operation attempted from the wrong stream state.
    InvalidState {
        /// Operation that was attempted.
        operation: &'static str,
        /// State the controller was in.
        state: StreamState,
    },
}

impl CaptureError {
    /// Whether this error came from opening the device.
    pub const fn is_open_failure(&self) -> bool {
        matches!(
            self,
            Self::Device(DeviceError::NotCharacterDevice(_) | DeviceError::OpenFailed { .. })
        )
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device(err) => write!(f, "device error: {err}"),
            Self::Format(err) => write!(f, "format error: {err}"),
            Self::Buffer(err) => write!(f, "buffer error: {err}"),
            Self::Stream(err) => write!(f, "stream error: {err}"),
            Self::InvalidState { operation, state } => {
                write!(f, "cannot {operation} while {state:?}")
            }
        }
    }
}

impl std::error::Error for CaptureError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Device(err) => Some(err),
            Self::Format(err) => Some(err),
            Self::Buffer(err) => Some(err),
            Self::Stream(err) => Some(err),
            Self::InvalidState { .. } => None,
        }
    }
}

impl From<DeviceError> for CaptureError {
    fn from(err: DeviceError) -> Self {
        Self::Device(err)
    }
}

impl From<FormatError> for CaptureError {
    fn from(err: FormatError) -> Self {
        Self::Format(err)
    }
}

impl From<BufferError> for CaptureError {
    fn from(err: BufferError) -> Self {
        Self::Buffer(err)
    }
}

impl From<StreamError> for CaptureError {
    fn from(err: StreamError) -> Self {
        Self::Stream(err)
    }
}

/// Result type for capture operations.
pub type Result<T> = std::result::Result<T, CaptureError>;
