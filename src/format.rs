//! Pixel format, resolution and frame-rate negotiation.
//!
//! Drivers are free to adjust a request, so the format returned by
//! [`set_format`] (and re-read with [`get_format`]) is the only one to trust.

use std::io;

use tracing::{debug, info, warn};

use crate::error::{FormatError, Result};
use crate::traits::{CaptureDevice, CaptureFormat, FourCC};

/// Request `fourcc` at `width`x`height`, interlaced.
///
/// Returns the format the driver actually applied.
pub fn set_format<D: CaptureDevice + ?Sized>(
    device: &D,
    fourcc: FourCC,
    width: u32,
    height: u32,
) -> Result<CaptureFormat> {
    if width == 0 || height == 0 {
        return Err(FormatError::InvalidDimensions { width, height }.into());
    }

    let request = CaptureFormat::new(width, height, fourcc);
    let applied = device
        .set_format(&request)
        .map_err(FormatError::FormatRejected)?;

    if applied.width != width || applied.height != height || applied.fourcc != fourcc {
        warn!(
            requested = %request,
            applied = %applied,
            "driver adjusted the requested format"
        );
    } else {
        debug!(format = %applied, "format applied");
    }
    Ok(applied)
}

/// Read back the active format.
pub fn get_format<D: CaptureDevice + ?Sized>(device: &D) -> Result<CaptureFormat> {
    let format = device.format().map_err(FormatError::FormatQueryFailed)?;
    info!(
        fourcc = %format.fourcc,
        width = format.width,
        height = format.height,
        field = ?format.field,
        size = format.size,
        "active format"
    );
    Ok(format)
}

/// Ask for `fps` frames per second.
///
/// Best-effort: callers log the error and keep whatever rate was active.
pub fn set_frame_rate<D: CaptureDevice + ?Sized>(device: &D, fps: u32) -> Result<()> {
    if fps == 0 {
        return Err(FormatError::FrameRateRejected {
            fps,
            source: io::Error::new(io::ErrorKind::InvalidInput, "frame rate must be positive"),
        }
        .into());
    }

    device
        .set_frame_interval(1, fps)
        .map_err(|source| FormatError::FrameRateRejected { fps, source })?;
    debug!(fps, "frame rate set");
    Ok(())
}
