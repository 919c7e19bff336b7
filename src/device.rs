//! V4L2 device handle over a raw descriptor.

use std::fs::{self, OpenOptions};
use std::io;
use std::os::fd::{AsRawFd, IntoRawFd, OwnedFd, RawFd};
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{DeviceError, Result};
use crate::sys;
use crate::traits::{CapabilityReport, CaptureDevice, CaptureFormat, FrameMetadata};

pub use crate::sys::MmapRegion;

/// An open V4L2 capture device.
///
/// Dropping the handle closes the descriptor; [`DeviceHandle::close`] does the
/// same but reports failure.
#[derive(Debug)]
pub struct DeviceHandle {
    fd: OwnedFd,
    path: PathBuf,
}

impl DeviceHandle {
    /// Open a character device read-write and non-blocking.
    ///
    /// The path is checked with `stat` first; anything that is not a
    /// character device is rejected before any ioctl is issued.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let metadata = fs::metadata(&path).map_err(|source| DeviceError::OpenFailed {
            path: path.clone(),
            source,
        })?;
        if !metadata.file_type().is_char_device() {
            return Err(DeviceError::NotCharacterDevice(path).into());
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&path)
            .map_err(|source| DeviceError::OpenFailed {
                path: path.clone(),
                source,
            })?;

        debug!(path = %path.display(), "opened character device");
        Ok(Self {
            fd: OwnedFd::from(file),
            path,
        })
    }

    /// Path the device was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn raw(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl CaptureDevice for DeviceHandle {
    type Region = MmapRegion;

    fn capabilities(&self) -> io::Result<CapabilityReport> {
        sys::query_capabilities(self.raw())
    }

    fn set_format(&self, format: &CaptureFormat) -> io::Result<CaptureFormat> {
        sys::set_format(self.raw(), format)
    }

    fn format(&self) -> io::Result<CaptureFormat> {
        sys::get_format(self.raw())
    }

    fn set_frame_interval(&self, numerator: u32, denominator: u32) -> io::Result<()> {
        sys::set_frame_interval(self.raw(), numerator, denominator)
    }

    fn request_buffers(&self, count: u32) -> io::Result<u32> {
        sys::request_buffers(self.raw(), count)
    }

    fn map_buffer(&self, index: u32) -> io::Result<MmapRegion> {
        sys::map_buffer(self.raw(), index)
    }

    fn queue_buffer(&self, index: u32) -> io::Result<()> {
        sys::queue_buffer(self.raw(), index)
    }

    fn dequeue_buffer(&self) -> io::Result<FrameMetadata> {
        sys::dequeue_buffer(self.raw())
    }

    fn stream_on(&self) -> io::Result<()> {
        sys::stream_on(self.raw())
    }

    fn stream_off(&self) -> io::Result<()> {
        sys::stream_off(self.raw())
    }

    fn wait_readable(&self, timeout: Duration) -> io::Result<bool> {
        sys::wait_readable(self.raw(), timeout)
    }

    fn close(self) -> io::Result<()> {
        let Self { fd, path } = self;
        debug!(path = %path.display(), "closing device");
        sys::close(fd.into_raw_fd())
    }
}

/// Close a device, mapping the failure into the capture error taxonomy.
pub fn close<D: CaptureDevice>(device: D) -> Result<()> {
    device
        .close()
        .map_err(|err| DeviceError::CloseFailed(err).into())
}

/// Query and log what the device supports.
///
/// The report is diagnostic only; missing capture or streaming support is
/// logged but not acted on.
pub fn query_capabilities<D: CaptureDevice + ?Sized>(device: &D) -> Result<CapabilityReport> {
    let report = device.capabilities().map_err(DeviceError::QueryFailed)?;

    let (major, minor, patch) = report.version;
    let version = format!("{major}.{minor}.{patch}");
    info!(
        driver = %report.driver,
        card = %report.card,
        bus = %report.bus_info,
        version = %version,
        "device capabilities"
    );
    if report.can_capture {
        info!("device supports capture");
    }
    if report.can_stream {
        info!("device supports streaming");
    }
    if !report.can_capture || !report.can_stream {
        warn!(
            can_capture = report.can_capture,
            can_stream = report.can_stream,
            "device may not support mmap streaming capture"
        );
    }
    for format in &report.formats {
        info!(
            index = format.index + 1,
            fourcc = %format.fourcc,
            "supported format: {}",
            format.description
        );
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CaptureError;
    use crate::mock::{Event, MockDevice};
    use std::fs::File;

    fn scratch_file(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("{name}-{}", std::process::id()));
        File::create(&path).expect("create scratch file");
        path
    }

    #[test]
    fn test_open_rejects_regular_file() {
        let path = scratch_file("v4l-ring-capture-regular");
        let result = DeviceHandle::open(&path);
        let _ = fs::remove_file(&path);

        assert!(
            matches!(
                result,
                Err(CaptureError::Device(DeviceError::NotCharacterDevice(_)))
            ),
            "expected NotCharacterDevice, got {result:?}"
        );
    }

    #[test]
    fn test_open_missing_path_fails() {
        let result = DeviceHandle::open("/dev/this-video-device-does-not-exist");
        assert!(matches!(
            result,
            Err(CaptureError::Device(DeviceError::OpenFailed { .. }))
        ));
    }

    #[test]
    fn test_non_v4l2_character_device() {
        // /dev/null is a character device that answers no V4L2 ioctls
        let device = DeviceHandle::open("/dev/null").expect("open /dev/null");
        assert_eq!(device.path(), Path::new("/dev/null"));

        let result = query_capabilities(&device);
        assert!(matches!(
            result,
            Err(CaptureError::Device(DeviceError::QueryFailed(_)))
        ));

        close(device).expect("close /dev/null");
    }

    #[test]
    fn test_query_capabilities_reports_formats() {
        let device = MockDevice::new();
        let report = query_capabilities(&device).expect("query should succeed");

        assert_eq!(report.driver, "mock");
        assert!(report.can_capture);
        assert!(report.can_stream);
        assert_eq!(report.formats.len(), 2);
    }

    #[test]
    fn test_close_failure_is_reported() {
        let device = MockDevice::new().fail_close();
        let events = device.events();

        let result = close(device);
        assert!(matches!(
            result,
            Err(CaptureError::Device(DeviceError::CloseFailed(_)))
        ));
        assert_eq!(events.snapshot(), vec![Event::Close]);
    }
}
