//! Capture settings, built from the command line or by callers.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::stream::WAIT_TIMEOUT;
use crate::traits::FourCC;

/// Device node used when none is given.
pub const DEFAULT_DEVICE: &str = "/dev/video0";
/// Requested width in pixels.
pub const DEFAULT_WIDTH: u32 = 1280;
/// Requested height in pixels.
pub const DEFAULT_HEIGHT: u32 = 720;
/// Requested frame rate.
pub const DEFAULT_FPS: u32 = 30;

/// What to capture and from where.
#[derive(Clone, Debug)]
pub struct CaptureConfig {
    device: PathBuf,
    width: u32,
    height: u32,
    fourcc: FourCC,
    fps: u32,
    wait_timeout: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from(DEFAULT_DEVICE),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            fourcc: FourCC::YUYV,
            fps: DEFAULT_FPS,
            wait_timeout: WAIT_TIMEOUT,
        }
    }
}

impl CaptureConfig {
    /// Set the device node (e.g. "/dev/video0").
    #[must_use]
    pub fn with_device<P: Into<PathBuf>>(mut self, device: P) -> Self {
        self.device = device.into();
        self
    }

    /// Set the capture width in pixels.
    #[must_use]
    pub fn with_width(mut self, width: u32) -> Self {
        self.width = width;
        self
    }

    /// Set the capture height in pixels.
    #[must_use]
    pub fn with_height(mut self, height: u32) -> Self {
        self.height = height;
        self
    }

    /// Set the pixel format.
    #[must_use]
    pub fn with_fourcc(mut self, fourcc: FourCC) -> Self {
        self.fourcc = fourcc;
        self
    }

    /// Set the requested frames per second.
    #[must_use]
    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }

    /// Set how long the capture loop waits for each frame.
    #[must_use]
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Device node to open.
    pub fn device(&self) -> &Path {
        &self.device
    }

    /// Requested width; the driver may adjust it.
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Requested height; the driver may adjust it.
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Requested pixel format.
    pub const fn fourcc(&self) -> FourCC {
        self.fourcc
    }

    /// Requested frames per second.
    pub const fn fps(&self) -> u32 {
        self.fps
    }

    /// How long the capture loop waits for each frame.
    pub const fn wait_timeout(&self) -> Duration {
        self.wait_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CaptureConfig::default();
        assert_eq!(config.device(), Path::new("/dev/video0"));
        assert_eq!((config.width(), config.height()), (1280, 720));
        assert_eq!(config.fourcc(), FourCC::YUYV);
        assert_eq!(config.fps(), 30);
        assert_eq!(config.wait_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_builder_overrides() {
        let config = CaptureConfig::default()
            .with_device("/dev/video2")
            .with_width(640)
            .with_height(480)
            .with_fourcc(FourCC::MJPG)
            .with_fps(15)
            .with_wait_timeout(Duration::from_millis(250));

        assert_eq!(config.device(), Path::new("/dev/video2"));
        assert_eq!((config.width(), config.height()), (640, 480));
        assert_eq!(config.fourcc(), FourCC::MJPG);
        assert_eq!(config.fps(), 15);
        assert_eq!(config.wait_timeout(), Duration::from_millis(250));
    }
}
