//! A configured device, its buffer ring, and the controller that streams it.
//!
//! [`CaptureSession`] runs the setup sequence in the order the driver
//! requires and tears it down in reverse: streaming off, buffers unmapped,
//! descriptor closed.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::CaptureConfig;
use crate::device::{self, DeviceHandle};
use crate::error::{CaptureError, Result};
use crate::format;
use crate::ring::{BufferRing, BUFFER_COUNT};
use crate::stream::{CaptureSummary, StreamController, StreamState};
use crate::traits::{CapabilityReport, CaptureDevice, CaptureFormat, FrameConsumer};

/// One capture attempt, from configured device to closed descriptor.
pub struct CaptureSession<D: CaptureDevice + 'static> {
    controller: StreamController<D>,
    device: Arc<D>,
    capabilities: CapabilityReport,
    format: CaptureFormat,
}

impl CaptureSession<DeviceHandle> {
    /// Open the configured device node and set it up for capture.
    pub fn open(config: &CaptureConfig) -> Result<Self> {
        let device = DeviceHandle::open(config.device())?;
        info!(path = %config.device().display(), "device opened");
        Self::configure(device, config)
    }
}

impl<D: CaptureDevice + 'static> CaptureSession<D> {
    /// Negotiate the format, set the frame rate, and map the buffer ring.
    ///
    /// On failure the device is closed before the error is returned.
    pub fn configure(device: D, config: &CaptureConfig) -> Result<Self> {
        match Self::prepare(&device, config) {
            Ok((capabilities, format, ring)) => {
                let device = Arc::new(device);
                let controller = StreamController::new(Arc::clone(&device), ring)
                    .with_wait_timeout(config.wait_timeout());
                Ok(Self {
                    controller,
                    device,
                    capabilities,
                    format,
                })
            }
            Err(err) => {
                if let Err(close_err) = device::close(device) {
                    warn!("closing device after failed setup: {close_err}");
                }
                Err(err)
            }
        }
    }

    fn prepare(
        device: &D,
        config: &CaptureConfig,
    ) -> Result<(CapabilityReport, CaptureFormat, BufferRing<D::Region>)> {
        let capabilities = device::query_capabilities(device)?;

        let applied =
            format::set_format(device, config.fourcc(), config.width(), config.height())?;
        let active = format::get_format(device)?;
        if active != applied {
            warn!(
                applied = %applied,
                active = %active,
                "active format differs from the one applied"
            );
        }

        if let Err(err) = format::set_frame_rate(device, config.fps()) {
            warn!("keeping the driver's frame rate: {err}");
        }

        let ring = BufferRing::allocate(device, BUFFER_COUNT)?;
        Ok((capabilities, active, ring))
    }

    /// Start streaming into `consumer`.
    pub fn start<C: FrameConsumer + 'static>(&mut self, consumer: C) -> Result<()> {
        self.controller.start(consumer)
    }

    /// Stop streaming and report how the run went.
    pub fn stop(&mut self) -> Result<CaptureSummary> {
        self.controller.stop()
    }

    /// Current stream state.
    pub const fn state(&self) -> StreamState {
        self.controller.state()
    }

    /// The format the driver reported after negotiation.
    pub const fn format(&self) -> &CaptureFormat {
        &self.format
    }

    /// What the device reported when it was configured.
    pub const fn capabilities(&self) -> &CapabilityReport {
        &self.capabilities
    }

    /// Frames handed to the consumer so far.
    pub fn frames_delivered(&self) -> u64 {
        self.controller.frames_delivered()
    }

    /// Whether the capture thread has exited.
    pub fn loop_finished(&self) -> bool {
        self.controller.loop_finished()
    }

    /// The run's summary after a [`stop`](Self::stop) that failed at
    /// STREAMOFF.
    pub fn take_summary(&mut self) -> Option<CaptureSummary> {
        self.controller.take_summary()
    }

    /// Tear everything down.
    ///
    /// Streaming goes off before the buffers are unmapped and the descriptor
    /// closes last. If STREAMOFF failed, the descriptor is closed first
    /// instead, which stops the stream, and the buffers are unmapped after.
    /// Every step is attempted; the first error wins.
    pub fn close(self) -> Result<Option<CaptureSummary>> {
        let Self {
            mut controller,
            device,
            ..
        } = self;
        let mut first_error: Option<CaptureError> = None;

        let summary = if controller.state() == StreamState::Streaming {
            match controller.stop() {
                Ok(summary) => Some(summary),
                Err(err) => {
                    warn!("stopping stream during close: {err}");
                    first_error.get_or_insert(err);
                    controller.take_summary()
                }
            }
        } else {
            controller.take_summary()
        };

        let hardware_on = controller.hardware_streaming();
        let ring = match controller.into_ring() {
            Ok(ring) => Some(ring),
            Err(err) => {
                warn!("buffer ring still shared during close: {err}");
                first_error.get_or_insert(err);
                None
            }
        };

        if hardware_on {
            warn!("STREAMOFF failed; closing the device before unmapping");
            Self::close_device(device, &mut first_error);
            Self::release_ring(ring, &mut first_error);
        } else {
            Self::release_ring(ring, &mut first_error);
            Self::close_device(device, &mut first_error);
        }

        match first_error {
            Some(err) => Err(err),
            None => {
                debug!("session closed");
                Ok(summary)
            }
        }
    }

    fn release_ring(
        ring: Option<BufferRing<D::Region>>,
        first_error: &mut Option<CaptureError>,
    ) {
        if let Some(Err(err)) = ring.map(BufferRing::release) {
            first_error.get_or_insert(err);
        }
    }

    fn close_device(device: Arc<D>, first_error: &mut Option<CaptureError>) {
        match Arc::try_unwrap(device) {
            Ok(device) => {
                if let Err(err) = device::close(device) {
                    first_error.get_or_insert(err);
                }
            }
            // Last reference drops here and the descriptor closes with it
            Err(_) => warn!("device still shared during close"),
        }
    }
}
