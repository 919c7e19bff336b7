//! Streaming controller and the capture loop thread.
//!
//! The controller moves through [`StreamState::Idle`] →
//! [`StreamState::Streaming`] → [`StreamState::Stopped`]. While streaming, a
//! dedicated thread waits for the driver, dequeues a filled buffer, hands it
//! to the [`FrameConsumer`], and requeues the same index before looking at
//! the next one. Stopping is cooperative: the loop polls a shared flag once
//! per wait cycle, so shutdown takes at most one wait timeout plus one
//! consumer call.

use std::io;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, trace, warn};

use crate::error::{CaptureError, Result, StreamError};
use crate::ring::BufferRing;
use crate::traits::{CaptureDevice, FrameConsumer};

/// How long one wait for a frame may block.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Lifecycle of hardware streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Buffers allocated, nothing queued.
    Idle,
    /// Buffers queued, hardware streaming, capture loop running.
    Streaming,
    /// Loop joined and streaming disabled. Terminal.
    Stopped,
}

/// Outcome of a streaming run, returned by [`StreamController::stop`].
#[derive(Debug)]
pub struct CaptureSummary {
    /// Frames handed to the consumer, including one whose requeue failed.
    pub frames: u64,
    /// The fault that ended the loop early, if any.
    pub fault: Option<StreamError>,
}

/// Owns the capture thread and drives the stream state machine.
pub struct StreamController<D: CaptureDevice + 'static> {
    device: Arc<D>,
    ring: Option<Arc<BufferRing<D::Region>>>,
    state: StreamState,
    cancel: Arc<AtomicBool>,
    frames: Arc<AtomicU64>,
    wait_timeout: Duration,
    worker: Option<JoinHandle<Option<StreamError>>>,
    hardware_on: bool,
    summary: Option<CaptureSummary>,
}

impl<D: CaptureDevice + 'static> StreamController<D> {
    /// An idle controller over a mapped ring.
    pub fn new(device: Arc<D>, ring: BufferRing<D::Region>) -> Self {
        Self {
            device,
            ring: Some(Arc::new(ring)),
            state: StreamState::Idle,
            cancel: Arc::new(AtomicBool::new(false)),
            frames: Arc::new(AtomicU64::new(0)),
            wait_timeout: WAIT_TIMEOUT,
            worker: None,
            hardware_on: false,
            summary: None,
        }
    }

    /// Override the per-wait timeout.
    #[must_use]
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Current state.
    pub const fn state(&self) -> StreamState {
        self.state
    }

    /// Frames handed to the consumer so far.
    pub fn frames_delivered(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Whether STREAMON succeeded and no STREAMOFF has succeeded since.
    ///
    /// Stays set after a failed STREAMOFF; the buffers must then outlive the
    /// descriptor rather than be unmapped first.
    pub const fn hardware_streaming(&self) -> bool {
        self.hardware_on
    }

    /// The summary of a run whose [`stop`](Self::stop) failed at STREAMOFF.
    ///
    /// The loop was already joined, so its frame count and fault are kept
    /// here instead of being dropped with the error.
    pub fn take_summary(&mut self) -> Option<CaptureSummary> {
        self.summary.take()
    }

    /// Whether the capture thread has exited (on its own or after a fault).
    pub fn loop_finished(&self) -> bool {
        self.worker.as_ref().map_or(true, JoinHandle::is_finished)
    }

    const fn invalid(&self, operation: &'static str) -> CaptureError {
        CaptureError::InvalidState {
            operation,
            state: self.state,
        }
    }

    /// Queue every buffer, enable streaming, and spawn the capture loop.
    ///
    /// Valid only from [`StreamState::Idle`]. On failure the controller
    /// stays idle and any buffers already queued are handed back to
    /// userspace.
    pub fn start<C>(&mut self, consumer: C) -> Result<()>
    where
        C: FrameConsumer + 'static,
    {
        if self.state != StreamState::Idle {
            return Err(self.invalid("start"));
        }
        let ring = match &self.ring {
            Some(ring) => Arc::clone(ring),
            None => return Err(self.invalid("start")),
        };

        for index in ring.indices() {
            if let Err(source) = self.device.queue_buffer(index) {
                self.reset_queue();
                return Err(StreamError::QueueFailed { index, source }.into());
            }
            trace!(index, "queued buffer");
        }

        if let Err(err) = self.device.stream_on() {
            self.reset_queue();
            return Err(StreamError::StreamOnFailed(err).into());
        }
        self.hardware_on = true;

        self.cancel.store(false, Ordering::Release);
        let capture = CaptureLoop {
            device: Arc::clone(&self.device),
            ring,
            consumer,
            cancel: Arc::clone(&self.cancel),
            frames: Arc::clone(&self.frames),
            wait_timeout: self.wait_timeout,
        };
        let worker = thread::Builder::new()
            .name("capture-loop".to_owned())
            .spawn(move || capture.run());
        match worker {
            Ok(handle) => self.worker = Some(handle),
            Err(err) => {
                self.reset_queue();
                return Err(StreamError::SpawnFailed(err).into());
            }
        }

        self.state = StreamState::Streaming;
        info!("streaming started");
        Ok(())
    }

    /// Signal the loop, wait for it, then disable streaming.
    ///
    /// Valid only from [`StreamState::Streaming`]; a second call is an
    /// [`CaptureError::InvalidState`] error.
    pub fn stop(&mut self) -> Result<CaptureSummary> {
        if self.state != StreamState::Streaming {
            return Err(self.invalid("stop"));
        }

        let fault = self.join_worker();
        self.state = StreamState::Stopped;
        let summary = CaptureSummary {
            frames: self.frames_delivered(),
            fault,
        };

        if let Err(err) = self.device.stream_off() {
            if let Some(fault) = &summary.fault {
                error!("capture loop fault before failed STREAMOFF: {fault}");
            }
            self.summary = Some(summary);
            return Err(StreamError::StreamOffFailed(err).into());
        }
        self.hardware_on = false;
        info!(frames = summary.frames, "streaming stopped");

        Ok(summary)
    }

    /// Hand the ring back for release.
    ///
    /// Fails while streaming: the driver may still be writing to it. If
    /// [`hardware_streaming`](Self::hardware_streaming) is still set, close
    /// the device before releasing the ring.
    pub fn into_ring(mut self) -> Result<BufferRing<D::Region>> {
        if self.state == StreamState::Streaming {
            return Err(self.invalid("release buffers"));
        }
        let state = self.state;
        self.ring
            .take()
            .and_then(|ring| Arc::try_unwrap(ring).ok())
            .ok_or(CaptureError::InvalidState {
                operation: "release buffers",
                state,
            })
    }

    fn join_worker(&mut self) -> Option<StreamError> {
        self.cancel.store(true, Ordering::Release);
        let handle = self.worker.take()?;
        handle.join().unwrap_or_else(|_| {
            error!("capture thread panicked");
            Some(StreamError::LoopPanicked)
        })
    }

    fn reset_queue(&mut self) {
        // STREAMOFF also drops every queued buffer from the driver's queue
        match self.device.stream_off() {
            Ok(()) => self.hardware_on = false,
            Err(err) => warn!("VIDIOC_STREAMOFF while resetting the queue: {err}"),
        }
    }
}

impl<D: CaptureDevice + 'static> Drop for StreamController<D> {
    fn drop(&mut self) {
        if self.state != StreamState::Streaming {
            return;
        }
        warn!("stream controller dropped while streaming; stopping");
        if let Some(fault) = self.join_worker() {
            warn!("capture loop ended with: {fault}");
        }
        self.state = StreamState::Stopped;
        match self.device.stream_off() {
            Ok(()) => self.hardware_on = false,
            Err(err) => warn!("VIDIOC_STREAMOFF on drop: {err}"),
        }
        if self.hardware_on {
            // The device is still open elsewhere and unmapping under an
            // active stream is not allowed: the mappings live until exit.
            if let Some(ring) = self.ring.take() {
                warn!("leaving {} buffers mapped after failed STREAMOFF", ring.len());
                mem::forget(ring);
            }
        }
    }
}

/// Everything the capture thread owns.
struct CaptureLoop<D: CaptureDevice, C> {
    device: Arc<D>,
    ring: Arc<BufferRing<D::Region>>,
    consumer: C,
    cancel: Arc<AtomicBool>,
    frames: Arc<AtomicU64>,
    wait_timeout: Duration,
}

impl<D: CaptureDevice, C: FrameConsumer> CaptureLoop<D, C> {
    fn run(mut self) -> Option<StreamError> {
        debug!("capture loop running");
        match self.pump() {
            Ok(()) => {
                debug!("capture loop cancelled");
                None
            }
            Err(fault) => {
                error!("capture loop terminated: {fault}");
                Some(fault)
            }
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    fn pump(&mut self) -> std::result::Result<(), StreamError> {
        loop {
            if self.cancelled() {
                return Ok(());
            }

            match self.device.wait_readable(self.wait_timeout) {
                Ok(true) => {}
                Ok(false) => {
                    warn!(timeout = ?self.wait_timeout, "timeout waiting for frame");
                    continue;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(StreamError::WaitFailed(err)),
            }

            if self.cancelled() {
                return Ok(());
            }

            let metadata = match self.device.dequeue_buffer() {
                Ok(metadata) => metadata,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => continue,
                Err(err) => return Err(StreamError::DequeueFailed(err)),
            };
            let index = metadata.index;
            trace!(index, sequence = metadata.sequence, "dequeued buffer");

            let Some(buffer) = self.ring.get(index) else {
                return Err(StreamError::DequeueFailed(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("driver returned unknown buffer index {index}"),
                )));
            };
            if let Err(err) = self.consumer.consume(buffer.as_slice(), &metadata) {
                warn!(index, sequence = metadata.sequence, "frame consumer failed: {err}");
            }
            self.frames.fetch_add(1, Ordering::Relaxed);

            // Always the index just dequeued, even if cancellation arrived
            // during the consumer call.
            self.device
                .queue_buffer(index)
                .map_err(|source| StreamError::RequeueFailed { index, source })?;
            trace!(index, "requeued buffer");
        }
    }
}
