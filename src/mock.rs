//! Mock driver for testing without hardware.
//!
//! Models the kernel side of mmap streaming: a FIFO of queued buffer
//! indices, a frame clock, per-operation failure injection, and an event log
//! shared with the regions it hands out.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use crate::traits::{
    CapabilityReport, CaptureDevice, CaptureFormat, FormatDescription, FourCC, FrameMetadata,
    MappedRegion,
};

/// Driver-visible operations, in the order they happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    RequestBuffers(u32),
    Map(u32),
    Unmap(u32),
    UnmapFailed(u32),
    Queue(u32),
    Dequeue(u32),
    StreamOn,
    StreamOff,
    Close,
}

/// Shared, append-only event log.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    fn push(&self, event: Event) {
        self.0.lock().expect("event log poisoned").push(event);
    }

    pub fn snapshot(&self) -> Vec<Event> {
        self.0.lock().expect("event log poisoned").clone()
    }

    pub fn count(&self, event: &Event) -> usize {
        self.snapshot().iter().filter(|e| *e == event).count()
    }

    pub fn position(&self, event: &Event) -> Option<usize> {
        self.snapshot().iter().position(|e| e == event)
    }
}

#[derive(Debug, Default)]
struct Failures {
    set_format: bool,
    frame_rate: bool,
    request_buffers: bool,
    map_at: Option<u32>,
    unmap_at: Option<u32>,
    queue_call: Option<usize>,
    stream_on: bool,
    stream_off: bool,
    wait: bool,
    dequeue: bool,
    close: bool,
}

#[derive(Debug)]
struct DriverState {
    format: CaptureFormat,
    substitute: Option<(u32, u32)>,
    bytes_per_pixel: u32,
    frame_interval: Duration,
    granted: Option<u32>,
    buffer_count: u32,
    queued: VecDeque<u32>,
    queue_calls: usize,
    streaming: bool,
    stream_start: Option<Instant>,
    last_frame: Option<Instant>,
    sequence: u32,
    time_per_frame: Option<(u32, u32)>,
}

/// Mock device for testing without hardware.
#[derive(Debug)]
pub struct MockDevice {
    capabilities: CapabilityReport,
    state: Mutex<DriverState>,
    failures: Failures,
    events: EventLog,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// A 640x480 YUYV device delivering a frame every 33 ms.
    pub fn new() -> Self {
        let format = Self::apply(&CaptureFormat::new(640, 480, FourCC::YUYV), 2);
        Self {
            capabilities: CapabilityReport {
                driver: "mock".to_owned(),
                card: "Mock Camera".to_owned(),
                bus_info: "mock:0".to_owned(),
                version: (6, 1, 0),
                can_capture: true,
                can_stream: true,
                formats: vec![
                    FormatDescription {
                        index: 0,
                        fourcc: FourCC::YUYV,
                        description: "YUYV 4:2:2".to_owned(),
                    },
                    FormatDescription {
                        index: 1,
                        fourcc: FourCC::MJPG,
                        description: "Motion-JPEG".to_owned(),
                    },
                ],
            },
            state: Mutex::new(DriverState {
                format,
                substitute: None,
                bytes_per_pixel: 2,
                frame_interval: Duration::from_millis(33),
                granted: None,
                buffer_count: 0,
                queued: VecDeque::new(),
                queue_calls: 0,
                streaming: false,
                stream_start: None,
                last_frame: None,
                sequence: 0,
                time_per_frame: None,
            }),
            failures: Failures::default(),
            events: EventLog::default(),
        }
    }

    fn apply(request: &CaptureFormat, bytes_per_pixel: u32) -> CaptureFormat {
        let stride = request.width * bytes_per_pixel;
        CaptureFormat {
            stride,
            size: stride * request.height,
            ..request.clone()
        }
    }

    fn state(&self) -> MutexGuard<'_, DriverState> {
        self.state.lock().expect("driver state poisoned")
    }

    /// Apply `format` as if a previous `VIDIOC_S_FMT` had succeeded.
    pub fn with_format(self, format: &CaptureFormat) -> Self {
        {
            let mut state = self.state();
            state.format = Self::apply(format, state.bytes_per_pixel);
        }
        self
    }

    /// Bytes per pixel used to compute stride and frame size.
    pub fn with_bytes_per_pixel(self, bytes_per_pixel: u32) -> Self {
        {
            let mut state = self.state();
            state.bytes_per_pixel = bytes_per_pixel;
            let current = state.format.clone();
            state.format = Self::apply(&current, bytes_per_pixel);
        }
        self
    }

    /// Force every `VIDIOC_S_FMT` to this resolution.
    pub fn substituting(self, width: u32, height: u32) -> Self {
        self.state().substitute = Some((width, height));
        self
    }

    /// Time between completed frames.
    pub fn with_frame_interval(self, interval: Duration) -> Self {
        self.state().frame_interval = interval;
        self
    }

    /// Grant this many buffers regardless of the request.
    pub fn granting(self, count: u32) -> Self {
        self.state().granted = Some(count);
        self
    }

    pub fn with_capabilities(mut self, capabilities: CapabilityReport) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub const fn fail_set_format(mut self) -> Self {
        self.failures.set_format = true;
        self
    }

    pub const fn fail_frame_rate(mut self) -> Self {
        self.failures.frame_rate = true;
        self
    }

    pub const fn fail_request_buffers(mut self) -> Self {
        self.failures.request_buffers = true;
        self
    }

    pub const fn fail_map_at(mut self, index: u32) -> Self {
        self.failures.map_at = Some(index);
        self
    }

    pub const fn fail_unmap_at(mut self, index: u32) -> Self {
        self.failures.unmap_at = Some(index);
        self
    }

    /// Fail the `call`-th `VIDIOC_QBUF` (0-based, counting priming and requeues).
    pub const fn fail_queue_call(mut self, call: usize) -> Self {
        self.failures.queue_call = Some(call);
        self
    }

    pub const fn fail_stream_on(mut self) -> Self {
        self.failures.stream_on = true;
        self
    }

    pub const fn fail_stream_off(mut self) -> Self {
        self.failures.stream_off = true;
        self
    }

    pub const fn fail_wait(mut self) -> Self {
        self.failures.wait = true;
        self
    }

    pub const fn fail_dequeue(mut self) -> Self {
        self.failures.dequeue = true;
        self
    }

    pub const fn fail_close(mut self) -> Self {
        self.failures.close = true;
        self
    }

    pub fn events(&self) -> EventLog {
        self.events.clone()
    }

    pub fn time_per_frame(&self) -> Option<(u32, u32)> {
        self.state().time_per_frame
    }

    pub fn is_streaming(&self) -> bool {
        self.state().streaming
    }
}

fn einval() -> io::Error {
    io::Error::from_raw_os_error(libc::EINVAL)
}

impl CaptureDevice for MockDevice {
    type Region = MockRegion;

    fn capabilities(&self) -> io::Result<CapabilityReport> {
        Ok(self.capabilities.clone())
    }

    fn set_format(&self, format: &CaptureFormat) -> io::Result<CaptureFormat> {
        if self.failures.set_format {
            return Err(einval());
        }
        let mut state = self.state();
        let mut request = format.clone();
        if let Some((width, height)) = state.substitute {
            request.width = width;
            request.height = height;
        }
        state.format = Self::apply(&request, state.bytes_per_pixel);
        Ok(state.format.clone())
    }

    fn format(&self) -> io::Result<CaptureFormat> {
        Ok(self.state().format.clone())
    }

    fn set_frame_interval(&self, numerator: u32, denominator: u32) -> io::Result<()> {
        if self.failures.frame_rate {
            return Err(io::Error::from_raw_os_error(libc::ENOTTY));
        }
        self.state().time_per_frame = Some((numerator, denominator));
        Ok(())
    }

    fn request_buffers(&self, count: u32) -> io::Result<u32> {
        self.events.push(Event::RequestBuffers(count));
        if self.failures.request_buffers {
            return Err(einval());
        }
        let mut state = self.state();
        state.buffer_count = state.granted.unwrap_or(count);
        Ok(state.buffer_count)
    }

    fn map_buffer(&self, index: u32) -> io::Result<MockRegion> {
        let state = self.state();
        if index >= state.buffer_count {
            return Err(einval());
        }
        if self.failures.map_at == Some(index) {
            return Err(io::Error::from_raw_os_error(libc::ENOMEM));
        }
        self.events.push(Event::Map(index));

        // Fill with the index so consumers can tell buffers apart
        #[allow(clippy::cast_possible_truncation)]
        let fill = index as u8;
        Ok(MockRegion {
            index,
            data: vec![fill; state.format.size as usize],
            fail_unmap: self.failures.unmap_at == Some(index),
            released: false,
            events: self.events.clone(),
        })
    }

    fn queue_buffer(&self, index: u32) -> io::Result<()> {
        let mut state = self.state();
        let call = state.queue_calls;
        state.queue_calls += 1;
        if self.failures.queue_call == Some(call) {
            return Err(einval());
        }
        if index >= state.buffer_count || state.queued.contains(&index) {
            return Err(einval());
        }
        state.queued.push_back(index);
        self.events.push(Event::Queue(index));
        Ok(())
    }

    fn dequeue_buffer(&self) -> io::Result<FrameMetadata> {
        if self.failures.dequeue {
            return Err(io::Error::from_raw_os_error(libc::EIO));
        }
        let mut state = self.state();
        if !state.streaming {
            return Err(einval());
        }
        let index = state
            .queued
            .pop_front()
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EAGAIN))?;

        let now = Instant::now();
        state.last_frame = Some(now);
        let sequence = state.sequence;
        state.sequence += 1;
        let timestamp = state
            .stream_start
            .map_or(Duration::ZERO, |start| now.duration_since(start));
        self.events.push(Event::Dequeue(index));

        Ok(FrameMetadata {
            index,
            sequence,
            timestamp,
            bytes_used: state.format.size,
        })
    }

    fn stream_on(&self) -> io::Result<()> {
        if self.failures.stream_on {
            return Err(io::Error::from_raw_os_error(libc::EIO));
        }
        let mut state = self.state();
        state.streaming = true;
        state.stream_start = Some(Instant::now());
        state.last_frame = None;
        self.events.push(Event::StreamOn);
        Ok(())
    }

    fn stream_off(&self) -> io::Result<()> {
        self.events.push(Event::StreamOff);
        if self.failures.stream_off {
            return Err(io::Error::from_raw_os_error(libc::EIO));
        }
        let mut state = self.state();
        state.streaming = false;
        state.queued.clear();
        Ok(())
    }

    fn wait_readable(&self, timeout: Duration) -> io::Result<bool> {
        if self.failures.wait {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }

        let wait = {
            let state = self.state();
            let reference = state.last_frame.or(state.stream_start);
            match reference {
                Some(at) if state.streaming && !state.queued.is_empty() => {
                    let due = at + state.frame_interval;
                    Some(due.saturating_duration_since(Instant::now()))
                }
                _ => None,
            }
        };

        match wait {
            Some(remaining) if remaining <= timeout => {
                thread::sleep(remaining);
                Ok(true)
            }
            _ => {
                thread::sleep(timeout);
                Ok(false)
            }
        }
    }

    fn close(self) -> io::Result<()> {
        self.events.push(Event::Close);
        if self.failures.close {
            return Err(io::Error::from_raw_os_error(libc::EIO));
        }
        Ok(())
    }
}

/// Heap-backed stand-in for a mapped kernel buffer.
#[derive(Debug)]
pub struct MockRegion {
    index: u32,
    data: Vec<u8>,
    fail_unmap: bool,
    released: bool,
    events: EventLog,
}

impl MappedRegion for MockRegion {
    fn as_slice(&self) -> &[u8] {
        &self.data
    }

    fn unmap(mut self) -> io::Result<()> {
        self.released = true;
        if self.fail_unmap {
            self.events.push(Event::UnmapFailed(self.index));
            return Err(einval());
        }
        self.events.push(Event::Unmap(self.index));
        Ok(())
    }
}

impl Drop for MockRegion {
    fn drop(&mut self) {
        if !self.released {
            self.events.push(Event::Unmap(self.index));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_device_format() {
        let device = MockDevice::new();
        let format = device.format().expect("format should succeed");
        assert_eq!(format.width, 640);
        assert_eq!(format.height, 480);
        assert_eq!(format.size, 640 * 480 * 2);

        let actual = device
            .set_format(&CaptureFormat::new(1280, 720, FourCC::YUYV))
            .expect("set_format should succeed");
        assert_eq!(actual.width, 1280);
        assert_eq!(actual.height, 720);
    }

    #[test]
    fn test_mock_queue_is_fifo() {
        let device = MockDevice::new().with_frame_interval(Duration::ZERO);
        device.request_buffers(3).expect("reqbufs");
        for index in [2, 0, 1] {
            device.queue_buffer(index).expect("qbuf");
        }
        device.stream_on().expect("streamon");

        let order: Vec<u32> = (0..3)
            .map(|_| device.dequeue_buffer().expect("dqbuf").index)
            .collect();
        assert_eq!(order, vec![2, 0, 1]);
        assert!(device.dequeue_buffer().is_err());
    }

    #[test]
    fn test_mock_rejects_double_queue() {
        let device = MockDevice::new();
        device.request_buffers(2).expect("reqbufs");
        device.queue_buffer(1).expect("qbuf");
        assert!(device.queue_buffer(1).is_err());
        assert!(device.queue_buffer(2).is_err());
    }

    #[test]
    fn test_region_unmaps_once() {
        let device = MockDevice::new();
        let events = device.events();
        device.request_buffers(1).expect("reqbufs");

        let region = device.map_buffer(0).expect("map");
        region.unmap().expect("unmap");
        assert_eq!(events.count(&Event::Unmap(0)), 1);

        drop(device.map_buffer(0).expect("map"));
        assert_eq!(events.count(&Event::Unmap(0)), 2);
        assert_eq!(events.count(&Event::Map(0)), 2);
    }
}
