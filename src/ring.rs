//! Ring of memory-mapped kernel frame buffers.

use std::io;
use std::ops::Range;

use tracing::{debug, info, warn};

use crate::error::{BufferError, Result};
use crate::traits::{CaptureDevice, MappedRegion};

/// Number of kernel buffers a capture session requests.
pub const BUFFER_COUNT: u32 = 4;

/// One kernel buffer mapped into the process.
///
/// The region is unmapped exactly once: by [`BufferRing::release`], or when
/// the buffer is dropped.
#[derive(Debug)]
pub struct MappedBuffer<R: MappedRegion> {
    index: u32,
    region: Option<R>,
}

impl<R: MappedRegion> MappedBuffer<R> {
    /// Kernel buffer index.
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Mapped bytes; empty once unmapped.
    pub fn as_slice(&self) -> &[u8] {
        match &self.region {
            Some(region) => region.as_slice(),
            None => &[],
        }
    }

    /// Mapping length in bytes.
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// Whether the mapping is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn unmap(&mut self) -> io::Result<()> {
        match self.region.take() {
            Some(region) => region.unmap(),
            None => Ok(()),
        }
    }
}

/// The mapped buffers, indexed by kernel buffer index.
#[derive(Debug)]
pub struct BufferRing<R: MappedRegion> {
    buffers: Vec<MappedBuffer<R>>,
}

impl<R: MappedRegion> BufferRing<R> {
    /// Request `count` mmap buffers from the driver and map each of them.
    ///
    /// The format must already be set: the driver sizes buffers from it. The
    /// ring holds as many buffers as the driver grants. If any mapping fails,
    /// the ones already mapped are unmapped before returning.
    pub fn allocate<D>(device: &D, count: u32) -> Result<Self>
    where
        D: CaptureDevice<Region = R> + ?Sized,
    {
        if count == 0 {
            return Err(BufferError::AllocationFailed(io::Error::new(
                io::ErrorKind::InvalidInput,
                "buffer count must be at least 1",
            ))
            .into());
        }

        let granted = device
            .request_buffers(count)
            .map_err(BufferError::AllocationFailed)?;
        if granted == 0 {
            return Err(BufferError::AllocationFailed(io::Error::other(
                "driver granted no buffers",
            ))
            .into());
        }
        if granted != count {
            warn!(requested = count, granted, "driver adjusted the buffer count");
        }

        let mut buffers = Vec::new();
        buffers
            .try_reserve_exact(granted as usize)
            .map_err(|_| BufferError::OutOfMemory)?;
        let mut ring = Self { buffers };

        for index in 0..granted {
            match device.map_buffer(index) {
                Ok(region) => {
                    debug!(index, len = region.as_slice().len(), "mapped buffer");
                    ring.buffers.push(MappedBuffer {
                        index,
                        region: Some(region),
                    });
                }
                Err(source) => {
                    if let Err(err) = ring.release() {
                        warn!("cleanup after failed mapping: {err}");
                    }
                    return Err(BufferError::MapFailed { index, source }.into());
                }
            }
        }

        info!(
            count = ring.len(),
            buffer_len = ring.buffer_len(),
            "buffer ring mapped"
        );
        Ok(ring)
    }

    /// Unmap every buffer.
    ///
    /// Keeps going after a failure and reports the first index that failed.
    pub fn release(mut self) -> Result<()> {
        let mut first_failure = None;
        for buffer in &mut self.buffers {
            let index = buffer.index;
            if let Err(source) = buffer.unmap() {
                warn!(index, "munmap failed: {source}");
                if first_failure.is_none() {
                    first_failure = Some(BufferError::UnmapFailed { index, source });
                }
            }
        }

        match first_failure {
            Some(err) => Err(err.into()),
            None => {
                debug!(count = self.len(), "buffer ring unmapped");
                Ok(())
            }
        }
    }

    /// Number of buffers in the ring.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether the ring holds no buffers.
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Length of the first buffer; every buffer shares the frame size.
    pub fn buffer_len(&self) -> usize {
        self.buffers.first().map_or(0, MappedBuffer::len)
    }

    /// Buffer for a kernel index.
    pub fn get(&self, index: u32) -> Option<&MappedBuffer<R>> {
        self.buffers.get(index as usize)
    }

    /// Iterate over the buffers in index order.
    pub fn iter(&self) -> impl Iterator<Item = &MappedBuffer<R>> {
        self.buffers.iter()
    }

    /// The valid kernel indices.
    pub fn indices(&self) -> Range<u32> {
        #[allow(clippy::cast_possible_truncation)]
        let len = self.buffers.len() as u32;
        0..len
    }
}
