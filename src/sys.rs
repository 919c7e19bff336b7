//! Raw V4L2 calls on a descriptor.
//!
//! Every `unsafe` block in the crate lives here. Each function issues one
//! ioctl (or `mmap`/`munmap`/`poll`/`close`) on zero-initialised kernel
//! structs and converts the result into crate types.
#![allow(unsafe_code)]

use std::ffi::c_void;
use std::io;
use std::mem;
use std::os::fd::RawFd;
use std::ptr::{self, NonNull};
use std::slice;
use std::time::Duration;

use v4l::buffer::Type;
use v4l::memory::Memory;
use v4l::v4l2;
use v4l::v4l2::vidioc;
use v4l::v4l_sys::{
    v4l2_buffer, v4l2_capability, v4l2_fmtdesc, v4l2_format, v4l2_requestbuffers,
    v4l2_streamparm,
};

use crate::traits::{
    CapabilityReport, CaptureFormat, FieldOrder, FormatDescription, FourCC, FrameMetadata,
    MappedRegion,
};

/// Upper bound on `VIDIOC_ENUM_FMT` iterations.
const MAX_FORMATS: u32 = 64;

const BUF_TYPE: u32 = Type::VideoCapture as u32;
const MEMORY: u32 = Memory::Mmap as u32;

fn zeroed<T>() -> T {
    // SAFETY: only used for the bindgen-generated V4L2 structs above, which
    // are plain data where all-zero is a valid value.
    unsafe { mem::zeroed() }
}

fn buffer_desc(index: u32) -> v4l2_buffer {
    let mut buf: v4l2_buffer = zeroed();
    buf.index = index;
    buf.type_ = BUF_TYPE;
    buf.memory = MEMORY;
    buf
}

pub fn query_capabilities(fd: RawFd) -> io::Result<CapabilityReport> {
    let mut cap: v4l2_capability = zeroed();
    // SAFETY: `cap` is a valid v4l2_capability for the duration of the call.
    unsafe {
        v4l2::ioctl(
            fd,
            vidioc::VIDIOC_QUERYCAP,
            ptr::addr_of_mut!(cap).cast::<c_void>(),
        )?;
    }
    let caps = v4l::Capabilities::from(cap);

    Ok(CapabilityReport {
        driver: caps.driver,
        card: caps.card,
        bus_info: caps.bus,
        version: caps.version,
        can_capture: caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE),
        can_stream: caps.capabilities.contains(v4l::capability::Flags::STREAMING),
        formats: enumerate_formats(fd),
    })
}

/// Walk `VIDIOC_ENUM_FMT` until the driver stops answering.
fn enumerate_formats(fd: RawFd) -> Vec<FormatDescription> {
    let mut formats = Vec::new();
    for index in 0..MAX_FORMATS {
        let mut desc: v4l2_fmtdesc = zeroed();
        desc.index = index;
        desc.type_ = BUF_TYPE;
        // SAFETY: `desc` is a valid v4l2_fmtdesc for the duration of the call.
        let res = unsafe {
            v4l2::ioctl(
                fd,
                vidioc::VIDIOC_ENUM_FMT,
                ptr::addr_of_mut!(desc).cast::<c_void>(),
            )
        };
        if res.is_err() {
            break;
        }
        let desc = v4l::format::Description::from(desc);
        formats.push(FormatDescription {
            index,
            fourcc: FourCC::from(desc.fourcc),
            description: desc.description,
        });
    }
    formats
}

fn pix_to_format(fmt: &v4l2_format) -> CaptureFormat {
    // SAFETY: `type_` is VIDEO_CAPTURE, so `pix` is the active union member.
    let pix = unsafe { fmt.fmt.pix };
    CaptureFormat {
        width: pix.width,
        height: pix.height,
        fourcc: FourCC::from_u32(pix.pixelformat),
        field: FieldOrder::from(pix.field),
        stride: pix.bytesperline,
        size: pix.sizeimage,
    }
}

pub fn set_format(fd: RawFd, format: &CaptureFormat) -> io::Result<CaptureFormat> {
    let mut fmt: v4l2_format = zeroed();
    fmt.type_ = BUF_TYPE;
    // SAFETY: writing the `pix` member of a zeroed union, then handing the
    // struct to the kernel which writes back the applied format.
    unsafe {
        fmt.fmt.pix.width = format.width;
        fmt.fmt.pix.height = format.height;
        fmt.fmt.pix.pixelformat = format.fourcc.to_u32();
        fmt.fmt.pix.field = u32::from(format.field);
        v4l2::ioctl(
            fd,
            vidioc::VIDIOC_S_FMT,
            ptr::addr_of_mut!(fmt).cast::<c_void>(),
        )?;
    }
    Ok(pix_to_format(&fmt))
}

pub fn get_format(fd: RawFd) -> io::Result<CaptureFormat> {
    let mut fmt: v4l2_format = zeroed();
    fmt.type_ = BUF_TYPE;
    // SAFETY: `fmt` is a valid v4l2_format for the duration of the call.
    unsafe {
        v4l2::ioctl(
            fd,
            vidioc::VIDIOC_G_FMT,
            ptr::addr_of_mut!(fmt).cast::<c_void>(),
        )?;
    }
    Ok(pix_to_format(&fmt))
}

pub fn set_frame_interval(fd: RawFd, numerator: u32, denominator: u32) -> io::Result<()> {
    let mut parm: v4l2_streamparm = zeroed();
    parm.type_ = BUF_TYPE;
    // SAFETY: writing the `capture` member of a zeroed union; `parm` is valid
    // for the duration of the call.
    unsafe {
        parm.parm.capture.timeperframe.numerator = numerator;
        parm.parm.capture.timeperframe.denominator = denominator;
        v4l2::ioctl(
            fd,
            vidioc::VIDIOC_S_PARM,
            ptr::addr_of_mut!(parm).cast::<c_void>(),
        )
    }
}

pub fn request_buffers(fd: RawFd, count: u32) -> io::Result<u32> {
    let mut req: v4l2_requestbuffers = zeroed();
    req.count = count;
    req.type_ = BUF_TYPE;
    req.memory = MEMORY;
    // SAFETY: `req` is a valid v4l2_requestbuffers for the duration of the call.
    unsafe {
        v4l2::ioctl(
            fd,
            vidioc::VIDIOC_REQBUFS,
            ptr::addr_of_mut!(req).cast::<c_void>(),
        )?;
    }
    Ok(req.count)
}

pub fn map_buffer(fd: RawFd, index: u32) -> io::Result<MmapRegion> {
    let mut buf = buffer_desc(index);
    // SAFETY: `buf` is valid for QUERYBUF; `m.offset` is the active member
    // for MMAP memory. The mapping length and offset come from the driver.
    unsafe {
        v4l2::ioctl(
            fd,
            vidioc::VIDIOC_QUERYBUF,
            ptr::addr_of_mut!(buf).cast::<c_void>(),
        )?;
        let len = buf.length as usize;
        let offset = libc::off_t::try_from(buf.m.offset)
            .map_err(|_| io::Error::from_raw_os_error(libc::EOVERFLOW))?;
        let addr = v4l2::mmap(
            ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            offset,
        )?;
        let ptr = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EFAULT))?;
        Ok(MmapRegion { ptr, len })
    }
}

pub fn queue_buffer(fd: RawFd, index: u32) -> io::Result<()> {
    let mut buf = buffer_desc(index);
    // SAFETY: `buf` is a valid v4l2_buffer for the duration of the call.
    unsafe {
        v4l2::ioctl(
            fd,
            vidioc::VIDIOC_QBUF,
            ptr::addr_of_mut!(buf).cast::<c_void>(),
        )
    }
}

pub fn dequeue_buffer(fd: RawFd) -> io::Result<FrameMetadata> {
    let mut buf = buffer_desc(0);
    // SAFETY: `buf` is a valid v4l2_buffer for the duration of the call.
    unsafe {
        v4l2::ioctl(
            fd,
            vidioc::VIDIOC_DQBUF,
            ptr::addr_of_mut!(buf).cast::<c_void>(),
        )?;
    }

    // V4L2 timestamps are never negative in practice
    let secs = u64::try_from(buf.timestamp.tv_sec).unwrap_or(0);
    let micros = u64::try_from(buf.timestamp.tv_usec).unwrap_or(0);

    Ok(FrameMetadata {
        index: buf.index,
        sequence: buf.sequence,
        timestamp: Duration::from_secs(secs) + Duration::from_micros(micros),
        bytes_used: buf.bytesused,
    })
}

pub fn stream_on(fd: RawFd) -> io::Result<()> {
    let mut typ = BUF_TYPE;
    // SAFETY: STREAMON takes a pointer to the buffer type.
    unsafe {
        v4l2::ioctl(
            fd,
            vidioc::VIDIOC_STREAMON,
            ptr::addr_of_mut!(typ).cast::<c_void>(),
        )
    }
}

pub fn stream_off(fd: RawFd) -> io::Result<()> {
    let mut typ = BUF_TYPE;
    // SAFETY: STREAMOFF takes a pointer to the buffer type.
    unsafe {
        v4l2::ioctl(
            fd,
            vidioc::VIDIOC_STREAMOFF,
            ptr::addr_of_mut!(typ).cast::<c_void>(),
        )
    }
}

/// `poll` for readability. `Ok(false)` on timeout.
pub fn wait_readable(fd: RawFd, timeout: Duration) -> io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    // SAFETY: `pfd` is a single valid pollfd for the duration of the call.
    let ready = unsafe { libc::poll(&mut pfd, 1, poll_millis(timeout)) };
    match ready {
        -1 => Err(io::Error::last_os_error()),
        0 => Ok(false),
        _ => Ok(true),
    }
}

/// Whole milliseconds for `poll`, rounded up so a non-zero timeout never
/// becomes an immediate return.
fn poll_millis(timeout: Duration) -> libc::c_int {
    libc::c_int::try_from(timeout.as_nanos().div_ceil(1_000_000)).unwrap_or(libc::c_int::MAX)
}

/// Close a descriptor this process owns, reporting the error.
pub fn close(fd: RawFd) -> io::Result<()> {
    // SAFETY: the caller gives up ownership of `fd`; it is not used again.
    if unsafe { libc::close(fd) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// A `MAP_SHARED` mapping of one kernel buffer.
#[derive(Debug)]
pub struct MmapRegion {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the region is plain memory shared with the driver. The queue/dequeue
// handshake keeps the driver and userspace from touching it at the same time,
// and userspace only reads it.
unsafe impl Send for MmapRegion {}
// SAFETY: see above; `&MmapRegion` only exposes reads.
unsafe impl Sync for MmapRegion {}

impl MmapRegion {
    fn munmap(&self) -> io::Result<()> {
        // SAFETY: `ptr`/`len` describe a mapping created by `map_buffer` that
        // has not been unmapped; callers guarantee this runs once.
        unsafe { v4l2::munmap(self.ptr.as_ptr().cast::<c_void>(), self.len) }
    }
}

impl MappedRegion for MmapRegion {
    fn as_slice(&self) -> &[u8] {
        // SAFETY: the mapping is `len` bytes long and lives until unmapped,
        // which requires ownership of `self`.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    fn unmap(self) -> io::Result<()> {
        let region = mem::ManuallyDrop::new(self);
        region.munmap()
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        if let Err(err) = self.munmap() {
            tracing::warn!(len = self.len, "munmap failed on drop: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_millis_rounds_up() {
        assert_eq!(poll_millis(Duration::from_micros(1)), 1);
        assert_eq!(poll_millis(Duration::from_micros(999)), 1);
        assert_eq!(poll_millis(Duration::from_micros(1500)), 2);
        assert_eq!(poll_millis(Duration::from_millis(250)), 250);
    }

    #[test]
    fn test_poll_millis_zero_and_huge() {
        assert_eq!(poll_millis(Duration::ZERO), 0);
        assert_eq!(poll_millis(Duration::from_secs(u64::MAX)), libc::c_int::MAX);
    }
}
