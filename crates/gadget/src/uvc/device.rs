//! UVC gadget video device
//!
//! [`GadgetDevice`] is everything the session needs from the kernel: the
//! control-event channel, the response channel and the video output queue.
//! [`V4l2Device`] implements it on top of a `/dev/videoN` node exposed by the
//! UVC gadget function.

use super::v4l2::{self, zeroed};
use common::{Error, Result};
use nix::errno::Errno;
use nix::libc::{c_int, c_ulong, c_void};
use nix::sys::mman::{MapFlags, ProtFlags, mmap, mmap_anonymous, munmap};
use protocol::{RequestData, UVC_EVENT_TYPES, UvcEvent};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::num::NonZeroUsize;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// How frame memory is shared with the kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryMode {
    /// Kernel-allocated buffers mapped into the process
    Mmap,
    /// Process-allocated buffers registered by address
    #[default]
    UserPtr,
}

impl MemoryMode {
    pub fn as_raw(&self) -> u32 {
        match self {
            Self::Mmap => v4l2::V4L2_MEMORY_MMAP,
            Self::UserPtr => v4l2::V4L2_MEMORY_USERPTR,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Mmap => "memory mapping",
            Self::UserPtr => "user pointer I/O",
        }
    }
}

impl FromStr for MemoryMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mmap" => Ok(Self::Mmap),
            "userptr" => Ok(Self::UserPtr),
            other => Err(format!("unknown memory mode '{}', expected mmap or userptr", other)),
        }
    }
}

impl fmt::Display for MemoryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Mmap => "mmap",
            Self::UserPtr => "userptr",
        })
    }
}

/// Pixel format applied to the output queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoFormat {
    pub fourcc: u32,
    pub width: u32,
    pub height: u32,
    pub size_image: u32,
}

/// Arguments of one VIDIOC_QBUF
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueRequest {
    pub index: u32,
    pub memory: MemoryMode,
    pub bytes_used: u32,
    /// Start address for user-pointer buffers, zero otherwise
    pub user_ptr: c_ulong,
    pub length: u32,
}

/// Memory mapping that is unmapped on drop
#[derive(Debug)]
pub struct MappedRegion {
    ptr: NonNull<c_void>,
    len: usize,
}

impl MappedRegion {
    /// Map `len` bytes of a device buffer at `offset`
    pub fn map_device<F: AsFd>(fd: F, len: usize, offset: u32) -> Result<Self> {
        let length = NonZeroUsize::new(len)
            .ok_or_else(|| Error::Buffer("cannot map a zero-length buffer".to_string()))?;

        // SAFETY: a fresh shared mapping chosen by the kernel; no existing
        // Rust memory is aliased.
        let ptr = unsafe {
            mmap(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                fd,
                offset as nix::libc::off_t,
            )
        }
        .map_err(|e| Error::ioctl("mmap", e))?;

        Ok(Self { ptr, len })
    }

    /// Private anonymous mapping, zero-filled
    pub fn anonymous(len: usize) -> Result<Self> {
        let length = NonZeroUsize::new(len)
            .ok_or_else(|| Error::Buffer("cannot map a zero-length buffer".to_string()))?;

        // SAFETY: as above, anonymous memory is not shared with anything.
        let ptr = unsafe {
            mmap_anonymous(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_PRIVATE,
            )
        }
        .map_err(|e| Error::ioctl("mmap", e))?;

        Ok(Self { ptr, len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the mapping is valid for `len` bytes until drop.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr().cast::<u8>(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr().cast::<u8>(), self.len) }
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        // SAFETY: ptr/len came from a successful mmap and are unmapped once.
        if let Err(e) = unsafe { munmap(self.ptr, self.len) } {
            warn!("munmap of {} bytes failed: {}", self.len, e);
        }
    }
}

/// Kernel side of a UVC gadget function
pub trait GadgetDevice {
    /// Next pending control event, `None` when the queue is empty
    fn dequeue_event(&mut self) -> Result<Option<UvcEvent>>;

    /// Answer the setup request currently pending in the driver
    fn send_response(&mut self, response: &RequestData) -> Result<()>;

    fn subscribe_events(&mut self) -> Result<()>;

    fn unsubscribe_events(&mut self) -> Result<()>;

    /// Apply a format to the output queue; returns what the driver reports back
    fn set_format(&mut self, format: &VideoFormat) -> Result<VideoFormat>;

    /// Ask for `count` buffers (0 frees them); returns the granted count
    fn request_buffers(&mut self, count: u32, memory: MemoryMode) -> Result<u32>;

    /// Query and map a kernel-allocated buffer
    fn map_buffer(&mut self, index: u32) -> Result<MappedRegion>;

    fn queue_buffer(&mut self, request: &QueueRequest) -> Result<()>;

    /// Index of a buffer the kernel is done with, `None` when nothing is ready
    fn dequeue_buffer(&mut self, memory: MemoryMode) -> Result<Option<u32>>;

    fn stream_on(&mut self) -> Result<()>;

    fn stream_off(&mut self) -> Result<()>;
}

/// Require video output with streaming I/O, as QUERYCAP reports them
fn check_capabilities(path: &Path, capabilities: u32, device_caps: u32) -> Result<()> {
    let caps = if capabilities & v4l2::V4L2_CAP_DEVICE_CAPS != 0 {
        device_caps
    } else {
        capabilities
    };
    if caps & v4l2::V4L2_CAP_VIDEO_OUTPUT == 0 {
        return Err(Error::Device(format!(
            "{} is not a video output device",
            path.display()
        )));
    }
    if caps & v4l2::V4L2_CAP_STREAMING == 0 {
        return Err(Error::Device(format!(
            "{} does not support streaming I/O",
            path.display()
        )));
    }
    Ok(())
}

/// V4L2 output node of the UVC gadget function
#[derive(Debug)]
pub struct V4l2Device {
    file: File,
    path: PathBuf,
}

impl V4l2Device {
    /// Open the node non-blocking and check it can output video
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(nix::libc::O_NONBLOCK)
            .open(path)
            .map_err(|e| Error::Device(format!("cannot open {}: {}", path.display(), e)))?;

        let mut cap: v4l2::v4l2_capability = zeroed();
        // SAFETY: cap is a properly sized, writable v4l2_capability.
        unsafe { v4l2::vidioc_querycap(file.as_raw_fd(), &mut cap) }
            .map_err(|e| Error::ioctl("VIDIOC_QUERYCAP", e))?;

        check_capabilities(path, cap.capabilities, cap.device_caps)?;

        info!(
            "UVC device {} opened: {} on bus {}",
            path.display(),
            v4l2::c_field(&cap.card),
            v4l2::c_field(&cap.bus_info)
        );

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    fn subscription(&mut self, subscribe: bool) -> Result<()> {
        for event_type in UVC_EVENT_TYPES {
            let sub = v4l2::v4l2_event_subscription {
                type_: event_type,
                ..Default::default()
            };
            // SAFETY: sub is a valid v4l2_event_subscription for the call.
            let result = unsafe {
                if subscribe {
                    v4l2::vidioc_subscribe_event(self.fd(), &sub)
                } else {
                    v4l2::vidioc_unsubscribe_event(self.fd(), &sub)
                }
            };
            let request = if subscribe {
                "VIDIOC_SUBSCRIBE_EVENT"
            } else {
                "VIDIOC_UNSUBSCRIBE_EVENT"
            };
            result.map_err(|e| Error::ioctl(request, e))?;
        }
        Ok(())
    }

    fn stream(&mut self, on: bool) -> Result<()> {
        let buffer_type = v4l2::V4L2_BUF_TYPE_VIDEO_OUTPUT as c_int;
        // SAFETY: both ioctls read a single int buffer type.
        let result = unsafe {
            if on {
                v4l2::vidioc_streamon(self.fd(), &buffer_type)
            } else {
                v4l2::vidioc_streamoff(self.fd(), &buffer_type)
            }
        };
        result.map_err(|e| Error::ioctl(if on { "VIDIOC_STREAMON" } else { "VIDIOC_STREAMOFF" }, e))?;
        Ok(())
    }
}

impl AsRawFd for V4l2Device {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl AsFd for V4l2Device {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl GadgetDevice for V4l2Device {
    fn dequeue_event(&mut self) -> Result<Option<UvcEvent>> {
        let mut event: v4l2::v4l2_event = zeroed();
        // SAFETY: event is a properly sized, writable v4l2_event.
        match unsafe { v4l2::vidioc_dqevent(self.fd(), &mut event) } {
            Ok(_) => {}
            Err(Errno::ENOENT) | Err(Errno::EAGAIN) => return Ok(None),
            Err(e) => return Err(Error::ioctl("VIDIOC_DQEVENT", e)),
        }

        // SAFETY: every variant of the union is plain bytes.
        let payload = unsafe { event.u.data };
        Ok(Some(UvcEvent::decode(event.type_, &payload)?))
    }

    fn send_response(&mut self, response: &RequestData) -> Result<()> {
        let raw = v4l2::uvc_request_data {
            length: response.length,
            data: response.data,
        };
        // SAFETY: raw is a valid uvc_request_data for the call.
        unsafe { v4l2::uvcioc_send_response(self.fd(), &raw) }
            .map_err(|e| Error::ioctl("UVCIOC_SEND_RESPONSE", e))?;
        Ok(())
    }

    fn subscribe_events(&mut self) -> Result<()> {
        self.subscription(true)
    }

    fn unsubscribe_events(&mut self) -> Result<()> {
        self.subscription(false)
    }

    fn set_format(&mut self, format: &VideoFormat) -> Result<VideoFormat> {
        let mut fmt: v4l2::v4l2_format = zeroed();
        fmt.type_ = v4l2::V4L2_BUF_TYPE_VIDEO_OUTPUT;
        fmt.fmt.pix = v4l2::v4l2_pix_format {
            width: format.width,
            height: format.height,
            pixelformat: format.fourcc,
            field: v4l2::V4L2_FIELD_ANY,
            sizeimage: format.size_image,
            ..Default::default()
        };

        // SAFETY: fmt is a properly initialised v4l2_format.
        unsafe { v4l2::vidioc_s_fmt(self.fd(), &mut fmt) }
            .map_err(|e| Error::ioctl("VIDIOC_S_FMT", e))?;

        let mut current: v4l2::v4l2_format = zeroed();
        current.type_ = v4l2::V4L2_BUF_TYPE_VIDEO_OUTPUT;
        // SAFETY: as above.
        unsafe { v4l2::vidioc_g_fmt(self.fd(), &mut current) }
            .map_err(|e| Error::ioctl("VIDIOC_G_FMT", e))?;

        // SAFETY: G_FMT on an output queue fills the `pix` variant.
        let pix = unsafe { current.fmt.pix };
        Ok(VideoFormat {
            fourcc: pix.pixelformat,
            width: pix.width,
            height: pix.height,
            size_image: pix.sizeimage,
        })
    }

    fn request_buffers(&mut self, count: u32, memory: MemoryMode) -> Result<u32> {
        let mut req = v4l2::v4l2_requestbuffers {
            count,
            type_: v4l2::V4L2_BUF_TYPE_VIDEO_OUTPUT,
            memory: memory.as_raw(),
            ..Default::default()
        };
        // SAFETY: req is a valid v4l2_requestbuffers.
        unsafe { v4l2::vidioc_reqbufs(self.fd(), &mut req) }
            .map_err(|e| Error::ioctl("VIDIOC_REQBUFS", e))?;

        debug!("VIDIOC_REQBUFS: {} requested, {} granted ({})", count, req.count, memory.name());
        Ok(req.count)
    }

    fn map_buffer(&mut self, index: u32) -> Result<MappedRegion> {
        let mut buf = v4l2::v4l2_buffer::new(v4l2::V4L2_MEMORY_MMAP);
        buf.index = index;
        // SAFETY: buf is a valid v4l2_buffer.
        unsafe { v4l2::vidioc_querybuf(self.fd(), &mut buf) }
            .map_err(|e| Error::ioctl("VIDIOC_QUERYBUF", e))?;

        // SAFETY: QUERYBUF on an MMAP buffer fills `m.offset`.
        let offset = unsafe { buf.m.offset };
        let region = MappedRegion::map_device(&self.file, buf.length as usize, offset)?;
        debug!("buffer {} mapped at offset {:#x}, {} bytes", index, offset, buf.length);
        Ok(region)
    }

    fn queue_buffer(&mut self, request: &QueueRequest) -> Result<()> {
        let mut buf = v4l2::v4l2_buffer::new(request.memory.as_raw());
        buf.index = request.index;
        buf.bytesused = request.bytes_used;
        buf.length = request.length;
        if request.memory == MemoryMode::UserPtr {
            buf.m.userptr = request.user_ptr;
        }

        // SAFETY: buf is a valid v4l2_buffer; user memory outlives the
        // queued period (owned by the buffer pipeline).
        unsafe { v4l2::vidioc_qbuf(self.fd(), &mut buf) }
            .map_err(|e| Error::ioctl("VIDIOC_QBUF", e))?;
        Ok(())
    }

    fn dequeue_buffer(&mut self, memory: MemoryMode) -> Result<Option<u32>> {
        let mut buf = v4l2::v4l2_buffer::new(memory.as_raw());
        // SAFETY: buf is a valid v4l2_buffer.
        match unsafe { v4l2::vidioc_dqbuf(self.fd(), &mut buf) } {
            Ok(_) => Ok(Some(buf.index)),
            Err(Errno::EAGAIN) => Ok(None),
            Err(e) => Err(Error::ioctl("VIDIOC_DQBUF", e)),
        }
    }

    fn stream_on(&mut self) -> Result<()> {
        self.stream(true)
    }

    fn stream_off(&mut self) -> Result<()> {
        self.stream(false)
    }
}
