//! Raw V4L2 and UVC gadget kernel ABI
//!
//! `#[repr(C)]` mirrors of the videodev2.h / uvcvideo gadget structures used
//! by the gadget, and the ioctl wrappers generated with `nix`. Only the
//! fields this crate touches are given meaningful names; everything else is
//! kept for layout.

#![allow(non_camel_case_types)]

use nix::libc::{c_int, c_ulong, c_void, timespec, timeval};
use nix::{ioctl_read, ioctl_readwrite, ioctl_write_ptr};
use std::mem::size_of;

pub const V4L2_CAP_VIDEO_OUTPUT: u32 = 0x0000_0002;
pub const V4L2_CAP_STREAMING: u32 = 0x0400_0000;
pub const V4L2_CAP_DEVICE_CAPS: u32 = 0x8000_0000;

pub const V4L2_BUF_TYPE_VIDEO_OUTPUT: u32 = 2;
pub const V4L2_MEMORY_MMAP: u32 = 1;
pub const V4L2_MEMORY_USERPTR: u32 = 2;
pub const V4L2_FIELD_ANY: u32 = 0;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_capability {
    pub driver: [u8; 16],
    pub card: [u8; 32],
    pub bus_info: [u8; 32],
    pub version: u32,
    pub capabilities: u32,
    pub device_caps: u32,
    pub reserved: [u32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct v4l2_pix_format {
    pub width: u32,
    pub height: u32,
    pub pixelformat: u32,
    pub field: u32,
    pub bytesperline: u32,
    pub sizeimage: u32,
    pub colorspace: u32,
    pub priv_: u32,
    pub flags: u32,
    pub ycbcr_enc: u32,
    pub quantization: u32,
    pub xfer_func: u32,
}

/// `fmt` member of `struct v4l2_format`; pointer-aligned because some
/// variants (`v4l2_window`) carry pointers
#[repr(C)]
#[derive(Clone, Copy)]
pub union v4l2_format_union {
    pub pix: v4l2_pix_format,
    pub raw_data: [u8; 200],
    _align: [*const c_void; 200 / size_of::<usize>()],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_format {
    pub type_: u32,
    pub fmt: v4l2_format_union,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct v4l2_requestbuffers {
    pub count: u32,
    pub type_: u32,
    pub memory: u32,
    pub capabilities: u32,
    pub flags: u8,
    pub reserved: [u8; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct v4l2_timecode {
    pub type_: u32,
    pub flags: u32,
    pub frames: u8,
    pub seconds: u8,
    pub minutes: u8,
    pub hours: u8,
    pub userbits: [u8; 4],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union v4l2_buffer_m {
    pub offset: u32,
    pub userptr: c_ulong,
    pub planes: *mut c_void,
    pub fd: i32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_buffer {
    pub index: u32,
    pub type_: u32,
    pub bytesused: u32,
    pub flags: u32,
    pub field: u32,
    pub timestamp: timeval,
    pub timecode: v4l2_timecode,
    pub sequence: u32,
    pub memory: u32,
    pub m: v4l2_buffer_m,
    pub length: u32,
    pub reserved2: u32,
    pub request_fd: i32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union v4l2_event_union {
    pub data: [u8; 64],
    _align: u64,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_event {
    pub type_: u32,
    pub u: v4l2_event_union,
    pub pending: u32,
    pub sequence: u32,
    pub timestamp: timespec,
    pub id: u32,
    pub reserved: [u32; 8],
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct v4l2_event_subscription {
    pub type_: u32,
    pub id: u32,
    pub flags: u32,
    pub reserved: [u32; 5],
}

/// `struct uvc_request_data` from the UVC gadget header
#[repr(C)]
#[derive(Clone, Copy)]
pub struct uvc_request_data {
    pub length: i32,
    pub data: [u8; 60],
}

/// Kernel structs for which all-zero bytes are a valid value
pub trait KernelStruct: Copy {}

impl KernelStruct for v4l2_capability {}
impl KernelStruct for v4l2_format {}
impl KernelStruct for v4l2_requestbuffers {}
impl KernelStruct for v4l2_buffer {}
impl KernelStruct for v4l2_event {}
impl KernelStruct for v4l2_event_subscription {}
impl KernelStruct for uvc_request_data {}

/// All-zero value, the `CLEAR()` starting point of every ioctl argument
pub fn zeroed<T: KernelStruct>() -> T {
    // SAFETY: KernelStruct is only implemented for repr(C) aggregates of
    // integers, arrays and raw pointers.
    unsafe { std::mem::zeroed() }
}

impl v4l2_buffer {
    pub fn new(memory: u32) -> Self {
        let mut buffer: Self = zeroed();
        buffer.type_ = V4L2_BUF_TYPE_VIDEO_OUTPUT;
        buffer.memory = memory;
        buffer
    }
}

/// NUL-terminated byte field as a string
pub fn c_field(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

ioctl_read!(vidioc_querycap, b'V', 0, v4l2_capability);
ioctl_readwrite!(vidioc_g_fmt, b'V', 4, v4l2_format);
ioctl_readwrite!(vidioc_s_fmt, b'V', 5, v4l2_format);
ioctl_readwrite!(vidioc_reqbufs, b'V', 8, v4l2_requestbuffers);
ioctl_readwrite!(vidioc_querybuf, b'V', 9, v4l2_buffer);
ioctl_readwrite!(vidioc_qbuf, b'V', 15, v4l2_buffer);
ioctl_readwrite!(vidioc_dqbuf, b'V', 17, v4l2_buffer);
ioctl_write_ptr!(vidioc_streamon, b'V', 18, c_int);
ioctl_write_ptr!(vidioc_streamoff, b'V', 19, c_int);
ioctl_read!(vidioc_dqevent, b'V', 89, v4l2_event);
ioctl_write_ptr!(vidioc_subscribe_event, b'V', 90, v4l2_event_subscription);
ioctl_write_ptr!(vidioc_unsubscribe_event, b'V', 91, v4l2_event_subscription);
ioctl_write_ptr!(uvcioc_send_response, b'U', 1, uvc_request_data);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_struct_sizes_match_kernel_abi() {
        assert_eq!(size_of::<v4l2_capability>(), 104);
        assert_eq!(size_of::<v4l2_pix_format>(), 48);
        assert_eq!(size_of::<v4l2_requestbuffers>(), 20);
        assert_eq!(size_of::<v4l2_event_subscription>(), 32);
        assert_eq!(size_of::<uvc_request_data>(), 64);
        assert_eq!(size_of::<v4l2_format>(), 4 + 200 + (size_of::<usize>() - 4));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_struct_sizes_64bit() {
        assert_eq!(size_of::<v4l2_buffer>(), 88);
        assert_eq!(size_of::<v4l2_event>(), 136);
    }

    #[test]
    fn test_c_field_stops_at_nul() {
        let mut bytes = [0u8; 16];
        bytes[..6].copy_from_slice(b"g_uvc\0");
        assert_eq!(c_field(&bytes), "g_uvc");
        assert_eq!(c_field(b"full"), "full");
    }
}
