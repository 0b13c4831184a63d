//! Test utilities for the gadget crate
//!
//! [`MockDevice`] stands in for the kernel side of the UVC function: it
//! records every call, replays injected events and hands queued buffers back
//! in FIFO order.
//!
//! # Example
//!
//! ```
//! use gadget::test_utils::{DeviceCall, MockDevice};
//! use gadget::uvc::GadgetDevice;
//!
//! let mut device = MockDevice::new();
//! device.stream_on().unwrap();
//! assert_eq!(device.calls(), &[DeviceCall::StreamOn]);
//! ```

use crate::uvc::{GadgetDevice, MappedRegion, MemoryMode, QueueRequest, VideoFormat};
use common::{Error, Result};
use protocol::{RequestData, UvcEvent};
use std::collections::VecDeque;

/// One recorded device operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    DequeueEvent,
    SendResponse,
    Subscribe,
    Unsubscribe,
    SetFormat(VideoFormat),
    RequestBuffers(u32, MemoryMode),
    MapBuffer(u32),
    Queue(u32),
    Dequeue,
    StreamOn,
    StreamOff,
}

fn injected(operation: &'static str) -> Error {
    Error::ioctl(operation, std::io::Error::from_raw_os_error(nix::libc::EIO))
}

/// In-memory [`GadgetDevice`]
#[derive(Debug)]
pub struct MockDevice {
    /// Grant at most this many buffers
    pub grant_limit: Option<u32>,
    /// Fail `map_buffer` for this index
    pub fail_map_at: Option<u32>,
    /// Size of mapped buffers
    pub buffer_size: usize,
    pub fail_stream_on: bool,
    pub fail_set_format: bool,
    pub fail_send_response: bool,
    pub fail_queue: bool,
    events: VecDeque<UvcEvent>,
    calls: Vec<DeviceCall>,
    responses: Vec<RequestData>,
    formats: Vec<VideoFormat>,
    queued_requests: Vec<QueueRequest>,
    kernel_queue: VecDeque<u32>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            grant_limit: None,
            fail_map_at: None,
            buffer_size: 4096,
            fail_stream_on: false,
            fail_set_format: false,
            fail_send_response: false,
            fail_queue: false,
            events: VecDeque::new(),
            calls: Vec::new(),
            responses: Vec::new(),
            formats: Vec::new(),
            queued_requests: Vec::new(),
            kernel_queue: VecDeque::new(),
        }
    }

    /// Make an event available to `dequeue_event`
    pub fn push_event(&mut self, event: UvcEvent) {
        self.events.push_back(event);
    }

    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    pub fn calls(&self) -> &[DeviceCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// Responses sent so far, oldest first
    pub fn responses(&self) -> &[RequestData] {
        &self.responses
    }

    pub fn last_response(&self) -> Option<&RequestData> {
        self.responses.last()
    }

    /// Formats applied so far
    pub fn formats(&self) -> &[VideoFormat] {
        &self.formats
    }

    pub fn queued_requests(&self) -> &[QueueRequest] {
        &self.queued_requests
    }

    /// Buffers the mock kernel currently holds
    pub fn kernel_queue_len(&self) -> usize {
        self.kernel_queue.len()
    }
}

impl GadgetDevice for MockDevice {
    fn dequeue_event(&mut self) -> Result<Option<UvcEvent>> {
        self.calls.push(DeviceCall::DequeueEvent);
        Ok(self.events.pop_front())
    }

    fn send_response(&mut self, response: &RequestData) -> Result<()> {
        self.calls.push(DeviceCall::SendResponse);
        if self.fail_send_response {
            return Err(injected("UVCIOC_SEND_RESPONSE"));
        }
        self.responses.push(*response);
        Ok(())
    }

    fn subscribe_events(&mut self) -> Result<()> {
        self.calls.push(DeviceCall::Subscribe);
        Ok(())
    }

    fn unsubscribe_events(&mut self) -> Result<()> {
        self.calls.push(DeviceCall::Unsubscribe);
        Ok(())
    }

    fn set_format(&mut self, format: &VideoFormat) -> Result<VideoFormat> {
        self.calls.push(DeviceCall::SetFormat(*format));
        if self.fail_set_format {
            return Err(injected("VIDIOC_S_FMT"));
        }
        self.formats.push(*format);
        Ok(*format)
    }

    fn request_buffers(&mut self, count: u32, memory: MemoryMode) -> Result<u32> {
        self.calls.push(DeviceCall::RequestBuffers(count, memory));
        if count == 0 {
            self.kernel_queue.clear();
        }
        Ok(self.grant_limit.map_or(count, |limit| count.min(limit)))
    }

    fn map_buffer(&mut self, index: u32) -> Result<MappedRegion> {
        self.calls.push(DeviceCall::MapBuffer(index));
        if self.fail_map_at == Some(index) {
            return Err(injected("VIDIOC_QUERYBUF"));
        }
        MappedRegion::anonymous(self.buffer_size)
    }

    fn queue_buffer(&mut self, request: &QueueRequest) -> Result<()> {
        self.calls.push(DeviceCall::Queue(request.index));
        if self.fail_queue {
            return Err(injected("VIDIOC_QBUF"));
        }
        self.queued_requests.push(*request);
        self.kernel_queue.push_back(request.index);
        Ok(())
    }

    fn dequeue_buffer(&mut self, _memory: MemoryMode) -> Result<Option<u32>> {
        self.calls.push(DeviceCall::Dequeue);
        Ok(self.kernel_queue.pop_front())
    }

    fn stream_on(&mut self) -> Result<()> {
        self.calls.push(DeviceCall::StreamOn);
        if self.fail_stream_on {
            return Err(injected("VIDIOC_STREAMON"));
        }
        Ok(())
    }

    fn stream_off(&mut self) -> Result<()> {
        self.calls.push(DeviceCall::StreamOff);
        Ok(())
    }
}
