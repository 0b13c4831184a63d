//! Control-channel messages exchanged with the UVC gadget driver
//!
//! The kernel delivers host activity as V4L2 events in the private range.
//! Each event carries a 64-byte payload whose meaning depends on the type:
//! a USB setup packet, a data-stage payload, or the connection speed.
//! Replies go back as [`RequestData`] through `UVCIOC_SEND_RESPONSE`.

use crate::error::{ProtocolError, Result};
use crate::types::{STALL_LENGTH, USB_RECIP_INTERFACE, USB_RECIP_MASK, USB_TYPE_CLASS, USB_TYPE_MASK};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// First event type of the V4L2 driver-private range
pub const V4L2_EVENT_PRIVATE_START: u32 = 0x0800_0000;

pub const UVC_EVENT_CONNECT: u32 = V4L2_EVENT_PRIVATE_START;
pub const UVC_EVENT_DISCONNECT: u32 = V4L2_EVENT_PRIVATE_START + 1;
pub const UVC_EVENT_STREAMON: u32 = V4L2_EVENT_PRIVATE_START + 2;
pub const UVC_EVENT_STREAMOFF: u32 = V4L2_EVENT_PRIVATE_START + 3;
pub const UVC_EVENT_SETUP: u32 = V4L2_EVENT_PRIVATE_START + 4;
pub const UVC_EVENT_DATA: u32 = V4L2_EVENT_PRIVATE_START + 5;

/// Every event type the gadget subscribes to
pub const UVC_EVENT_TYPES: [u32; 6] = [
    UVC_EVENT_CONNECT,
    UVC_EVENT_DISCONNECT,
    UVC_EVENT_SETUP,
    UVC_EVENT_DATA,
    UVC_EVENT_STREAMON,
    UVC_EVENT_STREAMOFF,
];

/// Size of the event payload area
pub const EVENT_PAYLOAD_SIZE: usize = 64;

/// USB setup packet (`struct usb_ctrlrequest`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CtrlRequest {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl CtrlRequest {
    /// Size of the setup packet in bytes
    pub const SIZE: usize = 8;

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(ProtocolError::BufferTooSmall {
                needed: Self::SIZE,
                available: bytes.len(),
            });
        }

        let mut reader = Cursor::new(bytes);
        Ok(Self {
            request_type: reader.read_u8()?,
            request: reader.read_u8()?,
            value: reader.read_u16::<LittleEndian>()?,
            index: reader.read_u16::<LittleEndian>()?,
            length: reader.read_u16::<LittleEndian>()?,
        })
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let value = self.value.to_le_bytes();
        let index = self.index.to_le_bytes();
        let length = self.length.to_le_bytes();
        [
            self.request_type,
            self.request,
            value[0],
            value[1],
            index[0],
            index[1],
            length[0],
            length[1],
        ]
    }

    /// Whether this is a class-specific request
    pub fn is_class(&self) -> bool {
        self.request_type & USB_TYPE_MASK == USB_TYPE_CLASS
    }

    /// Whether the request is addressed to an interface
    pub fn is_interface_recipient(&self) -> bool {
        self.request_type & USB_RECIP_MASK == USB_RECIP_INTERFACE
    }

    /// Interface number (low byte of wIndex)
    pub fn interface(&self) -> u8 {
        (self.index & 0xff) as u8
    }

    /// Entity id within the interface (high byte of wIndex)
    pub fn entity(&self) -> u8 {
        (self.index >> 8) as u8
    }

    /// Control selector (high byte of wValue)
    pub fn selector(&self) -> u8 {
        (self.value >> 8) as u8
    }
}

/// Request/response payload (`struct uvc_request_data`)
///
/// A negative `length` in a response stalls the control endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestData {
    pub length: i32,
    pub data: [u8; RequestData::CAPACITY],
}

impl Default for RequestData {
    fn default() -> Self {
        Self::stall()
    }
}

impl RequestData {
    /// Bytes available for payload
    pub const CAPACITY: usize = 60;

    /// Size of the structure on the wire
    pub const SIZE: usize = 4 + Self::CAPACITY;

    /// Response that stalls the control endpoint
    pub fn stall() -> Self {
        Self {
            length: STALL_LENGTH,
            data: [0; Self::CAPACITY],
        }
    }

    /// Zero-length response
    pub fn empty() -> Self {
        Self {
            length: 0,
            data: [0; Self::CAPACITY],
        }
    }

    /// Response carrying `bytes` (truncated to the payload capacity)
    pub fn with_payload(bytes: &[u8]) -> Self {
        let len = bytes.len().min(Self::CAPACITY);
        let mut data = [0; Self::CAPACITY];
        data[..len].copy_from_slice(&bytes[..len]);
        Self {
            length: len as i32,
            data,
        }
    }

    pub fn is_stall(&self) -> bool {
        self.length < 0
    }

    /// Valid payload bytes; empty for stalls
    pub fn payload(&self) -> &[u8] {
        let len = usize::try_from(self.length).unwrap_or(0).min(Self::CAPACITY);
        &self.data[..len]
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(ProtocolError::BufferTooSmall {
                needed: Self::SIZE,
                available: bytes.len(),
            });
        }

        let mut reader = Cursor::new(bytes);
        let length = reader.read_i32::<LittleEndian>()?;
        if length > Self::CAPACITY as i32 {
            return Err(ProtocolError::InvalidLength(length));
        }
        let mut data = [0; Self::CAPACITY];
        data.copy_from_slice(&bytes[4..Self::SIZE]);
        Ok(Self { length, data })
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[..4].copy_from_slice(&self.length.to_le_bytes());
        bytes[4..].copy_from_slice(&self.data);
        bytes
    }
}

/// Host activity reported by the gadget driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UvcEvent {
    /// Host enumerated the gadget; carries `enum usb_device_speed`
    Connect { speed: u32 },
    Disconnect,
    /// Setup stage of a control request; must be answered
    Setup(CtrlRequest),
    /// Data stage following an earlier SET_CUR
    Data(RequestData),
    StreamOn,
    StreamOff,
}

impl UvcEvent {
    /// Decode an event from its type and payload area
    pub fn decode(event_type: u32, payload: &[u8]) -> Result<Self> {
        match event_type {
            UVC_EVENT_CONNECT => {
                let speed = if payload.len() >= 4 {
                    Cursor::new(payload).read_u32::<LittleEndian>()?
                } else {
                    0
                };
                Ok(Self::Connect { speed })
            }
            UVC_EVENT_DISCONNECT => Ok(Self::Disconnect),
            UVC_EVENT_STREAMON => Ok(Self::StreamOn),
            UVC_EVENT_STREAMOFF => Ok(Self::StreamOff),
            UVC_EVENT_SETUP => Ok(Self::Setup(CtrlRequest::decode(payload)?)),
            UVC_EVENT_DATA => Ok(Self::Data(RequestData::decode(payload)?)),
            other => Err(ProtocolError::UnknownEvent(other)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "UVC_EVENT_CONNECT",
            Self::Disconnect => "UVC_EVENT_DISCONNECT",
            Self::Setup(_) => "UVC_EVENT_SETUP",
            Self::Data(_) => "UVC_EVENT_DATA",
            Self::StreamOn => "UVC_EVENT_STREAMON",
            Self::StreamOff => "UVC_EVENT_STREAMOFF",
        }
    }
}
