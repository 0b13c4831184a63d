//! Protocol library for uvc-gadget
//!
//! This crate defines the USB Video Class wire structures exchanged between
//! the gadget process and the kernel UVC function driver: control request
//! codes and selectors, setup packets, request/response payloads, driver
//! events and the probe/commit streaming control record.
//!
//! # Example
//!
//! ```
//! use protocol::{StreamingControl, CtrlRequest, RequestCode};
//!
//! // Host asks for the current probe settings
//! let setup = CtrlRequest::decode(&[0xa1, 0x81, 0x00, 0x01, 0x01, 0x00, 0x22, 0x00]).unwrap();
//! assert_eq!(RequestCode::from_u8(setup.request), Some(RequestCode::GetCur));
//!
//! // Probe record sent back
//! let probe = StreamingControl { format_index: 1, frame_index: 1, ..Default::default() };
//! let bytes = probe.encode();
//! assert_eq!(bytes.len(), StreamingControl::SIZE);
//! ```

pub mod codec;
pub mod error;
pub mod messages;
pub mod types;

pub use codec::StreamingControl;
pub use error::{ProtocolError, Result};
pub use messages::{
    CtrlRequest, EVENT_PAYLOAD_SIZE, RequestData, UVC_EVENT_CONNECT, UVC_EVENT_DATA,
    UVC_EVENT_DISCONNECT, UVC_EVENT_SETUP, UVC_EVENT_STREAMOFF, UVC_EVENT_STREAMON,
    UVC_EVENT_TYPES, UvcEvent,
};
pub use types::{
    CONTROL_CAP_GET, CONTROL_CAP_SET, ControlInterface, INTERFACE_CONTROL, INTERFACE_STREAMING,
    RequestCode, RequestErrorCode, STALL_LENGTH, StreamingSelector,
    VC_REQUEST_ERROR_CODE_CONTROL, camera, processing, request_code_name,
};
