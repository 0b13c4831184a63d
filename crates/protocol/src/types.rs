//! UVC and USB type definitions
//!
//! Request codes, control selectors and request-error codes exchanged with a
//! USB host over the video-control and video-streaming interfaces.
//!
//! Values follow `include/uapi/linux/usb/video.h` and
//! `include/uapi/linux/usb/ch9.h`.

/// Interface number of the video-control interface on the gadget
pub const INTERFACE_CONTROL: u8 = 0;
/// Interface number of the video-streaming interface on the gadget
pub const INTERFACE_STREAMING: u8 = 1;

/// bmRequestType type bits
pub const USB_TYPE_MASK: u8 = 0x60;
/// Class-specific request type
pub const USB_TYPE_CLASS: u8 = 0x20;
/// bmRequestType recipient bits
pub const USB_RECIP_MASK: u8 = 0x1f;
/// Request addressed to an interface
pub const USB_RECIP_INTERFACE: u8 = 0x01;

/// Video-control interface selector reporting the last request error
pub const VC_REQUEST_ERROR_CODE_CONTROL: u8 = 0x02;

/// GET_INFO capability bit: control supports GET requests
pub const CONTROL_CAP_GET: u8 = 1 << 0;
/// GET_INFO capability bit: control supports SET requests
pub const CONTROL_CAP_SET: u8 = 1 << 1;

/// Response length used to stall the control endpoint (`-EL2HLT`)
pub const STALL_LENGTH: i32 = -51;

/// UVC class-specific request codes (bRequest)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestCode {
    Undefined = 0x00,
    SetCur = 0x01,
    GetCur = 0x81,
    GetMin = 0x82,
    GetMax = 0x83,
    GetRes = 0x84,
    GetLen = 0x85,
    GetInfo = 0x86,
    GetDef = 0x87,
}

impl RequestCode {
    /// Decode a raw bRequest value
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Undefined),
            0x01 => Some(Self::SetCur),
            0x81 => Some(Self::GetCur),
            0x82 => Some(Self::GetMin),
            0x83 => Some(Self::GetMax),
            0x84 => Some(Self::GetRes),
            0x85 => Some(Self::GetLen),
            0x86 => Some(Self::GetInfo),
            0x87 => Some(Self::GetDef),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Undefined => "RC_UNDEFINED",
            Self::SetCur => "SET_CUR",
            Self::GetCur => "GET_CUR",
            Self::GetMin => "GET_MIN",
            Self::GetMax => "GET_MAX",
            Self::GetRes => "GET_RES",
            Self::GetLen => "GET_LEN",
            Self::GetInfo => "GET_INFO",
            Self::GetDef => "GET_DEF",
        }
    }
}

/// Human-readable name for a raw request code, used in diagnostics
pub fn request_code_name(value: u8) -> &'static str {
    RequestCode::from_u8(value).map_or("UNKNOWN", |code| code.name())
}

/// Video-streaming interface control selectors
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamingSelector {
    Undefined = 0x00,
    Probe = 0x01,
    Commit = 0x02,
    StillProbe = 0x03,
    StillCommit = 0x04,
    StillImageTrigger = 0x05,
    StreamErrorCode = 0x06,
    GenerateKeyFrame = 0x07,
    UpdateFrameSegment = 0x08,
    SyncDelay = 0x09,
}

impl StreamingSelector {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Undefined),
            0x01 => Some(Self::Probe),
            0x02 => Some(Self::Commit),
            0x03 => Some(Self::StillProbe),
            0x04 => Some(Self::StillCommit),
            0x05 => Some(Self::StillImageTrigger),
            0x06 => Some(Self::StreamErrorCode),
            0x07 => Some(Self::GenerateKeyFrame),
            0x08 => Some(Self::UpdateFrameSegment),
            0x09 => Some(Self::SyncDelay),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Undefined => "CONTROL_UNDEFINED",
            Self::Probe => "PROBE",
            Self::Commit => "COMMIT",
            Self::StillProbe => "STILL_PROBE",
            Self::StillCommit => "STILL_COMMIT",
            Self::StillImageTrigger => "STILL_IMAGE_TRIGGER",
            Self::StreamErrorCode => "STREAM_ERROR_CODE",
            Self::GenerateKeyFrame => "GENERATE_KEY_FRAME",
            Self::UpdateFrameSegment => "UPDATE_FRAME_SEGMENT",
            Self::SyncDelay => "SYNC_DELAY",
        }
    }
}

/// Codes reported through the VC_REQUEST_ERROR_CODE_CONTROL selector
///
/// The host reads this after a stalled request to learn why it failed.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RequestErrorCode {
    #[default]
    NoError = 0x00,
    NotReady = 0x01,
    WrongState = 0x02,
    Power = 0x03,
    OutOfRange = 0x04,
    InvalidUnit = 0x05,
    InvalidControl = 0x06,
    InvalidRequest = 0x07,
    InvalidValue = 0x08,
    Unknown = 0xff,
}

/// Entity of the video-control interface that owns an adjustable control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ControlInterface {
    /// Camera (input) terminal, entity id 1 on the gadget
    InputTerminal,
    /// Processing unit, entity id 2 on the gadget
    ProcessingUnit,
}

impl ControlInterface {
    /// Map a video-control entity id to the interface it addresses
    pub fn from_entity(entity: u8) -> Option<Self> {
        match entity {
            1 => Some(Self::InputTerminal),
            2 => Some(Self::ProcessingUnit),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::InputTerminal => "INPUT_TERMINAL",
            Self::ProcessingUnit => "PROCESSING_UNIT",
        }
    }
}

/// Camera terminal control selectors
pub mod camera {
    pub const SCANNING_MODE: u8 = 0x01;
    pub const AE_MODE: u8 = 0x02;
    pub const AE_PRIORITY: u8 = 0x03;
    pub const EXPOSURE_TIME_ABSOLUTE: u8 = 0x04;
    pub const EXPOSURE_TIME_RELATIVE: u8 = 0x05;
    pub const FOCUS_ABSOLUTE: u8 = 0x06;
    pub const FOCUS_RELATIVE: u8 = 0x07;
    pub const FOCUS_AUTO: u8 = 0x08;
    pub const IRIS_ABSOLUTE: u8 = 0x09;
    pub const IRIS_RELATIVE: u8 = 0x0a;
    pub const ZOOM_ABSOLUTE: u8 = 0x0b;
    pub const ZOOM_RELATIVE: u8 = 0x0c;
    pub const PANTILT_ABSOLUTE: u8 = 0x0d;
    pub const PANTILT_RELATIVE: u8 = 0x0e;
    pub const ROLL_ABSOLUTE: u8 = 0x0f;
    pub const ROLL_RELATIVE: u8 = 0x10;
    pub const PRIVACY: u8 = 0x11;
}

/// Processing unit control selectors
pub mod processing {
    pub const BACKLIGHT_COMPENSATION: u8 = 0x01;
    pub const BRIGHTNESS: u8 = 0x02;
    pub const CONTRAST: u8 = 0x03;
    pub const GAIN: u8 = 0x04;
    pub const POWER_LINE_FREQUENCY: u8 = 0x05;
    pub const HUE: u8 = 0x06;
    pub const SATURATION: u8 = 0x07;
    pub const SHARPNESS: u8 = 0x08;
    pub const GAMMA: u8 = 0x09;
    pub const WHITE_BALANCE_TEMPERATURE: u8 = 0x0a;
    pub const WHITE_BALANCE_TEMPERATURE_AUTO: u8 = 0x0b;
    pub const WHITE_BALANCE_COMPONENT: u8 = 0x0c;
    pub const WHITE_BALANCE_COMPONENT_AUTO: u8 = 0x0d;
    pub const DIGITAL_MULTIPLIER: u8 = 0x0e;
    pub const DIGITAL_MULTIPLIER_LIMIT: u8 = 0x0f;
    pub const HUE_AUTO: u8 = 0x10;
}
