//! Kernel-facing side of the gadget: V4L2 bindings, the device trait, the
//! buffer pipeline, class request handling and the session tying them
//! together.

pub mod buffers;
pub mod device;
pub mod requests;
pub mod session;
pub mod v4l2;

pub use buffers::{BufferPipeline, MIN_BUFFERS};
pub use device::{GadgetDevice, MappedRegion, MemoryMode, QueueRequest, V4l2Device, VideoFormat};
pub use requests::{DataOutcome, RequestProcessor, StreamTarget};
pub use session::Session;
