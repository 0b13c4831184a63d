//! UVC gadget runtime
//!
//! Presents a still image to a USB host as a UVC camera through the kernel
//! UVC gadget function. The host negotiates a format over the probe/commit
//! controls, then the gadget keeps the output queue fed with the image at a
//! fixed frame rate.
//!
//! # Example
//!
//! ```
//! use common::StreamingParams;
//! use common::test_utils::{brightness_controls, sample_catalog};
//! use gadget::image::ImageSource;
//! use gadget::negotiator::Negotiator;
//! use gadget::test_utils::MockDevice;
//! use gadget::uvc::{MemoryMode, Session};
//!
//! let image = ImageSource::from_l8_bytes(vec![0x80; 640 * 480], 640, 480).unwrap();
//! let negotiator = Negotiator::new(sample_catalog(), StreamingParams::default(), image.pixel_count());
//! let mut session = Session::new(
//!     MockDevice::new(),
//!     negotiator,
//!     brightness_controls(),
//!     image,
//!     MemoryMode::UserPtr,
//!     2,
//! );
//! session.stream_on().unwrap();
//! assert!(session.is_streaming());
//! ```

pub mod config;
pub mod configfs;
pub mod event_loop;
pub mod image;
pub mod negotiator;
pub mod status;
pub mod test_utils;
pub mod uvc;

pub use config::GadgetConfig;
pub use event_loop::{LoopOptions, ShutdownToken};
pub use uvc::Session;
