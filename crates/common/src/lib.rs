//! Common utilities for uvc-gadget
//!
//! This crate provides the pieces shared between the gadget runtime and its
//! tests: the format catalog built from configfs, the control mapping table,
//! error handling and logging setup.

pub mod catalog;
pub mod controls;
pub mod error;
pub mod logging;
pub mod test_utils;

pub use catalog::{
    Dimension, Extremum, FormatCatalog, FrameFormat, PixelFormat, StreamingParams, UsbSpeed,
};
pub use controls::{ControlMapping, ControlTable, LookupError};
pub use error::{Error, Result};
pub use logging::setup_logging;
