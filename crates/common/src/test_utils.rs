//! Test utilities for uvc-gadget
//!
//! Fixture catalogs and control tables shared by the unit and integration
//! tests of the workspace crates.
//!
//! # Example
//!
//! ```
//! use common::test_utils::{sample_catalog, brightness_controls};
//!
//! let catalog = sample_catalog();
//! assert_eq!(catalog.len(), 2);
//! assert_eq!(brightness_controls().entries()[0].default_value, 50);
//! ```

use crate::catalog::{FormatCatalog, FrameFormat, PixelFormat, UsbSpeed};
use crate::controls::{ControlMapping, ControlTable};
use protocol::{ControlInterface, processing};

/// 30 fps in 100 ns units
pub const INTERVAL_30FPS: u32 = 333_333;

/// Create a catalog entry for testing
pub fn create_frame_format(format_index: u8, frame_index: u8, width: u32, height: u32) -> FrameFormat {
    FrameFormat {
        format_index,
        frame_index,
        width,
        height,
        default_frame_interval: INTERVAL_30FPS,
        min_bit_rate: width * height * 16 * 30,
        max_bit_rate: width * height * 16 * 30,
        max_frame_buffer_size: width * height * 2,
        ..FrameFormat::new(UsbSpeed::High, PixelFormat::Yuyv)
    }
}

/// Two YUYV frames under format 1: 640x480 and 1280x720
pub fn sample_catalog() -> FormatCatalog {
    catalog_from(vec![
        create_frame_format(1, 1, 640, 480),
        create_frame_format(1, 2, 1280, 720),
    ])
}

/// Catalog from a fixed list of entries
///
/// # Panics
/// Panics when `entries` is empty.
pub fn catalog_from(entries: Vec<FrameFormat>) -> FormatCatalog {
    FormatCatalog::new(entries).expect("fixture catalog must not be empty")
}

/// Single enabled brightness control with range 0..=100, default 50
pub fn brightness_controls() -> ControlTable {
    ControlTable::new(vec![ControlMapping::new(
        ControlInterface::ProcessingUnit,
        processing::BRIGHTNESS,
        "brightness",
        (0, 100, 1, 50),
        true,
    )])
}

/// Brightness control as above, but switched off
pub fn disabled_brightness_controls() -> ControlTable {
    ControlTable::new(vec![ControlMapping::new(
        ControlInterface::ProcessingUnit,
        processing::BRIGHTNESS,
        "brightness",
        (0, 100, 1, 50),
        false,
    )])
}
