//! Format catalog
//!
//! The set of (speed, pixel format, format index, frame index) combinations
//! the gadget function was configured with. Built once at startup from the
//! configfs tree and read-only afterwards.

use crate::{Error, Result};
use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;

/// USB connection speed a format group was declared for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UsbSpeed {
    Full,
    High,
    Super,
}

impl UsbSpeed {
    /// Parse the configfs speed directory name (`fs`, `hs`, `ss`)
    pub fn from_configfs(name: &str) -> Option<Self> {
        if name.starts_with("fs") {
            Some(Self::Full)
        } else if name.starts_with("hs") {
            Some(Self::High)
        } else if name.starts_with("ss") {
            Some(Self::Super)
        } else {
            None
        }
    }
}

/// Pixel layouts the gadget can stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PixelFormat {
    /// Packed YUV 4:2:2, two bytes per pixel
    Yuyv,
    /// 8-bit greyscale
    Grey,
    Mjpeg,
}

const fn fourcc(code: &[u8; 4]) -> u32 {
    (code[0] as u32) | ((code[1] as u32) << 8) | ((code[2] as u32) << 16) | ((code[3] as u32) << 24)
}

impl PixelFormat {
    /// V4L2 fourcc code
    pub fn fourcc(&self) -> u32 {
        match self {
            Self::Yuyv => fourcc(b"YUYV"),
            Self::Grey => fourcc(b"GREY"),
            Self::Mjpeg => fourcc(b"MJPG"),
        }
    }

    pub fn from_fourcc(code: u32) -> Option<Self> {
        [Self::Yuyv, Self::Grey, Self::Mjpeg]
            .into_iter()
            .find(|format| format.fourcc() == code)
    }

    /// Image size the device is told to expect for a frame of this format
    ///
    /// Saturates at `u32::MAX`.
    pub fn frame_size(&self, width: u32, height: u32) -> u32 {
        let pixels = u64::from(width) * u64::from(height);
        let bytes = match self {
            Self::Yuyv => pixels * 2,
            Self::Grey | Self::Mjpeg => pixels,
        };
        u32::try_from(bytes).unwrap_or(u32::MAX)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Yuyv => "YUYV",
            Self::Grey => "GREY",
            Self::Mjpeg => "MJPG",
        };
        f.write_str(name)
    }
}

/// One frame descriptor of the gadget configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameFormat {
    pub speed: UsbSpeed,
    pub pixel_format: PixelFormat,
    pub format_index: u8,
    pub frame_index: u8,
    pub width: u32,
    pub height: u32,
    /// Default frame interval in 100 ns units
    pub default_frame_interval: u32,
    pub min_bit_rate: u32,
    pub max_bit_rate: u32,
    pub max_frame_buffer_size: u32,
    pub capabilities: u32,
}

impl FrameFormat {
    /// Entry with the given identity and zeroed attributes
    pub fn new(speed: UsbSpeed, pixel_format: PixelFormat) -> Self {
        Self {
            speed,
            pixel_format,
            format_index: 0,
            frame_index: 0,
            width: 0,
            height: 0,
            default_frame_interval: 0,
            min_bit_rate: 0,
            max_bit_rate: 0,
            max_frame_buffer_size: 0,
            capabilities: 0,
        }
    }
}

impl fmt::Display for FrameFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "format: {}, frame: {}, {} {}x{}, frame_interval: {}, bitrate: [{}, {}]",
            self.format_index,
            self.frame_index,
            self.pixel_format,
            self.width,
            self.height,
            self.default_frame_interval,
            self.min_bit_rate,
            self.max_bit_rate
        )
    }
}

/// Which index an extremal query looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Format,
    Frame,
}

/// Direction of an extremal query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extremum {
    Min,
    Max,
}

/// Bulk/isochronous endpoint parameters read from the function directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamingParams {
    /// 0..=15, SuperSpeed only
    pub max_burst: u32,
    /// 1..=3072 bytes
    pub max_packet: u32,
    /// 1..=16
    pub interval: u32,
}

impl Default for StreamingParams {
    fn default() -> Self {
        Self {
            max_burst: 0,
            max_packet: 1024,
            interval: 1,
        }
    }
}

impl StreamingParams {
    pub fn set_max_burst(&mut self, value: i64) {
        self.max_burst = value.clamp(0, 15) as u32;
    }

    pub fn set_max_packet(&mut self, value: i64) {
        self.max_packet = value.clamp(1, 3072) as u32;
    }

    pub fn set_interval(&mut self, value: i64) {
        self.interval = value.clamp(1, 16) as u32;
    }
}

/// Immutable table of configured frame formats
#[derive(Debug, Clone)]
pub struct FormatCatalog {
    entries: Vec<FrameFormat>,
}

impl FormatCatalog {
    /// Build a catalog; fails when no entry is defined
    pub fn new(entries: Vec<FrameFormat>) -> Result<Self> {
        if entries.is_empty() {
            return Err(Error::Catalog(
                "no UVC frame formats are defined".to_string(),
            ));
        }
        debug!("format catalog built with {} entries", entries.len());
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[FrameFormat] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First configured entry; always present
    pub fn first(&self) -> &FrameFormat {
        &self.entries[0]
    }

    /// Smallest or largest format/frame index, optionally within one format
    ///
    /// Returns `None` when no entry matches the filter.
    pub fn extremal(
        &self,
        format_filter: Option<u8>,
        dimension: Dimension,
        extremum: Extremum,
    ) -> Option<u8> {
        let values = self
            .entries
            .iter()
            .filter(|entry| format_filter.is_none_or(|format| entry.format_index == format))
            .map(|entry| match dimension {
                Dimension::Format => entry.format_index,
                Dimension::Frame => entry.frame_index,
            });

        match extremum {
            Extremum::Min => values.min(),
            Extremum::Max => values.max(),
        }
    }

    /// First entry matching the format/frame pair
    pub fn lookup(&self, format_index: u8, frame_index: u8) -> Option<&FrameFormat> {
        self.entries
            .iter()
            .find(|entry| entry.format_index == format_index && entry.frame_index == frame_index)
    }

    /// Distinct format indices, ascending
    pub fn format_indices(&self) -> BTreeSet<u8> {
        self.entries.iter().map(|entry| entry.format_index).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(format_index: u8, frame_index: u8, width: u32, height: u32) -> FrameFormat {
        FrameFormat {
            format_index,
            frame_index,
            width,
            height,
            default_frame_interval: 333_333,
            ..FrameFormat::new(UsbSpeed::High, PixelFormat::Yuyv)
        }
    }

    #[test]
    fn test_empty_catalog_is_rejected() {
        assert!(matches!(FormatCatalog::new(Vec::new()), Err(Error::Catalog(_))));
    }

    #[test]
    fn test_extremal_over_all_formats() {
        let catalog = FormatCatalog::new(vec![
            entry(1, 1, 640, 480),
            entry(1, 2, 1280, 720),
            entry(2, 1, 640, 480),
        ])
        .unwrap();

        assert_eq!(catalog.extremal(None, Dimension::Format, Extremum::Min), Some(1));
        assert_eq!(catalog.extremal(None, Dimension::Format, Extremum::Max), Some(2));
        assert_eq!(catalog.extremal(None, Dimension::Frame, Extremum::Max), Some(2));
        assert_eq!(catalog.extremal(Some(2), Dimension::Frame, Extremum::Max), Some(1));
        assert_eq!(catalog.extremal(Some(7), Dimension::Frame, Extremum::Min), None);
    }

    #[test]
    fn test_lookup_returns_first_match() {
        let mut full_speed = entry(1, 1, 320, 240);
        full_speed.speed = UsbSpeed::Full;
        let catalog = FormatCatalog::new(vec![full_speed, entry(1, 1, 640, 480)]).unwrap();

        let found = catalog.lookup(1, 1).unwrap();
        assert_eq!(found.speed, UsbSpeed::Full);
        assert_eq!(found.width, 320);
        assert!(catalog.lookup(1, 2).is_none());
    }

    #[test]
    fn test_fourcc_codes() {
        assert_eq!(PixelFormat::Yuyv.fourcc(), 0x5659_5559);
        assert_eq!(PixelFormat::from_fourcc(PixelFormat::Grey.fourcc()), Some(PixelFormat::Grey));
        assert_eq!(PixelFormat::Yuyv.frame_size(640, 480), 614_400);
        assert_eq!(PixelFormat::Mjpeg.frame_size(640, 480), 307_200);
        assert_eq!(PixelFormat::Yuyv.frame_size(70_000, 70_000), u32::MAX);
    }

    #[test]
    fn test_streaming_params_clamping() {
        let mut params = StreamingParams::default();
        params.set_max_packet(4096);
        params.set_max_burst(-3);
        params.set_interval(0);
        assert_eq!(params.max_packet, 3072);
        assert_eq!(params.max_burst, 0);
        assert_eq!(params.interval, 1);
    }

    #[test]
    fn test_speed_names() {
        assert_eq!(UsbSpeed::from_configfs("hs"), Some(UsbSpeed::High));
        assert_eq!(UsbSpeed::from_configfs("ss"), Some(UsbSpeed::Super));
        assert_eq!(UsbSpeed::from_configfs("ls"), None);
    }
}
