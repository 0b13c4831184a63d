//! Configfs scanner
//!
//! Discovers the frame formats and endpoint parameters of the UVC function
//! by walking the gadget configfs tree. Frame attributes live under
//! `streaming/class/<speed>/<header>/<format>/<frame>/<attribute>`; the
//! endpoint parameters in `streaming_maxburst`, `streaming_maxpacket` and
//! `streaming_interval` of the function directory.

use common::{FormatCatalog, FrameFormat, PixelFormat, Result, StreamingParams, UsbSpeed};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

pub const DEFAULT_CONFIGFS_ROOT: &str = "/sys/kernel/config/usb_gadget";

/// Deepest directory level visited below the root
const MAX_DEPTH: usize = 20;

/// Longest attribute value accepted, in bytes
const MAX_VALUE_LEN: usize = 10;

const CLASS_MARKER: &str = "streaming/class/";
const PARAM_MARKER: &str = "/streaming_";

/// Result of a configfs scan
#[derive(Debug, Clone)]
pub struct GadgetLayout {
    pub catalog: FormatCatalog,
    pub streaming: StreamingParams,
}

/// Scan `root`; uncompressed formats are streamed as `uncompressed`
///
/// Fails when no frame format is defined.
pub fn scan(root: &Path, uncompressed: PixelFormat) -> Result<GadgetLayout> {
    info!("scanning configfs at {}", root.display());

    let mut scanner = Scanner::new(uncompressed);
    walk(root, 0, &mut scanner);
    let layout = scanner.finish()?;

    for entry in layout.catalog.entries() {
        info!("{:?} speed, {}", entry.speed, entry);
    }
    info!(
        "streaming: maxburst {}, maxpacket {}, interval {}",
        layout.streaming.max_burst, layout.streaming.max_packet, layout.streaming.interval
    );
    Ok(layout)
}

fn walk(dir: &Path, depth: usize, scanner: &mut Scanner) {
    let mut entries = match fs::read_dir(dir) {
        Ok(entries) => entries.filter_map(|entry| entry.ok()).collect::<Vec<_>>(),
        Err(e) => {
            debug!("cannot read {}: {}", dir.display(), e);
            return;
        }
    };
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let path = entry.path();
        // fs::metadata follows symlinks, the class tree is made of them
        let Ok(metadata) = fs::metadata(&path) else {
            continue;
        };
        if metadata.is_dir() {
            if depth < MAX_DEPTH {
                walk(&path, depth + 1, scanner);
            }
        } else {
            scanner.visit(&path);
        }
    }
}

/// Decimal value of a configfs attribute
fn read_value(path: &Path) -> Option<i64> {
    let bytes = fs::read(path).ok()?;
    if bytes.len() > MAX_VALUE_LEN {
        debug!("{}: value too long", path.display());
        return None;
    }
    let text = String::from_utf8_lossy(&bytes);
    match text.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            debug!("{}: not a number: {:?}", path.display(), text.trim());
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct GroupKey {
    speed: UsbSpeed,
    pixel_format: PixelFormat,
    format_dir: String,
    frame_dir: String,
}

#[derive(Debug)]
struct Scanner {
    uncompressed: PixelFormat,
    groups: Vec<(GroupKey, FrameFormat)>,
    format_indices: Vec<(UsbSpeed, PixelFormat, u8)>,
    streaming: StreamingParams,
}

impl Scanner {
    fn new(uncompressed: PixelFormat) -> Self {
        Self {
            uncompressed,
            groups: Vec::new(),
            format_indices: Vec::new(),
            streaming: StreamingParams::default(),
        }
    }

    fn pixel_format(&self, format_dir: &str) -> Option<PixelFormat> {
        if format_dir.starts_with('m') {
            Some(PixelFormat::Mjpeg)
        } else if format_dir.starts_with('u') {
            Some(self.uncompressed)
        } else {
            None
        }
    }

    fn visit(&mut self, path: &Path) {
        let text = path.to_string_lossy();
        if text.contains("/uvc") {
            if let Some(pos) = text.find(CLASS_MARKER) {
                self.frame_attribute(path, &text[pos + CLASS_MARKER.len()..]);
                return;
            }
        }
        if let Some(pos) = text.find(PARAM_MARKER) {
            self.streaming_param(path, &text[pos + PARAM_MARKER.len()..]);
        }
    }

    fn streaming_param(&mut self, path: &Path, name: &str) {
        let Some(value) = read_value(path) else {
            return;
        };
        match name {
            "maxburst" => self.streaming.set_max_burst(value),
            "maxpacket" => self.streaming.set_max_packet(value),
            "interval" => self.streaming.set_interval(value),
            _ => {}
        }
    }

    fn frame_attribute(&mut self, path: &Path, relative: &str) {
        let parts: Vec<&str> = relative.split('/').filter(|part| !part.is_empty()).collect();
        if parts.len() < 4 {
            return;
        }

        let Some(speed) = UsbSpeed::from_configfs(parts[0]) else {
            debug!("unsupported USB speed {:?}: {}", parts[0], path.display());
            return;
        };
        let Some(pixel_format) = self.pixel_format(parts[2]) else {
            debug!("unsupported format {:?}: {}", parts[2], path.display());
            return;
        };
        let Some(value) = read_value(path) else {
            return;
        };

        let attribute = parts[parts.len() - 1];
        if attribute == "bFormatIndex" {
            if let Ok(index) = u8::try_from(value) {
                self.format_indices.push((speed, pixel_format, index));
            }
            return;
        }
        if parts.len() != 5 {
            return;
        }

        let key = GroupKey {
            speed,
            pixel_format,
            format_dir: parts[2].to_string(),
            frame_dir: parts[3].to_string(),
        };
        if self.groups.last().is_none_or(|(last, _)| *last != key) {
            self.groups.push((key, FrameFormat::new(speed, pixel_format)));
        }
        if let Some((_, entry)) = self.groups.last_mut() {
            set_attribute(entry, attribute, value);
        }
    }

    fn finish(self) -> Result<GadgetLayout> {
        let mut entries: Vec<FrameFormat> = Vec::with_capacity(self.groups.len());
        for (_, mut entry) in self.groups {
            for &(speed, pixel_format, index) in &self.format_indices {
                if entry.speed == speed && entry.pixel_format == pixel_format {
                    entry.format_index = index;
                }
            }
            // The same function is reachable through every config that links it
            if !entries.contains(&entry) {
                entries.push(entry);
            }
        }

        Ok(GadgetLayout {
            catalog: FormatCatalog::new(entries)?,
            streaming: self.streaming,
        })
    }
}

fn set_attribute(entry: &mut FrameFormat, attribute: &str, value: i64) {
    let wide = u32::try_from(value).unwrap_or(0);
    match attribute {
        "wWidth" => entry.width = wide,
        "wHeight" => entry.height = wide,
        "dwDefaultFrameInterval" => entry.default_frame_interval = wide,
        "dwMinBitRate" => entry.min_bit_rate = wide,
        "dwMaxBitRate" => entry.max_bit_rate = wide,
        "dwMaxVideoFrameBufferSize" => entry.max_frame_buffer_size = wide,
        "bmCapabilities" => entry.capabilities = wide,
        "bFrameIndex" => entry.frame_index = u8::try_from(value).unwrap_or(0),
        _ => {}
    }
}
