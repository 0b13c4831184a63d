//! Control mapping table
//!
//! Camera-terminal and processing-unit controls exposed to the host. Bounds
//! and the enabled flag are fixed once the table is built; the host may only
//! change `current_value` (and the byte length it used) through SET_CUR.

use protocol::{ControlInterface, camera, processing};
use tracing::debug;

/// One adjustable control
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlMapping {
    pub interface: ControlInterface,
    pub selector: u8,
    pub name: &'static str,
    pub minimum: i32,
    pub maximum: i32,
    pub step: i32,
    pub default_value: i32,
    pub current_value: i32,
    /// Byte length of the last value written by the host
    pub length: u8,
    pub enabled: bool,
}

impl ControlMapping {
    pub fn new(
        interface: ControlInterface,
        selector: u8,
        name: &'static str,
        (minimum, maximum, step, default_value): (i32, i32, i32, i32),
        enabled: bool,
    ) -> Self {
        Self {
            interface,
            selector,
            name,
            minimum,
            maximum,
            step,
            default_value,
            current_value: default_value,
            length: 4,
            enabled,
        }
    }
}

/// Why a control lookup did not produce a usable entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupError {
    /// No entry for the (interface, selector) pair
    Missing,
    /// Entry exists but is switched off
    Disabled { name: &'static str },
}

/// Ordered table keyed by (interface, selector)
#[derive(Debug, Clone, Default)]
pub struct ControlTable {
    entries: Vec<ControlMapping>,
}

impl ControlTable {
    pub fn new(entries: Vec<ControlMapping>) -> Self {
        Self { entries }
    }

    /// Controls a still-image gadget typically advertises
    ///
    /// Processing-unit picture controls are enabled; camera-terminal
    /// optics controls are listed but disabled until configured.
    pub fn with_defaults() -> Self {
        use ControlInterface::{InputTerminal, ProcessingUnit};

        Self::new(vec![
            ControlMapping::new(InputTerminal, camera::AE_MODE, "auto_exposure_mode", (1, 8, 1, 2), false),
            ControlMapping::new(
                InputTerminal,
                camera::EXPOSURE_TIME_ABSOLUTE,
                "exposure_time_absolute",
                (3, 2047, 1, 250),
                false,
            ),
            ControlMapping::new(InputTerminal, camera::FOCUS_ABSOLUTE, "focus_absolute", (0, 250, 5, 0), false),
            ControlMapping::new(InputTerminal, camera::FOCUS_AUTO, "focus_auto", (0, 1, 1, 1), false),
            ControlMapping::new(InputTerminal, camera::ZOOM_ABSOLUTE, "zoom_absolute", (100, 500, 1, 100), false),
            ControlMapping::new(
                ProcessingUnit,
                processing::BACKLIGHT_COMPENSATION,
                "backlight_compensation",
                (0, 1, 1, 0),
                true,
            ),
            ControlMapping::new(ProcessingUnit, processing::BRIGHTNESS, "brightness", (0, 255, 1, 128), true),
            ControlMapping::new(ProcessingUnit, processing::CONTRAST, "contrast", (0, 255, 1, 32), true),
            ControlMapping::new(ProcessingUnit, processing::GAIN, "gain", (0, 255, 1, 0), true),
            ControlMapping::new(
                ProcessingUnit,
                processing::POWER_LINE_FREQUENCY,
                "power_line_frequency",
                (0, 2, 1, 2),
                true,
            ),
            ControlMapping::new(ProcessingUnit, processing::HUE, "hue", (-180, 180, 1, 0), true),
            ControlMapping::new(ProcessingUnit, processing::SATURATION, "saturation", (0, 255, 1, 64), true),
            ControlMapping::new(ProcessingUnit, processing::SHARPNESS, "sharpness", (0, 255, 1, 24), true),
            ControlMapping::new(ProcessingUnit, processing::GAMMA, "gamma", (90, 150, 1, 120), true),
            ControlMapping::new(
                ProcessingUnit,
                processing::WHITE_BALANCE_TEMPERATURE,
                "white_balance_temperature",
                (2800, 6500, 10, 4600),
                true,
            ),
            ControlMapping::new(
                ProcessingUnit,
                processing::WHITE_BALANCE_TEMPERATURE_AUTO,
                "white_balance_temperature_auto",
                (0, 1, 1, 1),
                true,
            ),
        ])
    }

    pub fn entries(&self) -> &[ControlMapping] {
        &self.entries
    }

    /// Entry by name, enabled or not; used when applying configuration
    pub fn by_name_mut(&mut self, name: &str) -> Option<&mut ControlMapping> {
        self.entries.iter_mut().find(|entry| entry.name == name)
    }

    fn position(&self, interface: ControlInterface, selector: u8) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.interface == interface && entry.selector == selector)
    }

    /// Enabled entry for (interface, selector)
    pub fn lookup(
        &self,
        interface: ControlInterface,
        selector: u8,
    ) -> Result<&ControlMapping, LookupError> {
        let entry = self
            .position(interface, selector)
            .map(|index| &self.entries[index])
            .ok_or(LookupError::Missing)?;

        if entry.enabled {
            Ok(entry)
        } else {
            Err(LookupError::Disabled { name: entry.name })
        }
    }

    /// Store a host-written value (1..=4 little-endian bytes, zero-padded)
    ///
    /// Returns `false` and leaves the table untouched when the payload
    /// length is out of range or the control is missing or disabled.
    pub fn set_current(&mut self, interface: ControlInterface, selector: u8, payload: &[u8]) -> bool {
        if payload.is_empty() || payload.len() > 4 {
            debug!("{} control {:#04x}: {} byte value rejected", interface.name(), selector, payload.len());
            return false;
        }

        let Some(index) = self.position(interface, selector) else {
            debug!("{} control {:#04x} is not mapped", interface.name(), selector);
            return false;
        };
        let entry = &mut self.entries[index];
        if !entry.enabled {
            debug!("{} is disabled, value not stored", entry.name);
            return false;
        }

        let mut bytes = [0u8; 4];
        bytes[..payload.len()].copy_from_slice(payload);
        entry.current_value = i32::from_le_bytes(bytes);
        entry.length = payload.len() as u8;
        true
    }
}
