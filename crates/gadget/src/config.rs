//! Gadget configuration management

use crate::configfs::DEFAULT_CONFIGFS_ROOT;
use crate::uvc::MemoryMode;
use anyhow::{Context, Result, anyhow};
use common::ControlTable;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Accepted buffer counts
pub const BUFFER_RANGE: std::ops::RangeInclusive<u32> = 2..=32;
/// Accepted frame rates
pub const FRAMERATE_RANGE: std::ops::RangeInclusive<u32> = 1..=30;
/// Accepted startup blink counts
pub const BLINK_RANGE: std::ops::RangeInclusive<u32> = 1..=20;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GadgetConfig {
    #[serde(default)]
    pub gadget: GadgetSettings,
    #[serde(default)]
    pub image: ImageSettings,
    #[serde(default)]
    pub indicator: IndicatorSettings,
    #[serde(default)]
    pub configfs: ConfigfsSettings,
    /// Overrides applied to the built-in control table
    #[serde(default)]
    pub controls: Vec<ControlOverride>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GadgetSettings {
    /// UVC gadget video node
    #[serde(default = "GadgetSettings::default_device")]
    pub device: PathBuf,
    #[serde(default = "GadgetSettings::default_buffers")]
    pub buffers: u32,
    #[serde(default = "GadgetSettings::default_framerate")]
    pub framerate: u32,
    #[serde(default)]
    pub memory: MemoryMode,
    /// Log frames delivered per second
    #[serde(default)]
    pub show_fps: bool,
    #[serde(default = "GadgetSettings::default_log_level")]
    pub log_level: String,
}

impl Default for GadgetSettings {
    fn default() -> Self {
        Self {
            device: Self::default_device(),
            buffers: Self::default_buffers(),
            framerate: Self::default_framerate(),
            memory: MemoryMode::default(),
            show_fps: false,
            log_level: Self::default_log_level(),
        }
    }
}

impl GadgetSettings {
    fn default_device() -> PathBuf {
        PathBuf::from("/dev/video0")
    }

    fn default_buffers() -> u32 {
        2
    }

    fn default_framerate() -> u32 {
        30
    }

    fn default_log_level() -> String {
        "info".to_string()
    }
}

/// Image streamed to the host; exactly one of `png` and `l8` is used
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSettings {
    #[serde(default)]
    pub png: Option<PathBuf>,
    /// Raw 8-bit greyscale file
    #[serde(default)]
    pub l8: Option<PathBuf>,
    #[serde(default = "ImageSettings::default_l8_dimension")]
    pub l8_width: u32,
    #[serde(default = "ImageSettings::default_l8_dimension")]
    pub l8_height: u32,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            png: None,
            l8: None,
            l8_width: Self::default_l8_dimension(),
            l8_height: Self::default_l8_dimension(),
        }
    }
}

impl ImageSettings {
    fn default_l8_dimension() -> u32 {
        480
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorSettings {
    /// GPIO pin mirroring the streaming state
    #[serde(default)]
    pub gpio_pin: Option<u32>,
    #[serde(default)]
    pub onboard_led: bool,
    /// Blinks at startup, 0 disables
    #[serde(default)]
    pub blink: u32,
    #[serde(default = "IndicatorSettings::default_gpio_root")]
    pub gpio_root: PathBuf,
    #[serde(default = "IndicatorSettings::default_led_root")]
    pub led_root: PathBuf,
}

impl Default for IndicatorSettings {
    fn default() -> Self {
        Self {
            gpio_pin: None,
            onboard_led: false,
            blink: 0,
            gpio_root: Self::default_gpio_root(),
            led_root: Self::default_led_root(),
        }
    }
}

impl IndicatorSettings {
    fn default_gpio_root() -> PathBuf {
        PathBuf::from("/sys/class/gpio")
    }

    fn default_led_root() -> PathBuf {
        PathBuf::from("/sys/class/leds/led0")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigfsSettings {
    #[serde(default = "ConfigfsSettings::default_root")]
    pub root: PathBuf,
}

impl Default for ConfigfsSettings {
    fn default() -> Self {
        Self {
            root: Self::default_root(),
        }
    }
}

impl ConfigfsSettings {
    fn default_root() -> PathBuf {
        PathBuf::from(DEFAULT_CONFIGFS_ROOT)
    }
}

/// Override of one built-in control, matched by name
///
/// # Example Configuration
/// ```toml
/// [[controls]]
/// name = "brightness"
/// minimum = 0
/// maximum = 100
/// default = 50
///
/// [[controls]]
/// name = "focus_auto"
/// enabled = true
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlOverride {
    pub name: String,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub minimum: Option<i32>,
    #[serde(default)]
    pub maximum: Option<i32>,
    #[serde(default)]
    pub step: Option<i32>,
    #[serde(default)]
    pub default: Option<i32>,
}

impl GadgetConfig {
    /// Load configuration from file
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            expand(&p)
        } else {
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/uvc-gadget/gadget.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: GadgetConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config.expanded())
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("uvc-gadget").join("gadget.toml")
        } else {
            PathBuf::from(".config/uvc-gadget/gadget.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.gadget.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.gadget.log_level,
                valid_levels.join(", ")
            ));
        }

        if !BUFFER_RANGE.contains(&self.gadget.buffers) {
            return Err(anyhow!(
                "Number of video buffers {} out of range {}..={}",
                self.gadget.buffers,
                BUFFER_RANGE.start(),
                BUFFER_RANGE.end()
            ));
        }
        if !FRAMERATE_RANGE.contains(&self.gadget.framerate) {
            return Err(anyhow!(
                "Framerate {} out of range {}..={}",
                self.gadget.framerate,
                FRAMERATE_RANGE.start(),
                FRAMERATE_RANGE.end()
            ));
        }
        if self.indicator.blink != 0 && !BLINK_RANGE.contains(&self.indicator.blink) {
            return Err(anyhow!(
                "Blink count {} out of range {}..={}",
                self.indicator.blink,
                BLINK_RANGE.start(),
                BLINK_RANGE.end()
            ));
        }

        if self.image.png.is_some() && self.image.l8.is_some() {
            return Err(anyhow!("Only one of image.png and image.l8 may be set"));
        }
        if self.image.l8_width == 0 || self.image.l8_height == 0 {
            return Err(anyhow!("L8 image dimensions must be non-zero"));
        }
        if self.image.l8_width.checked_mul(self.image.l8_height).is_none() {
            return Err(anyhow!(
                "L8 image {}x{} is too large",
                self.image.l8_width,
                self.image.l8_height
            ));
        }

        let known = ControlTable::with_defaults();
        for control in &self.controls {
            if !known.entries().iter().any(|entry| entry.name == control.name) {
                return Err(anyhow!("Unknown control '{}'", control.name));
            }
            if let (Some(min), Some(max)) = (control.minimum, control.maximum) {
                if min > max {
                    return Err(anyhow!(
                        "Control '{}' minimum {} exceeds maximum {}",
                        control.name,
                        min,
                        max
                    ));
                }
            }
        }

        Ok(())
    }

    /// Copy with `~` expanded in every path
    pub fn expanded(mut self) -> Self {
        self.gadget.device = expand(&self.gadget.device);
        self.image.png = self.image.png.as_deref().map(expand);
        self.image.l8 = self.image.l8.as_deref().map(expand);
        self.indicator.gpio_root = expand(&self.indicator.gpio_root);
        self.indicator.led_root = expand(&self.indicator.led_root);
        self.configfs.root = expand(&self.configfs.root);
        self
    }

    /// Built-in control table with the configured overrides applied
    pub fn control_table(&self) -> Result<ControlTable> {
        let mut table = ControlTable::with_defaults();
        for control in &self.controls {
            let entry = table
                .by_name_mut(&control.name)
                .ok_or_else(|| anyhow!("Unknown control '{}'", control.name))?;

            if let Some(enabled) = control.enabled {
                entry.enabled = enabled;
            }
            if let Some(minimum) = control.minimum {
                entry.minimum = minimum;
            }
            if let Some(maximum) = control.maximum {
                entry.maximum = maximum;
            }
            if let Some(step) = control.step {
                entry.step = step;
            }
            if let Some(default) = control.default {
                entry.default_value = default;
                entry.current_value = default;
            }
            tracing::debug!("control {} overridden", control.name);
        }
        Ok(table)
    }
}

/// Expand a leading `~` in `path`
pub fn expand(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GadgetConfig::default();
        assert_eq!(config.gadget.device, PathBuf::from("/dev/video0"));
        assert_eq!(config.gadget.framerate, 30);
        assert_eq!(config.gadget.memory, MemoryMode::UserPtr);
        assert_eq!(config.image.l8_width, 480);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_ranges() {
        let mut config = GadgetConfig::default();
        config.gadget.buffers = 1;
        assert!(config.validate().is_err());

        let mut config = GadgetConfig::default();
        config.gadget.framerate = 31;
        assert!(config.validate().is_err());

        let mut config = GadgetConfig::default();
        config.indicator.blink = 21;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_l8_geometry() {
        let mut config = GadgetConfig::default();
        config.image.l8_width = 70_000;
        config.image.l8_height = 70_000;
        assert!(config.validate().is_err());

        config.image.l8_height = 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_exclusive_images() {
        let mut config = GadgetConfig::default();
        config.image.png = Some(PathBuf::from("a.png"));
        config.image.l8 = Some(PathBuf::from("a.l8"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_control_overrides() {
        let mut config = GadgetConfig::default();
        config.controls.push(ControlOverride {
            name: "focus_auto".to_string(),
            enabled: Some(true),
            minimum: None,
            maximum: None,
            step: None,
            default: Some(1),
        });

        let table = config.control_table().unwrap();
        let focus = table
            .entries()
            .iter()
            .find(|entry| entry.name == "focus_auto")
            .unwrap();
        assert!(focus.enabled);
        assert_eq!(focus.current_value, 1);
    }

    #[test]
    fn test_unknown_control_is_rejected() {
        let mut config = GadgetConfig::default();
        config.controls.push(ControlOverride {
            name: "tilt".to_string(),
            enabled: None,
            minimum: None,
            maximum: None,
            step: None,
            default: None,
        });
        assert!(config.validate().is_err());
        assert!(config.control_table().is_err());
    }

    #[test]
    fn test_tilde_expansion() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand(Path::new("~/image.png")), home.join("image.png"));
        }
        assert_eq!(expand(Path::new("/dev/video1")), PathBuf::from("/dev/video1"));
    }
}
