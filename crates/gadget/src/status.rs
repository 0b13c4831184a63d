//! Streaming status indicator
//!
//! Mirrors the streaming state on a GPIO pin and/or the onboard LED through
//! sysfs. Optionally blinks a number of times at startup until the host
//! starts streaming.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Half period of the startup blink
pub const BLINK_PERIOD: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
enum SinkKind {
    /// Pin exported under a sysfs GPIO class directory
    Gpio { root: PathBuf, pin: u32 },
    /// LED class device, e.g. `/sys/class/leds/led0`
    Led { root: PathBuf },
}

#[derive(Debug)]
struct Sink {
    kind: SinkKind,
    enabled: bool,
}

impl Sink {
    fn name(&self) -> String {
        match &self.kind {
            SinkKind::Gpio { pin, .. } => format!("GPIO {}", pin),
            SinkKind::Led { root } => format!("LED {}", root.display()),
        }
    }

    fn value_path(&self) -> PathBuf {
        match &self.kind {
            SinkKind::Gpio { root, pin } => root.join(format!("gpio{}", pin)).join("value"),
            SinkKind::Led { root } => root.join("brightness"),
        }
    }

    fn prepare(&self) -> io::Result<()> {
        match &self.kind {
            SinkKind::Gpio { root, pin } => {
                let pin_dir = root.join(format!("gpio{}", pin));
                if !pin_dir.is_dir() {
                    write_attr(&root.join("export"), &pin.to_string())?;
                }
                write_attr(&pin_dir.join("direction"), "out")?;
            }
            SinkKind::Led { root } => write_attr(&root.join("trigger"), "none")?,
        }
        write_attr(&self.value_path(), "0")
    }
}

fn write_attr(path: &Path, value: &str) -> io::Result<()> {
    fs::write(path, value).map_err(|e| io::Error::new(e.kind(), format!("{}: {}", path.display(), e)))
}

#[derive(Debug)]
pub struct StatusIndicator {
    sinks: Vec<Sink>,
    blink_remaining: u32,
    blink_state: bool,
    last_toggle: Option<Instant>,
}

impl StatusIndicator {
    pub fn new(gpio: Option<(PathBuf, u32)>, led: Option<PathBuf>, blink: u32) -> Self {
        let mut sinks = Vec::new();
        if let Some((root, pin)) = gpio {
            sinks.push(Sink {
                kind: SinkKind::Gpio { root, pin },
                enabled: false,
            });
        }
        if let Some(root) = led {
            sinks.push(Sink {
                kind: SinkKind::Led { root },
                enabled: false,
            });
        }

        Self {
            sinks,
            blink_remaining: blink,
            blink_state: false,
            last_toggle: None,
        }
    }

    /// Indicator with no sinks
    pub fn disabled() -> Self {
        Self::new(None, None, 0)
    }

    /// Prepare every configured sink and switch it off
    ///
    /// A sink that cannot be prepared stays disabled for the rest of the run.
    pub fn enable(&mut self) {
        for sink in &mut self.sinks {
            match sink.prepare() {
                Ok(()) => {
                    sink.enabled = true;
                    info!("{} used for streaming status", sink.name());
                }
                Err(e) => warn!("{} unavailable for streaming status: {}", sink.name(), e),
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sinks.iter().any(|sink| sink.enabled)
    }

    pub fn blink_remaining(&self) -> u32 {
        self.blink_remaining
    }

    pub fn set(&mut self, on: bool) {
        let value = if on { "1" } else { "0" };
        for sink in self.sinks.iter_mut().filter(|sink| sink.enabled) {
            if let Err(e) = write_attr(&sink.value_path(), value) {
                warn!("{} write failed, disabling: {}", sink.name(), e);
                sink.enabled = false;
            }
        }
    }

    /// Stop any startup blink in progress
    pub fn cancel_blink(&mut self) {
        if self.blink_remaining > 0 {
            debug!("startup blink cancelled with {} left", self.blink_remaining);
        }
        self.blink_remaining = 0;
        self.blink_state = false;
    }

    /// Advance the startup blink; returns the new state when it toggled
    pub fn blink_tick(&mut self, now: Instant) -> Option<bool> {
        if self.blink_remaining == 0 {
            return None;
        }
        if self
            .last_toggle
            .is_some_and(|last| now.duration_since(last) < BLINK_PERIOD)
        {
            return None;
        }

        self.blink_state = !self.blink_state;
        self.set(self.blink_state);
        self.last_toggle = Some(now);
        if !self.blink_state {
            self.blink_remaining -= 1;
        }
        Some(self.blink_state)
    }
}
