//! uvc-gadget
//!
//! Streams a still image to a USB host through the UVC gadget function of a
//! Linux device-mode controller (Raspberry Pi Zero, CM4 and similar).

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use common::setup_logging;
use gadget::config::GadgetConfig;
use gadget::configfs;
use gadget::event_loop::{self, LoopOptions, ShutdownToken, spawn_signal_handler};
use gadget::image::ImageSource;
use gadget::negotiator::Negotiator;
use gadget::status::StatusIndicator;
use gadget::uvc::{MemoryMode, Session, V4l2Device};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "uvc-gadget")]
#[command(author, version, about = "UVC gadget - present a still image as a USB camera")]
#[command(long_about = "
Emulates a USB Video Class camera from user space. The host negotiates a
format over the probe/commit controls and then receives the configured image
as a continuous video stream.

EXAMPLES:
    # Stream a PNG at 30 fps from /dev/video0
    uvc-gadget -i /opt/image.png

    # Stream a raw greyscale image with 4 buffers at 15 fps
    uvc-gadget -z /opt/image.l8 --l8-size 640x480 -n 4 -r 15

    # Show streaming state on GPIO 17 and blink 5 times at startup
    uvc-gadget -i /opt/image.png -p 17 -b 5

    # Use kernel-mapped buffers and log the delivered frame rate
    uvc-gadget -i /opt/image.png --memory mmap -x

CONFIGURATION:
    Settings are read from the first file found in:
    1. Path specified with --config
    2. ~/.config/uvc-gadget/gadget.toml
    3. /etc/uvc-gadget/gadget.toml
    4. Built-in defaults
    Command-line flags override file values.

The frame formats are read from the UVC function in configfs.
")]
struct Args {
    /// UVC video device
    #[arg(short = 'u', long, value_name = "DEVICE")]
    device: Option<PathBuf>,

    /// Number of video buffers (2-32)
    #[arg(short = 'n', long, value_name = "COUNT", value_parser = clap::value_parser!(u32).range(2..=32))]
    buffers: Option<u32>,

    /// Frame rate (1-30)
    #[arg(short = 'r', long, value_name = "FPS", value_parser = clap::value_parser!(u32).range(1..=30))]
    framerate: Option<u32>,

    /// Blink this many times on startup (1-20)
    #[arg(short = 'b', long, value_name = "COUNT", value_parser = clap::value_parser!(u32).range(1..=20))]
    blink: Option<u32>,

    /// Log the delivered frame rate every second
    #[arg(short = 'x', long)]
    show_fps: bool,

    /// GPIO pin for streaming status
    #[arg(short = 'p', long, value_name = "PIN")]
    gpio_pin: Option<u32>,

    /// Use the onboard LED for streaming status
    #[arg(short = 'l', long)]
    onboard_led: bool,

    /// PNG image to stream
    #[arg(short = 'i', long, value_name = "PATH", conflicts_with = "l8")]
    png: Option<PathBuf>,

    /// Raw 8-bit greyscale image to stream
    #[arg(short = 'z', long, value_name = "PATH")]
    l8: Option<PathBuf>,

    /// Dimensions of the L8 image
    #[arg(long, value_name = "WxH", value_parser = parse_size)]
    l8_size: Option<(u32, u32)>,

    /// Buffer memory mode (mmap, userptr)
    #[arg(long, value_name = "MODE")]
    memory: Option<MemoryMode>,

    /// Root of the usb_gadget configfs tree
    #[arg(long, value_name = "PATH")]
    configfs_root: Option<PathBuf>,

    /// Path to configuration file
    #[arg(short = 'c', long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,
}

impl Args {
    /// Overlay command-line values onto the file configuration
    fn apply(&self, config: &mut GadgetConfig) {
        if let Some(device) = &self.device {
            config.gadget.device = device.clone();
        }
        if let Some(buffers) = self.buffers {
            config.gadget.buffers = buffers;
        }
        if let Some(framerate) = self.framerate {
            config.gadget.framerate = framerate;
        }
        if let Some(memory) = self.memory {
            config.gadget.memory = memory;
        }
        if let Some(level) = &self.log_level {
            config.gadget.log_level = level.clone();
        }
        config.gadget.show_fps |= self.show_fps;

        if let Some(blink) = self.blink {
            config.indicator.blink = blink;
        }
        if let Some(pin) = self.gpio_pin {
            config.indicator.gpio_pin = Some(pin);
        }
        config.indicator.onboard_led |= self.onboard_led;

        if let Some(png) = &self.png {
            config.image.png = Some(png.clone());
            config.image.l8 = None;
        }
        if let Some(l8) = &self.l8 {
            config.image.l8 = Some(l8.clone());
            config.image.png = None;
        }
        if let Some((width, height)) = self.l8_size {
            config.image.l8_width = width;
            config.image.l8_height = height;
        }
        if let Some(root) = &self.configfs_root {
            config.configfs.root = root.clone();
        }
    }
}

fn parse_size(value: &str) -> std::result::Result<(u32, u32), String> {
    let (width, height) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", value))?;
    let width: u32 = width.parse().map_err(|_| format!("invalid width '{}'", width))?;
    let height: u32 = height.parse().map_err(|_| format!("invalid height '{}'", height))?;
    if width == 0 || height == 0 {
        return Err("dimensions must be non-zero".to_string());
    }
    Ok((width, height))
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(1);
        }
    };

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

fn run(args: Args) -> Result<ExitCode> {
    if args.save_config {
        let config = GadgetConfig::default();
        let path = GadgetConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(ExitCode::SUCCESS);
    }

    let mut config = if let Some(ref path) = args.config {
        GadgetConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        GadgetConfig::load_or_default()
    };
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;
    let config = config.expanded();

    setup_logging(&config.gadget.log_level).context("Failed to setup logging")?;

    info!("uvc-gadget v{}", env!("CARGO_PKG_VERSION"));
    show_settings(&config);

    let image = load_image(&config)?;

    let layout = configfs::scan(&config.configfs.root, image.pixel_format())
        .context("Configfs settings for UVC gadget not found")?;
    let controls = config.control_table().context("Failed to build control table")?;

    let mut indicator = StatusIndicator::new(
        config
            .indicator
            .gpio_pin
            .map(|pin| (config.indicator.gpio_root.clone(), pin)),
        config
            .indicator
            .onboard_led
            .then(|| config.indicator.led_root.clone()),
        config.indicator.blink,
    );
    indicator.enable();

    let device = V4l2Device::open(&config.gadget.device)
        .with_context(|| format!("Failed to open {}", config.gadget.device.display()))?;

    let negotiator = Negotiator::new(layout.catalog, layout.streaming, image.pixel_count());
    let mut session = Session::new(
        device,
        negotiator,
        controls,
        image,
        config.gadget.memory,
        config.gadget.buffers,
    )
    .with_indicator(indicator);

    let options = LoopOptions {
        framerate: config.gadget.framerate,
        show_fps: config.gadget.show_fps,
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build runtime")?;

    runtime.block_on(async {
        let shutdown = ShutdownToken::new();
        let signals = spawn_signal_handler(shutdown.clone()).context("Failed to install signal handlers")?;

        session.start().context("Failed to subscribe to UVC events")?;
        info!("Waiting for the host, press Ctrl+C to exit");

        let result = event_loop::run(&mut session, options, &shutdown).await;
        signals.abort();
        session.shutdown();
        result.context("Event loop failed")
    })?;

    info!("uvc-gadget stopped");
    Ok(ExitCode::from(1))
}

fn load_image(config: &GadgetConfig) -> Result<ImageSource> {
    let image = &config.image;
    match (&image.png, &image.l8) {
        (Some(png), None) => ImageSource::from_png(png)
            .with_context(|| format!("Failed to load PNG image {}", png.display())),
        (None, Some(l8)) => ImageSource::from_l8(l8, image.l8_width, image.l8_height)
            .with_context(|| format!("Failed to load L8 image {}", l8.display())),
        (None, None) => Err(anyhow!("No image given, use --png or --l8")),
        (Some(_), Some(_)) => Err(anyhow!("Only one of --png and --l8 may be given")),
    }
}

fn show_settings(config: &GadgetConfig) {
    info!("SETTINGS: UVC device: {}", config.gadget.device.display());
    info!("SETTINGS: Buffers requested: {}", config.gadget.buffers);
    info!("SETTINGS: Memory mode: {}", config.gadget.memory);
    info!("SETTINGS: Frame rate: {}", config.gadget.framerate);
    info!(
        "SETTINGS: Show FPS: {}",
        if config.gadget.show_fps { "ENABLED" } else { "DISABLED" }
    );
    if let Some(pin) = config.indicator.gpio_pin {
        info!("SETTINGS: GPIO pin for streaming status: {}", pin);
    }
    info!(
        "SETTINGS: Onboard LED for streaming status: {}",
        if config.indicator.onboard_led { "ENABLED" } else { "DISABLED" }
    );
    info!("SETTINGS: Blink on startup: {} times", config.indicator.blink);
    info!("SETTINGS: Configfs root: {}", config.configfs.root.display());
}
