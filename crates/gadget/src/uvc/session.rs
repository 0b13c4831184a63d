//! UVC gadget session
//!
//! All runtime state of one gadget run: the device, the negotiated probe and
//! commit records, the control table, the streaming buffers and the status
//! indicator. The event loop drives it through [`Session::process_event`]
//! and [`Session::deliver_frame`].

use super::buffers::{BufferPipeline, MIN_BUFFERS};
use super::device::{GadgetDevice, MemoryMode, VideoFormat};
use super::requests::{DataOutcome, RequestProcessor};
use crate::image::ImageSource;
use crate::negotiator::{Negotiation, Negotiator};
use crate::status::StatusIndicator;
use common::{ControlTable, Error, PixelFormat, Result};
use protocol::{CtrlRequest, RequestData, UvcEvent};
use tracing::{debug, error, info, warn};

pub struct Session<D: GadgetDevice> {
    device: D,
    negotiator: Negotiator,
    controls: ControlTable,
    requests: RequestProcessor,
    pipeline: BufferPipeline,
    image: ImageSource,
    indicator: StatusIndicator,
    buffer_count: u32,
    streaming: bool,
    shutdown_requested: bool,
    frames_delivered: u64,
}

impl<D: GadgetDevice> Session<D> {
    pub fn new(
        device: D,
        negotiator: Negotiator,
        controls: ControlTable,
        image: ImageSource,
        memory: MemoryMode,
        buffer_count: u32,
    ) -> Self {
        let requests = RequestProcessor::new(&negotiator);
        Self {
            device,
            negotiator,
            controls,
            requests,
            pipeline: BufferPipeline::new(memory),
            image,
            indicator: StatusIndicator::disabled(),
            buffer_count,
            streaming: false,
            shutdown_requested: false,
            frames_delivered: 0,
        }
    }

    pub fn with_indicator(mut self, indicator: StatusIndicator) -> Self {
        self.indicator = indicator;
        self
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn controls(&self) -> &ControlTable {
        &self.controls
    }

    pub fn requests(&self) -> &RequestProcessor {
        &self.requests
    }

    pub fn pipeline(&self) -> &BufferPipeline {
        &self.pipeline
    }

    pub fn indicator_mut(&mut self) -> &mut StatusIndicator {
        &mut self.indicator
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested
    }

    pub fn frames_delivered(&self) -> u64 {
        self.frames_delivered
    }

    /// Subscribe to the UVC control events
    pub fn start(&mut self) -> Result<()> {
        self.device.subscribe_events()?;
        info!("subscribed to UVC events");
        Ok(())
    }

    /// Dispatch one pending control event; `false` when none was pending
    pub fn process_event(&mut self) -> Result<bool> {
        match self.device.dequeue_event()? {
            Some(event) => {
                self.handle_event(event);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn handle_event(&mut self, event: UvcEvent) {
        debug!("{}", event.name());
        match event {
            UvcEvent::Connect { speed } => info!("host connected (speed {})", speed),
            UvcEvent::Disconnect => {
                info!("host disconnected");
                self.shutdown_requested = true;
            }
            UvcEvent::Setup(request) => self.handle_setup(&request),
            UvcEvent::Data(data) => self.handle_data(&data),
            UvcEvent::StreamOn => {
                if let Err(e) = self.stream_on() {
                    error!("stream on failed: {}", e);
                }
            }
            UvcEvent::StreamOff => {
                if let Err(e) = self.stream_off() {
                    error!("stream off failed: {}", e);
                }
            }
        }
    }

    fn handle_setup(&mut self, request: &CtrlRequest) {
        let response = self.requests.setup(request, &self.controls, &self.negotiator);
        if let Err(e) = self.device.send_response(&response) {
            error!("failed to answer request {:#04x}: {}", request.request, e);
        }
    }

    fn handle_data(&mut self, data: &RequestData) {
        match self.requests.data(data, &mut self.controls, &self.negotiator) {
            DataOutcome::Probe(negotiation) => debug!("probe set: {}", negotiation.frame),
            DataOutcome::Commit(negotiation) => {
                if self.streaming {
                    warn!("commit while streaming, format change skipped: {}", negotiation.frame);
                } else if let Err(e) = self.apply_format(&negotiation) {
                    error!("failed to apply committed format: {}", e);
                }
            }
            DataOutcome::Control { name, value } => info!("control {} set to {}", name, value),
            DataOutcome::Ignored => {}
        }
    }

    fn apply_format(&mut self, negotiation: &Negotiation) -> Result<()> {
        let frame = &negotiation.frame;
        let requested = VideoFormat {
            fourcc: frame.pixel_format.fourcc(),
            width: frame.width,
            height: frame.height,
            size_image: frame.pixel_format.frame_size(frame.width, frame.height),
        };

        let applied = self.device.set_format(&requested)?;
        match PixelFormat::from_fourcc(applied.fourcc) {
            Some(format) => info!(
                "format set: {} {}x{}, image size {}",
                format, applied.width, applied.height, applied.size_image
            ),
            None => warn!(
                "driver reports unknown fourcc {:#010x} for {}x{}",
                applied.fourcc, applied.width, applied.height
            ),
        }
        Ok(())
    }

    /// Allocate, fill and queue every buffer, then start the output queue
    ///
    /// Leaves the session stopped with nothing allocated on failure.
    pub fn stream_on(&mut self) -> Result<()> {
        if self.streaming {
            debug!("already streaming");
            return Ok(());
        }
        if self.buffer_count < MIN_BUFFERS {
            return Err(Error::InsufficientBuffers {
                requested: self.buffer_count,
                minimum: MIN_BUFFERS,
            });
        }

        self.pipeline
            .allocate(&mut self.device, self.buffer_count, self.image.payload())?;

        if let Err(e) = self.prime_and_start() {
            if let Err(release_err) = self.pipeline.release(&mut self.device) {
                warn!("buffer release after failed stream on: {}", release_err);
            }
            return Err(e);
        }

        self.streaming = true;
        self.indicator.cancel_blink();
        self.indicator.set(true);
        info!("streaming started with {} buffers", self.pipeline.len());
        Ok(())
    }

    fn prime_and_start(&mut self) -> Result<()> {
        for index in 0..self.pipeline.len() as u32 {
            if self.pipeline.memory() == MemoryMode::Mmap {
                self.pipeline.fill(index, self.image.payload())?;
            }
            self.pipeline.queue(&mut self.device, index)?;
        }
        self.device.stream_on()
    }

    /// Stop the output queue and release the buffers; safe to repeat
    pub fn stream_off(&mut self) -> Result<()> {
        let was_streaming = self.streaming;
        self.streaming = false;

        let stop = if was_streaming {
            self.device.stream_off()
        } else {
            Ok(())
        };
        let release = self.pipeline.release(&mut self.device);
        self.indicator.set(false);

        if was_streaming {
            info!("streaming stopped after {} frames", self.frames_delivered);
        }
        stop.and(release)
    }

    /// Recycle one buffer the kernel has sent; `false` when none was ready
    pub fn deliver_frame(&mut self) -> Result<bool> {
        if !self.streaming {
            return Ok(false);
        }
        let Some(index) = self.pipeline.dequeue(&mut self.device)? else {
            return Ok(false);
        };

        if self.pipeline.memory() == MemoryMode::Mmap {
            self.pipeline.fill(index, self.image.payload())?;
        }
        self.pipeline.queue(&mut self.device, index)?;
        self.frames_delivered += 1;
        Ok(true)
    }

    /// Unsubscribe and stop streaming; errors are logged, not returned
    pub fn shutdown(&mut self) {
        if let Err(e) = self.device.unsubscribe_events() {
            warn!("unsubscribe failed: {}", e);
        }
        if let Err(e) = self.stream_off() {
            warn!("stream off during shutdown failed: {}", e);
        }
        info!("session closed");
    }

    /// Consume the session, returning the device
    pub fn into_device(self) -> D {
        self.device
    }
}
