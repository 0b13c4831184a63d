//! Probe/commit negotiation
//!
//! Turns a host proposal (or an extremal query) into a streaming control
//! record that is guaranteed to name a frame the catalog actually defines.

use common::{Dimension, Extremum, FormatCatalog, FrameFormat, StreamingParams};
use protocol::StreamingControl;
use tracing::debug;

/// Frame interval used when the descriptor carries none (100 ns units)
pub const FALLBACK_FRAME_INTERVAL: u32 = 400_000;

/// Smallest descriptor interval taken at face value
const MIN_DESCRIPTOR_INTERVAL: u32 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationAction {
    /// Startup value of the probe and commit records
    Init,
    Min,
    Max,
    /// Host proposal from a SET_CUR data stage
    Set,
}

/// Outcome of one negotiation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiation {
    pub control: StreamingControl,
    /// Catalog entry the record points at
    pub frame: FrameFormat,
}

#[derive(Debug, Clone)]
pub struct Negotiator {
    catalog: FormatCatalog,
    streaming: StreamingParams,
    /// Pixel count of the image being streamed
    image_pixels: u32,
}

impl Negotiator {
    pub fn new(catalog: FormatCatalog, streaming: StreamingParams, image_pixels: u32) -> Self {
        Self {
            catalog,
            streaming,
            image_pixels,
        }
    }

    pub fn catalog(&self) -> &FormatCatalog {
        &self.catalog
    }

    pub fn streaming(&self) -> &StreamingParams {
        &self.streaming
    }

    fn extremal(&self, format: Option<u8>, dimension: Dimension, extremum: Extremum) -> u8 {
        // The catalog is never empty, so unfiltered queries always resolve
        self.catalog
            .extremal(format, dimension, extremum)
            .unwrap_or_else(|| {
                debug!("no {:?} {:?} in catalog (format filter {:?})", extremum, dimension, format);
                0
            })
    }

    /// Format index to use for a proposal, clamped onto defined formats
    fn resolve_format(&self, desired: u8) -> u8 {
        let first = self.extremal(None, Dimension::Format, Extremum::Min);
        let last = self.extremal(None, Dimension::Format, Extremum::Max);
        let clamped = desired.clamp(first, last);

        let defined = self.catalog.format_indices();
        if defined.contains(&clamped) {
            return clamped;
        }
        defined.range(..clamped).next_back().copied().unwrap_or(first)
    }

    /// Frame index within `format`, clamped onto frames that format defines
    fn resolve_frame(&self, format: u8, desired: u8) -> u8 {
        let first = self.extremal(Some(format), Dimension::Frame, Extremum::Min);
        let last = self.extremal(Some(format), Dimension::Frame, Extremum::Max);
        let clamped = desired.clamp(first, last);

        self.catalog
            .entries()
            .iter()
            .filter(|entry| entry.format_index == format && entry.frame_index <= clamped)
            .map(|entry| entry.frame_index)
            .max()
            .unwrap_or(first)
    }

    /// Pick the (format, frame) pair for an action
    pub fn select(&self, action: NegotiationAction, format: u8, frame: u8) -> (u8, u8) {
        let (format, frame) = match action {
            NegotiationAction::Min => (
                self.extremal(None, Dimension::Format, Extremum::Min),
                self.extremal(None, Dimension::Frame, Extremum::Min),
            ),
            NegotiationAction::Max => (
                self.extremal(None, Dimension::Format, Extremum::Max),
                self.extremal(None, Dimension::Frame, Extremum::Max),
            ),
            NegotiationAction::Init | NegotiationAction::Set => (format, frame),
        };

        let format = self.resolve_format(format);
        (format, self.resolve_frame(format, frame))
    }

    /// Largest payload per transfer the endpoint can carry
    pub fn max_payload_transfer_size(&self) -> u32 {
        let packet = self.streaming.max_packet;
        if packet > 1024 && packet % 1024 != 0 {
            packet - (packet / 1024) * 128
        } else {
            packet
        }
    }

    /// One and a half times the image pixel count, saturating
    pub fn max_video_frame_size(&self) -> u32 {
        let allowance = u64::from(self.image_pixels) * 3 / 2;
        u32::try_from(allowance).unwrap_or(u32::MAX)
    }

    pub fn negotiate(&self, action: NegotiationAction, format: u8, frame: u8) -> Negotiation {
        let (format_index, frame_index) = self.select(action, format, frame);

        let entry = self
            .catalog
            .lookup(format_index, frame_index)
            .unwrap_or_else(|| {
                debug!("format {} frame {} not in catalog, using first entry", format_index, frame_index);
                self.catalog.first()
            })
            .clone();

        let frame_interval = if entry.default_frame_interval >= MIN_DESCRIPTOR_INTERVAL {
            entry.default_frame_interval
        } else {
            FALLBACK_FRAME_INTERVAL
        };

        let first_format = self.extremal(None, Dimension::Format, Extremum::Min);
        let last_format = self.extremal(None, Dimension::Format, Extremum::Max);

        let control = StreamingControl {
            hint: 1,
            format_index,
            frame_index,
            frame_interval,
            max_video_frame_size: self.max_video_frame_size(),
            max_payload_transfer_size: self.max_payload_transfer_size(),
            framing_info: 3,
            min_version: first_format,
            max_version: last_format,
            preferred_version: last_format,
            ..Default::default()
        };

        debug!(
            "negotiated {:?}: format {}, frame {}, interval {}",
            action, format_index, frame_index, frame_interval
        );

        Negotiation {
            control,
            frame: entry,
        }
    }
}
