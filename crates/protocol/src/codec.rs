//! Streaming control record codec
//!
//! The probe/commit record (`struct uvc_streaming_control`) is exchanged
//! little-endian and packed. UVC 1.1 defines 34 bytes; UVC 1.0 hosts send
//! only the first 26, so decoding zero-fills whatever the host omitted.
//!
//! # Layout
//!
//! ```text
//! off  size  field
//!   0     2  bmHint
//!   2     1  bFormatIndex
//!   3     1  bFrameIndex
//!   4     4  dwFrameInterval
//!   8     2  wKeyFrameRate
//!  10     2  wPFrameRate
//!  12     2  wCompQuality
//!  14     2  wCompWindowSize
//!  16     2  wDelay
//!  18     4  dwMaxVideoFrameSize
//!  22     4  dwMaxPayloadTransferSize
//!  26     4  dwClockFrequency
//!  30     1  bmFramingInfo
//!  31     1  bPreferedVersion
//!  32     1  bMinVersion
//!  33     1  bMaxVersion
//! ```

use crate::error::{ProtocolError, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Write};

/// Negotiated streaming parameters for the probe and commit controls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamingControl {
    pub hint: u16,
    pub format_index: u8,
    pub frame_index: u8,
    /// Frame interval in 100 ns units
    pub frame_interval: u32,
    pub key_frame_rate: u16,
    pub p_frame_rate: u16,
    pub comp_quality: u16,
    pub comp_window_size: u16,
    pub delay: u16,
    pub max_video_frame_size: u32,
    pub max_payload_transfer_size: u32,
    pub clock_frequency: u32,
    pub framing_info: u8,
    pub preferred_version: u8,
    pub min_version: u8,
    pub max_version: u8,
}

impl StreamingControl {
    /// Encoded size in bytes (UVC 1.1)
    pub const SIZE: usize = 34;

    /// Smallest payload that still carries the format and frame indices
    pub const MIN_DECODE_SIZE: usize = 4;

    /// Encode into the 34-byte wire representation
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        let mut cursor = Cursor::new(&mut bytes[..]);
        // Writes into a fixed buffer of exactly SIZE bytes cannot fail
        let _ = self.write_to(&mut cursor);
        bytes
    }

    /// Write the record to a writer
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u16::<LittleEndian>(self.hint)?;
        writer.write_u8(self.format_index)?;
        writer.write_u8(self.frame_index)?;
        writer.write_u32::<LittleEndian>(self.frame_interval)?;
        writer.write_u16::<LittleEndian>(self.key_frame_rate)?;
        writer.write_u16::<LittleEndian>(self.p_frame_rate)?;
        writer.write_u16::<LittleEndian>(self.comp_quality)?;
        writer.write_u16::<LittleEndian>(self.comp_window_size)?;
        writer.write_u16::<LittleEndian>(self.delay)?;
        writer.write_u32::<LittleEndian>(self.max_video_frame_size)?;
        writer.write_u32::<LittleEndian>(self.max_payload_transfer_size)?;
        writer.write_u32::<LittleEndian>(self.clock_frequency)?;
        writer.write_u8(self.framing_info)?;
        writer.write_u8(self.preferred_version)?;
        writer.write_u8(self.min_version)?;
        writer.write_u8(self.max_version)?;
        Ok(())
    }

    /// Decode a record sent by the host
    ///
    /// Accepts anything from [`Self::MIN_DECODE_SIZE`] up to [`Self::SIZE`]
    /// bytes; longer input is truncated, shorter trailing fields read as zero.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::MIN_DECODE_SIZE {
            return Err(ProtocolError::BufferTooSmall {
                needed: Self::MIN_DECODE_SIZE,
                available: bytes.len(),
            });
        }

        let mut padded = [0u8; Self::SIZE];
        let len = bytes.len().min(Self::SIZE);
        padded[..len].copy_from_slice(&bytes[..len]);

        let mut reader = Cursor::new(&padded[..]);
        Ok(Self {
            hint: reader.read_u16::<LittleEndian>()?,
            format_index: reader.read_u8()?,
            frame_index: reader.read_u8()?,
            frame_interval: reader.read_u32::<LittleEndian>()?,
            key_frame_rate: reader.read_u16::<LittleEndian>()?,
            p_frame_rate: reader.read_u16::<LittleEndian>()?,
            comp_quality: reader.read_u16::<LittleEndian>()?,
            comp_window_size: reader.read_u16::<LittleEndian>()?,
            delay: reader.read_u16::<LittleEndian>()?,
            max_video_frame_size: reader.read_u32::<LittleEndian>()?,
            max_payload_transfer_size: reader.read_u32::<LittleEndian>()?,
            clock_frequency: reader.read_u32::<LittleEndian>()?,
            framing_info: reader.read_u8()?,
            preferred_version: reader.read_u8()?,
            min_version: reader.read_u8()?,
            max_version: reader.read_u8()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> StreamingControl {
        StreamingControl {
            hint: 1,
            format_index: 1,
            frame_index: 2,
            frame_interval: 333_333,
            max_video_frame_size: 460_800,
            max_payload_transfer_size: 2688,
            framing_info: 3,
            preferred_version: 1,
            min_version: 1,
            max_version: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_field_offsets() {
        let bytes = sample().encode();
        assert_eq!(&bytes[0..2], &[0x01, 0x00]);
        assert_eq!(bytes[2], 1);
        assert_eq!(bytes[3], 2);
        assert_eq!(&bytes[4..8], &333_333u32.to_le_bytes());
        assert_eq!(&bytes[18..22], &460_800u32.to_le_bytes());
        assert_eq!(&bytes[22..26], &2688u32.to_le_bytes());
        assert_eq!(bytes[30], 3);
        assert_eq!(bytes[31], 1);
    }

    #[test]
    fn test_decode_uvc10_prefix() {
        let bytes = sample().encode();
        let decoded = StreamingControl::decode(&bytes[..26]).unwrap();
        assert_eq!(decoded.format_index, 1);
        assert_eq!(decoded.frame_index, 2);
        assert_eq!(decoded.max_payload_transfer_size, 2688);
        assert_eq!(decoded.framing_info, 0);
        assert_eq!(decoded.max_version, 0);
    }

    #[test]
    fn test_decode_too_short() {
        let err = StreamingControl::decode(&[1, 0, 1]).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::BufferTooSmall {
                needed: 4,
                available: 3
            }
        ));
    }

    #[test]
    fn test_decode_full_record() {
        let control = sample();
        assert_eq!(StreamingControl::decode(&control.encode()).unwrap(), control);
    }
}
