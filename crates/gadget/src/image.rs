//! Still image frame source
//!
//! Decodes the image streamed to the host once at startup. PNG input is
//! converted to packed YUYV 4:2:2; L8 input is streamed as raw greyscale.

use common::{Error, PixelFormat, Result};
use image::ImageFormat;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Frame payload and its geometry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSource {
    payload: Vec<u8>,
    pixel_format: PixelFormat,
    width: u32,
    height: u32,
}

impl ImageSource {
    pub fn from_png(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)
            .map_err(|e| Error::Image(format!("cannot read {}: {}", path.display(), e)))?;
        let source = Self::from_png_bytes(&bytes)?;
        info!(
            "loaded PNG {} ({}x{}, {} bytes YUYV)",
            path.display(),
            source.width,
            source.height,
            source.payload.len()
        );
        Ok(source)
    }

    /// Decode PNG data of any colour type into YUYV
    pub fn from_png_bytes(bytes: &[u8]) -> Result<Self> {
        let decoded = image::load_from_memory_with_format(bytes, ImageFormat::Png)
            .map_err(|e| Error::Image(format!("PNG decode failed: {}", e)))?;
        let rgba = decoded.to_rgba8();
        let (width, height) = rgba.dimensions();
        check_geometry(width, height)?;

        Ok(Self {
            payload: rgba_to_yuyv(rgba.as_raw(), width, height),
            pixel_format: PixelFormat::Yuyv,
            width,
            height,
        })
    }

    /// Raw 8-bit greyscale file; the whole file is streamed as-is
    pub fn from_l8(path: &Path, width: u32, height: u32) -> Result<Self> {
        let bytes = fs::read(path)
            .map_err(|e| Error::Image(format!("cannot read {}: {}", path.display(), e)))?;
        let source = Self::from_l8_bytes(bytes, width, height)?;
        info!(
            "loaded L8 {} ({}x{}, {} bytes)",
            path.display(),
            width,
            height,
            source.payload.len()
        );
        Ok(source)
    }

    pub fn from_l8_bytes(bytes: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Error::Image("L8 image is empty".to_string()));
        }
        check_geometry(width, height)?;
        let expected = width as usize * height as usize;
        if bytes.len() != expected {
            warn!(
                "L8 image is {} bytes, {}x{} expects {}",
                bytes.len(),
                width,
                height,
                expected
            );
        }

        Ok(Self {
            payload: bytes,
            pixel_format: PixelFormat::Grey,
            width,
            height,
        })
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Fits in `u32`; the constructors reject larger images
    pub fn pixel_count(&self) -> u32 {
        self.width.saturating_mul(self.height)
    }
}

/// Non-zero dimensions whose pixel count fits in `u32`
fn check_geometry(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(Error::Image(format!("image {}x{} has no pixels", width, height)));
    }
    if width.checked_mul(height).is_none() {
        return Err(Error::Image(format!("image {}x{} is too large", width, height)));
    }
    Ok(())
}

fn luma(r: i32, g: i32, b: i32) -> u8 {
    (((66 * r + 129 * g + 25 * b + 128) >> 8) + 16) as u8
}

fn chroma_u(r: i32, g: i32, b: i32) -> i32 {
    ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128
}

fn chroma_v(r: i32, g: i32, b: i32) -> i32 {
    ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128
}

/// Convert tightly packed RGBA rows to YUYV (BT.601, studio range)
///
/// Each pixel pair shares the average of its chroma; an odd trailing pixel
/// is paired with itself.
pub fn rgba_to_yuyv(rgba: &[u8], width: u32, height: u32) -> Vec<u8> {
    let width = width as usize;
    let pairs = width.div_ceil(2);
    let mut out = Vec::with_capacity(pairs * 4 * height as usize);

    for row in rgba.chunks_exact(width * 4).take(height as usize) {
        for pair in 0..pairs {
            let first = pair * 2;
            let second = (first + 1).min(width - 1);
            let [r1, g1, b1] = rgb(row, first);
            let [r2, g2, b2] = rgb(row, second);

            let u = (chroma_u(r1, g1, b1) + chroma_u(r2, g2, b2)) / 2;
            let v = (chroma_v(r1, g1, b1) + chroma_v(r2, g2, b2)) / 2;

            out.extend_from_slice(&[
                luma(r1, g1, b1),
                u.clamp(0, 255) as u8,
                luma(r2, g2, b2),
                v.clamp(0, 255) as u8,
            ]);
        }
    }
    out
}

fn rgb(row: &[u8], pixel: usize) -> [i32; 3] {
    let offset = pixel * 4;
    [
        i32::from(row[offset]),
        i32::from(row[offset + 1]),
        i32::from(row[offset + 2]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Luma, Rgba};
    use std::io::Cursor;

    fn encode_png<P, C>(img: &ImageBuffer<P, C>) -> Vec<u8>
    where
        P: image::PixelWithColorType,
        [P::Subpixel]: image::EncodableLayout,
        C: std::ops::Deref<Target = [P::Subpixel]>,
    {
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png).unwrap();
        bytes
    }

    #[test]
    fn test_white_and_black() {
        let white = rgba_to_yuyv(&[255; 8], 2, 1);
        assert_eq!(white, vec![235, 128, 235, 128]);

        let black = rgba_to_yuyv(&[0, 0, 0, 255, 0, 0, 0, 255], 2, 1);
        assert_eq!(black, vec![16, 128, 16, 128]);
    }

    #[test]
    fn test_odd_width_repeats_last_pixel() {
        let rgba = [255, 255, 255, 255, 0, 0, 0, 255, 0, 0, 0, 255];
        let yuyv = rgba_to_yuyv(&rgba, 3, 1);
        assert_eq!(yuyv.len(), 8);
        assert_eq!(&yuyv[4..], &[16, 128, 16, 128]);
    }

    #[test]
    fn test_png_decodes_to_yuyv() {
        let img: ImageBuffer<Rgba<u8>, Vec<u8>> = ImageBuffer::from_pixel(4, 2, Rgba([255, 255, 255, 255]));
        let source = ImageSource::from_png_bytes(&encode_png(&img)).unwrap();

        assert_eq!(source.pixel_format(), PixelFormat::Yuyv);
        assert_eq!((source.width(), source.height()), (4, 2));
        assert_eq!(source.payload().len(), 4 * 2 * 2);
        assert_eq!(source.pixel_count(), 8);
    }

    #[test]
    fn test_greyscale_png_is_expanded() {
        let img: ImageBuffer<Luma<u8>, Vec<u8>> = ImageBuffer::from_pixel(2, 2, Luma([0]));
        let source = ImageSource::from_png_bytes(&encode_png(&img)).unwrap();
        assert_eq!(&source.payload()[..4], &[16, 128, 16, 128]);
    }

    #[test]
    fn test_invalid_png_is_rejected() {
        let err = ImageSource::from_png_bytes(b"not a png").unwrap_err();
        assert!(matches!(err, Error::Image(_)));
    }

    #[test]
    fn test_l8_keeps_raw_bytes() {
        let source = ImageSource::from_l8_bytes(vec![7; 16], 4, 4).unwrap();
        assert_eq!(source.pixel_format(), PixelFormat::Grey);
        assert_eq!(source.payload(), &[7; 16]);

        assert!(ImageSource::from_l8_bytes(Vec::new(), 4, 4).is_err());
    }

    #[test]
    fn test_oversize_l8_is_rejected() {
        let err = ImageSource::from_l8_bytes(vec![0; 16], 70_000, 70_000).unwrap_err();
        assert!(matches!(err, Error::Image(_)));
        assert!(ImageSource::from_l8_bytes(vec![0; 16], 0, 4).is_err());

        let widest = ImageSource::from_l8_bytes(vec![0; 16], 65_536, 65_535).unwrap();
        assert_eq!(widest.pixel_count(), 65_536 * 65_535);
    }

    #[test]
    fn test_l8_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.l8");
        fs::write(&path, vec![0x80; 480 * 480]).unwrap();

        let source = ImageSource::from_l8(&path, 480, 480).unwrap();
        assert_eq!(source.payload().len(), 480 * 480);
        assert!(ImageSource::from_l8(&dir.path().join("missing"), 480, 480).is_err());
    }
}
