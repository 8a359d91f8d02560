use std::io::Cursor;

use anyhow::Context;

use crate::error::{FitroomError, FitroomResult};

/// JPEG quality used for persisted results. Fixed by configuration, not by
/// the client, so output size stays predictable.
pub const JPEG_QUALITY: u8 = 95;

#[derive(Clone, Debug, PartialEq, Eq)]
/// Decoded raster held as width/height plus tightly packed row-major RGB8.
///
/// Every pipeline stage consumes and produces this one color model; no stage
/// may assume anything about the source encoding.
pub struct Raster {
    width: u32,
    height: u32,
    rgb8: Vec<u8>,
}

impl Raster {
    /// Build a raster from raw RGB8 bytes, validating the buffer length.
    pub fn from_rgb8(width: u32, height: u32, rgb8: Vec<u8>) -> FitroomResult<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| FitroomError::validation("raster size overflow"))?;
        if rgb8.len() != expected {
            return Err(FitroomError::validation(format!(
                "raster byte length {} does not match {width}x{height} rgb8",
                rgb8.len()
            )));
        }
        Ok(Self {
            width,
            height,
            rgb8,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn rgb8(&self) -> &[u8] {
        &self.rgb8
    }

    /// RGB triple at pixel coordinates. Panics when out of bounds; intended
    /// for tests and debugging, not the hot path.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        assert!(x < self.width && y < self.height);
        let idx = ((y as usize) * (self.width as usize) + (x as usize)) * 3;
        [self.rgb8[idx], self.rgb8[idx + 1], self.rgb8[idx + 2]]
    }

    /// Convert to an opaque premultiplied pixmap for CPU rendering.
    ///
    /// `vello_cpu` surfaces are limited to u16 dimensions; anything larger is
    /// rejected rather than truncated.
    pub(crate) fn to_pixmap(&self) -> FitroomResult<vello_cpu::Pixmap> {
        let w: u16 = self
            .width
            .try_into()
            .map_err(|_| FitroomError::validation("raster width exceeds u16"))?;
        let h: u16 = self
            .height
            .try_into()
            .map_err(|_| FitroomError::validation("raster height exceeds u16"))?;

        let mut pixels = Vec::<vello_cpu::peniko::color::PremulRgba8>::with_capacity(
            (self.width as usize) * (self.height as usize),
        );
        for px in self.rgb8.chunks_exact(3) {
            // Alpha is 255 everywhere, so straight and premultiplied agree.
            pixels.push(vello_cpu::peniko::color::PremulRgba8::from_u8_array([
                px[0], px[1], px[2], 255,
            ]));
        }
        Ok(vello_cpu::Pixmap::from_parts_with_opacity(pixels, w, h, true))
    }

    /// Read a rendered pixmap back into the pipeline color model, dropping
    /// alpha after unpremultiplying.
    pub(crate) fn from_pixmap(pixmap: &vello_cpu::Pixmap) -> FitroomResult<Self> {
        let width = u32::from(pixmap.width());
        let height = u32::from(pixmap.height());
        let bytes = pixmap.data_as_u8_slice();

        let mut rgb8 = Vec::with_capacity((width as usize) * (height as usize) * 3);
        for px in bytes.chunks_exact(4) {
            let a = px[3] as u16;
            if a == 0 {
                rgb8.extend_from_slice(&[0, 0, 0]);
                continue;
            }
            let unpremul = |c: u8| -> u8 {
                (((u16::from(c) * 255) + a / 2) / a).min(255) as u8
            };
            rgb8.extend_from_slice(&[unpremul(px[0]), unpremul(px[1]), unpremul(px[2])]);
        }
        Self::from_rgb8(width, height, rgb8)
    }
}

/// Decode any supported encoding into the normalized RGB8 raster.
///
/// Parser faults never escape as panics or low-level error types; they are
/// reported as [`FitroomError::Decode`].
pub fn decode(bytes: &[u8]) -> FitroomResult<Raster> {
    let dyn_img = image::load_from_memory(bytes)
        .map_err(|e| FitroomError::decode(format!("unreadable image data: {e}")))?;
    let rgb = dyn_img.to_rgb8();
    let (width, height) = rgb.dimensions();
    Raster::from_rgb8(width, height, rgb.into_raw())
}

/// Encode a raster as JPEG at the given quality.
pub fn encode_jpeg(raster: &Raster, quality: u8) -> FitroomResult<Vec<u8>> {
    let mut buf = Vec::new();
    let mut cursor = Cursor::new(&mut buf);
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut cursor, quality);
    encoder
        .encode(
            raster.rgb8(),
            raster.width(),
            raster.height(),
            image::ExtendedColorType::Rgb8,
        )
        .context("encode jpeg")?;
    Ok(buf)
}

/// Encode a raster losslessly as PNG.
pub fn encode_png(raster: &Raster) -> FitroomResult<Vec<u8>> {
    let img = image::RgbImage::from_raw(raster.width(), raster.height(), raster.rgb8().to_vec())
        .ok_or_else(|| FitroomError::validation("raster buffer does not match dimensions"))?;
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .context("encode png")?;
    Ok(buf)
}
