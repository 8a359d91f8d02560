use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{FitroomError, FitroomResult};
use crate::raster::{self, Raster};
use crate::text::{self, LabelBrush, LabelFont, TextLayoutEngine};

/// Edge length of the procedurally generated garment swatch.
pub const PLACEHOLDER_SIZE: u32 = 512;

const PLACEHOLDER_LABEL_SIZE_PX: f32 = 48.0;

#[derive(Clone, Debug, Serialize, Deserialize)]
/// Client-supplied metadata describing the clothing item when no garment
/// image is uploaded.
pub struct GarmentDescriptor {
    pub name: String,
    /// Free-form category such as `dress`, `polo`, `tshirt`.
    pub kind: String,
    /// `#RRGGBB` hex string. Must parse to exactly three byte channels.
    pub color: String,
    pub size: String,
}

/// Parse a `#RRGGBB` color into its three byte channels.
///
/// A malformed color fails the whole request; it is never silently replaced
/// with a default.
pub fn parse_hex_color(input: &str) -> FitroomResult<[u8; 3]> {
    let hex = input.strip_prefix('#').unwrap_or(input);
    if hex.len() != 6 {
        return Err(FitroomError::validation(format!(
            "invalid clothing color '{input}': expected #RRGGBB"
        )));
    }
    let mut channels = [0u8; 3];
    for (i, channel) in channels.iter_mut().enumerate() {
        *channel = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).map_err(|_| {
            FitroomError::validation(format!(
                "invalid clothing color '{input}': expected #RRGGBB"
            ))
        })?;
    }
    Ok(channels)
}

/// Produces the garment raster for one request: either the decoded upload or
/// a procedurally rendered labeled swatch.
pub struct GarmentResolver {
    font: Arc<LabelFont>,
}

impl GarmentResolver {
    pub fn new(font: Arc<LabelFont>) -> Self {
        Self { font }
    }

    /// Resolve the garment raster. An uploaded image takes precedence; its
    /// descriptor fields stay advisory metadata. Without an upload the
    /// swatch is generated deterministically from the descriptor alone.
    pub fn resolve(
        &self,
        upload: Option<&[u8]>,
        descriptor: &GarmentDescriptor,
    ) -> FitroomResult<Raster> {
        match upload {
            Some(bytes) => raster::decode(bytes),
            None => self.render_placeholder(descriptor),
        }
    }

    fn render_placeholder(&self, descriptor: &GarmentDescriptor) -> FitroomResult<Raster> {
        let [r, g, b] = parse_hex_color(&descriptor.color)?;
        let side = PLACEHOLDER_SIZE as u16;

        let mut ctx = vello_cpu::RenderContext::new(side, side);
        ctx.set_transform(vello_cpu::kurbo::Affine::IDENTITY);
        ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(r, g, b, 255));
        ctx.fill_rect(&vello_cpu::kurbo::Rect::new(
            0.0,
            0.0,
            f64::from(side),
            f64::from(side),
        ));

        let mut engine = TextLayoutEngine::new();
        let layout = engine.layout_plain(
            &descriptor.kind.to_uppercase(),
            &self.font,
            PLACEHOLDER_LABEL_SIZE_PX,
            LabelBrush::WHITE,
        )?;
        let x = (f64::from(side) - f64::from(layout.width())) / 2.0;
        let y = (f64::from(side) - f64::from(layout.height())) / 2.0;
        ctx.set_transform(vello_cpu::kurbo::Affine::translate((x.max(0.0), y.max(0.0))));
        text::fill_glyphs(&mut ctx, &self.font, &layout);

        let mut pixmap = vello_cpu::Pixmap::new(side, side);
        ctx.flush();
        ctx.render_to_pixmap(&mut pixmap);
        Raster::from_pixmap(&pixmap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(kind: &str, color: &str) -> GarmentDescriptor {
        GarmentDescriptor {
            name: "Test Item".to_string(),
            kind: kind.to_string(),
            color: color.to_string(),
            size: "M".to_string(),
        }
    }

    #[test]
    fn hex_color_parses_exact_channels() {
        assert_eq!(parse_hex_color("#336699").unwrap(), [0x33, 0x66, 0x99]);
        assert_eq!(parse_hex_color("#000000").unwrap(), [0, 0, 0]);
        assert_eq!(parse_hex_color("#ffFFff").unwrap(), [255, 255, 255]);
    }

    #[test]
    fn hex_color_rejects_malformed_input() {
        for bad in ["notacolor", "#12345", "#1234567", "#33669g", "", "#"] {
            let err = parse_hex_color(bad).unwrap_err();
            assert!(matches!(err, FitroomError::Validation(_)), "input {bad:?}");
        }
    }

    #[test]
    fn placeholder_is_deterministic() {
        let Ok(font) = LabelFont::discover() else {
            eprintln!("skipping: no system fonts available");
            return;
        };
        let resolver = GarmentResolver::new(Arc::new(font));
        let desc = descriptor("tshirt", "#336699");
        let a = resolver.resolve(None, &desc).unwrap();
        let b = resolver.resolve(None, &desc).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn placeholder_uses_descriptor_color_and_size() {
        let Ok(font) = LabelFont::discover() else {
            eprintln!("skipping: no system fonts available");
            return;
        };
        let resolver = GarmentResolver::new(Arc::new(font));
        let swatch = resolver.resolve(None, &descriptor("dress", "#336699")).unwrap();
        assert_eq!(swatch.width(), PLACEHOLDER_SIZE);
        assert_eq!(swatch.height(), PLACEHOLDER_SIZE);
        // Corners are plain fill; the centered label must disturb at least
        // one pixel elsewhere.
        assert_eq!(swatch.pixel(0, 0), [0x33, 0x66, 0x99]);
        assert_eq!(
            swatch.pixel(PLACEHOLDER_SIZE - 1, PLACEHOLDER_SIZE - 1),
            [0x33, 0x66, 0x99]
        );
        let labeled = swatch
            .rgb8()
            .chunks_exact(3)
            .any(|px| px != [0x33, 0x66, 0x99]);
        assert!(labeled, "placeholder label did not render");
    }

    #[test]
    fn upload_takes_precedence_over_placeholder() {
        let Ok(font) = LabelFont::discover() else {
            eprintln!("skipping: no system fonts available");
            return;
        };
        let resolver = GarmentResolver::new(Arc::new(font));
        let uploaded = Raster::from_rgb8(2, 2, vec![10u8; 12]).unwrap();
        let png = raster::encode_png(&uploaded).unwrap();
        let resolved = resolver
            .resolve(Some(&png), &descriptor("tshirt", "#336699"))
            .unwrap();
        assert_eq!(resolved, uploaded);
    }
}
