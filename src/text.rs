use std::path::Path;
use std::sync::Arc;

use anyhow::Context;

use crate::error::{FitroomError, FitroomResult};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
/// RGBA8 brush color carried through Parley text layout.
pub struct LabelBrush {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl LabelBrush {
    pub const WHITE: Self = Self {
        r: 255,
        g: 255,
        b: 255,
        a: 255,
    };

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }
}

#[derive(Clone)]
/// Font used for every label the service draws, resolved once at startup and
/// immutable afterwards.
pub struct LabelFont {
    bytes: Arc<Vec<u8>>,
    font_data: vello_cpu::peniko::FontData,
}

impl std::fmt::Debug for LabelFont {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LabelFont")
            .field("bytes_len", &self.bytes.len())
            .finish()
    }
}

impl LabelFont {
    pub fn from_bytes(bytes: Vec<u8>) -> FitroomResult<Self> {
        if bytes.is_empty() {
            return Err(FitroomError::validation("label font data is empty"));
        }
        let font_data = vello_cpu::peniko::FontData::new(
            vello_cpu::peniko::Blob::from(bytes.clone()),
            0,
        );
        Ok(Self {
            bytes: Arc::new(bytes),
            font_data,
        })
    }

    pub fn from_path(path: &Path) -> FitroomResult<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("read label font from '{}'", path.display()))?;
        Self::from_bytes(bytes)
    }

    /// Query the system font database for a sans-serif face, falling back to
    /// whatever face exists when the generic family has no match.
    pub fn discover() -> FitroomResult<Self> {
        let mut db = fontdb::Database::new();
        db.load_system_fonts();

        let query = fontdb::Query {
            families: &[fontdb::Family::SansSerif],
            ..fontdb::Query::default()
        };
        let id = db
            .query(&query)
            .or_else(|| db.faces().next().map(|f| f.id))
            .ok_or_else(|| FitroomError::processing("no usable fonts found on this system"))?;

        let bytes = db
            .with_face_data(id, |data, _| data.to_vec())
            .ok_or_else(|| FitroomError::processing("failed to load system font data"))?;
        Self::from_bytes(bytes)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub(crate) fn font_data(&self) -> &vello_cpu::peniko::FontData {
        &self.font_data
    }
}

/// Stateful helper for building Parley layouts from the label font.
pub struct TextLayoutEngine {
    font_ctx: parley::FontContext,
    layout_ctx: parley::LayoutContext<LabelBrush>,
}

impl Default for TextLayoutEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TextLayoutEngine {
    pub fn new() -> Self {
        Self {
            font_ctx: parley::FontContext::default(),
            layout_ctx: parley::LayoutContext::new(),
        }
    }

    /// Shape and lay out a single line of plain text.
    pub fn layout_plain(
        &mut self,
        text: &str,
        font: &LabelFont,
        size_px: f32,
        brush: LabelBrush,
    ) -> FitroomResult<parley::Layout<LabelBrush>> {
        if !size_px.is_finite() || size_px <= 0.0 {
            return Err(FitroomError::validation(
                "label size_px must be finite and > 0",
            ));
        }

        let families = self.font_ctx.collection.register_fonts(
            parley::fontique::Blob::from(font.bytes().to_vec()),
            None,
        );
        let family_id = families.first().map(|(id, _)| *id).ok_or_else(|| {
            FitroomError::validation("no font families registered from font bytes")
        })?;
        let family_name = self
            .font_ctx
            .collection
            .family_name(family_id)
            .ok_or_else(|| FitroomError::validation("registered font family has no name"))?
            .to_string();

        let mut builder = self
            .layout_ctx
            .ranged_builder(&mut self.font_ctx, text, 1.0, true);
        builder.push_default(parley::style::StyleProperty::FontStack(
            parley::style::FontStack::Source(std::borrow::Cow::Owned(family_name)),
        ));
        builder.push_default(parley::style::StyleProperty::FontSize(size_px));
        builder.push_default(parley::style::StyleProperty::Brush(brush));

        let mut layout: parley::Layout<LabelBrush> = builder.build(text);
        layout.break_all_lines(None);
        Ok(layout)
    }
}

/// Fill the layout's glyph runs into the render context.
///
/// Caller positions the text by setting the context transform first; glyph
/// coordinates are layout-relative.
pub(crate) fn fill_glyphs(
    ctx: &mut vello_cpu::RenderContext,
    font: &LabelFont,
    layout: &parley::Layout<LabelBrush>,
) {
    for line in layout.lines() {
        for item in line.items() {
            let parley::layout::PositionedLayoutItem::GlyphRun(run) = item else {
                continue;
            };
            let brush = run.style().brush;
            ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(
                brush.r, brush.g, brush.b, brush.a,
            ));
            let glyphs = run.glyphs().map(|g| vello_cpu::Glyph {
                id: g.id,
                x: g.x,
                y: g.y,
            });
            ctx.glyph_run(font.font_data())
                .font_size(run.run().font_size())
                .fill_glyphs(glyphs);
        }
    }
}
