use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::device::DeviceInfo;
use crate::error::FitroomResult;
use crate::raster::Raster;
use crate::text::{self, LabelBrush, LabelFont, TextLayoutEngine};

/// Height of the banner band drawn across the top of the result.
pub const BANNER_HEIGHT: u32 = 100;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const BANNER_LABEL_SIZE_PX: f32 = 36.0;
const TIMESTAMP_SIZE_PX: f32 = 20.0;
const BANNER_FILL: [u8; 4] = [255, 0, 0, 180];

/// Time source for the generation stamp. Injected so tests can pin the
/// output bytes.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// The synthesis stage. The overlay renderer below is a stand-in; a
/// model-backed implementation slots in here without touching validation,
/// staging, or the orchestrator.
pub trait Compositor: Send + Sync {
    fn synthesize(
        &self,
        person: &Raster,
        garment: &Raster,
        garment_kind: &str,
    ) -> FitroomResult<Raster>;
}

/// Reference compositor: copies the person raster and annotates it with a
/// banner band, the garment kind, and a generation timestamp.
pub struct OverlayCompositor {
    device: DeviceInfo,
    font: Arc<LabelFont>,
    clock: Arc<dyn Clock>,
}

impl OverlayCompositor {
    pub fn new(device: DeviceInfo, font: Arc<LabelFont>, clock: Arc<dyn Clock>) -> Self {
        Self {
            device,
            font,
            clock,
        }
    }
}

impl Compositor for OverlayCompositor {
    fn synthesize(
        &self,
        person: &Raster,
        _garment: &Raster,
        garment_kind: &str,
    ) -> FitroomResult<Raster> {
        tracing::info!(
            device = %self.device,
            kind = garment_kind,
            width = person.width(),
            height = person.height(),
            "synthesizing try-on overlay"
        );

        let (w, h) = (person.width(), person.height());
        let pixmap = person.to_pixmap()?;
        let (w16, h16) = (pixmap.width(), pixmap.height());
        let paint = vello_cpu::Image {
            image: vello_cpu::ImageSource::Pixmap(Arc::new(pixmap)),
            sampler: vello_cpu::peniko::ImageSampler::default(),
        };
        let mut ctx = vello_cpu::RenderContext::new(w16, h16);

        ctx.set_transform(vello_cpu::kurbo::Affine::IDENTITY);
        ctx.set_paint(paint);
        ctx.fill_rect(&vello_cpu::kurbo::Rect::new(
            0.0,
            0.0,
            f64::from(w),
            f64::from(h),
        ));

        let [br, bg, bb, ba] = BANNER_FILL;
        ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(br, bg, bb, ba));
        ctx.fill_rect(&vello_cpu::kurbo::Rect::new(
            0.0,
            0.0,
            f64::from(w),
            f64::from(BANNER_HEIGHT),
        ));

        let mut engine = TextLayoutEngine::new();

        let label = format!("TRY-ON: {}", garment_kind.to_uppercase());
        let layout = engine.layout_plain(&label, &self.font, BANNER_LABEL_SIZE_PX, LabelBrush::WHITE)?;
        let x = (f64::from(w) - f64::from(layout.width())) / 2.0;
        let y = (f64::from(BANNER_HEIGHT) - f64::from(layout.height())) / 2.0;
        ctx.set_transform(vello_cpu::kurbo::Affine::translate((x.max(0.0), y.max(0.0))));
        text::fill_glyphs(&mut ctx, &self.font, &layout);

        let stamp = format!("Generated {}", self.clock.now().format(TIMESTAMP_FORMAT));
        let stamp_layout = engine.layout_plain(
            &stamp,
            &self.font,
            TIMESTAMP_SIZE_PX,
            LabelBrush::rgb(255, 0, 0),
        )?;
        ctx.set_transform(vello_cpu::kurbo::Affine::translate((
            10.0,
            f64::from(BANNER_HEIGHT) + 10.0,
        )));
        text::fill_glyphs(&mut ctx, &self.font, &stamp_layout);

        let mut out = vello_cpu::Pixmap::new(w16, h16);
        ctx.flush();
        ctx.render_to_pixmap(&mut out);
        Raster::from_pixmap(&out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct FixedClock;

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 45).unwrap()
        }
    }

    fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Raster {
        let mut rgb8 = Vec::with_capacity((width * height * 3) as usize);
        for _ in 0..width * height {
            rgb8.extend_from_slice(&rgb);
        }
        Raster::from_rgb8(width, height, rgb8).unwrap()
    }

    fn compositor(font: LabelFont) -> OverlayCompositor {
        OverlayCompositor::new(DeviceInfo::detect(), Arc::new(font), Arc::new(FixedClock))
    }

    #[test]
    fn output_matches_person_dimensions() {
        let Ok(font) = LabelFont::discover() else {
            eprintln!("skipping: no system fonts available");
            return;
        };
        let person = solid(320, 480, [40, 80, 120]);
        let garment = solid(16, 16, [200, 0, 0]);
        let result = compositor(font).synthesize(&person, &garment, "tshirt").unwrap();
        assert_eq!(result.width(), 320);
        assert_eq!(result.height(), 480);
    }

    #[test]
    fn banner_band_covers_the_top() {
        let Ok(font) = LabelFont::discover() else {
            eprintln!("skipping: no system fonts available");
            return;
        };
        let person = solid(300, 400, [0, 255, 0]);
        let garment = solid(16, 16, [1, 2, 3]);
        let result = compositor(font).synthesize(&person, &garment, "dress").unwrap();

        // Banner edge pixel: translucent red over green.
        let top = result.pixel(2, 2);
        assert!(top[0] > 150, "banner red missing: {top:?}");
        assert!(top[1] < 120, "banner did not cover base: {top:?}");
        // Below the stamp line the person shows through untouched.
        let below = result.pixel(150, 390);
        assert_eq!(below, [0, 255, 0]);
    }

    #[test]
    fn fixed_clock_makes_output_byte_stable() {
        let Ok(font) = LabelFont::discover() else {
            eprintln!("skipping: no system fonts available");
            return;
        };
        let person = solid(200, 200, [90, 90, 90]);
        let garment = solid(8, 8, [0, 0, 0]);
        let comp = compositor(font);
        let a = comp.synthesize(&person, &garment, "polo").unwrap();
        let b = comp.synthesize(&person, &garment, "polo").unwrap();
        assert_eq!(a, b);
    }
}
