#![forbid(unsafe_code)]

pub mod device;
pub mod error;
pub mod garment;
pub mod overlay;
pub mod pipeline;
pub mod raster;
pub mod store;
pub mod text;

pub use device::DeviceInfo;
pub use error::{FitroomError, FitroomResult};
pub use garment::{GarmentDescriptor, GarmentResolver, parse_hex_color};
pub use overlay::{Clock, Compositor, OverlayCompositor, SystemClock};
pub use pipeline::{ALLOWED_EXTENSIONS, TryOnPipeline, TryOnRequest, TryOnResult, UploadedAsset};
pub use raster::{JPEG_QUALITY, Raster};
pub use store::{AssetStore, ResultId, StagedUpload, sanitize_filename};
pub use text::{LabelBrush, LabelFont, TextLayoutEngine};
