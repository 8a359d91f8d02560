//! Request orchestration: validation, staging, decode, garment resolution,
//! synthesis, and result materialization for one try-on request.

use crate::error::{FitroomError, FitroomResult};
use crate::garment::{self, GarmentDescriptor, GarmentResolver};
use crate::overlay::Compositor;
use crate::raster::{self, JPEG_QUALITY};
use crate::store::{AssetStore, ResultId};

/// Extensions accepted for person and garment uploads.
pub const ALLOWED_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "gif"];

#[derive(Clone, Debug)]
/// Raw uploaded bytes plus the client-declared filename. Ephemeral; the
/// staged copy is removed when the request finishes.
pub struct UploadedAsset {
    pub bytes: Vec<u8>,
    pub filename: String,
}

impl UploadedAsset {
    fn extension(&self) -> Option<String> {
        let (_, ext) = self.filename.rsplit_once('.')?;
        Some(ext.to_ascii_lowercase())
    }

    fn has_allowed_extension(&self) -> bool {
        self.extension()
            .is_some_and(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
    }
}

#[derive(Clone, Debug)]
pub struct TryOnRequest {
    pub person: UploadedAsset,
    pub garment: Option<UploadedAsset>,
    pub descriptor: GarmentDescriptor,
}

#[derive(Clone, Debug)]
/// Durable handle to one synthesized image. The id → bytes mapping in the
/// asset store is the only state that outlives the request.
pub struct TryOnResult {
    pub id: ResultId,
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
}

/// Sequences one pipeline run per request. Stateless across requests apart
/// from the read-only collaborators it holds.
pub struct TryOnPipeline {
    store: AssetStore,
    resolver: GarmentResolver,
    compositor: Box<dyn Compositor>,
}

impl TryOnPipeline {
    pub fn new(
        store: AssetStore,
        resolver: GarmentResolver,
        compositor: Box<dyn Compositor>,
    ) -> Self {
        Self {
            store,
            resolver,
            compositor,
        }
    }

    pub fn store(&self) -> &AssetStore {
        &self.store
    }

    /// Run the full pipeline. Transient staged files are removed on every
    /// exit path; only a successful run leaves a result behind.
    #[tracing::instrument(skip_all, fields(kind = %request.descriptor.kind))]
    pub fn run(&self, request: &TryOnRequest) -> FitroomResult<TryOnResult> {
        validate(request)?;

        tracing::info!(
            name = %request.descriptor.name,
            person = %request.person.filename,
            "processing try-on request"
        );

        // Staged handles delete their files on drop, so cleanup holds even
        // when a later stage errors or the request is interrupted.
        let person_staged = self
            .store
            .stage(&request.person.bytes, &request.person.filename)?;
        let garment_staged = match &request.garment {
            Some(g) => Some(self.store.stage(&g.bytes, &g.filename)?),
            None => None,
        };

        let person_bytes = std::fs::read(person_staged.path()).map_err(|e| {
            FitroomError::processing(format!("staged person upload unreadable: {e}"))
        })?;
        let person = raster::decode(&person_bytes)?;

        let garment_bytes = match &garment_staged {
            Some(staged) => Some(std::fs::read(staged.path()).map_err(|e| {
                FitroomError::processing(format!("staged garment upload unreadable: {e}"))
            })?),
            None => None,
        };
        let garment = self
            .resolver
            .resolve(garment_bytes.as_deref(), &request.descriptor)?;

        let result = self
            .compositor
            .synthesize(&person, &garment, &request.descriptor.kind)
            .map_err(|e| {
                tracing::error!(error = %e, "try-on synthesis failed");
                FitroomError::processing("virtual try-on processing failed")
            })?;

        let encoded = raster::encode_jpeg(&result, JPEG_QUALITY)?;
        let id = self.store.persist_result(&encoded)?;
        tracing::info!(result = %id, "try-on request complete");

        Ok(TryOnResult {
            id,
            bytes: encoded,
            content_type: "image/jpeg",
        })
    }
}

/// All request validation happens here, before any file I/O.
fn validate(request: &TryOnRequest) -> FitroomResult<()> {
    if request.person.filename.is_empty() {
        return Err(FitroomError::validation("No person image selected"));
    }
    if !request.person.has_allowed_extension() {
        return Err(FitroomError::validation("Invalid file type"));
    }
    if let Some(garment) = &request.garment {
        if !garment.has_allowed_extension() {
            return Err(FitroomError::validation("Invalid clothing image file type"));
        }
    }
    garment::parse_hex_color(&request.descriptor.color)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(person_name: &str, color: &str) -> TryOnRequest {
        TryOnRequest {
            person: UploadedAsset {
                bytes: vec![1, 2, 3],
                filename: person_name.to_string(),
            },
            garment: None,
            descriptor: GarmentDescriptor {
                name: "Item".to_string(),
                kind: "tshirt".to_string(),
                color: color.to_string(),
                size: "M".to_string(),
            },
        }
    }

    #[test]
    fn validate_accepts_allowed_extensions() {
        for name in ["a.png", "b.jpg", "c.JPEG", "d.gif"] {
            assert!(validate(&request(name, "#336699")).is_ok(), "name {name:?}");
        }
    }

    #[test]
    fn validate_rejects_missing_or_bad_person_filename() {
        for name in ["", "noext", "a.bmp", "a.txt", "a.png.exe"] {
            let err = validate(&request(name, "#336699")).unwrap_err();
            assert!(matches!(err, FitroomError::Validation(_)), "name {name:?}");
        }
    }

    #[test]
    fn validate_rejects_malformed_color_before_io() {
        let err = validate(&request("a.png", "notacolor")).unwrap_err();
        assert!(matches!(err, FitroomError::Validation(_)));
    }

    #[test]
    fn validate_rejects_disallowed_garment_extension() {
        let mut req = request("a.png", "#336699");
        req.garment = Some(UploadedAsset {
            bytes: vec![0u8; 4],
            filename: "garment.bmp".to_string(),
        });
        let err = validate(&req).unwrap_err();
        assert!(matches!(err, FitroomError::Validation(_)));
    }
}
