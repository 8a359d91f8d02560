use std::path::{Path, PathBuf};

use anyhow::Context;
use uuid::Uuid;

use crate::error::{FitroomError, FitroomResult};

/// Opaque token addressing one persisted result. 128-bit random, unique per
/// synthesis, never reused.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResultId(String);

impl ResultId {
    fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResultId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Staged copy of one uploaded file. Removes its file when dropped, so
/// transient uploads disappear on every exit path, including unwinds and
/// interrupted requests.
#[derive(Debug)]
pub struct StagedUpload {
    path: PathBuf,
}

impl StagedUpload {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedUpload {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove staged upload");
            }
        }
    }
}

/// Durable-enough storage for one data root: `uploads/` holds transient
/// staged inputs, `results/` holds the persisted JPEG outputs.
///
/// Names embed a fresh uuid, so concurrent requests never target the same
/// key and no cross-key coordination is needed.
#[derive(Clone, Debug)]
pub struct AssetStore {
    uploads_dir: PathBuf,
    results_dir: PathBuf,
}

impl AssetStore {
    pub fn open(root: impl Into<PathBuf>) -> FitroomResult<Self> {
        let root = root.into();
        let uploads_dir = root.join("uploads");
        let results_dir = root.join("results");
        std::fs::create_dir_all(&uploads_dir)
            .with_context(|| format!("create uploads dir '{}'", uploads_dir.display()))?;
        std::fs::create_dir_all(&results_dir)
            .with_context(|| format!("create results dir '{}'", results_dir.display()))?;
        Ok(Self {
            uploads_dir,
            results_dir,
        })
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }

    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    /// Write uploaded bytes under a unique staged name. The handle deletes
    /// the file on drop.
    pub fn stage(&self, bytes: &[u8], suggested_name: &str) -> FitroomResult<StagedUpload> {
        let name = format!(
            "{}_{}",
            Uuid::new_v4().simple(),
            sanitize_filename(suggested_name)
        );
        let path = self.uploads_dir.join(name);
        std::fs::write(&path, bytes)
            .with_context(|| format!("stage upload to '{}'", path.display()))?;
        Ok(StagedUpload { path })
    }

    /// Drop a staged upload early. Equivalent to letting the handle fall out
    /// of scope; exists to make the cleanup point explicit.
    pub fn delete(&self, staged: StagedUpload) {
        drop(staged);
    }

    /// Persist result bytes under a fresh identifier. The write goes through
    /// a temp name plus rename, so a partially written result is never
    /// visible under its key.
    pub fn persist_result(&self, bytes: &[u8]) -> FitroomResult<ResultId> {
        let id = ResultId::generate();
        let tmp = self.results_dir.join(format!(".tmp_{id}"));
        let path = self.results_dir.join(format!("{id}.jpg"));
        std::fs::write(&tmp, bytes)
            .with_context(|| format!("write result to '{}'", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("publish result to '{}'", path.display()))?;
        Ok(id)
    }

    /// Fetch persisted result bytes. Unknown or malformed identifiers report
    /// [`FitroomError::NotFound`]; they never panic or touch paths outside
    /// the results namespace.
    pub fn fetch(&self, id: &str) -> FitroomResult<Vec<u8>> {
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(FitroomError::not_found(format!("result '{id}' not found")));
        }
        let path = self.results_dir.join(format!("{id}.jpg"));
        match std::fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FitroomError::not_found(format!("result '{id}' not found")))
            }
            Err(e) => Err(FitroomError::Other(
                anyhow::Error::new(e).context(format!("read result '{id}'")),
            )),
        }
    }
}

/// Reduce a client-declared filename to a single safe path component:
/// directory parts are stripped and anything outside `[A-Za-z0-9._-]` is
/// replaced, so a staged name can never traverse out of the uploads dir.
pub fn sanitize_filename(name: &str) -> String {
    let leaf = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    let cleaned: String = leaf
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('.');
    if trimmed.is_empty() {
        "upload".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(name: &str) -> (AssetStore, PathBuf) {
        let root = std::env::temp_dir().join(format!(
            "fitroom_{name}_{}_{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        (AssetStore::open(&root).unwrap(), root)
    }

    #[test]
    fn stage_writes_then_drop_removes() {
        let (store, root) = temp_store("stage_drop");
        let staged = store.stage(b"bytes", "person.png").unwrap();
        assert!(staged.path().exists());
        assert_eq!(std::fs::read(staged.path()).unwrap(), b"bytes");
        let path = staged.path().to_path_buf();
        drop(staged);
        assert!(!path.exists());
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn delete_removes_staged_file() {
        let (store, root) = temp_store("delete");
        let staged = store.stage(b"bytes", "person.png").unwrap();
        let path = staged.path().to_path_buf();
        store.delete(staged);
        assert!(!path.exists());
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn persist_and_fetch_round_trip() {
        let (store, root) = temp_store("persist_fetch");
        let id = store.persist_result(b"jpeg-bytes").unwrap();
        assert_eq!(store.fetch(id.as_str()).unwrap(), b"jpeg-bytes");
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn fetch_unknown_id_is_not_found() {
        let (store, root) = temp_store("fetch_unknown");
        let err = store.fetch("deadbeefdeadbeefdeadbeefdeadbeef").unwrap_err();
        assert!(matches!(err, FitroomError::NotFound(_)));
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn fetch_rejects_traversal_shaped_ids() {
        let (store, root) = temp_store("fetch_traversal");
        for bad in ["../etc/passwd", "a/b", "..", "x.jpg", ""] {
            let err = store.fetch(bad).unwrap_err();
            assert!(matches!(err, FitroomError::NotFound(_)), "id {bad:?}");
        }
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn sanitize_strips_directories_and_odd_characters() {
        assert_eq!(sanitize_filename("person.png"), "person.png");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("a b?.png"), "a_b_.png");
        assert_eq!(sanitize_filename("..."), "upload");
        assert_eq!(sanitize_filename(""), "upload");
        assert_eq!(sanitize_filename("C:\\photos\\me.jpg"), "me.jpg");
    }

    #[test]
    fn staged_names_are_unique_for_identical_inputs() {
        let (store, root) = temp_store("unique_names");
        let a = store.stage(b"same", "same.png").unwrap();
        let b = store.stage(b"same", "same.png").unwrap();
        assert_ne!(a.path(), b.path());
        std::fs::remove_dir_all(&root).ok();
    }
}
