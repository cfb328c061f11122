use super::document::DocumentId;
use anyhow::{Context, Result};
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;

/// Extraction artifacts keyed by document id. Writes replace the previous artifact
/// atomically, so concurrent or repeated extractions of one document never leave a
/// partial file behind.
#[derive(Debug)]
pub struct ArtifactStore {
    dir: PathBuf,
    next_tmp: AtomicU64,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            next_tmp: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, document_id: &DocumentId) -> PathBuf {
        self.dir.join(format!("{}.json", document_id.artifact_key()))
    }

    pub async fn write(&self, document_id: &DocumentId, contents: &[u8]) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create artifact dir {}", self.dir.display()))?;

        let path = self.path_for(document_id);
        let tmp = self.dir.join(format!(
            ".{}.{}.{}.tmp",
            &document_id.digest()[..16],
            std::process::id(),
            self.next_tmp.fetch_add(1, Ordering::Relaxed)
        ));

        fs::write(&tmp, contents)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        if let Err(err) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(err).with_context(|| format!("failed to publish {}", path.display()));
        }
        Ok(path)
    }

    pub async fn read(&self, document_id: &DocumentId) -> Result<Option<Bytes>> {
        let path = self.path_for(document_id);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
        }
    }
}
