//! Checkpoints on the checkpoint volume, one JSON document per shard at
//! `{volume}/{stream}/{shard}.json`.

use super::store::{check_monotonic, Checkpoint, CheckpointFuture, CheckpointStore, SaveDecision};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointDocument {
    version: u32,
    stream: String,
    shard_id: String,
    sequence: u64,
    written_at_ms: u64,
}

#[derive(Debug)]
pub struct FileCheckpointStore {
    volume: PathBuf,
    stream: String,
    write_lock: Mutex<()>,
}

impl FileCheckpointStore {
    pub fn new(volume: impl Into<PathBuf>, stream: impl Into<String>) -> Self {
        Self {
            volume: volume.into(),
            stream: stream.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path_for(&self, shard_id: &str) -> Result<PathBuf> {
        if shard_id.is_empty()
            || shard_id.starts_with('.')
            || shard_id.contains(['/', '\\'])
        {
            bail!("shard id {shard_id:?} cannot be used as a checkpoint file name");
        }
        Ok(self
            .volume
            .join(&self.stream)
            .join(format!("{shard_id}.json")))
    }

    async fn read(&self, shard_id: &str) -> Result<Option<Checkpoint>> {
        let path = self.path_for(shard_id)?;
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read checkpoint {}", path.display()))
            }
        };

        let document: CheckpointDocument = serde_json::from_slice(&bytes)
            .with_context(|| format!("checkpoint {} is not valid JSON", path.display()))?;

        if document.version != FORMAT_VERSION {
            bail!(
                "checkpoint {} has unsupported version {}",
                path.display(),
                document.version
            );
        }
        if document.stream != self.stream || document.shard_id != shard_id {
            bail!(
                "checkpoint {} belongs to {}/{}, expected {}/{}",
                path.display(),
                document.stream,
                document.shard_id,
                self.stream,
                shard_id
            );
        }

        Ok(Some(Checkpoint {
            shard_id: document.shard_id,
            sequence: document.sequence,
            written_at_ms: document.written_at_ms,
        }))
    }

    async fn write(&self, checkpoint: &Checkpoint) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let stored = self.read(&checkpoint.shard_id).await?;
        if check_monotonic(stored.as_ref(), checkpoint)? == SaveDecision::Unchanged {
            return Ok(());
        }

        let path = self.path_for(&checkpoint.shard_id)?;
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.volume.clone());
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create checkpoint directory {}", dir.display()))?;

        let document = CheckpointDocument {
            version: FORMAT_VERSION,
            stream: self.stream.clone(),
            shard_id: checkpoint.shard_id.clone(),
            sequence: checkpoint.sequence,
            written_at_ms: checkpoint.written_at_ms,
        };
        let body = serde_json::to_vec_pretty(&document)?;

        let tmp = dir.join(format!(".{}.json.tmp", checkpoint.shard_id));
        let mut file = fs::File::create(&tmp)
            .await
            .with_context(|| format!("failed to create {}", tmp.display()))?;
        file.write_all(&body).await?;
        file.sync_all()
            .await
            .with_context(|| format!("failed to fsync {}", tmp.display()))?;
        drop(file);

        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("failed to move checkpoint into {}", path.display()))?;
        sync_dir(&dir).await?;

        tracing::debug!(
            shard = %checkpoint.shard_id,
            sequence = checkpoint.sequence,
            path = %path.display(),
            "checkpoint written"
        );
        Ok(())
    }
}

#[cfg(unix)]
async fn sync_dir(dir: &Path) -> Result<()> {
    let handle = fs::File::open(dir)
        .await
        .with_context(|| format!("failed to open {}", dir.display()))?;
    handle
        .sync_all()
        .await
        .with_context(|| format!("failed to fsync {}", dir.display()))
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

impl CheckpointStore for FileCheckpointStore {
    fn load<'a>(&'a self, shard_id: &'a str) -> CheckpointFuture<'a, Option<Checkpoint>> {
        Box::pin(self.read(shard_id))
    }

    fn save<'a>(&'a self, checkpoint: &'a Checkpoint) -> CheckpointFuture<'a, ()> {
        Box::pin(self.write(checkpoint))
    }
}
