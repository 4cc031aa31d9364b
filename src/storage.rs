//! Object storage behind a narrow `put` interface.
//!
//! Production deployments bind a bucket-shaped directory served by the CDN;
//! writes are atomic (temp file + rename) and each object carries a sidecar
//! with the headers the front-end should serve it with.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
        cache_control: &str,
    ) -> Result<()>;
}

pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let traversal = relative
            .components()
            .any(|part| !matches!(part, Component::Normal(_)));
        if key.is_empty() || traversal {
            anyhow::bail!("invalid object key: {key}");
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
        cache_control: &str,
    ) -> Result<()> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("create object dir")?;
        }
        write_atomic(&path, bytes).await.context("write object")?;
        let meta = format!("content-type: {content_type}\ncache-control: {cache_control}\n");
        let meta_path = path.with_extension(match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) => format!("{ext}.meta"),
            None => "meta".to_string(),
        });
        write_atomic(&meta_path, meta.as_bytes())
            .await
            .context("write object metadata")?;
        debug!(key = %key, bytes = bytes.len(), "stored object");
        Ok(())
    }
}

/// Stage into a sibling temp file, then rename over the target. Readers
/// never observe a partially written object.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or(0);
    let staging_path = path.with_extension(format!("stage.{nonce}"));
    let staged = async {
        tokio::fs::write(&staging_path, bytes).await?;
        tokio::fs::rename(&staging_path, path).await
    }
    .await;
    if staged.is_err() {
        let _ = tokio::fs::remove_file(&staging_path).await;
    }
    staged.map_err(Into::into)
}
