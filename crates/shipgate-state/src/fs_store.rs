use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;

use crate::error::StorageError;
use crate::storage_traits::{ArtifactStore, ContentDigest, StorageResult};

/// Filesystem-backed artifact store with git-style 2-char sharding.
///
/// Layout: `<root>/objects/<first 2 hex chars>/<remaining hex chars>`
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    objects_dir: PathBuf,
}

impl FsArtifactStore {
    /// Create a store rooted at `root`. Creates `root/objects/` if needed.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let objects_dir = root.as_ref().join("objects");
        fs::create_dir_all(&objects_dir)?;
        Ok(Self { objects_dir })
    }

    fn object_path(&self, digest: &ContentDigest) -> PathBuf {
        let hex = digest.as_str();
        self.objects_dir.join(&hex[..2]).join(&hex[2..])
    }

    fn write_object(objects_dir: &Path, digest: &ContentDigest, data: &[u8]) -> StorageResult<()> {
        let hex = digest.as_str();
        let shard_dir = objects_dir.join(&hex[..2]);
        let path = shard_dir.join(&hex[2..]);

        if path.exists() {
            return Ok(());
        }
        fs::create_dir_all(&shard_dir)?;

        // Write to a temp file in the shard, then rename into place.
        let mut tmp = NamedTempFile::new_in(&shard_dir)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(&self, data: &[u8]) -> StorageResult<ContentDigest> {
        let digest = ContentDigest::from_bytes(data);
        let objects_dir = self.objects_dir.clone();
        let bytes = data.to_vec();
        let written = digest.clone();

        tokio::task::spawn_blocking(move || Self::write_object(&objects_dir, &written, &bytes))
            .await
            .map_err(|e| StorageError::Unavailable(format!("writer task failed: {e}")))??;

        tracing::debug!(digest = %digest.short(), "artifact stored");
        Ok(digest)
    }

    async fn get(&self, digest: &ContentDigest) -> StorageResult<Vec<u8>> {
        let path = self.object_path(digest);
        tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound {
                    digest: digest.as_str().to_string(),
                }
            } else {
                StorageError::Io(e)
            }
        })
    }

    async fn contains(&self, digest: &ContentDigest) -> StorageResult<bool> {
        let path = self.object_path(digest);
        Ok(tokio::fs::try_exists(&path).await?)
    }

    fn locate(&self, digest: &ContentDigest) -> String {
        self.object_path(digest).display().to_string()
    }
}
