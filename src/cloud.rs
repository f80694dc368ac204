//! The small key-value area favorites are mirrored to, shared by every
//! install of the same user.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use anyhow::Context;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

/// Gif id to when it was favorited (ms since epoch).
pub type CloudMap = BTreeMap<String, i64>;

pub trait CloudFavorites: Send + Sync {
    fn load(&self) -> BoxFuture<'_, anyhow::Result<CloudMap>>;
    fn store<'a>(&'a self, favorites: &'a CloudMap) -> BoxFuture<'a, anyhow::Result<()>>;
}

#[derive(Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    favorites: CloudMap,
}

/// Favorites in a JSON file, e.g. inside a synced folder.
pub struct FileCloud {
    path: PathBuf,
}

impl FileCloud {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CloudFavorites for FileCloud {
    fn load(&self) -> BoxFuture<'_, anyhow::Result<CloudMap>> {
        async move {
            let bytes = match tokio::fs::read(&self.path).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(CloudMap::new()),
                Err(e) => {
                    return Err(anyhow::Error::new(e).context(format!("reading {}", self.path.display())));
                }
            };
            let doc: Document = serde_json::from_slice(&bytes)
                .with_context(|| format!("parsing {}", self.path.display()))?;
            Ok(doc.favorites)
        }
        .boxed()
    }

    fn store<'a>(&'a self, favorites: &'a CloudMap) -> BoxFuture<'a, anyhow::Result<()>> {
        async move {
            if let Some(parent) = self.path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let doc = Document {
                favorites: favorites.clone(),
            };
            let tmp = self.path.with_extension("json.tmp");
            tokio::fs::write(&tmp, serde_json::to_vec_pretty(&doc)?).await?;
            tokio::fs::rename(&tmp, &self.path)
                .await
                .with_context(|| format!("writing {}", self.path.display()))?;
            Ok(())
        }
        .boxed()
    }
}

/// In-memory favorites that can be taken offline.
#[derive(Default)]
pub struct MemoryCloud {
    favorites: Mutex<CloudMap>,
    offline: AtomicBool,
}

impl MemoryCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_favorites(favorites: CloudMap) -> Self {
        Self {
            favorites: Mutex::new(favorites),
            offline: AtomicBool::new(false),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> CloudMap {
        self.favorites
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn check_online(&self) -> anyhow::Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            anyhow::bail!("cloud storage is offline");
        }
        Ok(())
    }
}

impl CloudFavorites for MemoryCloud {
    fn load(&self) -> BoxFuture<'_, anyhow::Result<CloudMap>> {
        async move {
            self.check_online()?;
            Ok(self.snapshot())
        }
        .boxed()
    }

    fn store<'a>(&'a self, favorites: &'a CloudMap) -> BoxFuture<'a, anyhow::Result<()>> {
        async move {
            self.check_online()?;
            *self.favorites.lock().unwrap_or_else(PoisonError::into_inner) = favorites.clone();
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_cloud_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let cloud = FileCloud::new(dir.path().join("sync/favorites.json"));
        assert!(cloud.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_cloud_roundtrip() {
        let dir = TempDir::new().unwrap();
        let cloud = FileCloud::new(dir.path().join("sync/favorites.json"));
        let favorites = CloudMap::from([("g-1".to_string(), 10), ("r-t3_a".to_string(), 20)]);
        cloud.store(&favorites).await.unwrap();

        assert_eq!(cloud.load().await.unwrap(), favorites);
        let text = std::fs::read_to_string(cloud.path()).unwrap();
        assert!(text.contains("\"favorites\""));
    }

    #[tokio::test]
    async fn test_file_cloud_corrupt_file_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("favorites.json");
        std::fs::write(&path, "nope").unwrap();
        assert!(FileCloud::new(path).load().await.is_err());
    }

    #[tokio::test]
    async fn test_memory_cloud_offline() {
        let cloud = MemoryCloud::with_favorites(CloudMap::from([("g-1".to_string(), 1)]));
        cloud.set_offline(true);
        assert!(cloud.load().await.is_err());
        assert!(cloud.store(&CloudMap::new()).await.is_err());
        cloud.set_offline(false);
        assert_eq!(cloud.load().await.unwrap().len(), 1);
    }
}
