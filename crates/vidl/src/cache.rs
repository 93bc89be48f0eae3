//! Per-job working directory for downloaded segments.

use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Hex characters of the URL digest used for directory names and job ids.
const KEY_LEN: usize = 12;

/// Short stable identifier derived from a source URL.
pub fn cache_key(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    let mut key = hex::encode(digest);
    key.truncate(KEY_LEN);
    key
}

/// `<system temp>/vidl`
pub fn default_cache_root() -> PathBuf {
    std::env::temp_dir().join("vidl")
}

/// The job's own directory under `root`, named by [`cache_key`].
///
/// Cleanup removes only this directory, never `root` itself.
pub fn job_cache_dir(root: &Path, url: &str) -> PathBuf {
    root.join(cache_key(url))
}

/// Owns one job's cache directory and names the files inside it.
#[derive(Debug, Clone)]
pub struct CacheManager {
    dir: PathBuf,
}

impl CacheManager {
    /// Creates the directory if needed.
    pub async fn create(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        debug!(dir = %dir.display(), "Cache directory ready");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Deterministic file for the segment at `index`.
    pub fn segment_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("seg_{index:06}.ts"))
    }

    pub fn init_section_path(&self, id: usize) -> PathBuf {
        self.dir.join(format!("init_{id:03}.mp4"))
    }

    /// Removes the directory and everything in it.
    ///
    /// A directory that is already gone counts as cleaned.
    pub async fn cleanup(&self) -> io::Result<()> {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => {
                debug!(dir = %self.dir.display(), "Cache directory removed");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "Failed to remove cache directory");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_cache_key_is_stable_and_short() {
        let a = cache_key("https://example.com/a.m3u8");
        assert_eq!(a.len(), KEY_LEN);
        assert_eq!(a, cache_key("https://example.com/a.m3u8"));
        assert_ne!(a, cache_key("https://example.com/b.m3u8"));
        assert!(
            job_cache_dir(&default_cache_root(), "https://example.com/a.m3u8")
                .ends_with(format!("vidl/{a}"))
        );
    }

    #[tokio::test]
    async fn test_cleanup_leaves_root_contents_alone() {
        let root = tempdir().unwrap();
        let sentinel = root.path().join("notes.txt");
        tokio::fs::write(&sentinel, b"keep me").await.unwrap();

        let cache = CacheManager::create(job_cache_dir(root.path(), "https://example.com/a.m3u8"))
            .await
            .unwrap();
        tokio::fs::write(cache.segment_path(0), b"data").await.unwrap();
        cache.cleanup().await.unwrap();

        assert!(!cache.dir().exists());
        assert!(root.path().is_dir());
        assert_eq!(tokio::fs::read(&sentinel).await.unwrap(), b"keep me");
    }

    #[tokio::test]
    async fn test_segment_paths_and_cleanup() {
        let root = tempdir().unwrap();
        let cache = CacheManager::create(root.path().join("job")).await.unwrap();
        assert!(cache.dir().is_dir());
        assert!(cache.segment_path(42).ends_with("seg_000042.ts"));
        assert!(cache.init_section_path(1).ends_with("init_001.mp4"));

        tokio::fs::write(cache.segment_path(0), b"data").await.unwrap();
        cache.cleanup().await.unwrap();
        assert!(!cache.dir().exists());
        // Second cleanup is a no-op.
        cache.cleanup().await.unwrap();
    }
}
