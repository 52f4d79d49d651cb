//! # Artifact Storage
//!
//! Optional on-disk copies of session audio, kept for debugging recognition
//! problems. Storage is strictly best-effort: the pipeline logs failures and
//! carries on.
//!
//! ## File Naming:
//! - `recording_<ts>_<conn>_<session>.webm`: raw ingress bytes
//! - `recording_<ts>_<conn>_<session>.wav`: decoded canonical waveform
//! - `raw_fallback_<ts>_<conn>_<session>.webm`: ingress that no strategy could decode
//! - `response_<ts>_<conn>_<session>.wav`: synthesized reply

use anyhow::Context;
use async_trait::async_trait;
use std::path::PathBuf;

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persist `bytes` under `name`, returning where they ended up.
    async fn save(&self, name: &str, bytes: &[u8]) -> anyhow::Result<PathBuf>;
}

/// Writes artifacts into a single directory, creating it on first use.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    dir: PathBuf,
}

impl FsArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn save(&self, name: &str, bytes: &[u8]) -> anyhow::Result<PathBuf> {
        if name.is_empty() || name.contains(|c: char| c == '/' || c == '\\') || name.starts_with('.') {
            anyhow::bail!("invalid artifact name: {:?}", name);
        }

        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating {}", self.dir.display()))?;

        let path = self.dir.join(name);
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("writing {}", path.display()))?;

        tracing::debug!(path = %path.display(), bytes = bytes.len(), "artifact saved");
        Ok(path)
    }
}

/// Used when storage is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopArtifactStore;

#[async_trait]
impl ArtifactStore for NoopArtifactStore {
    async fn save(&self, name: &str, _bytes: &[u8]) -> anyhow::Result<PathBuf> {
        Ok(PathBuf::from(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fs_store_creates_directory_and_writes() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(tmp.path().join("recordings"));

        let path = store.save("recording_1.webm", b"\x1a\x45\xdf\xa3").await.unwrap();

        assert_eq!(path, tmp.path().join("recordings").join("recording_1.webm"));
        assert_eq!(std::fs::read(&path).unwrap(), b"\x1a\x45\xdf\xa3");
    }

    #[tokio::test]
    async fn test_fs_store_rejects_path_names() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(tmp.path());

        assert!(store.save("../escape.wav", b"x").await.is_err());
        assert!(store.save("", b"x").await.is_err());
    }

    #[tokio::test]
    async fn test_noop_store_writes_nothing() {
        let path = NoopArtifactStore.save("response_1.wav", b"x").await.unwrap();
        assert!(!path.exists());
    }
}
