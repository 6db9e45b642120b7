use crate::Result;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Local directory receiving synthesized WAV files.
///
/// File names start with a local timestamp (readable in a directory
/// listing) followed by a random suffix, so concurrent synthesis calls never
/// collide even within the same millisecond.
///
/// With a retention limit set, every write prunes the oldest `.wav` files in
/// the directory until at most that many remain. The file just written is
/// never pruned.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
    keep: Option<usize>,
}

impl ArtifactStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            keep: None,
        }
    }

    /// Keep at most `keep` artifacts on disk; `0` keeps everything
    pub fn with_retention(mut self, keep: usize) -> Self {
        self.keep = (keep > 0).then_some(keep);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path for the next artifact, e.g. `wav/20250101_120000_123_1a2b3c4d.wav`
    pub fn next_path(&self) -> PathBuf {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S_%3f");
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        self.dir.join(format!("{}_{}.wav", stamp, &suffix[..8]))
    }

    /// Write `bytes` to a fresh artifact file, creating the directory if needed
    pub async fn write(&self, bytes: &[u8]) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.next_path();
        tokio::fs::write(&path, bytes).await?;
        if let Some(keep) = self.keep {
            if let Err(e) = self.prune(keep, &path).await {
                warn!(target: "synthesis", dir = %self.dir.display(), error = %e, "Failed to prune old artifacts");
            }
        }
        Ok(path)
    }

    async fn prune(&self, keep: usize, latest: &Path) -> Result<()> {
        let mut older = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path != latest && path.extension().and_then(|e| e.to_str()) == Some("wav") {
                older.push(path);
            }
        }
        // Timestamped names sort oldest first.
        older.sort();
        let excess = (older.len() + 1).saturating_sub(keep);
        for path in older.into_iter().take(excess) {
            debug!(target: "synthesis", path = %path.display(), "Removing old artifact");
            tokio::fs::remove_file(&path).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_unique() {
        let store = ArtifactStore::new("wav");
        let a = store.next_path();
        let b = store.next_path();
        assert_ne!(a, b);
        assert_eq!(a.extension().and_then(|e| e.to_str()), Some("wav"));
        assert!(a.starts_with("wav"));
    }

    #[tokio::test]
    async fn test_write_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path().join("nested/wav"));
        let path = store.write(b"RIFF").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"RIFF");
    }

    #[tokio::test]
    async fn test_retention_keeps_newest() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "keep me").unwrap();
        let store = ArtifactStore::new(tmp.path()).with_retention(3);

        let mut written = Vec::new();
        for i in 0..6u8 {
            written.push(store.write(&[i]).await.unwrap());
        }

        let wavs: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("wav"))
            .collect();
        assert_eq!(wavs.len(), 3);
        assert!(written.last().unwrap().exists());
        assert!(tmp.path().join("notes.txt").exists());
    }

    #[tokio::test]
    async fn test_zero_retention_keeps_everything() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path()).with_retention(0);
        for _ in 0..4 {
            store.write(b"RIFF").await.unwrap();
        }
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 4);
    }
}
