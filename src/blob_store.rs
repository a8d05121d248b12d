//! Payload storage, one file (or directory) per piece id.
//!
//! Paths are derived deterministically from the id (`<root>/<id>.piece`).
//! Payloads are written once and never rewritten; a directory at the piece
//! path is served as a tar archive on retrieval instead of as a file.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tokio::fs::{self, File, OpenOptions};
use tracing::{debug, info};

use crate::error::StoreError;

const PIECE_EXT: &str = "piece";

/// Shape of the stored object behind an id.
#[derive(Debug, Clone)]
pub struct BlobStat {
    pub is_dir: bool,
    pub size: u64,
    pub modified: SystemTime,
}

/// File-per-id store for raw piece payloads.
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub async fn new<P: AsRef<Path>>(root: P) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        info!(path = %root.display(), "Initialized blob store");
        Ok(Self { root })
    }

    /// Deterministic path for a piece id.
    pub fn path(&self, id: u64) -> PathBuf {
        self.root.join(format!("{id}.{PIECE_EXT}"))
    }

    /// Opens the payload file for a freshly allocated id. Ids are never
    /// reused, so an existing file is an error rather than overwritten.
    pub async fn create(&self, id: u64) -> Result<File, StoreError> {
        let path = self.path(id);
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => {
                debug!(id, path = %path.display(), "Created piece file");
                Ok(file)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(StoreError::PieceExists(id))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn stat(&self, id: u64) -> Result<BlobStat, StoreError> {
        let meta = match fs::metadata(self.path(id)).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::UnknownPiece(id))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(BlobStat {
            is_dir: meta.is_dir(),
            size: meta.len(),
            modified: meta.modified()?,
        })
    }

    /// Synchronous read handle for the padding transform, which runs on a
    /// blocking task.
    pub fn open_sync(&self, id: u64) -> Result<std::fs::File, StoreError> {
        match std::fs::File::open(self.path(id)) {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::UnknownPiece(id))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Path of a directory-backed piece; its contents are archived by the
    /// caller on retrieval.
    pub fn dir_path(&self, id: u64) -> Result<PathBuf, StoreError> {
        let path = self.path(id);
        if path.is_dir() {
            Ok(path)
        } else {
            Err(StoreError::UnknownPiece(id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn create_write_stat_read() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::new(dir.path()).await.unwrap();

        let mut file = store.create(0).await.unwrap();
        file.write_all(b"piece payload").await.unwrap();
        file.flush().await.unwrap();
        drop(file);

        let stat = store.stat(0).await.unwrap();
        assert!(!stat.is_dir);
        assert_eq!(stat.size, 13);

        let mut contents = Vec::new();
        store.open_sync(0).unwrap().read_to_end(&mut contents).unwrap();
        assert_eq!(contents, b"piece payload");
    }

    #[tokio::test]
    async fn ids_are_never_reused() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::new(dir.path()).await.unwrap();

        store.create(1).await.unwrap();
        let err = store.create(1).await.unwrap_err();
        assert!(matches!(err, StoreError::PieceExists(1)));
    }

    #[tokio::test]
    async fn missing_pieces_are_reported() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::new(dir.path()).await.unwrap();

        assert!(matches!(
            store.stat(42).await.unwrap_err(),
            StoreError::UnknownPiece(42)
        ));
        assert!(matches!(
            store.open_sync(42).unwrap_err(),
            StoreError::UnknownPiece(42)
        ));
        assert!(matches!(
            store.dir_path(42).unwrap_err(),
            StoreError::UnknownPiece(42)
        ));
    }

    #[tokio::test]
    async fn directories_are_detected() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::new(dir.path()).await.unwrap();

        std::fs::create_dir(store.path(5)).unwrap();
        std::fs::write(store.path(5).join("chunk"), b"data").unwrap();

        let stat = store.stat(5).await.unwrap();
        assert!(stat.is_dir);
        assert_eq!(store.dir_path(5).unwrap(), store.path(5));
    }
}
