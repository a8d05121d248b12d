//! Durable registry mapping sequential piece ids to deal metadata.
//!
//! The whole index lives in memory behind one reader/writer lock and is the
//! source of truth while the process runs. Every mutation rewrites the JSON
//! snapshot at `<root>/index` through a temp file and rename, and rolls the
//! in-memory change back if persistence fails, so memory and disk never
//! diverge.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::deal::PieceDealInfo;
use crate::error::StoreError;

/// Snapshot file name under the store root.
pub const INDEX_FILE: &str = "index";
const INDEX_TMP: &str = "index.tmp";

/// Blob-completion state of a record. Records are visible immediately after
/// allocation but retrievable only once their payload is fully on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PieceState {
    Pending,
    Ready,
}

/// One allocated piece. The deal metadata is immutable once recorded; only
/// `state` transitions, once, from `Pending` to `Ready`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PieceRecord {
    pub deal: PieceDealInfo,
    pub state: PieceState,
}

/// The serialized structure inside of the index file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Index {
    n: u64,
    #[serde(default)]
    pieces: HashMap<u64, PieceRecord>,
}

/// Counts reported by [`IndexStore::summary`].
#[derive(Debug, Clone, Copy)]
pub struct IndexSummary {
    pub next_id: u64,
    pub ready: u64,
    pub pending: u64,
}

/// Owner of the piece registry and its on-disk snapshot.
#[derive(Debug)]
pub struct IndexStore {
    path: PathBuf,
    tmp_path: PathBuf,
    inner: RwLock<Index>,
}

impl IndexStore {
    /// Loads the snapshot under `root`, or initializes an empty index and
    /// writes the first snapshot. An unreadable or unparseable snapshot, or
    /// one whose counter does not cover every present id, is fatal.
    pub async fn open<P: AsRef<Path>>(root: P) -> Result<Self, StoreError> {
        let root = root.as_ref();
        tokio::fs::create_dir_all(root).await?;

        let path = root.join(INDEX_FILE);
        let tmp_path = root.join(INDEX_TMP);

        let index = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let index: Index = serde_json::from_slice(&bytes)
                    .map_err(|e| StoreError::CorruptIndex(format!("unparseable snapshot: {e}")))?;
                if let Some(max) = index.pieces.keys().max() {
                    if index.n <= *max {
                        return Err(StoreError::CorruptIndex(format!(
                            "counter {} does not cover highest id {}",
                            index.n, max
                        )));
                    }
                }
                info!(
                    path = %path.display(),
                    pieces = index.pieces.len(),
                    next_id = index.n,
                    "Loaded piece index"
                );
                index
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let index = Index::default();
                write_snapshot(&path, &tmp_path, &index).await?;
                info!(path = %path.display(), "Initialized empty piece index");
                index
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            tmp_path,
            inner: RwLock::new(index),
        })
    }

    /// Assigns the next id to `deal` and persists the snapshot, all under the
    /// exclusive lock. The record starts out `Pending`. If the snapshot write
    /// fails the allocation is rolled back and the id is never handed out.
    pub async fn allocate(&self, deal: PieceDealInfo) -> Result<u64, StoreError> {
        let mut index = self.inner.write().await;

        let id = index.n;
        index.n += 1;
        index.pieces.insert(
            id,
            PieceRecord {
                deal,
                state: PieceState::Pending,
            },
        );

        if let Err(e) = write_snapshot(&self.path, &self.tmp_path, &index).await {
            index.pieces.remove(&id);
            index.n = id;
            return Err(e);
        }

        debug!(id, "Allocated piece");
        Ok(id)
    }

    /// Marks a record retrievable once its payload write has completed.
    pub async fn mark_ready(&self, id: u64) -> Result<(), StoreError> {
        let mut index = self.inner.write().await;

        let previous = {
            let record = index
                .pieces
                .get_mut(&id)
                .ok_or(StoreError::UnknownPiece(id))?;
            let previous = record.state;
            record.state = PieceState::Ready;
            previous
        };

        if let Err(e) = write_snapshot(&self.path, &self.tmp_path, &index).await {
            if let Some(record) = index.pieces.get_mut(&id) {
                record.state = previous;
            }
            return Err(e);
        }

        debug!(id, "Piece ready");
        Ok(())
    }

    pub async fn lookup(&self, id: u64) -> Option<PieceRecord> {
        self.inner.read().await.pieces.get(&id).cloned()
    }

    /// Current allocation counter, for summary and status reporting.
    pub async fn count(&self) -> u64 {
        self.inner.read().await.n
    }

    pub async fn summary(&self) -> IndexSummary {
        let index = self.inner.read().await;
        let ready = index
            .pieces
            .values()
            .filter(|r| r.state == PieceState::Ready)
            .count() as u64;
        IndexSummary {
            next_id: index.n,
            ready,
            pending: index.pieces.len() as u64 - ready,
        }
    }

    /// Persists the current snapshot; called once at shutdown.
    pub async fn flush(&self) -> Result<(), StoreError> {
        let index = self.inner.read().await;
        write_snapshot(&self.path, &self.tmp_path, &index).await
    }
}

async fn write_snapshot(path: &Path, tmp_path: &Path, index: &Index) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec(index)?;
    tokio::fs::write(tmp_path, &bytes).await?;
    tokio::fs::rename(tmp_path, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deal::test_deal;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn sequential_allocations_are_dense() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::open(dir.path()).await.unwrap();

        for expected in 0..5u64 {
            let id = store.allocate(test_deal(128)).await.unwrap();
            assert_eq!(id, expected);
        }
        assert_eq!(store.count().await, 5);
    }

    #[tokio::test]
    async fn concurrent_allocations_never_collide() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(IndexStore::open(dir.path()).await.unwrap());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(
                async move { store.allocate(test_deal(128)).await },
            ));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap());
        }
        ids.sort_unstable();
        assert_eq!(ids, (0..16).collect::<Vec<_>>());
        assert_eq!(store.count().await, 16);
    }

    #[tokio::test]
    async fn metadata_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let deal = test_deal(256);

        let id = {
            let store = IndexStore::open(dir.path()).await.unwrap();
            let id = store.allocate(deal.clone()).await.unwrap();
            store.mark_ready(id).await.unwrap();
            id
        };

        let store = IndexStore::open(dir.path()).await.unwrap();
        let record = store.lookup(id).await.unwrap();
        assert_eq!(record.deal, deal);
        assert_eq!(record.state, PieceState::Ready);
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn pending_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = IndexStore::open(dir.path()).await.unwrap();
            store.allocate(test_deal(128)).await.unwrap();
        }

        let store = IndexStore::open(dir.path()).await.unwrap();
        let record = store.lookup(0).await.unwrap();
        assert_eq!(record.state, PieceState::Pending);

        let summary = store.summary().await;
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.ready, 0);
    }

    #[tokio::test]
    async fn stale_counter_fails_to_open() {
        let dir = TempDir::new().unwrap();
        let mut pieces = HashMap::new();
        pieces.insert(
            3u64,
            PieceRecord {
                deal: test_deal(128),
                state: PieceState::Ready,
            },
        );
        let bad = Index { n: 2, pieces };
        std::fs::write(
            dir.path().join(INDEX_FILE),
            serde_json::to_vec(&bad).unwrap(),
        )
        .unwrap();

        let err = IndexStore::open(dir.path()).await.unwrap_err();
        assert!(matches!(err, StoreError::CorruptIndex(_)));
    }

    #[tokio::test]
    async fn garbage_snapshot_fails_to_open() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(INDEX_FILE), b"not json").unwrap();

        let err = IndexStore::open(dir.path()).await.unwrap_err();
        assert!(matches!(err, StoreError::CorruptIndex(_)));
    }

    #[tokio::test]
    async fn mark_ready_unknown_id_fails() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::open(dir.path()).await.unwrap();

        let err = store.mark_ready(9).await.unwrap_err();
        assert!(matches!(err, StoreError::UnknownPiece(9)));
    }
}
