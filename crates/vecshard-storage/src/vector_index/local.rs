//! In-process shard storage engine.
//!
//! A flat (exact, brute-force) vector store holding one shard's records. It
//! backs the shard HTTP server and is also usable directly as a
//! [`ShardClient`] for single-process deployments and tests.
//!
//! When opened with a path, every store is appended to a record log first and
//! the log is replayed on open, so the shard survives restarts.

use super::client::{ShardClient, ShardClientError, ShardResult};
use super::distributed::select_top_k;
use super::metric::DistanceMetric;
use crate::wal::WalWriter;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;
use vecshard_core::{Record, ResultItem, ShardId, Vector};

/// One shard's records, searchable by exact scan.
pub struct LocalShard {
    shard_id: ShardId,
    dimension: usize,
    vectors: DashMap<String, Vector>,
    wal: Option<Mutex<WalWriter<Record>>>,
}

impl LocalShard {
    /// Creates an empty, memory-only shard.
    pub fn new(shard_id: ShardId, dimension: usize) -> Self {
        Self {
            shard_id,
            dimension,
            vectors: DashMap::new(),
            wal: None,
        }
    }

    /// Opens a file-backed shard, replaying any existing record log.
    pub fn open(shard_id: ShardId, dimension: usize, path: impl AsRef<Path>) -> ShardResult<Self> {
        let path = path.as_ref();
        let vectors = DashMap::new();

        let (writer, records) = WalWriter::<Record>::recover(path)
            .map_err(|e| ShardClientError::Storage(e.to_string()))?;
        let replayed = records.len();
        for record in records {
            if record.vector.len() == dimension {
                vectors.insert(record.id, record.vector);
            } else {
                tracing::warn!(
                    shard_id,
                    id = %record.id,
                    dim = record.vector.len(),
                    "Skipping record with wrong dimension during replay"
                );
            }
        }

        tracing::info!(
            shard_id,
            path = %path.display(),
            replayed,
            records = vectors.len(),
            "Opened file-backed shard"
        );

        Ok(Self {
            shard_id,
            dimension,
            vectors,
            wal: Some(Mutex::new(writer)),
        })
    }

    /// Returns the shard id.
    pub fn id(&self) -> ShardId {
        self.shard_id
    }

    /// Returns the vector dimension accepted by this shard.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Returns the number of records.
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    /// Returns true if the shard holds no records.
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Returns true if the shard is backed by a record log.
    pub fn is_persistent(&self) -> bool {
        self.wal.is_some()
    }

    fn check_dimension(&self, vector: &[f32], what: &str) -> ShardResult<()> {
        if vector.len() != self.dimension {
            return Err(ShardClientError::Rejected(format!(
                "{} dim {} != shard dim {}",
                what,
                vector.len(),
                self.dimension
            )));
        }
        Ok(())
    }

    /// Upserts a record.
    pub fn insert(&self, record: Record) -> ShardResult<()> {
        self.check_dimension(&record.vector, "Vector")?;

        if let Some(wal) = &self.wal {
            let mut writer = wal
                .lock()
                .map_err(|e| ShardClientError::Storage(format!("record log poisoned: {}", e)))?;
            writer
                .append(&record)
                .map_err(|e| ShardClientError::Storage(e.to_string()))?;
            // Insert while holding the log lock so memory order matches log order.
            self.vectors.insert(record.id, record.vector);
        } else {
            self.vectors.insert(record.id, record.vector);
        }
        Ok(())
    }

    /// Returns a record by id.
    pub fn get(&self, id: &str) -> Option<Record> {
        self.vectors
            .get(id)
            .map(|entry| Record::new(entry.key().clone(), entry.value().clone()))
    }

    /// Exact top-k scan under `metric`, best-first.
    pub fn search(
        &self,
        query: &[f32],
        top_k: usize,
        metric: DistanceMetric,
    ) -> ShardResult<Vec<ResultItem>> {
        self.check_dimension(query, "Query")?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let candidates = self.vectors.iter().map(|entry| {
            ResultItem::new(
                entry.key().clone(),
                metric.score_unchecked(query, entry.value()),
                self.shard_id,
            )
        });

        Ok(select_top_k(candidates, top_k, metric))
    }

    /// Returns all ids in sorted order.
    pub fn ids(&self) -> BTreeSet<String> {
        self.vectors.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl std::fmt::Debug for LocalShard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalShard")
            .field("shard_id", &self.shard_id)
            .field("dimension", &self.dimension)
            .field("len", &self.vectors.len())
            .field("persistent", &self.wal.is_some())
            .finish()
    }
}

#[async_trait]
impl ShardClient for LocalShard {
    fn shard_id(&self) -> ShardId {
        self.shard_id
    }

    fn endpoint(&self) -> String {
        if self.wal.is_some() {
            format!("file://shard_{}", self.shard_id)
        } else {
            format!("memory://shard_{}", self.shard_id)
        }
    }

    async fn store(&self, record: Record) -> ShardResult<()> {
        self.insert(record)
    }

    async fn fetch(&self, id: &str) -> ShardResult<Option<Record>> {
        Ok(self.get(id))
    }

    async fn local_search(
        &self,
        query: &[f32],
        top_k: usize,
        metric: DistanceMetric,
    ) -> ShardResult<Vec<ResultItem>> {
        self.search(query, top_k, metric)
    }

    async fn list_ids(&self) -> ShardResult<BTreeSet<String>> {
        Ok(self.ids())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn shard_with(vectors: &[(&str, [f32; 2])]) -> LocalShard {
        let shard = LocalShard::new(0, 2);
        for (id, v) in vectors {
            shard.insert(Record::new(*id, v.to_vec())).unwrap();
        }
        shard
    }

    #[test]
    fn test_insert_get_overwrite() {
        let shard = shard_with(&[("a", [1.0, 0.0])]);
        assert_eq!(shard.get("a").unwrap().vector, vec![1.0, 0.0]);

        shard.insert(Record::new("a", vec![0.0, 1.0])).unwrap();
        assert_eq!(shard.len(), 1);
        assert_eq!(shard.get("a").unwrap().vector, vec![0.0, 1.0]);
        assert!(shard.get("missing").is_none());
    }

    #[test]
    fn test_rejects_wrong_dimension() {
        let shard = LocalShard::new(0, 2);
        let err = shard.insert(Record::new("a", vec![1.0])).unwrap_err();
        assert!(matches!(err, ShardClientError::Rejected(_)));
        assert!(shard.is_empty());

        assert!(shard.search(&[1.0, 2.0, 3.0], 1, DistanceMetric::L2).is_err());
    }

    #[test]
    fn test_search_l2_ascending() {
        let shard = shard_with(&[("near", [1.0, 1.0]), ("far", [5.0, 5.0]), ("mid", [2.0, 2.0])]);
        let hits = shard.search(&[1.0, 1.0], 2, DistanceMetric::L2).unwrap();

        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid"]);
        assert_eq!(hits[0].score, 0.0);
    }

    #[test]
    fn test_search_cosine_descending() {
        let shard = shard_with(&[("same", [1.0, 0.0]), ("ortho", [0.0, 1.0]), ("opposite", [-1.0, 0.0])]);
        let hits = shard.search(&[2.0, 0.0], 3, DistanceMetric::Cosine).unwrap();

        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["same", "ortho", "opposite"]);
    }

    #[test]
    fn test_ids_sorted() {
        let shard = shard_with(&[("b", [0.0, 0.0]), ("a", [0.0, 0.0])]);
        let ids: Vec<_> = shard.ids().into_iter().collect();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_file_backed_replay() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shard_1.log");

        {
            let shard = LocalShard::open(1, 2, &path).unwrap();
            assert!(shard.is_persistent());
            shard.insert(Record::new("x", vec![1.0, 2.0])).unwrap();
            shard.insert(Record::new("y", vec![3.0, 4.0])).unwrap();
            shard.insert(Record::new("x", vec![5.0, 6.0])).unwrap();
        }

        let reopened = LocalShard::open(1, 2, &path).unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.get("x").unwrap().vector, vec![5.0, 6.0]);
        assert_eq!(reopened.endpoint(), "file://shard_1");
    }

    #[test]
    fn test_inserts_after_torn_tail_survive_restart() {
        use std::io::Write;

        let dir = tempdir().unwrap();
        let path = dir.path().join("shard_0.log");

        {
            let shard = LocalShard::open(0, 2, &path).unwrap();
            shard.insert(Record::new("a", vec![0.0, 1.0])).unwrap();
        }
        {
            let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&20u64.to_le_bytes()).unwrap();
            file.write_all(&[1, 2, 3]).unwrap();
        }
        {
            let shard = LocalShard::open(0, 2, &path).unwrap();
            assert_eq!(shard.len(), 1);
            for i in 0..5 {
                shard.insert(Record::new(format!("r{}", i), vec![i as f32, 0.0])).unwrap();
            }
        }

        let reopened = LocalShard::open(0, 2, &path).unwrap();
        assert_eq!(reopened.len(), 6);
        assert_eq!(reopened.get("r4").unwrap().vector, vec![4.0, 0.0]);
    }

    #[tokio::test]
    async fn test_shard_client_impl() {
        let shard = shard_with(&[("a", [0.0, 0.0])]);
        let client: &dyn ShardClient = &shard;

        client.store(Record::new("b", vec![1.0, 1.0])).await.unwrap();
        assert!(client.fetch("b").await.unwrap().is_some());
        assert_eq!(client.list_ids().await.unwrap().len(), 2);

        let hits = client
            .local_search(&[1.0, 1.0], 1, DistanceMetric::L2)
            .await
            .unwrap();
        assert_eq!(hits[0].id, "b");
        assert_eq!(hits[0].shard_id, 0);
    }
}
