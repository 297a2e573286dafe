//! Centroid snapshots and the hot-swappable centroid index.
//!
//! A [`CentroidSnapshot`] holds one representative point per shard. The
//! [`CentroidIndex`] publishes the current snapshot behind an `ArcSwapOption`:
//! readers load an `Arc` once per lookup and keep using it even if a retrain
//! swaps in a new snapshot meanwhile, and writers replace the whole reference.

use crate::vector_index::squared_euclidean;
use arc_swap::ArcSwapOption;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use vecshard_core::{check_dimension, Result, ShardId, VecShardError, Vector};

/// An immutable set of per-shard centroids.
///
/// `centroids[i]` is the centroid of shard `i`; there are no gaps.
/// Deserialization goes through [`CentroidSnapshot::new`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSnapshot")]
pub struct CentroidSnapshot {
    version: u64,
    centroids: Vec<Vector>,
}

/// Wire form of a snapshot before validation.
#[derive(Deserialize)]
struct RawSnapshot {
    version: u64,
    centroids: Vec<Vector>,
}

impl TryFrom<RawSnapshot> for CentroidSnapshot {
    type Error = VecShardError;

    fn try_from(raw: RawSnapshot) -> Result<Self> {
        Self::new(raw.version, raw.centroids)
    }
}

impl CentroidSnapshot {
    /// Creates a snapshot, checking that all centroids share one dimension.
    pub fn new(version: u64, centroids: Vec<Vector>) -> Result<Self> {
        let dimension = match centroids.first() {
            Some(first) => first.len(),
            None => {
                return Err(VecShardError::InvalidSnapshot(
                    "snapshot has no centroids".to_string(),
                ))
            }
        };
        if dimension == 0 {
            return Err(VecShardError::InvalidSnapshot(
                "centroids have zero dimension".to_string(),
            ));
        }
        for (shard_id, centroid) in centroids.iter().enumerate() {
            if centroid.len() != dimension {
                return Err(VecShardError::InvalidSnapshot(format!(
                    "centroid {} has dimension {}, expected {}",
                    shard_id,
                    centroid.len(),
                    dimension
                )));
            }
            if centroid.iter().any(|x| !x.is_finite()) {
                return Err(VecShardError::InvalidSnapshot(format!(
                    "centroid {} has non-finite components",
                    shard_id
                )));
            }
        }

        Ok(Self { version, centroids })
    }

    /// Creates a snapshot from an explicit `shard_id → centroid` map.
    ///
    /// The keys must be exactly `0..len`.
    pub fn from_map(version: u64, map: BTreeMap<ShardId, Vector>) -> Result<Self> {
        let mut centroids = Vec::with_capacity(map.len());
        for (expected, (shard_id, centroid)) in map.into_iter().enumerate() {
            if shard_id as usize != expected {
                return Err(VecShardError::InvalidSnapshot(format!(
                    "centroid map is missing shard {}",
                    expected
                )));
            }
            centroids.push(centroid);
        }
        Self::new(version, centroids)
    }

    /// Returns the snapshot version.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns the number of centroids (= shards).
    pub fn len(&self) -> usize {
        self.centroids.len()
    }

    /// Always false; snapshots are never empty.
    pub fn is_empty(&self) -> bool {
        self.centroids.is_empty()
    }

    /// Returns the centroid dimension.
    pub fn dimension(&self) -> usize {
        self.centroids[0].len()
    }

    /// Returns all centroids in shard order.
    pub fn centroids(&self) -> &[Vector] {
        &self.centroids
    }

    /// Returns the centroid of one shard.
    pub fn centroid(&self, shard_id: ShardId) -> Option<&Vector> {
        self.centroids.get(shard_id as usize)
    }

    /// Returns the centroids as a `shard_id → centroid` map.
    pub fn to_map(&self) -> BTreeMap<ShardId, Vector> {
        self.centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (i as ShardId, c.clone()))
            .collect()
    }

    /// Ranks shards by ascending L2 distance to `vector`, ties by shard id.
    ///
    /// Returns at most `m` shard ids. The caller validates dimensions.
    pub fn rank(&self, vector: &[f32], m: usize) -> Vec<ShardId> {
        let mut scored: Vec<(OrderedFloat<f32>, ShardId)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (OrderedFloat(squared_euclidean(vector, c)), i as ShardId))
            .collect();

        // Tuple order gives distance first, then shard id.
        scored.sort_unstable();
        scored.truncate(m);
        scored.into_iter().map(|(_, shard_id)| shard_id).collect()
    }
}

/// Holds the active centroid snapshot for a fixed shard set.
pub struct CentroidIndex {
    dimension: usize,
    num_shards: usize,
    current: ArcSwapOption<CentroidSnapshot>,
}

impl CentroidIndex {
    /// Creates an index with no snapshot installed.
    pub fn new(dimension: usize, num_shards: usize) -> Self {
        Self {
            dimension,
            num_shards,
            current: ArcSwapOption::empty(),
        }
    }

    /// Creates an index with an initial snapshot.
    pub fn with_snapshot(
        dimension: usize,
        num_shards: usize,
        snapshot: CentroidSnapshot,
    ) -> Result<Self> {
        let index = Self::new(dimension, num_shards);
        index.replace(snapshot)?;
        Ok(index)
    }

    /// Returns the vector dimension.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Returns the number of shards.
    pub fn num_shards(&self) -> usize {
        self.num_shards
    }

    /// Returns the active snapshot, if any.
    pub fn snapshot(&self) -> Option<Arc<CentroidSnapshot>> {
        self.current.load_full()
    }

    /// Returns the active snapshot or `EmptySnapshot`.
    pub fn require_snapshot(&self) -> Result<Arc<CentroidSnapshot>> {
        self.snapshot().ok_or(VecShardError::EmptySnapshot)
    }

    /// Returns the version of the active snapshot, 0 if none.
    pub fn version(&self) -> u64 {
        self.current
            .load()
            .as_ref()
            .map(|s| s.version())
            .unwrap_or(0)
    }

    /// Checks that `snapshot` fits this cluster's shard count and dimension.
    pub fn validate(&self, snapshot: &CentroidSnapshot) -> Result<()> {
        if snapshot.len() != self.num_shards {
            return Err(VecShardError::InvalidSnapshot(format!(
                "snapshot has {} centroids, cluster has {} shards",
                snapshot.len(),
                self.num_shards
            )));
        }
        if snapshot.dimension() != self.dimension {
            return Err(VecShardError::InvalidSnapshot(format!(
                "snapshot dimension {} != cluster dimension {}",
                snapshot.dimension(),
                self.dimension
            )));
        }
        Ok(())
    }

    /// Atomically installs a new snapshot, returning the previous one.
    ///
    /// On validation failure the active snapshot is left untouched.
    pub fn replace(&self, snapshot: CentroidSnapshot) -> Result<Option<Arc<CentroidSnapshot>>> {
        self.validate(&snapshot)?;
        let new_version = snapshot.version();
        let previous = self.current.swap(Some(Arc::new(snapshot)));

        let old_version = previous.as_ref().map(|s| s.version()).unwrap_or(0);
        if new_version <= old_version && previous.is_some() {
            tracing::warn!(old_version, new_version, "Installed centroid snapshot with non-increasing version");
        }
        tracing::info!(old_version, new_version, "Centroid snapshot installed");

        Ok(previous)
    }

    /// Ranks shards nearest-first for `vector` and returns up to `m` of them.
    ///
    /// `m` larger than the shard count is clamped; `m == 0` is rejected.
    pub fn nearest_shards(&self, vector: &[f32], m: usize) -> Result<Vec<ShardId>> {
        Ok(self.nearest_shards_with_version(vector, m)?.0)
    }

    /// Like [`nearest_shards`](Self::nearest_shards), also returning the
    /// version of the snapshot that was used.
    pub fn nearest_shards_with_version(
        &self,
        vector: &[f32],
        m: usize,
    ) -> Result<(Vec<ShardId>, u64)> {
        if m == 0 {
            return Err(VecShardError::InvalidArgument(
                "number of shards must be at least 1".to_string(),
            ));
        }
        check_dimension(self.dimension, vector)?;

        // One load per lookup: a concurrent swap cannot tear this read.
        let snapshot = self.require_snapshot()?;
        let m = m.min(snapshot.len());
        Ok((snapshot.rank(vector, m), snapshot.version()))
    }
}

impl std::fmt::Debug for CentroidIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CentroidIndex")
            .field("dimension", &self.dimension)
            .field("num_shards", &self.num_shards)
            .field("version", &self.version())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn two_shard_index() -> CentroidIndex {
        let snapshot = CentroidSnapshot::new(1, vec![vec![0.0, 0.0, 0.0], vec![1.0, 1.0, 1.0]]).unwrap();
        CentroidIndex::with_snapshot(3, 2, snapshot).unwrap()
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: CentroidSnapshot =
            serde_json::from_str(r#"{"version":2,"centroids":[[0.0,1.0],[1.0,0.0]]}"#).unwrap();
        assert_eq!(ok.version(), 2);
        assert_eq!(ok.dimension(), 2);

        let empty = serde_json::from_str::<CentroidSnapshot>(r#"{"version":2,"centroids":[]}"#);
        assert!(empty.is_err());
        let ragged =
            serde_json::from_str::<CentroidSnapshot>(r#"{"version":2,"centroids":[[0.0],[1.0,0.0]]}"#);
        assert!(ragged.is_err());
    }

    #[test]
    fn test_empty_index_fails() {
        let index = CentroidIndex::new(3, 2);
        assert_eq!(
            index.nearest_shards(&[0.0, 0.0, 0.0], 1).unwrap_err(),
            VecShardError::EmptySnapshot
        );
        assert_eq!(index.version(), 0);
    }

    #[test]
    fn test_nearest_shard_deterministic() {
        let index = two_shard_index();
        let v = [0.1, 0.1, 0.1];

        let first = index.nearest_shards(&v, 1).unwrap();
        let second = index.nearest_shards(&v, 1).unwrap();
        assert_eq!(first, vec![0]);
        assert_eq!(first, second);

        assert_eq!(index.nearest_shards(&[0.9, 0.9, 0.9], 1).unwrap(), vec![1]);
    }

    #[test]
    fn test_ties_prefer_lower_shard() {
        let snapshot = CentroidSnapshot::new(
            1,
            vec![vec![1.0, 0.0], vec![-1.0, 0.0], vec![0.0, 1.0]],
        )
        .unwrap();
        let index = CentroidIndex::with_snapshot(2, 3, snapshot).unwrap();

        // [0, 0] is equidistant from every centroid.
        assert_eq!(index.nearest_shards(&[0.0, 0.0], 3).unwrap(), vec![0, 1, 2]);
        // [0, -1] is equidistant from shards 0 and 1.
        assert_eq!(index.nearest_shards(&[0.0, -1.0], 1).unwrap(), vec![0]);
    }

    #[test]
    fn test_m_is_clamped() {
        let index = two_shard_index();
        assert_eq!(index.nearest_shards(&[0.8, 0.8, 0.8], 10).unwrap(), vec![1, 0]);
        assert!(matches!(
            index.nearest_shards(&[0.8, 0.8, 0.8], 0),
            Err(VecShardError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_dimension_checked() {
        let index = two_shard_index();
        assert_eq!(
            index.nearest_shards(&[0.0, 0.0], 1).unwrap_err(),
            VecShardError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        );
    }

    #[test]
    fn test_replace_swaps_whole_snapshot() {
        let index = two_shard_index();
        assert_eq!(index.nearest_shards(&[0.1, 0.1, 0.1], 1).unwrap(), vec![0]);

        let held = index.snapshot().unwrap();

        let v2 = CentroidSnapshot::new(2, vec![vec![5.0, 5.0, 5.0], vec![0.0, 0.0, 0.0]]).unwrap();
        let previous = index.replace(v2).unwrap().unwrap();
        assert_eq!(previous.version(), 1);

        assert_eq!(index.version(), 2);
        assert_eq!(index.nearest_shards(&[0.1, 0.1, 0.1], 1).unwrap(), vec![1]);
        // A reader that loaded v1 before the swap still sees v1.
        assert_eq!(held.version(), 1);
        assert_eq!(held.rank(&[0.1, 0.1, 0.1], 1), vec![0]);
    }

    #[test]
    fn test_replace_rejects_wrong_shape() {
        let index = two_shard_index();

        let too_few = CentroidSnapshot::new(2, vec![vec![0.0, 0.0, 0.0]]).unwrap();
        assert!(matches!(index.replace(too_few), Err(VecShardError::InvalidSnapshot(_))));

        let wrong_dim = CentroidSnapshot::new(2, vec![vec![0.0], vec![1.0]]).unwrap();
        assert!(index.replace(wrong_dim).is_err());

        // Old snapshot still active.
        assert_eq!(index.version(), 1);
    }

    #[test]
    fn test_snapshot_validation() {
        assert!(CentroidSnapshot::new(1, Vec::new()).is_err());
        assert!(CentroidSnapshot::new(1, vec![vec![0.0, 1.0], vec![0.0]]).is_err());
        assert!(CentroidSnapshot::new(1, vec![vec![f32::NAN]]).is_err());
    }

    #[test]
    fn test_from_map_requires_contiguous_ids() {
        let mut map = BTreeMap::new();
        map.insert(0, vec![0.0]);
        map.insert(2, vec![1.0]);
        assert!(CentroidSnapshot::from_map(1, map).is_err());

        let mut map = BTreeMap::new();
        map.insert(1, vec![1.0]);
        map.insert(0, vec![0.0]);
        let snapshot = CentroidSnapshot::from_map(3, map).unwrap();
        assert_eq!(snapshot.centroid(1), Some(&vec![1.0]));
        assert_eq!(snapshot.to_map().len(), 2);
    }

    #[test]
    fn test_concurrent_readers_during_swap() {
        let index = Arc::new(two_shard_index());
        let mut handles = Vec::new();

        for _ in 0..4 {
            let index = Arc::clone(&index);
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    let (shards, version) = index
                        .nearest_shards_with_version(&[0.1, 0.1, 0.1], 1)
                        .unwrap();
                    // v1 routes to shard 0, v2 to shard 1; never a mix.
                    let expected = if version == 1 { 0 } else { 1 };
                    assert_eq!(shards, vec![expected]);
                }
            }));
        }

        for version in 2..50u64 {
            let snapshot = if version % 2 == 0 {
                CentroidSnapshot::new(version, vec![vec![5.0, 5.0, 5.0], vec![0.0, 0.0, 0.0]])
            } else {
                CentroidSnapshot::new(version, vec![vec![0.0, 0.0, 0.0], vec![1.0, 1.0, 1.0]])
            }
            .unwrap();
            index.replace(snapshot).unwrap();
        }

        for handle in handles {
            handle.join().unwrap();
        }
    }
}
