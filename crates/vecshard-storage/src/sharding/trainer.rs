//! Deterministic k-means training of shard centroids.
//!
//! # Algorithm
//!
//! Standard Lloyd's k-means with:
//! - k-means++ initialization
//! - Early stopping when no centroid moves more than `tolerance`
//! - Empty clusters reseeded from the same seeded RNG
//!
//! Every random choice comes from one `StdRng` seeded with
//! [`TrainingConfig::seed`], and all sums run in sample order, so the same
//! samples always produce bit-identical centroids.

use super::centroids::{CentroidIndex, CentroidSnapshot};
use crate::config::TrainingSettings;
use crate::vector_index::squared_euclidean;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;
use std::sync::Arc;
use vecshard_core::{check_dimension, Result, VecShardError, Vector};

/// Configuration for centroid training.
#[derive(Debug, Clone)]
pub struct TrainingConfig {
    /// RNG seed (default: 42)
    pub seed: u64,

    /// Maximum Lloyd iterations (default: 50)
    pub max_iterations: usize,

    /// Convergence tolerance: stop if max centroid movement < tolerance (default: 1e-4)
    pub tolerance: f32,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            max_iterations: 50,
            tolerance: 1e-4,
        }
    }
}

impl From<&TrainingSettings> for TrainingConfig {
    fn from(settings: &TrainingSettings) -> Self {
        Self {
            seed: settings.seed,
            max_iterations: settings.max_iterations,
            tolerance: settings.tolerance,
        }
    }
}

/// Trains centroids and installs them into a [`CentroidIndex`].
#[derive(Debug, Clone, Default)]
pub struct CentroidTrainer {
    config: TrainingConfig,
}

impl CentroidTrainer {
    /// Creates a trainer.
    pub fn new(config: TrainingConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Clusters `samples` into exactly `k` centroids.
    ///
    /// Requires `samples.len() >= k` and all samples of one dimension.
    pub fn train(&self, samples: &[Vector], k: usize) -> Result<Vec<Vector>> {
        if k == 0 {
            return Err(VecShardError::InvalidArgument(
                "number of clusters must be at least 1".to_string(),
            ));
        }
        if samples.len() < k {
            return Err(VecShardError::InsufficientSamples {
                samples: samples.len(),
                k,
            });
        }
        let dim = samples[0].len();
        for sample in samples {
            check_dimension(dim, sample)?;
        }

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let centroids = kmeans(samples, dim, k, &self.config, &mut rng);
        Ok(centroids)
    }

    /// Trains a snapshot with `version`.
    pub fn train_snapshot(&self, samples: &[Vector], k: usize, version: u64) -> Result<CentroidSnapshot> {
        let centroids = self.train(samples, k)?;
        CentroidSnapshot::new(version, centroids)
    }

    /// Trains one centroid per shard and installs it as the next version.
    ///
    /// On any error the active snapshot is left untouched. Records already
    /// stored are not moved.
    pub fn retrain(&self, index: &CentroidIndex, samples: &[Vector]) -> Result<Arc<CentroidSnapshot>> {
        let snapshot = Arc::new(self.next_snapshot(index, samples)?);
        index.replace((*snapshot).clone())?;
        Ok(snapshot)
    }

    /// Trains the snapshot that would follow the one active in `index`,
    /// without installing it.
    pub fn next_snapshot(&self, index: &CentroidIndex, samples: &[Vector]) -> Result<CentroidSnapshot> {
        for sample in samples {
            check_dimension(index.dimension(), sample)?;
        }
        let version = index.version() + 1;
        self.train_snapshot(samples, index.num_shards(), version)
    }
}

/// K-means++ initialization.
///
/// Picks each next centroid with probability proportional to its squared
/// distance from the nearest centroid already chosen.
fn kmeans_plus_plus_init(data: &[Vector], k: usize, rng: &mut StdRng) -> Vec<Vector> {
    let n = data.len();
    let mut centroids: Vec<Vector> = Vec::with_capacity(k);
    centroids.push(data[rng.gen_range(0..n)].clone());

    let mut min_dists = vec![f32::MAX; n];

    while centroids.len() < k {
        let last = &centroids[centroids.len() - 1];
        for (i, point) in data.iter().enumerate() {
            let d = squared_euclidean(point, last);
            if d < min_dists[i] {
                min_dists[i] = d;
            }
        }

        let total: f64 = min_dists.iter().map(|&d| d as f64).sum();
        if total <= 0.0 {
            // Every point sits on a centroid already.
            centroids.push(data[rng.gen_range(0..n)].clone());
            continue;
        }

        let threshold = rng.gen::<f64>() * total;
        let mut cumulative = 0.0f64;
        let mut chosen = n - 1;
        for (i, &d) in min_dists.iter().enumerate() {
            cumulative += d as f64;
            if cumulative >= threshold {
                chosen = i;
                break;
            }
        }
        centroids.push(data[chosen].clone());
    }

    centroids
}

fn nearest_centroid(point: &[f32], centroids: &[Vector]) -> usize {
    let mut best_c = 0;
    let mut best_dist = f32::MAX;
    for (c, centroid) in centroids.iter().enumerate() {
        let dist = squared_euclidean(point, centroid);
        // Strict `<` keeps the lowest index on ties.
        if dist < best_dist {
            best_dist = dist;
            best_c = c;
        }
    }
    best_c
}

/// Lloyd's k-means.
fn kmeans(
    data: &[Vector],
    dim: usize,
    k: usize,
    config: &TrainingConfig,
    rng: &mut StdRng,
) -> Vec<Vector> {
    let n = data.len();
    let mut centroids = kmeans_plus_plus_init(data, k, rng);
    let mut new_centroids = vec![vec![0.0f32; dim]; k];
    let mut counts = vec![0usize; k];

    for iter in 0..config.max_iterations {
        for c in new_centroids.iter_mut() {
            c.fill(0.0);
        }
        counts.fill(0);

        for point in data {
            let c = nearest_centroid(point, &centroids);
            counts[c] += 1;
            for (acc, x) in new_centroids[c].iter_mut().zip(point) {
                *acc += x;
            }
        }

        for (c, centroid) in new_centroids.iter_mut().enumerate() {
            if counts[c] > 0 {
                let count_f = counts[c] as f32;
                for x in centroid.iter_mut() {
                    *x /= count_f;
                }
            } else {
                // Dead centroid: reseed from a sample point.
                centroid.copy_from_slice(&data[rng.gen_range(0..n)]);
            }
        }

        let max_movement = centroids
            .iter()
            .zip(&new_centroids)
            .map(|(old, new)| squared_euclidean(old, new))
            .fold(0.0f32, f32::max);

        std::mem::swap(&mut centroids, &mut new_centroids);

        if max_movement < config.tolerance * config.tolerance {
            tracing::debug!(iterations = iter + 1, k, samples = n, "K-means converged");
            return centroids;
        }
    }

    tracing::debug!(
        iterations = config.max_iterations,
        k,
        samples = n,
        "K-means stopped at iteration limit"
    );
    centroids
}

/// Picks the ids used to retrain.
///
/// Shuffles the (sorted) ids with a seeded RNG and keeps
/// `max(k, ceil(fraction * total))` of them, capped by `max_samples` but never
/// below `k` when enough ids exist.
pub fn sample_ids(
    ids: &BTreeSet<String>,
    fraction: f64,
    k: usize,
    max_samples: usize,
    seed: u64,
) -> Vec<String> {
    let total = ids.len();
    let wanted = ((fraction * total as f64).ceil() as usize)
        .min(max_samples)
        .max(k)
        .min(total);

    let mut shuffled: Vec<String> = ids.iter().cloned().collect();
    let mut rng = StdRng::seed_from_u64(seed);
    shuffled.shuffle(&mut rng);
    shuffled.truncate(wanted);
    shuffled
}

// =============================================================================
// Tests
// =============================================================================
