//! The id → shard placement map.
//!
//! Updated on every successful write so a point lookup can go straight to the
//! owning shard instead of probing all of them. Optionally backed by an
//! append-only log that is replayed on open; later entries win.

use crate::wal::WalWriter;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use vecshard_core::{Result, ShardId, VecShardError};

/// One logged placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PlacementEntry {
    id: String,
    shard_id: ShardId,
}

/// Concurrent `id → shard_id` table.
pub struct PlacementMap {
    placements: DashMap<String, ShardId>,
    wal: Option<Mutex<WalWriter<PlacementEntry>>>,
}

impl PlacementMap {
    /// Creates an empty, memory-only map.
    pub fn in_memory() -> Self {
        Self {
            placements: DashMap::new(),
            wal: None,
        }
    }

    /// Opens a log-backed map, replaying existing entries.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let (writer, entries) = WalWriter::<PlacementEntry>::recover(path)
            .map_err(|e| VecShardError::Persistence(e.to_string()))?;

        let placements = DashMap::new();
        let replayed = entries.len();
        for entry in entries {
            placements.insert(entry.id, entry.shard_id);
        }

        tracing::info!(
            path = %path.display(),
            replayed,
            ids = placements.len(),
            "Opened placement log"
        );

        Ok(Self {
            placements,
            wal: Some(Mutex::new(writer)),
        })
    }

    /// Records that `id` now lives on `shard_id`.
    ///
    /// Skips the log append when the placement is unchanged.
    pub fn record(&self, id: &str, shard_id: ShardId) -> Result<()> {
        if self.lookup(id) == Some(shard_id) {
            return Ok(());
        }

        match &self.wal {
            Some(wal) => {
                let mut writer = wal
                    .lock()
                    .map_err(|e| VecShardError::Persistence(format!("placement log poisoned: {}", e)))?;
                let entry = PlacementEntry {
                    id: id.to_string(),
                    shard_id,
                };
                writer
                    .append(&entry)
                    .map_err(|e| VecShardError::Persistence(e.to_string()))?;
                self.placements.insert(entry.id, shard_id);
            }
            None => {
                self.placements.insert(id.to_string(), shard_id);
            }
        }
        Ok(())
    }

    /// Returns the shard that last stored `id`.
    pub fn lookup(&self, id: &str) -> Option<ShardId> {
        self.placements.get(id).map(|entry| *entry.value())
    }

    /// Returns the number of placed ids.
    pub fn len(&self) -> usize {
        self.placements.len()
    }

    /// Returns true if nothing has been placed.
    pub fn is_empty(&self) -> bool {
        self.placements.is_empty()
    }

    /// Returns true if placements survive restarts.
    pub fn is_persistent(&self) -> bool {
        self.wal.is_some()
    }
}

impl Default for PlacementMap {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl std::fmt::Debug for PlacementMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlacementMap")
            .field("ids", &self.placements.len())
            .field("persistent", &self.wal.is_some())
            .finish()
    }
}
