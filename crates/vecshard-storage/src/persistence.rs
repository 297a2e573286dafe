//! Binary persistence for centroid snapshots.
//!
//! Snapshots are serialized with bincode and prefixed with magic bytes,
//! a format version and a SHA-256 checksum of the payload.
//!
//! # File Format
//!
//! ```text
//! +------------------+
//! | Magic: "VSCS"    | 4 bytes
//! +------------------+
//! | Version: u32     | 4 bytes (little-endian) = 1
//! +------------------+
//! | SHA256 checksum  | 32 bytes
//! +------------------+
//! | Snapshot data    | variable (bincode-encoded)
//! +------------------+
//! ```
//!
//! # Example
//!
//! ```ignore
//! use vecshard_storage::persistence::{load_snapshot, save_snapshot_with_backups, BackupConfig};
//!
//! // Save atomically, keeping the three previous snapshots
//! save_snapshot_with_backups(&snapshot, "data/centroids.vscs", &BackupConfig::default())?;
//!
//! let restored = load_snapshot("data/centroids.vscs")?;
//! ```

use crate::sharding::CentroidSnapshot;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Magic bytes identifying snapshot files
const MAGIC: &[u8; 4] = b"VSCS";

/// Current file format version
const VERSION: u32 = 1;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during persistence operations.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// I/O error during file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error during bincode serialization/deserialization
    #[error("Serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// File does not have valid VSCS magic bytes
    #[error("Invalid file format: expected VSCS magic bytes")]
    InvalidMagic,

    /// Unsupported file version by this library version
    #[error("Unsupported file version: {0} (current: {VERSION})")]
    UnsupportedVersion(u32),

    /// Atomic rename failed - original file should still be intact
    #[error("Atomic rename failed: {0}")]
    AtomicRenameFailed(std::io::Error),

    /// Backup rotation failed
    #[error("Backup rotation failed: {0}")]
    BackupRotationFailed(String),

    /// Fsync failed - data may not be durable
    #[error("Fsync failed - data may not be durable: {0}")]
    FsyncFailed(std::io::Error),

    /// File checksum mismatch - data may be corrupted
    #[error("File checksum mismatch - data may be corrupted")]
    ChecksumMismatch,
}

impl PersistenceError {
    /// Returns true if this error indicates potential data loss.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::AtomicRenameFailed(_) | Self::FsyncFailed(_)
        )
    }
}

impl From<PersistenceError> for vecshard_core::VecShardError {
    fn from(err: PersistenceError) -> Self {
        vecshard_core::VecShardError::Persistence(err.to_string())
    }
}

// =============================================================================
// Backup Configuration
// =============================================================================

/// Configuration for backup rotation during saves.
///
/// When saving with backups, previous snapshots are kept as:
/// - `centroids.vscs` (current)
/// - `centroids.backup.1.vscs` (previous)
/// - ... up to `max_backups`
#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// Number of backup copies to retain (default: 3)
    pub max_backups: usize,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self { max_backups: 3 }
    }
}

impl BackupConfig {
    /// Creates a new backup configuration.
    pub fn new(max_backups: usize) -> Self {
        Self { max_backups }
    }

    /// Returns the path for backup number `n` (1-indexed).
    fn backup_path(&self, base: &Path, n: usize) -> PathBuf {
        let stem = base
            .file_stem()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        let ext = base.extension().unwrap_or_default().to_string_lossy();
        base.with_file_name(format!("{}.backup.{}.{}", stem, n, ext))
    }
}

// =============================================================================
// Save / Load
// =============================================================================

/// Saves a snapshot atomically.
///
/// Uses write-tmp-rename for crash safety:
/// 1. Serialize and compute the SHA256 checksum
/// 2. Write header, checksum and data to a temporary file
/// 3. Flush and fsync
/// 4. Rename over the target path
pub fn save_snapshot(snapshot: &CentroidSnapshot, path: impl AsRef<Path>) -> Result<(), PersistenceError> {
    let path = path.as_ref();
    let tmp_path = path.with_extension("vscs.tmp");

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let data = bincode::serialize(snapshot)?;
    let checksum: [u8; 32] = Sha256::digest(&data).into();

    {
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);

        writer.write_all(MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;
        writer.write_all(&checksum)?;
        writer.write_all(&data)?;
        writer.flush()?;

        writer
            .get_ref()
            .sync_all()
            .map_err(PersistenceError::FsyncFailed)?;
    }

    std::fs::rename(&tmp_path, path).map_err(PersistenceError::AtomicRenameFailed)?;

    // Best effort: make the rename itself durable.
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }

    tracing::info!(
        path = %path.display(),
        version = snapshot.version(),
        shards = snapshot.len(),
        "Saved centroid snapshot"
    );
    Ok(())
}

/// Saves a snapshot, first rotating older files into numbered backups.
pub fn save_snapshot_with_backups(
    snapshot: &CentroidSnapshot,
    path: impl AsRef<Path>,
    config: &BackupConfig,
) -> Result<(), PersistenceError> {
    let path = path.as_ref();

    if config.max_backups > 0 {
        rotate_backups(path, config)?;
        if path.exists() {
            let backup_1 = config.backup_path(path, 1);
            std::fs::rename(path, &backup_1).map_err(|e| {
                PersistenceError::BackupRotationFailed(format!(
                    "Failed to move current to backup: {}",
                    e
                ))
            })?;
        }
    }

    save_snapshot(snapshot, path)
}

fn rotate_backups(path: &Path, config: &BackupConfig) -> Result<(), PersistenceError> {
    let oldest = config.backup_path(path, config.max_backups);
    if oldest.exists() {
        std::fs::remove_file(&oldest).map_err(|e| {
            PersistenceError::BackupRotationFailed(format!("Failed to delete oldest backup: {}", e))
        })?;
    }

    // Rotate N -> N+1 (in reverse order to avoid overwrites)
    for i in (1..config.max_backups).rev() {
        let from = config.backup_path(path, i);
        let to = config.backup_path(path, i + 1);
        if from.exists() {
            std::fs::rename(&from, &to).map_err(|e| {
                PersistenceError::BackupRotationFailed(format!(
                    "Failed to rotate backup {} -> {}: {}",
                    i,
                    i + 1,
                    e
                ))
            })?;
        }
    }

    Ok(())
}

/// Loads and verifies a snapshot file.
pub fn load_snapshot(path: impl AsRef<Path>) -> Result<CentroidSnapshot, PersistenceError> {
    let file = File::open(path.as_ref())?;
    let mut reader = BufReader::new(file);

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(PersistenceError::InvalidMagic);
    }

    let mut version_bytes = [0u8; 4];
    reader.read_exact(&mut version_bytes)?;
    let version = u32::from_le_bytes(version_bytes);
    if version != VERSION {
        return Err(PersistenceError::UnsupportedVersion(version));
    }

    let mut expected_checksum = [0u8; 32];
    reader.read_exact(&mut expected_checksum)?;

    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;

    let computed_checksum: [u8; 32] = Sha256::digest(&data).into();
    if computed_checksum != expected_checksum {
        return Err(PersistenceError::ChecksumMismatch);
    }

    Ok(bincode::deserialize(&data)?)
}

// =============================================================================
// Tests
// =============================================================================
