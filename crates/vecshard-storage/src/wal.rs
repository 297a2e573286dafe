//! Append-only, length-prefixed bincode log.
//!
//! Used for the id→shard placement table and for file-backed shards. Each
//! entry is written as `[8 bytes: little-endian length][N bytes: bincode]` and
//! flushed before `append` returns. Replay is last-write-wins at the caller.
//!
//! A crash in the middle of an append leaves a torn tail. [`read_entries`]
//! stops at the last complete entry, and [`WalWriter::recover`] cuts the tail
//! off before appending so later entries stay readable.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Upper bound on a single entry. Larger length prefixes mean corruption.
const MAX_ENTRY_BYTES: u64 = 64 * 1024 * 1024;

/// Errors related to the append-only log.
#[derive(Error, Debug)]
pub enum WalError {
    #[error("Log I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to serialize log entry: {0}")]
    Serialization(#[from] bincode::Error),
    #[error("Corrupt log entry at offset {offset}: length {len}")]
    Corrupt { offset: u64, len: u64 },
}

/// Appends entries of type `T` to a log file.
#[derive(Debug)]
pub struct WalWriter<T> {
    path: PathBuf,
    writer: BufWriter<File>,
    _entry: PhantomData<fn(&T)>,
}

impl<T: Serialize + DeserializeOwned> WalWriter<T> {
    /// Replays the log at `path` and opens it for appending.
    ///
    /// A torn tail left by an interrupted append is truncated away first.
    pub fn recover(path: impl AsRef<Path>) -> Result<(Self, Vec<T>), WalError> {
        let path = path.as_ref();
        let replay = read_entries(path)?;
        let writer = Self::open_at(path, replay.valid_len)?;
        Ok((writer, replay.entries))
    }
}

impl<T: Serialize> WalWriter<T> {
    /// Opens or creates the log at `path`, dropping bytes past `valid_len`.
    fn open_at(path: &Path, valid_len: u64) -> Result<Self, WalError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().append(true).create(true).open(path)?;
        let file_len = file.metadata()?.len();
        if file_len > valid_len {
            tracing::warn!(
                path = %path.display(),
                valid_len,
                dropped = file_len - valid_len,
                "Truncating torn log tail"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            _entry: PhantomData,
        })
    }

    /// Appends one entry and flushes it.
    pub fn append(&mut self, entry: &T) -> Result<(), WalError> {
        let encoded = bincode::serialize(entry)?;
        let len = encoded.len() as u64;

        self.writer.write_all(&len.to_le_bytes())?;
        self.writer.write_all(&encoded)?;
        self.writer.flush()?;

        Ok(())
    }

    /// Returns the log file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Entries replayed from a log.
#[derive(Debug)]
pub struct Replay<T> {
    pub entries: Vec<T>,
    /// Byte length of the complete entries; anything after is a torn tail.
    pub valid_len: u64,
}

/// Reads every complete entry from the log at `path`.
///
/// A missing file yields an empty replay.
pub fn read_entries<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Replay<T>, WalError> {
    let file = match File::open(path.as_ref()) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Ok(Replay {
                entries: Vec::new(),
                valid_len: 0,
            })
        }
        Err(e) => return Err(e.into()),
    };
    let mut reader = BufReader::new(file);
    let mut entries = Vec::new();
    let mut offset = 0u64;

    loop {
        let mut len_bytes = [0u8; 8];
        match reader.read_exact(&mut len_bytes) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let len = u64::from_le_bytes(len_bytes);
        if len > MAX_ENTRY_BYTES {
            return Err(WalError::Corrupt { offset, len });
        }

        let mut buffer = vec![0u8; len as usize];
        match reader.read_exact(&mut buffer) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                tracing::warn!(
                    path = %path.as_ref().display(),
                    offset,
                    "Ignoring torn entry at end of log"
                );
                break;
            }
            Err(e) => return Err(e.into()),
        }

        entries.push(bincode::deserialize(&buffer)?);
        offset += 8 + len;
    }

    Ok(Replay {
        entries,
        valid_len: offset,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Entry {
        key: String,
        value: u32,
    }

    /// Appends a length prefix promising 20 bytes followed by only 3.
    fn tear_tail(path: &Path) {
        let mut file = OpenOptions::new().append(true).open(path).unwrap();
        file.write_all(&20u64.to_le_bytes()).unwrap();
        file.write_all(&[1, 2, 3]).unwrap();
    }

    #[test]
    fn test_append_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("entries.log");

        {
            let (mut writer, entries) = WalWriter::<Entry>::recover(&path).unwrap();
            assert!(entries.is_empty());
            writer.append(&Entry { key: "a".into(), value: 1 }).unwrap();
            writer.append(&Entry { key: "b".into(), value: 2 }).unwrap();
        }
        {
            // Reopening appends rather than truncating.
            let (mut writer, entries) = WalWriter::<Entry>::recover(&path).unwrap();
            assert_eq!(entries.len(), 2);
            writer.append(&Entry { key: "a".into(), value: 3 }).unwrap();
        }

        let entries = read_entries::<Entry>(&path).unwrap().entries;
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2], Entry { key: "a".into(), value: 3 });
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let replay = read_entries::<Entry>(dir.path().join("absent.log")).unwrap();
        assert!(replay.entries.is_empty());
        assert_eq!(replay.valid_len, 0);
    }

    #[test]
    fn test_torn_tail_is_ignored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("torn.log");

        {
            let (mut writer, _) = WalWriter::<Entry>::recover(&path).unwrap();
            writer.append(&Entry { key: "ok".into(), value: 7 }).unwrap();
        }
        let complete_len = std::fs::metadata(&path).unwrap().len();
        tear_tail(&path);

        let replay = read_entries::<Entry>(&path).unwrap();
        assert_eq!(replay.entries, vec![Entry { key: "ok".into(), value: 7 }]);
        assert_eq!(replay.valid_len, complete_len);
    }

    #[test]
    fn test_appends_after_torn_tail_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("recovered.log");

        {
            let (mut writer, _) = WalWriter::<Entry>::recover(&path).unwrap();
            writer.append(&Entry { key: "a".into(), value: 1 }).unwrap();
        }
        tear_tail(&path);

        {
            let (mut writer, entries) = WalWriter::<Entry>::recover(&path).unwrap();
            assert_eq!(entries.len(), 1);
            for value in 2..7 {
                writer.append(&Entry { key: format!("k{}", value), value }).unwrap();
            }
        }

        let (_, entries) = WalWriter::<Entry>::recover(&path).unwrap();
        assert_eq!(entries.len(), 6);
        assert_eq!(entries[0], Entry { key: "a".into(), value: 1 });
        assert_eq!(entries[5], Entry { key: "k6".into(), value: 6 });
    }

    #[test]
    fn test_corrupt_length_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("corrupt.log");
        std::fs::write(&path, u64::MAX.to_le_bytes()).unwrap();

        let result = read_entries::<Entry>(&path);
        assert!(matches!(result, Err(WalError::Corrupt { offset: 0, .. })));
    }
}
