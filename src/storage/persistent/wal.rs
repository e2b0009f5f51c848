//! Write-ahead log.
//!
//! Every mutation is appended here before it is applied in memory. On open
//! the log is scanned; a torn or corrupt tail (from a crash mid-append) is
//! truncated so that later appends stay readable.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Result as IoResult, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::ids::EntityId;
use crate::observation::Observation;
use crate::relationship::Relationship;
use crate::source::SourceMaterial;
use crate::timeline::TimelineEvent;

use super::codec;

/// A single entry in the write-ahead log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    /// Monotonically increasing sequence number.
    pub sequence: u64,
    /// When the entry was appended.
    pub timestamp: DateTime<Utc>,
    /// The mutation.
    pub kind: WalEntryKind,
}

/// The logged mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", content = "data", rename_all = "snake_case")]
pub enum WalEntryKind {
    /// A new source.
    SourceInsert(SourceMaterial),
    /// A new observation.
    ObservationInsert(Observation),
    /// Observations moved by a merge.
    ObservationReassign { from: EntityId, to: EntityId },
    /// A new entity.
    EntityInsert(Entity),
    /// An entity replaced in full.
    EntityUpdate(Entity),
    /// First entry of a merge; open completes any moves that did not follow it.
    EntityMerge {
        from: EntityId,
        to: EntityId,
        at: DateTime<Utc>,
    },
    /// A new edge.
    RelationshipInsert(Relationship),
    /// Edges moved by a merge.
    RelationshipRedirect { from: EntityId, to: EntityId },
    /// A new timeline event.
    TimelineInsert(TimelineEvent),
    /// Events moved by a merge.
    TimelineReassign { from: EntityId, to: EntityId },
}

/// Outcome of scanning an existing log on open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalRecovery {
    /// Valid entries found.
    pub entries: u64,
    /// Bytes cut from a corrupt tail.
    pub truncated_bytes: u64,
}

struct WalWriter {
    file: BufWriter<File>,
    sequence: u64,
}

/// Append-only, CRC-checked log. Thread-safe via an internal mutex.
pub struct WriteAheadLog {
    path: PathBuf,
    writer: Mutex<WalWriter>,
    sync_on_write: bool,
    recovery: WalRecovery,
}

impl std::fmt::Debug for WriteAheadLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteAheadLog")
            .field("path", &self.path)
            .field("sync_on_write", &self.sync_on_write)
            .field("recovery", &self.recovery)
            .finish_non_exhaustive()
    }
}

impl WriteAheadLog {
    /// Opens or creates a log, truncating any corrupt tail.
    ///
    /// # Errors
    /// Fails on I/O errors or if the file header is not a WAL header.
    pub fn open(path: &Path, sync_on_write: bool) -> IoResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let len = file.metadata()?.len();
        let recovery;
        let sequence;
        if len < codec::HEADER_LEN {
            file.set_len(0)?;
            codec::write_header(&mut file)?;
            if sync_on_write {
                file.sync_all()?;
            }
            recovery = WalRecovery::default();
            sequence = 0;
        } else {
            let scan = scan(path)?;
            if scan.valid_len < len {
                tracing::warn!(
                    path = %path.display(),
                    valid_entries = scan.entries,
                    truncated_bytes = len - scan.valid_len,
                    error = scan.error.as_deref().unwrap_or("truncated record"),
                    "WAL tail is corrupt; truncating to last valid entry"
                );
                file.set_len(scan.valid_len)?;
                file.sync_all()?;
            }
            recovery = WalRecovery {
                entries: scan.entries,
                truncated_bytes: len - scan.valid_len,
            };
            sequence = scan.last_sequence;
        }
        drop(file);

        let file = OpenOptions::new().append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(WalWriter {
                file: BufWriter::new(file),
                sequence,
            }),
            sync_on_write,
            recovery,
        })
    }

    /// Appends an entry, returning its sequence number.
    ///
    /// # Errors
    /// Fails on encode or I/O errors, or if the writer lock is poisoned.
    pub fn append(&self, kind: WalEntryKind) -> IoResult<u64> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| std::io::Error::new(ErrorKind::Other, "poisoned lock: wal.append"))?;

        let sequence = writer.sequence + 1;
        let encoded = codec::encode(&WalEntry {
            sequence,
            timestamp: Utc::now(),
            kind,
        })?;

        writer.file.write_all(&encoded)?;
        writer.file.flush()?;
        if self.sync_on_write {
            writer.file.get_ref().sync_data()?;
        }
        writer.sequence = sequence;
        Ok(sequence)
    }

    /// Iterates over all entries from the start of the log.
    ///
    /// # Errors
    /// Fails if the file cannot be opened or its header is invalid.
    pub fn iter(&self) -> IoResult<WalIterator> {
        WalIterator::new(&self.path)
    }

    /// Sequence number of the last appended entry.
    #[must_use]
    pub fn current_sequence(&self) -> u64 {
        self.writer.lock().map_or(0, |w| w.sequence)
    }

    /// What the open-time scan found.
    #[must_use]
    pub const fn recovery(&self) -> WalRecovery {
        self.recovery
    }

    /// Size of the log file in bytes.
    ///
    /// # Errors
    /// Propagates metadata errors.
    pub fn size_bytes(&self) -> IoResult<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }
}

struct Scan {
    entries: u64,
    last_sequence: u64,
    valid_len: u64,
    error: Option<String>,
}

fn scan(path: &Path) -> IoResult<Scan> {
    let mut iter = WalIterator::new(path)?;
    let mut scan = Scan {
        entries: 0,
        last_sequence: 0,
        valid_len: codec::HEADER_LEN,
        error: None,
    };
    loop {
        match iter.next() {
            None => break,
            Some(Ok(entry)) => {
                scan.entries += 1;
                scan.last_sequence = entry.sequence;
                scan.valid_len = iter.position()?;
            }
            Some(Err(e)) => {
                scan.error = Some(e.to_string());
                break;
            }
        }
    }
    Ok(scan)
}

/// Iterator over WAL entries. Stops at the first unreadable record.
pub struct WalIterator {
    reader: BufReader<File>,
    file_size: u64,
    done: bool,
}

impl WalIterator {
    fn new(path: &Path) -> IoResult<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        codec::read_header(&mut reader)?;
        Ok(Self {
            reader,
            file_size,
            done: false,
        })
    }

    fn position(&mut self) -> IoResult<u64> {
        self.reader.stream_position()
    }
}

impl Iterator for WalIterator {
    type Item = IoResult<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.position() {
            Ok(pos) if pos >= self.file_size => return None,
            Ok(_) => {}
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        }
        match codec::decode(&mut self.reader) {
            Ok(entry) => Some(Ok(entry)),
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityType;
    use std::io::Write as _;
    use tempfile::tempdir;

    fn entity(name: &str) -> Entity {
        Entity::new(EntityType::new("person").unwrap(), name, name, Utc::now())
    }

    #[test]
    fn test_append_and_iterate() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("truth.wal");

        let wal = WriteAheadLog::open(&path, false).unwrap();
        wal.append(WalEntryKind::EntityInsert(entity("ada"))).unwrap();
        wal.append(WalEntryKind::EntityUpdate(entity("ada"))).unwrap();
        assert_eq!(wal.current_sequence(), 2);
        drop(wal);

        let wal = WriteAheadLog::open(&path, false).unwrap();
        assert_eq!(wal.current_sequence(), 2);
        assert_eq!(wal.recovery().entries, 2);
        let entries: Vec<WalEntry> = wal.iter().unwrap().map(Result::unwrap).collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].sequence, 1);
        assert!(matches!(entries[0].kind, WalEntryKind::EntityInsert(_)));
    }

    #[test]
    fn test_corrupt_tail_is_truncated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("truth.wal");
        {
            let wal = WriteAheadLog::open(&path, true).unwrap();
            wal.append(WalEntryKind::EntityInsert(entity("ada"))).unwrap();
        }
        let good_len = std::fs::metadata(&path).unwrap().len();
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[1, 200, 0, 0, 0, b'{', b'"']).unwrap();
        }

        let wal = WriteAheadLog::open(&path, true).unwrap();
        assert_eq!(wal.recovery().entries, 1);
        assert_eq!(wal.recovery().truncated_bytes, 7);
        assert_eq!(wal.size_bytes().unwrap(), good_len);

        wal.append(WalEntryKind::EntityInsert(entity("grace"))).unwrap();
        drop(wal);
        let wal = WriteAheadLog::open(&path, true).unwrap();
        assert_eq!(wal.recovery().entries, 2);
        assert_eq!(wal.current_sequence(), 2);
    }

    #[test]
    fn test_rejects_foreign_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("truth.wal");
        std::fs::write(&path, b"KYRO\x01").unwrap();
        assert!(WriteAheadLog::open(&path, false).is_err());
    }
}
