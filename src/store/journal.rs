//! Checksummed write-ahead journal with snapshot compaction.
//!
//! Each committed unit of work is one line: `<crc32 hex> <json>\n`. A line
//! is authoritative only once it is complete and its checksum matches, so a
//! write torn by a crash is discarded on the next open together with
//! anything after it.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write as _};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::StorageError;
use super::state::{LedgerState, Snapshot, Write};

const JOURNAL_FILE: &str = "journal.log";
const SNAPSHOT_FILE: &str = "snapshot.json";

/// One committed unit of work.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct JournalEntry {
    pub seq: u64,
    pub writes: Vec<Write>,
}

/// State recovered from disk by [`Journal::open`].
pub(crate) struct Recovered {
    pub journal: Journal,
    pub state: LedgerState,
    pub seq: u64,
    pub replayed: usize,
}

/// Append-only journal file plus the snapshot it compacts into.
pub(crate) struct Journal {
    dir: PathBuf,
    file: File,
    /// Length of the journal up to the last complete entry.
    len: u64,
}

impl Journal {
    /// Loads the snapshot, replays the journal, and truncates any torn tail.
    pub fn open(dir: &Path) -> Result<Recovered, StorageError> {
        fs::create_dir_all(dir)?;

        let snapshot_path = dir.join(SNAPSHOT_FILE);
        let (mut state, snapshot_seq) = if snapshot_path.exists() {
            let contents = fs::read(&snapshot_path)?;
            let snapshot: Snapshot = serde_json::from_slice(&contents).map_err(|e| {
                StorageError::Corrupt(format!("{}: {e}", snapshot_path.display()))
            })?;
            LedgerState::from_snapshot(snapshot)
        } else {
            (LedgerState::default(), 0)
        };

        let journal_path = dir.join(JOURNAL_FILE);
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&journal_path)?;
        sync_dir(dir)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let mut seq = snapshot_seq;
        let mut good_len = 0usize;
        let mut replayed = 0usize;
        let mut offset = 0usize;

        while offset < bytes.len() {
            let Some(newline) = bytes[offset..].iter().position(|b| *b == b'\n') else {
                warn!(offset, "journal ends with an incomplete entry");
                break;
            };
            let line = &bytes[offset..offset + newline];
            let Some(entry) = decode_line(line) else {
                warn!(offset, "journal entry failed checksum or decoding");
                break;
            };

            if entry.seq > seq {
                if entry.seq != seq + 1 {
                    warn!(expected = seq + 1, found = entry.seq, "journal sequence gap");
                    break;
                }
                for write in entry.writes {
                    state.apply(write);
                }
                seq = entry.seq;
                replayed += 1;
            }

            offset += newline + 1;
            good_len = offset;
        }

        if good_len < bytes.len() {
            warn!(
                discarded_bytes = bytes.len() - good_len,
                "discarding incomplete journal tail"
            );
            file.set_len(good_len as u64)?;
            file.sync_all()?;
        }

        info!(seq, replayed, dir = %dir.display(), "ledger store opened");

        Ok(Recovered {
            journal: Self {
                dir: dir.to_path_buf(),
                file,
                len: good_len as u64,
            },
            state,
            seq,
            replayed,
        })
    }

    /// Appends and fsyncs one entry.
    ///
    /// On failure the journal is cut back to its previous length so later
    /// appends never follow a partial line. If that also fails the caller
    /// must stop writing.
    pub fn append(&mut self, entry: &JournalEntry) -> Result<(), StorageError> {
        let line = encode_line(entry)?;
        let result = self
            .file
            .write_all(&line)
            .and_then(|()| self.file.sync_data());

        match result {
            Ok(()) => {
                self.len += line.len() as u64;
                Ok(())
            }
            Err(e) => {
                self.rollback()?;
                Err(e.into())
            }
        }
    }

    /// Writes only the first half of an entry, as a crash mid-append would.
    #[cfg(test)]
    pub fn append_torn(&mut self, entry: &JournalEntry) -> Result<(), StorageError> {
        let line = encode_line(entry)?;
        self.file.write_all(&line[..line.len() / 2])?;
        self.file.sync_data()?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StorageError> {
        self.file.set_len(self.len).map_err(|e| {
            warn!(error = %e, "journal rollback failed");
            StorageError::Poisoned
        })
    }

    /// Persists `state` as a snapshot and empties the journal.
    ///
    /// The snapshot is written to a temp file and renamed into place, so
    /// either the old or the new snapshot is on disk. The rename is made
    /// durable before the journal is cut. Journal entries at or below `seq`
    /// are skipped on replay if truncation does not happen.
    pub fn compact(&mut self, state: &LedgerState, seq: u64) -> Result<(), StorageError> {
        let temp = NamedTempFile::new_in(&self.dir)?;
        {
            let mut writer = BufWriter::new(temp.as_file());
            serde_json::to_writer(&mut writer, &state.to_snapshot(seq))?;
            writer.flush()?;
        }
        temp.as_file().sync_all()?;
        temp.persist(self.dir.join(SNAPSHOT_FILE))?;
        sync_dir(&self.dir)?;

        self.file.set_len(0)?;
        self.file.sync_all()?;
        self.len = 0;
        debug!(seq, "journal compacted into snapshot");
        Ok(())
    }
}

/// Flushes directory entries (creates, renames) in `dir` to disk.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

fn encode_line(entry: &JournalEntry) -> Result<Vec<u8>, StorageError> {
    let body = serde_json::to_vec(entry)?;
    let checksum = crc32fast::hash(&body);
    let mut line = format!("{checksum:08x} ").into_bytes();
    line.extend_from_slice(&body);
    line.push(b'\n');
    Ok(line)
}

fn decode_line(line: &[u8]) -> Option<JournalEntry> {
    if line.len() < 9 || line[8] != b' ' {
        return None;
    }
    let checksum = std::str::from_utf8(&line[..8])
        .ok()
        .and_then(|hex| u32::from_str_radix(hex, 16).ok())?;
    let body = &line[9..];
    if crc32fast::hash(body) != checksum {
        return None;
    }
    serde_json::from_slice(body).ok()
}
