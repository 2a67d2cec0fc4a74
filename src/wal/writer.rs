use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::core::{DatabaseError, DbResult};

use super::format::{WalFileHeader, WalRecord, HEADER_LEN};

/// Single-writer append-only log, rotating to a new numbered file once the
/// active file crosses `max_file_size`. Every append is immediately flushed
/// and fsynced so a committed transaction survives a crash immediately
/// after its COMMIT record returns, framing each record with the explicit
/// CRC'd layout from `format.rs` so a torn write at the tail of the file
/// can be detected and
/// truncated instead of poisoning the rest of the log.
pub struct WalWriter {
    inner: Mutex<WriterState>,
    max_file_size: u64,
}

struct WriterState {
    dir: PathBuf,
    sequence: u64,
    file: BufWriter<File>,
    bytes_written: u64,
    next_lsn: u64,
}

fn wal_file_name(sequence: u64) -> String {
    format!("wal-{sequence:020}.log")
}

impl WalWriter {
    /// Opens (creating if necessary) the WAL directory and either resumes
    /// appending to the highest-numbered segment or starts a fresh one.
    pub fn open(dir: impl AsRef<Path>, max_file_size: u64) -> DbResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut sequences: Vec<u64> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name();
                let name = name.to_str()?;
                let seq = name.strip_prefix("wal-")?.strip_suffix(".log")?;
                seq.parse::<u64>().ok()
            })
            .collect();
        sequences.sort_unstable();

        let (sequence, next_lsn) = match sequences.last() {
            Some(&seq) => {
                let path = dir.join(wal_file_name(seq));
                let lsn = Self::highest_lsn_in(&path)?;
                (seq, lsn + 1)
            }
            None => (0, 0),
        };

        let path = dir.join(wal_file_name(sequence));
        let is_new = !path.exists();
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        let bytes_written = file.metadata()?.len();
        if is_new {
            file.write_all(&WalFileHeader { sequence }.encode())?;
            file.sync_all()?;
        }
        let bytes_written = bytes_written.max(HEADER_LEN as u64);

        Ok(Self {
            inner: Mutex::new(WriterState {
                dir,
                sequence,
                file: BufWriter::new(file),
                bytes_written,
                next_lsn,
            }),
            max_file_size,
        })
    }

    fn highest_lsn_in(path: &Path) -> DbResult<u64> {
        let mut bytes = Vec::new();
        File::open(path)?.read_to_end(&mut bytes)?;
        if bytes.len() < HEADER_LEN {
            return Ok(0);
        }
        let mut pos = HEADER_LEN;
        let mut highest = 0u64;
        while pos < bytes.len() {
            match WalRecord::decode(&bytes[pos..]) {
                Ok((record, consumed)) => {
                    highest = highest.max(record.lsn);
                    pos += consumed;
                }
                Err(_) => break,
            }
        }
        Ok(highest)
    }

    /// Appends `record` (after stamping it with the next LSN), flushes, and
    /// fsyncs before returning. Rotates to a new segment first if this write
    /// would exceed `max_file_size`.
    pub fn append(&self, mut record: WalRecord) -> DbResult<u64> {
        let mut state = self
            .inner
            .lock()
            .map_err(|_| DatabaseError::WalWriteFailed("WAL writer lock poisoned".to_string()))?;

        record.lsn = state.next_lsn;
        let bytes = record.encode();

        if state.bytes_written + bytes.len() as u64 > self.max_file_size {
            state.file.flush()?;
            state.file.get_ref().sync_all()?;

            state.sequence += 1;
            let path = state.dir.join(wal_file_name(state.sequence));
            let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
            file.write_all(&WalFileHeader { sequence: state.sequence }.encode())?;
            file.sync_all()?;
            state.file = BufWriter::new(file);
            state.bytes_written = HEADER_LEN as u64;
        }

        state.file.write_all(&bytes)?;
        state.file.flush()?;
        state.file.get_ref().sync_all()?;
        state.bytes_written += bytes.len() as u64;
        state.next_lsn += 1;

        Ok(record.lsn)
    }

    pub fn current_sequence(&self) -> DbResult<u64> {
        let state = self
            .inner
            .lock()
            .map_err(|_| DatabaseError::WalWriteFailed("WAL writer lock poisoned".to_string()))?;
        Ok(state.sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::format::RecordType;
    use tempfile::tempdir;

    fn rec(tx_id: u64, row_id: u64) -> WalRecord {
        WalRecord {
            record_type: RecordType::InsertRow,
            tx_id,
            lsn: 0,
            table_name: "t".to_string(),
            row_id,
            data: vec![1, 2, 3],
        }
    }

    #[test]
    fn append_assigns_increasing_lsns() {
        let dir = tempdir().unwrap();
        let writer = WalWriter::open(dir.path(), 16 * 1024 * 1024).unwrap();
        let lsn0 = writer.append(rec(1, 1)).unwrap();
        let lsn1 = writer.append(rec(1, 2)).unwrap();
        assert_eq!(lsn0, 0);
        assert_eq!(lsn1, 1);
    }

    #[test]
    fn rotates_when_size_cap_exceeded() {
        let dir = tempdir().unwrap();
        let writer = WalWriter::open(dir.path(), HEADER_LEN as u64 + 40).unwrap();
        writer.append(rec(1, 1)).unwrap();
        writer.append(rec(1, 2)).unwrap();
        assert_eq!(writer.current_sequence().unwrap(), 1);
    }

    #[test]
    fn reopen_resumes_lsn_sequence() {
        let dir = tempdir().unwrap();
        {
            let writer = WalWriter::open(dir.path(), 16 * 1024 * 1024).unwrap();
            writer.append(rec(1, 1)).unwrap();
            writer.append(rec(1, 2)).unwrap();
        }
        let writer = WalWriter::open(dir.path(), 16 * 1024 * 1024).unwrap();
        let lsn = writer.append(rec(1, 3)).unwrap();
        assert_eq!(lsn, 2);
    }
}
