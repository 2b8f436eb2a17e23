//! Collection write-ahead log.
//!
//! One JSON object per line. Each line carries a CRC32 of its payload so a
//! torn final write is detected and ignored on recovery.

use std::io::Write;
use std::sync::Arc;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::collection::record::Record;
use crate::error::{QuiverError, Result};
use crate::storage::Storage;

pub const WAL_FILE: &str = "wal.jsonl";

pub type SeqNumber = u64;

/// A logged change; rows and vectors always travel together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WalPayload {
    Upsert { records: Vec<Record> },
    Delete { ids: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalRecord {
    pub seq: SeqNumber,
    pub payload: WalPayload,
}

#[derive(Serialize, Deserialize)]
struct WalLine {
    seq: SeqNumber,
    crc: u32,
    payload: Box<serde_json::value::RawValue>,
}

/// Append-only log of changes not yet folded into the snapshot.
#[derive(Debug)]
pub struct CollectionWal {
    storage: Arc<dyn Storage>,
    last_seq: SeqNumber,
    /// Records currently in the file.
    len: usize,
    /// Length of the file up to the end of its last good record.
    committed: usize,
    /// Set when a failed append could not be rolled back; the file may then
    /// hold a partial record, so nothing more is appended until reopened.
    poisoned: Option<String>,
}

impl CollectionWal {
    /// Open the log, returning the records newer than `after`.
    ///
    /// Reading stops at the first line that fails to parse or whose checksum
    /// does not match. Anything from that line on is cut off the file so
    /// later appends are not stranded behind it.
    pub fn open(storage: Arc<dyn Storage>, after: SeqNumber) -> Result<(Self, Vec<WalRecord>)> {
        let mut records = Vec::new();
        let mut len = 0;
        let mut last_seq = after;
        let mut committed = 0;

        if storage.file_exists(WAL_FILE) {
            let bytes = storage.read_all(WAL_FILE)?;
            let text = String::from_utf8_lossy(&bytes);
            let mut valid = String::new();
            for (line_no, line) in text.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match decode_line(line) {
                    Ok(record) => {
                        valid.push_str(line);
                        valid.push('\n');
                        len += 1;
                        last_seq = last_seq.max(record.seq);
                        if record.seq > after {
                            records.push(record);
                        }
                    }
                    Err(err) => {
                        warn!("ignoring WAL from line {}: {err}", line_no + 1);
                        break;
                    }
                }
            }
            // also drops an unterminated last line, which the next append
            // would otherwise run into
            if valid.as_bytes() != bytes.as_slice() {
                storage.write_atomic(WAL_FILE, valid.as_bytes())?;
            }
            committed = valid.len();
        }

        Ok((
            CollectionWal {
                storage,
                last_seq,
                len,
                committed,
                poisoned: None,
            },
            records,
        ))
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn last_seq(&self) -> SeqNumber {
        self.last_seq
    }

    /// Durably append a record and return its sequence number.
    ///
    /// A failed append is rolled back to the previous record boundary. If
    /// that fails too the log refuses further appends.
    pub fn append(&mut self, payload: &WalPayload) -> Result<SeqNumber> {
        if let Some(reason) = &self.poisoned {
            return Err(QuiverError::storage(format!(
                "write-ahead log needs recovery after a failed append: {reason}"
            )));
        }

        let seq = self.last_seq + 1;
        let payload_json = serde_json::to_string(payload)?;
        let line = serde_json::to_string(&WalLine {
            seq,
            crc: crc32fast::hash(payload_json.as_bytes()),
            payload: serde_json::value::RawValue::from_string(payload_json)?,
        })? + "\n";

        if let Err(err) = self.write_line(&line) {
            if let Err(rollback) = self.rollback() {
                warn!("could not roll back failed WAL append: {rollback}");
                self.poisoned = Some(err.to_string());
            }
            return Err(err);
        }

        self.last_seq = seq;
        self.len += 1;
        self.committed += line.len();
        Ok(seq)
    }

    fn write_line(&self, line: &str) -> Result<()> {
        let mut output = self.storage.create_output_append(WAL_FILE)?;
        output.write_all(line.as_bytes())?;
        output.flush_and_sync()?;
        output.close()
    }

    /// Cut the file back to the last committed record.
    fn rollback(&self) -> Result<()> {
        if !self.storage.file_exists(WAL_FILE) {
            return Ok(());
        }
        let bytes = self.storage.read_all(WAL_FILE)?;
        if bytes.len() <= self.committed {
            return Ok(());
        }
        self.storage.write_atomic(WAL_FILE, &bytes[..self.committed])
    }

    /// Forget every record; called once they are covered by a snapshot.
    pub fn truncate(&mut self) -> Result<()> {
        self.storage.delete_file(WAL_FILE)?;
        self.len = 0;
        self.committed = 0;
        Ok(())
    }
}

fn decode_line(line: &str) -> Result<WalRecord> {
    let parsed: WalLine = serde_json::from_str(line)?;
    let actual = crc32fast::hash(parsed.payload.get().as_bytes());
    if actual != parsed.crc {
        return Err(QuiverError::storage(format!(
            "checksum mismatch for seq {}",
            parsed.seq
        )));
    }
    Ok(WalRecord {
        seq: parsed.seq,
        payload: serde_json::from_str(parsed.payload.get())?,
    })
}
