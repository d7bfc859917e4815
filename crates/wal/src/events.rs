//! Segment event file: the per-segment log of committed local transactions
//! and structural-change markers.
//!
//! # File Layout
//!
//! ```text
//! ┌────────────────────────────────────┐
//! │ Magic "TSWE" (4) │ Version (4)     │
//! ├────────────────────────────────────┤
//! │ Record 0                           │
//! ├────────────────────────────────────┤
//! │ Record 1                           │
//! ├────────────────────────────────────┤
//! │ ...                                │
//! └────────────────────────────────────┘
//! ```
//!
//! # Record Layout
//!
//! ```text
//! ┌──────────────┬──────────┬────────────────────┬───────────┐
//! │ Body len (4) │ Kind (1) │ Body (variable)    │ CRC32 (4) │
//! └──────────────┴──────────┴────────────────────┴───────────┘
//! ```
//!
//! The CRC covers the kind byte and the body. A record's index in the file
//! is its segment-local transaction number, the value the sequencer stores
//! alongside the global one.
//!
//! Data record bodies carry the committed row range, the transaction's
//! timestamp bounds, the out-of-order flag and the writer's full symbol
//! overlay delta, making every segment self-contained for replay.

use crate::symbols::SymbolDelta;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tessera_core::{AlterOp, Error, Result};

/// Magic bytes identifying a segment event file
pub const EVENT_FILE_MAGIC: [u8; 4] = *b"TSWE";

/// Current event file format version
pub const EVENT_FORMAT_VERSION: u32 = 1;

/// Event file name within a segment directory
pub const EVENT_FILE_NAME: &str = "_event";

const KIND_DATA: u8 = 0;
const KIND_STRUCTURE: u8 = 1;

/// One committed local transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct DataEvent {
    /// First row of the committed range (segment-local, inclusive)
    pub start_row: u64,
    /// One past the last row of the committed range
    pub end_row: u64,
    /// Smallest designated timestamp in the transaction
    pub min_timestamp: i64,
    /// Largest designated timestamp in the transaction
    pub max_timestamp: i64,
    /// True when a timestamp arrived out of order within the transaction
    pub out_of_order: bool,
    /// Full symbol overlay delta, one entry per symbol column with
    /// provisional keys
    pub symbol_deltas: Vec<SymbolDelta>,
}

/// One record of the event file.
#[derive(Debug, Clone, PartialEq)]
pub enum WalEvent {
    /// Committed rows
    Data(DataEvent),
    /// Structural-change marker left by a schema change applied to this
    /// segment's writer
    Structure {
        /// Structure version after the change
        version: u64,
        /// The change itself
        op: AlterOp,
    },
}

/// Appends records to a segment's event file.
pub struct EventWriter {
    file: File,
    path: PathBuf,
    record_count: u64,
}

impl EventWriter {
    /// Create the event file in a fresh segment directory and write the
    /// header.
    pub fn create(segment_dir: &Path) -> Result<Self> {
        let path = segment_dir.join(EVENT_FILE_NAME);
        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)?;
        file.write_all(&EVENT_FILE_MAGIC)?;
        file.write_all(&EVENT_FORMAT_VERSION.to_le_bytes())?;
        Ok(EventWriter {
            file,
            path,
            record_count: 0,
        })
    }

    /// Append a data record; returns its segment-local transaction number.
    pub fn append_data(&mut self, event: &DataEvent) -> Result<u64> {
        let mut body = Vec::with_capacity(64);
        body.extend_from_slice(&event.start_row.to_le_bytes());
        body.extend_from_slice(&event.end_row.to_le_bytes());
        body.extend_from_slice(&event.min_timestamp.to_le_bytes());
        body.extend_from_slice(&event.max_timestamp.to_le_bytes());
        body.push(event.out_of_order as u8);
        body.extend_from_slice(&(event.symbol_deltas.len() as u32).to_le_bytes());
        for delta in &event.symbol_deltas {
            body.extend_from_slice(&delta.column_index.to_le_bytes());
            body.extend_from_slice(&delta.base_key.to_le_bytes());
            body.extend_from_slice(&(delta.values.len() as u32).to_le_bytes());
            for value in &delta.values {
                body.extend_from_slice(&(value.len() as u32).to_le_bytes());
                body.extend_from_slice(value.as_bytes());
            }
        }
        self.append_record(KIND_DATA, &body)
    }

    /// Append a structural-change marker; returns its segment-local
    /// transaction number.
    pub fn append_structure(&mut self, version: u64, op: &AlterOp) -> Result<u64> {
        let op_bytes =
            bincode::serialize(op).map_err(|e| Error::Serialization(e.to_string()))?;
        let mut body = Vec::with_capacity(16 + op_bytes.len());
        body.extend_from_slice(&version.to_le_bytes());
        body.extend_from_slice(&(op_bytes.len() as u32).to_le_bytes());
        body.extend_from_slice(&op_bytes);
        self.append_record(KIND_STRUCTURE, &body)
    }

    fn append_record(&mut self, kind: u8, body: &[u8]) -> Result<u64> {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&[kind]);
        hasher.update(body);
        let crc = hasher.finalize();

        // one write per record keeps the torn-tail window as small as the
        // OS allows; readers treat an unverifiable tail as end-of-log
        let mut record = Vec::with_capacity(9 + body.len());
        record.extend_from_slice(&(body.len() as u32).to_le_bytes());
        record.push(kind);
        record.extend_from_slice(body);
        record.extend_from_slice(&crc.to_le_bytes());
        self.file.write_all(&record)?;

        let segment_txn = self.record_count;
        self.record_count += 1;
        Ok(segment_txn)
    }

    /// Flush and fsync the event file. Called before a transaction is
    /// registered with the sequencer.
    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Number of records appended so far.
    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// Path of the event file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read the verifiable records of a segment's event file.
///
/// The first record that is truncated or fails its CRC check terminates
/// the log: a torn tail is the normal state of a segment whose writer is
/// still appending (or died mid-append), and nothing durable ever
/// references it — the sequencer only records transactions whose event
/// record was synced first. Consumers asking for a record index beyond the
/// verifiable tail surface that as corruption at the call site.
pub fn read_events(segment_dir: &Path) -> Result<Vec<WalEvent>> {
    let path = segment_dir.join(EVENT_FILE_NAME);
    let mut bytes = Vec::new();
    File::open(&path)?.read_to_end(&mut bytes)?;

    if bytes.len() < 8 || bytes[0..4] != EVENT_FILE_MAGIC {
        return Err(Error::Corruption(format!(
            "bad event file magic in {}",
            path.display()
        )));
    }
    let version = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
    if version != EVENT_FORMAT_VERSION {
        return Err(Error::Corruption(format!(
            "unsupported event file version {} in {}",
            version,
            path.display()
        )));
    }

    let mut events = Vec::new();
    let mut pos = 8;
    while pos < bytes.len() {
        if pos + 5 > bytes.len() {
            break;
        }
        let body_len = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize;
        let kind = bytes[pos + 4];
        let body_start = pos + 5;
        let Some(body_end) = body_start.checked_add(body_len) else {
            break;
        };
        if body_end + 4 > bytes.len() {
            break;
        }
        let body = &bytes[body_start..body_end];
        let crc = u32::from_le_bytes(bytes[body_end..body_end + 4].try_into().unwrap());

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&[kind]);
        hasher.update(body);
        if hasher.finalize() != crc {
            break;
        }

        events.push(decode_event(kind, body, &path)?);
        pos = body_end + 4;
    }
    Ok(events)
}

fn decode_event(kind: u8, body: &[u8], path: &Path) -> Result<WalEvent> {
    let mut cur = Cursor { body, pos: 0, path };
    match kind {
        KIND_DATA => {
            let start_row = cur.u64()?;
            let end_row = cur.u64()?;
            let min_timestamp = cur.i64()?;
            let max_timestamp = cur.i64()?;
            let out_of_order = cur.u8()? != 0;
            let delta_count = cur.u32()? as usize;
            let mut symbol_deltas = Vec::with_capacity(delta_count);
            for _ in 0..delta_count {
                let column_index = cur.u32()?;
                let base_key = cur.u32()?;
                let value_count = cur.u32()? as usize;
                let mut values = Vec::with_capacity(value_count);
                for _ in 0..value_count {
                    let len = cur.u32()? as usize;
                    values.push(cur.str(len)?);
                }
                symbol_deltas.push(SymbolDelta {
                    column_index,
                    base_key,
                    values,
                });
            }
            Ok(WalEvent::Data(DataEvent {
                start_row,
                end_row,
                min_timestamp,
                max_timestamp,
                out_of_order,
                symbol_deltas,
            }))
        }
        KIND_STRUCTURE => {
            let version = cur.u64()?;
            let op_len = cur.u32()? as usize;
            let op_bytes = cur.bytes(op_len)?;
            let op = bincode::deserialize(op_bytes)
                .map_err(|e| Error::Serialization(e.to_string()))?;
            Ok(WalEvent::Structure { version, op })
        }
        other => Err(Error::Corruption(format!(
            "unknown event record kind {} in {}",
            other,
            path.display()
        ))),
    }
}

fn truncated(path: &Path) -> Error {
    Error::Corruption(format!("truncated event file {}", path.display()))
}

struct Cursor<'a> {
    body: &'a [u8],
    pos: usize,
    path: &'a Path,
}

impl<'a> Cursor<'a> {
    fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.body.len() {
            return Err(truncated(self.path));
        }
        let slice = &self.body[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.bytes(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.bytes(8)?.try_into().unwrap()))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.bytes(8)?.try_into().unwrap()))
    }

    fn str(&mut self, len: usize) -> Result<String> {
        let bytes = self.bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::Corruption(format!("invalid UTF-8 in {}", self.path.display())))
    }
}
