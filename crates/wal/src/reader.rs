//! Segment reader: turns one committed transaction of a segment back into
//! typed rows for the table writer's append path.
//!
//! A segment is self-describing: `_meta` pins the column layout the rows
//! were written under, `_event` pins the committed row range, timestamp
//! bounds, out-of-order flag and symbol overlay delta. Symbol keys below
//! the delta's base resolve through the writer directory's hard-linked
//! base snapshot; provisional keys resolve through the delta.

use crate::events::{self, DataEvent, WalEvent};
use crate::segment;
use crate::symbols::{self, SymbolDelta, SymbolSnapshot};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tessera_core::{
    Cell, ColumnType, Error, Result, TableMetadata, TableWriter, SYMBOL_NULL_KEY,
};

/// Reader over one sealed or active segment directory.
pub struct SegmentReader {
    dir: PathBuf,
    wal_dir: PathBuf,
    metadata: TableMetadata,
    events: Vec<WalEvent>,
}

impl SegmentReader {
    /// Open a segment directory, loading its metadata dump and event log.
    pub fn open(segment_dir: &Path) -> Result<Self> {
        let metadata = segment::read_metadata(segment_dir)?;
        let events = events::read_events(segment_dir)?;
        let wal_dir = segment_dir
            .parent()
            .ok_or_else(|| {
                Error::InvalidOperation(format!(
                    "segment directory has no parent: {}",
                    segment_dir.display()
                ))
            })?
            .to_path_buf();
        Ok(SegmentReader {
            dir: segment_dir.to_path_buf(),
            wal_dir,
            metadata,
            events,
        })
    }

    /// Column layout the segment's rows were written under.
    pub fn metadata(&self) -> &TableMetadata {
        &self.metadata
    }

    /// The data event at a segment-local transaction number.
    pub fn data_event(&self, segment_txn: u64) -> Result<&DataEvent> {
        match self.events.get(segment_txn as usize) {
            Some(WalEvent::Data(data)) => Ok(data),
            Some(WalEvent::Structure { .. }) => Err(Error::Corruption(format!(
                "segment txn {} in {} is a structure marker, expected data",
                segment_txn,
                self.dir.display()
            ))),
            None => Err(Error::Corruption(format!(
                "segment txn {} not found in {}",
                segment_txn,
                self.dir.display()
            ))),
        }
    }

    /// Replay one committed transaction into the table writer: append every
    /// row of the recorded range, then commit with the recorded
    /// out-of-order flag. Returns the number of rows replayed.
    pub fn replay_data_txn(&self, segment_txn: u64, writer: &mut dyn TableWriter) -> Result<u64> {
        let event = self.data_event(segment_txn)?;
        let rows = event.end_row - event.start_row;

        let mut columns = Vec::with_capacity(self.metadata.column_count());
        for (index, col) in self.metadata.columns().iter().enumerate() {
            let delta = event
                .symbol_deltas
                .iter()
                .find(|d| d.column_index == index as u32);
            columns.push(ColumnValues::load(
                &self.dir,
                &self.wal_dir,
                &col.name,
                col.column_type,
                event.start_row,
                event.end_row,
                delta,
            )?);
        }

        for row in 0..rows {
            let mut cells = Vec::with_capacity(columns.len());
            for column in &columns {
                cells.push(column.cell(row as usize)?);
            }
            writer.append_row(&cells)?;
        }
        writer.commit(event.out_of_order)?;
        Ok(rows)
    }
}

enum ColumnValues {
    Fixed {
        ty: ColumnType,
        width: usize,
        bytes: Vec<u8>,
    },
    Var {
        ty: ColumnType,
        data: Vec<u8>,
        offsets: Vec<u64>,
        data_base: u64,
        path: PathBuf,
    },
    Symbol {
        keys: Vec<i32>,
        snapshot: SymbolSnapshot,
        delta_base: u32,
        delta_values: Vec<String>,
        path: PathBuf,
    },
}

impl ColumnValues {
    fn load(
        segment_dir: &Path,
        wal_dir: &Path,
        name: &str,
        ty: ColumnType,
        start_row: u64,
        end_row: u64,
        delta: Option<&SymbolDelta>,
    ) -> Result<Self> {
        let rows = end_row - start_row;
        match ty {
            ColumnType::Symbol => {
                let path = segment::column_data_path(segment_dir, name);
                let bytes = read_range(&path, start_row * 4, rows * 4)?;
                let keys = bytes
                    .chunks_exact(4)
                    .map(|c| i32::from_le_bytes(c.try_into().unwrap()))
                    .collect();
                let snapshot_path = symbols::symbol_file_path(wal_dir, name);
                let snapshot = if snapshot_path.exists() {
                    SymbolSnapshot::load(&snapshot_path)?
                } else {
                    SymbolSnapshot::empty()
                };
                let (delta_base, delta_values) = match delta {
                    Some(d) => (d.base_key, d.values.clone()),
                    None => (snapshot.count(), Vec::new()),
                };
                Ok(ColumnValues::Symbol {
                    keys,
                    snapshot,
                    delta_base,
                    delta_values,
                    path,
                })
            }
            ColumnType::Str | ColumnType::Bin => {
                let offsets_path = segment::column_offsets_path(segment_dir, name);
                let offset_bytes = read_range(&offsets_path, start_row * 8, (rows + 1) * 8)?;
                let offsets: Vec<u64> = offset_bytes
                    .chunks_exact(8)
                    .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
                    .collect();
                let data_base = offsets[0];
                let data_len = offsets[rows as usize] - data_base;
                let path = segment::column_data_path(segment_dir, name);
                let data = read_range(&path, data_base, data_len)?;
                Ok(ColumnValues::Var {
                    ty,
                    data,
                    offsets,
                    data_base,
                    path,
                })
            }
            _ => {
                let width = ty
                    .fixed_size()
                    .expect("non-var column has a fixed width");
                let path = segment::column_data_path(segment_dir, name);
                let bytes = read_range(&path, start_row * width as u64, rows * width as u64)?;
                Ok(ColumnValues::Fixed { ty, width, bytes })
            }
        }
    }

    fn cell(&self, row: usize) -> Result<Cell> {
        match self {
            ColumnValues::Fixed { ty, width, bytes } => {
                let raw = &bytes[row * width..(row + 1) * width];
                Ok(match ty {
                    ColumnType::Bool => Cell::Bool(raw[0] != 0),
                    ColumnType::Byte => Cell::Byte(raw[0] as i8),
                    ColumnType::Short => {
                        Cell::Short(i16::from_le_bytes(raw.try_into().unwrap()))
                    }
                    ColumnType::Int => Cell::Int(i32::from_le_bytes(raw.try_into().unwrap())),
                    ColumnType::Long => Cell::Long(i64::from_le_bytes(raw.try_into().unwrap())),
                    ColumnType::Float => {
                        Cell::Float(f32::from_le_bytes(raw.try_into().unwrap()))
                    }
                    ColumnType::Double => {
                        Cell::Double(f64::from_le_bytes(raw.try_into().unwrap()))
                    }
                    ColumnType::Timestamp => {
                        Cell::Timestamp(i64::from_le_bytes(raw.try_into().unwrap()))
                    }
                    ColumnType::Str | ColumnType::Bin | ColumnType::Symbol => unreachable!(),
                })
            }
            ColumnValues::Var {
                ty,
                data,
                offsets,
                data_base,
                path,
            } => {
                let start = offsets[row]
                    .checked_sub(*data_base)
                    .ok_or_else(|| corrupt_value(path))? as usize;
                let end = offsets[row + 1]
                    .checked_sub(*data_base)
                    .ok_or_else(|| corrupt_value(path))? as usize;
                if end > data.len() || start > end {
                    return Err(corrupt_value(path));
                }
                let raw = &data[start..end];
                match ty {
                    ColumnType::Str => {
                        if raw.len() < 4 {
                            return Err(corrupt_value(path));
                        }
                        let len = u32::from_le_bytes(raw[0..4].try_into().unwrap());
                        if len == segment::NULL_STR_LEN {
                            Ok(Cell::Str(None))
                        } else {
                            let bytes = raw
                                .get(4..4 + len as usize)
                                .ok_or_else(|| corrupt_value(path))?;
                            let value = String::from_utf8(bytes.to_vec()).map_err(|_| {
                                Error::Corruption(format!(
                                    "invalid UTF-8 in {}",
                                    path.display()
                                ))
                            })?;
                            Ok(Cell::Str(Some(value)))
                        }
                    }
                    ColumnType::Bin => {
                        if raw.len() < 8 {
                            return Err(corrupt_value(path));
                        }
                        let len = u64::from_le_bytes(raw[0..8].try_into().unwrap());
                        if len == segment::NULL_BIN_LEN {
                            Ok(Cell::Bin(None))
                        } else {
                            let bytes = raw
                                .get(8..8 + len as usize)
                                .ok_or_else(|| corrupt_value(path))?;
                            Ok(Cell::Bin(Some(bytes.to_vec())))
                        }
                    }
                    _ => unreachable!(),
                }
            }
            ColumnValues::Symbol {
                keys,
                snapshot,
                delta_base,
                delta_values,
                path,
            } => {
                let key = keys[row];
                if key == SYMBOL_NULL_KEY {
                    return Ok(Cell::Symbol(None));
                }
                if key < 0 {
                    return Err(Error::Corruption(format!(
                        "negative symbol key {} in {}",
                        key,
                        path.display()
                    )));
                }
                let key = key as u32;
                if key < *delta_base {
                    match snapshot.value_of(key) {
                        Some(value) => Ok(Cell::Symbol(Some(value.to_string()))),
                        None => Err(Error::Corruption(format!(
                            "symbol key {} missing from base snapshot for {}",
                            key,
                            path.display()
                        ))),
                    }
                } else {
                    match delta_values.get((key - *delta_base) as usize) {
                        Some(value) => Ok(Cell::Symbol(Some(value.clone()))),
                        None => Err(Error::Corruption(format!(
                            "symbol key {} missing from overlay delta for {}",
                            key,
                            path.display()
                        ))),
                    }
                }
            }
        }
    }
}

fn corrupt_value(path: &Path) -> Error {
    Error::Corruption(format!(
        "var-length value exceeds column data in {}",
        path.display()
    ))
}

fn read_range(path: &Path, offset: u64, len: u64) -> Result<Vec<u8>> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; len as usize];
    file.read_exact(&mut buf)?;
    Ok(buf)
}
