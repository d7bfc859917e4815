//! Segment store: per-writer, per-segment directories of append-only
//! column files.
//!
//! A segment directory holds one `.d` values file per fixed-layout column,
//! a `.d` + `.i` (data + offsets) pair per var-length column, the `_event`
//! file and a `_meta` dump of the writer's metadata snapshot. Row offsets
//! within a segment are contiguous and monotonic from the segment's start;
//! a consumer never reads across two segment directories for one
//! transaction.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tessera_core::{
    ColumnType, Error, Result, TableMetadata, NULL_INT, NULL_LONG, NULL_TIMESTAMP, SYMBOL_NULL_KEY,
};

/// Writer directory prefix: writer 3 of a table lives under `wal3/`
pub const WAL_NAME_BASE: &str = "wal";

/// Metadata dump file name within a segment directory
pub const SEGMENT_META_FILE_NAME: &str = "_meta";

/// Writer exclusivity lock file name within a writer directory
pub const WAL_LOCK_FILE_NAME: &str = "_lock";

/// Writer directory of a table: `<table>/wal<id>`.
pub fn wal_dir(table_dir: &Path, writer_id: u32) -> PathBuf {
    table_dir.join(format!("{}{}", WAL_NAME_BASE, writer_id))
}

/// Segment directory within a writer directory: `<table>/wal<id>/<segment>`.
pub fn segment_dir(wal_dir: &Path, segment_id: u64) -> PathBuf {
    wal_dir.join(segment_id.to_string())
}

/// Values file of a column: `<name>.d`.
pub fn column_data_path(segment_dir: &Path, name: &str) -> PathBuf {
    segment_dir.join(format!("{}.d", name))
}

/// Offsets file of a var-length column: `<name>.i`.
pub fn column_offsets_path(segment_dir: &Path, name: &str) -> PathBuf {
    segment_dir.join(format!("{}.i", name))
}

/// Length marker for a null string value
pub const NULL_STR_LEN: u32 = u32::MAX;

/// Length marker for a null binary value
pub const NULL_BIN_LEN: u64 = u64::MAX;

/// Dump the writer's metadata snapshot into a segment directory, making the
/// segment self-describing for replay. Rewritten after in-place structural
/// changes.
pub fn dump_metadata(segment_dir: &Path, metadata: &TableMetadata) -> Result<()> {
    let bytes =
        bincode::serialize(metadata).map_err(|e| Error::Serialization(e.to_string()))?;
    let path = segment_dir.join(SEGMENT_META_FILE_NAME);
    let mut file = File::create(&path)?;
    file.write_all(&bytes)?;
    file.sync_data()?;
    Ok(())
}

/// Read a segment's metadata dump.
pub fn read_metadata(segment_dir: &Path) -> Result<TableMetadata> {
    let path = segment_dir.join(SEGMENT_META_FILE_NAME);
    let mut bytes = Vec::new();
    File::open(&path)?.read_to_end(&mut bytes)?;
    bincode::deserialize(&bytes).map_err(|e| {
        Error::Corruption(format!(
            "unreadable segment metadata {}: {}",
            path.display(),
            e
        ))
    })
}

/// Append-only buffer for one column of the active segment.
///
/// Fixed-layout columns are a single values file; var-length columns pair a
/// data file with a `u64` end-offset file carrying a leading zero entry.
/// The null-write behavior is resolved from the `ColumnType` tag,
/// exhaustively.
pub enum ColumnAppender {
    /// Single values file, LE encoding, width from the column type
    Fixed {
        /// Column kind
        ty: ColumnType,
        /// Buffered values file
        file: BufWriter<File>,
        /// Values file path
        path: PathBuf,
        /// Bytes appended so far
        bytes: u64,
    },
    /// Data + offsets file pair
    Var {
        /// Column kind (`Str` or `Bin`)
        ty: ColumnType,
        /// Buffered data file
        data: BufWriter<File>,
        /// Data file path
        data_path: PathBuf,
        /// Data bytes appended so far
        data_bytes: u64,
        /// Buffered offsets file
        offsets: BufWriter<File>,
        /// Offsets file path
        offsets_path: PathBuf,
        /// Rows appended so far
        rows: u64,
    },
}

impl ColumnAppender {
    /// Create the column's files in a segment directory.
    pub fn create(segment_dir: &Path, name: &str, ty: ColumnType) -> Result<Self> {
        if ty.is_var_size() {
            let data_path = column_data_path(segment_dir, name);
            let offsets_path = column_offsets_path(segment_dir, name);
            let data = BufWriter::new(new_file(&data_path)?);
            let mut offsets = BufWriter::new(new_file(&offsets_path)?);
            offsets.write_all(&0u64.to_le_bytes())?;
            Ok(ColumnAppender::Var {
                ty,
                data,
                data_path,
                data_bytes: 0,
                offsets,
                offsets_path,
                rows: 0,
            })
        } else {
            let path = column_data_path(segment_dir, name);
            let file = BufWriter::new(new_file(&path)?);
            Ok(ColumnAppender::Fixed {
                ty,
                file,
                path,
                bytes: 0,
            })
        }
    }

    /// Column kind of this appender.
    pub fn column_type(&self) -> ColumnType {
        match self {
            ColumnAppender::Fixed { ty, .. } | ColumnAppender::Var { ty, .. } => *ty,
        }
    }

    /// Total bytes buffered/written by this column.
    pub fn size_bytes(&self) -> u64 {
        match self {
            ColumnAppender::Fixed { bytes, .. } => *bytes,
            ColumnAppender::Var {
                data_bytes, rows, ..
            } => *data_bytes + (*rows + 1) * 8,
        }
    }

    fn put_fixed(&mut self, expected: ColumnType, raw: &[u8]) -> Result<()> {
        match self {
            ColumnAppender::Fixed { ty, file, bytes, .. } if *ty == expected => {
                file.write_all(raw)?;
                *bytes += raw.len() as u64;
                Ok(())
            }
            _ => Err(Error::InvalidOperation(format!(
                "appender is not a {} column",
                expected.name()
            ))),
        }
    }

    /// Append a boolean value.
    pub fn put_bool(&mut self, value: bool) -> Result<()> {
        self.put_fixed(ColumnType::Bool, &[value as u8])
    }

    /// Append a byte value.
    pub fn put_byte(&mut self, value: i8) -> Result<()> {
        self.put_fixed(ColumnType::Byte, &value.to_le_bytes())
    }

    /// Append a short value.
    pub fn put_short(&mut self, value: i16) -> Result<()> {
        self.put_fixed(ColumnType::Short, &value.to_le_bytes())
    }

    /// Append an int value.
    pub fn put_int(&mut self, value: i32) -> Result<()> {
        self.put_fixed(ColumnType::Int, &value.to_le_bytes())
    }

    /// Append a long value.
    pub fn put_long(&mut self, value: i64) -> Result<()> {
        self.put_fixed(ColumnType::Long, &value.to_le_bytes())
    }

    /// Append a float value.
    pub fn put_float(&mut self, value: f32) -> Result<()> {
        self.put_fixed(ColumnType::Float, &value.to_le_bytes())
    }

    /// Append a double value.
    pub fn put_double(&mut self, value: f64) -> Result<()> {
        self.put_fixed(ColumnType::Double, &value.to_le_bytes())
    }

    /// Append a timestamp value (epoch micros).
    pub fn put_timestamp(&mut self, value: i64) -> Result<()> {
        self.put_fixed(ColumnType::Timestamp, &value.to_le_bytes())
    }

    /// Append a resolved symbol key.
    pub fn put_symbol_key(&mut self, key: i32) -> Result<()> {
        self.put_fixed(ColumnType::Symbol, &key.to_le_bytes())
    }

    /// Append a string value or the null marker.
    pub fn put_str(&mut self, value: Option<&str>) -> Result<()> {
        match self {
            ColumnAppender::Var {
                ty: ColumnType::Str,
                data,
                data_bytes,
                offsets,
                rows,
                ..
            } => {
                match value {
                    Some(s) => {
                        data.write_all(&(s.len() as u32).to_le_bytes())?;
                        data.write_all(s.as_bytes())?;
                        *data_bytes += 4 + s.len() as u64;
                    }
                    None => {
                        data.write_all(&NULL_STR_LEN.to_le_bytes())?;
                        *data_bytes += 4;
                    }
                }
                offsets.write_all(&data_bytes.to_le_bytes())?;
                *rows += 1;
                Ok(())
            }
            _ => Err(Error::InvalidOperation(
                "appender is not a string column".to_string(),
            )),
        }
    }

    /// Append a binary value or the null marker.
    pub fn put_bin(&mut self, value: Option<&[u8]>) -> Result<()> {
        match self {
            ColumnAppender::Var {
                ty: ColumnType::Bin,
                data,
                data_bytes,
                offsets,
                rows,
                ..
            } => {
                match value {
                    Some(b) => {
                        data.write_all(&(b.len() as u64).to_le_bytes())?;
                        data.write_all(b)?;
                        *data_bytes += 8 + b.len() as u64;
                    }
                    None => {
                        data.write_all(&NULL_BIN_LEN.to_le_bytes())?;
                        *data_bytes += 8;
                    }
                }
                offsets.write_all(&data_bytes.to_le_bytes())?;
                *rows += 1;
                Ok(())
            }
            _ => Err(Error::InvalidOperation(
                "appender is not a binary column".to_string(),
            )),
        }
    }

    /// Append this column's type-specific null representation.
    pub fn append_null(&mut self) -> Result<()> {
        match self.column_type() {
            ColumnType::Bool => self.put_bool(false),
            ColumnType::Byte => self.put_byte(0),
            ColumnType::Short => self.put_short(0),
            ColumnType::Int => self.put_int(NULL_INT),
            ColumnType::Long => self.put_long(NULL_LONG),
            ColumnType::Float => self.put_float(f32::NAN),
            ColumnType::Double => self.put_double(f64::NAN),
            ColumnType::Timestamp => self.put_timestamp(NULL_TIMESTAMP),
            ColumnType::Symbol => self.put_symbol_key(SYMBOL_NULL_KEY),
            ColumnType::Str => self.put_str(None),
            ColumnType::Bin => self.put_bin(None),
        }
    }

    /// Flush buffered writes to the OS.
    pub fn flush(&mut self) -> Result<()> {
        match self {
            ColumnAppender::Fixed { file, .. } => file.flush()?,
            ColumnAppender::Var { data, offsets, .. } => {
                data.flush()?;
                offsets.flush()?;
            }
        }
        Ok(())
    }

    /// Flush and fsync; called before a transaction registers with the
    /// sequencer.
    pub fn sync(&mut self) -> Result<()> {
        match self {
            ColumnAppender::Fixed { file, .. } => {
                file.flush()?;
                file.get_mut().sync_data()?;
            }
            ColumnAppender::Var { data, offsets, .. } => {
                data.flush()?;
                data.get_mut().sync_data()?;
                offsets.flush()?;
                offsets.get_mut().sync_data()?;
            }
        }
        Ok(())
    }

    /// Rename the column's physical files in place (rename-column applied to
    /// an active segment). Open handles keep working; only the paths move.
    pub fn rename_files(&mut self, seg_dir: &Path, new_name: &str) -> Result<()> {
        match self {
            ColumnAppender::Fixed { path, .. } => {
                let new_path = column_data_path(seg_dir, new_name);
                std::fs::rename(&*path, &new_path)?;
                *path = new_path;
            }
            ColumnAppender::Var {
                data_path,
                offsets_path,
                ..
            } => {
                let new_data = column_data_path(seg_dir, new_name);
                std::fs::rename(&*data_path, &new_data)?;
                *data_path = new_data;
                let new_offsets = column_offsets_path(seg_dir, new_name);
                std::fs::rename(&*offsets_path, &new_offsets)?;
                *offsets_path = new_offsets;
            }
        }
        Ok(())
    }

    /// Copy the uncommitted row span `[from_row, to_row)` into a fresh
    /// segment directory and return the appender for the new files, leaving
    /// the old files closed behind. Var-length offsets are rebased so the
    /// new segment starts at row offset zero.
    pub fn roll_tail(
        &mut self,
        name: &str,
        from_row: u64,
        to_row: u64,
        new_dir: &Path,
    ) -> Result<ColumnAppender> {
        self.flush()?;
        let span = to_row - from_row;
        match self {
            ColumnAppender::Fixed { ty, path, .. } => {
                let width = ty
                    .fixed_size()
                    .expect("fixed appender holds a fixed-size type") as u64;
                let mut src = File::open(&*path)?;
                src.seek(SeekFrom::Start(from_row * width))?;
                let mut tail = vec![0u8; (span * width) as usize];
                src.read_exact(&mut tail)?;

                let mut new = ColumnAppender::create(new_dir, name, *ty)?;
                if let ColumnAppender::Fixed { file, bytes, .. } = &mut new {
                    file.write_all(&tail)?;
                    *bytes = tail.len() as u64;
                }
                Ok(new)
            }
            ColumnAppender::Var {
                ty,
                data_path,
                offsets_path,
                ..
            } => {
                // Row k of the old segment spans data bytes
                // offsets[k]..offsets[k+1]; entry k sits at byte 8k.
                let mut offsets_file = File::open(&*offsets_path)?;
                offsets_file.seek(SeekFrom::Start(from_row * 8))?;
                let mut offset_bytes = vec![0u8; ((span + 1) * 8) as usize];
                offsets_file.read_exact(&mut offset_bytes)?;
                let offsets: Vec<u64> = offset_bytes
                    .chunks_exact(8)
                    .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
                    .collect();
                let data_start = offsets[0];
                let data_end = offsets[span as usize];

                let mut data_file = File::open(&*data_path)?;
                data_file.seek(SeekFrom::Start(data_start))?;
                let mut tail = vec![0u8; (data_end - data_start) as usize];
                data_file.read_exact(&mut tail)?;

                let mut new = ColumnAppender::create(new_dir, name, *ty)?;
                if let ColumnAppender::Var {
                    data,
                    data_bytes,
                    offsets: new_offsets,
                    rows,
                    ..
                } = &mut new
                {
                    data.write_all(&tail)?;
                    *data_bytes = tail.len() as u64;
                    for end in &offsets[1..] {
                        new_offsets.write_all(&(end - data_start).to_le_bytes())?;
                    }
                    *rows = span;
                }
                Ok(new)
            }
        }
    }
}

fn new_file(path: &Path) -> Result<File> {
    Ok(OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_fixed_roll_tail_copies_exact_span() {
        let dir = tempdir().unwrap();
        let old_dir = dir.path().join("0");
        let new_dir = dir.path().join("1");
        std::fs::create_dir_all(&old_dir).unwrap();
        std::fs::create_dir_all(&new_dir).unwrap();

        let mut appender = ColumnAppender::create(&old_dir, "price", ColumnType::Long).unwrap();
        for v in 0..10i64 {
            appender.put_long(v).unwrap();
        }
        // rows 0..6 committed, 6..10 uncommitted
        let mut new = appender.roll_tail("price", 6, 10, &new_dir).unwrap();
        assert_eq!(new.size_bytes(), 4 * 8);
        new.flush().unwrap();

        let bytes = std::fs::read(column_data_path(&new_dir, "price")).unwrap();
        let values: Vec<i64> = bytes
            .chunks_exact(8)
            .map(|c| i64::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(values, vec![6, 7, 8, 9]);
    }

    #[test]
    fn test_var_roll_tail_rebases_offsets() {
        let dir = tempdir().unwrap();
        let old_dir = dir.path().join("0");
        let new_dir = dir.path().join("1");
        std::fs::create_dir_all(&old_dir).unwrap();
        std::fs::create_dir_all(&new_dir).unwrap();

        let mut appender = ColumnAppender::create(&old_dir, "note", ColumnType::Str).unwrap();
        appender.put_str(Some("committed")).unwrap();
        appender.put_str(Some("carried-1")).unwrap();
        appender.put_str(None).unwrap();

        let mut new = appender.roll_tail("note", 1, 3, &new_dir).unwrap();
        new.flush().unwrap();

        let offsets = std::fs::read(column_offsets_path(&new_dir, "note")).unwrap();
        let entries: Vec<u64> = offsets
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
            .collect();
        // leading zero, end of "carried-1" (4 + 9), end of null marker (+4)
        assert_eq!(entries, vec![0, 13, 17]);

        let data = std::fs::read(column_data_path(&new_dir, "note")).unwrap();
        assert_eq!(&data[4..13], b"carried-1");
        assert_eq!(
            u32::from_le_bytes(data[13..17].try_into().unwrap()),
            NULL_STR_LEN
        );
    }

    #[test]
    fn test_metadata_round_trip() {
        use tessera_core::ColumnMeta;
        let dir = tempdir().unwrap();
        let meta = TableMetadata::new(
            "trades",
            vec![
                ColumnMeta::new("ts", ColumnType::Timestamp),
                ColumnMeta::new("price", ColumnType::Double),
            ],
            Some(0),
        )
        .unwrap();
        dump_metadata(dir.path(), &meta).unwrap();
        assert_eq!(read_metadata(dir.path()).unwrap(), meta);
    }

    #[test]
    fn test_type_mismatch_is_an_error() {
        let dir = tempdir().unwrap();
        let mut appender = ColumnAppender::create(dir.path(), "x", ColumnType::Int).unwrap();
        assert!(appender.put_long(1).is_err());
        assert!(appender.put_str(Some("y")).is_err());
    }
}
