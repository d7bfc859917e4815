//! The WAL writer: one append stream for one table.
//!
//! A writer buffers rows into the active segment, tracks per-transaction
//! timestamp bounds and the out-of-order flag, and negotiates global
//! transaction numbers with the sequencer. Commits and structural changes
//! race on the same structure-version axis; the loser of a race pulls the
//! outstanding changes from the structure log, applies them locally
//! (rolling uncommitted rows into a fresh segment when needed) and retries.
//!
//! A writer owns its segment files exclusively, proven by a lock file in
//! the writer directory. Distinct writers never collide.

use crate::config::WalConfig;
use crate::events::{DataEvent, EventWriter};
use crate::segment::{self, ColumnAppender, WAL_LOCK_FILE_NAME};
use crate::sequencer::{TableSequencer, TxnAssignment};
use crate::symbols::{self, SymbolDelta, SymbolOverlay, SymbolSnapshot};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tessera_core::{AlterOp, ColumnType, Error, Result, TableMetadata, SYMBOL_NULL_KEY};
use tracing::{debug, error, info, warn};

struct SymbolColumn {
    snapshot: SymbolSnapshot,
    overlay: SymbolOverlay,
}

impl SymbolColumn {
    fn new_empty() -> Self {
        SymbolColumn {
            snapshot: SymbolSnapshot::empty(),
            overlay: SymbolOverlay::new(0),
        }
    }
}

/// WAL writer for one table.
pub struct WalWriter {
    table_name: String,
    wal_dir: PathBuf,
    writer_id: u32,
    sequencer: Arc<TableSequencer>,
    config: WalConfig,

    /// Private metadata snapshot, versioned by its structure version
    metadata: TableMetadata,
    /// One appender per metadata column, same order
    columns: Vec<ColumnAppender>,
    /// Symbol state per metadata column, `None` for non-symbol columns
    symbols: Vec<Option<SymbolColumn>>,
    /// Event file of the active segment
    events: Option<EventWriter>,

    segment_id: u64,
    segment_opened_at: Instant,
    /// Rows appended into the active segment
    row_count: u64,
    /// Rows committed so far; `row_count - committed_row_count` is the
    /// transient, uncommitted tail
    committed_row_count: u64,
    /// Last row index each column was set for, -1 when never
    row_marks: Vec<i64>,

    txn_min_timestamp: i64,
    txn_max_timestamp: i64,
    txn_out_of_order: bool,

    roll_on_next_row: bool,
    last_segment_txn: Option<u64>,
    lock_path: PathBuf,
    open: bool,
}

impl std::fmt::Debug for WalWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalWriter")
            .field("table_name", &self.table_name)
            .field("wal_dir", &self.wal_dir)
            .field("writer_id", &self.writer_id)
            .field("segment_id", &self.segment_id)
            .field("row_count", &self.row_count)
            .field("committed_row_count", &self.committed_row_count)
            .field("open", &self.open)
            .finish_non_exhaustive()
    }
}

impl WalWriter {
    /// Open a new append stream for the sequencer's table under
    /// `table_dir`.
    ///
    /// Acquires a fresh writer id, copies the table's current metadata into
    /// a private snapshot, creates the writer directory with its
    /// exclusivity lock, hard-links the base symbol snapshots and opens the
    /// first segment. Failing to acquire the lock is fatal to the open
    /// call, not retried.
    pub fn open(
        table_dir: impl Into<PathBuf>,
        sequencer: Arc<TableSequencer>,
        config: WalConfig,
    ) -> Result<Self> {
        let table_dir = table_dir.into();
        let table_name = sequencer.table_name().to_string();
        let writer_id = sequencer.next_writer_id();
        let metadata = sequencer.metadata();

        let wal_dir = segment::wal_dir(&table_dir, writer_id);
        fs::create_dir_all(&wal_dir)?;

        let lock_path = wal_dir.join(WAL_LOCK_FILE_NAME);
        match OpenOptions::new().write(true).create_new(true).open(&lock_path) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(Error::WalLocked {
                    table: table_name,
                    wal_id: writer_id,
                });
            }
            Err(e) => return Err(e.into()),
        }

        match Self::open_locked(&table_dir, sequencer, config, table_name, writer_id, wal_dir, metadata) {
            Ok(writer) => Ok(writer),
            Err(e) => {
                // do not leave a stale lock behind a failed open
                let _ = fs::remove_file(&lock_path);
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn open_locked(
        table_dir: &std::path::Path,
        sequencer: Arc<TableSequencer>,
        config: WalConfig,
        table_name: String,
        writer_id: u32,
        wal_dir: PathBuf,
        metadata: TableMetadata,
    ) -> Result<Self> {
        let lock_path = wal_dir.join(WAL_LOCK_FILE_NAME);
        let mut symbols = Vec::with_capacity(metadata.column_count());
        for col in metadata.columns() {
            if col.column_type == ColumnType::Symbol {
                let base_path = symbols::symbol_file_path(&table_dir, &col.name);
                let linked_path = symbols::symbol_file_path(&wal_dir, &col.name);
                let snapshot = if base_path.exists() {
                    fs::hard_link(&base_path, &linked_path)?;
                    SymbolSnapshot::load(&linked_path)?
                } else {
                    SymbolSnapshot::empty()
                };
                let overlay = SymbolOverlay::new(snapshot.count());
                symbols.push(Some(SymbolColumn { snapshot, overlay }));
            } else {
                symbols.push(None);
            }
        }

        let mut writer = WalWriter {
            table_name,
            wal_dir,
            writer_id,
            sequencer,
            config,
            metadata,
            columns: Vec::new(),
            symbols,
            events: None,
            segment_id: 0,
            segment_opened_at: Instant::now(),
            row_count: 0,
            committed_row_count: 0,
            row_marks: Vec::new(),
            txn_min_timestamp: i64::MAX,
            txn_max_timestamp: i64::MIN,
            txn_out_of_order: false,
            roll_on_next_row: false,
            last_segment_txn: None,
            lock_path,
            open: true,
        };
        writer.open_segment_files()?;
        info!(
            table = %writer.table_name,
            wal = writer.writer_id,
            "opened wal writer"
        );
        Ok(writer)
    }

    /// Table this writer appends to.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Sequencer-issued writer id.
    pub fn writer_id(&self) -> u32 {
        self.writer_id
    }

    /// Id of the active segment.
    pub fn segment_id(&self) -> u64 {
        self.segment_id
    }

    /// Rows appended into the active segment.
    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    /// Size of the transient, uncommitted tail.
    pub fn transient_row_count(&self) -> u64 {
        self.row_count - self.committed_row_count
    }

    /// Structure version of the private metadata snapshot.
    pub fn structure_version(&self) -> u64 {
        self.metadata.structure_version()
    }

    /// The private metadata snapshot.
    pub fn metadata(&self) -> &TableMetadata {
        &self.metadata
    }

    /// Segment-local transaction number of the last committed transaction.
    pub fn last_segment_txn(&self) -> Option<u64> {
        self.last_segment_txn
    }

    /// Start a row bound to the active segment.
    ///
    /// Performs a roll first if one was deferred from the previous commit.
    /// The designated timestamp column, if the table has one, is populated
    /// from `timestamp` here.
    pub fn new_row(&mut self, timestamp: i64) -> Result<Row<'_>> {
        if !self.open {
            return Err(Error::InvalidOperation("wal writer is closed".to_string()));
        }
        if self.roll_on_next_row {
            self.roll_on_next_row = false;
            self.roll_segment()?;
        }
        if let Some(index) = self.metadata.timestamp_index() {
            self.columns[index].put_timestamp(timestamp)?;
            self.mark_column_set(index)?;
        }
        Ok(Row {
            writer: self,
            timestamp,
        })
    }

    /// Commit the transient row range as one transaction.
    ///
    /// Returns `None` when no rows are pending. Otherwise the committed row
    /// range and timestamp bounds go into the segment's event log, the
    /// column and event files are flushed durably, and the sequencer is
    /// asked for the next global transaction number. A structure-version
    /// race makes the writer pull and apply all outstanding structural
    /// changes, then retry; the loop is mandatory. On failure the
    /// committed-so-far counters stay put: already-flushed bytes become
    /// part of the next transaction's uncommitted tail.
    pub fn commit(&mut self) -> Result<Option<u64>> {
        if self.transient_row_count() == 0 {
            return Ok(None);
        }
        let mut segment_txn = self.append_data_event()?;
        let txn = loop {
            match self.sequencer.next_txn(
                self.writer_id,
                self.metadata.structure_version(),
                self.segment_id,
                segment_txn,
            ) {
                TxnAssignment::Assigned(txn) => break txn,
                TxnAssignment::NeedsStructureSync => {
                    self.apply_structure_changes()?;
                    // the sync may have moved the pending rows to a fresh
                    // segment; frame them again where they now live
                    segment_txn = self.append_data_event()?;
                }
            }
        };
        self.last_segment_txn = Some(segment_txn);
        debug!(
            table = %self.table_name,
            wal = self.writer_id,
            txn,
            rows = self.transient_row_count(),
            "committed wal txn"
        );
        self.committed_row_count = self.row_count;
        self.reset_txn_tracking();
        self.arm_roll_if_needed();
        Ok(Some(txn))
    }

    /// Register a schema-only change with the sequencer against the
    /// writer's current structure version, resolving version races by
    /// catching up and retrying. Returns the global transaction number of
    /// the change.
    pub fn apply_alter(&mut self, op: &AlterOp) -> Result<u64> {
        loop {
            match self
                .sequencer
                .next_structure_txn(self.metadata.structure_version(), op)?
            {
                TxnAssignment::Assigned(txn) => {
                    // advance the local snapshot through the structure log,
                    // the same path any other writer takes
                    self.apply_structure_changes()?;
                    return Ok(txn);
                }
                TxnAssignment::NeedsStructureSync => self.apply_structure_changes()?,
            }
        }
    }

    /// Row-level updates do not go through the WAL writer.
    pub fn apply_update(&mut self) -> Result<u64> {
        Err(Error::Unsupported(
            "row-level updates are not supported by the wal writer".to_string(),
        ))
    }

    /// Close the active segment and open a fresh one, committing any
    /// pending rows first. Returns the row count of the closed segment.
    pub fn roll_segment(&mut self) -> Result<u64> {
        self.commit()?;
        let rolled = self.row_count;
        self.switch_to_new_segment()?;
        Ok(rolled)
    }

    /// Commit pending rows (best effort), release buffers and the
    /// exclusivity lock. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        if self.transient_row_count() > 0 {
            if let Err(e) = self.commit() {
                error!(
                    table = %self.table_name,
                    wal = self.writer_id,
                    error = %e,
                    "failed to commit pending rows on close"
                );
            }
        }
        self.open = false;
        for column in &mut self.columns {
            let _ = column.flush();
        }
        self.columns.clear();
        self.events = None;
        if let Err(e) = fs::remove_file(&self.lock_path) {
            warn!(
                table = %self.table_name,
                wal = self.writer_id,
                error = %e,
                "failed to remove wal lock file"
            );
        }
        info!(table = %self.table_name, wal = self.writer_id, "closed wal writer");
        Ok(())
    }

    fn open_segment_files(&mut self) -> Result<()> {
        let seg_dir = segment::segment_dir(&self.wal_dir, self.segment_id);
        fs::create_dir_all(&seg_dir)?;
        let mut columns = Vec::with_capacity(self.metadata.column_count());
        for col in self.metadata.columns() {
            columns.push(ColumnAppender::create(&seg_dir, &col.name, col.column_type)?);
        }
        self.columns = columns;
        self.row_marks = vec![-1; self.metadata.column_count()];
        self.events = Some(EventWriter::create(&seg_dir)?);
        segment::dump_metadata(&seg_dir, &self.metadata)?;
        self.row_count = 0;
        self.committed_row_count = 0;
        self.roll_on_next_row = false;
        self.segment_opened_at = Instant::now();
        debug!(
            table = %self.table_name,
            wal = self.writer_id,
            segment = self.segment_id,
            "opened wal segment"
        );
        Ok(())
    }

    fn switch_to_new_segment(&mut self) -> Result<()> {
        self.segment_id += 1;
        self.open_segment_files()
    }

    /// Write (or rewrite) the data event record framing the transient row
    /// range, flushing column files durably first.
    fn append_data_event(&mut self) -> Result<u64> {
        for column in &mut self.columns {
            column.sync()?;
        }
        let event = DataEvent {
            start_row: self.committed_row_count,
            end_row: self.row_count,
            min_timestamp: self.txn_min_timestamp,
            max_timestamp: self.txn_max_timestamp,
            out_of_order: self.txn_out_of_order,
            symbol_deltas: self.symbol_deltas(),
        };
        let events = self
            .events
            .as_mut()
            .ok_or_else(|| Error::InvalidOperation("wal writer is closed".to_string()))?;
        let segment_txn = events.append_data(&event)?;
        events.sync()?;
        Ok(segment_txn)
    }

    fn symbol_deltas(&self) -> Vec<SymbolDelta> {
        self.symbols
            .iter()
            .enumerate()
            .filter_map(|(index, state)| match state {
                Some(sym) if !sym.overlay.is_empty() => Some(sym.overlay.delta(index as u32)),
                _ => None,
            })
            .collect()
    }

    /// Pull every outstanding structural change from the sequencer's log
    /// and apply it to the local snapshot, in version order.
    fn apply_structure_changes(&mut self) -> Result<()> {
        let mut cursor = self
            .sequencer
            .structure_change_cursor(self.metadata.structure_version());
        while let Some((version, op)) = cursor.next() {
            let before = self.metadata.structure_version();
            if version != before + 1 {
                return Err(Error::StructureVersionMismatch {
                    table: self.table_name.clone(),
                    current: before,
                    actual: version,
                });
            }
            self.apply_structure_change_locally(&op)?;
            if self.metadata.structure_version() != version {
                return Err(Error::InvalidOperation(format!(
                    "structure version did not advance applying '{}'",
                    op
                )));
            }
        }
        Ok(())
    }

    fn apply_structure_change_locally(&mut self, op: &AlterOp) -> Result<()> {
        if self.transient_row_count() > 0 && self.committed_row_count > 0 {
            // uncommitted rows must survive the change; committed rows stay
            // sealed behind in the old segment
            self.roll_uncommitted_to_new_segment()?;
        }
        if self.committed_row_count > 0 {
            // only committed rows here: seal the segment under the old
            // layout and continue in a fresh one
            self.apply_op_to_state(op)?;
            self.switch_to_new_segment()?;
        } else {
            self.apply_op_in_place(op)?;
        }
        if let Some(events) = self.events.as_mut() {
            events.append_structure(self.metadata.structure_version(), op)?;
        }
        Ok(())
    }

    /// Apply a change to metadata and symbol bookkeeping only; appenders
    /// are rebuilt by the segment switch that follows.
    fn apply_op_to_state(&mut self, op: &AlterOp) -> Result<()> {
        match op {
            AlterOp::AddColumn { column_type, .. } => {
                self.metadata.apply_alter(op)?;
                self.symbols.push(match column_type {
                    ColumnType::Symbol => Some(SymbolColumn::new_empty()),
                    _ => None,
                });
            }
            AlterOp::RemoveColumn { name } => {
                let index = self.column_index(name)?;
                self.metadata.apply_alter(op)?;
                self.symbols.remove(index);
            }
            AlterOp::RenameColumn { name, new_name } => {
                self.metadata.apply_alter(op)?;
                self.link_symbol_snapshot(name, new_name)?;
            }
        }
        Ok(())
    }

    /// Apply a change to the active segment, which holds no committed rows.
    fn apply_op_in_place(&mut self, op: &AlterOp) -> Result<()> {
        let seg_dir = segment::segment_dir(&self.wal_dir, self.segment_id);
        match op {
            AlterOp::AddColumn { name, column_type } => {
                self.metadata.apply_alter(op)?;
                // a column removed earlier in this segment may have left
                // files behind; they are unreferenced, clear the way
                let stale_data = segment::column_data_path(&seg_dir, name);
                if stale_data.exists() {
                    fs::remove_file(stale_data)?;
                }
                let stale_offsets = segment::column_offsets_path(&seg_dir, name);
                if stale_offsets.exists() {
                    fs::remove_file(stale_offsets)?;
                }
                let mut appender = ColumnAppender::create(&seg_dir, name, *column_type)?;
                for _ in 0..self.row_count {
                    appender.append_null()?;
                }
                self.columns.push(appender);
                self.row_marks.push(-1);
                self.symbols.push(match column_type {
                    ColumnType::Symbol => Some(SymbolColumn::new_empty()),
                    _ => None,
                });
                info!(
                    table = %self.table_name,
                    wal = self.writer_id,
                    segment = self.segment_id,
                    column = %name,
                    "added column to wal segment"
                );
            }
            AlterOp::RemoveColumn { name } => {
                let index = self.column_index(name)?;
                self.metadata.apply_alter(op)?;
                self.columns.remove(index);
                self.row_marks.remove(index);
                self.symbols.remove(index);
                info!(
                    table = %self.table_name,
                    wal = self.writer_id,
                    segment = self.segment_id,
                    column = %name,
                    "removed column from wal segment"
                );
            }
            AlterOp::RenameColumn { name, new_name } => {
                let index = self.column_index(name)?;
                self.metadata.apply_alter(op)?;
                self.columns[index].rename_files(&seg_dir, new_name)?;
                self.link_symbol_snapshot(name, new_name)?;
            }
        }
        segment::dump_metadata(&seg_dir, &self.metadata)
    }

    /// Sealed segments keep referring to the old snapshot name; renames add
    /// a second hard link instead of moving the file.
    fn link_symbol_snapshot(&self, name: &str, new_name: &str) -> Result<()> {
        let old_path = symbols::symbol_file_path(&self.wal_dir, name);
        if old_path.exists() {
            fs::hard_link(&old_path, symbols::symbol_file_path(&self.wal_dir, new_name))?;
        }
        Ok(())
    }

    /// Carry the uncommitted row span into a fresh segment, rebasing row
    /// offsets to zero. Segments stay self-contained: a consumer never
    /// reads one transaction across two segment directories.
    fn roll_uncommitted_to_new_segment(&mut self) -> Result<()> {
        let from = self.committed_row_count;
        let to = self.row_count;
        let new_id = self.segment_id + 1;
        let new_dir = segment::segment_dir(&self.wal_dir, new_id);
        fs::create_dir_all(&new_dir)?;
        info!(
            table = %self.table_name,
            wal = self.writer_id,
            new_segment = new_id,
            uncommitted_rows = to - from,
            "rolling uncommitted rows to new segment"
        );
        let names: Vec<String> = self
            .metadata
            .columns()
            .iter()
            .map(|c| c.name.clone())
            .collect();
        for (index, name) in names.iter().enumerate() {
            let rolled = self.columns[index].roll_tail(name, from, to, &new_dir)?;
            self.columns[index] = rolled;
        }
        self.events = Some(EventWriter::create(&new_dir)?);
        segment::dump_metadata(&new_dir, &self.metadata)?;
        self.segment_id = new_id;
        self.row_count = to - from;
        self.committed_row_count = 0;
        for mark in &mut self.row_marks {
            *mark = -1;
        }
        self.segment_opened_at = Instant::now();
        Ok(())
    }

    fn reset_txn_tracking(&mut self) {
        self.txn_min_timestamp = i64::MAX;
        self.txn_max_timestamp = i64::MIN;
        self.txn_out_of_order = false;
    }

    fn arm_roll_if_needed(&mut self) {
        let bytes: u64 = self.columns.iter().map(|c| c.size_bytes()).sum();
        if self.config.should_roll(
            bytes,
            self.row_count,
            self.segment_opened_at.elapsed(),
        ) {
            self.roll_on_next_row = true;
        }
    }

    fn column_index(&self, name: &str) -> Result<usize> {
        self.metadata
            .column_index(name)
            .ok_or_else(|| Error::ColumnNotFound(name.to_string()))
    }

    fn check_column(&self, index: usize, value_type: ColumnType) -> Result<()> {
        if index >= self.metadata.column_count() {
            return Err(Error::InvalidOperation(format!(
                "column index {} out of range",
                index
            )));
        }
        let col = self.metadata.column(index);
        if col.column_type != value_type {
            return Err(Error::ColumnTypeMismatch {
                column: col.name.clone(),
                expected: col.column_type.name(),
                got: value_type.name(),
            });
        }
        Ok(())
    }

    fn mark_column_set(&mut self, index: usize) -> Result<()> {
        if self.row_marks[index] == self.row_count as i64 {
            return Err(Error::InvalidOperation(format!(
                "column '{}' already set for this row",
                self.metadata.column(index).name
            )));
        }
        self.row_marks[index] = self.row_count as i64;
        Ok(())
    }
}

impl Drop for WalWriter {
    fn drop(&mut self) {
        if self.open {
            let _ = self.close();
        }
    }
}

/// Builder for one row, bound to the writer's active segment.
///
/// Columns not set explicitly receive their type-specific null on
/// [`Row::append`]. [`Row::cancel`] discards the in-progress row by rolling
/// the segment — coarse, but the rows involved are uncommitted.
#[derive(Debug)]
pub struct Row<'a> {
    writer: &'a mut WalWriter,
    timestamp: i64,
}

impl Row<'_> {
    /// Set a boolean column.
    pub fn put_bool(&mut self, column: usize, value: bool) -> Result<&mut Self> {
        self.writer.check_column(column, ColumnType::Bool)?;
        self.writer.columns[column].put_bool(value)?;
        self.writer.mark_column_set(column)?;
        Ok(self)
    }

    /// Set a byte column.
    pub fn put_byte(&mut self, column: usize, value: i8) -> Result<&mut Self> {
        self.writer.check_column(column, ColumnType::Byte)?;
        self.writer.columns[column].put_byte(value)?;
        self.writer.mark_column_set(column)?;
        Ok(self)
    }

    /// Set a short column.
    pub fn put_short(&mut self, column: usize, value: i16) -> Result<&mut Self> {
        self.writer.check_column(column, ColumnType::Short)?;
        self.writer.columns[column].put_short(value)?;
        self.writer.mark_column_set(column)?;
        Ok(self)
    }

    /// Set an int column.
    pub fn put_int(&mut self, column: usize, value: i32) -> Result<&mut Self> {
        self.writer.check_column(column, ColumnType::Int)?;
        self.writer.columns[column].put_int(value)?;
        self.writer.mark_column_set(column)?;
        Ok(self)
    }

    /// Set a long column.
    pub fn put_long(&mut self, column: usize, value: i64) -> Result<&mut Self> {
        self.writer.check_column(column, ColumnType::Long)?;
        self.writer.columns[column].put_long(value)?;
        self.writer.mark_column_set(column)?;
        Ok(self)
    }

    /// Set a float column.
    pub fn put_float(&mut self, column: usize, value: f32) -> Result<&mut Self> {
        self.writer.check_column(column, ColumnType::Float)?;
        self.writer.columns[column].put_float(value)?;
        self.writer.mark_column_set(column)?;
        Ok(self)
    }

    /// Set a double column.
    pub fn put_double(&mut self, column: usize, value: f64) -> Result<&mut Self> {
        self.writer.check_column(column, ColumnType::Double)?;
        self.writer.columns[column].put_double(value)?;
        self.writer.mark_column_set(column)?;
        Ok(self)
    }

    /// Set a non-designated timestamp column.
    pub fn put_timestamp(&mut self, column: usize, value: i64) -> Result<&mut Self> {
        self.writer.check_column(column, ColumnType::Timestamp)?;
        self.writer.columns[column].put_timestamp(value)?;
        self.writer.mark_column_set(column)?;
        Ok(self)
    }

    /// Set a string column; `None` writes the null marker.
    pub fn put_str(&mut self, column: usize, value: Option<&str>) -> Result<&mut Self> {
        self.writer.check_column(column, ColumnType::Str)?;
        self.writer.columns[column].put_str(value)?;
        self.writer.mark_column_set(column)?;
        Ok(self)
    }

    /// Set a binary column; `None` writes the null marker.
    pub fn put_bin(&mut self, column: usize, value: Option<&[u8]>) -> Result<&mut Self> {
        self.writer.check_column(column, ColumnType::Bin)?;
        self.writer.columns[column].put_bin(value)?;
        self.writer.mark_column_set(column)?;
        Ok(self)
    }

    /// Set a symbol column. A value absent from both the base snapshot and
    /// the overlay is interned into the overlay with the next sequential
    /// key; null maps to the null-key sentinel and is never interned.
    pub fn put_symbol(&mut self, column: usize, value: Option<&str>) -> Result<&mut Self> {
        self.writer.check_column(column, ColumnType::Symbol)?;
        let key = match value {
            None => SYMBOL_NULL_KEY,
            Some(v) => {
                let sym = self.writer.symbols[column].as_mut().ok_or_else(|| {
                    Error::InvalidOperation(format!(
                        "symbol state missing for column {}",
                        column
                    ))
                })?;
                sym.overlay.resolve(v, &sym.snapshot) as i32
            }
        };
        self.writer.columns[column].put_symbol_key(key)?;
        self.writer.mark_column_set(column)?;
        Ok(self)
    }

    /// Finish the row: null-fill unset columns, fold the row timestamp into
    /// the transaction's bounds and out-of-order flag, advance the row
    /// counter.
    pub fn append(self) -> Result<()> {
        let writer = self.writer;
        for index in 0..writer.columns.len() {
            if writer.row_marks[index] < writer.row_count as i64 {
                writer.columns[index].append_null()?;
            }
        }
        let ts = self.timestamp;
        if ts > writer.txn_max_timestamp {
            writer.txn_max_timestamp = ts;
        } else {
            writer.txn_out_of_order = writer.txn_max_timestamp != ts;
        }
        if ts < writer.txn_min_timestamp {
            writer.txn_min_timestamp = ts;
        }
        writer.row_count += 1;
        Ok(())
    }

    /// Discard the in-progress row by rolling the segment.
    pub fn cancel(self) -> Result<()> {
        self.writer.roll_segment()?;
        Ok(())
    }
}
