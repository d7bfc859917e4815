//! The sequencer: shared authority assigning global, strictly ordered
//! transaction numbers per table across all of its WAL writers.
//!
//! Assignment is linearizable: one lock acquisition per table covers the
//! structure-version check and the record append, so no caller ever
//! observes partial state. Structure-version races are surfaced as
//! [`TxnAssignment::NeedsStructureSync`] — a result, not an error — forcing
//! callers to resolve the race at the call site and retry.

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tessera_core::{AlterOp, Error, Result, TableMetadata};
use tracing::{debug, info};

/// Reserved writer id marking a sequencer record as a structural change
/// rather than data. For such records the segment-local transaction field
/// carries the new structure version.
pub const METADATA_WRITER_ID: u32 = 0;

/// One record of a table's global transaction log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeqTxnRecord {
    /// Global transaction number, gap-free from 1
    pub txn: u64,
    /// Writer that committed, or [`METADATA_WRITER_ID`]
    pub writer_id: u32,
    /// Segment the transaction lives in (data records only)
    pub segment_id: u64,
    /// Segment-local transaction number; the new structure version for
    /// structural records
    pub segment_txn: u64,
    /// Table structure version at commit time
    pub structure_version: u64,
}

impl SeqTxnRecord {
    /// True when this record denotes a structural change.
    pub fn is_structure_change(&self) -> bool {
        self.writer_id == METADATA_WRITER_ID
    }
}

/// Outcome of a transaction-number request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnAssignment {
    /// The global transaction number was assigned
    Assigned(u64),
    /// The caller's structure version is stale; it must pull and apply
    /// outstanding structural changes, then retry. Nothing was assigned.
    NeedsStructureSync,
}

/// Commit notification published to the apply side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxnNotification {
    /// Registry-assigned table id
    pub table_id: u32,
    /// Table name
    pub table_name: String,
    /// Global transaction number just committed
    pub txn: u64,
}

/// Sink for commit notifications; at-least-once, duplicates allowed.
pub trait TxnNotifier: Send + Sync {
    /// Called after a global transaction was assigned.
    fn txn_committed(&self, notification: TxnNotification);
}

/// Forward cursor over a snapshot of a table's transaction records.
///
/// Exhaustion means "caught up with the tail observed at snapshot time",
/// never end-of-stream: more records may exist by the time `next` returns
/// `None`.
#[derive(Debug)]
pub struct TxnCursor {
    records: Vec<SeqTxnRecord>,
    pos: usize,
}

impl TxnCursor {
    /// Next record, in global transaction order.
    pub fn next(&mut self) -> Option<SeqTxnRecord> {
        let record = self.records.get(self.pos).copied();
        if record.is_some() {
            self.pos += 1;
        }
        record
    }
}

/// Forward cursor over schema-change operations newer than a given
/// structure version. Owned and reset explicitly by the caller.
#[derive(Debug)]
pub struct StructureChangeCursor {
    entries: Vec<(u64, AlterOp)>,
    pos: usize,
}

impl StructureChangeCursor {
    /// Next `(version, op)` pair.
    pub fn next(&mut self) -> Option<(u64, AlterOp)> {
        let entry = self.entries.get(self.pos).cloned();
        if entry.is_some() {
            self.pos += 1;
        }
        entry
    }

    /// Rewind to the start of the snapshot.
    pub fn reset(&mut self) {
        self.pos = 0;
    }
}

struct SeqState {
    metadata: TableMetadata,
    records: Vec<SeqTxnRecord>,
    structure_log: Vec<(u64, AlterOp)>,
    next_writer_id: u32,
}

/// Per-table sequencer: writer-id issuance, canonical metadata, the global
/// transaction log and the structure-change log.
pub struct TableSequencer {
    table_name: String,
    table_id: u32,
    state: Mutex<SeqState>,
    notifier: RwLock<Option<Arc<dyn TxnNotifier>>>,
}

impl TableSequencer {
    fn new(table_id: u32, metadata: TableMetadata) -> Self {
        TableSequencer {
            table_name: metadata.table_name().to_string(),
            table_id,
            state: Mutex::new(SeqState {
                metadata,
                records: Vec::new(),
                structure_log: Vec::new(),
                next_writer_id: METADATA_WRITER_ID + 1,
            }),
            notifier: RwLock::new(None),
        }
    }

    /// Table name.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Registry-assigned table id.
    pub fn table_id(&self) -> u32 {
        self.table_id
    }

    /// Issue a fresh writer id, unique for this table.
    pub fn next_writer_id(&self) -> u32 {
        let mut state = self.state.lock();
        let id = state.next_writer_id;
        state.next_writer_id += 1;
        id
    }

    /// Snapshot of the canonical table metadata, for writer open.
    pub fn metadata(&self) -> TableMetadata {
        self.state.lock().metadata.clone()
    }

    /// Current canonical structure version.
    pub fn structure_version(&self) -> u64 {
        self.state.lock().metadata.structure_version()
    }

    /// Highest assigned global transaction number (0 when none).
    pub fn last_txn(&self) -> u64 {
        self.state.lock().records.len() as u64
    }

    /// Assign the next global transaction to a committed data batch, iff
    /// the caller's structure version is current.
    pub fn next_txn(
        &self,
        writer_id: u32,
        structure_version: u64,
        segment_id: u64,
        segment_txn: u64,
    ) -> TxnAssignment {
        let txn = {
            let mut state = self.state.lock();
            if state.metadata.structure_version() != structure_version {
                return TxnAssignment::NeedsStructureSync;
            }
            let txn = state.records.len() as u64 + 1;
            state.records.push(SeqTxnRecord {
                txn,
                writer_id,
                segment_id,
                segment_txn,
                structure_version,
            });
            txn
        };
        debug!(
            table = %self.table_name,
            txn,
            wal = writer_id,
            segment = segment_id,
            "assigned data txn"
        );
        self.notify(txn);
        TxnAssignment::Assigned(txn)
    }

    /// Register a structural change, iff the caller's structure version is
    /// current. The change is validated against the canonical metadata
    /// before anything is recorded; the version bump and the record append
    /// are atomic.
    pub fn next_structure_txn(
        &self,
        structure_version: u64,
        op: &AlterOp,
    ) -> Result<TxnAssignment> {
        let (txn, new_version) = {
            let mut state = self.state.lock();
            if state.metadata.structure_version() != structure_version {
                return Ok(TxnAssignment::NeedsStructureSync);
            }
            state.metadata.apply_alter(op)?;
            let new_version = state.metadata.structure_version();
            let txn = state.records.len() as u64 + 1;
            state.records.push(SeqTxnRecord {
                txn,
                writer_id: METADATA_WRITER_ID,
                segment_id: 0,
                segment_txn: new_version,
                structure_version: new_version,
            });
            state.structure_log.push((new_version, op.clone()));
            (txn, new_version)
        };
        info!(
            table = %self.table_name,
            txn,
            version = new_version,
            op = %op,
            "registered structure change"
        );
        self.notify(txn);
        Ok(TxnAssignment::Assigned(txn))
    }

    /// Cursor over records with txn strictly greater than `from_txn`.
    pub fn txn_cursor(&self, from_txn: u64) -> TxnCursor {
        let state = self.state.lock();
        let start = (from_txn as usize).min(state.records.len());
        TxnCursor {
            records: state.records[start..].to_vec(),
            pos: 0,
        }
    }

    /// Cursor over schema changes strictly newer than `from_version`.
    pub fn structure_change_cursor(&self, from_version: u64) -> StructureChangeCursor {
        let state = self.state.lock();
        StructureChangeCursor {
            entries: state
                .structure_log
                .iter()
                .filter(|(version, _)| *version > from_version)
                .cloned()
                .collect(),
            pos: 0,
        }
    }

    fn set_notifier(&self, notifier: Arc<dyn TxnNotifier>) {
        *self.notifier.write() = Some(notifier);
    }

    fn notify(&self, txn: u64) {
        if let Some(notifier) = self.notifier.read().as_ref() {
            notifier.txn_committed(TxnNotification {
                table_id: self.table_id,
                table_name: self.table_name.clone(),
                txn,
            });
        }
    }
}

/// Registry of per-table sequencers.
pub struct SequencerRegistry {
    tables: DashMap<String, Arc<TableSequencer>>,
    next_table_id: AtomicU32,
    notifier: RwLock<Option<Arc<dyn TxnNotifier>>>,
}

impl Default for SequencerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SequencerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        SequencerRegistry {
            tables: DashMap::new(),
            next_table_id: AtomicU32::new(1),
            notifier: RwLock::new(None),
        }
    }

    /// Attach the commit-notification sink, applied to existing and future
    /// tables.
    pub fn set_notifier(&self, notifier: Arc<dyn TxnNotifier>) {
        for entry in self.tables.iter() {
            entry.value().set_notifier(Arc::clone(&notifier));
        }
        *self.notifier.write() = Some(notifier);
    }

    /// Register a table at structure version 0 of the given metadata.
    pub fn create_table(&self, metadata: TableMetadata) -> Result<Arc<TableSequencer>> {
        let name = metadata.table_name().to_string();
        if self.tables.contains_key(&name) {
            return Err(Error::InvalidOperation(format!(
                "table already registered: {}",
                name
            )));
        }
        let table_id = self.next_table_id.fetch_add(1, Ordering::Relaxed);
        let sequencer = Arc::new(TableSequencer::new(table_id, metadata));
        if let Some(notifier) = self.notifier.read().as_ref() {
            sequencer.set_notifier(Arc::clone(notifier));
        }
        info!(table = %name, table_id, "registered table with sequencer");
        self.tables.insert(name, Arc::clone(&sequencer));
        Ok(sequencer)
    }

    /// Sequencer of a registered table.
    pub fn get(&self, table: &str) -> Result<Arc<TableSequencer>> {
        self.tables
            .get(table)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::TableNotFound(table.to_string()))
    }

    /// Highest assigned global transaction of a table.
    pub fn last_txn(&self, table: &str) -> Result<u64> {
        Ok(self.get(table)?.last_txn())
    }
}
