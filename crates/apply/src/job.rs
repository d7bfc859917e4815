//! The apply job: drains sequencer-ordered transactions into the table
//! writer.
//!
//! One logical consumer per table, running on whichever worker thread wins
//! the table's exclusive writer lock. Losers of the race defer — the holder
//! drains the queue to the tail before releasing, so a deferred
//! notification needs no retry (work-stealing). Replay is strictly
//! ordered and gap-free; any violation marks the table distressed and
//! isolates the failure to that table.

use crate::notifications::NotificationQueue;
use crate::pool::{PoolError, WriterPool, WAL_APPLY_REASON};
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tessera_core::{AlterOp, Error, Result, TableWriter};
use tessera_wal::{
    segment, SegmentReader, SequencerRegistry, StructureChangeCursor, TableSequencer,
    TxnNotification,
};
use tracing::{debug, error};

/// Applies WAL transactions of notified tables to their table writers.
///
/// Each job keeps a local "already applied up to" watermark per table so
/// duplicate notifications are skipped without touching the pool.
pub struct ApplyWalJob<W: TableWriter> {
    root: PathBuf,
    registry: Arc<SequencerRegistry>,
    pool: Arc<WriterPool<W>>,
    watermarks: FxHashMap<u32, u64>,
}

impl<W: TableWriter> ApplyWalJob<W> {
    /// Job over the engine root directory (tables live at `<root>/<name>`).
    pub fn new(
        root: impl Into<PathBuf>,
        registry: Arc<SequencerRegistry>,
        pool: Arc<WriterPool<W>>,
    ) -> Self {
        ApplyWalJob {
            root: root.into(),
            registry,
            pool,
            watermarks: FxHashMap::default(),
        }
    }

    /// Handle one notification. Returns true when this call did useful
    /// work (applied transactions and advanced the watermark).
    pub fn process(&mut self, notification: &TxnNotification) -> bool {
        let watermark = self
            .watermarks
            .get(&notification.table_id)
            .copied()
            .unwrap_or(0);
        if watermark >= notification.txn {
            debug!(
                table = %notification.table_name,
                txn = notification.txn,
                watermark,
                "skipping wal notification, already applied"
            );
            return false;
        }
        match self.apply_outstanding(&notification.table_name) {
            Some(applied) => {
                self.watermarks.insert(notification.table_id, applied);
                true
            }
            None => false,
        }
    }

    /// Work-steal loop: acquire the table's writer for WAL application and
    /// drain until the locally observed sequencer tail is caught up.
    /// Returns the highest applied txn when this job held the lock, `None`
    /// when it deferred or the table failed.
    fn apply_outstanding(&self, table: &str) -> Option<u64> {
        let seq = match self.registry.get(table) {
            Ok(seq) => seq,
            Err(e) => {
                error!(table, error = %e, "notified table is not registered with the sequencer");
                return None;
            }
        };
        let table_dir = self.root.join(table);
        let mut structure_cursor: Option<StructureChangeCursor> = None;

        loop {
            let drained = self.pool.try_with_writer(table, WAL_APPLY_REASON, |writer| {
                drain_outstanding(&table_dir, &seq, writer, &mut structure_cursor)
            });
            let last_applied = match drained {
                Ok(Ok(txn)) => txn,
                Ok(Err(e)) => {
                    error!(table, error = %e, "failed to apply WAL data to table");
                    self.pool.mark_distressed(table);
                    return None;
                }
                Err(PoolError::Busy { reason }) => {
                    if reason != WAL_APPLY_REASON {
                        // a WAL table must only ever be held for WAL apply
                        error!(
                            table,
                            lock_reason = %reason,
                            "rogue table writer: wal table is held outside wal application"
                        );
                    }
                    return None;
                }
                Err(PoolError::Distressed) => return None,
                Err(PoolError::NotRegistered) => {
                    error!(table, "notified table has no writer in the pool");
                    return None;
                }
            };
            // more transactions may have committed while this drain ran
            if last_applied >= seq.last_txn() {
                return Some(last_applied);
            }
        }
    }
}

/// Replay every outstanding sequencer record into the writer, verifying
/// strict gap-free ordering and structure-version continuity.
fn drain_outstanding<W: TableWriter>(
    table_dir: &Path,
    seq: &TableSequencer,
    writer: &mut W,
    structure_cursor: &mut Option<StructureChangeCursor>,
) -> Result<u64> {
    let mut cursor = seq.txn_cursor(writer.seq_txn());
    while let Some(record) = cursor.next() {
        let expected = writer.seq_txn() + 1;
        if record.txn != expected {
            return Err(Error::TxnGap {
                table: writer.table_name().to_string(),
                expected,
                actual: record.txn,
            });
        }
        if record.is_structure_change() {
            // for structural records the segment-local txn field carries
            // the new structure version
            let new_version = record.segment_txn;
            if writer.structure_version() + 1 != new_version {
                return Err(Error::StructureVersionMismatch {
                    table: writer.table_name().to_string(),
                    current: writer.structure_version(),
                    actual: new_version,
                });
            }
            let op =
                next_structure_op(seq, structure_cursor, writer.table_name(), new_version)?;
            writer.apply_alter(&op)?;
            if writer.structure_version() != new_version {
                return Err(Error::InvalidOperation(format!(
                    "table structure version did not advance applying '{}'",
                    op
                )));
            }
            debug!(
                table = %writer.table_name(),
                txn = record.txn,
                version = new_version,
                "applied structure change"
            );
        } else {
            let seg_dir = segment::segment_dir(
                &segment::wal_dir(table_dir, record.writer_id),
                record.segment_id,
            );
            let reader = SegmentReader::open(&seg_dir)?;
            let rows = reader.replay_data_txn(record.segment_txn, writer)?;
            debug!(
                table = %writer.table_name(),
                txn = record.txn,
                wal = record.writer_id,
                segment = record.segment_id,
                rows,
                "replayed wal txn"
            );
        }
        writer.set_seq_txn(record.txn);
    }
    Ok(writer.seq_txn())
}

/// Fetch the change operation backing a structure-version bump, reusing the
/// caller's cursor and refilling it from the sequencer when it runs dry.
/// The sequencer registering a bump with no matching change operation is a
/// fatal consistency violation.
fn next_structure_op(
    seq: &TableSequencer,
    holder: &mut Option<StructureChangeCursor>,
    table: &str,
    version: u64,
) -> Result<AlterOp> {
    for _ in 0..2 {
        if let Some(cursor) = holder.as_mut() {
            while let Some((v, op)) = cursor.next() {
                if v == version {
                    return Ok(op);
                }
                if v > version {
                    break;
                }
            }
        }
        *holder = Some(seq.structure_change_cursor(version - 1));
    }
    Err(Error::MissingStructureChange {
        table: table.to_string(),
        version,
    })
}

/// Fixed pool of worker threads draining the shared notification queue.
///
/// Workers are named `tessera-apply-0`, `tessera-apply-1`, etc. Each owns
/// its own [`ApplyWalJob`] (and therefore its own watermarks); the table
/// lock keeps concurrent workers from double-applying.
pub struct ApplyWorkerPool {
    shutdown: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl ApplyWorkerPool {
    /// Spawn `num_workers` threads over the queue.
    pub fn start<W: TableWriter + 'static>(
        num_workers: usize,
        root: impl Into<PathBuf>,
        queue: Arc<NotificationQueue>,
        registry: Arc<SequencerRegistry>,
        pool: Arc<WriterPool<W>>,
    ) -> Self {
        let root = root.into();
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(num_workers);
        for i in 0..num_workers {
            let shutdown = Arc::clone(&shutdown);
            let queue = Arc::clone(&queue);
            let mut job =
                ApplyWalJob::new(root.clone(), Arc::clone(&registry), Arc::clone(&pool));
            let handle = std::thread::Builder::new()
                .name(format!("tessera-apply-{}", i))
                .spawn(move || {
                    while !shutdown.load(Ordering::Acquire) {
                        if let Some(notification) = queue.pop_timeout(Duration::from_millis(20))
                        {
                            job.process(&notification);
                        }
                    }
                })
                .expect("failed to spawn apply worker thread");
            workers.push(handle);
        }
        ApplyWorkerPool { shutdown, workers }
    }

    /// Stop the workers and join them.
    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::Release);
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
