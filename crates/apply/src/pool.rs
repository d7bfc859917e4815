//! Exclusive table-writer pool with reason-tagged, non-blocking
//! acquisition.
//!
//! At most one holder per table, enforced cooperatively: an acquisition
//! attempt either gets the writer immediately or learns who holds it and
//! why. Apply workers that lose to another WAL apply simply defer — the
//! holder is responsible for the full drain. A failed replay marks the
//! table distressed, gating every future acquisition until an operator
//! intervenes.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tessera_core::TableWriter;
use thiserror::Error;
use tracing::warn;

/// Reason string tagged onto WAL-apply acquisitions.
pub const WAL_APPLY_REASON: &str = "wal apply";

/// Why a non-blocking acquisition did not run.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Another holder has the writer; carries its declared reason
    #[error("table writer is busy [reason={reason}]")]
    Busy {
        /// Reason declared by the current holder
        reason: String,
    },
    /// The table was marked distressed by a failed WAL apply
    #[error("table is distressed")]
    Distressed,
    /// No writer registered for the table
    #[error("table is not registered with the writer pool")]
    NotRegistered,
}

struct TableSlot<W> {
    writer: Mutex<W>,
    held_reason: Mutex<Option<String>>,
    distressed: AtomicBool,
}

/// Pool of exclusive table writers, keyed by table name.
pub struct WriterPool<W: TableWriter> {
    slots: DashMap<String, Arc<TableSlot<W>>>,
}

impl<W: TableWriter> Default for WriterPool<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: TableWriter> WriterPool<W> {
    /// Empty pool.
    pub fn new() -> Self {
        WriterPool {
            slots: DashMap::new(),
        }
    }

    /// Register a table's writer with the pool.
    pub fn register(&self, writer: W) {
        let name = writer.table_name().to_string();
        self.slots.insert(
            name,
            Arc::new(TableSlot {
                writer: Mutex::new(writer),
                held_reason: Mutex::new(None),
                distressed: AtomicBool::new(false),
            }),
        );
    }

    /// Run `f` with exclusive access to the table's writer, declaring
    /// `reason` for the duration. Non-blocking: when the writer is held
    /// this returns [`PoolError::Busy`] with the holder's reason instead of
    /// waiting.
    pub fn try_with_writer<R>(
        &self,
        table: &str,
        reason: &str,
        f: impl FnOnce(&mut W) -> R,
    ) -> Result<R, PoolError> {
        let slot = self
            .slots
            .get(table)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(PoolError::NotRegistered)?;
        if slot.distressed.load(Ordering::Acquire) {
            return Err(PoolError::Distressed);
        }
        let result = match slot.writer.try_lock() {
            Some(mut writer) => {
                *slot.held_reason.lock() = Some(reason.to_string());
                let result = f(&mut writer);
                *slot.held_reason.lock() = None;
                Ok(result)
            }
            None => {
                let reason = slot.held_reason.lock().clone().unwrap_or_default();
                Err(PoolError::Busy { reason })
            }
        };
        result
    }

    /// Mark a table distressed after a failed WAL apply. Future
    /// acquisitions fail until the flag is cleared by an operator.
    pub fn mark_distressed(&self, table: &str) {
        if let Some(entry) = self.slots.get(table) {
            entry.value().distressed.store(true, Ordering::Release);
            warn!(table, "table marked distressed");
        }
    }

    /// True when the table was marked distressed.
    pub fn is_distressed(&self, table: &str) -> bool {
        self.slots
            .get(table)
            .map(|entry| entry.value().distressed.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Clear the distressed flag; operator intervention only.
    pub fn clear_distressed(&self, table: &str) {
        if let Some(entry) = self.slots.get(table) {
            entry.value().distressed.store(false, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::{AlterOp, Cell, Result as CoreResult};

    struct StubWriter {
        name: String,
    }

    impl TableWriter for StubWriter {
        fn table_name(&self) -> &str {
            &self.name
        }
        fn seq_txn(&self) -> u64 {
            0
        }
        fn set_seq_txn(&mut self, _txn: u64) {}
        fn structure_version(&self) -> u64 {
            0
        }
        fn append_row(&mut self, _cells: &[Cell]) -> CoreResult<()> {
            Ok(())
        }
        fn commit(&mut self, _out_of_order: bool) -> CoreResult<()> {
            Ok(())
        }
        fn apply_alter(&mut self, _op: &AlterOp) -> CoreResult<()> {
            Ok(())
        }
    }

    fn pool_with_table() -> WriterPool<StubWriter> {
        let pool = WriterPool::new();
        pool.register(StubWriter {
            name: "trades".to_string(),
        });
        pool
    }

    #[test]
    fn test_busy_reports_holder_reason() {
        let pool = Arc::new(pool_with_table());
        let inner = Arc::clone(&pool);
        let outcome = pool
            .try_with_writer("trades", "maintenance", move |_| {
                inner.try_with_writer("trades", WAL_APPLY_REASON, |_| ())
            })
            .unwrap();
        match outcome {
            Err(PoolError::Busy { reason }) => assert_eq!(reason, "maintenance"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_reason_cleared_after_release() {
        let pool = pool_with_table();
        pool.try_with_writer("trades", WAL_APPLY_REASON, |_| ()).unwrap();
        pool.try_with_writer("trades", "other", |_| ()).unwrap();
    }

    #[test]
    fn test_distressed_gates_acquisition() {
        let pool = pool_with_table();
        pool.mark_distressed("trades");
        assert!(pool.is_distressed("trades"));
        assert!(matches!(
            pool.try_with_writer("trades", WAL_APPLY_REASON, |_| ()),
            Err(PoolError::Distressed)
        ));
        pool.clear_distressed("trades");
        assert!(pool.try_with_writer("trades", WAL_APPLY_REASON, |_| ()).is_ok());
    }

    #[test]
    fn test_unregistered_table() {
        let pool: WriterPool<StubWriter> = WriterPool::new();
        assert!(matches!(
            pool.try_with_writer("missing", WAL_APPLY_REASON, |_| ()),
            Err(PoolError::NotRegistered)
        ));
    }
}
