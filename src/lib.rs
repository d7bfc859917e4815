//! Tessera: the write-ahead-log subsystem of a columnar time-series
//! storage engine.
//!
//! Many concurrent writers append rows to independent per-writer logs; a
//! sequencer assigns each committed batch a single global, strictly
//! increasing transaction number per table; and an apply job replays those
//! transactions — in sequencer order — into the table's durable column
//! storage, including interleaved schema-structure changes.
//!
//! This crate is a facade over the workspace members:
//!
//! - `tessera-core`: column model, table metadata, structure-change
//!   operations, the table-writer contract
//! - `tessera-wal`: segment store, WAL writer, sequencer, segment reader
//! - `tessera-apply`: notification queue, writer pool, apply job and
//!   worker pool

pub use tessera_apply as apply;
pub use tessera_wal as wal;

pub use tessera_apply::{ApplyWalJob, ApplyWorkerPool, NotificationQueue, WriterPool};
pub use tessera_core::{
    AlterOp, Cell, ColumnMeta, ColumnType, Error, Result, TableMetadata, TableWriter,
};
pub use tessera_wal::{
    SequencerRegistry, TxnNotification, TxnNotifier, WalConfig, WalWriter,
};
