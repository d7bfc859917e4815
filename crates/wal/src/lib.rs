//! Write-ahead log for the Tessera columnar time-series engine.
//!
//! Many concurrent writers append rows to independent per-writer logs; the
//! sequencer assigns each committed batch a single global, strictly
//! increasing transaction number per table. This crate holds:
//!
//! - the segment store: per-writer, per-segment directories of append-only
//!   column files plus the CRC-framed event log
//! - the WAL writer: row building, per-transaction timestamp tracking,
//!   symbol overlay, the commit protocol and segment rolling
//! - the sequencer contract and its in-process registry implementation
//! - the segment reader used by WAL replay

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod events;
pub mod reader;
pub mod segment;
pub mod sequencer;
pub mod symbols;
pub mod writer;

pub use config::WalConfig;
pub use events::{DataEvent, EventWriter, WalEvent};
pub use reader::SegmentReader;
pub use segment::{ColumnAppender, WAL_NAME_BASE};
pub use sequencer::{
    SeqTxnRecord, SequencerRegistry, StructureChangeCursor, TableSequencer, TxnAssignment,
    TxnCursor, TxnNotification, TxnNotifier, METADATA_WRITER_ID,
};
pub use symbols::{SymbolDelta, SymbolOverlay, SymbolSnapshot};
pub use writer::{Row, WalWriter};
