//! Error types shared across the WAL subsystem.
//!
//! We use `thiserror` for automatic `Display` and `Error` trait
//! implementations. Consistency violations get their own typed variants so
//! the apply job can report exactly what broke before marking a table
//! distressed.

use std::io;
use thiserror::Error;

/// Result type alias for WAL operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the WAL subsystem
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file create/open/append, hard link, directory creation)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Data corruption detected (bad magic, CRC mismatch, truncated record)
    #[error("data corruption: {0}")]
    Corruption(String),

    /// Invalid operation or state
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Operation is not supported by this writer
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// Another writer instance already holds this WAL's exclusivity lock.
    /// Fatal to the open call, never retried.
    #[error("wal writer already locked [table={table}, wal={wal_id}]")]
    WalLocked {
        /// Table the WAL belongs to
        table: String,
        /// Writer id whose lock could not be acquired
        wal_id: u32,
    },

    /// Table is not registered with the sequencer
    #[error("table does not exist: {0}")]
    TableNotFound(String),

    /// Column lookup by name failed
    #[error("column does not exist: {0}")]
    ColumnNotFound(String),

    /// Column with this name already exists
    #[error("duplicate column name: {0}")]
    DuplicateColumn(String),

    /// Wrong value type written into a column
    #[error("column type mismatch [column={column}, expected={expected}, got={got}]")]
    ColumnTypeMismatch {
        /// Column name
        column: String,
        /// Declared column type
        expected: &'static str,
        /// Type of the value that was written
        got: &'static str,
    },

    /// Sequencer records are not contiguous: the next record's global txn
    /// does not follow the table's last applied txn
    #[error("unexpected sequencer transaction {actual}, expected {expected} [table={table}]")]
    TxnGap {
        /// Table being replayed
        table: String,
        /// `last_applied + 1`
        expected: u64,
        /// Txn number carried by the record
        actual: u64,
    },

    /// A structural-change record carries a version that does not follow the
    /// table's current structure version
    #[error("unexpected structure version {actual}, table is at {current} [table={table}]")]
    StructureVersionMismatch {
        /// Table being replayed
        table: String,
        /// Table's current structure version
        current: u64,
        /// Version carried by the record
        actual: u64,
    },

    /// The sequencer registered a structure-version bump but the structure
    /// log holds no matching change operation
    #[error("structure change record missing for version {version} [table={table}]")]
    MissingStructureChange {
        /// Table being replayed
        table: String,
        /// Version with no backing change operation
        version: u64,
    },

    /// Table was marked distressed by a failed WAL apply; requires operator
    /// intervention before further writes are trusted
    #[error("table is distressed: {0}")]
    TableDistressed(String),
}

impl Error {
    /// True for errors that invalidate replay consistency and must mark the
    /// table distressed rather than be retried.
    pub fn is_consistency_violation(&self) -> bool {
        matches!(
            self,
            Error::TxnGap { .. }
                | Error::StructureVersionMismatch { .. }
                | Error::MissingStructureChange { .. }
                | Error::Corruption(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_txn_gap_display() {
        let err = Error::TxnGap {
            table: "trades".to_string(),
            expected: 4,
            actual: 6,
        };
        let msg = err.to_string();
        assert!(msg.contains("unexpected sequencer transaction 6"));
        assert!(msg.contains("expected 4"));
        assert!(err.is_consistency_violation());
    }

    #[test]
    fn test_io_error_is_not_consistency_violation() {
        let err = Error::Io(io::Error::new(io::ErrorKind::Other, "disk full"));
        assert!(!err.is_consistency_violation());
    }

    #[test]
    fn test_wal_locked_display() {
        let err = Error::WalLocked {
            table: "trades".to_string(),
            wal_id: 3,
        };
        assert!(err.to_string().contains("table=trades"));
        assert!(err.to_string().contains("wal=3"));
    }

    #[test]
    fn test_missing_structure_change_is_fatal() {
        let err = Error::MissingStructureChange {
            table: "trades".to_string(),
            version: 2,
        };
        assert!(err.is_consistency_violation());
    }
}
