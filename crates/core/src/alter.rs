//! Schema-structure change operations.
//!
//! The WAL carries only the envelope around these: each applied operation
//! bumps the table's structure version by exactly one, and the sequencer
//! interleaves them with data transactions on the same version axis.

use crate::types::ColumnType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single schema-structure change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlterOp {
    /// Add a column with the given type; new rows before the change read
    /// back as typed nulls
    AddColumn {
        /// Column name
        name: String,
        /// Column kind
        column_type: ColumnType,
    },
    /// Remove a column; its data becomes unreachable
    RemoveColumn {
        /// Column name
        name: String,
    },
    /// Rename a column in place
    RenameColumn {
        /// Current column name
        name: String,
        /// New column name
        new_name: String,
    },
}

impl fmt::Display for AlterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlterOp::AddColumn { name, column_type } => {
                write!(f, "add column {} [{}]", name, column_type.name())
            }
            AlterOp::RemoveColumn { name } => write!(f, "remove column {}", name),
            AlterOp::RenameColumn { name, new_name } => {
                write!(f, "rename column {} to {}", name, new_name)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let op = AlterOp::AddColumn {
            name: "side".to_string(),
            column_type: ColumnType::Symbol,
        };
        assert_eq!(op.to_string(), "add column side [symbol]");
    }

    #[test]
    fn test_bincode_round_trip() {
        let op = AlterOp::RenameColumn {
            name: "px".to_string(),
            new_name: "price".to_string(),
        };
        let bytes = bincode::serialize(&op).unwrap();
        let back: AlterOp = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, op);
    }
}
