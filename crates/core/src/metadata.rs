//! Table metadata snapshots.
//!
//! Every WAL writer holds a private copy of the table's column layout,
//! versioned by a structure version number. The sequencer owns the canonical
//! copy; writers catch up by replaying [`AlterOp`]s from the structure log.
//! A bincode dump of the snapshot is written into every segment so segments
//! are self-describing for replay.

use crate::alter::AlterOp;
use crate::error::{Error, Result};
use crate::types::ColumnType;
use serde::{Deserialize, Serialize};

/// One column of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    /// Column name, unique within the table
    pub name: String,
    /// Column kind
    pub column_type: ColumnType,
}

impl ColumnMeta {
    /// Create a column descriptor.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        ColumnMeta {
            name: name.into(),
            column_type,
        }
    }
}

/// Versioned snapshot of a table's column layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMetadata {
    table_name: String,
    columns: Vec<ColumnMeta>,
    timestamp_index: Option<usize>,
    structure_version: u64,
}

impl TableMetadata {
    /// Create metadata at structure version 0.
    ///
    /// `timestamp_index` designates the timestamp column; it must point at a
    /// `Timestamp` column and that column is never nullable.
    pub fn new(
        table_name: impl Into<String>,
        columns: Vec<ColumnMeta>,
        timestamp_index: Option<usize>,
    ) -> Result<Self> {
        if let Some(idx) = timestamp_index {
            let col = columns.get(idx).ok_or_else(|| {
                Error::InvalidOperation(format!("designated timestamp index {} out of range", idx))
            })?;
            if col.column_type != ColumnType::Timestamp {
                return Err(Error::InvalidOperation(format!(
                    "designated timestamp column '{}' is {}, not timestamp",
                    col.name,
                    col.column_type.name()
                )));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for col in &columns {
            if !seen.insert(col.name.as_str()) {
                return Err(Error::DuplicateColumn(col.name.clone()));
            }
        }
        Ok(TableMetadata {
            table_name: table_name.into(),
            columns,
            timestamp_index,
            structure_version: 0,
        })
    }

    /// Table name.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Number of columns.
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Column descriptor by index.
    pub fn column(&self, index: usize) -> &ColumnMeta {
        &self.columns[index]
    }

    /// All columns in declaration order.
    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    /// Index of a column by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Index of the designated timestamp column, if the table has one.
    pub fn timestamp_index(&self) -> Option<usize> {
        self.timestamp_index
    }

    /// Current structure version; add/remove/rename each bump it by one.
    pub fn structure_version(&self) -> u64 {
        self.structure_version
    }

    /// Apply one structural change, advancing the structure version by
    /// exactly one.
    pub fn apply_alter(&mut self, op: &AlterOp) -> Result<()> {
        match op {
            AlterOp::AddColumn { name, column_type } => {
                if self.column_index(name).is_some() {
                    return Err(Error::DuplicateColumn(name.clone()));
                }
                self.columns.push(ColumnMeta::new(name.clone(), *column_type));
            }
            AlterOp::RemoveColumn { name } => {
                let index = self
                    .column_index(name)
                    .ok_or_else(|| Error::ColumnNotFound(name.clone()))?;
                if self.timestamp_index == Some(index) {
                    return Err(Error::InvalidOperation(format!(
                        "cannot remove designated timestamp column '{}'",
                        name
                    )));
                }
                self.columns.remove(index);
                if let Some(ts) = self.timestamp_index {
                    if index < ts {
                        self.timestamp_index = Some(ts - 1);
                    }
                }
            }
            AlterOp::RenameColumn { name, new_name } => {
                if self.column_index(new_name).is_some() {
                    return Err(Error::DuplicateColumn(new_name.clone()));
                }
                let index = self
                    .column_index(name)
                    .ok_or_else(|| Error::ColumnNotFound(name.clone()))?;
                self.columns[index].name = new_name.clone();
            }
        }
        self.structure_version += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trades() -> TableMetadata {
        TableMetadata::new(
            "trades",
            vec![
                ColumnMeta::new("ts", ColumnType::Timestamp),
                ColumnMeta::new("price", ColumnType::Double),
                ColumnMeta::new("sym", ColumnType::Symbol),
            ],
            Some(0),
        )
        .unwrap()
    }

    #[test]
    fn test_add_column_bumps_version() {
        let mut meta = trades();
        assert_eq!(meta.structure_version(), 0);
        meta.apply_alter(&AlterOp::AddColumn {
            name: "size".to_string(),
            column_type: ColumnType::Long,
        })
        .unwrap();
        assert_eq!(meta.structure_version(), 1);
        assert_eq!(meta.column_count(), 4);
        assert_eq!(meta.column_index("size"), Some(3));
    }

    #[test]
    fn test_duplicate_add_fails_without_version_bump() {
        let mut meta = trades();
        let err = meta
            .apply_alter(&AlterOp::AddColumn {
                name: "price".to_string(),
                column_type: ColumnType::Double,
            })
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateColumn(_)));
        assert_eq!(meta.structure_version(), 0);
    }

    #[test]
    fn test_remove_shifts_timestamp_index() {
        let mut meta = TableMetadata::new(
            "t",
            vec![
                ColumnMeta::new("a", ColumnType::Int),
                ColumnMeta::new("ts", ColumnType::Timestamp),
            ],
            Some(1),
        )
        .unwrap();
        meta.apply_alter(&AlterOp::RemoveColumn {
            name: "a".to_string(),
        })
        .unwrap();
        assert_eq!(meta.timestamp_index(), Some(0));
        assert_eq!(meta.column_index("ts"), Some(0));
    }

    #[test]
    fn test_cannot_remove_designated_timestamp() {
        let mut meta = trades();
        let err = meta
            .apply_alter(&AlterOp::RemoveColumn {
                name: "ts".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
    }

    #[test]
    fn test_rename() {
        let mut meta = trades();
        meta.apply_alter(&AlterOp::RenameColumn {
            name: "price".to_string(),
            new_name: "px".to_string(),
        })
        .unwrap();
        assert_eq!(meta.column_index("px"), Some(1));
        assert_eq!(meta.column_index("price"), None);
        assert_eq!(meta.structure_version(), 1);
    }

    #[test]
    fn test_designated_timestamp_must_be_timestamp_type() {
        let err = TableMetadata::new(
            "t",
            vec![ColumnMeta::new("x", ColumnType::Long)],
            Some(0),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
    }
}
