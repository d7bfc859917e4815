//! Test support: an in-memory table writer and on-disk table fixtures.
//!
//! `MemTableWriter` is a reference implementation of the table-writer
//! contract, good enough to observe everything WAL replay promises:
//! ordered application, sorted-vs-direct commits driven by the
//! out-of-order flag, typed-null backfill on add-column, and seq-txn
//! bookkeeping.

use std::path::Path;
use std::sync::Arc;
use tessera_core::{AlterOp, Cell, Error, Result, TableMetadata, TableWriter};
use tessera_wal::{SequencerRegistry, SymbolSnapshot, TableSequencer};

/// Columnar in-memory table writer.
pub struct MemTableWriter {
    metadata: TableMetadata,
    rows: Vec<Vec<Cell>>,
    pending: Vec<Vec<Cell>>,
    seq_txn: u64,
}

impl MemTableWriter {
    /// Empty table with the given metadata.
    pub fn new(metadata: TableMetadata) -> Self {
        MemTableWriter {
            metadata,
            rows: Vec::new(),
            pending: Vec::new(),
            seq_txn: 0,
        }
    }

    /// Committed row count.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// A committed cell, or `None` when out of range.
    pub fn cell(&self, row: usize, column: usize) -> Option<Cell> {
        self.rows.get(row).and_then(|r| r.get(column)).cloned()
    }

    /// Designated timestamps of the committed rows, in table order.
    pub fn timestamps(&self) -> Vec<i64> {
        let Some(index) = self.metadata.timestamp_index() else {
            return Vec::new();
        };
        self.rows
            .iter()
            .filter_map(|row| row.get(index).and_then(Cell::timestamp))
            .collect()
    }

    /// The table's metadata as evolved by applied structure changes.
    pub fn metadata(&self) -> &TableMetadata {
        &self.metadata
    }
}

impl TableWriter for MemTableWriter {
    fn table_name(&self) -> &str {
        self.metadata.table_name()
    }

    fn seq_txn(&self) -> u64 {
        self.seq_txn
    }

    fn set_seq_txn(&mut self, txn: u64) {
        self.seq_txn = txn;
    }

    fn structure_version(&self) -> u64 {
        self.metadata.structure_version()
    }

    fn append_row(&mut self, cells: &[Cell]) -> Result<()> {
        if cells.len() != self.metadata.column_count() {
            return Err(Error::InvalidOperation(format!(
                "row has {} cells, table has {} columns",
                cells.len(),
                self.metadata.column_count()
            )));
        }
        for (index, cell) in cells.iter().enumerate() {
            let expected = self.metadata.column(index).column_type;
            if cell.column_type() != expected {
                return Err(Error::ColumnTypeMismatch {
                    column: self.metadata.column(index).name.clone(),
                    expected: expected.name(),
                    got: cell.column_type().name(),
                });
            }
        }
        self.pending.push(cells.to_vec());
        Ok(())
    }

    fn commit(&mut self, out_of_order: bool) -> Result<()> {
        if out_of_order {
            if let Some(index) = self.metadata.timestamp_index() {
                self.pending.sort_by_key(|row| {
                    row.get(index).and_then(Cell::timestamp).unwrap_or(i64::MIN)
                });
            }
        }
        self.rows.append(&mut self.pending);
        Ok(())
    }

    fn apply_alter(&mut self, op: &AlterOp) -> Result<()> {
        match op {
            AlterOp::AddColumn { column_type, .. } => {
                self.metadata.apply_alter(op)?;
                let null = column_type.null_cell();
                for row in self.rows.iter_mut().chain(self.pending.iter_mut()) {
                    row.push(null.clone());
                }
            }
            AlterOp::RemoveColumn { name } => {
                let index = self
                    .metadata
                    .column_index(name)
                    .ok_or_else(|| Error::ColumnNotFound(name.clone()))?;
                self.metadata.apply_alter(op)?;
                for row in self.rows.iter_mut().chain(self.pending.iter_mut()) {
                    row.remove(index);
                }
            }
            AlterOp::RenameColumn { .. } => {
                self.metadata.apply_alter(op)?;
            }
        }
        Ok(())
    }
}

/// Create a table's on-disk root, seed its symbol files and register it
/// with the sequencer. Returns the table's sequencer.
pub fn seed_table(
    root: &Path,
    registry: &SequencerRegistry,
    metadata: TableMetadata,
    symbol_seeds: &[(&str, Vec<String>)],
) -> Result<Arc<TableSequencer>> {
    let table_dir = root.join(metadata.table_name());
    std::fs::create_dir_all(&table_dir)?;
    for (column, values) in symbol_seeds {
        SymbolSnapshot::write(
            &tessera_wal::symbols::symbol_file_path(&table_dir, column),
            values,
        )?;
    }
    registry.create_table(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::{ColumnMeta, ColumnType};

    fn metadata() -> TableMetadata {
        TableMetadata::new(
            "trades",
            vec![
                ColumnMeta::new("ts", ColumnType::Timestamp),
                ColumnMeta::new("price", ColumnType::Double),
            ],
            Some(0),
        )
        .unwrap()
    }

    #[test]
    fn test_out_of_order_commit_sorts_by_designated_timestamp() {
        let mut writer = MemTableWriter::new(metadata());
        for ts in [50i64, 30, 40] {
            writer
                .append_row(&[Cell::Timestamp(ts), Cell::Double(ts as f64)])
                .unwrap();
        }
        writer.commit(true).unwrap();
        assert_eq!(writer.timestamps(), vec![30, 40, 50]);
    }

    #[test]
    fn test_in_order_commit_appends_directly() {
        let mut writer = MemTableWriter::new(metadata());
        for ts in [50i64, 30, 40] {
            writer
                .append_row(&[Cell::Timestamp(ts), Cell::Double(0.0)])
                .unwrap();
        }
        writer.commit(false).unwrap();
        assert_eq!(writer.timestamps(), vec![50, 30, 40]);
    }

    #[test]
    fn test_add_column_backfills_typed_nulls() {
        let mut writer = MemTableWriter::new(metadata());
        writer
            .append_row(&[Cell::Timestamp(1), Cell::Double(1.0)])
            .unwrap();
        writer.commit(false).unwrap();
        writer
            .apply_alter(&AlterOp::AddColumn {
                name: "size".to_string(),
                column_type: ColumnType::Long,
            })
            .unwrap();
        assert_eq!(writer.structure_version(), 1);
        let cell = writer.cell(0, 2).unwrap();
        assert!(cell.is_null());
        assert_eq!(cell.column_type(), ColumnType::Long);
    }

    #[test]
    fn test_append_row_validates_shape() {
        let mut writer = MemTableWriter::new(metadata());
        assert!(writer.append_row(&[Cell::Timestamp(1)]).is_err());
        assert!(writer
            .append_row(&[Cell::Double(1.0), Cell::Timestamp(1)])
            .is_err());
    }
}
