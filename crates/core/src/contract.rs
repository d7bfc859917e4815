//! The table writer contract consumed during WAL replay.
//!
//! The apply job is the sole caller of this trait while a table is
//! WAL-enabled. Partitioning, indexing and column file layout live behind
//! it and are out of scope here.

use crate::alter::AlterOp;
use crate::error::Result;
use crate::types::Cell;

/// Append/commit surface of the durable column store for one table.
pub trait TableWriter: Send {
    /// Table name.
    fn table_name(&self) -> &str;

    /// Last fully applied global transaction number (0 before any apply).
    fn seq_txn(&self) -> u64;

    /// Record the global transaction currently being applied.
    fn set_seq_txn(&mut self, txn: u64);

    /// Current structure version of the durable table.
    fn structure_version(&self) -> u64;

    /// Append one row to the uncommitted batch. Cells are in column order
    /// of the writer's current structure version.
    fn append_row(&mut self, cells: &[Cell]) -> Result<()>;

    /// Commit the uncommitted batch. When `out_of_order` is set the rows
    /// were not timestamp-ordered at write time and the store may choose a
    /// sorted append path.
    fn commit(&mut self, out_of_order: bool) -> Result<()>;

    /// Apply one structural change; must advance `structure_version` by
    /// exactly one.
    fn apply_alter(&mut self, op: &AlterOp) -> Result<()>;
}
