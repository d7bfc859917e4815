//! Core column model and contracts for the Tessera WAL subsystem.
//!
//! This crate holds what every other layer agrees on:
//!
//! - `ColumnType` / `Cell`: the closed column model with per-kind null
//!   representations
//! - `TableMetadata`: versioned column-layout snapshots
//! - `AlterOp`: schema-structure change operations
//! - `TableWriter`: the append/commit contract of the durable column store
//! - `Error`: shared error type with typed consistency violations

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod alter;
pub mod contract;
pub mod error;
pub mod metadata;
pub mod types;

pub use alter::AlterOp;
pub use contract::TableWriter;
pub use error::{Error, Result};
pub use metadata::{ColumnMeta, TableMetadata};
pub use types::{
    Cell, ColumnType, Timestamp, NULL_INT, NULL_LONG, NULL_TIMESTAMP, SYMBOL_NULL_KEY,
};
