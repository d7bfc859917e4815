//! Column model shared by the WAL writer, segment replay and the table
//! writer contract.
//!
//! `ColumnType` is a closed enum: every variant carries its own on-disk
//! width and null representation, checked exhaustively at compile time.

use serde::{Deserialize, Serialize};

/// Epoch timestamp in microseconds. Designated-timestamp columns are never
/// nullable; any other timestamp column uses [`NULL_TIMESTAMP`].
pub type Timestamp = i64;

/// Null sentinel for `Long` and non-designated `Timestamp` columns
pub const NULL_LONG: i64 = i64::MIN;

/// Null sentinel for `Int` columns
pub const NULL_INT: i32 = i32::MIN;

/// Null sentinel for timestamp values
pub const NULL_TIMESTAMP: i64 = i64::MIN;

/// Null key written for a null symbol value; never assigned to a string
pub const SYMBOL_NULL_KEY: i32 = i32::MIN;

/// Closed set of column kinds supported by the WAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    /// 1 byte, null writes 0
    Bool,
    /// 1 byte, null writes 0
    Byte,
    /// 2 bytes, null writes 0
    Short,
    /// 4 bytes, null writes `NULL_INT`
    Int,
    /// 8 bytes, null writes `NULL_LONG`
    Long,
    /// 4 bytes, null writes NaN
    Float,
    /// 8 bytes, null writes NaN
    Double,
    /// 8 bytes epoch micros; `NULL_TIMESTAMP` unless designated
    Timestamp,
    /// Variable length UTF-8, null marker in the data file
    Str,
    /// Variable length bytes, null marker in the data file
    Bin,
    /// 4-byte interned key into the table symbol map plus writer overlay
    Symbol,
}

impl ColumnType {
    /// On-disk width of one value in the `.d` file, `None` for var-size
    /// columns (which carry an `.i` offsets file alongside).
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            ColumnType::Bool | ColumnType::Byte => Some(1),
            ColumnType::Short => Some(2),
            ColumnType::Int | ColumnType::Float | ColumnType::Symbol => Some(4),
            ColumnType::Long | ColumnType::Double | ColumnType::Timestamp => Some(8),
            ColumnType::Str | ColumnType::Bin => None,
        }
    }

    /// True for columns stored as a data file + offsets file pair.
    pub fn is_var_size(self) -> bool {
        self.fixed_size().is_none()
    }

    /// The typed null value for this column kind.
    pub fn null_cell(self) -> Cell {
        match self {
            ColumnType::Bool => Cell::Bool(false),
            ColumnType::Byte => Cell::Byte(0),
            ColumnType::Short => Cell::Short(0),
            ColumnType::Int => Cell::Int(NULL_INT),
            ColumnType::Long => Cell::Long(NULL_LONG),
            ColumnType::Float => Cell::Float(f32::NAN),
            ColumnType::Double => Cell::Double(f64::NAN),
            ColumnType::Timestamp => Cell::Timestamp(NULL_TIMESTAMP),
            ColumnType::Str => Cell::Str(None),
            ColumnType::Bin => Cell::Bin(None),
            ColumnType::Symbol => Cell::Symbol(None),
        }
    }

    /// Short name used in logs and error messages.
    pub fn name(self) -> &'static str {
        match self {
            ColumnType::Bool => "bool",
            ColumnType::Byte => "byte",
            ColumnType::Short => "short",
            ColumnType::Int => "int",
            ColumnType::Long => "long",
            ColumnType::Float => "float",
            ColumnType::Double => "double",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Str => "string",
            ColumnType::Bin => "binary",
            ColumnType::Symbol => "symbol",
        }
    }
}

/// One value as it crosses the replay seam between a WAL segment and the
/// table writer's append path.
///
/// Symbol cells carry the resolved string (or `None` for the null key); the
/// table side re-interns them into its own symbol map.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    /// Boolean value
    Bool(bool),
    /// 8-bit signed
    Byte(i8),
    /// 16-bit signed
    Short(i16),
    /// 32-bit signed, `NULL_INT` for null
    Int(i32),
    /// 64-bit signed, `NULL_LONG` for null
    Long(i64),
    /// 32-bit float, NaN for null
    Float(f32),
    /// 64-bit float, NaN for null
    Double(f64),
    /// Epoch micros
    Timestamp(Timestamp),
    /// UTF-8 string or null
    Str(Option<String>),
    /// Raw bytes or null
    Bin(Option<Vec<u8>>),
    /// Resolved symbol value or null
    Symbol(Option<String>),
}

impl Cell {
    /// The column kind this cell belongs to.
    pub fn column_type(&self) -> ColumnType {
        match self {
            Cell::Bool(_) => ColumnType::Bool,
            Cell::Byte(_) => ColumnType::Byte,
            Cell::Short(_) => ColumnType::Short,
            Cell::Int(_) => ColumnType::Int,
            Cell::Long(_) => ColumnType::Long,
            Cell::Float(_) => ColumnType::Float,
            Cell::Double(_) => ColumnType::Double,
            Cell::Timestamp(_) => ColumnType::Timestamp,
            Cell::Str(_) => ColumnType::Str,
            Cell::Bin(_) => ColumnType::Bin,
            Cell::Symbol(_) => ColumnType::Symbol,
        }
    }

    /// Sentinel-aware null check.
    pub fn is_null(&self) -> bool {
        match self {
            Cell::Bool(_) | Cell::Byte(_) | Cell::Short(_) => false,
            Cell::Int(v) => *v == NULL_INT,
            Cell::Long(v) => *v == NULL_LONG,
            Cell::Float(v) => v.is_nan(),
            Cell::Double(v) => v.is_nan(),
            Cell::Timestamp(v) => *v == NULL_TIMESTAMP,
            Cell::Str(v) => v.is_none(),
            Cell::Bin(v) => v.is_none(),
            Cell::Symbol(v) => v.is_none(),
        }
    }

    /// Timestamp value when this is a timestamp cell.
    pub fn timestamp(&self) -> Option<Timestamp> {
        match self {
            Cell::Timestamp(v) => Some(*v),
            _ => None,
        }
    }
}
