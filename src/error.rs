//! Errors raised by the aggregation core and its codecs.

use crate::GroupKey;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The number of output partitions must be a positive `u32`.
    #[error("invalid partition count {0}: must be between 1 and {max}", max = u32::MAX)]
    InvalidPartitionCount(usize),

    /// A merged group ended up with no records behind it. Keys only exist
    /// because some record produced them, so this is an internal bug.
    #[error("group {key} has a merged count of zero; cannot derive averages")]
    DegenerateDivision { key: GroupKey },

    /// Partition-scoped reduces only work if every mapper used the same
    /// partition count.
    #[error("partial output partitioned {found} ways, expected {expected}")]
    PartitionMismatch { expected: u32, found: u32 },

    /// A row carries a partition id other than the one its key hashes to.
    #[error("group {key} tagged with partition {found}, but it belongs to partition {expected}")]
    MisplacedRow {
        key: GroupKey,
        found: u32,
        expected: u32,
    },

    #[error("partitioned rows are not sorted by partition id")]
    UnsortedPartitions,

    #[error("invalid group code {code:?} in column `{column}`: expected exactly one character")]
    InvalidGroupCode { column: &'static str, code: String },

    #[error("required column `{0}` is missing")]
    MissingColumn(&'static str),

    #[error("column `{column}` has a null at row {row}")]
    NullValue { column: &'static str, row: usize },

    #[error("unsupported input file `{0}`: expected a .csv or .parquet extension")]
    UnsupportedInput(String),

    #[error("malformed partial-table metadata: {0}")]
    Metadata(String),

    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),

    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
