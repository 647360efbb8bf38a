//! A MapReduce (lite) rendition of the TPC-H pricing summary report.
//!
//! Shards of `lineitem` rows are aggregated independently into partial
//! tables (the map phase), which are then merged into a single report
//! (the reduce phase). Only sums and counts cross the phase boundary;
//! averages are derived once, from the merged totals.

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod codec;
pub mod error;
pub mod partition;
pub mod q1;
pub mod reader;
pub mod standalone;
pub mod utils;

pub use error::{Error, Result};
pub use partition::{partition_for, partition_of, NumPartitions, PartitionedRows, RowGroup};
pub use q1::map::{aggregate_shard, map_shard, PartialAggregator, ShardOutput};
pub use q1::reduce::{finalize, reduce, reduce_by_partition, tree_reduce};
pub use q1::{MergedAggregate, PartialAggregate, PartialRow, PartialTable, Report};

/////////////////////////////////////////////////////////////////////////////
// Input rows
/////////////////////////////////////////////////////////////////////////////

/// A single decoded `lineitem` row.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Record {
    pub returnflag: char,
    pub linestatus: char,
    pub quantity: f64,
    pub extended_price: f64,
    pub discount: f64,
    pub tax: f64,
}

impl Record {
    /// Construct a record from its group codes and measures.
    pub fn new(
        returnflag: char,
        linestatus: char,
        quantity: f64,
        extended_price: f64,
        discount: f64,
        tax: f64,
    ) -> Self {
        Self {
            returnflag,
            linestatus,
            quantity,
            extended_price,
            discount,
            tax,
        }
    }

    /// The group this record contributes to.
    #[inline]
    pub fn key(&self) -> GroupKey {
        GroupKey::new(self.returnflag, self.linestatus)
    }

    /// `extended_price * (1 - discount)`
    #[inline]
    pub fn disc_price(&self) -> f64 {
        self.extended_price * (1.0 - self.discount)
    }

    /// `disc_price * (1 + tax)`
    #[inline]
    pub fn charge(&self) -> f64 {
        self.disc_price() * (1.0 + self.tax)
    }
}

/////////////////////////////////////////////////////////////////////////////
// Group keys
/////////////////////////////////////////////////////////////////////////////

/// The `(returnflag, linestatus)` pair identifying one report row.
///
/// Ordering is lexicographic on `returnflag`, then `linestatus`, which is
/// the order of the final report.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey {
    pub returnflag: char,
    pub linestatus: char,
}

impl GroupKey {
    pub fn new(returnflag: char, linestatus: char) -> Self {
        Self {
            returnflag,
            linestatus,
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.returnflag, self.linestatus)
    }
}
