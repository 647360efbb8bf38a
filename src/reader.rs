//! Decoding of shard files into [`Record`]s.
//!
//! Shards are `lineitem` extracts, either CSV with a header row or Parquet.
//! Only the six columns the report needs are read; any others are ignored.

use crate::error::{Error, Result};
use crate::q1::map::PartialAggregator;
use crate::q1::PartialTable;
use crate::utils::parse_code;
use crate::Record;
use arrow::array::{Array, AsArray, Float64Array, StringArray};
use arrow::compute::cast;
use arrow::csv::reader::Format;
use arrow::csv::ReaderBuilder;
use arrow::datatypes::{DataType, Field, Float64Type, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

pub const RETURNFLAG: &str = "l_returnflag";
pub const LINESTATUS: &str = "l_linestatus";
pub const QUANTITY: &str = "l_quantity";
pub const EXTENDEDPRICE: &str = "l_extendedprice";
pub const DISCOUNT: &str = "l_discount";
pub const TAX: &str = "l_tax";

const MEASURES: [&str; 4] = [QUANTITY, EXTENDEDPRICE, DISCOUNT, TAX];

pub type BatchIter = Box<dyn Iterator<Item = Result<RecordBatch>>>;

pub(crate) fn column_as(batch: &RecordBatch, name: &'static str, to: &DataType) -> Result<Arc<dyn Array>> {
    let col = batch.column_by_name(name).ok_or(Error::MissingColumn(name))?;
    if col.data_type() == to {
        Ok(col.clone())
    } else {
        Ok(cast(col.as_ref(), to)?)
    }
}

pub(crate) fn code_at(col: &StringArray, name: &'static str, row: usize) -> Result<char> {
    if col.is_null(row) {
        return Err(Error::NullValue { column: name, row });
    }
    parse_code(name, col.value(row))
}

pub(crate) fn measure_at(col: &Float64Array, name: &'static str, row: usize) -> Result<f64> {
    if col.is_null(row) {
        return Err(Error::NullValue { column: name, row });
    }
    Ok(col.value(row))
}

/// Decode the report columns of `batch`.
///
/// Group codes may be stored as any type castable to `Utf8`, measures as
/// any numeric type.
pub fn records_from_batch(batch: &RecordBatch) -> Result<Vec<Record>> {
    let flags = column_as(batch, RETURNFLAG, &DataType::Utf8)?;
    let statuses = column_as(batch, LINESTATUS, &DataType::Utf8)?;
    let qty = column_as(batch, QUANTITY, &DataType::Float64)?;
    let price = column_as(batch, EXTENDEDPRICE, &DataType::Float64)?;
    let disc = column_as(batch, DISCOUNT, &DataType::Float64)?;
    let tax = column_as(batch, TAX, &DataType::Float64)?;

    let flags = flags.as_string::<i32>();
    let statuses = statuses.as_string::<i32>();
    let qty = qty.as_primitive::<Float64Type>();
    let price = price.as_primitive::<Float64Type>();
    let disc = disc.as_primitive::<Float64Type>();
    let tax = tax.as_primitive::<Float64Type>();

    (0..batch.num_rows())
        .map(|i| {
            Ok(Record {
                returnflag: code_at(flags, RETURNFLAG, i)?,
                linestatus: code_at(statuses, LINESTATUS, i)?,
                quantity: measure_at(qty, QUANTITY, i)?,
                extended_price: measure_at(price, EXTENDEDPRICE, i)?,
                discount: measure_at(disc, DISCOUNT, i)?,
                tax: measure_at(tax, TAX, i)?,
            })
        })
        .collect()
}

/// Column types come from the header alone: measures are `Float64`, every
/// other column is read as `Utf8`. No rows are sampled.
fn csv_schema(file: &mut File) -> Result<Schema> {
    let (header, _) = Format::default()
        .with_header(true)
        .infer_schema(&mut *file, Some(0))?;
    let fields = header
        .fields()
        .iter()
        .map(|f| {
            let ty = if MEASURES.contains(&f.name().as_str()) {
                DataType::Float64
            } else {
                DataType::Utf8
            };
            Field::new(f.name(), ty, true)
        })
        .collect::<Vec<_>>();
    Ok(Schema::new(fields))
}

fn open_csv(path: &Path) -> Result<BatchIter> {
    let mut file = File::open(path)?;
    let schema = csv_schema(&mut file)?;
    file.seek(SeekFrom::Start(0))?;
    let reader = ReaderBuilder::new(Arc::new(schema))
        .with_header(true)
        .build(file)?;
    Ok(Box::new(reader.map(|b| b.map_err(Error::from))))
}

fn open_parquet(path: &Path) -> Result<BatchIter> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    Ok(Box::new(reader.map(|b| b.map_err(Error::from))))
}

/// Open a shard as a stream of record batches, picking the decoder by
/// file extension.
pub fn open_shard(path: &Path) -> Result<BatchIter> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("csv") => open_csv(path),
        Some("parquet") => open_parquet(path),
        _ => Err(Error::UnsupportedInput(path.display().to_string())),
    }
}

/// Read every record of a shard into memory.
pub fn read_shard(path: &Path) -> Result<Vec<Record>> {
    let mut records = Vec::new();
    for batch in open_shard(path)? {
        records.extend(records_from_batch(&batch?)?);
    }
    Ok(records)
}

/// Aggregate a shard batch by batch, without holding all of its records.
pub fn aggregate_file(path: &Path) -> Result<PartialTable> {
    let mut agg = PartialAggregator::new();
    for batch in open_shard(path)? {
        agg.push_batch(&batch?)?;
    }
    debug!(path = %path.display(), records = agg.records(), "aggregated shard");
    Ok(agg.finish())
}
