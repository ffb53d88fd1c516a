//! Type conversion between Arrow result columns and DuckDB values.
//!
//! Result sets leave the engine as Arrow record batches; this module turns
//! those columns back into [`Value`]s and names their declared engine types.

use std::any::type_name;

use duckdb::arrow::array::{
    Array, ArrayRef, BinaryArray, BooleanArray, Date32Array, Date64Array, Decimal128Array,
    FixedSizeBinaryArray, FixedSizeListArray, Float32Array, Float64Array, Int16Array,
    Int32Array, Int64Array, Int8Array, IntervalDayTimeArray, IntervalMonthDayNanoArray,
    IntervalYearMonthArray, LargeBinaryArray, LargeListArray, LargeStringArray, ListArray,
    MapArray, StringArray, StringViewArray, StructArray, Time32MillisecondArray,
    Time32SecondArray, Time64MicrosecondArray, Time64NanosecondArray,
    TimestampMicrosecondArray, TimestampMillisecondArray, TimestampNanosecondArray,
    TimestampSecondArray, UInt16Array, UInt32Array, UInt64Array, UInt8Array,
};
use chrono::{Datelike, NaiveDate};
use duckdb::arrow::compute::cast;
use duckdb::arrow::datatypes::{DataType, IntervalUnit, TimeUnit};
use duckdb::types::{OrderedMap, TimeUnit as DuckTimeUnit, Value};

use crate::error::DriverError;

/// Name the DuckDB type a result column of `data_type` was declared as.
pub fn arrow_to_duckdb_type_name(data_type: &DataType) -> String {
    match data_type {
        DataType::Null => "NULL".to_string(),
        DataType::Boolean => "BOOLEAN".to_string(),
        DataType::Int8 => "TINYINT".to_string(),
        DataType::Int16 => "SMALLINT".to_string(),
        DataType::Int32 => "INTEGER".to_string(),
        DataType::Int64 => "BIGINT".to_string(),
        DataType::UInt8 => "UTINYINT".to_string(),
        DataType::UInt16 => "USMALLINT".to_string(),
        DataType::UInt32 => "UINTEGER".to_string(),
        DataType::UInt64 => "UBIGINT".to_string(),
        DataType::Float32 => "FLOAT".to_string(),
        DataType::Float64 => "DOUBLE".to_string(),
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => "VARCHAR".to_string(),
        DataType::Binary | DataType::LargeBinary | DataType::BinaryView => "BLOB".to_string(),
        DataType::FixedSizeBinary(16) => "UUID".to_string(),
        DataType::FixedSizeBinary(_) => "BLOB".to_string(),
        DataType::Date32 | DataType::Date64 => "DATE".to_string(),
        DataType::Time32(_) | DataType::Time64(_) => "TIME".to_string(),
        DataType::Timestamp(_, None) => "TIMESTAMP".to_string(),
        DataType::Timestamp(_, Some(_)) => "TIMESTAMP WITH TIME ZONE".to_string(),
        DataType::Interval(_) => "INTERVAL".to_string(),
        DataType::Decimal128(38, 0) => "HUGEINT".to_string(),
        DataType::Decimal128(p, s) | DataType::Decimal256(p, s) => format!("DECIMAL({p},{s})"),
        DataType::Dictionary(_, _) => "ENUM".to_string(),
        DataType::List(item) | DataType::LargeList(item) => {
            format!("{}[]", arrow_to_duckdb_type_name(item.data_type()))
        }
        DataType::FixedSizeList(item, size) => {
            format!("{}[{size}]", arrow_to_duckdb_type_name(item.data_type()))
        }
        DataType::Struct(fields) => {
            let members: Vec<String> = fields
                .iter()
                .map(|field| {
                    format!(
                        "{} {}",
                        field.name(),
                        arrow_to_duckdb_type_name(field.data_type())
                    )
                })
                .collect();
            format!("STRUCT({})", members.join(", "))
        }
        DataType::Map(entries, _) => match entries.data_type() {
            DataType::Struct(kv) if kv.len() == 2 => format!(
                "MAP({}, {})",
                arrow_to_duckdb_type_name(kv[0].data_type()),
                arrow_to_duckdb_type_name(kv[1].data_type())
            ),
            _ => "MAP".to_string(),
        },
        other => other.to_string().to_uppercase(),
    }
}

/// Whether [`arrow_array_to_duckdb_values`] can convert columns of `data_type`.
pub fn is_decodable(data_type: &DataType) -> bool {
    match data_type {
        DataType::Null
        | DataType::Boolean
        | DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64
        | DataType::Float32
        | DataType::Float64
        | DataType::Utf8
        | DataType::LargeUtf8
        | DataType::Utf8View
        | DataType::Binary
        | DataType::LargeBinary
        | DataType::FixedSizeBinary(_)
        | DataType::Date32
        | DataType::Date64
        | DataType::Timestamp(_, _)
        | DataType::Interval(_)
        | DataType::Decimal128(_, _) => true,
        DataType::Time32(unit) => matches!(unit, TimeUnit::Second | TimeUnit::Millisecond),
        DataType::Time64(unit) => matches!(unit, TimeUnit::Microsecond | TimeUnit::Nanosecond),
        DataType::Dictionary(_, values) => matches!(
            values.as_ref(),
            DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View
        ),
        DataType::List(item) | DataType::LargeList(item) | DataType::FixedSizeList(item, _) => {
            is_decodable(item.data_type())
        }
        DataType::Struct(fields) => fields.iter().all(|field| is_decodable(field.data_type())),
        DataType::Map(entries, _) => is_decodable(entries.data_type()),
        _ => false,
    }
}

/// Convert an Arrow column into one DuckDB value per row.
///
/// ENUM columns become [`Value::Enum`]; lists, structs and maps are
/// converted recursively. Callers check [`is_decodable`] first; other types
/// are an internal error here.
pub fn arrow_array_to_duckdb_values(array: &ArrayRef) -> Result<Vec<Value>, DriverError> {
    let mut values = Vec::with_capacity(array.len());

    macro_rules! push_values {
        ($arr_type:ty, |$v:ident| $make:expr) => {{
            let arr = downcast_array::<$arr_type>(array)?;
            for idx in 0..arr.len() {
                if arr.is_null(idx) {
                    values.push(Value::Null);
                } else {
                    let $v = arr.value(idx);
                    values.push($make);
                }
            }
        }};
    }

    match array.data_type() {
        DataType::Null => values.resize(array.len(), Value::Null),
        DataType::Boolean => push_values!(BooleanArray, |v| Value::Boolean(v)),
        DataType::Int8 => push_values!(Int8Array, |v| Value::TinyInt(v)),
        DataType::Int16 => push_values!(Int16Array, |v| Value::SmallInt(v)),
        DataType::Int32 => push_values!(Int32Array, |v| Value::Int(v)),
        DataType::Int64 => push_values!(Int64Array, |v| Value::BigInt(v)),
        DataType::UInt8 => push_values!(UInt8Array, |v| Value::UTinyInt(v)),
        DataType::UInt16 => push_values!(UInt16Array, |v| Value::USmallInt(v)),
        DataType::UInt32 => push_values!(UInt32Array, |v| Value::UInt(v)),
        DataType::UInt64 => push_values!(UInt64Array, |v| Value::UBigInt(v)),
        DataType::Float32 => push_values!(Float32Array, |v| Value::Float(v)),
        DataType::Float64 => push_values!(Float64Array, |v| Value::Double(v)),
        DataType::Utf8 => push_values!(StringArray, |v| Value::Text(v.to_string())),
        DataType::LargeUtf8 => push_values!(LargeStringArray, |v| Value::Text(v.to_string())),
        DataType::Utf8View => push_values!(StringViewArray, |v| Value::Text(v.to_string())),
        DataType::Binary => push_values!(BinaryArray, |v| Value::Blob(v.to_vec())),
        DataType::LargeBinary => push_values!(LargeBinaryArray, |v| Value::Blob(v.to_vec())),
        DataType::FixedSizeBinary(_) => {
            push_values!(FixedSizeBinaryArray, |v| Value::Blob(v.to_vec()))
        }
        DataType::Date32 => push_values!(Date32Array, |v| Value::Date32(v)),
        DataType::Date64 => push_values!(Date64Array, |v| Value::Date32(
            v.div_euclid(86_400_000) as i32
        )),
        DataType::Time32(TimeUnit::Second) => push_values!(Time32SecondArray, |v| {
            Value::Time64(DuckTimeUnit::Second, i64::from(v))
        }),
        DataType::Time32(TimeUnit::Millisecond) => {
            push_values!(Time32MillisecondArray, |v| Value::Time64(
                DuckTimeUnit::Millisecond,
                i64::from(v)
            ))
        }
        DataType::Time64(TimeUnit::Microsecond) => {
            push_values!(Time64MicrosecondArray, |v| Value::Time64(
                DuckTimeUnit::Microsecond,
                v
            ))
        }
        DataType::Time64(TimeUnit::Nanosecond) => {
            push_values!(Time64NanosecondArray, |v| Value::Time64(
                DuckTimeUnit::Nanosecond,
                v
            ))
        }
        DataType::Timestamp(TimeUnit::Second, _) => push_values!(TimestampSecondArray, |v| {
            Value::Timestamp(DuckTimeUnit::Second, v)
        }),
        DataType::Timestamp(TimeUnit::Millisecond, _) => {
            push_values!(TimestampMillisecondArray, |v| Value::Timestamp(
                DuckTimeUnit::Millisecond,
                v
            ))
        }
        DataType::Timestamp(TimeUnit::Microsecond, _) => {
            push_values!(TimestampMicrosecondArray, |v| Value::Timestamp(
                DuckTimeUnit::Microsecond,
                v
            ))
        }
        DataType::Timestamp(TimeUnit::Nanosecond, _) => {
            push_values!(TimestampNanosecondArray, |v| Value::Timestamp(
                DuckTimeUnit::Nanosecond,
                v
            ))
        }
        DataType::Interval(IntervalUnit::YearMonth) => {
            push_values!(IntervalYearMonthArray, |months| Value::Interval {
                months,
                days: 0,
                nanos: 0,
            })
        }
        DataType::Interval(IntervalUnit::DayTime) => {
            push_values!(IntervalDayTimeArray, |dt| Value::Interval {
                months: 0,
                days: dt.days,
                nanos: i64::from(dt.milliseconds) * 1_000_000,
            })
        }
        DataType::Interval(IntervalUnit::MonthDayNano) => {
            push_values!(IntervalMonthDayNanoArray, |mdn| Value::Interval {
                months: mdn.months,
                days: mdn.days,
                nanos: mdn.nanoseconds,
            })
        }
        // HUGEINT leaves the engine as Decimal128(38, 0); real decimals are widened to DOUBLE.
        DataType::Decimal128(_, 0) => push_values!(Decimal128Array, |v| Value::HugeInt(v)),
        DataType::Decimal128(_, scale) => {
            let divisor = 10f64.powi(i32::from(*scale));
            push_values!(Decimal128Array, |v| Value::Double(v as f64 / divisor))
        }
        DataType::Dictionary(_, _) => {
            let labels = cast(array.as_ref(), &DataType::Utf8).map_err(|err| {
                DriverError::Internal(format!("failed to decode ENUM column: {err}"))
            })?;
            let labels = downcast_array::<StringArray>(&labels)?;
            for idx in 0..labels.len() {
                if labels.is_null(idx) {
                    values.push(Value::Null);
                } else {
                    values.push(Value::Enum(labels.value(idx).to_string()));
                }
            }
        }
        DataType::List(_) => push_values!(ListArray, |items| Value::List(
            arrow_array_to_duckdb_values(&items)?
        )),
        DataType::LargeList(_) => push_values!(LargeListArray, |items| Value::List(
            arrow_array_to_duckdb_values(&items)?
        )),
        DataType::FixedSizeList(_, _) => push_values!(FixedSizeListArray, |items| Value::Array(
            arrow_array_to_duckdb_values(&items)?
        )),
        DataType::Struct(fields) => {
            let arr = downcast_array::<StructArray>(array)?;
            let children = arr
                .columns()
                .iter()
                .map(arrow_array_to_duckdb_values)
                .collect::<Result<Vec<_>, _>>()?;
            for idx in 0..arr.len() {
                if arr.is_null(idx) {
                    values.push(Value::Null);
                    continue;
                }
                let members: Vec<(String, Value)> = fields
                    .iter()
                    .zip(&children)
                    .map(|(field, child)| (field.name().clone(), child[idx].clone()))
                    .collect();
                values.push(Value::Struct(OrderedMap::from(members)));
            }
        }
        DataType::Map(_, _) => push_values!(MapArray, |entries| map_value(&entries)?),
        other => {
            return Err(DriverError::Internal(format!(
                "no decoder for {} columns",
                arrow_to_duckdb_type_name(other)
            )))
        }
    }

    Ok(values)
}

fn map_value(entries: &StructArray) -> Result<Value, DriverError> {
    if entries.num_columns() != 2 {
        return Err(DriverError::Internal(format!(
            "MAP entries carry {} fields",
            entries.num_columns()
        )));
    }
    let keys = arrow_array_to_duckdb_values(entries.column(0))?;
    let items = arrow_array_to_duckdb_values(entries.column(1))?;
    let pairs: Vec<(Value, Value)> = keys.into_iter().zip(items).collect();
    Ok(Value::Map(OrderedMap::from(pairs)))
}

fn downcast_array<T: 'static>(array: &ArrayRef) -> Result<&T, DriverError> {
    array.as_any().downcast_ref::<T>().ok_or_else(|| {
        DriverError::Internal(format!(
            "expected {} but found {}",
            type_name::<T>(),
            array.data_type()
        ))
    })
}

/// Days between 0001-01-01 (CE day 1) and 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Bindable `DATE` parameter.
pub fn date_to_value(date: NaiveDate) -> Value {
    Value::Date32(date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE)
}

/// Calendar date for a `DATE` cell (days since the Unix epoch).
pub(crate) fn date_from_days(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days.checked_add(UNIX_EPOCH_DAYS_FROM_CE)?)
}
