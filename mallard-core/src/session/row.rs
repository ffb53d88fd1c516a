//! Result rows and typed column extraction.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use duckdb::arrow::datatypes::{DataType, Schema};
use duckdb::types::{TimeUnit, Value};

use crate::error::DriverError;
use crate::types::{arrow_to_duckdb_type_name, date_from_days, is_decodable};

/// Result column: name, declared engine type and the Arrow type it is read as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    name: String,
    declared_type: String,
    data_type: DataType,
    decodable: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            declared_type: arrow_to_duckdb_type_name(&data_type),
            decodable: is_decodable(&data_type),
            data_type,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Engine type name, e.g. `VARCHAR`, `INTEGER`, `DATE`.
    pub fn declared_type(&self) -> &str {
        &self.declared_type
    }

    pub fn data_type(&self) -> &DataType {
        &self.data_type
    }

    /// False when cells of this column cannot be converted to a [`Value`];
    /// reading one fails with [`DriverError::TypeMismatch`].
    pub fn is_decodable(&self) -> bool {
        self.decodable
    }
}

pub(crate) fn columns_from_schema(schema: &Schema) -> Arc<[Column]> {
    schema
        .fields()
        .iter()
        .map(|field| Column::new(field.name().clone(), field.data_type().clone()))
        .collect()
}

/// One result row. Owns its values; cheap to keep after the cursor is gone.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<[Column]>,
    values: Vec<Value>,
}

impl Row {
    pub(crate) fn new(columns: Arc<[Column]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Raw cells. Columns that are not decodable hold `Value::Null`.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Position of `name`, exact match first, then ASCII case-insensitive
    /// the way the engine resolves unquoted identifiers.
    pub fn column_index(&self, name: &str) -> Result<usize, DriverError> {
        self.columns
            .iter()
            .position(|col| col.name == name)
            .or_else(|| {
                self.columns
                    .iter()
                    .position(|col| col.name.eq_ignore_ascii_case(name))
            })
            .ok_or_else(|| DriverError::ColumnNotFound(name.to_string()))
    }

    pub fn get<T: FromValue>(&self, idx: usize) -> Result<T, DriverError> {
        let (Some(column), Some(value)) = (self.columns.get(idx), self.values.get(idx)) else {
            return Err(DriverError::ColumnNotFound(format!("#{idx}")));
        };
        let mismatch = |actual: String| DriverError::TypeMismatch {
            column: column.name.clone(),
            expected: T::TYPE_NAME,
            actual,
        };
        if !column.decodable {
            return Err(mismatch(column.declared_type.clone()));
        }
        T::from_value(value).ok_or_else(|| {
            mismatch(if matches!(value, Value::Null) {
                "NULL".to_string()
            } else {
                column.declared_type.clone()
            })
        })
    }

    pub fn get_by_name<T: FromValue>(&self, name: &str) -> Result<T, DriverError> {
        self.get(self.column_index(name)?)
    }

    /// Read the whole row at once, e.g. `row.decode::<(String, i32)>()`.
    pub fn decode<R: FromRow>(&self) -> Result<R, DriverError> {
        R::from_row(self)
    }
}

/// Extraction of a Rust value from one cell.
///
/// `from_value` returns `None` when the cell cannot be represented as `Self`
/// without a lossy conversion; the row turns that into a
/// [`DriverError::TypeMismatch`]. NULL only converts into `Option<T>` and
/// [`Value`].
pub trait FromValue: Sized {
    const TYPE_NAME: &'static str;

    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for Value {
    const TYPE_NAME: &'static str = "value";

    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

impl<T: FromValue> FromValue for Option<T> {
    const TYPE_NAME: &'static str = T::TYPE_NAME;

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl FromValue for String {
    const TYPE_NAME: &'static str = "text";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Text(s) | Value::Enum(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl FromValue for bool {
    const TYPE_NAME: &'static str = "boolean";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

macro_rules! impl_from_value_integer {
    ($($ty:ty => $name:literal),+ $(,)?) => {
        $(
            impl FromValue for $ty {
                const TYPE_NAME: &'static str = $name;

                fn from_value(value: &Value) -> Option<Self> {
                    match *value {
                        Value::TinyInt(v) => <$ty>::try_from(v).ok(),
                        Value::SmallInt(v) => <$ty>::try_from(v).ok(),
                        Value::Int(v) => <$ty>::try_from(v).ok(),
                        Value::BigInt(v) => <$ty>::try_from(v).ok(),
                        Value::HugeInt(v) => <$ty>::try_from(v).ok(),
                        Value::UHugeInt(v) => <$ty>::try_from(v).ok(),
                        Value::UTinyInt(v) => <$ty>::try_from(v).ok(),
                        Value::USmallInt(v) => <$ty>::try_from(v).ok(),
                        Value::UInt(v) => <$ty>::try_from(v).ok(),
                        Value::UBigInt(v) => <$ty>::try_from(v).ok(),
                        _ => None,
                    }
                }
            }
        )+
    };
}

impl_from_value_integer!(
    i8 => "integer",
    i16 => "integer",
    i32 => "integer",
    i64 => "integer",
    i128 => "integer",
    u8 => "unsigned integer",
    u16 => "unsigned integer",
    u32 => "unsigned integer",
    u64 => "unsigned integer",
    usize => "unsigned integer",
);

impl FromValue for f32 {
    const TYPE_NAME: &'static str = "float";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromValue for f64 {
    const TYPE_NAME: &'static str = "double";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Double(v) => Some(*v),
            Value::Float(v) => Some(f64::from(*v)),
            _ => None,
        }
    }
}

impl FromValue for Vec<u8> {
    const TYPE_NAME: &'static str = "blob";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Blob(bytes) => Some(bytes.clone()),
            _ => None,
        }
    }
}

impl FromValue for NaiveDate {
    const TYPE_NAME: &'static str = "date";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Date32(days) => date_from_days(*days),
            _ => None,
        }
    }
}

impl FromValue for NaiveDateTime {
    const TYPE_NAME: &'static str = "timestamp";

    fn from_value(value: &Value) -> Option<Self> {
        let (secs, nanos) = match *value {
            Value::Timestamp(TimeUnit::Second, v) => (v, 0),
            Value::Timestamp(TimeUnit::Millisecond, v) => {
                (v.div_euclid(1_000), v.rem_euclid(1_000) * 1_000_000)
            }
            Value::Timestamp(TimeUnit::Microsecond, v) => {
                (v.div_euclid(1_000_000), v.rem_euclid(1_000_000) * 1_000)
            }
            Value::Timestamp(TimeUnit::Nanosecond, v) => {
                (v.div_euclid(1_000_000_000), v.rem_euclid(1_000_000_000))
            }
            _ => return None,
        };
        DateTime::from_timestamp(secs, nanos as u32).map(|dt| dt.naive_utc())
    }
}

/// Extraction of a whole row, implemented for tuples of [`FromValue`] types.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> Result<Self, DriverError>;
}

macro_rules! impl_from_row_tuple {
    ($count:literal => $($idx:tt : $name:ident),+) => {
        impl<$($name: FromValue),+> FromRow for ($($name,)+) {
            fn from_row(row: &Row) -> Result<Self, DriverError> {
                if row.len() != $count {
                    return Err(DriverError::ColumnCount {
                        expected: $count,
                        actual: row.len(),
                    });
                }
                Ok(($(row.get::<$name>($idx)?,)+))
            }
        }
    };
}

impl_from_row_tuple!(1 => 0: A);
impl_from_row_tuple!(2 => 0: A, 1: B);
impl_from_row_tuple!(3 => 0: A, 1: B, 2: C);
impl_from_row_tuple!(4 => 0: A, 1: B, 2: C, 3: D);
impl_from_row_tuple!(5 => 0: A, 1: B, 2: C, 3: D, 4: E);
impl_from_row_tuple!(6 => 0: A, 1: B, 2: C, 3: D, 4: E, 5: F);

#[cfg(test)]
mod tests {
    use super::*;

    fn user_row() -> Row {
        let columns: Arc<[Column]> = vec![
            Column::new("name", DataType::Utf8),
            Column::new("age", DataType::Int32),
            Column::new("bday", DataType::Date32),
            Column::new("nickname", DataType::Utf8),
        ]
        .into();
        Row::new(
            columns,
            vec![
                Value::Text("marc".to_string()),
                Value::Int(99),
                Value::Date32(0),
                Value::Null,
            ],
        )
    }

    #[test]
    fn typed_accessors_by_index_and_name() {
        let row = user_row();
        assert_eq!(row.get::<String>(0).unwrap(), "marc");
        assert_eq!(row.get::<i32>(1).unwrap(), 99);
        assert_eq!(row.get::<i64>(1).unwrap(), 99);
        assert_eq!(row.get_by_name::<i32>("AGE").unwrap(), 99);
        assert_eq!(
            row.get::<NaiveDate>(2).unwrap(),
            NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()
        );
        assert_eq!(row.get::<Option<String>>(3).unwrap(), None);
    }

    #[test]
    fn reading_text_as_number_is_a_type_mismatch() {
        let row = user_row();
        let err = row.get::<i64>(0).unwrap_err();
        match err {
            DriverError::TypeMismatch {
                column,
                expected,
                actual,
            } => {
                assert_eq!(column, "name");
                assert_eq!(expected, "integer");
                assert_eq!(actual, "VARCHAR");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn null_only_reads_as_option() {
        let row = user_row();
        let err = row.get::<String>(3).unwrap_err();
        assert!(matches!(err, DriverError::TypeMismatch { ref actual, .. } if actual == "NULL"));
    }

    #[test]
    fn missing_columns_are_reported() {
        let row = user_row();
        assert!(matches!(row.get::<i32>(9), Err(DriverError::ColumnNotFound(_))));
        assert!(matches!(
            row.get_by_name::<i32>("height"),
            Err(DriverError::ColumnNotFound(_))
        ));
    }

    #[test]
    fn decode_into_tuple_checks_arity() {
        let row = user_row();
        let (name, age, bday, nickname): (String, i32, NaiveDate, Option<String>) =
            row.decode().unwrap();
        assert_eq!(name, "marc");
        assert_eq!(age, 99);
        assert_eq!(bday.to_string(), "1970-01-01");
        assert!(nickname.is_none());

        let err = row.decode::<(String, i32)>().unwrap_err();
        assert!(matches!(
            err,
            DriverError::ColumnCount {
                expected: 2,
                actual: 4
            }
        ));
    }

    #[test]
    fn out_of_range_integers_do_not_truncate() {
        let columns: Arc<[Column]> = vec![Column::new("n", DataType::Int64)].into();
        let row = Row::new(columns, vec![Value::BigInt(i64::from(i32::MAX) + 1)]);
        assert!(row.get::<i32>(0).is_err());
        assert_eq!(row.get::<i64>(0).unwrap(), i64::from(i32::MAX) + 1);
    }
}
