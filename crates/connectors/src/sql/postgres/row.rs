use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use model::{
    core::value::Value,
    records::row::{FieldValue, RowData},
};
use rust_decimal::Decimal as RustDecimal;
use std::str::FromStr;
use tokio_postgres::{
    Error as PgError, Row,
    types::{FromSql, Type},
};
use tracing::warn;

fn get<'a, T, F>(row: &'a Row, idx: usize, wrap: F) -> Result<Value, PgError>
where
    T: FromSql<'a>,
    F: FnOnce(T) -> Value,
{
    Ok(row.try_get::<_, Option<T>>(idx)?.map(wrap).unwrap_or(Value::Null))
}

fn decode(row: &Row, idx: usize, ty: &Type) -> Result<Value, PgError> {
    match *ty {
        Type::BOOL => get(row, idx, Value::Boolean),
        Type::INT2 => get(row, idx, |v: i16| Value::Int(i64::from(v))),
        Type::INT4 => get(row, idx, |v: i32| Value::Int(i64::from(v))),
        Type::INT8 => get(row, idx, Value::Int),
        Type::OID => get(row, idx, |v: u32| Value::Int(i64::from(v))),
        Type::FLOAT4 => get(row, idx, |v: f32| Value::Float(f64::from(v))),
        Type::FLOAT8 => get(row, idx, Value::Float),
        Type::NUMERIC => get(row, idx, |v: RustDecimal| {
            BigDecimal::from_str(&v.to_string())
                .map(Value::Decimal)
                .unwrap_or_else(|_| Value::String(v.to_string()))
        }),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            get(row, idx, Value::String)
        }
        Type::DATE => get::<NaiveDate, _>(row, idx, Value::Date),
        Type::TIMESTAMP => get::<NaiveDateTime, _>(row, idx, Value::TimestampNaive),
        Type::TIMESTAMPTZ => get::<DateTime<Utc>, _>(row, idx, Value::Timestamp),
        Type::JSON | Type::JSONB => get(row, idx, Value::Json),
        Type::UUID => get(row, idx, Value::Uuid),
        Type::BYTEA => get(row, idx, Value::Bytes),
        _ => match row.try_get::<_, Option<String>>(idx) {
            Ok(v) => Ok(v.map(Value::String).unwrap_or(Value::Null)),
            Err(_) => {
                warn!(column = row.columns()[idx].name(), pg_type = %ty, "Unsupported column type, reading as NULL");
                Ok(Value::Null)
            }
        },
    }
}

pub(crate) fn to_row_data(row: &Row) -> Result<RowData, PgError> {
    let fields = row
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| Ok(FieldValue::new(column.name(), decode(row, idx, column.type_())?)))
        .collect::<Result<Vec<_>, PgError>>()?;
    Ok(RowData::new("", fields))
}
