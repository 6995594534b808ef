use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use model::{
    core::value::Value,
    records::row::{FieldValue, RowData},
};
use mysql_async::{Column, Row, Value as MySqlValue, consts::ColumnType};
use std::str::FromStr;

const BINARY_CHARSET: u16 = 63;

fn decode_bytes(bytes: &[u8], column: &Column) -> Value {
    let text = || std::str::from_utf8(bytes).ok().map(str::trim);
    let parsed = match column.column_type() {
        ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => {
            text().and_then(|t| BigDecimal::from_str(t).ok()).map(Value::Decimal)
        }
        ColumnType::MYSQL_TYPE_TINY
        | ColumnType::MYSQL_TYPE_SHORT
        | ColumnType::MYSQL_TYPE_INT24
        | ColumnType::MYSQL_TYPE_LONG
        | ColumnType::MYSQL_TYPE_LONGLONG
        | ColumnType::MYSQL_TYPE_YEAR => text().and_then(|t| t.parse::<i64>().ok()).map(Value::Int),
        ColumnType::MYSQL_TYPE_FLOAT | ColumnType::MYSQL_TYPE_DOUBLE => {
            text().and_then(|t| t.parse::<f64>().ok()).map(Value::Float)
        }
        ColumnType::MYSQL_TYPE_DATE => text()
            .and_then(|t| NaiveDate::parse_from_str(t, "%Y-%m-%d").ok())
            .map(Value::Date),
        ColumnType::MYSQL_TYPE_DATETIME | ColumnType::MYSQL_TYPE_TIMESTAMP => text()
            .and_then(|t| NaiveDateTime::parse_from_str(t, "%Y-%m-%d %H:%M:%S%.f").ok())
            .map(Value::TimestampNaive),
        ColumnType::MYSQL_TYPE_JSON => text()
            .and_then(|t| serde_json::from_str(t).ok())
            .map(Value::Json),
        _ => None,
    };

    parsed.unwrap_or_else(|| {
        if column.character_set() == BINARY_CHARSET {
            return Value::Bytes(bytes.to_vec());
        }
        match String::from_utf8(bytes.to_vec()) {
            Ok(s) => Value::String(s),
            Err(e) => Value::Bytes(e.into_bytes()),
        }
    })
}

fn decode(raw: &MySqlValue, column: &Column) -> Value {
    match raw {
        MySqlValue::NULL => Value::Null,
        MySqlValue::Int(i) => Value::Int(*i),
        MySqlValue::UInt(u) => Value::Uint(*u),
        MySqlValue::Float(f) => Value::Float(f64::from(*f)),
        MySqlValue::Double(d) => Value::Float(*d),
        MySqlValue::Bytes(bytes) => decode_bytes(bytes, column),
        MySqlValue::Date(y, m, d, h, mi, s, us) => {
            let Some(date) = NaiveDate::from_ymd_opt(i32::from(*y), u32::from(*m), u32::from(*d))
            else {
                // Zero dates ('0000-00-00') have no calendar equivalent.
                return Value::Null;
            };
            if column.column_type() == ColumnType::MYSQL_TYPE_DATE {
                Value::Date(date)
            } else {
                date.and_hms_micro_opt(u32::from(*h), u32::from(*mi), u32::from(*s), *us)
                    .map(Value::TimestampNaive)
                    .unwrap_or(Value::Null)
            }
        }
        MySqlValue::Time(negative, days, h, m, s, us) => {
            let hours = u64::from(*days) * 24 + u64::from(*h);
            let sign = if *negative { "-" } else { "" };
            Value::String(format!("{sign}{hours:02}:{m:02}:{s:02}.{us:06}"))
        }
    }
}

pub(crate) fn to_row_data(row: &Row) -> RowData {
    let fields = row
        .columns_ref()
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let value = row
                .as_ref(idx)
                .map(|raw| decode(raw, column))
                .unwrap_or(Value::Null);
            FieldValue::new(column.name_str().into_owned(), value)
        })
        .collect();
    RowData::new("", fields)
}
