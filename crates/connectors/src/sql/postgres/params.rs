use crate::sql::base::error::ParamOutOfRange;
use bytes::BytesMut;
use model::core::value::Value;
use rust_decimal::Decimal as RustDecimal;
use std::{error::Error, str::FromStr};
use tokio_postgres::types::{IsNull, ToSql, Type, to_sql_checked};

type BoxError = Box<dyn Error + Sync + Send>;

/// Binds a `Value` by converting it to whatever the server declared for the
/// parameter, so one value type serves every column type.
#[derive(Debug)]
pub struct PgValue<'a>(pub &'a Value);

pub(crate) fn bind_values(values: &[Value]) -> Vec<PgValue<'_>> {
    values.iter().map(PgValue).collect()
}

pub(crate) fn as_refs<'a>(values: &'a [PgValue<'a>]) -> Vec<&'a (dyn ToSql + Sync)> {
    values.iter().map(|v| v as &(dyn ToSql + Sync)).collect()
}

fn out_of_range(value: &Value, ty: &Type) -> BoxError {
    Box::new(ParamOutOfRange(format!(
        "value {value} does not fit column type {}",
        ty.name()
    )))
}

fn require<T>(converted: Option<T>, value: &Value, ty: &Type) -> Result<T, BoxError> {
    converted.ok_or_else(|| format!("cannot convert {value} to {}", ty.name()).into())
}

impl ToSql for PgValue<'_> {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        let value = self.0;
        if value.is_null() {
            return Ok(IsNull::Yes);
        }

        match *ty {
            Type::BOOL => require(value.as_bool(), value, ty)?.to_sql(ty, out),
            Type::INT2 => {
                let v = require(value.as_i64(), value, ty)?;
                i16::try_from(v)
                    .map_err(|_| out_of_range(value, ty))?
                    .to_sql(ty, out)
            }
            Type::INT4 => {
                let v = require(value.as_i64(), value, ty)?;
                i32::try_from(v)
                    .map_err(|_| out_of_range(value, ty))?
                    .to_sql(ty, out)
            }
            Type::INT8 => match value {
                Value::Uint(u) => i64::try_from(*u)
                    .map_err(|_| out_of_range(value, ty))?
                    .to_sql(ty, out),
                _ => require(value.as_i64(), value, ty)?.to_sql(ty, out),
            },
            Type::OID => {
                let v = require(value.as_i64(), value, ty)?;
                u32::try_from(v)
                    .map_err(|_| out_of_range(value, ty))?
                    .to_sql(ty, out)
            }
            Type::FLOAT4 => {
                let v = require(value.as_f64(), value, ty)?;
                if v.is_finite() && v.abs() > f64::from(f32::MAX) {
                    return Err(out_of_range(value, ty));
                }
                (v as f32).to_sql(ty, out)
            }
            Type::FLOAT8 => require(value.as_f64(), value, ty)?.to_sql(ty, out),
            Type::NUMERIC => {
                let decimal = require(value.as_decimal(), value, ty)?;
                RustDecimal::from_str(&decimal.to_string())
                    .or_else(|_| RustDecimal::from_scientific(&decimal.to_string()))
                    .map_err(|_| out_of_range(value, ty))?
                    .to_sql(ty, out)
            }
            Type::DATE => require(value.as_naive_date(), value, ty)?.to_sql(ty, out),
            Type::TIMESTAMP => require(value.as_naive_datetime(), value, ty)?.to_sql(ty, out),
            Type::TIMESTAMPTZ => require(value.as_datetime_utc(), value, ty)?.to_sql(ty, out),
            Type::UUID => require(value.as_uuid(), value, ty)?.to_sql(ty, out),
            Type::JSON | Type::JSONB => {
                let json = match value {
                    Value::Json(j) => j.clone(),
                    Value::String(s) => serde_json::from_str(s)
                        .unwrap_or_else(|_| serde_json::Value::String(s.clone())),
                    other => serde_json::Value::String(other.as_string().unwrap_or_default()),
                };
                json.to_sql(ty, out)
            }
            Type::BYTEA => match value {
                Value::Bytes(b) => b.as_slice().to_sql(ty, out),
                other => other.as_string().unwrap_or_default().as_bytes().to_sql(ty, out),
            },
            _ => value.as_string().unwrap_or_default().to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}
