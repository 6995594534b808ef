use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, fmt, str::FromStr};
use uuid::Uuid;

pub const TIMESTAMP_TEXT_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
pub const HASH_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Value {
    Int(i64),
    Uint(u64),
    Float(f64),
    Decimal(BigDecimal),
    String(String),
    Boolean(bool),
    Json(serde_json::Value),
    Uuid(Uuid),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    TimestampNaive(NaiveDateTime),
    Null,
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Uint(v) => i64::try_from(*v).ok(),
            Value::Float(v) if v.fract() == 0.0 && v.is_finite() => {
                if *v >= i64::MIN as f64 && *v <= i64::MAX as f64 {
                    Some(*v as i64)
                } else {
                    None
                }
            }
            Value::Decimal(v) if v.is_integer() => v.to_i64(),
            Value::String(v) => v.trim().parse::<i64>().ok(),
            Value::Boolean(v) => Some(i64::from(*v)),
            Value::Json(v) => v.as_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Uint(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Decimal(v) => v.to_f64(),
            Value::String(v) => v.trim().parse::<f64>().ok(),
            Value::Boolean(v) => Some(if *v { 1.0 } else { 0.0 }),
            Value::Json(v) => v.as_f64(),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<BigDecimal> {
        match self {
            Value::Int(v) => Some(BigDecimal::from(*v)),
            Value::Uint(v) => Some(BigDecimal::from(*v)),
            Value::Float(v) => BigDecimal::from_str(&v.to_string()).ok(),
            Value::Decimal(v) => Some(v.clone()),
            Value::String(v) => BigDecimal::from_str(v.trim()).ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Int(v) => Some(*v != 0),
            Value::Uint(v) => Some(*v != 0),
            Value::Float(v) => Some(*v != 0.0),
            Value::String(v) => match v.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "1" | "y" | "yes" => Some(true),
                "false" | "f" | "0" | "n" | "no" => Some(false),
                _ => None,
            },
            Value::Boolean(v) => Some(*v),
            Value::Json(v) => v.as_bool(),
            _ => None,
        }
    }

    /// Text form without SQL quoting. `None` for `Null`.
    pub fn as_string(&self) -> Option<String> {
        match self {
            Value::Int(v) => Some(v.to_string()),
            Value::Uint(v) => Some(v.to_string()),
            Value::Float(v) => Some(v.to_string()),
            Value::Decimal(v) => Some(decimal_text(v)),
            Value::String(v) => Some(v.clone()),
            Value::Boolean(v) => Some(v.to_string()),
            Value::Json(serde_json::Value::String(s)) => Some(s.clone()),
            Value::Json(v) => Some(v.to_string()),
            Value::Uuid(v) => Some(v.to_string()),
            Value::Bytes(v) => Some(hex(v)),
            Value::Date(v) => Some(v.format("%Y-%m-%d").to_string()),
            Value::Timestamp(v) => Some(v.naive_utc().format(TIMESTAMP_TEXT_FORMAT).to_string()),
            Value::TimestampNaive(v) => Some(v.format(TIMESTAMP_TEXT_FORMAT).to_string()),
            Value::Null => None,
        }
    }

    /// Token used when hashing a row: dates collapse to second precision,
    /// everything else uses its plain text form.
    pub fn hash_token(&self) -> Option<String> {
        match self {
            Value::Date(v) => Some(v.and_time(NaiveTime::MIN).format(HASH_DATE_FORMAT).to_string()),
            Value::Timestamp(v) => Some(v.naive_utc().format(HASH_DATE_FORMAT).to_string()),
            Value::TimestampNaive(v) => Some(v.format(HASH_DATE_FORMAT).to_string()),
            other => other.as_string(),
        }
    }

    pub fn as_naive_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(v) => Some(*v),
            Value::Timestamp(v) => Some(v.date_naive()),
            Value::TimestampNaive(v) => Some(v.date()),
            Value::String(v) => NaiveDate::parse_from_str(v.trim(), "%Y-%m-%d")
                .ok()
                .or_else(|| parse_naive_datetime(v).map(|dt| dt.date())),
            _ => None,
        }
    }

    pub fn as_naive_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Date(v) => Some(v.and_time(NaiveTime::MIN)),
            Value::Timestamp(v) => Some(v.naive_utc()),
            Value::TimestampNaive(v) => Some(*v),
            Value::String(v) => parse_naive_datetime(v),
            _ => None,
        }
    }

    pub fn as_datetime_utc(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(v) => Some(*v),
            Value::String(v) => DateTime::parse_from_rfc3339(v.trim())
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
                .or_else(|| parse_naive_datetime(v).map(|dt| dt.and_utc())),
            other => other.as_naive_datetime().map(|dt| dt.and_utc()),
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Value::Uuid(v) => Some(*v),
            Value::String(v) => Uuid::parse_str(v.trim()).ok(),
            _ => None,
        }
    }

    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        use Value::*;
        match (self, other) {
            (Int(a), Int(b)) => Some(a.cmp(b)),
            (Uint(a), Uint(b)) => Some(a.cmp(b)),
            (Int(a), Uint(b)) => Some(i128::from(*a).cmp(&i128::from(*b))),
            (Uint(a), Int(b)) => Some(i128::from(*a).cmp(&i128::from(*b))),
            (Float(a), Float(b)) => a.partial_cmp(b),
            (Decimal(a), Decimal(b)) => Some(a.cmp(b)),
            (Decimal(_), Int(_) | Uint(_) | Float(_)) | (Int(_) | Uint(_) | Float(_), Decimal(_)) => {
                match (self.as_decimal(), other.as_decimal()) {
                    (Some(a), Some(b)) => Some(a.cmp(&b)),
                    _ => None,
                }
            }
            (Int(_) | Uint(_), Float(_)) | (Float(_), Int(_) | Uint(_)) => {
                self.as_f64()?.partial_cmp(&other.as_f64()?)
            }
            (String(a), String(b)) => Some(a.cmp(b)),
            (Boolean(a), Boolean(b)) => Some(a.cmp(b)),
            (Uuid(a), Uuid(b)) => Some(a.cmp(b)),
            (Date(a), Date(b)) => Some(a.cmp(b)),
            (Timestamp(a), Timestamp(b)) => Some(a.cmp(b)),
            (TimestampNaive(a), TimestampNaive(b)) => Some(a.cmp(b)),
            (Date(_) | Timestamp(_) | TimestampNaive(_), Date(_) | Timestamp(_) | TimestampNaive(_)) => {
                Some(self.as_naive_datetime()?.cmp(&other.as_naive_datetime()?))
            }
            _ => None,
        }
    }

    pub fn equal(&self, other: &Value) -> bool {
        self.compare(other) == Some(Ordering::Equal)
    }

    /// SQL literal form, identical to `Display`.
    pub fn sql_literal(&self) -> String {
        self.to_string()
    }
}

fn parse_naive_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
}

fn decimal_text(value: &BigDecimal) -> String {
    let text = value.to_string();
    if text.contains('.') && !text.contains(['e', 'E']) {
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        text
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut acc, byte| {
        acc.push_str(&format!("{byte:02x}"));
        acc
    })
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Uint(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Decimal(v) => write!(f, "{}", decimal_text(v)),
            Value::Boolean(v) => write!(f, "{}", if *v { 1 } else { 0 }),
            Value::Null => write!(f, "NULL"),
            other => {
                let text = other.as_string().unwrap_or_default();
                write!(f, "'{}'", text.replace('\'', "''"))
            }
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Uint(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimal_text_drops_trailing_zeros() {
        let v = Value::Decimal(BigDecimal::from_str("12.500").unwrap());
        assert_eq!(v.as_string().as_deref(), Some("12.5"));
        let whole = Value::Decimal(BigDecimal::from_str("7.00").unwrap());
        assert_eq!(whole.as_string().as_deref(), Some("7"));
    }

    #[test]
    fn test_hash_token_formats_dates_to_seconds() {
        let date = Value::Date(NaiveDate::from_ymd_opt(2024, 3, 9).unwrap());
        assert_eq!(date.hash_token().as_deref(), Some("2024-03-09 00:00:00"));

        let ts = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_milli_opt(10, 11, 12, 345)
            .unwrap();
        assert_eq!(
            Value::TimestampNaive(ts).hash_token().as_deref(),
            Some("2024-03-09 10:11:12")
        );
        assert_eq!(Value::Null.hash_token(), None);
    }

    #[test]
    fn test_compare_across_numeric_types() {
        let dec = Value::Decimal(BigDecimal::from_str("10.5").unwrap());
        assert_eq!(Value::Int(10).compare(&dec), Some(Ordering::Less));
        assert_eq!(Value::Float(10.5).compare(&dec), Some(Ordering::Equal));
        assert_eq!(Value::Uint(3).compare(&Value::Int(-1)), Some(Ordering::Greater));
        assert_eq!(Value::Int(1).compare(&Value::String("1".into())), None);
    }

    #[test]
    fn test_sql_literal_quotes_text() {
        assert_eq!(Value::String("O'Brien".into()).sql_literal(), "'O''Brien'");
        assert_eq!(Value::Int(42).sql_literal(), "42");
        assert_eq!(Value::Null.sql_literal(), "NULL");
        let d = Value::Date(NaiveDate::from_ymd_opt(2023, 1, 2).unwrap());
        assert_eq!(d.sql_literal(), "'2023-01-02'");
    }

    #[test]
    fn test_string_coercions() {
        let v = Value::String("2024-01-05 08:30:00".into());
        assert_eq!(
            v.as_naive_date(),
            NaiveDate::from_ymd_opt(2024, 1, 5)
        );
        assert_eq!(Value::String(" 17 ".into()).as_i64(), Some(17));
        assert_eq!(Value::String("Y".into()).as_bool(), Some(true));
        assert_eq!(Value::Float(2.5).as_i64(), None);
    }
}
