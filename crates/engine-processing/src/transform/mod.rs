//! Row-level transformations applied before classification: mapping source
//! columns onto the target layout, hashing and key extraction.

use crate::error::TransformError;
use model::{
    core::value::Value,
    execution::job::{ColumnMapping, JobConfig},
    records::row::{FieldValue, RowData},
};

/// Separator placed between column tokens before hashing.
pub const HASH_SEPARATOR: &str = "|~|";
/// Token hashed in place of a null value.
pub const HASH_NULL_TOKEN: &str = "<NULL>";

/// Builds a row with target column names, in mapping order, from a source row.
pub fn rekey(
    row: &RowData,
    mappings: &[&ColumnMapping],
    entity: &str,
) -> Result<RowData, TransformError> {
    let fields = mappings
        .iter()
        .map(|m| {
            row.get(&m.source)
                .map(|f| FieldValue::new(m.target.clone(), f.value.clone()))
                .ok_or_else(|| TransformError::MissingSourceColumn {
                    target: m.target.clone(),
                    source_column: m.source.clone(),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(RowData::new(entity, fields))
}

/// MD5 over the hash columns, rendered as 32 lowercase hex digits.
///
/// Missing columns hash like nulls, and dates collapse to second precision,
/// so the value is stable across drivers that return the same data with
/// different temporal types.
pub fn row_hash(row: &RowData, columns: &[String]) -> String {
    let joined = columns
        .iter()
        .map(|c| {
            row.get_value(c)
                .hash_token()
                .unwrap_or_else(|| HASH_NULL_TOKEN.to_string())
        })
        .collect::<Vec<_>>()
        .join(HASH_SEPARATOR);
    format!("{:x}", md5::compute(joined.as_bytes()))
}

pub fn extract_key(row: &RowData, key_columns: &[String]) -> Vec<Value> {
    row.values_for(key_columns)
}

/// Canonical text of a key, used to match source rows with target rows
/// whatever numeric or temporal type each side returned.
pub fn key_text(values: &[Value]) -> String {
    values
        .iter()
        .map(|v| v.as_string().unwrap_or_default())
        .collect::<Vec<_>>()
        .join("|")
}

/// A source row ready for classification.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformedRow {
    /// Data columns under their target names.
    pub row: RowData,
    pub key: Vec<Value>,
    pub key_text: String,
    pub hash: String,
}

pub fn transform_row(job: &JobConfig, source: &RowData) -> Result<TransformedRow, TransformError> {
    let row = rekey(source, &job.data_columns(), &job.target_table)?;
    let key = extract_key(&row, &job.primary_key_targets());
    let hash = row_hash(&row, &job.hash_columns());
    Ok(TransformedRow {
        key_text: key_text(&key),
        key,
        hash,
        row,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use model::execution::job::TableType;

    fn job() -> JobConfig {
        JobConfig::new("M_CUST", "J1", "DIM_CUSTOMER", TableType::Dim, "SELECT * FROM src")
            .with_primary_key("CUST_ID", "id")
            .with_column("NAME", "name")
            .with_column("LOAD_TS", "load_ts")
            .with_hash_excluded("LOAD_TS")
    }

    #[test]
    fn test_rekey_maps_source_names() {
        let source = RowData::from_pairs("", [("ID", Value::Int(1)), ("NAME", "Ada".into()), ("LOAD_TS", Value::Null)]);
        let mappings = job().columns.clone();
        let refs: Vec<&ColumnMapping> = mappings.iter().collect();
        let row = rekey(&source, &refs, "DIM_CUSTOMER").unwrap();
        assert_eq!(row.columns(), vec!["CUST_ID", "NAME", "LOAD_TS"]);
        assert_eq!(row.get_value("cust_id"), Value::Int(1));
    }

    #[test]
    fn test_rekey_reports_missing_column() {
        let source = RowData::from_pairs("", [("id", 1i64)]);
        let err = transform_row(&job(), &source).unwrap_err();
        assert!(matches!(err, TransformError::MissingSourceColumn { ref target, .. } if target == "NAME"));
    }

    #[test]
    fn test_hash_is_stable_and_hex() {
        let row = RowData::from_pairs("", [("A", Value::Int(1)), ("B", "x".into())]);
        let cols = vec!["A".to_string(), "B".to_string()];
        let h1 = row_hash(&row, &cols);
        assert_eq!(h1, row_hash(&row.clone(), &cols));
        assert_eq!(h1.len(), 32);
        assert!(h1.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(h1, format!("{:x}", md5::compute("1|~|x")));
    }

    #[test]
    fn test_hash_treats_null_and_missing_alike() {
        let cols = vec!["A".to_string(), "B".to_string()];
        let with_null = RowData::from_pairs("", [("A", Value::Int(1)), ("B", Value::Null)]);
        let missing = RowData::from_pairs("", [("A", Value::Int(1))]);
        assert_eq!(row_hash(&with_null, &cols), row_hash(&missing, &cols));
        assert_eq!(row_hash(&with_null, &cols), format!("{:x}", md5::compute("1|~|<NULL>")));
    }

    #[test]
    fn test_hash_normalizes_dates() {
        let cols = vec!["D".to_string()];
        let date = RowData::from_pairs("", [("D", Value::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()))]);
        let ts = RowData::from_pairs(
            "",
            [("D", Value::Timestamp(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()))],
        );
        assert_eq!(row_hash(&date, &cols), row_hash(&ts, &cols));
    }

    #[test]
    fn test_excluded_columns_do_not_change_hash() {
        let a = RowData::from_pairs("", [("id", Value::Int(1)), ("name", "Ada".into()), ("load_ts", "2024-01-01".into())]);
        let b = RowData::from_pairs("", [("id", Value::Int(1)), ("name", "Ada".into()), ("load_ts", "2024-02-01".into())]);
        let (ta, tb) = (transform_row(&job(), &a).unwrap(), transform_row(&job(), &b).unwrap());
        assert_eq!(ta.hash, tb.hash);
        assert_eq!(ta.key_text, "1");
    }

    #[test]
    fn test_key_text_matches_across_numeric_types() {
        use bigdecimal::BigDecimal;
        use std::str::FromStr;
        let a = key_text(&[Value::Int(5), "x".into()]);
        let b = key_text(&[Value::Decimal(BigDecimal::from_str("5.00").unwrap()), "x".into()]);
        assert_eq!(a, b);
    }
}
