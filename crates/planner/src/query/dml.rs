//! Statement builders for the SCD load path. Every builder numbers its
//! placeholders left to right, so callers bind values in column order.

use crate::query::{dialect::Dialect, join_list};
use model::core::value::Value;

/// A column assigned from a SQL expression rather than a bound parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnExpr {
    pub column: String,
    pub expr: String,
}

impl ColumnExpr {
    pub fn new(column: &str, expr: impl Into<String>) -> Self {
        ColumnExpr {
            column: column.to_string(),
            expr: expr.into(),
        }
    }
}

/// `INSERT INTO t (p1.., e1..) VALUES (?.., expr..)`
pub fn insert_statement(
    dialect: &dyn Dialect,
    table: &str,
    param_columns: &[String],
    expr_columns: &[ColumnExpr],
) -> String {
    let columns = param_columns
        .iter()
        .map(|c| dialect.ident(c))
        .chain(expr_columns.iter().map(|e| dialect.ident(&e.column)));
    let values = (0..param_columns.len())
        .map(|i| dialect.placeholder(i))
        .chain(expr_columns.iter().map(|e| e.expr.clone()));

    format!(
        "INSERT INTO {table} ({}) VALUES ({})",
        join_list(columns),
        join_list(values)
    )
}

/// `UPDATE t SET p1 = ?.., e1 = expr.. WHERE key = ?`. The key parameter comes last.
pub fn update_statement(
    dialect: &dyn Dialect,
    table: &str,
    param_columns: &[String],
    expr_columns: &[ColumnExpr],
    key_column: &str,
) -> String {
    let assignments = param_columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} = {}", dialect.ident(c), dialect.placeholder(i)))
        .chain(
            expr_columns
                .iter()
                .map(|e| format!("{} = {}", dialect.ident(&e.column), e.expr)),
        );

    format!(
        "UPDATE {table} SET {} WHERE {} = {}",
        join_list(assignments),
        dialect.ident(key_column),
        dialect.placeholder(param_columns.len())
    )
}

/// Selects `select_columns` for `key_count` keys of `key_columns`, optionally
/// restricted to rows where `filter.0 = filter.1`.
pub fn lookup_statement(
    dialect: &dyn Dialect,
    table: &str,
    select_columns: &[String],
    key_columns: &[String],
    key_count: usize,
    filter: Option<(&str, &Value)>,
) -> String {
    let mut index = 0;
    let mut next_placeholder = || {
        let p = dialect.placeholder(index);
        index += 1;
        p
    };

    let key_predicate = if let [single] = key_columns {
        let placeholders: Vec<String> = (0..key_count).map(|_| next_placeholder()).collect();
        format!("{} IN ({})", dialect.ident(single), join_list(placeholders))
    } else {
        (0..key_count)
            .map(|_| {
                let terms: Vec<String> = key_columns
                    .iter()
                    .map(|k| format!("{} = {}", dialect.ident(k), next_placeholder()))
                    .collect();
                format!("({})", terms.join(" AND "))
            })
            .collect::<Vec<_>>()
            .join(" OR ")
    };

    let columns = join_list(select_columns.iter().map(|c| dialect.ident(c)));
    match filter {
        Some((column, value)) => format!(
            "SELECT {columns} FROM {table} WHERE {} = {} AND ({key_predicate})",
            dialect.ident(column),
            value.sql_literal()
        ),
        None => format!("SELECT {columns} FROM {table} WHERE {key_predicate}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::dialect::{MySql, Postgres};

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_insert_with_expressions() {
        let sql = insert_statement(
            &Postgres,
            "dw.dim_customer",
            &cols(&["CUST_ID", "NAME", "RWHKEY"]),
            &[
                ColumnExpr::new("SKEY", "nextval('dim_customer_seq')"),
                ColumnExpr::new("RECCRDT", "CURRENT_TIMESTAMP"),
            ],
        );
        assert_eq!(
            sql,
            "INSERT INTO dw.dim_customer (CUST_ID, NAME, RWHKEY, SKEY, RECCRDT) \
             VALUES ($1, $2, $3, nextval('dim_customer_seq'), CURRENT_TIMESTAMP)"
        );
    }

    #[test]
    fn test_update_key_parameter_is_last() {
        let sql = update_statement(
            &Postgres,
            "t",
            &cols(&["NAME", "RWHKEY"]),
            &[ColumnExpr::new("RECUPDT", "CURRENT_TIMESTAMP")],
            "SKEY",
        );
        assert_eq!(
            sql,
            "UPDATE t SET NAME = $1, RWHKEY = $2, RECUPDT = CURRENT_TIMESTAMP WHERE SKEY = $3"
        );
    }

    #[test]
    fn test_lookup_single_key_uses_in_list() {
        let flag = Value::String("Y".into());
        let sql = lookup_statement(
            &MySql,
            "dim",
            &cols(&["SKEY", "RWHKEY", "ID"]),
            &cols(&["ID"]),
            3,
            Some(("CURFLG", &flag)),
        );
        assert_eq!(
            sql,
            "SELECT SKEY, RWHKEY, ID FROM dim WHERE CURFLG = 'Y' AND (ID IN (?, ?, ?))"
        );
    }

    #[test]
    fn test_lookup_composite_key() {
        let sql = lookup_statement(&Postgres, "f", &cols(&["SKEY"]), &cols(&["A", "B"]), 2, None);
        assert_eq!(
            sql,
            "SELECT SKEY FROM f WHERE (A = $1 AND B = $2) OR (A = $3 AND B = $4)"
        );
    }
}
