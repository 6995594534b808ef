use crate::query::{dialect::Dialect, join_list, strip_terminator};
use model::core::value::Value;

/// Restricts `sql` to rows strictly after the key position `values`,
/// ordered by the key columns.
///
/// Composite keys use a row-value comparison where the dialect supports it
/// and the equivalent expanded `OR` chain otherwise.
pub fn resume_after(dialect: &dyn Dialect, sql: &str, columns: &[String], values: &[Value]) -> String {
    let sql = strip_terminator(sql);
    if columns.is_empty() || columns.len() != values.len() {
        return sql.to_string();
    }

    let cols: Vec<String> = columns.iter().map(|c| dialect.ident(c)).collect();
    let literals: Vec<String> = values.iter().map(Value::sql_literal).collect();

    let predicate = if cols.len() == 1 {
        format!("{} > {}", cols[0], literals[0])
    } else if dialect.supports_row_value_comparison() {
        format!("({}) > ({})", join_list(&cols), join_list(&literals))
    } else {
        expanded_greater_than(&cols, &literals)
    };

    format!(
        "SELECT * FROM ({sql}) ckpt_src WHERE {predicate} ORDER BY {}",
        join_list(&cols)
    )
}

/// `(a > x) OR (a = x AND b > y) OR ...`
fn expanded_greater_than(cols: &[String], literals: &[String]) -> String {
    (0..cols.len())
        .map(|i| {
            let mut terms: Vec<String> = (0..i)
                .map(|j| format!("{} = {}", cols[j], literals[j]))
                .collect();
            terms.push(format!("{} > {}", cols[i], literals[i]));
            format!("({})", terms.join(" AND "))
        })
        .collect::<Vec<_>>()
        .join(" OR ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::dialect::{Oracle, Postgres};

    fn s(v: &str) -> Value {
        Value::String(v.to_string())
    }

    #[test]
    fn test_single_key_rewrite() {
        let sql = resume_after(&Postgres, "SELECT * FROM orders;", &["ORDER_ID".into()], &[s("1500")]);
        assert_eq!(
            sql,
            "SELECT * FROM (SELECT * FROM orders) ckpt_src WHERE ORDER_ID > '1500' ORDER BY ORDER_ID"
        );
    }

    #[test]
    fn test_composite_row_value_rewrite() {
        let sql = resume_after(
            &Postgres,
            "SELECT * FROM lines",
            &["ORDER_ID".into(), "LINE_NO".into()],
            &[s("10"), Value::Null],
        );
        assert!(sql.contains("WHERE (ORDER_ID, LINE_NO) > ('10', NULL)"));
        assert!(sql.ends_with("ORDER BY ORDER_ID, LINE_NO"));
    }

    #[test]
    fn test_composite_expanded_rewrite() {
        let sql = resume_after(
            &Oracle,
            "SELECT * FROM lines",
            &["A".into(), "B".into()],
            &[s("1"), s("2")],
        );
        assert!(sql.contains("WHERE (A > '1') OR (A = '1' AND B > '2')"));
    }

    #[test]
    fn test_mismatched_values_leave_query_alone() {
        let sql = resume_after(&Postgres, "SELECT 1", &["A".into(), "B".into()], &[s("1")]);
        assert_eq!(sql, "SELECT 1");
    }
}
