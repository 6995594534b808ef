use crate::query::{dialect::Dialect, strip_terminator};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChunkStrategy {
    /// Wrap and paginate by offset/limit.
    OffsetLimit,
    /// Number rows with `ROW_NUMBER()` over the query's ordering keys and filter ranges.
    KeyBased,
}

/// One column of a top-level `ORDER BY`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderKey {
    pub column: String,
    pub descending: bool,
}

impl OrderKey {
    pub fn asc(column: &str) -> Self {
        OrderKey {
            column: column.to_string(),
            descending: false,
        }
    }

    pub fn desc(column: &str) -> Self {
        OrderKey {
            column: column.to_string(),
            descending: true,
        }
    }
}

/// How a source query is split into independently processable chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkPlan {
    pub strategy: ChunkStrategy,
    pub chunk_size: u64,
    pub estimated_rows: u64,
    pub chunk_count: usize,
    /// Full ordering the chunk windows are numbered over. Empty for offset/limit.
    pub key_columns: Vec<OrderKey>,
}

impl ChunkPlan {
    pub fn new(estimated_rows: u64, chunk_size: u64, key_columns: Vec<OrderKey>) -> Self {
        let chunk_size = chunk_size.max(1);
        let chunk_count = estimated_rows.div_ceil(chunk_size).max(1) as usize;
        let strategy = if key_columns.is_empty() {
            ChunkStrategy::OffsetLimit
        } else {
            ChunkStrategy::KeyBased
        };
        ChunkPlan {
            strategy,
            chunk_size,
            estimated_rows,
            chunk_count,
            key_columns,
        }
    }

    /// Leading ordering column, if the plan is key based.
    pub fn key_column(&self) -> Option<&str> {
        self.key_columns.first().map(|k| k.column.as_str())
    }

    /// Half-open row range `[start, end)` covered by chunk `index`.
    pub fn bounds(&self, index: usize) -> (u64, u64) {
        let start = index as u64 * self.chunk_size;
        (start, start + self.chunk_size)
    }

    /// Rows the estimate says chunk `index` holds.
    pub fn expected_rows(&self, index: usize) -> u64 {
        let (start, end) = self.bounds(index);
        end.min(self.estimated_rows).saturating_sub(start)
    }

    pub fn query_for(&self, dialect: &dyn Dialect, sql: &str, index: usize) -> String {
        chunk_query(dialect, sql, index, self.chunk_size, &self.key_columns)
    }
}

pub fn count_query(sql: &str) -> String {
    format!(
        "SELECT COUNT(*) AS row_count FROM ({}) count_src",
        strip_terminator(sql)
    )
}

/// At most one row of `sql`, used to learn which columns it exposes.
pub fn sample_query(dialect: &dyn Dialect, sql: &str) -> String {
    dialect.paginate(
        &format!("SELECT * FROM ({}) key_sample", strip_terminator(sql)),
        0,
        1,
    )
}

/// Rewrites `sql` so it only yields chunk `index` of `chunk_size` rows.
/// With ordering keys the rows are numbered over the whole key list, so
/// rows tying on a leading column still land in exactly one chunk.
pub fn chunk_query(
    dialect: &dyn Dialect,
    sql: &str,
    index: usize,
    chunk_size: u64,
    keys: &[OrderKey],
) -> String {
    let sql = strip_terminator(sql);
    let start = index as u64 * chunk_size;
    if keys.is_empty() {
        return dialect.paginate(&format!("SELECT * FROM ({sql}) chunk_src"), start, chunk_size);
    }

    let ordering = keys
        .iter()
        .map(|k| {
            let column = dialect.ident(&k.column);
            if k.descending {
                format!("chunk_src.{column} DESC")
            } else {
                format!("chunk_src.{column}")
            }
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "SELECT * FROM (SELECT chunk_src.*, ROW_NUMBER() OVER (ORDER BY {ordering}) AS chunk_rn \
         FROM ({sql}) chunk_src) chunk_win \
         WHERE chunk_rn > {start} AND chunk_rn <= {end} ORDER BY chunk_rn",
        end = start + chunk_size
    )
}

/// Best-effort parse of the last top-level `ORDER BY` into plain columns.
/// Expressions, positional references and `NULLS` modifiers yield `None`.
pub fn detect_order_keys(sql: &str) -> Option<Vec<OrderKey>> {
    let sql = strip_terminator(sql);
    let clause = &sql[last_top_level_order_by(sql)?..];
    if clause.contains('(') {
        return None;
    }

    let mut keys = Vec::new();
    for item in clause.split(',') {
        let mut tokens = item.split_whitespace();
        let column = unqualified_column(tokens.next()?)?;
        let mut descending = false;
        let mut clause_ended = false;
        for token in tokens {
            match token.to_ascii_uppercase().as_str() {
                "ASC" => {}
                "DESC" => descending = true,
                "LIMIT" | "OFFSET" | "FETCH" | "FOR" => {
                    clause_ended = true;
                    break;
                }
                _ => return None,
            }
        }
        keys.push(OrderKey { column, descending });
        if clause_ended {
            break;
        }
    }
    (!keys.is_empty()).then_some(keys)
}

/// First column of the last top-level `ORDER BY`.
pub fn detect_key_column(sql: &str) -> Option<String> {
    detect_order_keys(sql)?.into_iter().next().map(|k| k.column)
}

fn unqualified_column(token: &str) -> Option<String> {
    if token.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let column = token
        .rsplit('.')
        .next()?
        .trim_matches(|c| matches!(c, '"' | '`' | '[' | ']'));
    (!column.is_empty()).then(|| column.to_string())
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn is_word_at(text: &[u8], start: usize, word: &[u8]) -> bool {
    text[start..].starts_with(word)
        && (start == 0 || !is_word_byte(text[start - 1]))
        && text
            .get(start + word.len())
            .is_none_or(|b| !is_word_byte(*b))
}

/// Byte offset just past the `BY` of the last `ORDER BY` outside any
/// parentheses or string literal.
fn last_top_level_order_by(sql: &str) -> Option<usize> {
    let upper = sql.to_ascii_uppercase();
    let bytes = upper.as_bytes();
    let mut depth = 0i32;
    let mut in_literal = false;
    let mut found = None;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if in_literal {
            if b == b'\'' {
                in_literal = false;
            }
            i += 1;
            continue;
        }
        match b {
            b'\'' => in_literal = true,
            b'(' => depth += 1,
            b')' => depth -= 1,
            b'O' if depth == 0 && is_word_at(bytes, i, b"ORDER") => {
                let mut j = i + 5;
                while j < bytes.len() && bytes[j].is_ascii_whitespace() {
                    j += 1;
                }
                if j > i + 5 && is_word_at(bytes, j, b"BY") {
                    found = Some(j + 2);
                    i = j + 2;
                    continue;
                }
            }
            _ => {}
        }
        i += 1;
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::dialect::{Postgres, Sqlite};

    #[test]
    fn test_detect_key_column() {
        assert_eq!(
            detect_key_column("SELECT * FROM orders o ORDER BY o.order_id DESC, created"),
            Some("order_id".into())
        );
        assert_eq!(
            detect_key_column("select * from t order   by id;"),
            Some("id".into())
        );
        assert_eq!(detect_key_column("SELECT * FROM t"), None);
        assert_eq!(detect_key_column("SELECT * FROM t ORDER BY 1"), None);
        assert_eq!(detect_key_column("SELECT * FROM t ORDER BY lower(name)"), None);
    }

    #[test]
    fn test_detect_full_ordering() {
        assert_eq!(
            detect_order_keys("SELECT * FROM o ORDER BY o.region, order_id DESC LIMIT 50"),
            Some(vec![OrderKey::asc("region"), OrderKey::desc("order_id")])
        );
        assert_eq!(detect_order_keys("SELECT * FROM t ORDER BY a, 2"), None);
        assert_eq!(detect_order_keys("SELECT * FROM t ORDER BY a NULLS LAST"), None);
    }

    #[test]
    fn test_detect_ignores_nested_order_by() {
        let sql = "SELECT a, ROW_NUMBER() OVER (ORDER BY b) rn FROM (SELECT * FROM x ORDER BY c) s";
        assert_eq!(detect_key_column(sql), None);
        let sql = "SELECT 'ORDER BY z' AS label, id FROM t ORDER BY \"ID\"";
        assert_eq!(detect_key_column(sql), Some("ID".into()));
    }

    #[test]
    fn test_plan_chunk_count() {
        let plan = ChunkPlan::new(120_000, 50_000, Vec::new());
        assert_eq!(plan.strategy, ChunkStrategy::OffsetLimit);
        assert_eq!(plan.expected_rows(2), 20_000);

        let plan = ChunkPlan::new(120_000, 50_000, Vec::new());
        assert_eq!(plan.chunk_count, 3);

        let empty = ChunkPlan::new(0, 50_000, vec![OrderKey::asc("id")]);
        assert_eq!(empty.chunk_count, 1);
        assert_eq!(empty.strategy, ChunkStrategy::KeyBased);
        assert_eq!(empty.key_column(), Some("id"));
    }

    #[test]
    fn test_offset_windows_partition_rows() {
        let total = 1_234u64;
        let plan = ChunkPlan::new(total, 100, Vec::new());
        let mut covered = Vec::new();
        for i in 0..plan.chunk_count {
            let (start, end) = plan.bounds(i);
            covered.extend(start..end.min(total));
        }
        assert_eq!(covered, (0..total).collect::<Vec<_>>());
    }

    #[test]
    fn test_chunk_queries() {
        let offset = chunk_query(&Postgres, "SELECT * FROM t;", 2, 10, &[]);
        assert_eq!(offset, "SELECT * FROM (SELECT * FROM t) chunk_src LIMIT 10 OFFSET 20");

        let keyed = chunk_query(&Sqlite, "SELECT id FROM t ORDER BY id", 1, 5, &[OrderKey::asc("id")]);
        assert!(keyed.contains("ROW_NUMBER() OVER (ORDER BY chunk_src.id)"));
        assert!(keyed.contains("chunk_rn > 5 AND chunk_rn <= 10"));
        assert!(keyed.ends_with("ORDER BY chunk_rn"));
    }

    #[test]
    fn test_composite_ordering_numbers_over_every_key() {
        let sql = "SELECT region, order_id FROM orders ORDER BY region, order_id DESC";
        let keys = detect_order_keys(sql).unwrap();
        let plan = ChunkPlan::new(10, 4, keys);
        let chunk = plan.query_for(&Postgres, sql, 1);
        assert!(chunk.contains(
            "ROW_NUMBER() OVER (ORDER BY chunk_src.region, chunk_src.order_id DESC)"
        ));
        assert!(chunk.contains("chunk_rn > 4 AND chunk_rn <= 8"));
    }

    #[test]
    fn test_sample_query_reads_one_row() {
        assert_eq!(
            sample_query(&Postgres, "SELECT id AS cid FROM t ORDER BY id;"),
            "SELECT * FROM (SELECT id AS cid FROM t ORDER BY id) key_sample LIMIT 1 OFFSET 0"
        );
    }

    #[test]
    fn test_count_query() {
        assert_eq!(
            count_query("SELECT * FROM t"),
            "SELECT COUNT(*) AS row_count FROM (SELECT * FROM t) count_src"
        );
    }
}
