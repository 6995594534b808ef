pub mod checkpoint;
pub mod chunk;
pub mod dialect;
pub mod dml;

/// Trims whitespace and trailing statement terminators so the query can be
/// embedded as a derived table.
pub fn strip_terminator(sql: &str) -> &str {
    sql.trim().trim_end_matches(';').trim_end()
}

pub(crate) fn join_list<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    items
        .into_iter()
        .map(|s| s.as_ref().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_terminator() {
        assert_eq!(strip_terminator("  SELECT 1 ;; \n"), "SELECT 1");
        assert_eq!(strip_terminator("SELECT 1"), "SELECT 1");
    }
}
