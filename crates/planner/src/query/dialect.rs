//! Defines the `Dialect` trait for database-specific SQL syntax.

pub use model::core::database::DatabaseKind;

/// How a dialect produces the next surrogate key on insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceExpr {
    /// Expression to place in the insert's value list.
    Expr(String),
    /// The column is filled by the database and must be left out of the insert.
    AutoIncrement,
}

pub trait Dialect: Send + Sync {
    fn kind(&self) -> DatabaseKind;

    /// Returns the name of the dialect (e.g., "PostgreSQL", "MySQL").
    fn name(&self) -> &'static str;

    /// Wraps an identifier (like a table or column name) in the correct
    /// quotation marks for the dialect.
    ///
    /// - PostgreSQL uses double quotes: `"my_column"`
    /// - MySQL uses backticks: `` `my_column` ``
    /// - SQL Server uses brackets: `[my_column]`
    fn quote_identifier(&self, ident: &str) -> String {
        format!(r#""{}""#, ident.replace('"', "\"\""))
    }

    /// Renders an identifier, quoting it only when it is not a plain word.
    /// Plain names are left alone so the database applies its usual case folding.
    fn ident(&self, name: &str) -> String {
        if is_plain_identifier(name) {
            name.to_string()
        } else {
            self.quote_identifier(name)
        }
    }

    /// Returns the placeholder for the zero-based parameter `index`.
    fn placeholder(&self, index: usize) -> String;

    fn current_timestamp(&self) -> &'static str {
        "CURRENT_TIMESTAMP"
    }

    fn current_date(&self) -> &'static str {
        "CURRENT_DATE"
    }

    fn sequence_next_value(&self, sequence: &str) -> SequenceExpr;

    /// Restricts `sql` to `limit` rows starting at row `offset`.
    fn paginate(&self, sql: &str, offset: u64, limit: u64) -> String {
        format!("{sql} LIMIT {limit} OFFSET {offset}")
    }

    /// Whether tables are addressed as `schema.table`.
    fn uses_schema_prefix(&self) -> bool {
        true
    }

    fn qualified_table(&self, schema: Option<&str>, table: &str) -> String {
        match schema.filter(|s| !s.is_empty()) {
            Some(schema) if self.uses_schema_prefix() => {
                format!("{}.{}", self.ident(schema), self.ident(table))
            }
            _ => self.ident(table),
        }
    }

    /// Whether `(a, b) > (x, y)` is understood.
    fn supports_row_value_comparison(&self) -> bool {
        true
    }

    fn savepoint(&self, name: &str) -> String {
        format!("SAVEPOINT {name}")
    }

    fn rollback_to_savepoint(&self, name: &str) -> String {
        format!("ROLLBACK TO SAVEPOINT {name}")
    }

    /// `None` for dialects without an explicit release statement.
    fn release_savepoint(&self, name: &str) -> Option<String> {
        Some(format!("RELEASE SAVEPOINT {name}"))
    }
}

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

#[derive(Debug, Clone)]
pub struct Postgres;

impl Dialect for Postgres {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Postgres
    }

    fn name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index + 1)
    }

    fn sequence_next_value(&self, sequence: &str) -> SequenceExpr {
        SequenceExpr::Expr(format!("nextval('{}')", sequence.replace('\'', "''")))
    }
}

#[derive(Debug, Clone)]
pub struct MySql;

impl Dialect for MySql {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::MySql
    }

    fn name(&self) -> &'static str {
        "MySQL"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        format!("`{}`", ident.replace('`', "``"))
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".into()
    }

    fn sequence_next_value(&self, _sequence: &str) -> SequenceExpr {
        SequenceExpr::AutoIncrement
    }
}

#[derive(Debug, Clone)]
pub struct Oracle;

impl Dialect for Oracle {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Oracle
    }

    fn name(&self) -> &'static str {
        "Oracle"
    }

    fn placeholder(&self, index: usize) -> String {
        format!(":{}", index + 1)
    }

    fn current_timestamp(&self) -> &'static str {
        "SYSTIMESTAMP"
    }

    fn current_date(&self) -> &'static str {
        "SYSDATE"
    }

    fn sequence_next_value(&self, sequence: &str) -> SequenceExpr {
        SequenceExpr::Expr(format!("{}.NEXTVAL", self.ident(sequence)))
    }

    fn paginate(&self, sql: &str, offset: u64, limit: u64) -> String {
        format!(
            "SELECT * FROM (SELECT page_src.*, ROWNUM page_rnum FROM ({sql}) page_src WHERE ROWNUM <= {}) WHERE page_rnum > {offset}",
            offset + limit
        )
    }

    fn supports_row_value_comparison(&self) -> bool {
        false
    }

    fn release_savepoint(&self, _name: &str) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct SqlServer;

impl Dialect for SqlServer {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::SqlServer
    }

    fn name(&self) -> &'static str {
        "SQL Server"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        format!("[{}]", ident.replace(']', "]]"))
    }

    fn placeholder(&self, index: usize) -> String {
        format!("@P{}", index + 1)
    }

    fn current_date(&self) -> &'static str {
        "CAST(GETDATE() AS DATE)"
    }

    fn sequence_next_value(&self, sequence: &str) -> SequenceExpr {
        SequenceExpr::Expr(format!("NEXT VALUE FOR {}", self.ident(sequence)))
    }

    fn paginate(&self, sql: &str, offset: u64, limit: u64) -> String {
        format!("{sql} ORDER BY (SELECT NULL) OFFSET {offset} ROWS FETCH NEXT {limit} ROWS ONLY")
    }

    fn supports_row_value_comparison(&self) -> bool {
        false
    }

    fn savepoint(&self, name: &str) -> String {
        format!("SAVE TRANSACTION {name}")
    }

    fn rollback_to_savepoint(&self, name: &str) -> String {
        format!("ROLLBACK TRANSACTION {name}")
    }

    fn release_savepoint(&self, _name: &str) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct Sqlite;

impl Dialect for Sqlite {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Sqlite
    }

    fn name(&self) -> &'static str {
        "SQLite"
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".into()
    }

    fn sequence_next_value(&self, _sequence: &str) -> SequenceExpr {
        SequenceExpr::AutoIncrement
    }

    fn uses_schema_prefix(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone)]
pub struct Snowflake;

impl Dialect for Snowflake {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Snowflake
    }

    fn name(&self) -> &'static str {
        "Snowflake"
    }

    fn placeholder(&self, index: usize) -> String {
        format!(":{}", index + 1)
    }

    fn sequence_next_value(&self, sequence: &str) -> SequenceExpr {
        SequenceExpr::Expr(format!("{}.NEXTVAL", self.ident(sequence)))
    }
}

/// ANSI fallback used for unrecognised database tags.
#[derive(Debug, Clone)]
pub struct Generic;

impl Dialect for Generic {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Generic
    }

    fn name(&self) -> &'static str {
        "Generic"
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".into()
    }

    fn sequence_next_value(&self, sequence: &str) -> SequenceExpr {
        SequenceExpr::Expr(format!("NEXT VALUE FOR {}", self.ident(sequence)))
    }

    fn paginate(&self, sql: &str, offset: u64, limit: u64) -> String {
        format!("{sql} OFFSET {offset} ROWS FETCH NEXT {limit} ROWS ONLY")
    }
}

pub fn dialect_for(kind: DatabaseKind) -> &'static dyn Dialect {
    match kind {
        DatabaseKind::Postgres => &Postgres,
        DatabaseKind::MySql => &MySql,
        DatabaseKind::Oracle => &Oracle,
        DatabaseKind::SqlServer => &SqlServer,
        DatabaseKind::Sqlite => &Sqlite,
        DatabaseKind::Snowflake => &Snowflake,
        DatabaseKind::Generic => &Generic,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders_per_family() {
        assert_eq!(dialect_for(DatabaseKind::Postgres).placeholder(0), "$1");
        assert_eq!(dialect_for(DatabaseKind::MySql).placeholder(4), "?");
        assert_eq!(dialect_for(DatabaseKind::Oracle).placeholder(1), ":2");
        assert_eq!(dialect_for(DatabaseKind::SqlServer).placeholder(2), "@P3");
    }

    #[test]
    fn test_sequence_or_auto_increment() {
        assert_eq!(
            Postgres.sequence_next_value("dim_cust_seq"),
            SequenceExpr::Expr("nextval('dim_cust_seq')".into())
        );
        assert_eq!(Oracle.sequence_next_value("DIM_SEQ"), SequenceExpr::Expr("DIM_SEQ.NEXTVAL".into()));
        assert_eq!(Sqlite.sequence_next_value("x"), SequenceExpr::AutoIncrement);
        assert_eq!(MySql.sequence_next_value("x"), SequenceExpr::AutoIncrement);
    }

    #[test]
    fn test_qualified_table_respects_schema_capability() {
        assert_eq!(Postgres.qualified_table(Some("dw"), "dim_customer"), "dw.dim_customer");
        assert_eq!(Sqlite.qualified_table(Some("dw"), "dim_customer"), "dim_customer");
        assert_eq!(Postgres.qualified_table(None, "t"), "t");
        assert_eq!(MySql.qualified_table(Some("dw"), "order lines"), "dw.`order lines`");
    }

    #[test]
    fn test_pagination_forms() {
        assert_eq!(Postgres.paginate("SELECT 1", 20, 10), "SELECT 1 LIMIT 10 OFFSET 20");
        assert_eq!(
            SqlServer.paginate("SELECT 1", 0, 5),
            "SELECT 1 ORDER BY (SELECT NULL) OFFSET 0 ROWS FETCH NEXT 5 ROWS ONLY"
        );
        assert!(Oracle.paginate("SELECT 1", 10, 5).contains("ROWNUM <= 15"));
    }

    #[test]
    fn test_plain_identifiers_stay_unquoted() {
        assert_eq!(Postgres.ident("CUST_ID"), "CUST_ID");
        assert_eq!(Postgres.ident("2nd col"), "\"2nd col\"");
        assert_eq!(SqlServer.ident("a]b"), "[a]]b]");
    }
}
