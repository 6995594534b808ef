use crate::sql::{
    base::error::{ConnectorError, DbError},
    mysql::connection::MySqlConnection,
    postgres::connection::PgConnection,
    sqlite::connection::SqliteConnection,
};
use async_trait::async_trait;
use model::{
    core::{database::DatabaseKind, value::Value},
    records::row::RowData,
};
use planner::query::dialect::{Dialect, dialect_for};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One exclusively owned database session.
///
/// A connection holds at most one open cursor. Transactions are explicit:
/// writes issued after `begin` stay invisible to other sessions until `commit`.
#[async_trait]
pub trait DbConnection: Send {
    fn kind(&self) -> DatabaseKind;

    fn dialect(&self) -> &'static dyn Dialect {
        dialect_for(self.kind())
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<RowData>, DbError>;

    /// Executes a statement and returns the number of affected rows.
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, DbError>;

    /// Executes one statement once per parameter row.
    async fn execute_many(&mut self, sql: &str, rows: &[Vec<Value>]) -> Result<u64, DbError> {
        let mut affected = 0;
        for params in rows {
            affected += self.execute(sql, params).await?;
        }
        Ok(affected)
    }

    async fn begin(&mut self) -> Result<(), DbError>;

    async fn commit(&mut self) -> Result<(), DbError>;

    async fn rollback(&mut self) -> Result<(), DbError>;

    /// Starts streaming the results of `sql`.
    async fn open_cursor(&mut self, sql: &str) -> Result<(), DbError>;

    /// Next rows of the open cursor; an empty vector means it is exhausted.
    async fn fetch_next(&mut self, max_rows: usize) -> Result<Vec<RowData>, DbError>;

    async fn close_cursor(&mut self) -> Result<(), DbError>;

    async fn ping(&mut self) -> Result<(), DbError> {
        self.query("SELECT 1", &[]).await.map(|_| ())
    }
}

/// Where and how to connect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionSpec {
    pub kind: DatabaseKind,
    pub url: String,
}

impl ConnectionSpec {
    pub fn new(kind: DatabaseKind, url: &str) -> Self {
        ConnectionSpec {
            kind,
            url: url.to_string(),
        }
    }
}

pub async fn connect(spec: &ConnectionSpec) -> Result<Box<dyn DbConnection>, ConnectorError> {
    debug!(kind = %spec.kind, "Opening database connection");
    match spec.kind {
        DatabaseKind::Postgres => Ok(Box::new(PgConnection::connect(&spec.url).await?)),
        DatabaseKind::MySql => Ok(Box::new(MySqlConnection::connect(&spec.url).await?)),
        DatabaseKind::Sqlite => Ok(Box::new(SqliteConnection::connect(&spec.url).await?)),
        other => Err(ConnectorError::UnsupportedKind(other)),
    }
}

/// Opens fresh connections for parallel workers, which never share one.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn source(&self) -> Result<Box<dyn DbConnection>, ConnectorError>;

    async fn target(&self) -> Result<Box<dyn DbConnection>, ConnectorError>;
}

#[derive(Debug, Clone)]
pub struct SpecConnectionFactory {
    source: ConnectionSpec,
    target: ConnectionSpec,
}

impl SpecConnectionFactory {
    pub fn new(source: ConnectionSpec, target: ConnectionSpec) -> Self {
        SpecConnectionFactory { source, target }
    }
}

#[async_trait]
impl ConnectionFactory for SpecConnectionFactory {
    async fn source(&self) -> Result<Box<dyn DbConnection>, ConnectorError> {
        connect(&self.source).await
    }

    async fn target(&self) -> Result<Box<dyn DbConnection>, ConnectorError> {
        connect(&self.target).await
    }
}
