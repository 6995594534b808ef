use crate::sql::base::{
    connection::DbConnection,
    cursor::PagedCursor,
    error::{ConnectorError, DbError},
};
use async_trait::async_trait;
use model::{
    core::{database::DatabaseKind, value::Value},
    records::row::{FieldValue, RowData},
};
use sqlx::{
    Column, ConnectOptions, Executor, Row, Sqlite, TypeInfo, ValueRef,
    query::Query,
    sqlite::{
        SqliteArguments, SqliteConnectOptions, SqliteConnection as SqlxConnection,
        SqliteJournalMode, SqliteRow,
    },
};
use std::{str::FromStr, time::Duration};

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

/// SQLite session over a single sqlx connection.
///
/// Transactions start with `BEGIN IMMEDIATE` so concurrent writers wait on
/// the busy timeout instead of failing on lock upgrade.
pub struct SqliteConnection {
    conn: SqlxConnection,
    in_transaction: bool,
    cursor: Option<PagedCursor>,
}

impl SqliteConnection {
    pub async fn connect(url: &str) -> Result<Self, ConnectorError> {
        let conn = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT)
            .journal_mode(SqliteJournalMode::Wal)
            .connect()
            .await?;
        Ok(SqliteConnection {
            conn,
            in_transaction: false,
            cursor: None,
        })
    }

    async fn run(&mut self, sql: &str) -> Result<(), DbError> {
        self.conn.execute(sql).await?;
        Ok(())
    }
}

fn bind_value<'q>(query: SqliteQuery<'q>, value: &Value) -> SqliteQuery<'q> {
    match value {
        Value::Int(i) => query.bind(*i),
        Value::Uint(u) => match i64::try_from(*u) {
            Ok(i) => query.bind(i),
            Err(_) => query.bind(u.to_string()),
        },
        Value::Float(f) => query.bind(*f),
        Value::Boolean(b) => query.bind(*b),
        Value::Bytes(b) => query.bind(b.clone()),
        Value::Date(d) => query.bind(*d),
        Value::TimestampNaive(ts) => query.bind(*ts),
        Value::Timestamp(ts) => query.bind(ts.naive_utc()),
        Value::Null => query.bind(Option::<String>::None),
        Value::Decimal(_) | Value::String(_) | Value::Json(_) | Value::Uuid(_) => {
            query.bind(value.as_string().unwrap_or_default())
        }
    }
}

fn bind_all<'q>(sql: &'q str, params: &[Value]) -> SqliteQuery<'q> {
    params.iter().fold(sqlx::query(sql), bind_value)
}

fn decode(row: &SqliteRow, idx: usize) -> Result<Value, sqlx::Error> {
    let raw = row.try_get_raw(idx)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let storage = raw.type_info().name().to_string();
    let value = match storage.as_str() {
        "INTEGER" => Value::Int(row.try_get_unchecked::<i64, _>(idx)?),
        "REAL" => Value::Float(row.try_get_unchecked::<f64, _>(idx)?),
        "BLOB" => Value::Bytes(row.try_get_unchecked::<Vec<u8>, _>(idx)?),
        _ => Value::String(row.try_get_unchecked::<String, _>(idx)?),
    };
    Ok(value)
}

fn to_row_data(row: &SqliteRow) -> Result<RowData, sqlx::Error> {
    let fields = row
        .columns()
        .iter()
        .map(|column| {
            Ok(FieldValue::new(
                column.name(),
                decode(row, column.ordinal())?,
            ))
        })
        .collect::<Result<Vec<_>, sqlx::Error>>()?;
    Ok(RowData::new("", fields))
}

#[async_trait]
impl DbConnection for SqliteConnection {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Sqlite
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<RowData>, DbError> {
        let rows = bind_all(sql, params).fetch_all(&mut self.conn).await?;
        Ok(rows
            .iter()
            .map(to_row_data)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, DbError> {
        let result = bind_all(sql, params).execute(&mut self.conn).await?;
        Ok(result.rows_affected())
    }

    async fn begin(&mut self) -> Result<(), DbError> {
        if !self.in_transaction {
            self.run("BEGIN IMMEDIATE").await?;
            self.in_transaction = true;
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        if self.in_transaction {
            self.in_transaction = false;
            self.run("COMMIT").await?;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        if self.in_transaction {
            self.in_transaction = false;
            self.run("ROLLBACK").await?;
        }
        Ok(())
    }

    async fn open_cursor(&mut self, sql: &str) -> Result<(), DbError> {
        self.cursor = Some(PagedCursor::new(sql));
        Ok(())
    }

    async fn fetch_next(&mut self, max_rows: usize) -> Result<Vec<RowData>, DbError> {
        let page = match &self.cursor {
            Some(cursor) => cursor.next_page(self.dialect(), max_rows),
            None => return Err(DbError::NoCursor),
        };
        let Some(page) = page else {
            return Ok(Vec::new());
        };
        let rows = self.query(&page, &[]).await?;
        if let Some(cursor) = self.cursor.as_mut() {
            cursor.advance(rows.len(), max_rows);
        }
        Ok(rows)
    }

    async fn close_cursor(&mut self) -> Result<(), DbError> {
        self.cursor = None;
        Ok(())
    }
}
