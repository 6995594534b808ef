use crate::sql::{
    base::{
        connection::DbConnection,
        cursor::PagedCursor,
        error::{ConnectorError, DbError},
    },
    mysql::{params::MySqlParamStore, row::to_row_data},
};
use async_trait::async_trait;
use model::{
    core::{database::DatabaseKind, value::Value},
    records::row::RowData,
};
use mysql_async::{Conn, Opts, Row, prelude::Queryable};

/// MySQL session. The driver streams whole result sets, so cursors are
/// emulated with LIMIT/OFFSET pages.
pub struct MySqlConnection {
    conn: Conn,
    in_transaction: bool,
    cursor: Option<PagedCursor>,
}

impl MySqlConnection {
    pub async fn connect(url: &str) -> Result<Self, ConnectorError> {
        let opts = Opts::from_url(url).map_err(|e| ConnectorError::InvalidUrl(e.to_string()))?;
        Ok(MySqlConnection {
            conn: Conn::new(opts).await?,
            in_transaction: false,
            cursor: None,
        })
    }
}

#[async_trait]
impl DbConnection for MySqlConnection {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::MySql
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<RowData>, DbError> {
        let bindings = MySqlParamStore::from_values(params);
        let rows: Vec<Row> = self.conn.exec(sql, bindings.params()).await?;
        Ok(rows.iter().map(to_row_data).collect())
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, DbError> {
        let bindings = MySqlParamStore::from_values(params);
        self.conn.exec_drop(sql, bindings.params()).await?;
        Ok(self.conn.affected_rows())
    }

    async fn execute_many(&mut self, sql: &str, rows: &[Vec<Value>]) -> Result<u64, DbError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let batch: Vec<_> = rows
            .iter()
            .map(|r| MySqlParamStore::from_values(r).params())
            .collect();
        self.conn.exec_batch(sql, batch).await?;
        Ok(rows.len() as u64)
    }

    async fn begin(&mut self) -> Result<(), DbError> {
        if !self.in_transaction {
            self.conn.query_drop("START TRANSACTION").await?;
            self.in_transaction = true;
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        if self.in_transaction {
            self.in_transaction = false;
            self.conn.query_drop("COMMIT").await?;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        if self.in_transaction {
            self.in_transaction = false;
            self.conn.query_drop("ROLLBACK").await?;
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
