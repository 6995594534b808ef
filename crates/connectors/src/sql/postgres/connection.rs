use crate::sql::{
    base::{
        connection::DbConnection,
        error::{ConnectorError, DbError},
    },
    postgres::{
        params::{as_refs, bind_values},
        row::to_row_data,
        tls::open_client,
    },
};
use async_trait::async_trait;
use model::{
    core::{database::DatabaseKind, value::Value},
    records::row::RowData,
};
use tokio_postgres::Client;

const CURSOR_NAME: &str = "mapper_cursor";

/// PostgreSQL session. Cursors are real server-side cursors, declared
/// inside a transaction the connection opens itself when none is active.
pub struct PgConnection {
    client: Client,
    in_transaction: bool,
    cursor: Option<CursorState>,
}

struct CursorState {
    owns_transaction: bool,
}

impl PgConnection {
    pub async fn connect(url: &str) -> Result<Self, ConnectorError> {
        Ok(PgConnection {
            client: open_client(url).await?,
            in_transaction: false,
            cursor: None,
        })
    }
}

#[async_trait]
impl DbConnection for PgConnection {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Postgres
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<RowData>, DbError> {
        let bindings = bind_values(params);
        let rows = self.client.query(sql, &as_refs(&bindings)).await?;
        Ok(rows.iter().map(to_row_data).collect::<Result<Vec<_>, _>>()?)
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, DbError> {
        let bindings = bind_values(params);
        Ok(self.client.execute(sql, &as_refs(&bindings)).await?)
    }

    async fn execute_many(&mut self, sql: &str, rows: &[Vec<Value>]) -> Result<u64, DbError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let statement = self.client.prepare(sql).await?;
        let mut affected = 0;
        for params in rows {
            let bindings = bind_values(params);
            affected += self.client.execute(&statement, &as_refs(&bindings)).await?;
        }
        Ok(affected)
    }

    async fn begin(&mut self) -> Result<(), DbError> {
        if !self.in_transaction {
            self.client.batch_execute("BEGIN").await?;
            self.in_transaction = true;
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        if self.in_transaction {
            self.in_transaction = false;
            self.client.batch_execute("COMMIT").await?;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        if self.in_transaction {
            self.in_transaction = false;
            self.client.batch_execute("ROLLBACK").await?;
        }
        Ok(())
    }

    async fn open_cursor(&mut self, sql: &str) -> Result<(), DbError> {
        self.close_cursor().await?;
        let owns_transaction = !self.in_transaction;
        self.begin().await?;
        self.client
            .batch_execute(&format!("DECLARE {CURSOR_NAME} NO SCROLL CURSOR FOR {sql}"))
            .await?;
        self.cursor = Some(CursorState { owns_transaction });
        Ok(())
    }

    async fn fetch_next(&mut self, max_rows: usize) -> Result<Vec<RowData>, DbError> {
        if self.cursor.is_none() {
            return Err(DbError::NoCursor);
        }
        let rows = self
            .client
            .query(&format!("FETCH FORWARD {max_rows} FROM {CURSOR_NAME}"), &[])
            .await?;
        Ok(rows.iter().map(to_row_data).collect::<Result<Vec<_>, _>>()?)
    }

    async fn close_cursor(&mut self) -> Result<(), DbError> {
        if let Some(cursor) = self.cursor.take() {
            self.client
                .batch_execute(&format!("CLOSE {CURSOR_NAME}"))
                .await?;
            if cursor.owns_transaction {
                self.commit().await?;
            }
        }
        Ok(())
    }
}
