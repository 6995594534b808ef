use crate::{
    error::StateStoreError,
    state::{
        SessionStore,
        models::{BatchLog, RunRecord, RunStatus, RunSummary},
    },
};
use async_trait::async_trait;
use chrono::Utc;
use connectors::{DbConnection, DbError};
use model::{
    core::value::Value,
    execution::{failed_row::RowErrorRecord, session::SessionKey},
    records::row::RowData,
};
use planner::query::{dialect::Dialect, dml::insert_statement};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

const STOP_FLAG: &str = "Y";

/// Names of the metadata tables. The tables are provisioned outside the
/// engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct MetadataTables {
    pub schema: Option<String>,
    pub process_log: String,
    pub batch_log: String,
    pub error_log: String,
    pub stop_request: String,
}

impl Default for MetadataTables {
    fn default() -> Self {
        MetadataTables {
            schema: None,
            process_log: "ETL_PROCESS_LOG".into(),
            batch_log: "ETL_BATCH_LOG".into(),
            error_log: "ETL_ERROR_LOG".into(),
            stop_request: "ETL_STOP_REQUEST".into(),
        }
    }
}

impl MetadataTables {
    pub fn with_schema(mut self, schema: &str) -> Self {
        self.schema = Some(schema.to_string());
        self
    }
}

/// Session store over relational metadata tables.
///
/// One connection is shared by every caller; each operation is a short
/// begin/write/commit cycle under the connection lock.
pub struct SqlSessionStore {
    conn: Mutex<Box<dyn DbConnection>>,
    dialect: &'static dyn Dialect,
    tables: MetadataTables,
}

fn count(n: u64) -> Value {
    Value::Int(i64::try_from(n).unwrap_or(i64::MAX))
}

fn text(s: &str) -> Value {
    Value::String(s.to_string())
}

fn session_values(session: &SessionKey) -> Vec<Value> {
    vec![
        text(&session.mapref),
        Value::Int(session.process_id),
        Value::Int(session.session_id),
    ]
}

impl SqlSessionStore {
    pub fn new(conn: Box<dyn DbConnection>, tables: MetadataTables) -> Self {
        let dialect = conn.dialect();
        SqlSessionStore {
            conn: Mutex::new(conn),
            dialect,
            tables,
        }
    }

    fn table(&self, name: &str) -> String {
        self.dialect.qualified_table(self.tables.schema.as_deref(), name)
    }

    fn p(&self, index: usize) -> String {
        self.dialect.placeholder(index)
    }

    /// `MAPREF = ? AND PROCESS_ID = ? AND SESSION_ID = ?` starting at placeholder `first`.
    fn session_predicate(&self, first: usize) -> String {
        format!(
            "MAPREF = {} AND PROCESS_ID = {} AND SESSION_ID = {}",
            self.p(first),
            self.p(first + 1),
            self.p(first + 2)
        )
    }

    fn insert(&self, table: &str, fields: &[(&str, Value)]) -> (String, Vec<Value>) {
        let columns: Vec<String> = fields.iter().map(|(c, _)| c.to_string()).collect();
        let values = fields.iter().map(|(_, v)| v.clone()).collect();
        (
            insert_statement(self.dialect, &self.table(table), &columns, &[]),
            values,
        )
    }

    /// Runs `statements` in one transaction and returns their affected-row counts.
    async fn write(&self, statements: Vec<(String, Vec<Value>)>) -> Result<Vec<u64>, StateStoreError> {
        let mut conn = self.conn.lock().await;
        conn.begin().await?;
        let mut affected = Vec::with_capacity(statements.len());
        for (sql, params) in &statements {
            match conn.execute(sql, params).await {
                Ok(n) => affected.push(n),
                Err(e) => {
                    if let Err(rollback) = conn.rollback().await {
                        warn!(error = %rollback, "Metadata rollback failed");
                    }
                    return Err(e.into());
                }
            }
        }
        conn.commit().await?;
        Ok(affected)
    }

    async fn read(&self, sql: &str, params: &[Value]) -> Result<Vec<RowData>, DbError> {
        let mut conn = self.conn.lock().await;
        conn.query(sql, params).await
    }
}

#[async_trait]
impl SessionStore for SqlSessionStore {
    async fn load_checkpoint(&self, mapref: &str) -> Result<Option<String>, StateStoreError> {
        let sql = self.dialect.paginate(
            &format!(
                "SELECT PARAM1 FROM {} WHERE MAPREF = {} ORDER BY START_DT DESC, SESSION_ID DESC",
                self.table(&self.tables.process_log),
                self.p(0)
            ),
            0,
            1,
        );
        let rows = self.read(&sql, &[text(mapref)]).await?;
        Ok(rows
            .first()
            .and_then(|row| row.get_value("PARAM1").as_string())
            .filter(|v| !v.is_empty()))
    }

    async fn save_checkpoint(&self, session: &SessionKey, value: &str) -> Result<(), StateStoreError> {
        let update = format!(
            "UPDATE {} SET PARAM1 = {} WHERE {}",
            self.table(&self.tables.process_log),
            self.p(0),
            self.session_predicate(1)
        );
        let mut params = vec![text(value)];
        params.extend(session_values(session));

        let affected = self.write(vec![(update, params)]).await?;
        if affected.first().copied().unwrap_or(0) == 0 {
            // No run row yet: keep the value anyway so the next run can resume.
            let fields = [
                ("MAPREF", text(&session.mapref)),
                ("PROCESS_ID", Value::Int(session.process_id)),
                ("SESSION_ID", Value::Int(session.session_id)),
                ("STATUS", text(RunStatus::Running.as_str())),
                ("PARAM1", text(value)),
                ("START_DT", Value::Timestamp(Utc::now())),
            ];
            let insert = self.insert(&self.tables.process_log, &fields);
            self.write(vec![insert]).await?;
        }
        Ok(())
    }

    async fn reset_checkpoint(&self, mapref: &str) -> Result<(), StateStoreError> {
        let sql = format!(
            "UPDATE {} SET PARAM1 = NULL WHERE MAPREF = {}",
            self.table(&self.tables.process_log),
            self.p(0)
        );
        self.write(vec![(sql, vec![text(mapref)])]).await?;
        Ok(())
    }

    async fn start_run(&self, run: &RunRecord) -> Result<(), StateStoreError> {
        let fields = [
            ("MAPREF", text(&run.session.mapref)),
            ("PROCESS_ID", Value::Int(run.session.process_id)),
            ("SESSION_ID", Value::Int(run.session.session_id)),
            ("JOB_ID", text(&run.job_id)),
            ("TARGET_TABLE", text(&run.target_table)),
            ("STATUS", text(run.status.as_str())),
            ("PARAM1", Value::from(run.checkpoint.clone())),
            ("SOURCE_ROWS", count(run.source_rows)),
            ("TARGET_ROWS", count(run.target_rows)),
            ("ERROR_ROWS", count(run.error_rows)),
            ("START_DT", Value::Timestamp(run.started_at)),
        ];
        let insert = self.insert(&self.tables.process_log, &fields);
        self.write(vec![insert]).await?;
        Ok(())
    }

    async fn record_batch(&self, batch: &BatchLog) -> Result<(), StateStoreError> {
        let fields = [
            ("MAPREF", text(&batch.session.mapref)),
            ("PROCESS_ID", Value::Int(batch.session.process_id)),
            ("SESSION_ID", Value::Int(batch.session.session_id)),
            ("BATCH_NO", count(batch.batch_no)),
            ("CHUNK_NO", Value::from(batch.chunk.map(|c| c as i64))),
            ("ROWS_READ", count(batch.rows_read)),
            ("ROWS_INSERTED", count(batch.rows_inserted)),
            ("ROWS_UPDATED", count(batch.rows_updated)),
            ("ROWS_EXPIRED", count(batch.rows_expired)),
            ("ROWS_ERRORED", count(batch.rows_errored)),
            ("LOG_DT", Value::Timestamp(batch.logged_at)),
        ];
        let insert = self.insert(&self.tables.batch_log, &fields);
        self.write(vec![insert]).await?;
        Ok(())
    }

    async fn finish_run(&self, session: &SessionKey, summary: &RunSummary) -> Result<(), StateStoreError> {
        let sql = format!(
            "UPDATE {} SET STATUS = {}, SOURCE_ROWS = {}, TARGET_ROWS = {}, ERROR_ROWS = {}, \
             MESSAGE = {}, END_DT = {} WHERE {}",
            self.table(&self.tables.process_log),
            self.p(0),
            self.p(1),
            self.p(2),
            self.p(3),
            self.p(4),
            self.p(5),
            self.session_predicate(6)
        );
        let mut params = vec![
            text(summary.status.as_str()),
            count(summary.source_rows),
            count(summary.target_rows),
            count(summary.error_rows),
            Value::from(summary.message.clone()),
            Value::Timestamp(summary.finished_at),
        ];
        params.extend(session_values(session));

        let affected = self.write(vec![(sql, params)]).await?;
        if affected.first().copied().unwrap_or(0) == 0 {
            return Err(StateStoreError::UnknownRun(format!(
                "{}:{}:{}",
                session.mapref, session.process_id, session.session_id
            )));
        }
        Ok(())
    }

    async fn record_row_error(&self, record: &RowErrorRecord) -> Result<(), StateStoreError> {
        let insert = self.insert(&self.tables.error_log, &record.storage_fields());
        self.write(vec![insert]).await?;
        Ok(())
    }

    async fn is_stop_requested(&self, mapref: &str) -> Result<bool, StateStoreError> {
        let sql = format!(
            "SELECT STOP_FLG FROM {} WHERE MAPREF = {}",
            self.table(&self.tables.stop_request),
            self.p(0)
        );
        let rows = self.read(&sql, &[text(mapref)]).await?;
        Ok(rows.iter().any(|row| {
            row.get_value("STOP_FLG")
                .as_string()
                .is_some_and(|flag| flag.trim().eq_ignore_ascii_case(STOP_FLAG))
        }))
    }

    async fn request_stop(&self, mapref: &str, stop: bool) -> Result<(), StateStoreError> {
        let table = self.table(&self.tables.stop_request);
        let mut statements = vec![(
            format!("DELETE FROM {table} WHERE MAPREF = {}", self.p(0)),
            vec![text(mapref)],
        )];
        if stop {
            statements.push(self.insert(
                &self.tables.stop_request,
                &[("MAPREF", text(mapref)), ("STOP_FLG", text(STOP_FLAG))],
            ));
        }
        self.write(statements).await?;
        Ok(())
    }
}
