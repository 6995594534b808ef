#![allow(dead_code)]

use connectors::{
    ConnectionFactory, ConnectionSpec, DbConnection, SpecConnectionFactory, connect,
};
use engine_core::state::sql_store::{MetadataTables, SqlSessionStore};
use model::core::database::DatabaseKind;
use std::sync::Arc;
use tempfile::TempDir;

pub mod integration;
pub mod utils;

const SOURCE_DB: &str = "source.db";
const TARGET_DB: &str = "target.db";
const METADATA_DB: &str = "metadata.db";

const SOURCE_DDL: &str = "CREATE TABLE SRC_CUSTOMER (id INTEGER PRIMARY KEY, name TEXT, city TEXT)";

const TARGET_DDL: [&str; 2] = [
    "CREATE TABLE FCT_CUSTOMER (SKEY INTEGER PRIMARY KEY AUTOINCREMENT, CUST_ID INTEGER, \
     NAME TEXT, CITY TEXT, RWHKEY TEXT, RECCRDT TEXT, RECUPDT TEXT)",
    "CREATE TABLE DIM_CUSTOMER (SKEY INTEGER PRIMARY KEY AUTOINCREMENT, CUST_ID INTEGER, \
     NAME TEXT, CITY TEXT, RWHKEY TEXT, RECCRDT TEXT, RECUPDT TEXT, CURFLG TEXT, \
     FROMDT TEXT, TODT TEXT)",
];

const METADATA_DDL: [&str; 4] = [
    "CREATE TABLE ETL_PROCESS_LOG (MAPREF TEXT, PROCESS_ID INTEGER, SESSION_ID INTEGER, \
     JOB_ID TEXT, TARGET_TABLE TEXT, STATUS TEXT, PARAM1 TEXT, SOURCE_ROWS INTEGER, \
     TARGET_ROWS INTEGER, ERROR_ROWS INTEGER, MESSAGE TEXT, START_DT TEXT, END_DT TEXT)",
    "CREATE TABLE ETL_BATCH_LOG (MAPREF TEXT, PROCESS_ID INTEGER, SESSION_ID INTEGER, \
     BATCH_NO INTEGER, CHUNK_NO INTEGER, ROWS_READ INTEGER, ROWS_INSERTED INTEGER, \
     ROWS_UPDATED INTEGER, ROWS_EXPIRED INTEGER, ROWS_ERRORED INTEGER, LOG_DT TEXT)",
    "CREATE TABLE ETL_ERROR_LOG (MAPREF TEXT, JOB_ID TEXT, PROCESS_ID INTEGER, \
     SESSION_ID INTEGER, STAGE TEXT, ERROR_KEY TEXT, ERROR_MSG TEXT, ROW_DATA TEXT, \
     CREATED_DT TEXT)",
    "CREATE TABLE ETL_STOP_REQUEST (MAPREF TEXT, STOP_FLG TEXT)",
];

/// Source, target and metadata SQLite databases in a throwaway directory.
pub struct TestEnv {
    dir: TempDir,
}

impl TestEnv {
    pub async fn new() -> Self {
        let env = TestEnv {
            dir: TempDir::new().expect("create temp dir"),
        };
        env.execute_all(SOURCE_DB, &[SOURCE_DDL]).await;
        env.execute_all(TARGET_DB, &TARGET_DDL).await;
        env.execute_all(METADATA_DB, &METADATA_DDL).await;
        env
    }

    fn spec(&self, db: &str) -> ConnectionSpec {
        let url = format!("sqlite://{}", self.dir.path().join(db).display());
        ConnectionSpec::new(DatabaseKind::Sqlite, &url)
    }

    pub async fn connect(&self, db: &str) -> Box<dyn DbConnection> {
        connect(&self.spec(db)).await.expect("connect sqlite")
    }

    pub async fn source(&self) -> Box<dyn DbConnection> {
        self.connect(SOURCE_DB).await
    }

    pub async fn target(&self) -> Box<dyn DbConnection> {
        self.connect(TARGET_DB).await
    }

    /// Metadata store over its own connection, as a scheduler would hand it in.
    pub async fn store(&self) -> Arc<SqlSessionStore> {
        Arc::new(SqlSessionStore::new(
            self.connect(METADATA_DB).await,
            MetadataTables::default(),
        ))
    }

    pub fn factory(&self) -> Arc<dyn ConnectionFactory> {
        Arc::new(SpecConnectionFactory::new(
            self.spec(SOURCE_DB),
            self.spec(TARGET_DB),
        ))
    }

    pub async fn execute_all(&self, db: &str, statements: &[&str]) {
        let mut conn = self.connect(db).await;
        for sql in statements {
            conn.execute(sql, &[]).await.expect("execute statement");
        }
    }

    pub async fn execute_source(&self, sql: &str) {
        self.execute_all(SOURCE_DB, &[sql]).await;
    }

    /// Inserts `(id, name, city)` rows into `SRC_CUSTOMER`.
    pub async fn seed_customers(&self, rows: &[(i64, &str, &str)]) {
        let statements: Vec<String> = rows
            .iter()
            .map(|(id, name, city)| {
                format!("INSERT INTO SRC_CUSTOMER (id, name, city) VALUES ({id}, '{name}', '{city}')")
            })
            .collect();
        let refs: Vec<&str> = statements.iter().map(String::as_str).collect();
        self.execute_all(SOURCE_DB, &refs).await;
    }
}
