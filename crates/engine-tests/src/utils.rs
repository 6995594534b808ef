#![allow(dead_code)]

use crate::TestEnv;
use engine_core::{retry::RetryPolicy, state::SessionStore};
use engine_runtime::routine::{JobRoutine, MapperJob};
use model::{
    core::value::Value,
    execution::{
        checkpoint::CheckpointConfig,
        job::{JobConfig, ParallelConfig, ScdType, TableType, WorkerCount},
        result::JobOutcome,
        session::SessionParams,
    },
    records::row::RowData,
};
use std::sync::Arc;

pub const MAPREF: &str = "M_CUSTOMER";

/// Source query of every customer mapping; ordered by the checkpoint key.
pub const CUSTOMER_QUERY: &str = "SELECT id, name, city FROM SRC_CUSTOMER ORDER BY id;";

pub const CUSTOMERS: [(i64, &str, &str); 4] = [
    (1, "Ann", "Oslo"),
    (2, "Bob", "Lyon"),
    (3, "Cid", "Rome"),
    (4, "Dee", "Kyiv"),
];

/// Customer mapping into `FCT_CUSTOMER` (Type 1) or `DIM_CUSTOMER` (Type 2).
pub fn customer_job(scd_type: ScdType) -> JobConfig {
    let (table, table_type) = match scd_type {
        ScdType::Type1 => ("FCT_CUSTOMER", TableType::Fct),
        ScdType::Type2 => ("DIM_CUSTOMER", TableType::Dim),
    };
    JobConfig::new(MAPREF, "J_CUSTOMER", table, table_type, CUSTOMER_QUERY)
        .with_primary_key("CUST_ID", "id")
        .with_column("NAME", "name")
        .with_column("CITY", "city")
        .with_scd_type(scd_type)
        .with_bulk_limit(2)
}

/// Type 1 mapping whose query renames the key column it orders by.
pub const ALIASED_QUERY: &str = "SELECT id AS cid, name, city FROM SRC_CUSTOMER ORDER BY id";

pub fn aliased_customer_job() -> JobConfig {
    JobConfig::new(MAPREF, "J_CUSTOMER", "FCT_CUSTOMER", TableType::Fct, ALIASED_QUERY)
        .with_primary_key("CUST_ID", "cid")
        .with_column("NAME", "name")
        .with_column("CITY", "city")
        .with_scd_type(ScdType::Type1)
        .with_bulk_limit(2)
}

/// Parallel settings that split even a handful of rows into chunks.
pub fn small_chunks(chunk_size: usize) -> ParallelConfig {
    ParallelConfig::enabled()
        .with_chunk_size(chunk_size)
        .with_min_rows(1)
        .with_max_workers(WorkerCount::Fixed(2))
}

/// Runs one session of `job` against the environment's databases.
pub async fn run_job(
    env: &TestEnv,
    store: Arc<dyn SessionStore>,
    job: JobConfig,
    checkpoint: CheckpointConfig,
    session_id: i64,
) -> JobOutcome {
    MapperJob::new(job, checkpoint)
        .with_factory(env.factory())
        .with_retry(RetryPolicy::immediate(1))
        .run(
            store,
            env.source().await,
            env.target().await,
            SessionParams::new(100, session_id),
        )
        .await
}

pub async fn fetch_target(env: &TestEnv, sql: &str) -> Vec<RowData> {
    env.target().await.query(sql, &[]).await.expect("query target")
}

pub async fn fetch_metadata(env: &TestEnv, sql: &str) -> Vec<RowData> {
    env.connect(crate::METADATA_DB)
        .await
        .query(sql, &[])
        .await
        .expect("query metadata")
}

pub async fn get_row_count(env: &TestEnv, table: &str) -> i64 {
    let rows = fetch_target(env, &format!("SELECT COUNT(*) AS cnt FROM {table}")).await;
    get_cell_as_i64(&rows[0], "cnt")
}

pub fn get_cell_as_i64(row: &RowData, column: &str) -> i64 {
    row.get_value(column)
        .as_i64()
        .unwrap_or_else(|| panic!("column {column} is not an integer"))
}

pub fn get_cell_as_string(row: &RowData, column: &str) -> String {
    row.get_value(column).as_string().unwrap_or_default()
}

/// Checkpoint column of the latest process log row.
pub async fn stored_checkpoint(env: &TestEnv) -> Option<String> {
    let rows = fetch_metadata(
        env,
        "SELECT PARAM1 FROM ETL_PROCESS_LOG ORDER BY START_DT DESC, SESSION_ID DESC LIMIT 1",
    )
    .await;
    rows.first().and_then(|r| r.get_value("PARAM1").as_string())
}

pub fn assert_value(row: &RowData, column: &str, expected: Value) {
    assert_eq!(row.get_value(column), expected, "unexpected value in {column}");
}
