#[cfg(test)]
mod tests {
    use crate::{
        TestEnv,
        utils::{
            CUSTOMERS, MAPREF, aliased_customer_job, assert_value, customer_job, fetch_metadata, fetch_target,
            get_cell_as_i64, get_cell_as_string, get_row_count, run_job, small_chunks,
            stored_checkpoint,
        },
    };
    use engine_core::state::{SessionStore, memory::MemorySessionStore};
    use engine_runtime::routine::{JobRoutine, MapperJob};
    use model::{
        core::value::Value,
        execution::{
            checkpoint::CheckpointConfig,
            job::ScdType,
            result::{ChunkStatus, JobStatus},
            session::SessionKey,
        },
    };
    use serde_json::json;
    use std::sync::Arc;
    use tracing_test::traced_test;

    // Scenario: First load of a Type 1 table on the sequential path.
    // Expected Outcome:
    // - Every source row lands in the target with a row hash and audit dates.
    // - The run is logged as SUCCESS and the key checkpoint ends COMPLETED.
    #[traced_test]
    #[tokio::test]
    async fn tc01() {
        let env = TestEnv::new().await;
        env.seed_customers(&CUSTOMERS).await;
        let store = env.store().await;

        let outcome = run_job(&env, store, customer_job(ScdType::Type1), CheckpointConfig::key(&["id"]), 1).await;

        assert_eq!(outcome.status, JobStatus::Success);
        assert_eq!(outcome.source_rows, 4);
        assert_eq!(outcome.target_rows, 4);
        assert_eq!(get_row_count(&env, "FCT_CUSTOMER").await, 4);

        let rows = fetch_target(&env, "SELECT * FROM FCT_CUSTOMER ORDER BY CUST_ID").await;
        assert_value(&rows[1], "NAME", Value::from("Bob"));
        assert_eq!(get_cell_as_string(&rows[1], "RWHKEY").len(), 32);
        assert!(!get_cell_as_string(&rows[1], "RECCRDT").is_empty());

        let runs = fetch_metadata(&env, "SELECT STATUS, SOURCE_ROWS FROM ETL_PROCESS_LOG").await;
        assert_eq!(runs.len(), 1);
        assert_eq!(get_cell_as_string(&runs[0], "STATUS"), "SUCCESS");
        assert_eq!(get_cell_as_i64(&runs[0], "SOURCE_ROWS"), 4);
        assert_eq!(stored_checkpoint(&env).await.as_deref(), Some("COMPLETED"));

        let batches = fetch_metadata(&env, "SELECT BATCH_NO FROM ETL_BATCH_LOG").await;
        assert_eq!(batches.len(), 2);
    }

    // Scenario: The same source is loaded twice.
    // Expected Outcome: The second run finds every hash unchanged and writes nothing.
    #[traced_test]
    #[tokio::test]
    async fn tc02() {
        let env = TestEnv::new().await;
        env.seed_customers(&CUSTOMERS).await;

        let first = run_job(&env, env.store().await, customer_job(ScdType::Type1), CheckpointConfig::disabled(), 1).await;
        assert_eq!(first.target_rows, 4);
        let before = fetch_target(&env, "SELECT SKEY, RECUPDT FROM FCT_CUSTOMER ORDER BY SKEY").await;

        let second = run_job(&env, env.store().await, customer_job(ScdType::Type1), CheckpointConfig::disabled(), 2).await;
        assert_eq!(second.status, JobStatus::Success);
        assert_eq!(second.source_rows, 4);
        assert_eq!(second.target_rows, 0);
        assert_eq!(second.chunks[0].rows_unchanged, 4);

        let after = fetch_target(&env, "SELECT SKEY, RECUPDT FROM FCT_CUSTOMER ORDER BY SKEY").await;
        assert_eq!(before, after);
    }

    // Scenario: A Type 1 attribute changes between runs.
    // Expected Outcome: The existing row is overwritten in place and keeps its surrogate key.
    #[traced_test]
    #[tokio::test]
    async fn tc03() {
        let env = TestEnv::new().await;
        env.seed_customers(&CUSTOMERS).await;
        run_job(&env, env.store().await, customer_job(ScdType::Type1), CheckpointConfig::disabled(), 1).await;
        let skey = get_cell_as_i64(
            &fetch_target(&env, "SELECT SKEY FROM FCT_CUSTOMER WHERE CUST_ID = 2").await[0],
            "SKEY",
        );

        env.execute_source("UPDATE SRC_CUSTOMER SET name = 'Bobby' WHERE id = 2").await;
        let outcome = run_job(&env, env.store().await, customer_job(ScdType::Type1), CheckpointConfig::disabled(), 2).await;

        assert_eq!(outcome.status, JobStatus::Success);
        assert_eq!(outcome.chunks[0].rows_updated, 1);
        assert_eq!(outcome.chunks[0].rows_unchanged, 3);
        assert_eq!(get_row_count(&env, "FCT_CUSTOMER").await, 4);

        let rows = fetch_target(&env, "SELECT SKEY, NAME FROM FCT_CUSTOMER WHERE CUST_ID = 2").await;
        assert_value(&rows[0], "NAME", Value::from("Bobby"));
        assert_eq!(get_cell_as_i64(&rows[0], "SKEY"), skey);
    }

    // Scenario: A Type 2 dimension attribute changes between runs.
    // Expected Outcome:
    // - The current version is expired with an end date.
    // - A new current version with the new value is inserted.
    #[traced_test]
    #[tokio::test]
    async fn tc04() {
        let env = TestEnv::new().await;
        env.seed_customers(&CUSTOMERS).await;
        let first = run_job(&env, env.store().await, customer_job(ScdType::Type2), CheckpointConfig::disabled(), 1).await;
        assert_eq!(first.target_rows, 4);

        env.execute_source("UPDATE SRC_CUSTOMER SET city = 'Bergen' WHERE id = 1").await;
        let outcome = run_job(&env, env.store().await, customer_job(ScdType::Type2), CheckpointConfig::disabled(), 2).await;

        assert_eq!(outcome.status, JobStatus::Success);
        assert_eq!(outcome.chunks[0].rows_expired, 1);
        assert_eq!(outcome.chunks[0].rows_inserted, 1);
        assert_eq!(get_row_count(&env, "DIM_CUSTOMER").await, 5);

        let versions = fetch_target(
            &env,
            "SELECT CITY, CURFLG, TODT FROM DIM_CUSTOMER WHERE CUST_ID = 1 ORDER BY SKEY",
        )
        .await;
        assert_eq!(versions.len(), 2);
        assert_value(&versions[0], "CITY", Value::from("Oslo"));
        assert_value(&versions[0], "CURFLG", Value::from("N"));
        assert_ne!(versions[0].get_value("TODT"), Value::Null);
        assert_value(&versions[1], "CITY", Value::from("Bergen"));
        assert_value(&versions[1], "CURFLG", Value::from("Y"));
        assert_value(&versions[1], "TODT", Value::Null);
    }

    // Scenario: A previous session stopped after committing key 2.
    // Expected Outcome: Only the rows after the stored key are read, then the checkpoint completes.
    #[traced_test]
    #[tokio::test]
    async fn tc05() {
        let env = TestEnv::new().await;
        env.seed_customers(&CUSTOMERS).await;
        let store = env.store().await;
        let previous = SessionKey {
            mapref: MAPREF.into(),
            process_id: 100,
            session_id: 1,
        };
        store.save_checkpoint(&previous, "2").await.unwrap();

        let outcome = run_job(&env, store, customer_job(ScdType::Type1), CheckpointConfig::key(&["id"]), 2).await;

        assert_eq!(outcome.status, JobStatus::Success);
        assert_eq!(outcome.source_rows, 2);
        let loaded = fetch_target(&env, "SELECT CUST_ID FROM FCT_CUSTOMER ORDER BY CUST_ID").await;
        let ids: Vec<i64> = loaded.iter().map(|r| get_cell_as_i64(r, "CUST_ID")).collect();
        assert_eq!(ids, vec![3, 4]);
        assert_eq!(stored_checkpoint(&env).await.as_deref(), Some("COMPLETED"));
    }

    // Scenario: A stop request is pending before the run begins.
    // Expected Outcome: Nothing is read or written and the run is logged as STOPPED.
    #[traced_test]
    #[tokio::test]
    async fn tc06() {
        let env = TestEnv::new().await;
        env.seed_customers(&CUSTOMERS).await;
        let store = env.store().await;
        store.request_stop(MAPREF, true).await.unwrap();

        let outcome = run_job(&env, store, customer_job(ScdType::Type1), CheckpointConfig::key(&["id"]), 1).await;

        assert_eq!(outcome.status, JobStatus::Stopped);
        assert_eq!(outcome.source_rows, 0);
        assert_eq!(get_row_count(&env, "FCT_CUSTOMER").await, 0);
        let runs = fetch_metadata(&env, "SELECT STATUS FROM ETL_PROCESS_LOG").await;
        assert_eq!(get_cell_as_string(&runs[0], "STATUS"), "STOPPED");
    }

    // Scenario: Parallel Type 1 load of four rows in chunks of two.
    // Expected Outcome:
    // - Two chunks succeed, each on its own connections, and every row is loaded once.
    // - The stored checkpoint is the highest key any chunk reached.
    #[traced_test]
    #[tokio::test]
    async fn tc07() {
        let env = TestEnv::new().await;
        env.seed_customers(&CUSTOMERS).await;
        let job = customer_job(ScdType::Type1).with_parallel(small_chunks(2));

        let outcome = run_job(&env, env.store().await, job, CheckpointConfig::key(&["id"]), 1).await;

        assert_eq!(outcome.status, JobStatus::Success);
        assert_eq!(outcome.chunks.len(), 2);
        assert!(outcome.chunks.iter().all(|c| c.status == ChunkStatus::Success));
        assert_eq!(outcome.source_rows, 4);
        assert_eq!(outcome.target_rows, 4);
        assert_eq!(get_row_count(&env, "FCT_CUSTOMER").await, 4);
        assert_eq!(stored_checkpoint(&env).await.as_deref(), Some("4"));

        let chunked = fetch_metadata(&env, "SELECT CHUNK_NO FROM ETL_BATCH_LOG WHERE CHUNK_NO IS NOT NULL").await;
        assert_eq!(chunked.len(), 2);
        for chunk in &outcome.chunks {
            assert_eq!(chunk.rows_read, 2, "chunk {}", chunk.chunk_index);
            assert_eq!(chunk.target_rows(), 2, "chunk {}", chunk.chunk_index);
        }
    }

    // Scenario: A parallel load where the second run finds nothing new.
    // Expected Outcome: Both chunks succeed with every row unchanged.
    #[traced_test]
    #[tokio::test]
    async fn tc08() {
        let env = TestEnv::new().await;
        env.seed_customers(&CUSTOMERS).await;
        env.seed_customers(&[(5, "Eve", "Riga")]).await;
        let job = customer_job(ScdType::Type1).with_parallel(small_chunks(3));

        let first = run_job(&env, env.store().await, job.clone(), CheckpointConfig::disabled(), 1).await;
        assert_eq!(first.chunks.len(), 2);
        let second = run_job(&env, env.store().await, job, CheckpointConfig::disabled(), 2).await;

        assert_eq!(second.status, JobStatus::Success);
        assert_eq!(second.target_rows, 0);
        assert_eq!(second.chunks.iter().map(|c| c.rows_unchanged).sum::<u64>(), 5);
        assert_eq!(get_row_count(&env, "FCT_CUSTOMER").await, 5);
    }

    // Scenario: Parallel processing is configured together with a row-skip checkpoint.
    // Expected Outcome: The run falls back to one sequential cursor and counts consumed rows.
    #[traced_test]
    #[tokio::test]
    async fn tc09() {
        let env = TestEnv::new().await;
        env.seed_customers(&CUSTOMERS).await;
        let store = Arc::new(MemorySessionStore::new());
        let job = customer_job(ScdType::Type1).with_parallel(small_chunks(1));

        let outcome = run_job(&env, store.clone(), job, CheckpointConfig::row_skip(), 1).await;

        assert_eq!(outcome.status, JobStatus::Success);
        assert_eq!(outcome.chunks.len(), 1);
        assert_eq!(get_row_count(&env, "FCT_CUSTOMER").await, 4);
        assert_eq!(store.checkpoint_history(), vec!["2", "4", "COMPLETED"]);
    }

    // Scenario: A row-skip run resumes after two rows were already consumed.
    // Expected Outcome: The first two rows are skipped without being loaded.
    #[traced_test]
    #[tokio::test]
    async fn tc10() {
        let env = TestEnv::new().await;
        env.seed_customers(&CUSTOMERS).await;
        let store = Arc::new(MemorySessionStore::new().with_checkpoint(MAPREF, "2"));

        let outcome = run_job(&env, store.clone(), customer_job(ScdType::Type1), CheckpointConfig::row_skip(), 1).await;

        assert_eq!(outcome.status, JobStatus::Success);
        assert_eq!(outcome.target_rows, 2);
        let loaded = fetch_target(&env, "SELECT CUST_ID FROM FCT_CUSTOMER ORDER BY CUST_ID").await;
        assert_eq!(get_cell_as_i64(&loaded[0], "CUST_ID"), 3);
        assert_eq!(store.checkpoint_history(), vec!["4", "COMPLETED"]);
    }

    // Scenario: A scheduler calls the routine with a parameter map and a supplied checkpoint.
    // Expected Outcome: The supplied value wins over the stored one and the result map carries the counts.
    #[traced_test]
    #[tokio::test]
    async fn tc11() {
        let env = TestEnv::new().await;
        env.seed_customers(&CUSTOMERS).await;
        let store = Arc::new(MemorySessionStore::new().with_checkpoint(MAPREF, "1"));
        let params = json!({"processId": 100, "sessionId": 7, "param1": "3"});

        let result = MapperJob::new(customer_job(ScdType::Type1), CheckpointConfig::key(&["id"]))
            .run_map(
                store,
                env.source().await,
                env.target().await,
                params.as_object().unwrap(),
            )
            .await;

        assert_eq!(result["status"], json!("SUCCESS"));
        assert_eq!(result["sourceRows"], json!(1));
        assert_eq!(result["targetRows"], json!(1));
        assert_eq!(result["errorRows"], json!(0));
    }

    // Scenario: The source query orders by a column it only exposes under an alias.
    // Expected Outcome:
    // - Key-based chunking is not possible, so the chunks fall back to offset windows.
    // - Both chunks succeed and every row is loaded once, as on the sequential path.
    #[traced_test]
    #[tokio::test]
    async fn tc12() {
        let env = TestEnv::new().await;
        env.seed_customers(&CUSTOMERS).await;
        let job = aliased_customer_job().with_parallel(small_chunks(2));

        let outcome = run_job(&env, env.store().await, job, CheckpointConfig::disabled(), 1).await;

        assert_eq!(outcome.status, JobStatus::Success, "{:?}", outcome.message);
        assert_eq!(outcome.chunks.len(), 2);
        assert!(outcome.chunks.iter().all(|c| c.status == ChunkStatus::Success));
        assert_eq!(outcome.source_rows, 4);
        let loaded = fetch_target(&env, "SELECT CUST_ID FROM FCT_CUSTOMER ORDER BY CUST_ID").await;
        let ids: Vec<i64> = loaded.iter().map(|r| get_cell_as_i64(r, "CUST_ID")).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    // Scenario: Two source rows, chunk size one, parallel Type 1 load.
    // Expected Outcome: Two successful chunks, each reporting one source row and one target row.
    #[traced_test]
    #[tokio::test]
    async fn tc13() {
        let env = TestEnv::new().await;
        env.seed_customers(&CUSTOMERS[..2]).await;
        let job = customer_job(ScdType::Type1).with_parallel(small_chunks(1));

        let outcome = run_job(&env, env.store().await, job, CheckpointConfig::key(&["id"]), 1).await;

        assert_eq!(outcome.status, JobStatus::Success);
        assert_eq!(outcome.chunks.len(), 2);
        for (index, chunk) in outcome.chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, index);
            assert_eq!(chunk.status, ChunkStatus::Success);
            assert_eq!(chunk.rows_read, 1);
            assert_eq!(chunk.target_rows(), 1);
        }
        assert_eq!(get_row_count(&env, "FCT_CUSTOMER").await, 2);
    }
}
