use crate::{
    context::RunContext,
    error::ProcessingError,
    retry::classify_processing_error,
    scd::{classify, handler::ScdHandler},
    transform::{TransformedRow, transform_row},
};
use connectors::DbConnection;
use engine_core::{retry::RetryPolicy, state::models::BatchLog};
use model::{execution::result::ChunkResult, records::row::RowData};
use std::{collections::HashMap, time::Instant};
use tokio::time::sleep;
use tracing::{debug, warn};

const BATCH_SAVEPOINT: &str = "mapper_batch";

/// Counters for one loaded batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchStats {
    pub rows_read: u64,
    pub inserted: u64,
    pub updated: u64,
    pub expired: u64,
    pub unchanged: u64,
    pub errored: u64,
}

impl BatchStats {
    pub fn succeeded(&self) -> u64 {
        self.rows_read.saturating_sub(self.errored)
    }

    pub fn add_to(&self, result: &mut ChunkResult) {
        result.rows_read += self.rows_read;
        result.rows_inserted += self.inserted;
        result.rows_updated += self.updated;
        result.rows_expired += self.expired;
        result.rows_unchanged += self.unchanged;
        result.rows_errored += self.errored;
    }

    pub fn to_log(&self, ctx: &RunContext, batch_no: u64, chunk: Option<usize>) -> BatchLog {
        let mut log = BatchLog::new(&ctx.session, batch_no);
        log.chunk = chunk;
        log.rows_read = self.rows_read;
        log.rows_inserted = self.inserted;
        log.rows_updated = self.updated;
        log.rows_expired = self.expired;
        log.rows_errored = self.errored;
        log
    }
}

/// Transform, look up, classify and apply one batch of source rows.
pub struct BatchLoader {
    scd: ScdHandler,
    retry: RetryPolicy,
}

impl BatchLoader {
    pub fn new(ctx: RunContext, retry: RetryPolicy) -> Self {
        BatchLoader {
            scd: ScdHandler::new(ctx),
            retry,
        }
    }

    /// Loads `rows` inside the target's open transaction.
    ///
    /// The batch runs under a savepoint; a transient failure rolls back to
    /// it and the batch is replayed with backoff. Hash comparison makes the
    /// replay idempotent.
    pub async fn load(
        &self,
        target: &mut dyn DbConnection,
        rows: &[RowData],
    ) -> Result<BatchStats, ProcessingError> {
        let started = Instant::now();
        let dialect = self.scd.context().target_dialect;
        let mut attempt = 0;

        loop {
            target
                .execute(&dialect.savepoint(BATCH_SAVEPOINT), &[])
                .await
                .map_err(ProcessingError::Target)?;

            match self.load_once(target, rows).await {
                Ok(stats) => {
                    if let Some(release) = dialect.release_savepoint(BATCH_SAVEPOINT) {
                        target.execute(&release, &[]).await.map_err(ProcessingError::Target)?;
                    }
                    debug!(
                        table = %self.scd.table(),
                        rows = stats.rows_read,
                        inserted = stats.inserted,
                        updated = stats.updated,
                        expired = stats.expired,
                        duration_ms = started.elapsed().as_millis() as u64,
                        "Batch loaded"
                    );
                    return Ok(stats);
                }
                Err(err) => {
                    let disposition = classify_processing_error(&err);
                    if !self.retry.should_retry(attempt, disposition) {
                        return Err(err);
                    }
                    if let Err(e) = target
                        .execute(&dialect.rollback_to_savepoint(BATCH_SAVEPOINT), &[])
                        .await
                    {
                        warn!(error = %e, "Could not roll back batch savepoint");
                        return Err(err);
                    }
                    let delay = self.retry.compute_delay(attempt);
                    warn!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64, error = %err, "Retrying batch");
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn load_once(
        &self,
        target: &mut dyn DbConnection,
        rows: &[RowData],
    ) -> Result<BatchStats, ProcessingError> {
        let job = &self.scd.context().job;
        let mut stats = BatchStats {
            rows_read: rows.len() as u64,
            ..Default::default()
        };

        let transformed = dedupe(
            rows.iter()
                .map(|r| transform_row(job, r))
                .collect::<Result<Vec<_>, _>>()?,
        );
        let superseded = rows.len() - transformed.len();
        if superseded > 0 {
            debug!(rows = superseded, "Duplicate keys in batch, keeping the last occurrence");
        }

        let keys: Vec<_> = transformed.iter().map(|r| r.key.clone()).collect();
        let existing = self.scd.lookup_existing(target, &keys).await?;
        let batch = classify(job.scd_type, transformed, &existing);

        stats.unchanged = batch.unchanged + superseded as u64;
        if batch.is_empty() {
            return Ok(stats);
        }

        let counts = self.scd.execute(target, &batch).await?;
        stats.inserted = counts.inserted;
        stats.updated = counts.updated;
        stats.expired = counts.expired;
        stats.errored = counts.errored;
        Ok(stats)
    }
}

/// Keeps the last row of each key, in first-seen order.
fn dedupe(rows: Vec<TransformedRow>) -> Vec<TransformedRow> {
    let mut index: HashMap<String, usize> = HashMap::with_capacity(rows.len());
    let mut kept: Vec<TransformedRow> = Vec::with_capacity(rows.len());
    for row in rows {
        match index.get(&row.key_text) {
            Some(&at) => kept[at] = row,
            None => {
                index.insert(row.key_text.clone(), kept.len());
                kept.push(row);
            }
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use connectors::sql::mock::{Fault, MockConnection};
    use engine_core::state::memory::MemorySessionStore;
    use model::{
        core::{database::DatabaseKind, value::Value},
        execution::{
            job::{JobConfig, TableType},
            session::SessionKey,
        },
    };
    use planner::query::dialect::dialect_for;
    use std::sync::Arc;

    fn loader(retry: RetryPolicy) -> BatchLoader {
        let job = JobConfig::new("M", "J", "TGT", TableType::Fct, "SELECT * FROM s")
            .with_primary_key("ID", "id")
            .with_column("NAME", "name");
        let ctx = RunContext::new(
            Arc::new(job),
            SessionKey {
                mapref: "M".into(),
                process_id: 1,
                session_id: 1,
            },
            Arc::new(MemorySessionStore::new()),
            dialect_for(DatabaseKind::Postgres),
        );
        BatchLoader::new(ctx, retry)
    }

    fn rows(names: &[(i64, &str)]) -> Vec<RowData> {
        names
            .iter()
            .map(|(id, name)| RowData::from_pairs("", [("id", Value::Int(*id)), ("name", (*name).into())]))
            .collect()
    }

    #[tokio::test]
    async fn test_new_rows_are_inserted() {
        let mock = MockConnection::new(DatabaseKind::Postgres);
        let mut conn = mock.clone();
        let stats = loader(RetryPolicy::immediate(0))
            .load(&mut conn, &rows(&[(1, "a"), (2, "b")]))
            .await
            .unwrap();
        assert_eq!(stats.rows_read, 2);
        assert_eq!(stats.inserted, 2);
        assert_eq!(mock.statements_matching("RELEASE SAVEPOINT mapper_batch").len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_keys_keep_last() {
        let mock = MockConnection::new(DatabaseKind::Postgres);
        let mut conn = mock.clone();
        let stats = loader(RetryPolicy::immediate(0))
            .load(&mut conn, &rows(&[(1, "first"), (1, "second")]))
            .await
            .unwrap();
        assert_eq!(stats.inserted, 1);
        assert_eq!(stats.unchanged, 1);
        let inserts = mock.statements_matching("INSERT");
        assert_eq!(inserts[0].1[1], Value::String("second".into()));
    }

    #[tokio::test]
    async fn test_transient_failure_replays_batch() {
        let mock = MockConnection::new(DatabaseKind::Postgres)
            .with_fault("INSERT", Fault::Transient { times: 1 });
        let mut conn = mock.clone();
        let stats = loader(RetryPolicy::immediate(2))
            .load(&mut conn, &rows(&[(1, "a")]))
            .await
            .unwrap();
        assert_eq!(stats.inserted, 1);
        assert_eq!(mock.statements_matching("ROLLBACK TO SAVEPOINT mapper_batch").len(), 1);
        assert_eq!(mock.statements_matching("INSERT").len(), 1);
    }

    #[tokio::test]
    async fn test_missing_column_is_not_retried() {
        let mock = MockConnection::new(DatabaseKind::Postgres);
        let mut conn = mock.clone();
        let bad = vec![RowData::from_pairs("", [("id", 1i64)])];
        let err = loader(RetryPolicy::immediate(3)).load(&mut conn, &bad).await.unwrap_err();
        assert!(matches!(err, ProcessingError::Transform(_)));
        assert!(mock.statements_matching("ROLLBACK TO SAVEPOINT").is_empty());
    }
}
