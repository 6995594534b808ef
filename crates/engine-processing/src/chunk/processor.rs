use crate::{context::RunContext, error::ProcessingError, loader::BatchLoader};
use connectors::DbConnection;
use engine_core::{checkpoint::CheckpointHandler, progress::ProgressTracker, stop::StopSignal};
use model::execution::result::{ChunkResult, ChunkStatus};
use std::{cmp::Ordering, sync::Arc};
use tracing::{debug, info, warn};

/// Runs one chunk end to end: extract, transform, classify, load.
///
/// The chunk is one target transaction, committed when the cursor is
/// drained or a stop is observed between sub-batches.
pub struct ChunkProcessor {
    ctx: RunContext,
    loader: BatchLoader,
    checkpoint: Arc<CheckpointHandler>,
    stop: Arc<dyn StopSignal>,
    progress: Option<Arc<ProgressTracker>>,
}

impl ChunkProcessor {
    pub fn new(
        ctx: RunContext,
        loader: BatchLoader,
        checkpoint: Arc<CheckpointHandler>,
        stop: Arc<dyn StopSignal>,
    ) -> Self {
        ChunkProcessor {
            ctx,
            loader,
            checkpoint,
            stop,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: Arc<ProgressTracker>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub async fn process(
        &self,
        index: usize,
        query: &str,
        source: &mut dyn DbConnection,
        target: &mut dyn DbConnection,
    ) -> Result<ChunkResult, ProcessingError> {
        let mut result = ChunkResult::new(index);
        target.begin().await.map_err(ProcessingError::Target)?;

        let outcome = self.drain(index, query, source, target, &mut result).await;
        if let Err(e) = source.close_cursor().await {
            warn!(chunk = index, error = %e, "Failed to close source cursor");
        }

        match outcome {
            Ok(()) => {
                target.commit().await.map_err(ProcessingError::Target)?;
                debug!(
                    chunk = index,
                    rows = result.rows_read,
                    inserted = result.rows_inserted,
                    updated = result.rows_updated,
                    status = ?result.status,
                    "Chunk committed"
                );
                Ok(result)
            }
            Err(err) => {
                if let Err(e) = target.rollback().await {
                    warn!(chunk = index, error = %e, "Rollback after chunk failure failed");
                }
                Err(err)
            }
        }
    }

    async fn drain(
        &self,
        index: usize,
        query: &str,
        source: &mut dyn DbConnection,
        target: &mut dyn DbConnection,
        result: &mut ChunkResult,
    ) -> Result<(), ProcessingError> {
        source.open_cursor(query).await.map_err(ProcessingError::Source)?;
        let mut batch_no = 0u64;

        loop {
            if self.stop.is_stop_requested().await {
                info!(chunk = index, rows = result.rows_read, "Stop requested, committing chunk progress");
                result.status = ChunkStatus::Stopped;
                return Ok(());
            }

            let rows = source
                .fetch_next(self.ctx.job.bulk_limit)
                .await
                .map_err(ProcessingError::Source)?;
            let Some(last) = rows.last() else {
                return Ok(());
            };

            if let Some(position) = self.checkpoint.value_from_row(last)? {
                let newer = result
                    .checkpoint
                    .as_ref()
                    .is_none_or(|current| position.compare(current) == Ordering::Greater);
                if newer {
                    result.checkpoint = Some(position);
                }
            }

            let stats = self.loader.load(target, &rows).await?;
            stats.add_to(result);
            batch_no += 1;

            if let Some(progress) = &self.progress {
                progress.record_rows(index, stats.rows_read, stats.succeeded(), stats.errored);
            }
            self.ctx.log_batch(&stats.to_log(&self.ctx, batch_no, Some(index))).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use connectors::sql::mock::{Fault, MockConnection};
    use engine_core::{retry::RetryPolicy, state::memory::MemorySessionStore, stop::NeverStop};
    use model::{
        core::{database::DatabaseKind, value::Value},
        execution::{
            checkpoint::{CheckpointConfig, CheckpointValue},
            job::{JobConfig, TableType},
            session::SessionKey,
        },
        records::row::RowData,
    };
    use planner::query::dialect::dialect_for;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    /// Requests a stop once it has been polled `after` times.
    struct StopAfter {
        polls: AtomicUsize,
        after: usize,
    }

    #[async_trait]
    impl StopSignal for StopAfter {
        async fn is_stop_requested(&self) -> bool {
            self.polls.fetch_add(1, AtomicOrdering::SeqCst) >= self.after
        }
    }

    fn processor(store: Arc<MemorySessionStore>, stop: Arc<dyn StopSignal>) -> ChunkProcessor {
        let job = JobConfig::new("M", "J", "TGT", TableType::Fct, "SELECT * FROM s ORDER BY id")
            .with_primary_key("ID", "id")
            .with_column("NAME", "name")
            .with_bulk_limit(2);
        let session = SessionKey {
            mapref: "M".into(),
            process_id: 1,
            session_id: 1,
        };
        let ctx = RunContext::new(
            Arc::new(job),
            session.clone(),
            store.clone(),
            dialect_for(DatabaseKind::Postgres),
        );
        let checkpoint = Arc::new(CheckpointHandler::new(CheckpointConfig::key(&["id"]), store, session));
        ChunkProcessor::new(ctx.clone(), BatchLoader::new(ctx, RetryPolicy::immediate(0)), checkpoint, stop)
    }

    fn source_rows(n: i64) -> Vec<RowData> {
        (1..=n)
            .map(|id| RowData::from_pairs("", [("id", Value::Int(id)), ("name", format!("n{id}").into())]))
            .collect()
    }

    #[tokio::test]
    async fn test_chunk_loads_all_sub_batches() {
        let store = Arc::new(MemorySessionStore::new());
        let source = MockConnection::default().with_cursor_rows(source_rows(5));
        let target = MockConnection::default();
        let (mut src, mut tgt) = (source.clone(), target.clone());

        let result = processor(store.clone(), Arc::new(NeverStop))
            .process(0, "SELECT 1", &mut src, &mut tgt)
            .await
            .unwrap();

        assert_eq!(result.status, ChunkStatus::Success);
        assert_eq!(result.rows_read, 5);
        assert_eq!(result.rows_inserted, 5);
        assert_eq!(result.checkpoint, Some(CheckpointValue::single(5i64)));
        assert_eq!(target.begins(), 1);
        assert_eq!(target.commits(), 1);
        assert_eq!(store.batches().len(), 3);
        assert!(store.batches().iter().all(|b| b.chunk == Some(0)));
    }

    #[tokio::test]
    async fn test_stop_commits_partial_chunk() {
        let store = Arc::new(MemorySessionStore::new());
        let stop = Arc::new(StopAfter {
            polls: AtomicUsize::new(0),
            after: 1,
        });
        let source = MockConnection::default().with_cursor_rows(source_rows(5));
        let target = MockConnection::default();
        let (mut src, mut tgt) = (source.clone(), target.clone());

        let result = processor(store, stop)
            .process(1, "SELECT 1", &mut src, &mut tgt)
            .await
            .unwrap();

        assert_eq!(result.status, ChunkStatus::Stopped);
        assert_eq!(result.rows_read, 2);
        assert_eq!(target.commits(), 1);
    }

    #[tokio::test]
    async fn test_failure_rolls_back_chunk() {
        let store = Arc::new(MemorySessionStore::new());
        let source = MockConnection::default().with_cursor_rows(source_rows(3));
        let target = MockConnection::default().with_fault(
            "INSERT",
            Fault::Fatal {
                message: "disk full".into(),
            },
        );
        let (mut src, mut tgt) = (source.clone(), target.clone());

        let err = processor(store, Arc::new(NeverStop))
            .process(0, "SELECT 1", &mut src, &mut tgt)
            .await
            .unwrap_err();

        assert!(matches!(err, ProcessingError::Scd(_)));
        assert_eq!(target.rollbacks(), 1);
        assert_eq!(target.commits(), 0);
    }
}
