use crate::error::MapperError;
use connectors::ConnectionFactory;
use engine_core::{progress::ProgressTracker, retry::RetryPolicy, stop::StopSignal};
use engine_processing::{
    chunk::processor::ChunkProcessor, error::ProcessingError, retry::classify_processing_error,
};
use model::execution::result::{ChunkResult, ChunkStatus};
use planner::query::{chunk::ChunkPlan, dialect::Dialect};
use std::{collections::BTreeMap, sync::Arc};
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{Instrument, error, info, info_span, warn};

/// What the coordinator collected from the chunk tasks.
#[derive(Debug, Default)]
pub struct ParallelOutcome {
    /// One entry per submitted chunk, ordered by chunk index.
    pub chunks: Vec<ChunkResult>,
    /// A stop was observed before every chunk could be submitted.
    pub stopped_early: bool,
}

/// Bounded pool of chunk workers.
///
/// Each worker opens its own source and target connections and retries
/// its whole chunk on transient failures. One chunk failing never cancels
/// the others.
pub struct ParallelProcessor {
    processor: Arc<ChunkProcessor>,
    factory: Arc<dyn ConnectionFactory>,
    stop: Arc<dyn StopSignal>,
    progress: Arc<ProgressTracker>,
    retry: RetryPolicy,
    workers: usize,
}

impl ParallelProcessor {
    pub fn new(
        processor: Arc<ChunkProcessor>,
        factory: Arc<dyn ConnectionFactory>,
        stop: Arc<dyn StopSignal>,
        progress: Arc<ProgressTracker>,
        retry: RetryPolicy,
        workers: usize,
    ) -> Self {
        ParallelProcessor {
            processor,
            factory,
            stop,
            progress,
            retry,
            workers: workers.max(1),
        }
    }

    pub async fn run(&self, plan: &ChunkPlan, query: &str, dialect: &dyn Dialect) -> ParallelOutcome {
        self.progress.set_total_chunks(plan.chunk_count);
        info!(chunks = plan.chunk_count, workers = self.workers, "Starting parallel load");

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();
        let mut expected = BTreeMap::new();
        let mut outcome = ParallelOutcome::default();

        for index in 0..plan.chunk_count {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            if self.stop.is_stop_requested().await {
                info!(submitted = index, total = plan.chunk_count, "Stop requested, no further chunks scheduled");
                outcome.stopped_early = true;
                break;
            }

            let sql = plan.query_for(dialect, query, index);
            expected.insert(index, plan.expected_rows(index));

            let processor = self.processor.clone();
            let factory = self.factory.clone();
            let progress = self.progress.clone();
            let retry = self.retry.clone();
            tasks.spawn(
                async move {
                    let _permit = permit;
                    progress.chunk_started(index);
                    let result = run_chunk(&processor, factory.as_ref(), &retry, index, &sql).await;
                    (index, result)
                }
                .instrument(info_span!("chunk", index)),
            );
        }

        let mut results = BTreeMap::new();
        let mut lost = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(result))) => {
                    self.progress.chunk_completed(index);
                    results.insert(index, result);
                }
                Ok((index, Err(err))) => {
                    let rows = expected.get(&index).copied().unwrap_or(0);
                    error!(chunk = index, error = %err, "Chunk failed");
                    self.progress.chunk_failed(index, rows);
                    results.insert(index, ChunkResult::failed(index, err.to_string(), rows));
                }
                Err(join_err) => {
                    error!(error = %join_err, "Chunk task did not finish");
                    lost.push(MapperError::TaskJoin(join_err).to_string());
                }
            }
        }

        // A task that panicked cannot report its index: pair the lost
        // messages with the submitted chunks that have no result.
        let mut lost = lost.into_iter();
        for (index, rows) in expected {
            if results.contains_key(&index) {
                continue;
            }
            let message = lost
                .next()
                .unwrap_or_else(|| "chunk task did not report".to_string());
            self.progress.chunk_failed(index, rows);
            results.insert(index, ChunkResult::failed(index, message, rows));
        }

        outcome.chunks = results.into_values().collect();
        self.progress.flush();

        let failed = outcome
            .chunks
            .iter()
            .filter(|c| c.status == ChunkStatus::Error)
            .count();
        if failed > 0 {
            warn!(failed, total = outcome.chunks.len(), "Parallel load finished with failed chunks");
        }
        outcome
    }
}

async fn run_chunk(
    processor: &ChunkProcessor,
    factory: &dyn ConnectionFactory,
    retry: &RetryPolicy,
    index: usize,
    sql: &str,
) -> Result<ChunkResult, ProcessingError> {
    retry
        .run(
            move || async move {
                let mut source = factory.source().await?;
                let mut target = factory.target().await?;
                processor
                    .process(index, sql, source.as_mut(), target.as_mut())
                    .await
            },
            classify_processing_error,
        )
        .await
        .map_err(|e| e.into_inner())
}
