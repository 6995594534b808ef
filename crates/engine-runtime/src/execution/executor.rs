use crate::execution::{parallel::ParallelProcessor, sequential::SequentialRun};
use connectors::{ConnectionFactory, DbConnection};
use engine_core::{
    checkpoint::{CheckpointHandler, CheckpointState, ResumePoint},
    progress::ProgressTracker,
    retry::RetryPolicy,
    state::models::{RunRecord, RunSummary},
    stop::StopSignal,
};
use engine_processing::{
    chunk::{manager::ChunkManager, processor::ChunkProcessor},
    context::RunContext,
    loader::BatchLoader,
};
use model::{
    core::database::DatabaseKind,
    execution::{
        checkpoint::{CheckpointStrategy, CheckpointValue},
        result::{ChunkResult, ChunkStatus, JobOutcome, JobStatus},
    },
};
use planner::query::{
    chunk::ChunkPlan,
    dialect::{Dialect, dialect_for},
};
use std::{fmt, sync::Arc};
use tracing::{Instrument, error, info, info_span, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    Init,
    Planning,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutorState::Init => "INIT",
            ExecutorState::Planning => "PLANNING",
            ExecutorState::Running => "RUNNING",
            ExecutorState::Completed => "COMPLETED",
            ExecutorState::Failed => "FAILED",
            ExecutorState::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}

/// Picks the dialect for one side of the job: the configured tag when it
/// is recognised, otherwise the connection's own family.
pub fn resolve_dialect(tag: Option<&str>, connection_kind: DatabaseKind) -> &'static dyn Dialect {
    match tag.map(str::trim).filter(|t| !t.is_empty()) {
        None => dialect_for(connection_kind),
        Some(tag) => {
            let (kind, known) = DatabaseKind::resolve(tag);
            if !known {
                warn!(dialect = tag, "Unknown dialect, falling back to generic SQL");
            }
            dialect_for(kind)
        }
    }
}

/// Drives one run of one mapping from planning to the final outcome.
pub struct MapperExecutor {
    ctx: RunContext,
    checkpoint: Arc<CheckpointHandler>,
    stop: Arc<dyn StopSignal>,
    source_dialect: &'static dyn Dialect,
    factory: Option<Arc<dyn ConnectionFactory>>,
    retry: RetryPolicy,
    progress: Arc<ProgressTracker>,
    state: ExecutorState,
}

impl MapperExecutor {
    pub fn new(
        ctx: RunContext,
        checkpoint: CheckpointHandler,
        stop: Arc<dyn StopSignal>,
        source_dialect: &'static dyn Dialect,
    ) -> Self {
        MapperExecutor {
            ctx,
            checkpoint: Arc::new(checkpoint),
            stop,
            source_dialect,
            factory: None,
            retry: RetryPolicy::for_database(),
            progress: Arc::new(ProgressTracker::new(0)),
            state: ExecutorState::Init,
        }
    }

    /// Connections for parallel workers. Without a factory every run is
    /// sequential.
    pub fn with_factory(mut self, factory: Arc<dyn ConnectionFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_progress(mut self, progress: Arc<ProgressTracker>) -> Self {
        self.progress = progress;
        self
    }

    pub fn state(&self) -> ExecutorState {
        self.state
    }

    pub async fn execute(
        &mut self,
        source: &mut dyn DbConnection,
        target: &mut dyn DbConnection,
        supplied_checkpoint: Option<&str>,
    ) -> JobOutcome {
        let span = info_span!(
            "mapper_job",
            mapref = %self.ctx.session.mapref,
            process_id = self.ctx.session.process_id,
            session_id = self.ctx.session.session_id,
        );
        self.run(source, target, supplied_checkpoint)
            .instrument(span)
            .await
    }

    async fn run(
        &mut self,
        source: &mut dyn DbConnection,
        target: &mut dyn DbConnection,
        supplied_checkpoint: Option<&str>,
    ) -> JobOutcome {
        info!(job_id = %self.ctx.job.job_id, table = %self.ctx.target_table(), "Mapper run starting");

        let resume = self.checkpoint.resolve(supplied_checkpoint).await;
        self.record_start(&resume).await;

        if self.stop.is_stop_requested().await {
            info!("Stop requested before the run started");
            let mut outcome = JobOutcome::stopped();
            outcome.message = Some("Stop requested before start".to_string());
            return self.finish(outcome).await;
        }

        self.transition(ExecutorState::Planning);
        let query = self
            .checkpoint
            .rewrite_query(self.source_dialect, &self.ctx.job.source_query, &resume);
        let plan = self.plan(source, &query).await;

        self.transition(ExecutorState::Running);
        let outcome = match plan {
            Some((plan, factory, workers)) => self.run_parallel(&plan, &query, factory, workers).await,
            None => self.run_sequential(&query, &resume, source, target).await,
        };
        self.finish(outcome).await
    }

    fn transition(&mut self, next: ExecutorState) {
        info!(from = %self.state, to = %next, "Executor state changed");
        self.state = next;
    }

    /// Chunk plan, worker factory and pool size when the run qualifies for
    /// parallel processing.
    async fn plan(
        &self,
        source: &mut dyn DbConnection,
        query: &str,
    ) -> Option<(ChunkPlan, Arc<dyn ConnectionFactory>, usize)> {
        let parallel = self.ctx.job.parallel.as_ref().filter(|p| p.enable_parallel)?;
        if self.checkpoint.strategy() == CheckpointStrategy::RowSkip {
            warn!("Row-skip checkpoints cannot be split into chunks, running sequentially");
            return None;
        }
        let Some(factory) = self.factory.clone() else {
            warn!("No connection factory for parallel workers, running sequentially");
            return None;
        };

        let plan = ChunkManager::new(parallel.chunk_size)
            .plan_chunks(source, query)
            .await;
        if plan.estimated_rows < parallel.min_rows_for_parallel || plan.chunk_count <= 1 {
            info!(
                estimated_rows = plan.estimated_rows,
                threshold = parallel.min_rows_for_parallel,
                "Source below parallel threshold, running sequentially"
            );
            return None;
        }
        let workers = parallel.max_workers.resolve(plan.chunk_count);
        Some((plan, factory, workers))
    }

    async fn run_sequential(
        &self,
        query: &str,
        resume: &CheckpointState,
        source: &mut dyn DbConnection,
        target: &mut dyn DbConnection,
    ) -> JobOutcome {
        let loader = BatchLoader::new(self.ctx.clone(), self.retry.clone());
        self.progress.set_total_chunks(1);
        self.progress.chunk_started(0);

        let run = SequentialRun {
            ctx: &self.ctx,
            loader: &loader,
            checkpoint: &self.checkpoint,
            stop: self.stop.as_ref(),
            progress: Some(&self.progress),
        };
        let outcome = match run.execute(query, resume, source, target).await {
            Ok(result) => {
                self.progress.chunk_completed(0);
                summarize(vec![result], false)
            }
            Err(e) => {
                error!(error = %e, "Sequential load failed");
                self.progress.chunk_failed(0, 0);
                JobOutcome::failed(e.to_string())
            }
        };
        self.progress.flush();
        outcome
    }

    async fn run_parallel(
        &self,
        plan: &ChunkPlan,
        query: &str,
        factory: Arc<dyn ConnectionFactory>,
        workers: usize,
    ) -> JobOutcome {
        let processor = ChunkProcessor::new(
            self.ctx.clone(),
            BatchLoader::new(self.ctx.clone(), self.retry.clone()),
            self.checkpoint.clone(),
            self.stop.clone(),
        )
        .with_progress(self.progress.clone());

        let pool = ParallelProcessor::new(
            Arc::new(processor),
            factory,
            self.stop.clone(),
            self.progress.clone(),
            self.retry.clone(),
            workers,
        );
        let collected = pool.run(plan, query, self.source_dialect).await;
        let outcome = summarize(collected.chunks, collected.stopped_early);

        if outcome.status == JobStatus::Success
            && let Some(value) = final_checkpoint(&outcome.chunks)
        {
            self.checkpoint.update_checkpoint(&value).await;
        }
        outcome
    }

    async fn record_start(&self, resume: &CheckpointState) {
        let resumed_from = match resume.resume_point() {
            Some(ResumePoint::Key(value)) => Some(value.serialize()),
            Some(ResumePoint::RowSkip(rows)) => Some(rows.to_string()),
            None => None,
        };
        let record = RunRecord::start(&self.ctx.session, &self.ctx.job.job_id, &self.ctx.job.target_table)
            .with_checkpoint(resumed_from);
        if let Err(e) = self.ctx.store.start_run(&record).await {
            warn!(error = %e, "Failed to record run start");
        }
    }

    async fn finish(&mut self, outcome: JobOutcome) -> JobOutcome {
        self.transition(match outcome.status {
            JobStatus::Success => ExecutorState::Completed,
            JobStatus::Error => ExecutorState::Failed,
            JobStatus::Stopped => ExecutorState::Stopped,
        });
        if let Err(e) = self
            .ctx
            .store
            .finish_run(&self.ctx.session, &RunSummary::from(&outcome))
            .await
        {
            warn!(error = %e, "Failed to record run outcome");
        }
        info!(
            status = %outcome.status,
            source_rows = outcome.source_rows,
            target_rows = outcome.target_rows,
            error_rows = outcome.error_rows,
            "Mapper run finished"
        );
        outcome
    }
}

/// Folds chunk results into the run outcome. Any failed chunk fails the run;
/// otherwise a stop anywhere marks it stopped.
pub fn summarize(chunks: Vec<ChunkResult>, stopped_early: bool) -> JobOutcome {
    let failed: Vec<&ChunkResult> = chunks
        .iter()
        .filter(|c| c.status == ChunkStatus::Error)
        .collect();
    let stopped = stopped_early || chunks.iter().any(|c| c.status == ChunkStatus::Stopped);

    let status = if !failed.is_empty() {
        JobStatus::Error
    } else if stopped {
        JobStatus::Stopped
    } else {
        JobStatus::Success
    };

    let mut outcome = JobOutcome::new(status);
    outcome.message = failed.first().map(|first| {
        let reason = first.error.as_deref().unwrap_or("unknown error");
        if chunks.len() > 1 {
            format!("{} of {} chunks failed; chunk {}: {reason}", failed.len(), chunks.len(), first.chunk_index)
        } else {
            reason.to_string()
        }
    });
    for chunk in &chunks {
        outcome.source_rows += chunk.rows_read;
        outcome.target_rows += chunk.target_rows();
        outcome.error_rows += chunk.rows_errored;
    }
    outcome.chunks = chunks;
    outcome
}

/// Highest checkpoint reached by any chunk. Chunks finish in any order, so
/// the last one to complete is not necessarily the furthest.
pub fn final_checkpoint(chunks: &[ChunkResult]) -> Option<String> {
    CheckpointValue::max_of(chunks.iter().filter_map(|c| c.checkpoint.as_ref())).map(|v| v.serialize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use connectors::sql::mock::MockConnection;
    use engine_core::{
        state::{SessionStore, memory::MemorySessionStore, models::RunStatus},
        stop::NeverStop,
    };
    use model::{
        core::value::Value,
        execution::{
            checkpoint::CheckpointConfig,
            job::{JobConfig, ParallelConfig, TableType},
            session::SessionKey,
        },
        records::row::RowData,
    };
    use tracing_test::traced_test;

    fn chunk(index: usize, checkpoint: i64) -> ChunkResult {
        let mut r = ChunkResult::new(index);
        r.rows_read = 10;
        r.rows_inserted = 8;
        r.rows_errored = 2;
        r.checkpoint = Some(CheckpointValue::single(checkpoint));
        r
    }

    #[test]
    fn test_final_checkpoint_is_maximum() {
        let chunks = vec![chunk(0, 50_000), chunk(1, 150_000), chunk(2, 100_000)];
        assert_eq!(final_checkpoint(&chunks).as_deref(), Some("150000"));
    }

    #[test]
    fn test_failed_chunk_fails_run_but_keeps_counts() {
        let chunks = vec![chunk(0, 1), ChunkResult::failed(1, "timeout".into(), 500), chunk(2, 3)];
        let outcome = summarize(chunks, false);
        assert_eq!(outcome.status, JobStatus::Error);
        assert_eq!(outcome.source_rows, 20);
        assert_eq!(outcome.target_rows, 16);
        assert_eq!(outcome.error_rows, 504);
        assert_eq!(outcome.message.as_deref(), Some("1 of 3 chunks failed; chunk 1: timeout"));
    }

    #[test]
    fn test_stop_marks_run_stopped() {
        let outcome = summarize(vec![chunk(0, 1)], true);
        assert_eq!(outcome.status, JobStatus::Stopped);

        let mut stopped = chunk(1, 2);
        stopped.status = ChunkStatus::Stopped;
        assert_eq!(summarize(vec![chunk(0, 1), stopped], false).status, JobStatus::Stopped);
        assert_eq!(summarize(vec![chunk(0, 1)], false).status, JobStatus::Success);
    }

    #[test]
    fn test_unknown_dialect_tag_falls_back() {
        assert_eq!(resolve_dialect(Some("informix"), DatabaseKind::Postgres).kind(), DatabaseKind::Generic);
        assert_eq!(resolve_dialect(None, DatabaseKind::MySql).kind(), DatabaseKind::MySql);
        assert_eq!(resolve_dialect(Some("pg"), DatabaseKind::Sqlite).kind(), DatabaseKind::Postgres);
    }

    fn executor(store: Arc<MemorySessionStore>, job: JobConfig, config: CheckpointConfig) -> MapperExecutor {
        let session = SessionKey {
            mapref: "M".into(),
            process_id: 4,
            session_id: 9,
        };
        let postgres = dialect_for(DatabaseKind::Postgres);
        let ctx = RunContext::new(Arc::new(job), session.clone(), store.clone(), postgres);
        let checkpoint = CheckpointHandler::new(config, store, session);
        MapperExecutor::new(ctx, checkpoint, Arc::new(NeverStop), postgres).with_retry(RetryPolicy::immediate(0))
    }

    fn job() -> JobConfig {
        JobConfig::new("M", "J", "TGT", TableType::Fct, "SELECT id, name FROM s ORDER BY id;")
            .with_primary_key("ID", "id")
            .with_column("NAME", "name")
            .with_bulk_limit(2)
    }

    fn rows(ids: std::ops::RangeInclusive<i64>) -> Vec<RowData> {
        ids.map(|id| RowData::from_pairs("", [("id", Value::Int(id)), ("name", format!("n{id}").into())]))
            .collect()
    }

    #[tokio::test]
    async fn test_sequential_run_completes_checkpoint() {
        let store = Arc::new(MemorySessionStore::new());
        let source = MockConnection::default().with_cursor_rows(rows(1..=3));
        let target = MockConnection::default();
        let (mut src, mut tgt) = (source.clone(), target.clone());

        let mut exec = executor(store.clone(), job(), CheckpointConfig::key(&["id"]));
        let outcome = exec.execute(&mut src, &mut tgt, None).await;

        assert_eq!(outcome.status, JobStatus::Success);
        assert_eq!(outcome.source_rows, 3);
        assert_eq!(outcome.target_rows, 3);
        assert_eq!(exec.state(), ExecutorState::Completed);
        assert_eq!(store.checkpoint_history(), vec!["2", "3", "COMPLETED"]);
        assert_eq!(target.statements_matching("INSERT INTO").len(), 3);

        let runs = store.runs();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Success);
        assert_eq!(runs[0].source_rows, 3);
    }

    #[tokio::test]
    async fn test_stored_checkpoint_restricts_source_query() {
        let store = Arc::new(MemorySessionStore::new().with_checkpoint("M", "7"));
        let source = MockConnection::default().with_cursor_rows(rows(8..=8));
        let (mut src, mut tgt) = (source.clone(), MockConnection::default());

        let outcome = executor(store.clone(), job(), CheckpointConfig::key(&["id"]))
            .execute(&mut src, &mut tgt, None)
            .await;

        assert_eq!(outcome.status, JobStatus::Success);
        let cursor = &source.opened_cursors()[0];
        assert!(cursor.contains("ckpt_src WHERE"));
        assert!(cursor.contains("id > '7'"));
        assert_eq!(store.runs()[0].checkpoint.as_deref(), Some("COMPLETED"));
    }

    #[tokio::test]
    async fn test_stop_before_start_records_stopped_run() {
        let store = Arc::new(MemorySessionStore::new().with_checkpoint("M", "7"));
        store.request_stop("M", true).await.unwrap();
        let source = MockConnection::default().with_cursor_rows(rows(1..=3));
        let (mut src, mut tgt) = (source.clone(), MockConnection::default());

        let stop: Arc<dyn StopSignal> = Arc::new(engine_core::stop::StoreStopSignal::new(store.clone(), "M"));
        let mut exec = executor(store.clone(), job(), CheckpointConfig::key(&["id"]));
        exec.stop = stop;
        let outcome = exec.execute(&mut src, &mut tgt, None).await;

        assert_eq!(outcome.status, JobStatus::Stopped);
        assert_eq!(outcome.source_rows, 0);
        assert_eq!(exec.state(), ExecutorState::Stopped);
        assert!(source.opened_cursors().is_empty());

        let runs = store.runs();
        assert_eq!(runs[0].status, RunStatus::Stopped);
        assert_eq!(runs[0].checkpoint.as_deref(), Some("7"));
    }

    #[traced_test]
    #[tokio::test]
    async fn test_row_skip_never_runs_parallel() {
        let store = Arc::new(MemorySessionStore::new());
        let job = job().with_parallel(ParallelConfig::enabled().with_chunk_size(1).with_min_rows(1));
        let source = MockConnection::default().with_cursor_rows(rows(1..=3));
        let (mut src, mut tgt) = (source.clone(), MockConnection::default());

        let outcome = executor(store.clone(), job, CheckpointConfig::row_skip())
            .execute(&mut src, &mut tgt, None)
            .await;

        assert_eq!(outcome.status, JobStatus::Success);
        assert_eq!(outcome.chunks.len(), 1);
        assert!(logs_contain("Row-skip checkpoints cannot be split"));
        assert_eq!(store.checkpoint_history(), vec!["2", "3", "COMPLETED"]);
    }
}
