use crate::error::MapperError;
use connectors::DbConnection;
use engine_core::{
    checkpoint::{CheckpointHandler, CheckpointState},
    progress::ProgressTracker,
    stop::StopSignal,
};
use engine_processing::{context::RunContext, error::ProcessingError, loader::BatchLoader};
use model::{
    execution::{
        checkpoint::CheckpointStrategy,
        result::{ChunkResult, ChunkStatus},
    },
    records::row::RowData,
};
use tracing::{debug, info, warn};

/// Single-cursor load of the whole (checkpoint-restricted) source query.
///
/// The target is committed every `commit_interval` batches and the
/// checkpoint only moves after such a commit, so a resumed run never skips
/// uncommitted rows.
pub struct SequentialRun<'a> {
    pub ctx: &'a RunContext,
    pub loader: &'a BatchLoader,
    pub checkpoint: &'a CheckpointHandler,
    pub stop: &'a dyn StopSignal,
    pub progress: Option<&'a ProgressTracker>,
}

impl SequentialRun<'_> {
    pub async fn execute(
        &self,
        query: &str,
        resume: &CheckpointState,
        source: &mut dyn DbConnection,
        target: &mut dyn DbConnection,
    ) -> Result<ChunkResult, MapperError> {
        let mut result = ChunkResult::new(0);
        source.open_cursor(query).await.map_err(ProcessingError::Source)?;
        target.begin().await.map_err(ProcessingError::Target)?;

        let outcome = self.drain(resume, source, target, &mut result).await;
        if let Err(e) = source.close_cursor().await {
            warn!(error = %e, "Failed to close source cursor");
        }

        match outcome {
            Ok(()) => Ok(result),
            Err(err) => {
                if let Err(e) = target.rollback().await {
                    warn!(error = %e, "Rollback after failed batch failed");
                }
                Err(err)
            }
        }
    }

    async fn drain(
        &self,
        resume: &CheckpointState,
        source: &mut dyn DbConnection,
        target: &mut dyn DbConnection,
        result: &mut ChunkResult,
    ) -> Result<(), MapperError> {
        let job = &self.ctx.job;
        let commit_every = job.commit_interval.max(1);
        let mut to_skip = resume.skip_count();
        let mut consumed = 0u64;
        let mut batch_no = 0u64;
        let mut uncommitted = 0usize;
        let mut pending_checkpoint: Option<String> = None;

        if to_skip > 0 {
            info!(rows = to_skip, "Skipping rows already loaded by a previous run");
        }

        loop {
            if self.stop.is_stop_requested().await {
                info!(batches = batch_no, rows = result.rows_read, "Stop requested, committing and ending run");
                self.commit(target, &mut pending_checkpoint).await?;
                result.status = ChunkStatus::Stopped;
                return Ok(());
            }

            let fetched = source
                .fetch_next(job.bulk_limit)
                .await
                .map_err(ProcessingError::Source)?;
            if fetched.is_empty() {
                self.commit(target, &mut pending_checkpoint).await?;
                self.checkpoint.complete_checkpoint().await;
                return Ok(());
            }
            consumed += fetched.len() as u64;

            let skipped = usize::try_from(to_skip).unwrap_or(usize::MAX).min(fetched.len());
            to_skip -= skipped as u64;
            let rows: &[RowData] = &fetched[skipped..];
            let Some(last) = rows.last() else {
                continue;
            };

            let position = match self.checkpoint.strategy() {
                CheckpointStrategy::Key => self
                    .checkpoint
                    .value_from_row(last)
                    .map_err(ProcessingError::from)?
                    .map(|v| v.serialize()),
                CheckpointStrategy::RowSkip => Some(consumed.to_string()),
                CheckpointStrategy::None => None,
            };

            let stats = self.loader.load(target, rows).await?;
            stats.add_to(result);
            batch_no += 1;
            uncommitted += 1;
            pending_checkpoint = position.or(pending_checkpoint);

            if uncommitted >= commit_every {
                self.commit(target, &mut pending_checkpoint).await?;
                target.begin().await.map_err(ProcessingError::Target)?;
                uncommitted = 0;
            }

            if let Some(progress) = self.progress {
                progress.record_rows(0, stats.rows_read, stats.succeeded(), stats.errored);
            }
            self.ctx.log_batch(&stats.to_log(self.ctx, batch_no, None)).await;
            debug!(batch = batch_no, rows = stats.rows_read, "Batch done");
        }
    }

    /// Commits the target, then records the position the commit covers.
    async fn commit(
        &self,
        target: &mut dyn DbConnection,
        pending_checkpoint: &mut Option<String>,
    ) -> Result<(), MapperError> {
        target.commit().await.map_err(ProcessingError::Target)?;
        if let Some(value) = pending_checkpoint.take() {
            self.checkpoint.update_checkpoint(&value).await;
        }
        Ok(())
    }
}
