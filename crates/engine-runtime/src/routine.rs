use crate::{
    error::MapperError,
    execution::executor::{MapperExecutor, resolve_dialect},
};
use async_trait::async_trait;
use connectors::{ConnectionFactory, DbConnection};
use engine_core::{
    checkpoint::CheckpointHandler,
    progress::{ProgressCallback, ProgressTracker},
    retry::RetryPolicy,
    state::SessionStore,
    stop::{AnyStopSignal, StopSignal, StoreStopSignal},
};
use engine_processing::context::RunContext;
use model::execution::{
    checkpoint::CheckpointConfig,
    job::JobConfig,
    result::JobOutcome,
    session::SessionParams,
};
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use tracing::error;

/// Entry point a scheduler calls for one mapping run.
///
/// Every failure is reported through the returned outcome rather than an
/// `Err`, so the caller always gets a status to record.
#[async_trait]
pub trait JobRoutine: Send + Sync {
    async fn run(
        &self,
        metadata: Arc<dyn SessionStore>,
        source: Box<dyn DbConnection>,
        target: Box<dyn DbConnection>,
        params: SessionParams,
    ) -> JobOutcome;

    /// Same as `run`, with the loosely typed parameter and result maps
    /// schedulers exchange.
    async fn run_map(
        &self,
        metadata: Arc<dyn SessionStore>,
        source: Box<dyn DbConnection>,
        target: Box<dyn DbConnection>,
        params: &Map<String, JsonValue>,
    ) -> Map<String, JsonValue> {
        match SessionParams::from_map(params).map_err(MapperError::from) {
            Ok(params) => self.run(metadata, source, target, params).await.to_map(),
            Err(e) => {
                error!(error = %e, "Rejected session parameters");
                JobOutcome::failed(e.to_string()).to_map()
            }
        }
    }
}

/// The generated routine for one mapping: its configuration plus the
/// optional collaborators a run can use.
pub struct MapperJob {
    job: Arc<JobConfig>,
    checkpoint: CheckpointConfig,
    factory: Option<Arc<dyn ConnectionFactory>>,
    retry: RetryPolicy,
    progress: Option<ProgressCallback>,
    stop: Option<Arc<dyn StopSignal>>,
}

impl MapperJob {
    pub fn new(job: JobConfig, checkpoint: CheckpointConfig) -> Self {
        MapperJob {
            job: Arc::new(job),
            checkpoint,
            factory: None,
            retry: RetryPolicy::for_database(),
            progress: None,
            stop: None,
        }
    }

    pub fn with_factory(mut self, factory: Arc<dyn ConnectionFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Extra stop source checked alongside the stop flag in the store.
    pub fn with_stop_signal(mut self, stop: Arc<dyn StopSignal>) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn job(&self) -> &JobConfig {
        &self.job
    }

    fn executor(
        &self,
        metadata: Arc<dyn SessionStore>,
        source: &dyn DbConnection,
        target: &dyn DbConnection,
        params: &SessionParams,
    ) -> Result<MapperExecutor, MapperError> {
        self.job.validate()?;

        let session = params.key(&self.job.mapref);
        let source_dialect = resolve_dialect(self.job.source_dialect.as_deref(), source.kind());
        let target_dialect = resolve_dialect(self.job.target_dialect.as_deref(), target.kind());

        let mut stop = AnyStopSignal::new().with(Arc::new(StoreStopSignal::new(
            metadata.clone(),
            &self.job.mapref,
        )));
        if let Some(extra) = &self.stop {
            stop = stop.with(extra.clone());
        }

        let mut progress = ProgressTracker::new(0);
        if let Some(callback) = &self.progress {
            progress = progress.with_callback(callback.clone());
        }

        let checkpoint = CheckpointHandler::new(self.checkpoint.clone(), metadata.clone(), session.clone());
        let ctx = RunContext::new(self.job.clone(), session, metadata, target_dialect);
        let mut executor = MapperExecutor::new(ctx, checkpoint, Arc::new(stop), source_dialect)
            .with_retry(self.retry.clone())
            .with_progress(Arc::new(progress));
        if let Some(factory) = &self.factory {
            executor = executor.with_factory(factory.clone());
        }
        Ok(executor)
    }
}

#[async_trait]
impl JobRoutine for MapperJob {
    async fn run(
        &self,
        metadata: Arc<dyn SessionStore>,
        mut source: Box<dyn DbConnection>,
        mut target: Box<dyn DbConnection>,
        params: SessionParams,
    ) -> JobOutcome {
        let mut executor = match self.executor(metadata, source.as_ref(), target.as_ref(), &params) {
            Ok(executor) => executor,
            Err(e) => {
                error!(mapref = %self.job.mapref, error = %e, "Mapper cannot start");
                return JobOutcome::failed(e.to_string());
            }
        };
        executor
            .execute(
                source.as_mut(),
                target.as_mut(),
                params.checkpoint_value.as_deref(),
            )
            .await
    }
}
