use engine_core::state::{SessionStore, models::BatchLog};
use model::execution::{
    failed_row::RowErrorRecord, job::JobConfig, session::SessionKey,
};
use planner::query::dialect::Dialect;
use std::sync::Arc;
use tracing::warn;

/// Everything a worker needs to know about the run it belongs to.
#[derive(Clone)]
pub struct RunContext {
    pub job: Arc<JobConfig>,
    pub session: SessionKey,
    pub store: Arc<dyn SessionStore>,
    pub target_dialect: &'static dyn Dialect,
}

impl RunContext {
    pub fn new(
        job: Arc<JobConfig>,
        session: SessionKey,
        store: Arc<dyn SessionStore>,
        target_dialect: &'static dyn Dialect,
    ) -> Self {
        RunContext {
            job,
            session,
            store,
            target_dialect,
        }
    }

    /// Target table name as the target dialect addresses it.
    pub fn target_table(&self) -> String {
        self.target_dialect
            .qualified_table(self.job.target_schema.as_deref(), &self.job.target_table)
    }

    /// Writes a batch log entry. Bookkeeping failures never stop a load.
    pub async fn log_batch(&self, log: &BatchLog) {
        if let Err(e) = self.store.record_batch(log).await {
            warn!(mapref = %self.session.mapref, batch = log.batch_no, error = %e, "Failed to record batch log");
        }
    }

    pub async fn log_row_error(&self, record: &RowErrorRecord) {
        if let Err(e) = self.store.record_row_error(record).await {
            warn!(mapref = %self.session.mapref, key = %record.error_key, error = %e, "Failed to record rejected row");
        }
    }
}
