use crate::{
    error::StateStoreError,
    state::{
        SessionStore,
        models::{BatchLog, RunRecord, RunSummary},
    },
};
use async_trait::async_trait;
use model::execution::{failed_row::RowErrorRecord, session::SessionKey};
use std::{
    collections::{HashMap, HashSet},
    sync::{Mutex, MutexGuard},
};

#[derive(Debug, Default)]
struct Inner {
    checkpoints: HashMap<String, String>,
    runs: Vec<RunRecord>,
    batches: Vec<BatchLog>,
    row_errors: Vec<RowErrorRecord>,
    stops: HashSet<String>,
    checkpoint_history: Vec<String>,
}

/// Process-local session store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    inner: Mutex<Inner>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn with_checkpoint(self, mapref: &str, value: &str) -> Self {
        self.inner()
            .checkpoints
            .insert(mapref.to_string(), value.to_string());
        self
    }

    /// Every value passed to `save_checkpoint`, oldest first.
    pub fn checkpoint_history(&self) -> Vec<String> {
        self.inner().checkpoint_history.clone()
    }

    pub fn runs(&self) -> Vec<RunRecord> {
        self.inner().runs.clone()
    }

    pub fn batches(&self) -> Vec<BatchLog> {
        self.inner().batches.clone()
    }

    pub fn row_errors(&self) -> Vec<RowErrorRecord> {
        self.inner().row_errors.clone()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load_checkpoint(&self, mapref: &str) -> Result<Option<String>, StateStoreError> {
        Ok(self.inner().checkpoints.get(mapref).cloned())
    }

    async fn save_checkpoint(&self, session: &SessionKey, value: &str) -> Result<(), StateStoreError> {
        let mut inner = self.inner();
        inner
            .checkpoints
            .insert(session.mapref.clone(), value.to_string());
        inner.checkpoint_history.push(value.to_string());
        if let Some(run) = inner.runs.iter_mut().find(|r| r.session == *session) {
            run.checkpoint = Some(value.to_string());
        }
        Ok(())
    }

    async fn reset_checkpoint(&self, mapref: &str) -> Result<(), StateStoreError> {
        self.inner().checkpoints.remove(mapref);
        Ok(())
    }

    async fn start_run(&self, run: &RunRecord) -> Result<(), StateStoreError> {
        self.inner().runs.push(run.clone());
        Ok(())
    }

    async fn record_batch(&self, batch: &BatchLog) -> Result<(), StateStoreError> {
        self.inner().batches.push(batch.clone());
        Ok(())
    }

    async fn finish_run(&self, session: &SessionKey, summary: &RunSummary) -> Result<(), StateStoreError> {
        let mut inner = self.inner();
        let run = inner
            .runs
            .iter_mut()
            .find(|r| r.session == *session)
            .ok_or_else(|| StateStoreError::UnknownRun(session.mapref.clone()))?;
        run.apply(summary);
        Ok(())
    }

    async fn record_row_error(&self, record: &RowErrorRecord) -> Result<(), StateStoreError> {
        self.inner().row_errors.push(record.clone());
        Ok(())
    }

    async fn is_stop_requested(&self, mapref: &str) -> Result<bool, StateStoreError> {
        Ok(self.inner().stops.contains(mapref))
    }

    async fn request_stop(&self, mapref: &str, stop: bool) -> Result<(), StateStoreError> {
        let mut inner = self.inner();
        if stop {
            inner.stops.insert(mapref.to_string());
        } else {
            inner.stops.remove(mapref);
        }
        Ok(())
    }
}
