use crate::{
    error::StateStoreError,
    state::{
        SessionStore,
        models::{BatchLog, RunRecord, RunSummary},
    },
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use model::execution::{failed_row::RowErrorRecord, session::SessionKey};
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use std::path::Path;

/// Checkpoint entry keyed by mapping; the latest write wins.
#[derive(Serialize, Deserialize, Clone, Debug)]
struct StoredCheckpoint {
    value: String,
    process_id: i64,
    session_id: i64,
    updated_at: DateTime<Utc>,
}

pub struct SledSessionStore {
    db: sled::Db,
}

impl SledSessionStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StateStoreError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    #[inline]
    fn chk_key(mapref: &str) -> String {
        format!("chk:{mapref}")
    }

    #[inline]
    fn session_prefix(kind: &str, session: &SessionKey) -> String {
        format!(
            "{kind}:{}:{}:{}:",
            session.mapref, session.process_id, session.session_id
        )
    }

    #[inline]
    fn run_key(session: &SessionKey) -> String {
        Self::session_prefix("run", session)
    }

    #[inline]
    fn stop_key(mapref: &str) -> String {
        format!("stop:{mapref}")
    }

    pub fn run(&self, session: &SessionKey) -> Result<Option<RunRecord>, StateStoreError> {
        match self.db.get(Self::run_key(session))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn batches(&self, session: &SessionKey) -> Result<Vec<BatchLog>, StateStoreError> {
        let mut batches = Vec::new();
        for item in self.db.scan_prefix(Self::session_prefix("batch", session)) {
            let (_key, value) = item?;
            batches.push(bincode::deserialize(&value)?);
        }
        Ok(batches)
    }

    /// Row payloads carry arbitrary values, so error records are kept as JSON.
    pub fn row_errors(&self, session: &SessionKey) -> Result<Vec<RowErrorRecord>, StateStoreError> {
        let mut records = Vec::new();
        for item in self.db.scan_prefix(Self::session_prefix("err", session)) {
            let (_key, value) = item?;
            records.push(serde_json::from_slice(&value)?);
        }
        Ok(records)
    }
}

#[async_trait]
impl SessionStore for SledSessionStore {
    async fn load_checkpoint(&self, mapref: &str) -> Result<Option<String>, StateStoreError> {
        match self.db.get(Self::chk_key(mapref))? {
            Some(bytes) => {
                let stored: StoredCheckpoint = bincode::deserialize(&bytes)?;
                Ok(Some(stored.value))
            }
            None => Ok(None),
        }
    }

    async fn save_checkpoint(&self, session: &SessionKey, value: &str) -> Result<(), StateStoreError> {
        let stored = StoredCheckpoint {
            value: value.to_string(),
            process_id: session.process_id,
            session_id: session.session_id,
            updated_at: Utc::now(),
        };
        self.db
            .insert(Self::chk_key(&session.mapref), bincode::serialize(&stored)?)?;

        // Mirror the value onto the run record when the run is known.
        let run_key = Self::run_key(session);
        let result = self.db.transaction::<_, _, bincode::Error>(|tx_db| {
            if let Some(existing) = tx_db.get(&run_key)? {
                let mut run: RunRecord = bincode::deserialize(&existing)
                    .map_err(ConflictableTransactionError::Abort)?;
                run.checkpoint = Some(value.to_string());
                let bytes = bincode::serialize(&run).map_err(ConflictableTransactionError::Abort)?;
                tx_db.insert(run_key.as_bytes(), bytes)?;
            }
            Ok(())
        });

        match result {
            Ok(()) => Ok(()),
            Err(TransactionError::Abort(e)) => Err(e.into()),
            Err(TransactionError::Storage(e)) => Err(e.into()),
        }
    }

    async fn reset_checkpoint(&self, mapref: &str) -> Result<(), StateStoreError> {
        self.db.remove(Self::chk_key(mapref))?;
        Ok(())
    }

    async fn start_run(&self, run: &RunRecord) -> Result<(), StateStoreError> {
        self.db
            .insert(Self::run_key(&run.session), bincode::serialize(run)?)?;
        Ok(())
    }

    async fn record_batch(&self, batch: &BatchLog) -> Result<(), StateStoreError> {
        let key = format!(
            "{}{:010}:{:06}",
            Self::session_prefix("batch", &batch.session),
            batch.batch_no,
            batch.chunk.unwrap_or(0)
        );
        self.db.insert(key, bincode::serialize(batch)?)?;
        Ok(())
    }

    async fn finish_run(&self, session: &SessionKey, summary: &RunSummary) -> Result<(), StateStoreError> {
        let run_key = Self::run_key(session);
        let result = self.db.transaction::<_, _, StateStoreError>(|tx_db| {
            let Some(existing) = tx_db.get(&run_key)? else {
                return Err(ConflictableTransactionError::Abort(StateStoreError::UnknownRun(
                    run_key.clone(),
                )));
            };
            let mut run: RunRecord = bincode::deserialize(&existing)
                .map_err(|e| ConflictableTransactionError::Abort(e.into()))?;
            run.apply(summary);
            let bytes =
                bincode::serialize(&run).map_err(|e| ConflictableTransactionError::Abort(e.into()))?;
            tx_db.insert(run_key.as_bytes(), bytes)?;
            Ok(())
        });

        match result {
            Ok(()) => Ok(()),
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(e.into()),
        }
    }

    async fn record_row_error(&self, record: &RowErrorRecord) -> Result<(), StateStoreError> {
        let session = SessionKey {
            mapref: record.mapref.clone(),
            process_id: record.process_id,
            session_id: record.session_id,
        };
        let key = format!("{}{}", Self::session_prefix("err", &session), record.id);
        self.db.insert(key, serde_json::to_vec(record)?)?;
        Ok(())
    }

    async fn is_stop_requested(&self, mapref: &str) -> Result<bool, StateStoreError> {
        Ok(self
            .db
            .get(Self::stop_key(mapref))?
            .is_some_and(|flag| flag.first() == Some(&1)))
    }

    async fn request_stop(&self, mapref: &str, stop: bool) -> Result<(), StateStoreError> {
        let key = Self::stop_key(mapref);
        if stop {
            self.db.insert(key, vec![1u8])?;
        } else {
            self.db.remove(key)?;
        }
        self.db.flush_async().await?;
        Ok(())
    }
}
