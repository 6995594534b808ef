use connectors::DbError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateStoreError {
    #[error("State storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("Failed to encode state entry: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("Failed to encode row payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Metadata database error: {0}")]
    Database(#[from] DbError),

    #[error("Run {0} was never started")]
    UnknownRun(String),
}

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Checkpoint column '{0}' is missing from the source row")]
    MissingColumn(String),

    #[error("Failed to persist checkpoint: {0}")]
    Store(#[from] StateStoreError),
}
