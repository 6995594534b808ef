use connectors::{ConnectorError, DbError};
use engine_core::error::CheckpointError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("Source row has no column '{source_column}' mapped to target '{target}'")]
    MissingSourceColumn {
        target: String,
        source_column: String,
    },
}

/// Steps of an SCD batch, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScdStep {
    Expire,
    Update,
    Insert,
}

impl std::fmt::Display for ScdStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScdStep::Expire => write!(f, "expire"),
            ScdStep::Update => write!(f, "update"),
            ScdStep::Insert => write!(f, "insert"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ScdError {
    #[error("SCD {step} on {table} failed: {source}")]
    Step {
        step: ScdStep,
        table: String,
        #[source]
        source: DbError,
    },

    #[error("Lookup of existing rows in {table} failed: {source}")]
    Lookup {
        table: String,
        #[source]
        source: DbError,
    },

    #[error("Savepoint handling failed: {0}")]
    Savepoint(#[source] DbError),
}

impl ScdError {
    pub fn db_error(&self) -> &DbError {
        match self {
            ScdError::Step { source, .. } | ScdError::Lookup { source, .. } => source,
            ScdError::Savepoint(source) => source,
        }
    }
}

#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Scd(#[from] ScdError),

    #[error("Source read failed: {0}")]
    Source(#[source] DbError),

    #[error("Target transaction failed: {0}")]
    Target(#[source] DbError),

    #[error("Failed to open connection: {0}")]
    Connect(#[from] ConnectorError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}
