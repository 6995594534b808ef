use connectors::ConnectorError;
use engine_core::error::StateStoreError;
use engine_processing::error::ProcessingError;
use model::execution::{job::JobConfigError, session::SessionParamsError};
use thiserror::Error;

/// Errors that prevent a mapping run from producing an outcome of its own.
#[derive(Debug, Error)]
pub enum MapperError {
    #[error("Invalid job configuration: {0}")]
    Config(#[from] JobConfigError),

    #[error("Invalid session parameters: {0}")]
    Params(#[from] SessionParamsError),

    #[error("Connection error: {0}")]
    Connect(#[from] ConnectorError),

    #[error("Metadata store error: {0}")]
    Store(#[from] StateStoreError),

    #[error(transparent)]
    Processing(#[from] ProcessingError),

    /// A worker task panicked or was aborted.
    #[error("Chunk task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}
