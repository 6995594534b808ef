use connectors::{ConnectorError, DbError};
use engine_core::error::StateStoreError;
use model::core::database::UnknownDatabaseKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Failed to read the job file: {0}")]
    ConfigFileRead(#[from] std::io::Error),

    #[error("Failed to deserialize the job file: {0}")]
    ConfigDeserialize(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid connection kind provided: {0}")]
    InvalidConnectionKind(#[from] UnknownDatabaseKind),

    #[error("Connection error: {0}")]
    Connector(#[from] ConnectorError),

    #[error("Database error: {0}")]
    Db(#[from] DbError),

    #[error("Metadata store error: {0}")]
    Store(#[from] StateStoreError),

    #[error("Failed to serialize data to JSON: {0}")]
    JsonSerialize(serde_json::Error),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}
