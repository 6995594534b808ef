use crate::error::{ProcessingError, ScdError};
use connectors::ConnectorError;
use engine_core::retry::{RetryDisposition, classify_db_error};

pub fn classify_scd_error(err: &ScdError) -> RetryDisposition {
    classify_db_error(err.db_error())
}

pub fn classify_connector_error(err: &ConnectorError) -> RetryDisposition {
    if err.is_transient() {
        RetryDisposition::Retry
    } else {
        RetryDisposition::Stop
    }
}

/// Only database round trips are worth repeating. Mapping and checkpoint
/// errors come from the job definition and fail the same way every time.
pub fn classify_processing_error(err: &ProcessingError) -> RetryDisposition {
    match err {
        ProcessingError::Scd(e) => classify_scd_error(e),
        ProcessingError::Source(e) | ProcessingError::Target(e) => classify_db_error(e),
        ProcessingError::Connect(e) => classify_connector_error(e),
        ProcessingError::Transform(_) | ProcessingError::Checkpoint(_) => RetryDisposition::Stop,
    }
}
