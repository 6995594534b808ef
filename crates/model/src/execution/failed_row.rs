use crate::{core::value::Value, execution::session::SessionKey, records::row::RowData};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The stage of a mapping run where a row was rejected.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProcessingStage {
    /// Mapping source columns onto the target layout.
    Transform,

    /// Writing the row to the target table.
    Load,
}

/// A row that was skipped and must be reported in the error log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RowErrorRecord {
    pub id: String,
    pub mapref: String,
    pub job_id: String,
    pub process_id: i64,
    pub session_id: i64,
    pub stage: ProcessingStage,
    pub error_key: String,
    pub error_message: String,
    pub row: Option<RowData>,
    pub failed_at: DateTime<Utc>,
}

impl RowErrorRecord {
    pub fn new(
        session: &SessionKey,
        job_id: &str,
        stage: ProcessingStage,
        error_key: String,
        error_message: String,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            mapref: session.mapref.clone(),
            job_id: job_id.to_string(),
            process_id: session.process_id,
            session_id: session.session_id,
            stage,
            error_key,
            error_message,
            row: None,
            failed_at: Utc::now(),
        }
    }

    pub fn with_row(mut self, row: RowData) -> Self {
        self.row = Some(row);
        self
    }

    /// Column/value pairs in the order the error log table stores them.
    pub fn storage_fields(&self) -> Vec<(&'static str, Value)> {
        let row_json = self
            .row
            .as_ref()
            .and_then(|r| serde_json::to_string(&r.field_values).ok());
        vec![
            ("MAPREF", Value::String(self.mapref.clone())),
            ("JOB_ID", Value::String(self.job_id.clone())),
            ("PROCESS_ID", Value::Int(self.process_id)),
            ("SESSION_ID", Value::Int(self.session_id)),
            ("STAGE", Value::String(self.stage.to_string())),
            ("ERROR_KEY", Value::String(self.error_key.clone())),
            ("ERROR_MSG", Value::String(self.error_message.clone())),
            ("ROW_DATA", Value::from(row_json)),
            ("CREATED_DT", Value::Timestamp(self.failed_at)),
        ]
    }
}

impl std::fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessingStage::Transform => write!(f, "TRANSFORM"),
            ProcessingStage::Load => write!(f, "LOAD"),
        }
    }
}
