use chrono::{DateTime, Utc};
use model::execution::{
    result::{JobOutcome, JobStatus},
    session::SessionKey,
};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Success,
    Error,
    Stopped,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Success => "SUCCESS",
            RunStatus::Error => "ERROR",
            RunStatus::Stopped => "STOPPED",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<JobStatus> for RunStatus {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Success => RunStatus::Success,
            JobStatus::Error => RunStatus::Error,
            JobStatus::Stopped => RunStatus::Stopped,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RunRecord {
    pub session: SessionKey,
    pub job_id: String,
    pub target_table: String,
    pub status: RunStatus,
    /// Checkpoint the run resumed from, then the latest one it stored.
    pub checkpoint: Option<String>,
    pub source_rows: u64,
    pub target_rows: u64,
    pub error_rows: u64,
    pub message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    pub fn start(session: &SessionKey, job_id: &str, target_table: &str) -> Self {
        RunRecord {
            session: session.clone(),
            job_id: job_id.to_string(),
            target_table: target_table.to_string(),
            status: RunStatus::Running,
            checkpoint: None,
            source_rows: 0,
            target_rows: 0,
            error_rows: 0,
            message: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn with_checkpoint(mut self, checkpoint: Option<String>) -> Self {
        self.checkpoint = checkpoint;
        self
    }

    pub fn apply(&mut self, summary: &RunSummary) {
        self.status = summary.status;
        self.source_rows = summary.source_rows;
        self.target_rows = summary.target_rows;
        self.error_rows = summary.error_rows;
        self.message = summary.message.clone();
        self.finished_at = Some(summary.finished_at);
    }
}

/// Counters of one committed batch. `chunk` is set on the parallel path.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BatchLog {
    pub session: SessionKey,
    pub batch_no: u64,
    pub chunk: Option<usize>,
    pub rows_read: u64,
    pub rows_inserted: u64,
    pub rows_updated: u64,
    pub rows_expired: u64,
    pub rows_errored: u64,
    pub logged_at: DateTime<Utc>,
}

impl BatchLog {
    pub fn new(session: &SessionKey, batch_no: u64) -> Self {
        BatchLog {
            session: session.clone(),
            batch_no,
            chunk: None,
            rows_read: 0,
            rows_inserted: 0,
            rows_updated: 0,
            rows_expired: 0,
            rows_errored: 0,
            logged_at: Utc::now(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RunSummary {
    pub status: RunStatus,
    pub source_rows: u64,
    pub target_rows: u64,
    pub error_rows: u64,
    pub message: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl From<&JobOutcome> for RunSummary {
    fn from(outcome: &JobOutcome) -> Self {
        RunSummary {
            status: outcome.status.into(),
            source_rows: outcome.source_rows,
            target_rows: outcome.target_rows,
            error_rows: outcome.error_rows,
            message: outcome.message.clone(),
            finished_at: Utc::now(),
        }
    }
}
