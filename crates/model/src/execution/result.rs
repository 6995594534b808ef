use crate::execution::checkpoint::CheckpointValue;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChunkStatus {
    Success,
    Error,
    Stopped,
}

/// Outcome of processing one chunk (or, on the sequential path, the whole run).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkResult {
    pub chunk_index: usize,
    pub rows_read: u64,
    pub rows_inserted: u64,
    pub rows_updated: u64,
    pub rows_expired: u64,
    pub rows_unchanged: u64,
    pub rows_errored: u64,
    pub status: ChunkStatus,
    pub checkpoint: Option<CheckpointValue>,
    pub error: Option<String>,
}

impl ChunkResult {
    pub fn new(chunk_index: usize) -> Self {
        ChunkResult {
            chunk_index,
            rows_read: 0,
            rows_inserted: 0,
            rows_updated: 0,
            rows_expired: 0,
            rows_unchanged: 0,
            rows_errored: 0,
            status: ChunkStatus::Success,
            checkpoint: None,
            error: None,
        }
    }

    /// A chunk that failed as a whole. Its expected rows count as errored.
    pub fn failed(chunk_index: usize, message: String, expected_rows: u64) -> Self {
        ChunkResult {
            rows_errored: expected_rows,
            status: ChunkStatus::Error,
            error: Some(message),
            ..ChunkResult::new(chunk_index)
        }
    }

    /// Rows written to the target: fresh inserts plus in-place updates.
    pub fn target_rows(&self) -> u64 {
        self.rows_inserted + self.rows_updated
    }

    pub fn is_success(&self) -> bool {
        self.status == ChunkStatus::Success
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Success,
    Error,
    Stopped,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Success => "SUCCESS",
            JobStatus::Error => "ERROR",
            JobStatus::Stopped => "STOPPED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a job routine reports back to its caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobOutcome {
    pub status: JobStatus,
    pub source_rows: u64,
    pub target_rows: u64,
    pub error_rows: u64,
    pub message: Option<String>,
    pub chunks: Vec<ChunkResult>,
}

impl JobOutcome {
    pub fn new(status: JobStatus) -> Self {
        JobOutcome {
            status,
            source_rows: 0,
            target_rows: 0,
            error_rows: 0,
            message: None,
            chunks: Vec::new(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        JobOutcome {
            message: Some(message.into()),
            ..JobOutcome::new(JobStatus::Error)
        }
    }

    pub fn stopped() -> Self {
        JobOutcome::new(JobStatus::Stopped)
    }

    /// The result map handed back to the scheduler.
    pub fn to_map(&self) -> Map<String, JsonValue> {
        let mut map = Map::new();
        map.insert("status".into(), JsonValue::from(self.status.as_str()));
        map.insert("sourceRows".into(), JsonValue::from(self.source_rows));
        map.insert("targetRows".into(), JsonValue::from(self.target_rows));
        map.insert("errorRows".into(), JsonValue::from(self.error_rows));
        if let Some(message) = &self.message {
            map.insert("message".into(), JsonValue::from(message.as_str()));
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_map_keys() {
        let mut outcome = JobOutcome::new(JobStatus::Success);
        outcome.source_rows = 10;
        outcome.target_rows = 8;
        outcome.error_rows = 2;
        let map = outcome.to_map();
        assert_eq!(map["status"], "SUCCESS");
        assert_eq!(map["sourceRows"], 10);
        assert_eq!(map["targetRows"], 8);
        assert_eq!(map["errorRows"], 2);
        assert!(!map.contains_key("message"));
    }

    #[test]
    fn test_failed_chunk_counts_expected_rows() {
        let r = ChunkResult::failed(3, "boom".into(), 500);
        assert_eq!(r.status, ChunkStatus::Error);
        assert_eq!(r.rows_errored, 500);
        assert_eq!(r.target_rows(), 0);
    }
}
