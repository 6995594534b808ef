use crate::core::database::DatabaseKind;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;

pub const DEFAULT_BULK_LIMIT: usize = 5_000;
pub const DEFAULT_CHUNK_SIZE: usize = 50_000;
pub const DEFAULT_MIN_ROWS_FOR_PARALLEL: u64 = 100_000;
const MAX_AUTO_WORKERS: usize = 16;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum TableType {
    /// Dimension: carries the active flag and validity columns.
    Dim,
    Fct,
    Mrt,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(try_from = "u8", into = "u8")]
pub enum ScdType {
    /// Overwrite changed rows in place.
    #[default]
    Type1,
    /// Close the active version and insert a new one.
    Type2,
}

impl TryFrom<u8> for ScdType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ScdType::Type1),
            2 => Ok(ScdType::Type2),
            other => Err(format!("unsupported SCD type {other}")),
        }
    }
}

impl From<ScdType> for u8 {
    fn from(value: ScdType) -> Self {
        match value {
            ScdType::Type1 => 1,
            ScdType::Type2 => 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnMapping {
    pub target: String,
    pub source: String,
}

impl ColumnMapping {
    pub fn new(target: &str, source: &str) -> Self {
        ColumnMapping {
            target: target.to_string(),
            source: source.to_string(),
        }
    }
}

/// Names of the bookkeeping columns the engine maintains on every target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct AuditColumns {
    pub surrogate_key: String,
    pub row_hash: String,
    pub created_at: String,
    pub updated_at: String,
    pub active_flag: String,
    pub valid_from: String,
    pub valid_to: String,
    pub active_value: String,
    pub inactive_value: String,
}

impl Default for AuditColumns {
    fn default() -> Self {
        AuditColumns {
            surrogate_key: "SKEY".to_string(),
            row_hash: "RWHKEY".to_string(),
            created_at: "RECCRDT".to_string(),
            updated_at: "RECUPDT".to_string(),
            active_flag: "CURFLG".to_string(),
            valid_from: "FROMDT".to_string(),
            valid_to: "TODT".to_string(),
            active_value: "Y".to_string(),
            inactive_value: "N".to_string(),
        }
    }
}

impl AuditColumns {
    pub fn is_audit(&self, column: &str) -> bool {
        [
            &self.surrogate_key,
            &self.row_hash,
            &self.created_at,
            &self.updated_at,
            &self.active_flag,
            &self.valid_from,
            &self.valid_to,
        ]
        .iter()
        .any(|c| c.eq_ignore_ascii_case(column))
    }
}

/// Worker count for the parallel path: a fixed number or `"auto"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerCount {
    #[default]
    Auto,
    Fixed(usize),
}

impl WorkerCount {
    /// Number of workers to start for `chunk_count` chunks.
    pub fn resolve(&self, chunk_count: usize) -> usize {
        let wanted = match self {
            WorkerCount::Fixed(n) => *n,
            WorkerCount::Auto => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                .clamp(1, MAX_AUTO_WORKERS),
        };
        wanted.max(1).min(chunk_count.max(1))
    }
}

impl Serialize for WorkerCount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            WorkerCount::Auto => serializer.serialize_str("auto"),
            WorkerCount::Fixed(n) => serializer.serialize_u64(*n as u64),
        }
    }
}

impl<'de> Deserialize<'de> for WorkerCount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Fixed(usize),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Fixed(0) => Ok(WorkerCount::Auto),
            Repr::Fixed(n) => Ok(WorkerCount::Fixed(n)),
            Repr::Text(s) if s.eq_ignore_ascii_case("auto") => Ok(WorkerCount::Auto),
            Repr::Text(s) => s
                .trim()
                .parse::<usize>()
                .map(|n| if n == 0 { WorkerCount::Auto } else { WorkerCount::Fixed(n) })
                .map_err(|_| serde::de::Error::custom(format!("invalid worker count '{s}'"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ParallelConfig {
    pub enable_parallel: bool,
    pub max_workers: WorkerCount,
    pub chunk_size: usize,
    pub min_rows_for_parallel: u64,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        ParallelConfig {
            enable_parallel: false,
            max_workers: WorkerCount::Auto,
            chunk_size: DEFAULT_CHUNK_SIZE,
            min_rows_for_parallel: DEFAULT_MIN_ROWS_FOR_PARALLEL,
        }
    }
}

impl ParallelConfig {
    pub fn enabled() -> Self {
        ParallelConfig {
            enable_parallel: true,
            ..Default::default()
        }
    }

    pub fn with_max_workers(mut self, workers: WorkerCount) -> Self {
        self.max_workers = workers;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_min_rows(mut self, min_rows: u64) -> Self {
        self.min_rows_for_parallel = min_rows;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobConfigError {
    #[error("Job {0} declares no primary key columns")]
    MissingPrimaryKey(String),

    #[error("Job {0} declares no target columns")]
    MissingColumns(String),

    #[error("Primary key column {0} is not part of the target column list")]
    UnmappedPrimaryKey(String),

    #[error("Bulk limit must be greater than zero")]
    InvalidBulkLimit,

    #[error("Chunk size must be greater than zero")]
    InvalidChunkSize,

    #[error("SCD type 2 requires a dimension target, {0} is not one")]
    Type2RequiresDimension(String),
}

/// Resolved description of one mapping job. Immutable for the duration of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobConfig {
    pub mapref: String,
    pub job_id: String,
    #[serde(default)]
    pub target_schema: Option<String>,
    pub target_table: String,
    pub table_type: TableType,
    pub source_query: String,
    /// Dialect tag of the source side. Falls back to the connection's kind.
    #[serde(default)]
    pub source_dialect: Option<String>,
    #[serde(default)]
    pub target_dialect: Option<String>,
    pub primary_keys: Vec<ColumnMapping>,
    pub columns: Vec<ColumnMapping>,
    #[serde(default)]
    pub hash_excluded: BTreeSet<String>,
    #[serde(default = "default_bulk_limit")]
    pub bulk_limit: usize,
    #[serde(default)]
    pub scd_type: ScdType,
    #[serde(default)]
    pub parallel: Option<ParallelConfig>,
    #[serde(default)]
    pub audit: AuditColumns,
    #[serde(default)]
    pub surrogate_sequence: Option<String>,
    #[serde(default = "default_commit_interval")]
    pub commit_interval: usize,
}

fn default_bulk_limit() -> usize {
    DEFAULT_BULK_LIMIT
}

fn default_commit_interval() -> usize {
    1
}

impl JobConfig {
    pub fn new(
        mapref: &str,
        job_id: &str,
        target_table: &str,
        table_type: TableType,
        source_query: &str,
    ) -> Self {
        JobConfig {
            mapref: mapref.to_string(),
            job_id: job_id.to_string(),
            target_schema: None,
            target_table: target_table.to_string(),
            table_type,
            source_query: source_query.to_string(),
            source_dialect: None,
            target_dialect: None,
            primary_keys: Vec::new(),
            columns: Vec::new(),
            hash_excluded: BTreeSet::new(),
            bulk_limit: DEFAULT_BULK_LIMIT,
            scd_type: ScdType::Type1,
            parallel: None,
            audit: AuditColumns::default(),
            surrogate_sequence: None,
            commit_interval: 1,
        }
    }

    pub fn with_schema(mut self, schema: &str) -> Self {
        self.target_schema = Some(schema.to_string());
        self
    }

    /// Adds a primary key column, registering it as a target column too.
    pub fn with_primary_key(mut self, target: &str, source: &str) -> Self {
        self.primary_keys.push(ColumnMapping::new(target, source));
        if !self.columns.iter().any(|c| c.target.eq_ignore_ascii_case(target)) {
            self.columns.push(ColumnMapping::new(target, source));
        }
        self
    }

    pub fn with_column(mut self, target: &str, source: &str) -> Self {
        self.columns.push(ColumnMapping::new(target, source));
        self
    }

    pub fn with_hash_excluded(mut self, column: &str) -> Self {
        self.hash_excluded.insert(column.to_string());
        self
    }

    pub fn with_bulk_limit(mut self, bulk_limit: usize) -> Self {
        self.bulk_limit = bulk_limit;
        self
    }

    pub fn with_scd_type(mut self, scd_type: ScdType) -> Self {
        self.scd_type = scd_type;
        self
    }

    pub fn with_parallel(mut self, parallel: ParallelConfig) -> Self {
        self.parallel = Some(parallel);
        self
    }

    pub fn with_audit(mut self, audit: AuditColumns) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_sequence(mut self, sequence: &str) -> Self {
        self.surrogate_sequence = Some(sequence.to_string());
        self
    }

    pub fn with_commit_interval(mut self, batches: usize) -> Self {
        self.commit_interval = batches;
        self
    }

    pub fn with_dialects(mut self, source: &str, target: &str) -> Self {
        self.source_dialect = Some(source.to_string());
        self.target_dialect = Some(target.to_string());
        self
    }

    pub fn validate(&self) -> Result<(), JobConfigError> {
        if self.columns.is_empty() {
            return Err(JobConfigError::MissingColumns(self.job_id.clone()));
        }
        if self.primary_keys.is_empty() {
            return Err(JobConfigError::MissingPrimaryKey(self.job_id.clone()));
        }
        if let Some(pk) = self.primary_keys.iter().find(|pk| {
            !self
                .columns
                .iter()
                .any(|c| c.target.eq_ignore_ascii_case(&pk.target))
        }) {
            return Err(JobConfigError::UnmappedPrimaryKey(pk.target.clone()));
        }
        if self.bulk_limit == 0 {
            return Err(JobConfigError::InvalidBulkLimit);
        }
        if self
            .parallel
            .as_ref()
            .is_some_and(|p| p.enable_parallel && p.chunk_size == 0)
        {
            return Err(JobConfigError::InvalidChunkSize);
        }
        if self.scd_type == ScdType::Type2 && !self.is_dimension() {
            return Err(JobConfigError::Type2RequiresDimension(self.target_table.clone()));
        }
        Ok(())
    }

    pub fn is_dimension(&self) -> bool {
        self.table_type == TableType::Dim
    }

    pub fn parallel_enabled(&self) -> bool {
        self.parallel.as_ref().is_some_and(|p| p.enable_parallel)
    }

    /// Mapped target columns, audit columns removed.
    pub fn data_columns(&self) -> Vec<&ColumnMapping> {
        self.columns
            .iter()
            .filter(|c| !self.audit.is_audit(&c.target))
            .collect()
    }

    /// Target columns that contribute to the row hash, in declaration order.
    pub fn hash_columns(&self) -> Vec<String> {
        self.data_columns()
            .into_iter()
            .filter(|c| {
                !self
                    .hash_excluded
                    .iter()
                    .any(|x| x.eq_ignore_ascii_case(&c.target))
            })
            .map(|c| c.target.clone())
            .collect()
    }

    pub fn primary_key_targets(&self) -> Vec<String> {
        self.primary_keys.iter().map(|pk| pk.target.clone()).collect()
    }

    pub fn is_primary_key(&self, target: &str) -> bool {
        self.primary_keys
            .iter()
            .any(|pk| pk.target.eq_ignore_ascii_case(target))
    }

    pub fn sequence_name(&self) -> String {
        self.surrogate_sequence
            .clone()
            .unwrap_or_else(|| format!("{}_SEQ", self.target_table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> JobConfig {
        JobConfig::new("M_CUST", "J1", "DIM_CUSTOMER", TableType::Dim, "SELECT * FROM c")
            .with_primary_key("CUST_ID", "id")
            .with_column("NAME", "name")
            .with_column("LOAD_TS", "load_ts")
            .with_column("RWHKEY", "hash")
            .with_hash_excluded("load_ts")
    }

    #[test]
    fn test_hash_columns_skip_excluded_and_audit() {
        assert_eq!(job().hash_columns(), vec!["CUST_ID", "NAME"]);
    }

    #[test]
    fn test_validate_rejects_type2_on_fact() {
        let mut j = job().with_scd_type(ScdType::Type2);
        assert!(j.validate().is_ok());
        j.table_type = TableType::Fct;
        assert_eq!(
            j.validate(),
            Err(JobConfigError::Type2RequiresDimension("DIM_CUSTOMER".into()))
        );
    }

    #[test]
    fn test_worker_count_resolution() {
        assert_eq!(WorkerCount::Fixed(8).resolve(3), 3);
        assert_eq!(WorkerCount::Fixed(2).resolve(10), 2);
        let auto = WorkerCount::Auto.resolve(100);
        assert!((1..=MAX_AUTO_WORKERS).contains(&auto));
        assert_eq!(WorkerCount::Auto.resolve(0), 1);
    }

    #[test]
    fn test_parallel_config_from_json() {
        let cfg: ParallelConfig = serde_json::from_str(
            r#"{"enableParallel": true, "maxWorkers": "auto", "chunkSize": 1000}"#,
        )
        .unwrap();
        assert!(cfg.enable_parallel);
        assert_eq!(cfg.max_workers, WorkerCount::Auto);
        assert_eq!(cfg.chunk_size, 1000);
        assert_eq!(cfg.min_rows_for_parallel, DEFAULT_MIN_ROWS_FOR_PARALLEL);

        let fixed: ParallelConfig = serde_json::from_str(r#"{"maxWorkers": 4}"#).unwrap();
        assert_eq!(fixed.max_workers, WorkerCount::Fixed(4));
    }

    #[test]
    fn test_job_config_defaults_from_json() {
        let job: JobConfig = serde_json::from_str(
            r#"{
                "mapref": "M1", "jobId": "J1", "targetTable": "F_SALES", "tableType": "FCT",
                "sourceQuery": "SELECT id, amt FROM sales",
                "primaryKeys": [{"target": "ID", "source": "id"}],
                "columns": [{"target": "ID", "source": "id"}, {"target": "AMT", "source": "amt"}],
                "scdType": 1
            }"#,
        )
        .unwrap();
        assert_eq!(job.bulk_limit, DEFAULT_BULK_LIMIT);
        assert_eq!(job.commit_interval, 1);
        assert_eq!(job.sequence_name(), "F_SALES_SEQ");
        assert!(job.validate().is_ok());
    }
}
