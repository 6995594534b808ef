use crate::{
    error::StateStoreError,
    state::models::{BatchLog, RunRecord, RunSummary},
};
use async_trait::async_trait;
use model::execution::{failed_row::RowErrorRecord, session::SessionKey};

pub mod memory;
pub mod models;
pub mod sled_store;
pub mod sql_store;

/// Metadata kept between and during runs: the checkpoint value, run and
/// batch bookkeeping, skipped-row records and stop requests.
///
/// Writes are independent of the target-table transactions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Latest checkpoint value stored for the mapping.
    async fn load_checkpoint(&self, mapref: &str) -> Result<Option<String>, StateStoreError>;

    async fn save_checkpoint(&self, session: &SessionKey, value: &str) -> Result<(), StateStoreError>;

    async fn reset_checkpoint(&self, mapref: &str) -> Result<(), StateStoreError>;

    async fn start_run(&self, run: &RunRecord) -> Result<(), StateStoreError>;

    async fn record_batch(&self, batch: &BatchLog) -> Result<(), StateStoreError>;

    async fn finish_run(&self, session: &SessionKey, summary: &RunSummary) -> Result<(), StateStoreError>;

    async fn record_row_error(&self, record: &RowErrorRecord) -> Result<(), StateStoreError>;

    async fn is_stop_requested(&self, mapref: &str) -> Result<bool, StateStoreError>;

    /// Sets or clears the stop request of a mapping.
    async fn request_stop(&self, mapref: &str, stop: bool) -> Result<(), StateStoreError>;
}
