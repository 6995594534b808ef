use crate::{error::CheckpointError, state::SessionStore};
use model::{
    execution::{
        checkpoint::{CheckpointConfig, CheckpointStrategy, CheckpointValue},
        session::{CHECKPOINT_COMPLETED, SessionKey},
    },
    records::row::RowData,
};
use planner::query::{checkpoint::resume_after, dialect::Dialect, strip_terminator};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where a resumed run picks up.
#[derive(Debug, Clone, PartialEq)]
pub enum ResumePoint {
    /// Continue strictly after this key.
    Key(CheckpointValue),
    /// Discard this many rows from the start of the cursor.
    RowSkip(u64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckpointState {
    None,
    InProgress(ResumePoint),
    /// The previous run finished. Treated like `None` when resuming.
    Completed,
}

impl CheckpointState {
    pub fn resume_point(&self) -> Option<&ResumePoint> {
        match self {
            CheckpointState::InProgress(point) => Some(point),
            CheckpointState::None | CheckpointState::Completed => None,
        }
    }

    /// Rows to discard after the cursor opens.
    pub fn skip_count(&self) -> u64 {
        match self.resume_point() {
            Some(ResumePoint::RowSkip(rows)) => *rows,
            _ => 0,
        }
    }
}

/// Reads, applies and persists the resume position of one run.
///
/// Persisting is best effort: a failed write is logged and the run goes on.
pub struct CheckpointHandler {
    config: CheckpointConfig,
    store: Arc<dyn SessionStore>,
    session: SessionKey,
}

impl CheckpointHandler {
    pub fn new(config: CheckpointConfig, store: Arc<dyn SessionStore>, session: SessionKey) -> Self {
        CheckpointHandler {
            config,
            store,
            session,
        }
    }

    pub fn strategy(&self) -> CheckpointStrategy {
        self.config.effective_strategy()
    }

    pub fn columns(&self) -> &[String] {
        &self.config.columns
    }

    pub fn parse(&self, raw: Option<&str>) -> CheckpointState {
        let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
            return CheckpointState::None;
        };
        if raw == CHECKPOINT_COMPLETED {
            return CheckpointState::Completed;
        }

        match self.strategy() {
            CheckpointStrategy::None => CheckpointState::None,
            CheckpointStrategy::RowSkip => match raw.parse::<u64>() {
                Ok(rows) => CheckpointState::InProgress(ResumePoint::RowSkip(rows)),
                Err(_) => {
                    warn!(mapref = %self.session.mapref, value = raw, "Discarding unreadable row-skip checkpoint");
                    CheckpointState::None
                }
            },
            CheckpointStrategy::Key => match CheckpointValue::parse(raw, self.config.columns.len()) {
                Some(value) => CheckpointState::InProgress(ResumePoint::Key(value)),
                None => {
                    warn!(
                        mapref = %self.session.mapref,
                        value = raw,
                        expected_parts = self.config.columns.len(),
                        "Discarding checkpoint with wrong number of key parts"
                    );
                    CheckpointState::None
                }
            },
        }
    }

    /// Uses the value handed in by the caller, falling back to the store.
    pub async fn resolve(&self, supplied: Option<&str>) -> CheckpointState {
        if self.strategy() == CheckpointStrategy::None {
            return CheckpointState::None;
        }
        let stored = match supplied {
            Some(value) => Some(value.to_string()),
            None => match self.store.load_checkpoint(&self.session.mapref).await {
                Ok(value) => value,
                Err(e) => {
                    warn!(mapref = %self.session.mapref, error = %e, "Failed to load checkpoint, starting cold");
                    None
                }
            },
        };

        let state = self.parse(stored.as_deref());
        match &state {
            CheckpointState::InProgress(point) => {
                info!(mapref = %self.session.mapref, resume = ?point, "Resuming from checkpoint")
            }
            CheckpointState::Completed => {
                info!(mapref = %self.session.mapref, "Previous run completed, starting from scratch")
            }
            CheckpointState::None => debug!(mapref = %self.session.mapref, "No checkpoint"),
        }
        state
    }

    /// Restricts the source query to rows after the stored key. Any other
    /// state leaves the query as it is.
    pub fn rewrite_query(&self, dialect: &dyn Dialect, sql: &str, state: &CheckpointState) -> String {
        match state.resume_point() {
            Some(ResumePoint::Key(value)) => {
                resume_after(dialect, sql, &self.config.columns, value.parts())
            }
            _ => strip_terminator(sql).to_string(),
        }
    }

    /// Key position of `row`, or `None` when the strategy is not `Key`.
    pub fn value_from_row(&self, row: &RowData) -> Result<Option<CheckpointValue>, CheckpointError> {
        if self.strategy() != CheckpointStrategy::Key {
            return Ok(None);
        }
        let parts = self
            .config
            .columns
            .iter()
            .map(|column| {
                row.get(column)
                    .map(|f| f.value.clone())
                    .ok_or_else(|| CheckpointError::MissingColumn(column.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(CheckpointValue::new(parts)))
    }

    pub async fn update_checkpoint(&self, value: &str) {
        if self.strategy() == CheckpointStrategy::None {
            return;
        }
        match self.store.save_checkpoint(&self.session, value).await {
            Ok(()) => debug!(mapref = %self.session.mapref, checkpoint = value, "Checkpoint saved"),
            Err(e) => {
                warn!(mapref = %self.session.mapref, checkpoint = value, error = %e, "Failed to save checkpoint")
            }
        }
    }

    pub async fn complete_checkpoint(&self) {
        self.update_checkpoint(CHECKPOINT_COMPLETED).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::StateStoreError,
        state::{
            memory::MemorySessionStore,
            models::{BatchLog, RunRecord, RunSummary},
        },
    };
    use async_trait::async_trait;
    use model::{core::value::Value, execution::failed_row::RowErrorRecord};
    use planner::query::dialect::{Oracle, Postgres};

    fn session() -> SessionKey {
        SessionKey {
            mapref: "M_ORD".into(),
            process_id: 1,
            session_id: 1,
        }
    }

    fn handler(config: CheckpointConfig, store: Arc<dyn SessionStore>) -> CheckpointHandler {
        CheckpointHandler::new(config, store, session())
    }

    #[tokio::test]
    async fn test_completed_resolves_to_cold_start() {
        let store = Arc::new(MemorySessionStore::new());
        let h = handler(CheckpointConfig::key(&["order_id"]), store.clone());

        h.update_checkpoint("150").await;
        h.complete_checkpoint().await;

        let state = h.resolve(None).await;
        assert_eq!(state, CheckpointState::Completed);
        let sql = "SELECT * FROM orders ORDER BY order_id";
        assert_eq!(h.rewrite_query(&Postgres, sql, &state), sql);
        assert_eq!(state.skip_count(), 0);
    }

    #[tokio::test]
    async fn test_key_checkpoint_rewrites_query() {
        let store = Arc::new(MemorySessionStore::new().with_checkpoint("M_ORD", "150"));
        let h = handler(CheckpointConfig::key(&["order_id"]), store);

        let state = h.resolve(None).await;
        assert_eq!(
            h.rewrite_query(&Postgres, "SELECT * FROM orders;", &state),
            "SELECT * FROM (SELECT * FROM orders) ckpt_src WHERE order_id > '150' ORDER BY order_id"
        );
    }

    #[tokio::test]
    async fn test_supplied_value_wins_over_store() {
        let store = Arc::new(MemorySessionStore::new().with_checkpoint("M_ORD", "150"));
        let h = handler(CheckpointConfig::key(&["region", "order_id"]), store);

        let state = h.resolve(Some("EU|7")).await;
        assert_eq!(
            h.rewrite_query(&Oracle, "SELECT * FROM orders", &state),
            "SELECT * FROM (SELECT * FROM orders) ckpt_src WHERE (region > 'EU') OR \
             (region = 'EU' AND order_id > '7') ORDER BY region, order_id"
        );
    }

    #[test]
    fn test_mismatched_parts_are_discarded() {
        let h = handler(
            CheckpointConfig::key(&["region", "order_id"]),
            Arc::new(MemorySessionStore::new()),
        );
        assert_eq!(h.parse(Some("150")), CheckpointState::None);
        assert_eq!(h.parse(Some("")), CheckpointState::None);
        assert!(matches!(
            h.parse(Some("|7")),
            CheckpointState::InProgress(ResumePoint::Key(_))
        ));
    }

    #[test]
    fn test_row_skip_parsing() {
        let h = handler(CheckpointConfig::row_skip(), Arc::new(MemorySessionStore::new()));
        assert_eq!(h.parse(Some("2500")).skip_count(), 2500);
        assert_eq!(h.parse(Some("not-a-number")), CheckpointState::None);
        assert_eq!(h.parse(Some("COMPLETED")), CheckpointState::Completed);
    }

    #[test]
    fn test_value_from_row() {
        let h = handler(
            CheckpointConfig::key(&["region", "order_id"]),
            Arc::new(MemorySessionStore::new()),
        );
        let row = RowData::from_pairs("", [("REGION", Value::from("EU")), ("ORDER_ID", Value::Int(9))]);
        let value = h.value_from_row(&row).unwrap().unwrap();
        assert_eq!(value.serialize(), "EU|9");

        let partial = RowData::from_pairs("", [("region", Value::from("EU"))]);
        assert!(matches!(
            h.value_from_row(&partial),
            Err(CheckpointError::MissingColumn(c)) if c == "order_id"
        ));

        let disabled = handler(CheckpointConfig::disabled(), Arc::new(MemorySessionStore::new()));
        assert_eq!(disabled.value_from_row(&row).unwrap(), None);
    }

    struct UnavailableStore;

    fn unavailable() -> StateStoreError {
        StateStoreError::UnknownRun("metadata offline".into())
    }

    #[async_trait]
    impl SessionStore for UnavailableStore {
        async fn load_checkpoint(&self, _: &str) -> Result<Option<String>, StateStoreError> {
            Err(unavailable())
        }
        async fn save_checkpoint(&self, _: &SessionKey, _: &str) -> Result<(), StateStoreError> {
            Err(unavailable())
        }
        async fn reset_checkpoint(&self, _: &str) -> Result<(), StateStoreError> {
            Err(unavailable())
        }
        async fn start_run(&self, _: &RunRecord) -> Result<(), StateStoreError> {
            Err(unavailable())
        }
        async fn record_batch(&self, _: &BatchLog) -> Result<(), StateStoreError> {
            Err(unavailable())
        }
        async fn finish_run(&self, _: &SessionKey, _: &RunSummary) -> Result<(), StateStoreError> {
            Err(unavailable())
        }
        async fn record_row_error(&self, _: &RowErrorRecord) -> Result<(), StateStoreError> {
            Err(unavailable())
        }
        async fn is_stop_requested(&self, _: &str) -> Result<bool, StateStoreError> {
            Err(unavailable())
        }
        async fn request_stop(&self, _: &str, _: bool) -> Result<(), StateStoreError> {
            Err(unavailable())
        }
    }

    #[tokio::test]
    async fn test_store_failures_are_not_propagated() {
        let h = handler(CheckpointConfig::key(&["order_id"]), Arc::new(UnavailableStore));
        h.update_checkpoint("10").await;
        h.complete_checkpoint().await;
        assert_eq!(h.resolve(None).await, CheckpointState::None);
    }
}
