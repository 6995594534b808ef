use crate::sql::base::{connection::DbConnection, error::DbError};
use async_trait::async_trait;
use model::{
    core::{database::DatabaseKind, value::Value},
    records::row::RowData,
};
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
};

/// Failure injected into statements whose text contains a pattern.
#[derive(Debug, Clone)]
pub enum Fault {
    /// Fails the next `times` matching statements with a lost connection.
    Transient { times: usize },
    /// Fails any matching statement that binds `value`, as a numeric
    /// overflow would.
    OutOfRange { value: Value },
    /// Fails every matching statement.
    Fatal { message: String },
}

#[derive(Debug, Clone)]
struct Rule {
    pattern: String,
    fault: Fault,
}

#[derive(Debug, Default)]
struct MockState {
    cursor_rows: VecDeque<RowData>,
    cursor_open: bool,
    opened_cursors: Vec<String>,
    query_results: Vec<(String, Vec<RowData>)>,
    rules: Vec<Rule>,
    statements: Vec<(String, Vec<Value>)>,
    begins: usize,
    commits: usize,
    rollbacks: usize,
}

/// In-memory scripted connection.
///
/// Clones share state, so a test can keep one handle while the engine owns
/// the boxed connection, then inspect the statements it issued.
#[derive(Debug, Clone)]
pub struct MockConnection {
    kind: DatabaseKind,
    state: Arc<Mutex<MockState>>,
}

impl Default for MockConnection {
    fn default() -> Self {
        MockConnection::new(DatabaseKind::Postgres)
    }
}

impl MockConnection {
    pub fn new(kind: DatabaseKind) -> Self {
        MockConnection {
            kind,
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        // A panicking test thread must not hide what was recorded.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Rows served by `fetch_next` after any `open_cursor`.
    pub fn with_cursor_rows(self, rows: Vec<RowData>) -> Self {
        self.state().cursor_rows.extend(rows);
        self
    }

    /// Result returned by `query` when the SQL contains `pattern`.
    pub fn with_query_result(self, pattern: &str, rows: Vec<RowData>) -> Self {
        self.state().query_results.push((pattern.to_string(), rows));
        self
    }

    pub fn with_fault(self, pattern: &str, fault: Fault) -> Self {
        self.state().rules.push(Rule {
            pattern: pattern.to_string(),
            fault,
        });
        self
    }

    pub fn statements(&self) -> Vec<(String, Vec<Value>)> {
        self.state().statements.clone()
    }

    /// Statements containing `pattern`, in execution order.
    pub fn statements_matching(&self, pattern: &str) -> Vec<(String, Vec<Value>)> {
        self.state()
            .statements
            .iter()
            .filter(|(sql, _)| sql.contains(pattern))
            .cloned()
            .collect()
    }

    pub fn opened_cursors(&self) -> Vec<String> {
        self.state().opened_cursors.clone()
    }

    pub fn begins(&self) -> usize {
        self.state().begins
    }

    pub fn commits(&self) -> usize {
        self.state().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.state().rollbacks
    }

    fn check(&self, sql: &str, params: &[Value]) -> Result<(), DbError> {
        let mut state = self.state();
        for rule in state.rules.iter_mut().filter(|r| sql.contains(&r.pattern)) {
            match &mut rule.fault {
                Fault::Transient { times } if *times > 0 => {
                    *times -= 1;
                    return Err(DbError::ConnectionLost("connection reset by peer".into()));
                }
                Fault::Transient { .. } => {}
                Fault::OutOfRange { value } => {
                    if params.iter().any(|p| p.equal(value)) {
                        return Err(DbError::OutOfRange(format!(
                            "numeric field overflow for value {value}"
                        )));
                    }
                }
                Fault::Fatal { message } => return Err(DbError::Query(message.clone())),
            }
        }
        Ok(())
    }

    fn record(&self, sql: &str, params: &[Value]) {
        self.state()
            .statements
            .push((sql.to_string(), params.to_vec()));
    }
}

#[async_trait]
impl DbConnection for MockConnection {
    fn kind(&self) -> DatabaseKind {
        self.kind
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<RowData>, DbError> {
        self.check(sql, params)?;
        self.record(sql, params);
        let state = self.state();
        Ok(state
            .query_results
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default())
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, DbError> {
        self.check(sql, params)?;
        self.record(sql, params);
        Ok(1)
    }

    async fn execute_many(&mut self, sql: &str, rows: &[Vec<Value>]) -> Result<u64, DbError> {
        for params in rows {
            self.check(sql, params)?;
        }
        for params in rows {
            self.record(sql, params);
        }
        Ok(rows.len() as u64)
    }

    async fn begin(&mut self) -> Result<(), DbError> {
        self.state().begins += 1;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        self.check("COMMIT", &[])?;
        self.state().commits += 1;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        self.state().rollbacks += 1;
        Ok(())
    }

    async fn open_cursor(&mut self, sql: &str) -> Result<(), DbError> {
        self.check(sql, &[])?;
        let mut state = self.state();
        state.cursor_open = true;
        state.opened_cursors.push(sql.to_string());
        Ok(())
    }

    async fn fetch_next(&mut self, max_rows: usize) -> Result<Vec<RowData>, DbError> {
        let mut state = self.state();
        if !state.cursor_open {
            return Err(DbError::NoCursor);
        }
        let take = max_rows.min(state.cursor_rows.len());
        Ok(state.cursor_rows.drain(..take).collect())
    }

    async fn close_cursor(&mut self) -> Result<(), DbError> {
        self.state().cursor_open = false;
        Ok(())
    }
}
