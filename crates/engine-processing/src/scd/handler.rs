use crate::{
    context::RunContext,
    error::{ScdError, ScdStep},
    scd::ScdBatch,
    transform::TransformedRow,
};
use connectors::{DbConnection, DbError};
use model::{
    core::value::Value,
    execution::failed_row::{ProcessingStage, RowErrorRecord},
    records::row::RowData,
};
use planner::query::{
    dialect::{Dialect, SequenceExpr},
    dml::{ColumnExpr, insert_statement, update_statement},
};
use std::collections::HashMap;
use tracing::{debug, warn};

const STEP_SAVEPOINT: &str = "mapper_step";
const VERSION_SAVEPOINT: &str = "mapper_version";
const ROW_SAVEPOINT: &str = "mapper_row";

/// Rows affected by one SCD batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScdCounts {
    pub inserted: u64,
    pub updated: u64,
    pub expired: u64,
    pub errored: u64,
}

struct StepRow {
    params: Vec<Value>,
    key: String,
    row: RowData,
}

#[derive(Default)]
struct StepOutcome {
    applied: u64,
    rejected: u64,
}

/// Applies classified batches to the target table.
///
/// Each step runs as one batched statement under a savepoint. When the
/// database rejects a value as out of range, the step is rolled back and
/// replayed one row at a time so only the offending rows are skipped.
pub struct ScdHandler {
    ctx: RunContext,
    table: String,
}

impl ScdHandler {
    pub fn new(ctx: RunContext) -> Self {
        let table = ctx.target_table();
        ScdHandler { ctx, table }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub(crate) fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Runs expire, update and insert, in that order, on the open transaction.
    ///
    /// Expiring a version and inserting its successor succeed or fail
    /// together, so a key always keeps one current row.
    pub async fn execute(
        &self,
        target: &mut dyn DbConnection,
        batch: &ScdBatch,
    ) -> Result<ScdCounts, ScdError> {
        let mut counts = ScdCounts::default();

        // Type 2 batches never carry in-place updates, so new versions
        // and plain inserts go out together.
        if !batch.expires.is_empty() {
            self.apply_versions(target, batch, &mut counts).await?;
        }

        if !batch.updates.is_empty() {
            let columns = self.update_columns();
            let rows = batch
                .updates
                .iter()
                .map(|(skey, row)| {
                    let mut params = row.row.values_for(&columns);
                    params.push(Value::String(row.hash.clone()));
                    params.push(skey.clone());
                    self.step_row(params, row)
                })
                .collect();
            let outcome = self
                .run_step(target, ScdStep::Update, &self.update_sql(&columns), rows)
                .await?;
            counts.updated = outcome.applied;
            counts.errored += outcome.rejected;
        }

        if batch.expires.is_empty() && !batch.inserts.is_empty() {
            let columns = self.insert_columns();
            let rows = batch
                .inserts
                .iter()
                .map(|row| self.step_row(self.insert_params(&columns, row), row))
                .collect();
            let outcome = self
                .run_step(target, ScdStep::Insert, &self.insert_sql(&columns), rows)
                .await?;
            counts.inserted = outcome.applied;
            counts.errored += outcome.rejected;
        }

        Ok(counts)
    }

    /// Expires replaced versions, then inserts every row of the batch. A
    /// rejected value rolls both statements back and replays them per
    /// row, each expire sharing a savepoint with its successor insert.
    async fn apply_versions(
        &self,
        target: &mut dyn DbConnection,
        batch: &ScdBatch,
        counts: &mut ScdCounts,
    ) -> Result<(), ScdError> {
        let dialect = self.ctx.target_dialect;
        let columns = self.insert_columns();
        let expire_sql = self.expire_sql();
        let insert_sql = self.insert_sql(&columns);
        let expire_params: Vec<Vec<Value>> =
            batch.expires.iter().map(|(skey, _)| vec![skey.clone()]).collect();
        let insert_params: Vec<Vec<Value>> = batch
            .inserts
            .iter()
            .map(|row| self.insert_params(&columns, row))
            .collect();

        exec(target, &dialect.savepoint(VERSION_SAVEPOINT)).await?;
        let batched = match target.execute_many(&expire_sql, &expire_params).await {
            Ok(_) if insert_params.is_empty() => Ok(()),
            Ok(_) => target
                .execute_many(&insert_sql, &insert_params)
                .await
                .map(|_| ())
                .map_err(|e| (ScdStep::Insert, e)),
            Err(e) => Err((ScdStep::Expire, e)),
        };

        match batched {
            Ok(()) => {
                counts.expired += expire_params.len() as u64;
                counts.inserted += insert_params.len() as u64;
                debug!(table = %self.table, expired = expire_params.len(), inserted = insert_params.len(), "SCD versions applied");
            }
            Err((step, e)) if e.is_precision_error() => {
                warn!(table = %self.table, %step, error = %e, "Batch rejected a value, retrying versions row by row");
                exec(target, &dialect.rollback_to_savepoint(VERSION_SAVEPOINT)).await?;
                self.replay_versions(target, batch, &expire_sql, &insert_sql, &columns, counts)
                    .await?;
            }
            Err((step, source)) => {
                return Err(ScdError::Step {
                    step,
                    table: self.table.clone(),
                    source,
                });
            }
        }
        release(target, VERSION_SAVEPOINT, dialect).await
    }

    async fn replay_versions(
        &self,
        target: &mut dyn DbConnection,
        batch: &ScdBatch,
        expire_sql: &str,
        insert_sql: &str,
        columns: &[String],
        counts: &mut ScdCounts,
    ) -> Result<(), ScdError> {
        let dialect = self.ctx.target_dialect;
        let mut expiring: HashMap<&str, &Value> = batch
            .expires
            .iter()
            .map(|(skey, row)| (row.key_text.as_str(), skey))
            .collect();

        for row in &batch.inserts {
            let expire = expiring.remove(row.key_text.as_str());
            exec(target, &dialect.savepoint(ROW_SAVEPOINT)).await?;

            let mut result = Ok(());
            if let Some(skey) = expire {
                result = target
                    .execute(expire_sql, std::slice::from_ref(skey))
                    .await
                    .map(|_| ())
                    .map_err(|e| (ScdStep::Expire, e));
            }
            if result.is_ok() {
                result = target
                    .execute(insert_sql, &self.insert_params(columns, row))
                    .await
                    .map(|_| ())
                    .map_err(|e| (ScdStep::Insert, e));
            }

            match result {
                Ok(()) => {
                    counts.expired += u64::from(expire.is_some());
                    counts.inserted += 1;
                }
                Err((step, e)) if e.is_precision_error() => {
                    exec(target, &dialect.rollback_to_savepoint(ROW_SAVEPOINT)).await?;
                    warn!(table = %self.table, %step, key = %row.key_text, error = %e, "Skipping row");
                    self.reject(self.step_row(Vec::new(), row), &e).await;
                    counts.errored += 1;
                }
                Err((step, source)) => {
                    return Err(ScdError::Step {
                        step,
                        table: self.table.clone(),
                        source,
                    });
                }
            }
            release(target, ROW_SAVEPOINT, dialect).await?;
        }

        // Expires whose successor row is not part of this batch.
        let orphans: Vec<StepRow> = batch
            .expires
            .iter()
            .filter(|(_, row)| expiring.contains_key(row.key_text.as_str()))
            .map(|(skey, row)| self.step_row(vec![skey.clone()], row))
            .collect();
        if !orphans.is_empty() {
            let outcome = self.run_rows(target, ScdStep::Expire, expire_sql, orphans).await?;
            counts.expired += outcome.applied;
            counts.errored += outcome.rejected;
        }
        Ok(())
    }

    fn insert_params(&self, columns: &[String], row: &TransformedRow) -> Vec<Value> {
        let mut params = row.row.values_for(columns);
        params.push(Value::String(row.hash.clone()));
        params
    }

    fn step_row(&self, params: Vec<Value>, row: &TransformedRow) -> StepRow {
        StepRow {
            params,
            key: row.key_text.clone(),
            row: row.row.clone(),
        }
    }

    fn insert_columns(&self) -> Vec<String> {
        self.ctx.job.data_columns().iter().map(|c| c.target.clone()).collect()
    }

    /// Business keys never change on an in-place update.
    fn update_columns(&self) -> Vec<String> {
        self.ctx
            .job
            .data_columns()
            .iter()
            .filter(|c| !self.ctx.job.is_primary_key(&c.target))
            .map(|c| c.target.clone())
            .collect()
    }

    fn insert_sql(&self, data_columns: &[String]) -> String {
        let job = &self.ctx.job;
        let audit = &job.audit;
        let dialect = self.ctx.target_dialect;
        let now = dialect.current_timestamp();

        let mut params = data_columns.to_vec();
        params.push(audit.row_hash.clone());

        let mut exprs = Vec::new();
        match dialect.sequence_next_value(&job.sequence_name()) {
            SequenceExpr::Expr(expr) => exprs.push(ColumnExpr::new(&audit.surrogate_key, expr)),
            SequenceExpr::AutoIncrement => {}
        }
        exprs.push(ColumnExpr::new(&audit.created_at, now));
        exprs.push(ColumnExpr::new(&audit.updated_at, now));
        if job.is_dimension() {
            let active = Value::String(audit.active_value.clone());
            exprs.push(ColumnExpr::new(&audit.active_flag, active.sql_literal()));
            exprs.push(ColumnExpr::new(&audit.valid_from, now));
        }
        insert_statement(dialect, &self.table, &params, &exprs)
    }

    fn update_sql(&self, data_columns: &[String]) -> String {
        let audit = &self.ctx.job.audit;
        let dialect = self.ctx.target_dialect;
        let mut params = data_columns.to_vec();
        params.push(audit.row_hash.clone());
        let exprs = [ColumnExpr::new(&audit.updated_at, dialect.current_timestamp())];
        update_statement(dialect, &self.table, &params, &exprs, &audit.surrogate_key)
    }

    fn expire_sql(&self) -> String {
        let audit = &self.ctx.job.audit;
        let dialect = self.ctx.target_dialect;
        let now = dialect.current_timestamp();
        let inactive = Value::String(audit.inactive_value.clone());
        let exprs = [
            ColumnExpr::new(&audit.active_flag, inactive.sql_literal()),
            ColumnExpr::new(&audit.valid_to, now),
            ColumnExpr::new(&audit.updated_at, now),
        ];
        update_statement(dialect, &self.table, &[], &exprs, &audit.surrogate_key)
    }

    async fn run_step(
        &self,
        target: &mut dyn DbConnection,
        step: ScdStep,
        sql: &str,
        rows: Vec<StepRow>,
    ) -> Result<StepOutcome, ScdError> {
        let dialect = self.ctx.target_dialect;
        let params: Vec<Vec<Value>> = rows.iter().map(|r| r.params.clone()).collect();

        exec(target, &dialect.savepoint(STEP_SAVEPOINT)).await?;
        match target.execute_many(sql, &params).await {
            Ok(_) => {
                release(target, STEP_SAVEPOINT, dialect).await?;
                debug!(table = %self.table, %step, rows = rows.len(), "SCD step applied");
                Ok(StepOutcome {
                    applied: rows.len() as u64,
                    rejected: 0,
                })
            }
            Err(e) if e.is_precision_error() => {
                warn!(table = %self.table, %step, rows = rows.len(), error = %e, "Batch rejected a value, retrying row by row");
                exec(target, &dialect.rollback_to_savepoint(STEP_SAVEPOINT)).await?;
                let outcome = self.run_rows(target, step, sql, rows).await?;
                release(target, STEP_SAVEPOINT, dialect).await?;
                Ok(outcome)
            }
            Err(source) => Err(ScdError::Step {
                step,
                table: self.table.clone(),
                source,
            }),
        }
    }

    async fn run_rows(
        &self,
        target: &mut dyn DbConnection,
        step: ScdStep,
        sql: &str,
        rows: Vec<StepRow>,
    ) -> Result<StepOutcome, ScdError> {
        let dialect = self.ctx.target_dialect;
        let mut outcome = StepOutcome::default();

        for row in rows {
            exec(target, &dialect.savepoint(ROW_SAVEPOINT)).await?;
            match target.execute(sql, &row.params).await {
                Ok(_) => outcome.applied += 1,
                Err(e) if e.is_precision_error() => {
                    exec(target, &dialect.rollback_to_savepoint(ROW_SAVEPOINT)).await?;
                    warn!(table = %self.table, %step, key = %row.key, error = %e, "Skipping row");
                    self.reject(row, &e).await;
                    outcome.rejected += 1;
                }
                Err(source) => {
                    return Err(ScdError::Step {
                        step,
                        table: self.table.clone(),
                        source,
                    });
                }
            }
            release(target, ROW_SAVEPOINT, dialect).await?;
        }
        Ok(outcome)
    }

    async fn reject(&self, row: StepRow, err: &DbError) {
        let record = RowErrorRecord::new(
            &self.ctx.session,
            &self.ctx.job.job_id,
            ProcessingStage::Load,
            row.key,
            err.to_string(),
        )
        .with_row(row.row);
        self.ctx.log_row_error(&record).await;
    }
}

async fn exec(target: &mut dyn DbConnection, sql: &str) -> Result<(), ScdError> {
    target.execute(sql, &[]).await.map(|_| ()).map_err(ScdError::Savepoint)
}

async fn release(
    target: &mut dyn DbConnection,
    name: &str,
    dialect: &dyn Dialect,
) -> Result<(), ScdError> {
    match dialect.release_savepoint(name) {
        Some(sql) => exec(target, &sql).await,
        None => Ok(()),
    }
}
