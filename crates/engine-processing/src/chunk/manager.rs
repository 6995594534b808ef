use connectors::DbConnection;
use planner::query::{
    chunk::{self, ChunkPlan, OrderKey, count_query, sample_query},
    dialect::Dialect,
};
use tracing::{info, warn};

/// Plans how a source query is split for parallel processing.
#[derive(Debug, Clone, Copy)]
pub struct ChunkManager {
    chunk_size: u64,
}

impl ChunkManager {
    pub fn new(chunk_size: usize) -> Self {
        ChunkManager {
            chunk_size: chunk_size.max(1) as u64,
        }
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Row count of `sql`. Estimation is advisory: any failure yields 0.
    pub async fn estimate_total_rows(&self, source: &mut dyn DbConnection, sql: &str) -> u64 {
        let rows = match source.query(&count_query(sql), &[]).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "Row count estimation failed, assuming an empty source");
                return 0;
            }
        };
        let count = rows
            .first()
            .and_then(|row| row.field_values.first())
            .and_then(|field| field.value.as_i64());
        match count {
            Some(n) => u64::try_from(n).unwrap_or(0),
            None => {
                warn!("Row count query returned no usable value, assuming an empty source");
                0
            }
        }
    }

    pub fn detect_key_column(&self, sql: &str) -> Option<String> {
        chunk::detect_key_column(sql)
    }

    /// Ordering keys usable for key-based chunks. The keys must be exposed
    /// by the query itself, since the chunk window addresses them through
    /// the derived table; anything unverifiable degrades to offset/limit.
    pub async fn usable_order_keys(&self, source: &mut dyn DbConnection, sql: &str) -> Vec<OrderKey> {
        let Some(keys) = chunk::detect_order_keys(sql) else {
            return Vec::new();
        };

        let sample_sql = sample_query(source.dialect(), sql);
        let sample = match source.query(&sample_sql, &[]).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "Could not sample the source query, chunking by offset");
                return Vec::new();
            }
        };
        let Some(row) = sample.first() else {
            return Vec::new();
        };

        match keys.iter().find(|k| !row.contains(&k.column)) {
            Some(missing) => {
                warn!(
                    key = %missing.column,
                    "Ordering column is not selected by the source query, chunking by offset"
                );
                Vec::new()
            }
            None => keys,
        }
    }

    pub async fn plan_chunks(&self, source: &mut dyn DbConnection, sql: &str) -> ChunkPlan {
        let estimated = self.estimate_total_rows(source, sql).await;
        let keys = self.usable_order_keys(source, sql).await;
        let plan = ChunkPlan::new(estimated, self.chunk_size, keys);
        info!(
            estimated_rows = plan.estimated_rows,
            chunk_size = plan.chunk_size,
            chunks = plan.chunk_count,
            strategy = ?plan.strategy,
            key = plan.key_column().unwrap_or("-"),
            "Chunk plan ready"
        );
        plan
    }

    pub fn rewrite_for_chunk(
        &self,
        dialect: &dyn Dialect,
        sql: &str,
        index: usize,
        keys: &[OrderKey],
    ) -> String {
        chunk::chunk_query(dialect, sql, index, self.chunk_size, keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use connectors::sql::mock::{Fault, MockConnection};
    use model::{
        core::{database::DatabaseKind, value::Value},
        records::row::RowData,
    };
    use planner::query::{chunk::ChunkStrategy, dialect::Postgres};
    use tracing_test::traced_test;

    #[tokio::test]
    async fn test_plan_uses_count_and_key() {
        let count = RowData::from_pairs("", [("row_count", Value::Int(250_000))]);
        let sample = RowData::from_pairs("", [("id", Value::Int(1)), ("name", Value::from("a"))]);
        let mut source = MockConnection::default()
            .with_query_result("COUNT(*)", vec![count])
            .with_query_result("key_sample", vec![sample]);
        let plan = ChunkManager::new(100_000)
            .plan_chunks(&mut source, "SELECT id, name FROM customers ORDER BY id")
            .await;
        assert_eq!(plan.chunk_count, 3);
        assert_eq!(plan.strategy, ChunkStrategy::KeyBased);
        assert_eq!(plan.key_column(), Some("id"));
    }

    #[traced_test]
    #[tokio::test]
    async fn test_unselected_order_column_falls_back_to_offset() {
        let count = RowData::from_pairs("", [("row_count", Value::Int(4))]);
        let sample = RowData::from_pairs("", [("cid", Value::Int(1))]);
        let mut source = MockConnection::new(DatabaseKind::Sqlite)
            .with_query_result("COUNT(*)", vec![count])
            .with_query_result("key_sample", vec![sample]);
        let plan = ChunkManager::new(2)
            .plan_chunks(&mut source, "SELECT id AS cid FROM customers ORDER BY id")
            .await;
        assert_eq!(plan.chunk_count, 2);
        assert_eq!(plan.strategy, ChunkStrategy::OffsetLimit);
        assert!(plan.key_columns.is_empty());
        assert!(logs_contain("Ordering column is not selected"));
    }

    #[tokio::test]
    async fn test_composite_order_keys_are_kept_together() {
        let sample = RowData::from_pairs(
            "",
            [("region", Value::from("EU")), ("order_id", Value::Int(1))],
        );
        let mut source = MockConnection::default().with_query_result("key_sample", vec![sample]);
        let keys = ChunkManager::new(10)
            .usable_order_keys(&mut source, "SELECT region, order_id FROM o ORDER BY region, order_id")
            .await;
        assert_eq!(keys, vec![OrderKey::asc("region"), OrderKey::asc("order_id")]);
    }

    #[traced_test]
    #[tokio::test]
    async fn test_failed_estimate_degrades_to_single_chunk() {
        let mut source = MockConnection::default().with_fault(
            "COUNT(*)",
            Fault::Fatal {
                message: "permission denied".into(),
            },
        );
        let manager = ChunkManager::new(10);
        assert_eq!(manager.estimate_total_rows(&mut source, "SELECT * FROM t").await, 0);
        assert!(logs_contain("Row count estimation failed"));
        let plan = manager.plan_chunks(&mut source, "SELECT * FROM t").await;
        assert_eq!(plan.chunk_count, 1);
        assert_eq!(plan.strategy, ChunkStrategy::OffsetLimit);
    }

    #[test]
    fn test_offset_windows_partition_rows() {
        let manager = ChunkManager::new(4);
        let total = 10u64;
        let mut covered = Vec::new();
        for index in 0..3 {
            let sql = manager.rewrite_for_chunk(&Postgres, "SELECT * FROM t ORDER BY id", index, &[]);
            let limit: u64 = sql.split("LIMIT ").nth(1).unwrap().split(' ').next().unwrap().parse().unwrap();
            let offset: u64 = sql.rsplit("OFFSET ").next().unwrap().trim().parse().unwrap();
            covered.extend((offset..offset + limit).filter(|r| *r < total));
        }
        assert_eq!(covered, (0..total).collect::<Vec<_>>());
    }
}
